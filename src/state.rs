use crate::errors::{AppError, AppResult};
use crate::identity::IdentityVerifier;
use crate::ledger::Ledger;
use crate::recorder::Recorder;
use crate::store::StoreHandle;
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ── Request Counters (lock-free) ──

pub struct RequestCounters {
    pub calculations_priced: AtomicU64,
    pub calculations_saved: AtomicU64,
    pub credit_rejections: AtomicU64,
    pub auth_failures: AtomicU64,
    pub invalid_requests: AtomicU64,
    pub server_errors: AtomicU64,
}

impl RequestCounters {
    pub fn new() -> Self {
        Self {
            calculations_priced: AtomicU64::new(0),
            calculations_saved: AtomicU64::new(0),
            credit_rejections: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            invalid_requests: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
        }
    }

    /// Count a handler outcome by error kind and pass it through.
    pub fn observe<T>(&self, result: AppResult<T>) -> AppResult<T> {
        if let Err(e) = &result {
            let counter = match e {
                AppError::Unauthorized(_) => &self.auth_failures,
                AppError::InvalidInput(_) | AppError::NotFound(_) => &self.invalid_requests,
                AppError::InsufficientCredit => &self.credit_rejections,
                _ => &self.server_errors,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    pub fn snapshot(&self) -> serde_json::Value {
        use portable_atomic::Ordering::Relaxed;
        serde_json::json!({
            "calculations_priced": self.calculations_priced.load(Relaxed),
            "calculations_saved": self.calculations_saved.load(Relaxed),
            "credit_rejections": self.credit_rejections.load(Relaxed),
            "auth_failures": self.auth_failures.load(Relaxed),
            "invalid_requests": self.invalid_requests.load(Relaxed),
            "server_errors": self.server_errors.load(Relaxed),
        })
    }
}

// ── Application shared state ──

pub struct AppState {
    pub verifier: Arc<dyn IdentityVerifier>,
    pub ledger: Ledger,
    pub recorder: Recorder,
    pub counters: RequestCounters,
}

impl AppState {
    pub fn new(store: StoreHandle, verifier: Arc<dyn IdentityVerifier>) -> Arc<Self> {
        Arc::new(Self {
            verifier,
            ledger: Ledger::new(store.clone()),
            recorder: Recorder::new(store),
            counters: RequestCounters::new(),
        })
    }
}
