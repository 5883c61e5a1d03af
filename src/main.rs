mod config;
mod errors;
mod identity;
mod ledger;
mod models;
mod recorder;
mod server;
mod state;
mod store;

use crate::identity::keys::KeyStore;
use crate::identity::token::TokenVerifier;
use crate::state::AppState;
use crate::store::StoreHandle;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("pricing_desk starting");

    // Load config
    let cfg = match config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    // Init database
    let conn = match store::open_db(&cfg.data_dir) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("database init error: {e}");
            std::process::exit(1);
        }
    };

    // ── Spawn tasks ──

    // 1. Store task (owns the only DB connection)
    let store = StoreHandle::spawn(conn);

    // 2. Identity keys: pinned PEM key, or the provider key set kept fresh in the background
    let keys = match &cfg.identity_public_key_path {
        Some(path) => match KeyStore::from_pem_file(path) {
            Ok(k) => Arc::new(k),
            Err(e) => {
                tracing::error!("identity key error: {e}");
                std::process::exit(1);
            }
        },
        None => {
            let keys = Arc::new(KeyStore::empty());
            let refresh_keys = keys.clone();
            let url = cfg.identity_jwks_url.clone();
            let every = cfg.key_refresh_secs;
            tokio::spawn(async move {
                identity::keys::run_key_refresh(refresh_keys, url, every).await;
            });
            keys
        }
    };
    tracing::info!(keys = keys.key_count(), "identity verifier ready");

    let verifier = TokenVerifier::new(keys, &cfg.firebase_project_id, &cfg.token_issuer());
    let app_state = AppState::new(store, Arc::new(verifier));

    // 3. Axum HTTP server
    let app = server::build_router(app_state);

    let addr = format!("0.0.0.0:{}", cfg.server_port);
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
    }
}
