use crate::errors::{AppError, AppResult};
use crate::store::{self, StoreHandle};
use rusqlite::Connection;

/// Starting balance of every new user document.
pub const DEFAULT_TOKENS: i64 = 100;

/// Per-user token balances. Lazy creation uses the store's conditional
/// insert, so racing initializations grant the default exactly once.
#[derive(Clone)]
pub struct Ledger {
    store: StoreHandle,
}

impl Ledger {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    pub async fn get_balance(&self, uid: &str) -> AppResult<i64> {
        let uid = uid.to_string();
        self.store.call(move |conn| balance_or_init(conn, &uid)).await
    }

    /// Unconditional overwrite. Not safe as a read-modify-write on its own;
    /// deductions go through `Recorder::save`.
    pub async fn set_balance(&self, uid: &str, tokens: i64) -> AppResult<()> {
        if tokens < 0 {
            return Err(AppError::InvalidInput(format!("token balance cannot be negative: {tokens}")));
        }
        let uid = uid.to_string();
        self.store.call(move |conn| write_balance(conn, &uid, tokens)).await
    }

    /// Sign-in hook: create the user document with the default balance, or
    /// refresh the email of an existing one. Never resets a balance.
    pub async fn ensure_profile(&self, uid: &str, email: Option<&str>) -> AppResult<i64> {
        let uid = uid.to_string();
        let email = email.map(str::to_string);
        self.store
            .transaction(move |tx| {
                let now = store::timestamp_now();
                let created = store::insert_user_if_absent(tx, &uid, email.as_deref(), DEFAULT_TOKENS, &now)?;
                if created {
                    tracing::info!(uid = %uid, tokens = DEFAULT_TOKENS, "user profile created");
                } else if let Some(email) = email.as_deref() {
                    store::update_email(tx, &uid, email)?;
                }
                balance_or_init(tx, &uid)
            })
            .await
    }
}

/// Read the balance, creating the user document with `DEFAULT_TOKENS` first
/// if it does not exist. Usable inside a store transaction.
pub fn balance_or_init(conn: &Connection, uid: &str) -> AppResult<i64> {
    let now = store::timestamp_now();
    if store::insert_user_if_absent(conn, uid, None, DEFAULT_TOKENS, &now)? {
        tracing::info!(uid = %uid, tokens = DEFAULT_TOKENS, "initialized token balance");
    }
    store::get_user(conn, uid)?
        .map(|u| u.tokens)
        .ok_or_else(|| AppError::Storage(format!("user document vanished: {uid}")))
}

pub fn write_balance(conn: &Connection, uid: &str, tokens: i64) -> AppResult<()> {
    if store::update_tokens(conn, uid, tokens)? {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("User not found: {uid}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (Ledger, StoreHandle) {
        let store = StoreHandle::spawn(store::open_in_memory().unwrap());
        (Ledger::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_unseen_user_starts_at_default_and_persists() {
        let (ledger, store) = ledger();
        assert_eq!(ledger.get_balance("alice").await.unwrap(), 100);
        assert_eq!(ledger.get_balance("alice").await.unwrap(), 100);

        let user = store.call(|c| store::get_user(c, "alice")).await.unwrap().unwrap();
        assert_eq!(user.tokens, 100);
        assert!(user.created_at.ends_with('Z'), "{}", user.created_at);
    }

    #[tokio::test]
    async fn test_lazy_init_does_not_overwrite_spent_balance() {
        let (ledger, _) = ledger();
        ledger.get_balance("alice").await.unwrap();
        ledger.set_balance("alice", 3).await.unwrap();
        assert_eq!(ledger.get_balance("alice").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_lazy_init_grants_once() {
        let (ledger, _) = ledger();
        let (a, b, c) = tokio::join!(
            ledger.get_balance("bob"),
            ledger.get_balance("bob"),
            ledger.get_balance("bob"),
        );
        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (100, 100, 100));
        ledger.set_balance("bob", 42).await.unwrap();
        assert_eq!(ledger.get_balance("bob").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_set_balance_rejects_negative() {
        let (ledger, _) = ledger();
        ledger.get_balance("alice").await.unwrap();
        let err = ledger.set_balance("alice", -1).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(ledger.get_balance("alice").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_set_balance_on_unknown_user() {
        let (ledger, _) = ledger();
        let err = ledger.set_balance("ghost", 10).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ensure_profile_keeps_existing_balance() {
        let (ledger, store) = ledger();
        assert_eq!(ledger.ensure_profile("carol", Some("c@example.com")).await.unwrap(), 100);
        ledger.set_balance("carol", 12).await.unwrap();

        assert_eq!(ledger.ensure_profile("carol", Some("new@example.com")).await.unwrap(), 12);
        let user = store.call(|c| store::get_user(c, "carol")).await.unwrap().unwrap();
        assert_eq!(user.email.as_deref(), Some("new@example.com"));
    }
}
