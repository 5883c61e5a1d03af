use crate::errors::{AppError, AppResult};
use crate::ledger;
use crate::models::{InputSnapshot, PricingInputs};
use crate::store::{self, CalculationPatch, CalculationRecord, NewCalculation, StoreHandle};

/// Metered persistence of calculations.
///
/// `save` runs the whole check-and-deduct as one store transaction: read (or
/// lazily create) the balance, refuse at zero, insert the record, write the
/// decremented balance. Two concurrent saves against a balance of 1 cannot
/// both succeed, and a record never exists without its deduction.
#[derive(Clone)]
pub struct Recorder {
    store: StoreHandle,
}

impl Recorder {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    pub async fn save(&self, uid: &str, inputs: &PricingInputs, option_price: f64) -> AppResult<CalculationRecord> {
        let calc = NewCalculation {
            user_id: uid.to_string(),
            date: store::timestamp_now(),
            option_price,
            inputs: InputSnapshot::from(inputs),
        };

        let result = self
            .store
            .transaction(move |tx| {
                let tokens = ledger::balance_or_init(tx, &calc.user_id)?;
                if tokens <= 0 {
                    return Err(AppError::InsufficientCredit);
                }
                let uid = calc.user_id.clone();
                let record = store::insert_calculation(tx, calc)?;
                ledger::write_balance(tx, &uid, tokens - 1)?;
                Ok((record, tokens - 1))
            })
            .await;

        match result {
            Ok((record, remaining)) => {
                tracing::info!(
                    uid = %record.user_id,
                    calculation_id = %record.id,
                    option_price = record.option_price,
                    tokens = remaining,
                    "calculation saved"
                );
                Ok(record)
            }
            Err(AppError::InsufficientCredit) => {
                tracing::warn!(uid = %uid, "calculation refused: no tokens left");
                Err(AppError::InsufficientCredit)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list(&self, uid: &str) -> AppResult<Vec<CalculationRecord>> {
        let uid = uid.to_string();
        self.store.call(move |conn| store::query_calculations(conn, &uid)).await
    }

    pub async fn get(&self, uid: &str, id: &str) -> AppResult<CalculationRecord> {
        let (uid, id) = (uid.to_string(), id.to_string());
        self.store
            .call(move |conn| store::get_calculation(conn, &uid, &id)?.ok_or_else(|| not_found(&id)))
            .await
    }

    /// Apply a partial update. The ledger is not touched.
    pub async fn update(&self, uid: &str, id: &str, patch: CalculationPatch) -> AppResult<CalculationRecord> {
        let (uid, id) = (uid.to_string(), id.to_string());
        self.store
            .transaction(move |tx| {
                let mut record = store::get_calculation(tx, &uid, &id)?.ok_or_else(|| not_found(&id))?;
                record.apply(patch);
                store::update_calculation(tx, &record)?;
                Ok(record)
            })
            .await
    }

    /// Delete one record. Tokens spent on it are not refunded.
    pub async fn delete(&self, uid: &str, id: &str) -> AppResult<()> {
        let (uid, id) = (uid.to_string(), id.to_string());
        self.store
            .call(move |conn| {
                if store::delete_calculation(conn, &uid, &id)? {
                    tracing::info!(uid = %uid, calculation_id = %id, "calculation deleted");
                    Ok(())
                } else {
                    Err(not_found(&id))
                }
            })
            .await
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Calculation not found: {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::models::Percentage;

    fn setup() -> (Recorder, Ledger) {
        let store = StoreHandle::spawn(store::open_in_memory().unwrap());
        (Recorder::new(store.clone()), Ledger::new(store))
    }

    fn inputs() -> PricingInputs {
        PricingInputs {
            stock_price: 100.0,
            strike_price: 100.0,
            interest_rate: Percentage::new(5.0),
            time_to_expiration: 1.0,
            volatility: Percentage::new(20.0),
        }
    }

    #[tokio::test]
    async fn test_save_deducts_one_token() {
        let (recorder, ledger) = setup();
        let p = inputs();
        let record = recorder.save("alice", &p, p.price()).await.unwrap();

        assert_eq!(record.user_id, "alice");
        assert!((record.option_price - 10.4506).abs() < 0.01);
        assert_eq!(record.inputs.volatility, 20.0);
        assert_eq!(ledger.get_balance("alice").await.unwrap(), 99);
        assert_eq!(recorder.list("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_last_token_then_refusal() {
        let (recorder, ledger) = setup();
        ledger.get_balance("alice").await.unwrap();
        ledger.set_balance("alice", 1).await.unwrap();

        recorder.save("alice", &inputs(), 10.45).await.unwrap();
        assert_eq!(ledger.get_balance("alice").await.unwrap(), 0);

        let err = recorder.save("alice", &inputs(), 10.45).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientCredit));
        assert_eq!(recorder.list("alice").await.unwrap().len(), 1);
        assert_eq!(ledger.get_balance("alice").await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_cannot_overdraw() {
        let (recorder, ledger) = setup();
        ledger.get_balance("alice").await.unwrap();
        ledger.set_balance("alice", 1).await.unwrap();

        let p = inputs();
        let r1 = recorder.clone();
        let r2 = recorder.clone();
        let a = tokio::spawn(async move { r1.save("alice", &p, 10.45).await });
        let b = tokio::spawn(async move { r2.save("alice", &p, 10.45).await });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::InsufficientCredit)))
            .count();
        assert_eq!((ok, refused), (1, 1));
        assert_eq!(ledger.get_balance("alice").await.unwrap(), 0);
        assert_eq!(recorder.list("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let (recorder, _) = setup();
        let first = recorder.save("alice", &inputs(), 1.0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = recorder.save("alice", &inputs(), 2.0).await.unwrap();

        let ids: Vec<_> = recorder.list("alice").await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_get_is_scoped_to_owner() {
        let (recorder, _) = setup();
        let record = recorder.save("alice", &inputs(), 10.45).await.unwrap();

        assert_eq!(recorder.get("alice", &record.id).await.unwrap(), record);
        assert!(matches!(recorder.get("bob", &record.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(recorder.get("alice", "missing").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_leaves_ledger_alone() {
        let (recorder, ledger) = setup();
        let record = recorder.save("alice", &inputs(), 10.45).await.unwrap();

        let patch = CalculationPatch { option_price: Some(12.0), ..Default::default() };
        let updated = recorder.update("alice", &record.id, patch).await.unwrap();
        assert_eq!(updated.option_price, 12.0);
        assert_eq!(recorder.get("alice", &record.id).await.unwrap().option_price, 12.0);
        assert_eq!(ledger.get_balance("alice").await.unwrap(), 99);

        let miss = recorder.update("alice", "missing", CalculationPatch::default()).await;
        assert!(matches!(miss, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_does_not_refund() {
        let (recorder, ledger) = setup();
        let record = recorder.save("alice", &inputs(), 10.45).await.unwrap();

        recorder.delete("alice", &record.id).await.unwrap();
        assert!(recorder.list("alice").await.unwrap().is_empty());
        assert_eq!(ledger.get_balance("alice").await.unwrap(), 99);
        assert!(matches!(recorder.delete("alice", &record.id).await, Err(AppError::NotFound(_))));
    }
}
