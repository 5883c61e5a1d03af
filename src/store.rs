use crate::errors::{AppError, AppResult};
use crate::models::InputSnapshot;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

const STORE_QUEUE: usize = 1024;

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

pub fn open_db(data_dir: &Path) -> AppResult<Connection> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| AppError::Storage(format!("create dir: {e}")))?;
    let db_path = data_dir.join("pricing_desk.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA cache_size=-64000;")?;
    migrate(&conn)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> AppResult<Connection> {
    let conn = Connection::open_in_memory()?;
    migrate(&conn)?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> AppResult<()> {
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(include_str!("../migrations/001_init.sql"))?;
    Ok(())
}

/// Cloneable handle to the store task. The task owns the only connection, so
/// jobs run one at a time in submission order.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<Job>,
}

impl StoreHandle {
    pub fn spawn(conn: Connection) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(STORE_QUEUE);
        tokio::spawn(run_store(conn, rx));
        Self { tx }
    }

    /// Run `f` against the connection outside any transaction.
    pub async fn call<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&Connection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(move |conn| f(conn)).await
    }

    /// Run `f` inside an IMMEDIATE transaction. Commits on `Ok`; any `Err`
    /// drops the transaction, which rolls back every write `f` made.
    pub async fn transaction<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await
    }

    async fn submit<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut Connection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn: &mut Connection| {
            let _ = reply_tx.send(f(conn));
        });
        self.tx.send(job).await.map_err(|_| store_stopped())?;
        reply_rx.await.map_err(|_| store_stopped())?
    }
}

fn store_stopped() -> AppError {
    AppError::Storage("store task stopped".into())
}

/// Dedicated store task. This is the ONLY task that touches the connection.
async fn run_store(mut conn: Connection, mut rx: mpsc::Receiver<Job>) {
    tracing::info!("store task started");

    while let Some(job) = rx.recv().await {
        job(&mut conn);
    }

    tracing::info!("store task shutting down");
}

// ── Documents ──

/// Document timestamp: UTC RFC 3339, millisecond precision, `Z` suffix.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    pub uid: String,
    pub email: Option<String>,
    pub tokens: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationRecord {
    pub id: String,
    pub user_id: String,
    pub date: String,
    pub option_price: f64,
    pub inputs: InputSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCalculation {
    pub user_id: String,
    pub date: String,
    pub option_price: f64,
    pub inputs: InputSnapshot,
}

/// Partial update of a calculation record. Absent fields are left as stored.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CalculationPatch {
    pub date: Option<String>,
    pub option_price: Option<f64>,
    pub inputs: Option<InputsPatch>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InputsPatch {
    pub stock_price: Option<f64>,
    pub strike_price: Option<f64>,
    pub interest_rate: Option<f64>,
    pub time_to_expiration: Option<f64>,
    pub volatility: Option<f64>,
}

impl CalculationRecord {
    pub fn apply(&mut self, patch: CalculationPatch) {
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(price) = patch.option_price {
            self.option_price = price;
        }
        if let Some(p) = patch.inputs {
            let i = &mut self.inputs;
            i.stock_price = p.stock_price.unwrap_or(i.stock_price);
            i.strike_price = p.strike_price.unwrap_or(i.strike_price);
            i.interest_rate = p.interest_rate.unwrap_or(i.interest_rate);
            i.time_to_expiration = p.time_to_expiration.unwrap_or(i.time_to_expiration);
            i.volatility = p.volatility.unwrap_or(i.volatility);
        }
    }
}

// ── User documents ──

pub fn get_user(conn: &Connection, uid: &str) -> AppResult<Option<UserDoc>> {
    let user = conn
        .query_row(
            "SELECT uid, email, tokens, created_at FROM users WHERE uid = ?1",
            rusqlite::params![uid],
            |row| {
                Ok(UserDoc {
                    uid: row.get(0)?,
                    email: row.get(1)?,
                    tokens: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

/// Create the user document unless one already exists. Returns whether a
/// document was created; an existing document is never touched.
pub fn insert_user_if_absent(
    conn: &Connection,
    uid: &str,
    email: Option<&str>,
    tokens: i64,
    created_at: &str,
) -> AppResult<bool> {
    let n = conn.execute(
        "INSERT INTO users (uid, email, tokens, created_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(uid) DO NOTHING",
        rusqlite::params![uid, email, tokens, created_at],
    )?;
    Ok(n == 1)
}

/// Unconditional overwrite. Returns false if the user has no document.
pub fn update_tokens(conn: &Connection, uid: &str, tokens: i64) -> AppResult<bool> {
    let n = conn.execute(
        "UPDATE users SET tokens = ?1 WHERE uid = ?2",
        rusqlite::params![tokens, uid],
    )?;
    Ok(n == 1)
}

pub fn update_email(conn: &Connection, uid: &str, email: &str) -> AppResult<bool> {
    let n = conn.execute(
        "UPDATE users SET email = ?1 WHERE uid = ?2",
        rusqlite::params![email, uid],
    )?;
    Ok(n == 1)
}

// ── Calculation documents ──

const CALC_COLUMNS: &str = "id, user_id, date, option_price, stock_price, strike_price, interest_rate, time_to_expiration, volatility";

fn calculation_from_row(row: &Row<'_>) -> rusqlite::Result<CalculationRecord> {
    Ok(CalculationRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        date: row.get(2)?,
        option_price: row.get(3)?,
        inputs: InputSnapshot {
            stock_price: row.get(4)?,
            strike_price: row.get(5)?,
            interest_rate: row.get(6)?,
            time_to_expiration: row.get(7)?,
            volatility: row.get(8)?,
        },
    })
}

/// Insert under the owner with a store-generated id.
pub fn insert_calculation(conn: &Connection, calc: NewCalculation) -> AppResult<CalculationRecord> {
    let id = uuid::Uuid::new_v4().to_string();
    let i = &calc.inputs;
    conn.execute(
        &format!("INSERT INTO calculations ({CALC_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
        rusqlite::params![
            id,
            calc.user_id,
            calc.date,
            calc.option_price,
            i.stock_price,
            i.strike_price,
            i.interest_rate,
            i.time_to_expiration,
            i.volatility
        ],
    )?;
    Ok(CalculationRecord {
        id,
        user_id: calc.user_id,
        date: calc.date,
        option_price: calc.option_price,
        inputs: calc.inputs,
    })
}

/// All of a user's calculations, most recent first.
pub fn query_calculations(conn: &Connection, uid: &str) -> AppResult<Vec<CalculationRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CALC_COLUMNS} FROM calculations WHERE user_id = ?1 ORDER BY date DESC, rowid DESC"
    ))?;
    let rows = stmt.query_map(rusqlite::params![uid], calculation_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_calculation(conn: &Connection, uid: &str, id: &str) -> AppResult<Option<CalculationRecord>> {
    let calc = conn
        .query_row(
            &format!("SELECT {CALC_COLUMNS} FROM calculations WHERE user_id = ?1 AND id = ?2"),
            rusqlite::params![uid, id],
            calculation_from_row,
        )
        .optional()?;
    Ok(calc)
}

/// Overwrite the stored fields of an existing record. Returns false on miss.
pub fn update_calculation(conn: &Connection, calc: &CalculationRecord) -> AppResult<bool> {
    let i = &calc.inputs;
    let n = conn.execute(
        "UPDATE calculations SET date = ?3, option_price = ?4, stock_price = ?5, strike_price = ?6,
             interest_rate = ?7, time_to_expiration = ?8, volatility = ?9
         WHERE user_id = ?1 AND id = ?2",
        rusqlite::params![
            calc.user_id,
            calc.id,
            calc.date,
            calc.option_price,
            i.stock_price,
            i.strike_price,
            i.interest_rate,
            i.time_to_expiration,
            i.volatility
        ],
    )?;
    Ok(n == 1)
}

pub fn delete_calculation(conn: &Connection, uid: &str, id: &str) -> AppResult<bool> {
    let n = conn.execute(
        "DELETE FROM calculations WHERE user_id = ?1 AND id = ?2",
        rusqlite::params![uid, id],
    )?;
    Ok(n == 1)
}
