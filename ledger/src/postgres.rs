//! PostgreSQL ledger store.
//!
//! Each [`PgUnit`] wraps one database transaction. Exclusive access is
//! `SELECT ... FOR NO KEY UPDATE`: it blocks other exclusive readers and
//! balance updates of the row, but not the `KEY SHARE` locks taken by the
//! foreign-key checks when entries and transfers referencing the account are
//! inserted. A plain `FOR UPDATE` would conflict with those and deadlock two
//! transfers that inserted their records before locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{debug, info, instrument};

use simplebank_common::{
    AccountId, Currency, EntryId, LedgerError, MinorUnits, Result, TransferId,
};

use crate::account::{Account, NewAccount};
use crate::config::StoreConfig;
use crate::journal::Entry;
use crate::store::{LedgerStore, LedgerUnit, Page, TransferFilter, UnitOptions};
use crate::transfer::{check_transfer_shape, Transfer};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: i64,
    owner: String,
    balance: i64,
    currency: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = LedgerError;

    fn try_from(row: AccountRow) -> Result<Self> {
        Ok(Account {
            id: AccountId::new(row.id),
            owner: row.owner,
            balance: row.balance,
            currency: Currency::parse(&row.currency)?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: i64,
    account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Entry {
            id: EntryId::new(row.id),
            account_id: AccountId::new(row.account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TransferRow {
    id: i64,
    from_account_id: i64,
    to_account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Transfer {
            id: TransferId::new(row.id),
            from_account_id: AccountId::new(row.from_account_id),
            to_account_id: AccountId::new(row.to_account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

/// Map a database error onto the ledger taxonomy by SQLSTATE.
fn db_error(err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            // foreign_key_violation, check_violation, numeric_value_out_of_range
            Some("23503") | Some("23514") | Some("22003") => {
                return LedgerError::ConstraintViolation(db.message().to_string());
            }
            // lock_not_available, query_canceled
            Some("55P03") | Some("57014") => {
                return LedgerError::Canceled(db.message().to_string());
            }
            _ => {}
        }
    }
    LedgerError::StorageFailure(err.to_string())
}

/// Like [`db_error`], but a foreign-key violation on insert means the
/// referenced account is missing.
fn insert_error(err: sqlx::Error, missing: impl FnOnce(Option<&str>) -> AccountId) -> LedgerError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23503") {
            return LedgerError::account_not_found(missing(db.constraint()));
        }
    }
    db_error(err)
}

fn page_bounds(page: Page) -> (i64, i64) {
    (i64::from(page.limit), i64::from(page.offset))
}

/// Ledger store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect using the store configuration, running migrations if enabled.
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(db_error)?;

        let store = Self::from_pool(pool);
        if config.run_migrations {
            store.migrate().await?;
        }

        info!("Connected to PostgreSQL ledger store");
        Ok(store)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::StorageFailure(format!("migration failed: {}", e)))
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Unit = PgUnit;

    async fn begin(&self, options: &UnitOptions) -> Result<PgUnit> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let isolation = format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            options.isolation.as_sql()
        );
        sqlx::query(&isolation)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        if let Some(limit) = options.lock_wait_limit() {
            // lock_timeout = 0 disables the timeout, so never go below 1ms.
            let millis = limit.as_millis().max(1);
            let statement = format!("SET LOCAL lock_timeout = {}", millis);
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        Ok(PgUnit {
            tx,
            correlation_id: options.correlation_id.clone(),
        })
    }

    async fn create_account(&self, params: NewAccount) -> Result<Account> {
        params.validate()?;

        let sql = format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) RETURNING {}",
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(&params.owner)
            .bind(params.balance)
            .bind(params.currency.code())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        let account = Account::try_from(row)?;
        debug!(account_id = %account.id, currency = %account.currency, "Account created");
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| LedgerError::account_not_found(id))?
            .try_into()
    }

    async fn list_accounts(&self, page: Page) -> Result<Vec<Account>> {
        let (limit, offset) = page_bounds(page);
        let sql = format!(
            "SELECT {} FROM accounts ORDER BY id LIMIT $1 OFFSET $2",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    async fn delete_account(&self, id: AccountId) -> Result<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::account_not_found(id));
        }
        debug!(account_id = %id, "Account deleted");
        Ok(())
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        let sql = format!("SELECT {} FROM entries WHERE id = $1", ENTRY_COLUMNS);
        sqlx::query_as::<_, EntryRow>(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(Entry::from)
            .ok_or(LedgerError::NotFound {
                entity: "entry",
                id: id.get(),
            })
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        let (limit, offset) = page_bounds(page);
        let sql = format!(
            "SELECT {} FROM entries WHERE account_id = $1 ORDER BY id LIMIT $2 OFFSET $3",
            ENTRY_COLUMNS
        );
        Ok(sqlx::query_as::<_, EntryRow>(&sql)
            .bind(account_id.get())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(Entry::from)
            .collect())
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        let sql = format!("SELECT {} FROM transfers WHERE id = $1", TRANSFER_COLUMNS);
        sqlx::query_as::<_, TransferRow>(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(Transfer::from)
            .ok_or(LedgerError::NotFound {
                entity: "transfer",
                id: id.get(),
            })
    }

    async fn list_transfers(&self, filter: TransferFilter, page: Page) -> Result<Vec<Transfer>> {
        let (limit, offset) = page_bounds(page);
        let all = filter.from_account_id.is_none() && filter.to_account_id.is_none();
        let sql = format!(
            "SELECT {} FROM transfers \
             WHERE $1 OR from_account_id = $2 OR to_account_id = $3 \
             ORDER BY id LIMIT $4 OFFSET $5",
            TRANSFER_COLUMNS
        );
        Ok(sqlx::query_as::<_, TransferRow>(&sql)
            .bind(all)
            .bind(filter.from_account_id.map(|id| id.get()))
            .bind(filter.to_account_id.map(|id| id.get()))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(Transfer::from)
            .collect())
    }

    async fn total_balance(&self, currency: Currency) -> Result<i128> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(balance), 0)::BIGINT FROM accounts WHERE currency = $1",
        )
        .bind(currency.code())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(i128::from(total))
    }
}

/// Open database transaction.
pub struct PgUnit {
    tx: Transaction<'static, Postgres>,
    correlation_id: Option<String>,
}

impl PgUnit {
    fn correlation(&self) -> &str {
        self.correlation_id.as_deref().unwrap_or("-")
    }
}

#[async_trait]
impl LedgerUnit for PgUnit {
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE id = $1 LIMIT 1 FOR NO KEY UPDATE",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| LedgerError::account_not_found(id))?
            .try_into()
    }

    async fn apply_balance_delta(&mut self, id: AccountId, delta: MinorUnits) -> Result<Account> {
        let sql = format!(
            "UPDATE accounts SET balance = balance + $2 WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id.get())
            .bind(delta)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| LedgerError::account_not_found(id))?
            .try_into()
    }

    async fn create_entry(&mut self, account_id: AccountId, amount: MinorUnits) -> Result<Entry> {
        let sql = format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {}",
            ENTRY_COLUMNS
        );
        let row = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(account_id.get())
            .bind(amount)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| insert_error(e, |_| account_id))?;
        Ok(row.into())
    }

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: MinorUnits,
    ) -> Result<Transfer> {
        check_transfer_shape(from_account_id, to_account_id, amount)?;

        let sql = format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) \
             VALUES ($1, $2, $3) RETURNING {}",
            TRANSFER_COLUMNS
        );
        let row = sqlx::query_as::<_, TransferRow>(&sql)
            .bind(from_account_id.get())
            .bind(to_account_id.get())
            .bind(amount)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| {
                insert_error(e, |constraint| match constraint {
                    Some(name) if name.contains("to_account") => to_account_id,
                    _ => from_account_id,
                })
            })?;
        Ok(row.into())
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| LedgerError::account_not_found(id))?
            .try_into()
    }

    async fn commit(self) -> Result<()> {
        let correlation_id = self.correlation().to_string();
        self.tx
            .commit()
            .await
            .map_err(|e| LedgerError::StorageFailure(format!("commit failed: {}", e)))?;
        debug!(correlation_id = %correlation_id, "Unit committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        let correlation_id = self.correlation().to_string();
        self.tx.rollback().await.map_err(db_error)?;
        debug!(correlation_id = %correlation_id, "Unit rolled back");
        Ok(())
    }
}
