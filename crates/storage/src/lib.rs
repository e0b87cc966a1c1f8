use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use uuid::Uuid;

use loan_ledger_core::types::{Loan, LoanStats, LoanStatus};
use loan_ledger_core::validate::ValidLoanInput;

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle to operate on loan records.
    pub fn loans(&self) -> LoanRepository {
        LoanRepository {
            pool: self.pool.clone(),
        }
    }

    /// Runs a connectivity probe against the pool.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(())
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Transactional scope wrapping one logical operation's storage access.
///
/// Exactly one scope is opened per operation and it borrows at most one
/// pooled connection. Dropping the scope without calling [`Scope::commit`]
/// rolls the transaction back, so error returns and cancelled requests
/// cannot leave partial writes behind.
pub struct Scope {
    tx: Transaction<'static, Sqlite>,
}

impl Scope {
    /// Returns the transaction repository calls execute against.
    pub fn tx(&mut self) -> &mut Transaction<'static, Sqlite> {
        &mut self.tx
    }

    /// Commits the scope, making its writes visible to other operations.
    pub async fn commit(self) -> Result<(), StorageError> {
        self.tx.commit().await.map_err(StorageError::Database)
    }

    /// Rolls the scope back explicitly.
    pub async fn rollback(self) -> Result<(), StorageError> {
        self.tx.rollback().await.map_err(StorageError::Database)
    }
}

/// Repository owning every read and write against the `loans` table.
#[derive(Clone)]
pub struct LoanRepository {
    pool: SqlitePool,
}

impl LoanRepository {
    /// Opens the transactional scope an operation's repository calls run inside.
    pub async fn begin(&self) -> Result<Scope, StorageError> {
        let tx = self.pool.begin().await.map_err(StorageError::Database)?;
        Ok(Scope { tx })
    }

    /// Persists a validated loan, assigning its id and creation timestamp.
    ///
    /// The row is re-read inside the same transaction so server-assigned
    /// fields come back exactly as stored. Committing is the caller's
    /// scope's responsibility.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        input: &ValidLoanInput,
        now: DateTime<Utc>,
    ) -> Result<Loan, LoanRepositoryError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO loans \
             (id, borrower_id, amount, currency, term_months, interest_rate_apr, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(input.borrower_id.to_string())
        .bind(input.amount.to_string())
        .bind(&input.currency)
        .bind(i64::from(input.term_months))
        .bind(input.interest_rate_apr.map(|rate| rate.to_string()))
        .bind(LoanStatus::Pending.as_str())
        .bind(to_rfc3339(now))
        .execute(&mut **tx)
        .await?;

        self.fetch_by_id(tx, id)
            .await?
            .ok_or(LoanRepositoryError::Database(sqlx::Error::RowNotFound))
    }

    /// Looks a loan up by primary key; absence is `None`, not an error.
    pub async fn fetch_by_id(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: Uuid,
    ) -> Result<Option<Loan>, LoanRepositoryError> {
        let row = sqlx::query_as::<_, LoanRow>(
            "SELECT id, borrower_id, amount, currency, term_months, interest_rate_apr, status, created_at \
             FROM loans WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&mut **tx)
        .await?;

        row.map(LoanRow::into_domain).transpose()
    }

    /// Lists every loan, newest first, ties broken by insertion order.
    pub async fn list_all(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
    ) -> Result<Vec<Loan>, LoanRepositoryError> {
        let rows = sqlx::query_as::<_, LoanRow>(
            "SELECT id, borrower_id, amount, currency, term_months, interest_rate_apr, status, created_at \
             FROM loans ORDER BY created_at DESC, rowid DESC",
        )
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter().map(LoanRow::into_domain).collect()
    }

    /// Computes aggregate statistics over the full loan set.
    ///
    /// Four queries inside the caller's scope: the row count, every stored
    /// amount (summed in exact decimal here, since SQLite aggregates in
    /// floating point), and the two group-by breakdowns. The average divides
    /// in decimal as well; an empty ledger yields zero totals.
    pub async fn aggregate(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
    ) -> Result<LoanStats, LoanRepositoryError> {
        let total_loans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM loans")
            .fetch_one(&mut **tx)
            .await?;

        let amounts: Vec<String> = sqlx::query_scalar("SELECT amount FROM loans")
            .fetch_all(&mut **tx)
            .await?;
        let mut total_amount = Decimal::ZERO;
        for raw in &amounts {
            total_amount += parse_amount(raw)?;
        }
        let avg_amount = if total_loans > 0 {
            total_amount / Decimal::from(total_loans)
        } else {
            Decimal::ZERO
        };

        let by_status = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM loans GROUP BY status",
        )
        .fetch_all(&mut **tx)
        .await?;
        let by_currency = sqlx::query_as::<_, (String, i64)>(
            "SELECT currency, COUNT(*) FROM loans GROUP BY currency",
        )
        .fetch_all(&mut **tx)
        .await?;

        Ok(LoanStats {
            total_loans: total_loans as u64,
            total_amount,
            avg_amount,
            by_status: by_status
                .into_iter()
                .map(|(status, count)| (status, count as u64))
                .collect(),
            by_currency: by_currency
                .into_iter()
                .map(|(currency, count)| (currency, count as u64))
                .collect(),
        })
    }
}

/// Errors that can occur while reading or writing loan rows.
#[derive(Debug, Error)]
pub enum LoanRepositoryError {
    #[error("failed to decode stored id: {0}")]
    DecodeId(uuid::Error),
    #[error("failed to decode stored amount: {0}")]
    DecodeAmount(rust_decimal::Error),
    #[error("unknown stored status: {0}")]
    DecodeStatus(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Row shape of the `loans` table before domain conversion.
#[derive(Debug, sqlx::FromRow)]
struct LoanRow {
    id: String,
    borrower_id: String,
    amount: String,
    currency: String,
    term_months: i64,
    interest_rate_apr: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
}

impl LoanRow {
    /// Converts the database row into the domain entity.
    fn into_domain(self) -> Result<Loan, LoanRepositoryError> {
        let id = Uuid::parse_str(&self.id).map_err(LoanRepositoryError::DecodeId)?;
        let borrower_id =
            Uuid::parse_str(&self.borrower_id).map_err(LoanRepositoryError::DecodeId)?;
        let amount = parse_amount(&self.amount)?;
        let interest_rate_apr = self
            .interest_rate_apr
            .as_deref()
            .map(parse_amount)
            .transpose()?;
        let status = match self.status.as_str() {
            "pending" => LoanStatus::Pending,
            other => return Err(LoanRepositoryError::DecodeStatus(other.to_string())),
        };

        Ok(Loan {
            id,
            borrower_id,
            amount,
            currency: self.currency,
            term_months: self.term_months as u32,
            interest_rate_apr,
            status,
            created_at: self.created_at,
        })
    }
}

fn parse_amount(raw: &str) -> Result<Decimal, LoanRepositoryError> {
    Decimal::from_str(raw).map_err(LoanRepositoryError::DecodeAmount)
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    async fn setup_db() -> (Database, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("loans.db").display());
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");
        (db, dir)
    }

    fn input(amount: Decimal, currency: &str) -> ValidLoanInput {
        ValidLoanInput {
            borrower_id: Uuid::new_v4(),
            amount,
            currency: currency.to_string(),
            term_months: 12,
            interest_rate_apr: None,
        }
    }

    async fn create(db: &Database, amount: Decimal, currency: &str) -> Loan {
        let repo = db.loans();
        let mut scope = repo.begin().await.expect("begin");
        let loan = repo
            .insert(scope.tx(), &input(amount, currency), Utc::now())
            .await
            .expect("insert");
        scope.commit().await.expect("commit");
        loan
    }

    #[tokio::test]
    async fn migrations_create_the_loans_table() {
        let (db, _dir) = setup_db().await;
        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'loans'",
        )
        .fetch_one(db.pool())
        .await
        .expect("fetch tables");
        assert_eq!(tables.0, 1);
    }

    #[tokio::test]
    async fn insert_assigns_server_fields_and_round_trips() {
        let (db, _dir) = setup_db().await;
        let created = create(&db, dec!(1250.50), "USD").await;
        assert_eq!(created.status, LoanStatus::Pending);
        assert_eq!(created.amount, dec!(1250.50));

        let repo = db.loans();
        let mut scope = repo.begin().await.expect("begin");
        let fetched = repo
            .fetch_by_id(scope.tx(), created.id)
            .await
            .expect("fetch")
            .expect("loan should exist");
        scope.commit().await.expect("commit");

        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn interest_rate_survives_storage_exactly() {
        let (db, _dir) = setup_db().await;
        let repo = db.loans();
        let mut record = input(dec!(99.99), "GBP");
        record.interest_rate_apr = Some(dec!(4.75));

        let mut scope = repo.begin().await.expect("begin");
        let loan = repo
            .insert(scope.tx(), &record, Utc::now())
            .await
            .expect("insert");
        scope.commit().await.expect("commit");

        assert_eq!(loan.interest_rate_apr, Some(dec!(4.75)));
    }

    #[tokio::test]
    async fn fetch_by_id_returns_none_for_unknown_id() {
        let (db, _dir) = setup_db().await;
        let repo = db.loans();
        let mut scope = repo.begin().await.expect("begin");
        let missing = repo
            .fetch_by_id(scope.tx(), Uuid::new_v4())
            .await
            .expect("fetch");
        scope.commit().await.expect("commit");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn list_all_orders_newest_first() {
        let (db, _dir) = setup_db().await;
        let a = create(&db, dec!(100.00), "USD").await;
        let b = create(&db, dec!(200.00), "USD").await;
        let c = create(&db, dec!(50.00), "EUR").await;

        let repo = db.loans();
        let mut scope = repo.begin().await.expect("begin");
        let loans = repo.list_all(scope.tx()).await.expect("list");
        scope.commit().await.expect("commit");

        let ids: Vec<_> = loans.iter().map(|loan| loan.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
    }

    #[tokio::test]
    async fn dropping_a_scope_rolls_back() {
        let (db, _dir) = setup_db().await;
        let repo = db.loans();
        {
            let mut scope = repo.begin().await.expect("begin");
            repo.insert(scope.tx(), &input(dec!(10.00), "USD"), Utc::now())
                .await
                .expect("insert");
        }

        let mut scope = repo.begin().await.expect("begin");
        let loans = repo.list_all(scope.tx()).await.expect("list");
        scope.commit().await.expect("commit");
        assert!(loans.is_empty());
    }

    #[tokio::test]
    async fn aggregate_on_an_empty_ledger_is_all_zero() {
        let (db, _dir) = setup_db().await;
        let repo = db.loans();
        let mut scope = repo.begin().await.expect("begin");
        let stats = repo.aggregate(scope.tx()).await.expect("aggregate");
        scope.commit().await.expect("commit");

        assert_eq!(stats.total_loans, 0);
        assert_eq!(stats.total_amount, Decimal::ZERO);
        assert_eq!(stats.avg_amount, Decimal::ZERO);
        assert!(stats.by_status.is_empty());
        assert!(stats.by_currency.is_empty());
    }

    #[tokio::test]
    async fn aggregate_sums_in_exact_decimal() {
        let (db, _dir) = setup_db().await;
        create(&db, dec!(100.00), "USD").await;
        create(&db, dec!(200.00), "USD").await;
        create(&db, dec!(50.00), "EUR").await;

        let repo = db.loans();
        let mut scope = repo.begin().await.expect("begin");
        let stats = repo.aggregate(scope.tx()).await.expect("aggregate");
        scope.commit().await.expect("commit");

        assert_eq!(stats.total_loans, 3);
        assert_eq!(stats.total_amount, dec!(350.00));
        assert_eq!(stats.avg_amount.round_dp(2), dec!(116.67));
        assert_eq!(stats.by_currency.get("USD"), Some(&2));
        assert_eq!(stats.by_currency.get("EUR"), Some(&1));
        assert_eq!(stats.by_status.get("pending"), Some(&3));
    }
}
