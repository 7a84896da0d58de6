//! DuckDB repository implementation

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use duckdb::{params, params_from_iter, Connection};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, BatchStatus, Category, CategoryRule, ImportBatch, RawRecord, RawTransactionRow,
    RowStatus, StatementFormat, Transaction,
};
use crate::ports::{
    AccountRegistry, BatchFilter, BatchRepository, CategoryRegistry, LedgerRepository,
    Pagination, RuleRepository,
};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
        || lower.contains("could not set lock on file")
}

const BATCH_COLUMNS: &str = "batch_id, user_id, account_id, file_name, statement_format, profile,
    file_sha256, status, error_message, row_count, processed_count, created_at, updated_at";

const ROW_COLUMNS: &str = "row_id, batch_id, row_number, raw_data, normalized_data, status,
    error_message, transaction_id, created_at, updated_at";

const RULE_COLUMNS: &str = "rule_id, user_id, category_id, field, match_type, pattern,
    is_active, priority, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "transaction_id, user_id, account_id, linked_account_id,
    import_batch_id, raw_row_id, transaction_date::VARCHAR, transaction_time::VARCHAR,
    posted_date::VARCHAR, amount::VARCHAR, direction, currency, transaction_type, category_id,
    merchant, description, notes, status, tags, CAST(metadata AS VARCHAR), created_at";

/// DuckDB-backed store implementing every import port
///
/// A single connection guarded by a mutex; statements run synchronously
/// inside the async port methods.
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbRepository {
    /// Open (or create) the database file
    ///
    /// Opening is retried with exponential backoff when another process holds
    /// the file lock.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = attempt + 1,
                            max = MAX_RETRIES,
                            error = %err_msg,
                            "database busy, retrying"
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::database(format!("Failed to open database after {} retries", MAX_RETRIES))
        }))
    }

    /// Private in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading stays off; JSON is linked in through the
        // crate feature.
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::database("database connection lock poisoned"))
    }

    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.lock()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        let result = self.run_migrations()?;
        if !result.applied.is_empty() {
            tracing::info!(applied = ?result.applied, "database migrated");
        }
        Ok(())
    }

    fn insert_row_on(conn: &Connection, row: &RawTransactionRow) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO import_rows ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                ROW_COLUMNS
            ),
            params![
                row.id.to_string(),
                row.batch_id.to_string(),
                row.row_number as i64,
                serde_json::to_string(&row.raw)?,
                row.normalized.as_ref().map(serde_json::to_string).transpose()?,
                row.status.as_str(),
                row.error_message,
                row.transaction_id.map(|id| id.to_string()),
                timestamp(&row.created_at),
                timestamp(&row.updated_at),
            ],
        )?;
        Ok(())
    }

    fn update_row_on(conn: &Connection, row: &RawTransactionRow) -> Result<usize> {
        let changed = conn.execute(
            "UPDATE import_rows
             SET normalized_data = ?, status = ?, error_message = ?, transaction_id = ?, updated_at = ?
             WHERE row_id = ?",
            params![
                row.normalized.as_ref().map(serde_json::to_string).transpose()?,
                row.status.as_str(),
                row.error_message,
                row.transaction_id.map(|id| id.to_string()),
                timestamp(&row.updated_at),
                row.id.to_string(),
            ],
        )?;
        Ok(changed)
    }
}

#[async_trait]
impl BatchRepository for DuckDbRepository {
    async fn insert_batch(&self, batch: &ImportBatch) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO import_batches ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                BATCH_COLUMNS
            ),
            params![
                batch.id.to_string(),
                batch.user_id,
                batch.account_id.to_string(),
                batch.file_name,
                batch.statement_format.map(|f| f.as_str()),
                batch.profile,
                batch.file_sha256,
                batch.status.as_str(),
                batch.error_message,
                batch.row_count as i64,
                batch.processed_count as i64,
                timestamp(&batch.created_at),
                timestamp(&batch.updated_at),
            ],
        )?;
        Ok(())
    }

    async fn update_batch(&self, batch: &ImportBatch) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE import_batches
             SET statement_format = ?, profile = ?, status = ?, error_message = ?,
                 row_count = ?, processed_count = ?, updated_at = ?
             WHERE batch_id = ?",
            params![
                batch.statement_format.map(|f| f.as_str()),
                batch.profile,
                batch.status.as_str(),
                batch.error_message,
                batch.row_count as i64,
                batch.processed_count as i64,
                timestamp(&batch.updated_at),
                batch.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("Import batch not found: {}", batch.id)));
        }
        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<ImportBatch>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_batches WHERE batch_id = ?",
            BATCH_COLUMNS
        ))?;
        let mut records = stmt
            .query_map(params![id.to_string()], BatchRecord::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records.pop().map(BatchRecord::into_batch).transpose()
    }

    async fn list_batches(&self, filter: &BatchFilter, page: Pagination) -> Result<Vec<ImportBatch>> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(account_id) = filter.account_id {
            clauses.push("account_id = ?");
            values.push(account_id.to_string());
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(status.as_str().to_string());
        }
        if let Some(sha) = &filter.file_sha256 {
            clauses.push("file_sha256 = ?");
            values.push(sha.clone());
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM import_batches {} ORDER BY created_at DESC, batch_id DESC LIMIT {} OFFSET {}",
            BATCH_COLUMNS, where_clause, page.limit, page.offset
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values.iter()), BatchRecord::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records.into_iter().map(BatchRecord::into_batch).collect()
    }

    async fn insert_rows(&self, rows: &[RawTransactionRow]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for row in rows {
            Self::insert_row_on(&tx, row)?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn update_row(&self, row: &RawTransactionRow) -> Result<()> {
        let conn = self.lock()?;
        if Self::update_row_on(&conn, row)? == 0 {
            return Err(Error::not_found(format!("Import row not found: {}", row.id)));
        }
        Ok(())
    }

    async fn get_rows(&self, batch_id: Uuid) -> Result<Vec<RawTransactionRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_rows WHERE batch_id = ? ORDER BY row_number",
            ROW_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![batch_id.to_string()], RowRecord::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records.into_iter().map(RowRecord::into_row).collect()
    }
}

#[async_trait]
impl LedgerRepository for DuckDbRepository {
    async fn commit_row(&self, row: &RawTransactionRow, transaction: &Transaction) -> Result<()> {
        let mut conn = self.lock()?;
        // Dropping the handle without commit rolls back both statements.
        let tx = conn.transaction()?;

        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM ledger_transactions WHERE raw_row_id = ?",
            params![row.id.to_string()],
            |r| r.get(0),
        )?;
        if existing > 0 {
            return Err(Error::invalid_state(format!(
                "Row {} of batch {} is already committed",
                row.row_number, row.batch_id
            )));
        }

        tx.execute(
            &format!(
                "INSERT INTO ledger_transactions ({})
                 VALUES (?, ?, ?, ?, ?, ?, CAST(? AS DATE), CAST(? AS TIME), CAST(? AS DATE),
                         CAST(? AS DECIMAL(18, 4)), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                TRANSACTION_INSERT_COLUMNS
            ),
            params![
                transaction.id.to_string(),
                transaction.user_id,
                transaction.account_id.to_string(),
                transaction.linked_account_id.map(|id| id.to_string()),
                transaction.import_batch_id.to_string(),
                transaction.raw_row_id.to_string(),
                transaction.transaction_date.to_string(),
                transaction.transaction_time.map(|t| t.format("%H:%M:%S").to_string()),
                transaction.posted_date.map(|d| d.to_string()),
                transaction.amount.to_string(),
                transaction.direction.as_str(),
                transaction.currency,
                transaction.transaction_type.as_str(),
                transaction.category_id,
                transaction.merchant,
                transaction.description,
                transaction.notes,
                transaction.status.as_str(),
                serde_json::to_string(&transaction.tags)?,
                transaction.metadata.to_string(),
                timestamp(&transaction.created_at),
            ],
        )?;

        if Self::update_row_on(&tx, row)? == 0 {
            return Err(Error::not_found(format!("Import row not found: {}", row.id)));
        }

        tx.commit()?;
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ledger_transactions WHERE transaction_id = ?",
            TRANSACTION_COLUMNS
        ))?;
        let mut records = stmt
            .query_map(params![id.to_string()], TransactionRecord::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records.pop().map(TransactionRecord::into_transaction).transpose()
    }

    async fn get_transactions_by_batch(&self, batch_id: Uuid) -> Result<Vec<Transaction>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ledger_transactions WHERE import_batch_id = ?
             ORDER BY transaction_date, created_at",
            TRANSACTION_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![batch_id.to_string()], TransactionRecord::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records
            .into_iter()
            .map(TransactionRecord::into_transaction)
            .collect()
    }
}

const TRANSACTION_INSERT_COLUMNS: &str = "transaction_id, user_id, account_id, linked_account_id,
    import_batch_id, raw_row_id, transaction_date, transaction_time, posted_date, amount,
    direction, currency, transaction_type, category_id, merchant, description, notes, status,
    tags, metadata, created_at";

#[async_trait]
impl AccountRegistry for DuckDbRepository {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT account_id, name, currency, account_number, card_last4, created_at
             FROM accounts WHERE account_id = ?",
        )?;
        let mut records = stmt
            .query_map(params![id.to_string()], AccountRecord::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records.pop().map(AccountRecord::into_account).transpose()
    }

    async fn add_account(&self, account: &Account) -> Result<()> {
        let conn = self.lock()?;
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE account_id = ?",
            params![account.id.to_string()],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Err(Error::validation(format!("Account already exists: {}", account.id)));
        }
        conn.execute(
            "INSERT INTO accounts (account_id, name, currency, account_number, card_last4, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                account.id.to_string(),
                account.name,
                account.currency,
                account.account_number,
                account.card_last4,
                timestamp(&account.created_at),
            ],
        )?;
        Ok(())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT account_id, name, currency, account_number, card_last4, created_at
             FROM accounts ORDER BY name, account_id",
        )?;
        let records = stmt
            .query_map([], AccountRecord::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records.into_iter().map(AccountRecord::into_account).collect()
    }
}

#[async_trait]
impl CategoryRegistry for DuckDbRepository {
    async fn get_category(&self, id: &str) -> Result<Option<Category>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT category_id, name, is_system FROM categories WHERE category_id = ?")?;
        let mut categories = stmt
            .query_map(params![id], read_category)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories.pop())
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT category_id, name, is_system FROM categories ORDER BY category_id")?;
        let categories = stmt
            .query_map([], read_category)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }
}

#[async_trait]
impl RuleRepository for DuckDbRepository {
    async fn insert_rule(&self, rule: &CategoryRule) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO category_rules ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                RULE_COLUMNS
            ),
            params![
                rule.id.to_string(),
                rule.user_id,
                rule.category_id,
                rule.field.as_str(),
                rule.match_type.as_str(),
                rule.pattern,
                rule.is_active,
                rule.priority,
                timestamp(&rule.created_at),
                timestamp(&rule.updated_at),
            ],
        )?;
        Ok(())
    }

    async fn update_rule(&self, rule: &CategoryRule) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE category_rules
             SET category_id = ?, field = ?, match_type = ?, pattern = ?, is_active = ?,
                 priority = ?, updated_at = ?
             WHERE rule_id = ?",
            params![
                rule.category_id,
                rule.field.as_str(),
                rule.match_type.as_str(),
                rule.pattern,
                rule.is_active,
                rule.priority,
                timestamp(&rule.updated_at),
                rule.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("Rule not found: {}", rule.id)));
        }
        Ok(())
    }

    async fn delete_rule(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM category_rules WHERE rule_id = ?",
            params![id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<CategoryRule>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM category_rules WHERE rule_id = ?",
            RULE_COLUMNS
        ))?;
        let mut records = stmt
            .query_map(params![id.to_string()], RuleRecord::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records.pop().map(RuleRecord::into_rule).transpose()
    }

    async fn list_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>> {
        self.select_rules(
            &format!(
                "SELECT {} FROM category_rules WHERE user_id = ? ORDER BY priority DESC, rule_id",
                RULE_COLUMNS
            ),
            user_id,
        )
    }

    async fn active_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>> {
        self.select_rules(
            &format!(
                "SELECT {} FROM category_rules WHERE user_id = ? AND is_active
                 ORDER BY priority DESC, rule_id",
                RULE_COLUMNS
            ),
            user_id,
        )
    }
}

impl DuckDbRepository {
    fn select_rules(&self, sql: &str, user_id: &str) -> Result<Vec<CategoryRule>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params![user_id], RuleRecord::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records.into_iter().map(RuleRecord::into_rule).collect()
    }
}

// Column readers. Rows are first read as plain SQL values inside the
// driver callback, then converted to domain types so parse failures surface
// as crate errors instead of being swallowed.

struct BatchRecord {
    id: String,
    user_id: String,
    account_id: String,
    file_name: String,
    statement_format: Option<String>,
    profile: Option<String>,
    file_sha256: String,
    status: String,
    error_message: Option<String>,
    row_count: i64,
    processed_count: i64,
    created_at: String,
    updated_at: String,
}

impl BatchRecord {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            account_id: row.get(2)?,
            file_name: row.get(3)?,
            statement_format: row.get(4)?,
            profile: row.get(5)?,
            file_sha256: row.get(6)?,
            status: row.get(7)?,
            error_message: row.get(8)?,
            row_count: row.get(9)?,
            processed_count: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_batch(self) -> Result<ImportBatch> {
        Ok(ImportBatch {
            id: parse_uuid(&self.id)?,
            user_id: self.user_id,
            account_id: parse_uuid(&self.account_id)?,
            file_name: self.file_name,
            statement_format: self
                .statement_format
                .as_deref()
                .map(|f| f.parse::<StatementFormat>())
                .transpose()?,
            profile: self.profile,
            file_sha256: self.file_sha256,
            status: self.status.parse::<BatchStatus>()?,
            error_message: self.error_message,
            row_count: to_u32(self.row_count),
            processed_count: to_u32(self.processed_count),
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

struct RowRecord {
    id: String,
    batch_id: String,
    row_number: i64,
    raw: String,
    normalized: Option<String>,
    status: String,
    error_message: Option<String>,
    transaction_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RowRecord {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            batch_id: row.get(1)?,
            row_number: row.get(2)?,
            raw: row.get(3)?,
            normalized: row.get(4)?,
            status: row.get(5)?,
            error_message: row.get(6)?,
            transaction_id: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_row(self) -> Result<RawTransactionRow> {
        let raw: RawRecord = serde_json::from_str(&self.raw)?;
        Ok(RawTransactionRow {
            id: parse_uuid(&self.id)?,
            batch_id: parse_uuid(&self.batch_id)?,
            row_number: to_u32(self.row_number),
            raw,
            normalized: self
                .normalized
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            status: self.status.parse::<RowStatus>()?,
            error_message: self.error_message,
            transaction_id: self.transaction_id.as_deref().map(parse_uuid).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

struct TransactionRecord {
    id: String,
    user_id: String,
    account_id: String,
    linked_account_id: Option<String>,
    import_batch_id: String,
    raw_row_id: String,
    transaction_date: String,
    transaction_time: Option<String>,
    posted_date: Option<String>,
    amount: String,
    direction: String,
    currency: String,
    transaction_type: String,
    category_id: String,
    merchant: Option<String>,
    description: String,
    notes: Option<String>,
    status: String,
    tags: String,
    metadata: Option<String>,
    created_at: String,
}

impl TransactionRecord {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            account_id: row.get(2)?,
            linked_account_id: row.get(3)?,
            import_batch_id: row.get(4)?,
            raw_row_id: row.get(5)?,
            transaction_date: row.get(6)?,
            transaction_time: row.get(7)?,
            posted_date: row.get(8)?,
            amount: row.get(9)?,
            direction: row.get(10)?,
            currency: row.get(11)?,
            transaction_type: row.get(12)?,
            category_id: row.get(13)?,
            merchant: row.get(14)?,
            description: row.get(15)?,
            notes: row.get(16)?,
            status: row.get(17)?,
            tags: row.get(18)?,
            metadata: row.get(19)?,
            created_at: row.get(20)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction> {
        Ok(Transaction {
            id: parse_uuid(&self.id)?,
            user_id: self.user_id,
            account_id: parse_uuid(&self.account_id)?,
            linked_account_id: self.linked_account_id.as_deref().map(parse_uuid).transpose()?,
            import_batch_id: parse_uuid(&self.import_batch_id)?,
            raw_row_id: parse_uuid(&self.raw_row_id)?,
            transaction_date: parse_date(&self.transaction_date)?,
            transaction_time: self.transaction_time.as_deref().map(parse_time).transpose()?,
            posted_date: self.posted_date.as_deref().map(parse_date).transpose()?,
            amount: Decimal::from_str(&self.amount)
                .map_err(|e| Error::database(format!("Invalid stored amount '{}': {}", self.amount, e)))?
                .normalize(),
            direction: self.direction.parse()?,
            currency: self.currency,
            transaction_type: self.transaction_type.parse()?,
            category_id: self.category_id,
            merchant: self.merchant,
            description: self.description,
            notes: self.notes,
            status: self.status.parse()?,
            tags: serde_json::from_str(&self.tags)?,
            metadata: match self.metadata.as_deref() {
                Some(json) => serde_json::from_str(json)?,
                None => serde_json::Value::Null,
            },
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct AccountRecord {
    id: String,
    name: String,
    currency: String,
    account_number: Option<String>,
    card_last4: Option<String>,
    created_at: String,
}

impl AccountRecord {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            currency: row.get(2)?,
            account_number: row.get(3)?,
            card_last4: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_account(self) -> Result<Account> {
        Ok(Account {
            id: parse_uuid(&self.id)?,
            name: self.name,
            currency: self.currency,
            account_number: self.account_number,
            card_last4: self.card_last4,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct RuleRecord {
    id: String,
    user_id: String,
    category_id: String,
    field: String,
    match_type: String,
    pattern: String,
    is_active: bool,
    priority: i32,
    created_at: String,
    updated_at: String,
}

impl RuleRecord {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            category_id: row.get(2)?,
            field: row.get(3)?,
            match_type: row.get(4)?,
            pattern: row.get(5)?,
            is_active: row.get(6)?,
            priority: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_rule(self) -> Result<CategoryRule> {
        Ok(CategoryRule {
            id: parse_uuid(&self.id)?,
            user_id: self.user_id,
            category_id: self.category_id,
            field: self.field.parse()?,
            match_type: self.match_type.parse()?,
            pattern: self.pattern,
            is_active: self.is_active,
            priority: self.priority,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn read_category(row: &duckdb::Row) -> duckdb::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        is_system: row.get(2)?,
    })
}

// Helper functions

/// Timestamps are stored as fixed-width RFC 3339 text so they sort
/// chronologically as strings.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::database(format!("Invalid stored timestamp '{}': {}", s, e)))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::database(format!("Invalid stored date '{}': {}", s, e)))
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    s.parse::<NaiveTime>()
        .map_err(|e| Error::database(format!("Invalid stored time '{}': {}", s, e)))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::database(format!("Invalid stored id '{}': {}", s, e)))
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or_default()
}
