//! Repository ports - storage and registry abstractions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::result::Result;
use crate::domain::{
    Account, BatchStatus, Category, CategoryRule, ImportBatch, RawTransactionRow, Transaction,
};

/// Default page size for batch listings
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Filter for listing batches. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchFilter {
    pub account_id: Option<Uuid>,
    pub status: Option<BatchStatus>,
    pub file_sha256: Option<String>,
}

impl BatchFilter {
    pub fn matches(&self, batch: &ImportBatch) -> bool {
        self.account_id.map_or(true, |id| batch.account_id == id)
            && self.status.map_or(true, |s| batch.status == s)
            && self
                .file_sha256
                .as_deref()
                .map_or(true, |sha| batch.file_sha256 == sha)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// Staging area for batches and their raw rows
#[async_trait]
pub trait BatchRepository: Send + Sync {
    async fn insert_batch(&self, batch: &ImportBatch) -> Result<()>;

    async fn update_batch(&self, batch: &ImportBatch) -> Result<()>;

    async fn get_batch(&self, id: Uuid) -> Result<Option<ImportBatch>>;

    /// Batches matching `filter`, newest first
    async fn list_batches(&self, filter: &BatchFilter, page: Pagination) -> Result<Vec<ImportBatch>>;

    async fn insert_rows(&self, rows: &[RawTransactionRow]) -> Result<()>;

    async fn update_row(&self, row: &RawTransactionRow) -> Result<()>;

    /// All rows of a batch ordered by row number
    async fn get_rows(&self, batch_id: Uuid) -> Result<Vec<RawTransactionRow>>;
}

/// Committed ledger transactions
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Persist `tx` and store `row` (already flipped to committed) as one
    /// atomic unit. At most one transaction may exist per raw row.
    async fn commit_row(&self, row: &RawTransactionRow, tx: &Transaction) -> Result<()>;

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>>;

    async fn get_transactions_by_batch(&self, batch_id: Uuid) -> Result<Vec<Transaction>>;
}

/// Accounts statements can be imported into
#[async_trait]
pub trait AccountRegistry: Send + Sync {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>>;

    async fn add_account(&self, account: &Account) -> Result<()>;

    async fn list_accounts(&self) -> Result<Vec<Account>>;
}

#[async_trait]
pub trait CategoryRegistry: Send + Sync {
    async fn get_category(&self, id: &str) -> Result<Option<Category>>;

    async fn list_categories(&self) -> Result<Vec<Category>>;
}

/// User-managed categorization rules
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn insert_rule(&self, rule: &CategoryRule) -> Result<()>;

    async fn update_rule(&self, rule: &CategoryRule) -> Result<()>;

    /// Returns false when no rule had this id
    async fn delete_rule(&self, id: Uuid) -> Result<bool>;

    async fn get_rule(&self, id: Uuid) -> Result<Option<CategoryRule>>;

    /// Every rule of a user, active or not
    async fn list_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>>;

    /// Active rules of a user ordered by priority descending, then id
    async fn active_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>>;
}

/// A single store backing every port of the import pipeline
pub trait ImportStore:
    BatchRepository + LedgerRepository + AccountRegistry + CategoryRegistry + RuleRepository
{
}

impl<T> ImportStore for T where
    T: BatchRepository + LedgerRepository + AccountRegistry + CategoryRegistry + RuleRepository
{
}
