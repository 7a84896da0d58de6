//! Import batch coordinator - drives a batch through its lifecycle
//!
//! `create` decodes an upload into staged rows, `process` normalizes and
//! categorizes them, and `confirm` commits a selection to the ledger.
//! Operations on the same batch are serialized; different batches run
//! independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::adapters::statement::DecoderRegistry;
use crate::config::ImportSettings;
use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, BatchStatus, ImportBatch, RawTransactionRow, RowStatus, StatementFormat, Transaction,
};
use crate::ports::{
    AccountRegistry, BatchFilter, BatchRepository, ImportStore, LedgerRepository, Pagination,
    RuleRepository,
};

use super::categorizer::CategoryRuleEngine;
use super::commit::{CommitReport, FailedRow, SkippedRow, TransactionCommitService};
use super::normalizer::FieldNormalizer;

/// An uploaded statement file
#[derive(Debug, Clone)]
pub struct NewImport {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub account_id: Uuid,
    pub user_id: String,
    /// Declared format; inferred from the content when absent
    pub format: Option<String>,
    /// Import profile name; the configured default profile when absent
    pub profile: Option<String>,
}

/// Result of `process`
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub batch: ImportBatch,
    pub rows: Vec<RawTransactionRow>,
    /// Transactions created by auto-commit in this call
    pub committed: Vec<Transaction>,
    /// Rows auto-commit could not persist
    pub failed: Vec<FailedRow>,
    /// Non-fatal problems, such as rules with invalid regexes
    pub warnings: Vec<String>,
}

/// Row counts of a processed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowSummary {
    pub total: usize,
    pub normalized: usize,
    pub errors: usize,
    pub committed: usize,
    pub pending: usize,
}

impl RowSummary {
    pub fn of(rows: &[RawTransactionRow]) -> Self {
        let count = |status: RowStatus| rows.iter().filter(|r| r.status == status).count();
        Self {
            total: rows.len(),
            normalized: count(RowStatus::Normalized),
            errors: count(RowStatus::Error),
            committed: count(RowStatus::Committed),
            pending: count(RowStatus::Pending),
        }
    }

    /// Completed but nothing could be staged or committed
    pub fn nothing_usable(&self) -> bool {
        self.normalized == 0 && self.committed == 0
    }
}

impl ProcessOutcome {
    pub fn summary(&self) -> RowSummary {
        RowSummary::of(&self.rows)
    }
}

/// Result of `confirm`
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmOutcome {
    pub batch: ImportBatch,
    pub committed: Vec<Transaction>,
    pub skipped: Vec<SkippedRow>,
    pub failed: Vec<FailedRow>,
}

type LockMap = Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>;

/// Handle on one batch's mutex. The map entry is dropped together with the
/// last handle, so the map only holds batches in use.
struct BatchLock<'a> {
    locks: &'a LockMap,
    id: Uuid,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl BatchLock<'_> {
    async fn acquire(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for BatchLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Handles are only cloned out of the map under this lock, so a count
        // of two means the map and this handle are the only owners.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.id);
        }
    }
}

pub struct ImportBatchCoordinator {
    batches: Arc<dyn BatchRepository>,
    ledger: Arc<dyn LedgerRepository>,
    accounts: Arc<dyn AccountRegistry>,
    rules: Arc<dyn RuleRepository>,
    committer: TransactionCommitService,
    settings: ImportSettings,
    locks: LockMap,
}

impl ImportBatchCoordinator {
    /// Coordinator over a single store implementing every port
    pub fn new<S>(store: Arc<S>, settings: ImportSettings) -> Self
    where
        S: ImportStore + 'static,
    {
        Self::from_parts(
            Arc::clone(&store) as Arc<dyn BatchRepository>,
            Arc::clone(&store) as Arc<dyn LedgerRepository>,
            Arc::clone(&store) as Arc<dyn AccountRegistry>,
            store as Arc<dyn RuleRepository>,
            settings,
        )
    }

    pub fn from_parts(
        batches: Arc<dyn BatchRepository>,
        ledger: Arc<dyn LedgerRepository>,
        accounts: Arc<dyn AccountRegistry>,
        rules: Arc<dyn RuleRepository>,
        settings: ImportSettings,
    ) -> Self {
        let committer = TransactionCommitService::new(Arc::clone(&batches), Arc::clone(&ledger));
        Self {
            batches,
            ledger,
            accounts,
            rules,
            committer,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn batch_lock(&self, id: Uuid) -> BatchLock<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        BatchLock {
            locks: &self.locks,
            id,
            lock: Arc::clone(locks.entry(id).or_default()),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// Create a batch from an uploaded file
    ///
    /// An unknown account is rejected before anything is stored. A file that
    /// cannot be decoded leaves a batch in `error` status with no rows, and
    /// the returned error carries that batch's id.
    pub async fn create(&self, upload: NewImport) -> Result<ImportBatch> {
        let account = self
            .accounts
            .get_account(upload.account_id)
            .await?
            .ok_or(Error::AccountNotFound(upload.account_id))?;

        let checksum = hex::encode(Sha256::digest(&upload.bytes));
        let duplicates = self
            .batches
            .list_batches(
                &BatchFilter {
                    account_id: Some(account.id),
                    file_sha256: Some(checksum.clone()),
                    ..Default::default()
                },
                Pagination { offset: 0, limit: 1 },
            )
            .await?;
        if let Some(previous) = duplicates.first() {
            tracing::warn!(previous_batch = %previous.id, file = %upload.file_name, "file was already uploaded for this account");
        }

        let format: Result<StatementFormat> = match upload.format.as_deref() {
            Some(declared) => declared.parse(),
            None => DecoderRegistry::infer(&upload.file_name, &upload.bytes).ok_or_else(|| {
                Error::UnsupportedFormat {
                    batch_id: None,
                    format: format!("unrecognized content in {}", upload.file_name),
                }
            }),
        };

        let profile_name = upload
            .profile
            .clone()
            .or_else(|| self.settings.default_profile.clone());
        let profile = match profile_name.as_deref() {
            Some(name) => Some(
                self.settings
                    .profiles
                    .get(name)
                    .ok_or_else(|| Error::not_found(format!("Import profile not found: {}", name)))?,
            ),
            None => None,
        };

        let mut batch = ImportBatch::new(
            &upload.user_id,
            account.id,
            &upload.file_name,
            format.as_ref().ok().copied(),
            checksum,
        );
        batch.profile = profile_name;
        self.batches.insert_batch(&batch).await?;

        let decoded = format.and_then(|f| {
            DecoderRegistry::for_profile(profile)
                .decode(f, &upload.bytes)
                .map_err(Error::from)
        });
        let stream = match decoded {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(batch_id = %batch.id, file = %batch.file_name, error = %e, "statement could not be decoded");
                batch.fail(e.to_string());
                self.batches.update_batch(&batch).await?;
                return Err(e.with_batch(batch.id));
            }
        };

        let rows: Vec<RawTransactionRow> = stream
            .map(|(number, raw)| RawTransactionRow::new(batch.id, number, raw))
            .collect();
        self.batches.insert_rows(&rows).await?;
        batch.row_count = rows.len() as u32;
        self.batches.update_batch(&batch).await?;

        tracing::info!(batch_id = %batch.id, format = ?batch.statement_format, rows = batch.row_count, "import batch created");
        Ok(batch)
    }

    /// Normalize and categorize every pending row
    ///
    /// A completed batch is returned as stored without touching it, even
    /// when `auto_create` is set. With `auto_create`, every normalized row is
    /// committed once the batch completes; commit failures are per row.
    pub async fn process(&self, batch_id: Uuid, auto_create: bool) -> Result<ProcessOutcome> {
        let lock = self.batch_lock(batch_id);
        let _guard = lock.acquire().await;

        let mut batch = self.require_batch(batch_id).await?;
        match batch.status {
            BatchStatus::Completed => {
                let rows = self.batches.get_rows(batch_id).await?;
                return Ok(ProcessOutcome {
                    batch,
                    rows,
                    committed: Vec::new(),
                    failed: Vec::new(),
                    warnings: Vec::new(),
                });
            }
            BatchStatus::Error => {
                return Err(Error::invalid_state(format!(
                    "Batch {} failed and cannot be processed: {}",
                    batch.id,
                    batch.error_message.as_deref().unwrap_or("unknown error")
                )));
            }
            BatchStatus::Pending | BatchStatus::Processing => {}
        }

        let engine = match self.run(&mut batch).await {
            Ok(engine) => engine,
            Err(e) => {
                tracing::warn!(batch_id = %batch.id, error = %e, "processing failed");
                batch.fail(e.to_string());
                if let Err(update_err) = self.batches.update_batch(&batch).await {
                    tracing::warn!(batch_id = %batch.id, error = %update_err, "could not record batch failure");
                }
                return Err(e);
            }
        };

        let report = if auto_create {
            self.committer.commit(&batch, None).await?
        } else {
            CommitReport::default()
        };

        let rows = self.batches.get_rows(batch_id).await?;
        let outcome = ProcessOutcome {
            batch,
            rows,
            committed: report.committed,
            failed: report.failed,
            warnings: engine.warnings().to_vec(),
        };
        let summary = outcome.summary();
        tracing::info!(
            batch_id = %batch_id,
            normalized = summary.normalized,
            errors = summary.errors,
            committed = outcome.committed.len(),
            "import batch processed"
        );
        Ok(outcome)
    }

    /// Process the pending rows of a batch and mark it completed
    async fn run(&self, batch: &mut ImportBatch) -> Result<CategoryRuleEngine> {
        let format = batch.statement_format.ok_or_else(|| {
            Error::invalid_state(format!("Batch {} has no statement format", batch.id))
        })?;
        let account: Account = self
            .accounts
            .get_account(batch.account_id)
            .await?
            .ok_or(Error::AccountNotFound(batch.account_id))?;

        let profile = self.settings.profile(batch.profile.as_deref());
        let normalizer = FieldNormalizer::new(format, &self.settings, profile);
        let rules = self.rules.active_rules(&batch.user_id).await?;
        let engine = CategoryRuleEngine::new(rules, &self.settings.default_category)
            .with_keyword_fallback(self.settings.keyword_fallback);

        batch.transition(BatchStatus::Processing)?;
        self.batches.update_batch(batch).await?;

        let mut rows = self.batches.get_rows(batch.id).await?;
        rows.sort_by_key(|r| r.row_number);
        for mut row in rows.into_iter().filter(|r| r.status == RowStatus::Pending) {
            match normalizer.normalize(&row.raw, &account) {
                Ok(mut normalized) => {
                    normalized.category_id = engine.categorize(&normalized);
                    row.mark_normalized(normalized);
                }
                Err(e) => {
                    tracing::debug!(batch_id = %batch.id, row_number = row.row_number, error = %e, "row failed normalization");
                    row.mark_error(e.to_string());
                }
            }
            self.batches.update_row(&row).await?;
            batch.record_processed();
            self.batches.update_batch(batch).await?;
        }

        batch.transition(BatchStatus::Completed)?;
        self.batches.update_batch(batch).await?;
        Ok(engine)
    }

    /// Commit selected rows of a completed batch, or all of them
    pub async fn confirm(
        &self,
        batch_id: Uuid,
        selected_rows: Option<Vec<u32>>,
    ) -> Result<ConfirmOutcome> {
        let lock = self.batch_lock(batch_id);
        let _guard = lock.acquire().await;

        let batch = self.require_batch(batch_id).await?;
        if batch.status != BatchStatus::Completed {
            return Err(Error::invalid_state(format!(
                "Batch {} is {}; only completed batches can be confirmed",
                batch.id, batch.status
            )));
        }

        let report = self.committer.commit(&batch, selected_rows.as_deref()).await?;
        Ok(ConfirmOutcome {
            batch,
            committed: report.committed,
            skipped: report.skipped,
            failed: report.failed,
        })
    }

    pub async fn get(&self, batch_id: Uuid) -> Result<ImportBatch> {
        self.require_batch(batch_id).await
    }

    pub async fn list(&self, filter: &BatchFilter, page: Pagination) -> Result<Vec<ImportBatch>> {
        self.batches.list_batches(filter, page).await
    }

    pub async fn rows(&self, batch_id: Uuid) -> Result<Vec<RawTransactionRow>> {
        self.require_batch(batch_id).await?;
        self.batches.get_rows(batch_id).await
    }

    /// Ledger transactions committed from a batch
    pub async fn transactions(&self, batch_id: Uuid) -> Result<Vec<Transaction>> {
        self.require_batch(batch_id).await?;
        self.ledger.get_transactions_by_batch(batch_id).await
    }

    async fn require_batch(&self, batch_id: Uuid) -> Result<ImportBatch> {
        self.batches
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Import batch not found: {}", batch_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use crate::adapters::memory::InMemoryRepository;
    use crate::domain::{CategoryRule, Direction, MatchField, MatchType};
    use crate::services::SkipReason;

    const CSV: &str = "Date,Description,Amount\n\
                       2024-01-02,STARBUCKS #123,-4.50\n\
                       not a date,BROKEN ROW,-1.00\n\
                       2024-01-03,PAYROLL ACME,2500.00\n";

    async fn setup() -> (Arc<InMemoryRepository>, ImportBatchCoordinator, Account) {
        let store = Arc::new(InMemoryRepository::new());
        let account = Account::new(Uuid::new_v4(), "Chequing".to_string()).with_currency("CAD");
        store.add_account(&account).await.unwrap();
        let coordinator = ImportBatchCoordinator::new(Arc::clone(&store), ImportSettings::default());
        (store, coordinator, account)
    }

    fn upload(account: &Account, bytes: &str) -> NewImport {
        NewImport {
            file_name: "statement.csv".to_string(),
            bytes: bytes.as_bytes().to_vec(),
            account_id: account.id,
            user_id: "local".to_string(),
            format: None,
            profile: None,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_account() {
        let (store, coordinator, _) = setup().await;
        let ghost = Account::new(Uuid::new_v4(), "Ghost".to_string());

        let err = coordinator.create(upload(&ghost, CSV)).await.unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(id) if id == ghost.id));
        let batches = store
            .list_batches(&BatchFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert!(batches.is_empty());
    }

    #[tokio::test]
    async fn test_create_stages_rows_in_order() {
        let (_, coordinator, account) = setup().await;
        let batch = coordinator.create(upload(&account, CSV)).await.unwrap();

        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.statement_format, Some(StatementFormat::GenericCsv));
        assert_eq!(batch.row_count, 3);
        assert_eq!(batch.file_sha256.len(), 64);

        let rows = coordinator.rows(batch.id).await.unwrap();
        let numbers: Vec<u32> = rows.iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(rows.iter().all(|r| r.status == RowStatus::Pending));
        assert_eq!(rows[0].raw["Description"], "STARBUCKS #123");
    }

    #[tokio::test]
    async fn test_malformed_upload_leaves_error_batch() {
        let (_, coordinator, account) = setup().await;
        let mut bad = upload(&account, "");
        bad.format = Some("generic_csv".to_string());

        let err = coordinator.create(bad).await.unwrap_err();
        assert!(matches!(err, Error::MalformedFile { .. }));
        let batch_id = err.batch_id().expect("error carries the batch id");

        let batch = coordinator.get(batch_id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Error);
        assert!(batch.error_message.is_some());
        assert!(coordinator.rows(batch_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_declared_format_is_unsupported() {
        let (_, coordinator, account) = setup().await;
        let mut upload = upload(&account, CSV);
        upload.format = Some("qif".to_string());

        let err = coordinator.create(upload).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { batch_id: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_process_normalizes_and_categorizes() {
        let (store, coordinator, account) = setup().await;
        let rule = CategoryRule::new(
            "local",
            "dining_cafe",
            MatchField::Description,
            MatchType::Contains,
            "starbucks",
            10,
        );
        store.insert_rule(&rule).await.unwrap();

        let batch = coordinator.create(upload(&account, CSV)).await.unwrap();
        let outcome = coordinator.process(batch.id, false).await.unwrap();

        assert_eq!(outcome.batch.status, BatchStatus::Completed);
        assert_eq!(outcome.batch.processed_count, 3);
        assert!(outcome.committed.is_empty());
        let summary = outcome.summary();
        assert_eq!((summary.normalized, summary.errors), (2, 1));

        let coffee = outcome.rows[0].normalized.as_ref().unwrap();
        assert_eq!(coffee.category_id, "dining_cafe");
        assert_eq!(coffee.amount, Decimal::new(450, 2));
        assert_eq!(coffee.direction, Direction::Outflow);
        assert_eq!(coffee.currency, "CAD");

        assert_eq!(outcome.rows[1].status, RowStatus::Error);
        assert!(outcome.rows[1].error_message.as_deref().unwrap().contains("not a date"));

        let pay = outcome.rows[2].normalized.as_ref().unwrap();
        assert_eq!(pay.category_id, "uncategorized");
        assert_eq!(pay.direction, Direction::Inflow);
    }

    #[tokio::test]
    async fn test_reprocessing_completed_batch_is_a_no_op() {
        let (_, coordinator, account) = setup().await;
        let batch = coordinator.create(upload(&account, CSV)).await.unwrap();
        let first = coordinator.process(batch.id, false).await.unwrap();

        let second = coordinator.process(batch.id, true).await.unwrap();
        assert!(second.committed.is_empty());
        assert_eq!(second.rows, first.rows);
        assert!(coordinator.transactions(batch.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auto_create_commits_normalized_rows() {
        let (_, coordinator, account) = setup().await;
        let batch = coordinator.create(upload(&account, CSV)).await.unwrap();
        let outcome = coordinator.process(batch.id, true).await.unwrap();

        assert_eq!(outcome.committed.len(), 2);
        assert_eq!(outcome.summary().committed, 2);
        assert_eq!(outcome.summary().errors, 1);

        let stored = coordinator.transactions(batch.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        for tx in &stored {
            assert_eq!(tx.import_batch_id, batch.id);
            assert_eq!(tx.account_id, account.id);
            assert!(tx.metadata["raw"].is_object());
        }
    }

    #[tokio::test]
    async fn test_confirm_requires_completed_batch() {
        let (_, coordinator, account) = setup().await;
        let batch = coordinator.create(upload(&account, CSV)).await.unwrap();

        let err = coordinator.confirm(batch.id, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(matches!(
            coordinator.confirm(Uuid::new_v4(), None).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_confirm_selection_is_idempotent() {
        let (_, coordinator, account) = setup().await;
        let batch = coordinator.create(upload(&account, CSV)).await.unwrap();
        coordinator.process(batch.id, false).await.unwrap();

        let first = coordinator
            .confirm(batch.id, Some(vec![3, 2, 99, 3]))
            .await
            .unwrap();
        assert_eq!(first.committed.len(), 1);
        assert_eq!(first.committed[0].description, "PAYROLL ACME");
        assert_eq!(
            first.skipped,
            vec![
                SkippedRow { row_number: 2, reason: SkipReason::RowError },
                SkippedRow { row_number: 99, reason: SkipReason::NotFound },
            ]
        );

        let second = coordinator.confirm(batch.id, None).await.unwrap();
        assert_eq!(second.committed.len(), 1);
        assert_eq!(second.committed[0].description, "STARBUCKS #123");
        assert!(second
            .skipped
            .contains(&SkippedRow { row_number: 3, reason: SkipReason::AlreadyCommitted }));

        let third = coordinator.confirm(batch.id, None).await.unwrap();
        assert!(third.committed.is_empty());
        assert_eq!(coordinator.transactions(batch.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_confirms_commit_each_row_once() {
        let (_, coordinator, account) = setup().await;
        let coordinator = Arc::new(coordinator);
        let batch = coordinator.create(upload(&account, CSV)).await.unwrap();
        coordinator.process(batch.id, false).await.unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.confirm(batch.id, None).await })
            })
            .collect();
        let mut committed = 0;
        for handle in handles {
            committed += handle.await.unwrap().unwrap().committed.len();
        }

        assert_eq!(committed, 2);
        assert_eq!(coordinator.transactions(batch.id).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_confirm_racing_auto_create_commits_each_row_once() {
        let (store, coordinator, account) = setup().await;
        let coordinator = Arc::new(coordinator);

        for _ in 0..8 {
            let batch = coordinator.create(upload(&account, CSV)).await.unwrap();
            let processing = {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.process(batch.id, true).await })
            };
            let confirming = {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.confirm(batch.id, None).await })
            };

            let processed = processing.await.unwrap().unwrap();
            assert_eq!(processed.committed.len(), 2);
            match confirming.await.unwrap() {
                Err(Error::InvalidState(_)) => {}
                Ok(confirmed) => {
                    assert!(confirmed.committed.is_empty());
                    let already: Vec<u32> = confirmed
                        .skipped
                        .iter()
                        .filter(|s| s.reason == SkipReason::AlreadyCommitted)
                        .map(|s| s.row_number)
                        .collect();
                    assert_eq!(already, vec![1, 3]);
                }
                Err(other) => panic!("unexpected confirm error: {:?}", other),
            }

            let stored = store.get_transactions_by_batch(batch.id).await.unwrap();
            assert_eq!(stored.len(), 2);
            let rows = store.get_rows(batch.id).await.unwrap();
            for row in rows.iter().filter(|r| r.normalized.is_some()) {
                assert_eq!(row.status, RowStatus::Committed);
                let matching = stored.iter().filter(|tx| Some(tx.id) == row.transaction_id).count();
                assert_eq!(matching, 1);
            }
        }
        assert_eq!(coordinator.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_batch_locks_are_released() {
        let (_, coordinator, account) = setup().await;
        let coordinator = Arc::new(coordinator);
        let batch = coordinator.create(upload(&account, CSV)).await.unwrap();

        coordinator.process(batch.id, false).await.unwrap();
        assert_eq!(coordinator.tracked_locks(), 0);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.confirm(batch.id, None).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(coordinator.tracked_locks(), 0);

        // failed lookups release their entry too
        assert!(coordinator.confirm(Uuid::new_v4(), None).await.is_err());
        assert_eq!(coordinator.tracked_locks(), 0);
    }

    /// Ledger that refuses one description and delegates the rest
    struct FlakyLedger {
        inner: Arc<InMemoryRepository>,
        reject: &'static str,
    }

    #[async_trait]
    impl LedgerRepository for FlakyLedger {
        async fn commit_row(&self, row: &RawTransactionRow, tx: &Transaction) -> Result<()> {
            if tx.description == self.reject {
                return Err(Error::database("disk full"));
            }
            self.inner.commit_row(row, tx).await
        }

        async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
            self.inner.get_transaction(id).await
        }

        async fn get_transactions_by_batch(&self, batch_id: Uuid) -> Result<Vec<Transaction>> {
            self.inner.get_transactions_by_batch(batch_id).await
        }
    }

    #[tokio::test]
    async fn test_failed_commit_is_isolated_to_its_row() {
        let (store, _, account) = setup().await;
        let coordinator = ImportBatchCoordinator::from_parts(
            store.clone(),
            Arc::new(FlakyLedger {
                inner: store.clone(),
                reject: "STARBUCKS #123",
            }),
            store.clone(),
            store.clone(),
            ImportSettings::default(),
        );

        let batch = coordinator.create(upload(&account, CSV)).await.unwrap();
        let outcome = coordinator.process(batch.id, true).await.unwrap();

        assert_eq!(outcome.batch.status, BatchStatus::Completed);
        assert_eq!(outcome.committed.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].row_number, 1);

        let failed_row = &outcome.rows[0];
        assert_eq!(failed_row.status, RowStatus::Normalized);
        assert!(failed_row.transaction_id.is_none());
        assert!(failed_row.error_message.as_deref().unwrap().contains("disk full"));
    }
}
