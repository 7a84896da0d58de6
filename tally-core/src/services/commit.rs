//! Transaction commit service - turns staged rows into ledger transactions

use std::sync::Arc;

use serde::Serialize;

use crate::domain::result::Result;
use crate::domain::{ImportBatch, RawTransactionRow, RowStatus, Transaction};
use crate::ports::{BatchRepository, LedgerRepository};

/// Why a selected row was not committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyCommitted,
    /// Normalization failed for this row
    RowError,
    /// Row has not been processed yet
    NotProcessed,
    /// No row with this number in the batch
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    pub row_number: u32,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRow {
    pub row_number: u32,
    pub error: String,
}

/// Per-row outcome of a commit run
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitReport {
    pub committed: Vec<Transaction>,
    pub skipped: Vec<SkippedRow>,
    pub failed: Vec<FailedRow>,
}

/// Commits normalized rows one at a time
///
/// Each row is written through `LedgerRepository::commit_row`, which stores
/// the transaction and the committed row together. A failing row keeps its
/// `normalized` status with the error recorded and never affects its
/// siblings. Callers serialize access per batch.
pub struct TransactionCommitService {
    batches: Arc<dyn BatchRepository>,
    ledger: Arc<dyn LedgerRepository>,
}

impl TransactionCommitService {
    pub fn new(batches: Arc<dyn BatchRepository>, ledger: Arc<dyn LedgerRepository>) -> Self {
        Self { batches, ledger }
    }

    /// Commit the selected rows of `batch`, or every row when `selection` is
    /// None. Rows are handled in row-number order and duplicates in the
    /// selection are ignored.
    pub async fn commit(
        &self,
        batch: &ImportBatch,
        selection: Option<&[u32]>,
    ) -> Result<CommitReport> {
        let rows = self.batches.get_rows(batch.id).await?;
        let mut report = CommitReport::default();

        let targets: Vec<(u32, Option<RawTransactionRow>)> = match selection {
            None => rows.into_iter().map(|r| (r.row_number, Some(r))).collect(),
            Some(numbers) => {
                let mut numbers = numbers.to_vec();
                numbers.sort_unstable();
                numbers.dedup();
                numbers
                    .into_iter()
                    .map(|n| (n, rows.iter().find(|r| r.row_number == n).cloned()))
                    .collect()
            }
        };

        for (row_number, row) in targets {
            let Some(row) = row else {
                report.skipped.push(SkippedRow {
                    row_number,
                    reason: SkipReason::NotFound,
                });
                continue;
            };
            let reason = match row.status {
                RowStatus::Normalized => None,
                RowStatus::Committed => Some(SkipReason::AlreadyCommitted),
                RowStatus::Error => Some(SkipReason::RowError),
                RowStatus::Pending => Some(SkipReason::NotProcessed),
            };
            if let Some(reason) = reason {
                report.skipped.push(SkippedRow { row_number, reason });
                continue;
            }

            match self.commit_row(batch, row).await {
                Ok(tx) => report.committed.push(tx),
                Err(error) => report.failed.push(FailedRow { row_number, error }),
            }
        }

        tracing::info!(
            batch_id = %batch.id,
            committed = report.committed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "commit finished"
        );
        Ok(report)
    }

    async fn commit_row(
        &self,
        batch: &ImportBatch,
        row: RawTransactionRow,
    ) -> std::result::Result<Transaction, String> {
        let Some(normalized) = row.normalized.as_ref() else {
            return Err("row has no normalized projection".to_string());
        };
        let tx = Transaction::from_import(batch, &row, normalized);

        let mut committed = row.clone();
        if let Err(e) = committed.mark_committed(tx.id) {
            return Err(e.to_string());
        }

        match self.ledger.commit_row(&committed, &tx).await {
            Ok(()) => Ok(tx),
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(batch_id = %batch.id, row_number = row.row_number, error = %message, "commit failed");
                let mut failed = row;
                failed.record_commit_failure(message.clone());
                if let Err(update_err) = self.batches.update_row(&failed).await {
                    tracing::warn!(batch_id = %batch.id, row_number = failed.row_number, error = %update_err, "could not record commit failure");
                }
                Err(message)
            }
        }
    }
}
