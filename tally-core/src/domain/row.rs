//! Raw statement row staged inside a batch

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::{Error, Result};
use super::transaction::NormalizedTransaction;

/// Column name to cell text, exactly as decoded
pub type RawRecord = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Pending,
    Normalized,
    Error,
    Committed,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Normalized => "normalized",
            Self::Error => "error",
            Self::Committed => "committed",
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "normalized" => Ok(Self::Normalized),
            "error" => Ok(Self::Error),
            "committed" => Ok(Self::Committed),
            other => Err(Error::validation(format!("Unknown row status: {}", other))),
        }
    }
}

/// One decoded data row
///
/// `transaction_id` is set exactly when `status` is `committed`, and a row is
/// committed at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransactionRow {
    pub id: Uuid,
    pub batch_id: Uuid,
    /// 1-based position of the data row in the source file
    pub row_number: u32,
    pub raw: RawRecord,
    pub normalized: Option<NormalizedTransaction>,
    pub status: RowStatus,
    pub error_message: Option<String>,
    pub transaction_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RawTransactionRow {
    pub fn new(batch_id: Uuid, row_number: u32, raw: RawRecord) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            batch_id,
            row_number,
            raw,
            normalized: None,
            status: RowStatus::Pending,
            error_message: None,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_normalized(&mut self, normalized: NormalizedTransaction) {
        self.normalized = Some(normalized);
        self.status = RowStatus::Normalized;
        self.error_message = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.normalized = None;
        self.status = RowStatus::Error;
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
    }

    /// Flip a normalized row to committed
    pub fn mark_committed(&mut self, transaction_id: Uuid) -> Result<()> {
        if self.status != RowStatus::Normalized {
            return Err(Error::invalid_state(format!(
                "Row {} is {} and cannot be committed",
                self.row_number, self.status
            )));
        }
        self.status = RowStatus::Committed;
        self.transaction_id = Some(transaction_id);
        self.error_message = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a failed commit attempt. The row stays staged so a later
    /// confirmation can retry it.
    pub fn record_commit_failure(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
    }
}
