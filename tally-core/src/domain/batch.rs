//! Import batch domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::{Error, Result};

/// Lifecycle of an import batch
///
/// `pending -> processing -> completed | error`. A batch may also go straight
/// from `pending` to `error` when decoding fails. `completed` and `error` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Whether moving to `next` keeps the lifecycle monotonic
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Error)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Error)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(Error::validation(format!("Unknown batch status: {}", other))),
        }
    }
}

/// Statement layouts the decoder registry knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementFormat {
    /// Any CSV with a header row
    GenericCsv,
    /// CIBC credit card export: headerless `date, description, debit, credit, card`
    CibcCredit,
    /// RBC chequing export with its fixed header row
    RbcChecking,
    /// First worksheet of an xlsx/xls workbook
    Excel,
}

impl StatementFormat {
    pub const ALL: [StatementFormat; 4] = [
        Self::GenericCsv,
        Self::CibcCredit,
        Self::RbcChecking,
        Self::Excel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenericCsv => "generic_csv",
            Self::CibcCredit => "cibc_credit",
            Self::RbcChecking => "rbc_checking",
            Self::Excel => "excel",
        }
    }

    /// Formats with dedicated debit/credit columns, where the column decides
    /// the direction instead of the sign.
    pub fn has_debit_credit_columns(&self) -> bool {
        matches!(self, Self::CibcCredit)
    }

    /// Credit card statements report charges as debits and card payments as
    /// credits.
    pub fn is_credit_card(&self) -> bool {
        matches!(self, Self::CibcCredit)
    }
}

impl fmt::Display for StatementFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatementFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "generic_csv" | "csv" => Ok(Self::GenericCsv),
            "cibc_credit" => Ok(Self::CibcCredit),
            "rbc_checking" => Ok(Self::RbcChecking),
            "excel" | "xlsx" | "xls" => Ok(Self::Excel),
            _ => Err(Error::UnsupportedFormat {
                batch_id: None,
                format: s.to_string(),
            }),
        }
    }
}

/// One uploaded statement file and its processing state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: Uuid,
    pub user_id: String,
    pub account_id: Uuid,
    pub file_name: String,
    /// None when no decoder could be chosen for the upload
    pub statement_format: Option<StatementFormat>,
    /// Named import profile used to decode and normalize the file
    pub profile: Option<String>,
    /// Hex SHA-256 of the uploaded bytes
    pub file_sha256: String,
    pub status: BatchStatus,
    pub error_message: Option<String>,
    pub row_count: u32,
    pub processed_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportBatch {
    pub fn new(
        user_id: &str,
        account_id: Uuid,
        file_name: &str,
        statement_format: Option<StatementFormat>,
        file_sha256: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            account_id,
            file_name: file_name.to_string(),
            statement_format,
            profile: None,
            file_sha256,
            status: BatchStatus::Pending,
            error_message: None,
            row_count: 0,
            processed_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting transitions that would break monotonicity
    pub fn transition(&mut self, next: BatchStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::invalid_state(format!(
                "Batch {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the batch as failed. Completed batches are never resurrected
    /// into `error`; the message is dropped in that case.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.status.can_transition_to(BatchStatus::Error) {
            self.status = BatchStatus::Error;
            self.error_message = Some(message.into());
            self.updated_at = Utc::now();
        }
    }

    /// Count one more attempted row
    pub fn record_processed(&mut self) {
        self.processed_count = self.processed_count.saturating_add(1).min(self.row_count);
        self.updated_at = Utc::now();
    }
}
