//! Transaction domain models
//!
//! `NormalizedTransaction` is the staged projection held on a raw row until
//! it is committed. `Transaction` is the committed ledger entry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::batch::ImportBatch;
use super::result::{Error, Result};
use super::row::RawTransactionRow;

/// Which way money moved relative to the owning account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inflow,
    Outflow,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inflow => "inflow",
            Self::Outflow => "outflow",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inflow" => Ok(Self::Inflow),
            "outflow" => Ok(Self::Outflow),
            other => Err(Error::validation(format!("Unknown direction: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Expense,
    Income,
    TransferIn,
    TransferOut,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Income => "income",
            Self::TransferIn => "transfer_in",
            Self::TransferOut => "transfer_out",
            Self::Refund => "refund",
        }
    }

    /// Default type for a direction when nothing more specific is known
    pub fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::Inflow => Self::Income,
            Direction::Outflow => Self::Expense,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "expense" => Ok(Self::Expense),
            "income" => Ok(Self::Income),
            "transfer_in" => Ok(Self::TransferIn),
            "transfer_out" => Ok(Self::TransferOut),
            "refund" => Ok(Self::Refund),
            other => Err(Error::validation(format!("Unknown transaction type: {}", other))),
        }
    }
}

/// Candidate transaction produced by the normalizer
///
/// `amount` is never negative; the sign lives in `direction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTransaction {
    pub transaction_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_date: Option<NaiveDate>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
    pub amount: Decimal,
    pub direction: Direction,
    pub transaction_type: TransactionType,
    pub currency: String,
    pub category_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_last4: Option<String>,
    /// Last four digits of the account number printed on the statement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_fragment: Option<String>,
    /// Whether the card or account fragment matched the owning account.
    /// None when the statement carried no fragment. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_matched: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(Error::validation(format!("Unknown transaction status: {}", other))),
        }
    }
}

/// A committed ledger transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: String,
    pub account_id: Uuid,
    /// Counterpart account for transfers, when known
    pub linked_account_id: Option<Uuid>,
    pub import_batch_id: Uuid,
    pub raw_row_id: Uuid,
    pub transaction_date: NaiveDate,
    pub transaction_time: Option<NaiveTime>,
    pub posted_date: Option<NaiveDate>,
    pub amount: Decimal,
    pub direction: Direction,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub category_id: String,
    pub merchant: Option<String>,
    pub description: String,
    pub notes: Option<String>,
    pub status: TransactionStatus,
    pub tags: Vec<String>,
    /// Original raw row under `raw`, plus statement fragments
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Build the ledger entry for a staged row
    pub fn from_import(
        batch: &ImportBatch,
        row: &RawTransactionRow,
        normalized: &NormalizedTransaction,
    ) -> Self {
        let mut metadata = serde_json::json!({
            "raw": row.raw,
            "row_number": row.row_number,
            "source_file": batch.file_name,
        });
        if let Some(format) = batch.statement_format {
            metadata["statement_format"] = serde_json::json!(format.as_str());
        }
        if let Some(last4) = &normalized.card_last4 {
            metadata["card_last_4"] = serde_json::json!(last4);
        }
        if let Some(fragment) = &normalized.account_fragment {
            metadata["account_number"] = serde_json::json!(format!("****{}", fragment));
        }
        if let Some(matched) = normalized.fragment_matched {
            metadata["fragment_matched"] = serde_json::json!(matched);
        }

        Self {
            id: Uuid::new_v4(),
            user_id: batch.user_id.clone(),
            account_id: batch.account_id,
            linked_account_id: None,
            import_batch_id: batch.id,
            raw_row_id: row.id,
            transaction_date: normalized.transaction_date,
            transaction_time: normalized.transaction_time,
            posted_date: normalized.posted_date,
            amount: normalized.amount,
            direction: normalized.direction,
            currency: normalized.currency.clone(),
            transaction_type: normalized.transaction_type,
            category_id: normalized.category_id.clone(),
            merchant: normalized.merchant.clone(),
            description: normalized.description.clone(),
            notes: None,
            status: TransactionStatus::Pending,
            tags: Vec::new(),
            metadata,
            created_at: Utc::now(),
        }
    }
}
