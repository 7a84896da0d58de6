//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod account;
mod batch;
mod row;
mod rule;
mod transaction;
pub mod result;

pub use account::{last4_digits, Account};
pub use batch::{BatchStatus, ImportBatch, StatementFormat};
pub use row::{RawRecord, RawTransactionRow, RowStatus};
pub use rule::{Category, CategoryRule, MatchField, MatchType, DEFAULT_CATEGORY, SYSTEM_CATEGORIES};
pub use transaction::{
    Direction, NormalizedTransaction, Transaction, TransactionStatus, TransactionType,
};
