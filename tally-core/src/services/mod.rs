//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on one stage of the import pipeline.

mod categorizer;
mod commit;
mod coordinator;
pub mod migration;
mod normalizer;
mod rules;

pub use categorizer::{rule_matches, CategoryRuleEngine};
pub use commit::{CommitReport, FailedRow, SkipReason, SkippedRow, TransactionCommitService};
pub use coordinator::{ConfirmOutcome, ImportBatchCoordinator, NewImport, ProcessOutcome, RowSummary};
pub use migration::{MigrationResult, MigrationService};
pub use normalizer::{parse_amount, parse_date, FieldNormalizer, RowError};
pub use rules::{CategoryRuleService, NewRule, RuleUpdate};
