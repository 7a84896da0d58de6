//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The core domain
//! depends only on these traits, not on concrete implementations.

mod decoder;
mod repository;

pub use decoder::{DecodeError, RowStream, StatementDecoder};
pub use repository::{
    AccountRegistry, BatchFilter, BatchRepository, CategoryRegistry, ImportStore,
    LedgerRepository, Pagination, RuleRepository, DEFAULT_PAGE_LIMIT,
};
