//! Tally Core - bank statement import pipeline
//!
//! This crate implements the import pipeline following hexagonal architecture:
//!
//! - **domain**: Core entities (ImportBatch, RawTransactionRow, Transaction, ...)
//! - **ports**: Trait definitions for storage, registries and statement decoders
//! - **services**: Normalizer, rule engine, batch coordinator and commit service
//! - **adapters**: Concrete implementations (DuckDB, in-memory, CSV, Excel)

pub mod domain;
pub mod ports;
pub mod services;
pub mod adapters;
pub mod config;
pub mod migrations;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use adapters::duckdb::DuckDbRepository;
use config::Config;
use services::{CategoryRuleService, ImportBatchCoordinator};

// Re-export commonly used types at crate root
pub use domain::{
    Account, BatchStatus, Category, CategoryRule, ImportBatch, RawTransactionRow, RowStatus,
    StatementFormat, Transaction,
};
pub use domain::result::{Error, OperationResult};

/// Database file inside the tally directory
pub const DB_FILENAME: &str = "tally.duckdb";

/// Main context for Tally operations
///
/// Holds the configuration, the database and the services built on it.
pub struct TallyContext {
    pub config: Config,
    pub repository: Arc<DuckDbRepository>,
    pub coordinator: ImportBatchCoordinator,
    pub rule_service: CategoryRuleService,
}

impl TallyContext {
    /// Open the tally directory, creating the database on first use
    pub fn new(tally_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(tally_dir)?;
        let config = Config::load(tally_dir)?;

        let repository = Arc::new(DuckDbRepository::new(&tally_dir.join(DB_FILENAME))?);
        repository.ensure_schema()?;

        let coordinator =
            ImportBatchCoordinator::new(Arc::clone(&repository), config.import.clone());
        let rule_service = CategoryRuleService::new(repository.clone(), repository.clone());

        Ok(Self {
            config,
            repository,
            coordinator,
            rule_service,
        })
    }
}
