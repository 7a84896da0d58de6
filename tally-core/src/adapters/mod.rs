//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for every storage and registry port
//! - An in-memory store with the same ports, for tests and embedding
//! - CSV and Excel decoders for the statement decoder port

pub mod duckdb;
pub mod memory;
pub mod statement;
