//! Opening the same database file from several threads
//!
//! Run with: cargo test --test connection_retry_test -- --nocapture

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use tally_core::adapters::duckdb::DuckDbRepository;

#[test]
fn test_concurrent_connections() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tally.duckdb");

    {
        let repo = DuckDbRepository::new(&db_path).unwrap();
        repo.ensure_schema().unwrap();
    }

    let barrier = Arc::new(Barrier::new(3));
    let db_path = Arc::new(db_path);

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let db_path = Arc::clone(&db_path);
            thread::spawn(move || {
                barrier.wait();
                let start = Instant::now();
                match DuckDbRepository::new(&db_path) {
                    Ok(_repo) => {
                        println!("Thread {}: opened after {:?}", i, start.elapsed());
                        // Hold the connection to create contention
                        thread::sleep(Duration::from_millis(100));
                        Ok(())
                    }
                    Err(e) => Err(e.to_string()),
                }
            })
        })
        .collect();

    let failures: Vec<String> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap().err())
        .collect();
    assert!(failures.is_empty(), "connections failed: {:?}", failures);
}

#[test]
fn test_sequential_connections_keep_schema() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tally.duckdb");

    for _ in 0..5 {
        let repo = DuckDbRepository::new(&db_path).unwrap();
        repo.ensure_schema().unwrap();
        assert_eq!(repo.db_path(), Some(db_path.as_path()));
    }

    let repo = DuckDbRepository::new(&db_path).unwrap();
    let result = repo.run_migrations().unwrap();
    assert!(result.applied.is_empty(), "migrations re-ran: {:?}", result.applied);
}
