//! CLI command implementations

pub mod account;
pub mod categories;
pub mod import;
pub mod rules;

use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tally_core::TallyContext;

/// Get the tally directory from environment or default
pub fn get_tally_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("TALLY_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".tally"))
        .context("Could not find home directory; set TALLY_DIR")
}

/// Open the tally context, creating the directory and database if needed
pub fn get_context() -> Result<TallyContext> {
    let tally_dir = get_tally_dir()?;
    tracing::debug!(dir = %tally_dir.display(), "opening tally directory");

    std::fs::create_dir_all(&tally_dir)
        .with_context(|| format!("Failed to create tally directory: {:?}", tally_dir))?;

    TallyContext::new(&tally_dir).context("Failed to initialize tally context")
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Read a list of values piped on stdin
///
/// Values are newline separated when the input spans several lines, comma
/// separated otherwise. Returns an empty list when stdin is a terminal.
pub fn read_stdin_list() -> Result<Vec<String>> {
    if !atty::isnt(atty::Stream::Stdin) {
        return Ok(Vec::new());
    }
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    Ok(split_list(&buffer))
}

fn split_list(input: &str) -> Vec<String> {
    let trimmed = input.trim();
    let parts: Box<dyn Iterator<Item = &str>> = if trimmed.contains('\n') {
        Box::new(trimmed.lines())
    } else {
        Box::new(trimmed.split(','))
    };
    parts
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
