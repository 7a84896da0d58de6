//! Output formatting utilities

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use rust_decimal::Decimal;
use tally_core::domain::{BatchStatus, Direction, RowStatus};

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{}", msg.yellow());
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{}", msg.cyan());
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Signed amount cell: outflows red with a minus sign, inflows green
pub fn amount_cell(amount: Decimal, direction: Direction, currency: &str) -> Cell {
    match direction {
        Direction::Outflow => Cell::new(format!("-{} {}", amount, currency)).fg(Color::Red),
        Direction::Inflow => Cell::new(format!("{} {}", amount, currency)).fg(Color::Green),
    }
}

pub fn batch_status_cell(status: BatchStatus) -> Cell {
    let color = match status {
        BatchStatus::Pending => Color::Yellow,
        BatchStatus::Processing => Color::Cyan,
        BatchStatus::Completed => Color::Green,
        BatchStatus::Error => Color::Red,
    };
    Cell::new(status.as_str()).fg(color)
}

pub fn row_status_cell(status: RowStatus) -> Cell {
    let color = match status {
        RowStatus::Pending => Color::Yellow,
        RowStatus::Normalized => Color::Cyan,
        RowStatus::Committed => Color::Green,
        RowStatus::Error => Color::Red,
    };
    Cell::new(status.as_str()).fg(color)
}

/// Shorten long text for table cells
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}
