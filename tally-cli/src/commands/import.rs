//! Import commands - create, process, confirm and inspect import batches

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;
use serde::Serialize;
use uuid::Uuid;

use tally_core::domain::{BatchStatus, ImportBatch, RawTransactionRow, Transaction};
use tally_core::ports::{BatchFilter, Pagination, DEFAULT_PAGE_LIMIT};
use tally_core::services::{ConfirmOutcome, NewImport, ProcessOutcome, RowSummary};

use super::{get_context, print_json, read_stdin_list};
use crate::output;

#[derive(Subcommand)]
pub enum ImportCommands {
    /// Upload a statement file and stage its rows
    Create {
        /// Statement file (csv, txt, xlsx, xls)
        file: PathBuf,
        /// Account the statement belongs to
        #[arg(long)]
        account_id: Uuid,
        /// Statement format (generic_csv, cibc_credit, rbc_checking, excel); inferred when omitted
        #[arg(long)]
        format: Option<String>,
        /// Import profile from settings.json
        #[arg(long)]
        profile: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Normalize and categorize the staged rows of a batch
    Process {
        batch_id: Uuid,
        /// Commit every normalized row right away
        #[arg(long)]
        auto_create: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Commit rows of a processed batch to the ledger
    Confirm {
        batch_id: Uuid,
        /// Row numbers to commit (all normalized rows when omitted)
        #[arg(long, value_delimiter = ',')]
        rows: Vec<u32>,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a batch with its rows
    Show {
        batch_id: Uuid,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List batches, newest first
    List {
        #[arg(long)]
        account_id: Option<Uuid>,
        /// pending, processing, completed or error
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl ImportCommands {
    pub fn wants_json(&self) -> bool {
        match self {
            ImportCommands::Create { json, .. }
            | ImportCommands::Process { json, .. }
            | ImportCommands::Confirm { json, .. }
            | ImportCommands::Show { json, .. }
            | ImportCommands::List { json, .. } => *json,
        }
    }
}

pub async fn run(command: ImportCommands) -> Result<()> {
    match command {
        ImportCommands::Create { file, account_id, format, profile, json } => {
            create(file, account_id, format, profile, json).await
        }
        ImportCommands::Process { batch_id, auto_create, json } => {
            process(batch_id, auto_create, json).await
        }
        ImportCommands::Confirm { batch_id, rows, yes, json } => {
            confirm(batch_id, rows, yes, json).await
        }
        ImportCommands::Show { batch_id, json } => show(batch_id, json).await,
        ImportCommands::List { account_id, status, offset, limit, json } => {
            list(account_id, status, offset, limit, json).await
        }
    }
}

async fn create(
    file: PathBuf,
    account_id: Uuid,
    format: Option<String>,
    profile: Option<String>,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;

    let bytes = std::fs::read(&file).with_context(|| format!("Failed to read {:?}", file))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let batch = ctx
        .coordinator
        .create(NewImport {
            file_name,
            bytes,
            account_id,
            user_id: ctx.config.user_id.clone(),
            format,
            profile,
        })
        .await?;

    if json {
        return print_json(&batch);
    }

    println!(
        "{} Created batch {} ({} rows, {})",
        "✓".green(),
        batch.id.to_string().bold(),
        batch.row_count,
        batch
            .statement_format
            .map(|f| f.as_str())
            .unwrap_or("unknown format")
    );
    println!(
        "{}",
        format!("Next: tally import process {}", batch.id).dimmed()
    );
    Ok(())
}

async fn process(batch_id: Uuid, auto_create: bool, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let outcome = ctx.coordinator.process(batch_id, auto_create).await?;

    if json {
        return print_json(&outcome);
    }

    print_rows(&outcome.rows);
    for warning in &outcome.warnings {
        output::warning(&format!("warning: {}", warning));
    }
    print_process_summary(&outcome);
    Ok(())
}

fn print_process_summary(outcome: &ProcessOutcome) {
    let summary = outcome.summary();
    println!();
    println!(
        "Batch {}: {} normalized, {} errors, {} committed",
        outcome.batch.id,
        summary.normalized,
        summary.errors,
        summary.committed
    );
    if summary.nothing_usable() {
        output::warning("No rows could be normalized; check the statement format and date formats.");
    }
    if !outcome.committed.is_empty() {
        output::success(&format!("Committed {} transaction(s)", outcome.committed.len()));
    }
    for failed in &outcome.failed {
        output::error(&format!("  row {}: {}", failed.row_number, failed.error));
    }
}

async fn confirm(batch_id: Uuid, rows: Vec<u32>, yes: bool, json: bool) -> Result<()> {
    let ctx = get_context()?;

    let rows = if rows.is_empty() {
        read_stdin_list()?
            .iter()
            .map(|r| {
                r.parse::<u32>()
                    .with_context(|| format!("Invalid row number: {}", r))
            })
            .collect::<Result<Vec<u32>>>()?
    } else {
        rows
    };

    let selection = if rows.is_empty() {
        if !yes && !json {
            let batch = ctx.coordinator.get(batch_id).await?;
            let summary = RowSummary::of(&ctx.coordinator.rows(batch_id).await?);
            println!(
                "\n{}",
                format!(
                    "This will commit {} normalized row(s) from '{}'.",
                    summary.normalized, batch.file_name
                )
                .yellow()
            );
            if !Confirm::new()
                .with_prompt("Commit all rows?")
                .default(false)
                .interact()?
            {
                println!("{}\n", "Cancelled".dimmed());
                return Ok(());
            }
        }
        None
    } else {
        Some(rows)
    };

    let outcome = ctx.coordinator.confirm(batch_id, selection).await?;

    if json {
        print_json(&outcome)?;
    } else {
        print_confirm_outcome(&outcome);
    }

    if !outcome.failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_confirm_outcome(outcome: &ConfirmOutcome) {
    if !outcome.committed.is_empty() {
        print_transactions(&outcome.committed);
        println!(
            "{} Committed {} transaction(s)",
            "✓".green(),
            outcome.committed.len()
        );
    } else {
        println!("{}", "Nothing to commit".dimmed());
    }

    if !outcome.skipped.is_empty() {
        let skipped: Vec<String> = outcome
            .skipped
            .iter()
            .map(|s| format!("{} ({})", s.row_number, serde_label(&s.reason)))
            .collect();
        println!("{}", format!("Skipped rows: {}", skipped.join(", ")).dimmed());
    }

    if !outcome.failed.is_empty() {
        println!();
        println!("{} Failed to commit {} row(s)", "✗".red(), outcome.failed.len());
        for failed in &outcome.failed {
            println!("  row {}: {}", failed.row_number, failed.error);
        }
    }
}

async fn show(batch_id: Uuid, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let batch = ctx.coordinator.get(batch_id).await?;
    let rows = ctx.coordinator.rows(batch_id).await?;

    if json {
        #[derive(Serialize)]
        struct BatchDetail<'a> {
            batch: &'a ImportBatch,
            summary: RowSummary,
            rows: &'a [RawTransactionRow],
        }
        return print_json(&BatchDetail {
            batch: &batch,
            summary: RowSummary::of(&rows),
            rows: &rows,
        });
    }

    print_batch(&batch);
    if !rows.is_empty() {
        println!();
        print_rows(&rows);
    }
    let summary = RowSummary::of(&rows);
    println!(
        "\n{} rows: {} pending, {} normalized, {} errors, {} committed",
        summary.total, summary.pending, summary.normalized, summary.errors, summary.committed
    );
    Ok(())
}

async fn list(
    account_id: Option<Uuid>,
    status: Option<String>,
    offset: u32,
    limit: u32,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let filter = BatchFilter {
        account_id,
        status: status.as_deref().map(str::parse::<BatchStatus>).transpose()?,
        file_sha256: None,
    };
    let batches = ctx
        .coordinator
        .list(&filter, Pagination { offset, limit })
        .await?;

    if json {
        return print_json(&batches);
    }

    if batches.is_empty() {
        println!("No import batches.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Batch", "File", "Format", "Status", "Rows", "Created"]);
    for batch in &batches {
        table.add_row(vec![
            comfy_table::Cell::new(batch.id),
            comfy_table::Cell::new(output::truncate(&batch.file_name, 32)),
            comfy_table::Cell::new(batch.statement_format.map(|f| f.as_str()).unwrap_or("-")),
            output::batch_status_cell(batch.status),
            comfy_table::Cell::new(format!("{}/{}", batch.processed_count, batch.row_count)),
            comfy_table::Cell::new(batch.created_at.format("%Y-%m-%d %H:%M")),
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn print_batch(batch: &ImportBatch) {
    println!("{} {}", "Batch".bold(), batch.id);
    println!("  File:    {}", batch.file_name);
    println!(
        "  Format:  {}",
        batch.statement_format.map(|f| f.as_str()).unwrap_or("-")
    );
    println!("  Account: {}", batch.account_id);
    println!("  Status:  {}", batch.status);
    println!("  Rows:    {}/{} processed", batch.processed_count, batch.row_count);
    if let Some(message) = &batch.error_message {
        println!("  Error:   {}", message.red());
    }
}

fn print_rows(rows: &[RawTransactionRow]) {
    let mut table = output::create_table();
    table.set_header(vec!["#", "Status", "Date", "Amount", "Description", "Category"]);
    for row in rows {
        let mut cells = vec![
            comfy_table::Cell::new(row.row_number),
            output::row_status_cell(row.status),
        ];
        match &row.normalized {
            Some(tx) => {
                cells.push(comfy_table::Cell::new(tx.transaction_date));
                cells.push(output::amount_cell(tx.amount, tx.direction, &tx.currency));
                cells.push(comfy_table::Cell::new(output::truncate(&tx.description, 40)));
                cells.push(comfy_table::Cell::new(&tx.category_id));
            }
            None => {
                cells.push(comfy_table::Cell::new("-"));
                cells.push(comfy_table::Cell::new("-"));
                cells.push(comfy_table::Cell::new(
                    row.error_message.as_deref().unwrap_or("-"),
                ));
                cells.push(comfy_table::Cell::new("-"));
            }
        }
        table.add_row(cells);
    }
    println!("{}", table);
}

fn print_transactions(transactions: &[Transaction]) {
    let mut table = output::create_table();
    table.set_header(vec!["Transaction", "Date", "Amount", "Description", "Category"]);
    for tx in transactions {
        table.add_row(vec![
            comfy_table::Cell::new(tx.id),
            comfy_table::Cell::new(tx.transaction_date),
            output::amount_cell(tx.amount, tx.direction, &tx.currency),
            comfy_table::Cell::new(output::truncate(&tx.description, 40)),
            comfy_table::Cell::new(&tx.category_id),
        ]);
    }
    println!("{}", table);
}

/// Snake-case label a serde enum serializes to
fn serde_label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}
