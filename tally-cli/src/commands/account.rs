//! Account commands

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use uuid::Uuid;

use tally_core::domain::Account;
use tally_core::ports::AccountRegistry;

use super::{get_context, print_json};
use crate::output;

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Register an account to import statements into
    Add {
        #[arg(long)]
        name: String,
        /// ISO 4217 currency code
        #[arg(long, default_value = "USD")]
        currency: String,
        /// Account number as printed on statements (masked is fine)
        #[arg(long)]
        account_number: Option<String>,
        /// Last four digits of the card
        #[arg(long)]
        card_last4: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List accounts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl AccountCommands {
    pub fn wants_json(&self) -> bool {
        match self {
            AccountCommands::Add { json, .. } | AccountCommands::List { json } => *json,
        }
    }
}

pub async fn run(command: AccountCommands) -> Result<()> {
    let ctx = get_context()?;

    match command {
        AccountCommands::Add {
            name,
            currency,
            account_number,
            card_last4,
            json,
        } => {
            let mut account = Account::new(Uuid::new_v4(), name).with_currency(&currency);
            if let Some(number) = account_number.as_deref() {
                account = account.with_account_number(number);
            }
            if let Some(last4) = card_last4.as_deref() {
                if last4.len() != 4 || !last4.chars().all(|c| c.is_ascii_digit()) {
                    anyhow::bail!("--card-last4 must be exactly four digits");
                }
                account = account.with_card_last4(last4);
            }

            ctx.repository.add_account(&account).await?;

            if json {
                return print_json(&account);
            }
            println!(
                "{} Added account {} ({})",
                "✓".green(),
                account.name.bold(),
                account.id
            );
        }

        AccountCommands::List { json } => {
            let accounts = ctx.repository.list_accounts().await?;
            if json {
                return print_json(&accounts);
            }
            if accounts.is_empty() {
                output::info("No accounts. Add one with: tally account add --name <name>");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Account", "Name", "Currency", "Number", "Card"]);
            for account in &accounts {
                table.add_row(vec![
                    account.id.to_string(),
                    account.name.clone(),
                    account.currency.clone(),
                    account
                        .account_number_last4()
                        .map(|d| format!("****{}", d))
                        .unwrap_or_else(|| "-".to_string()),
                    account.card_last4.clone().unwrap_or_else(|| "-".to_string()),
                ]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}
