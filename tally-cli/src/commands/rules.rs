//! Category rule commands

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;
use uuid::Uuid;

use tally_core::domain::{CategoryRule, MatchField, MatchType};
use tally_core::services::{NewRule, RuleUpdate};

use super::{get_context, print_json};
use crate::output;

#[derive(Subcommand)]
pub enum RulesCommands {
    /// Add a categorization rule
    Add {
        /// Category assigned when the rule matches
        #[arg(long)]
        category: String,
        /// Field to inspect (description or merchant)
        #[arg(long, default_value = "description")]
        field: String,
        /// exact, contains or regex
        #[arg(long, default_value = "contains")]
        match_type: String,
        #[arg(long)]
        pattern: String,
        /// Higher priority rules are tried first
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,
        /// Create the rule disabled
        #[arg(long)]
        inactive: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List rules in evaluation order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Change fields of an existing rule
    Update {
        id: Uuid,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        field: Option<String>,
        #[arg(long)]
        match_type: Option<String>,
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        priority: Option<i32>,
        /// Enable (true) or disable (false) the rule
        #[arg(long)]
        active: Option<bool>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a rule
    Remove {
        id: Uuid,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl RulesCommands {
    pub fn wants_json(&self) -> bool {
        match self {
            RulesCommands::Add { json, .. }
            | RulesCommands::List { json }
            | RulesCommands::Update { json, .. }
            | RulesCommands::Remove { json, .. } => *json,
        }
    }
}

pub async fn run(command: RulesCommands) -> Result<()> {
    let ctx = get_context()?;
    let user_id = ctx.config.user_id.clone();

    match command {
        RulesCommands::Add {
            category,
            field,
            match_type,
            pattern,
            priority,
            inactive,
            json,
        } => {
            let rule = ctx
                .rule_service
                .create(
                    &user_id,
                    NewRule {
                        category_id: category,
                        field: field.parse::<MatchField>()?,
                        match_type: match_type.parse::<MatchType>()?,
                        pattern,
                        priority,
                        is_active: !inactive,
                    },
                )
                .await?;

            if json {
                return print_json(&rule);
            }
            println!(
                "{} Added rule {} -> {}",
                "✓".green(),
                rule.id.to_string().bold(),
                rule.category_id
            );
        }

        RulesCommands::List { json } => {
            let rules = ctx.rule_service.list(&user_id).await?;
            if json {
                return print_json(&rules);
            }
            if rules.is_empty() {
                println!("No rules. Add one with: tally rules add --category <id> --pattern <text>");
                return Ok(());
            }
            print_rules(&rules);
        }

        RulesCommands::Update {
            id,
            category,
            field,
            match_type,
            pattern,
            priority,
            active,
            json,
        } => {
            let update = RuleUpdate {
                category_id: category,
                field: field.as_deref().map(str::parse::<MatchField>).transpose()?,
                match_type: match_type.as_deref().map(str::parse::<MatchType>).transpose()?,
                pattern,
                priority,
                is_active: active,
            };
            if update.is_empty() {
                anyhow::bail!("Nothing to update. Pass at least one of --category, --field, --match-type, --pattern, --priority, --active");
            }

            let rule = ctx.rule_service.update(id, update).await?;
            if json {
                return print_json(&rule);
            }
            output::success(&format!("Updated rule {}", rule.id));
        }

        RulesCommands::Remove { id, force, json } => {
            let rule = ctx.rule_service.get(id).await?;

            if !force && !json {
                println!(
                    "\n{}",
                    format!(
                        "Rule {} {} '{}' -> {}",
                        rule.field, rule.match_type, rule.pattern, rule.category_id
                    )
                    .yellow()
                );
                if !Confirm::new()
                    .with_prompt("Delete this rule?")
                    .default(false)
                    .interact()?
                {
                    println!("{}\n", "Cancelled".dimmed());
                    return Ok(());
                }
            }

            ctx.rule_service.delete(id).await?;
            if json {
                return print_json(&serde_json::json!({ "deleted": id }));
            }
            output::success(&format!("Removed rule {}", id));
        }
    }

    Ok(())
}

fn print_rules(rules: &[CategoryRule]) {
    let mut table = output::create_table();
    table.set_header(vec!["Rule", "Priority", "Field", "Match", "Pattern", "Category", "Active"]);
    for rule in rules {
        let active = if rule.is_active {
            comfy_table::Cell::new("yes").fg(comfy_table::Color::Green)
        } else {
            comfy_table::Cell::new("no").fg(comfy_table::Color::DarkGrey)
        };
        table.add_row(vec![
            comfy_table::Cell::new(rule.id),
            comfy_table::Cell::new(rule.priority),
            comfy_table::Cell::new(rule.field),
            comfy_table::Cell::new(rule.match_type),
            comfy_table::Cell::new(output::truncate(&rule.pattern, 32)),
            comfy_table::Cell::new(&rule.category_id),
            active,
        ]);
    }
    println!("{}", table);
}
