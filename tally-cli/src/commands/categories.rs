//! Categories command

use anyhow::Result;

use tally_core::ports::CategoryRegistry;

use super::{get_context, print_json};
use crate::output;

pub async fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let categories = ctx.repository.list_categories().await?;

    if json {
        return print_json(&categories);
    }

    let mut table = output::create_table();
    table.set_header(vec!["Id", "Name", "Kind"]);
    for category in &categories {
        table.add_row(vec![
            category.id.as_str(),
            category.name.as_str(),
            if category.is_system { "system" } else { "custom" },
        ]);
    }
    println!("{}", table);
    Ok(())
}
