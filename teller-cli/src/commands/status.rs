//! Status command - balances, and ledger counts for administrators

use anyhow::Result;
use colored::Colorize;
use comfy_table::Cell;

use super::{current_identity, get_context};
use crate::output;

pub fn run(user: Option<&str>, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let identity = current_identity(&ctx, user)?;
    let status = ctx.status_service.get_status(&identity)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "Ledger Status".bold());
    println!();

    let mut table = output::create_table();
    table.set_header(vec!["Account", "Name", "Balance"]);
    for line in &status.accounts {
        table.add_row(vec![
            Cell::new(&line.account_number),
            Cell::new(&line.name),
            output::money_cell(line.balance, &line.currency),
        ]);
    }
    println!("{}", table);
    println!("{} account(s)", status.total_accounts);

    if let Some(counts) = &status.counts {
        println!();
        let mut table = output::create_table();
        table.add_row(vec!["Users", &counts.users.to_string()]);
        table.add_row(vec!["Transactions", &counts.transactions.to_string()]);
        table.add_row(vec!["Receipts", &counts.receipts.to_string()]);
        table.add_row(vec!["Summaries", &counts.summaries.to_string()]);
        table.add_row(vec!["Pending OTPs", &counts.pending_otps.to_string()]);
        table.add_row(vec!["Deleted (archived)", &counts.deleted_transactions.to_string()]);
        if let Some(size) = status.db_size_bytes {
            table.add_row(vec!["Database size".to_string(), output::format_size(size)]);
        }
        println!("{}", table);
    }

    Ok(())
}
