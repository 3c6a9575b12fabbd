//! History command - recent transactions, or a CSV statement

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::Cell;

use super::{current_identity, get_context};
use crate::output;

pub fn run(
    user: Option<&str>,
    account: Option<&str>,
    limit: usize,
    csv: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let identity = current_identity(&ctx, user)?;

    if let Some(path) = csv {
        let account = match account {
            Some(number) => number.to_string(),
            None => {
                let me = ctx.user_service.get_user(&identity, identity.user_id)?;
                me.primary_account()
                    .map(|a| a.account_number.clone())
                    .ok_or_else(|| anyhow::anyhow!("No account is open for this user"))?
            }
        };
        let rows = ctx.statement_service.export_csv(&identity, &account, &path)?;
        output::success(&format!("Wrote {} transaction(s) to {}", rows, path.display()));
        return Ok(());
    }

    let transactions = ctx.transfer_service.history(&identity, account, Some(limit))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&transactions)?);
        return Ok(());
    }

    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Date", "Reference", "Type", "Description", "Amount", "Balance"]);
    for tx in &transactions {
        let mut date = output::format_time(tx.created_at);
        if tx.original_date.is_some() {
            date.push_str(" *");
        }
        table.add_row(vec![
            Cell::new(date),
            Cell::new(&tx.reference),
            Cell::new(tx.transaction_type.as_str()),
            Cell::new(&tx.description),
            output::money_cell(tx.amount, &tx.currency),
            output::money_cell(tx.balance_after, &tx.currency),
        ]);
    }
    println!("{}", table);

    if transactions.iter().any(|tx| tx.original_date.is_some()) {
        println!();
        output::info("* date corrected by an administrator");
    }
    Ok(())
}
