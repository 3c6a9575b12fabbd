//! Lookup command - status and receipt of a reference

use anyhow::Result;
use colored::Colorize;
use comfy_table::Cell;
use serde_json::json;

use super::{current_identity, get_context};
use crate::output;
use teller_core::domain::TransactionStatus;
use teller_core::OperationResult;

pub fn run(user: Option<&str>, reference: &str, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let identity = current_identity(&ctx, user)?;
    let status = ctx.transfer_service.status(&identity, reference);

    if json {
        let receipt = ctx.transfer_service.receipt(&identity, reference).ok();
        let result = OperationResult::from(
            status.map(|status| json!({ "status": status, "receipt": receipt })),
        );
        println!("{}", serde_json::to_string_pretty(&result)?);
        if !result.success {
            std::process::exit(1);
        }
        return Ok(());
    }

    let status = status?;
    let receipt = ctx.transfer_service.receipt(&identity, reference).ok();
    let label = match status.status {
        TransactionStatus::Completed => status.status.as_str().green(),
        _ => status.status.as_str().yellow(),
    };
    println!("{} {}", status.reference.bold(), label);
    println!();

    let mut table = output::create_table();
    table.add_row(vec![Cell::new("Account"), Cell::new(&status.account_number)]);
    table.add_row(vec![
        Cell::new("Type"),
        Cell::new(status.transaction_type.as_str()),
    ]);
    table.add_row(vec![
        Cell::new("Amount"),
        output::money_cell(status.amount, &status.currency),
    ]);
    table.add_row(vec![
        Cell::new("Balance after"),
        output::money_cell(status.balance_after, &status.currency),
    ]);
    table.add_row(vec![Cell::new("Date"), Cell::new(output::format_time(status.created_at))]);
    if let Some(receipt) = &receipt {
        table.add_row(vec![Cell::new("Description"), Cell::new(&receipt.description)]);
        if let Some(counterparty) = &receipt.counterparty {
            table.add_row(vec![Cell::new("Counterparty"), Cell::new(counterparty)]);
        }
    }
    println!("{}", table);

    if receipt.is_none() {
        output::warning("No receipt is stored for this reference, run `teller doctor`");
    }
    Ok(())
}
