//! Deposit and withdraw commands (administrators)

use anyhow::Result;

use super::{current_identity, get_context};
use crate::output;
use teller_core::domain::TransferOutcome;

pub fn deposit(
    user: Option<&str>,
    account: &str,
    amount: &str,
    description: Option<&str>,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let identity = current_identity(&ctx, user)?;
    let outcome = ctx.transfer_service.deposit(&identity, account, amount, description)?;
    report("Deposited", &outcome, json)
}

pub fn withdraw(
    user: Option<&str>,
    account: &str,
    amount: &str,
    description: Option<&str>,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let identity = current_identity(&ctx, user)?;
    let outcome = ctx.transfer_service.withdraw(&identity, account, amount, description)?;
    report("Withdrew", &outcome, json)
}

fn report(verb: &str, outcome: &TransferOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    let tx = &outcome.transaction;
    output::success(&format!(
        "{} {} on {}",
        verb,
        output::format_money(tx.amount.abs(), &tx.currency),
        tx.account_number
    ));
    println!("  Reference:   {}", outcome.reference);
    println!(
        "  New balance: {}",
        output::format_money(outcome.new_balance, &outcome.currency)
    );
    Ok(())
}
