//! Admin command - ledger corrections and maintenance

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use comfy_table::{Cell, Color};
use dialoguer::Confirm;
use uuid::Uuid;

use super::{current_identity, get_context};
use crate::output;
use teller_core::domain::{money, parse_date};
use teller_core::{Identity, TellerContext, Transaction};

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Move a transaction to an earlier date
    Backdate {
        /// Transaction id or reference
        transaction: String,
        /// New date (YYYY-MM-DD, YYYY-MM-DD HH:MM:SS or RFC 3339)
        date: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a transaction, keeping an archived copy
    Delete {
        /// Transaction id or reference
        transaction: String,
        #[arg(long)]
        reason: String,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Put a deleted transaction back
    Restore {
        /// Transaction id (see `admin deleted`)
        transaction: Uuid,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List archived (deleted) transactions
    Deleted {
        /// Include entries that were already restored
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Recompute balances and summaries from the transaction log
    Reconcile {
        /// Account number
        account: Option<String>,
        /// Every account in the bank
        #[arg(long, conflicts_with = "account")]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List registered users
    Users {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove expired verification codes
    PurgeOtps,
}

/// Accept either a transaction id or its reference
fn resolve_transaction(ctx: &TellerContext, identity: &Identity, target: &str) -> Result<Uuid> {
    match Uuid::parse_str(target.trim()) {
        Ok(id) => Ok(id),
        Err(_) => Ok(ctx.admin_service.find_by_reference(identity, target)?.id),
    }
}

fn print_transaction(tx: &Transaction) {
    println!("  Reference: {}", tx.reference.bold());
    println!("  Account:   {}", tx.account_number);
    println!("  Amount:    {}", output::format_money(tx.amount, &tx.currency));
    println!("  Date:      {}", output::format_time(tx.created_at));
    if let Some(original) = tx.original_date {
        println!("  Original:  {}", output::format_time(original));
    }
}

pub fn run(user: Option<&str>, command: AdminCommands) -> Result<()> {
    let ctx = get_context()?;
    let identity = current_identity(&ctx, user)?;
    identity.require_admin()?;

    match command {
        AdminCommands::Backdate { transaction, date, json } => {
            let id = resolve_transaction(&ctx, &identity, &transaction)?;
            let new_date = parse_date(&date)?;
            let tx = ctx.admin_service.backdate(&identity, id, new_date)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tx)?);
            } else {
                output::success("Transaction backdated");
                print_transaction(&tx);
            }
        }
        AdminCommands::Delete { transaction, reason, force, json } => {
            let id = resolve_transaction(&ctx, &identity, &transaction)?;
            if !force && !json {
                let confirmed = Confirm::new()
                    .with_prompt(format!("Delete transaction {}?", transaction))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
            let archived = ctx.admin_service.delete(&identity, id, &reason)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&archived)?);
            } else {
                output::success("Transaction deleted and archived");
                print_transaction(&archived.transaction);
                output::warning(&format!(
                    "The balance of {} is unchanged; run `teller admin reconcile {}` to realign it",
                    archived.transaction.account_number, archived.transaction.account_number
                ));
            }
        }
        AdminCommands::Restore { transaction, json } => {
            let tx = ctx.admin_service.restore(&identity, transaction)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tx)?);
            } else {
                output::success("Transaction restored");
                print_transaction(&tx);
            }
        }
        AdminCommands::Deleted { all, json } => {
            let deleted = ctx.admin_service.list_deleted(&identity, all)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&deleted)?);
                return Ok(());
            }
            if deleted.is_empty() {
                println!("No deleted transactions.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Id", "Reference", "Amount", "Deleted", "Reason", "Restored"]);
            for entry in &deleted {
                let tx = &entry.transaction;
                let restored = match entry.restored_at {
                    Some(at) => Cell::new(output::format_time(at)).fg(Color::Green),
                    None => Cell::new(""),
                };
                table.add_row(vec![
                    Cell::new(tx.id),
                    Cell::new(&tx.reference),
                    output::money_cell(tx.amount, &tx.currency),
                    Cell::new(output::format_time(entry.deleted_at)),
                    Cell::new(&entry.reason),
                    restored,
                ]);
            }
            println!("{}", table);
        }
        AdminCommands::Reconcile { account, all, json } => {
            let reports = match (account, all) {
                (Some(number), false) => vec![ctx.admin_service.reconcile(&identity, &number)?],
                (None, true) => ctx.admin_service.reconcile_all(&identity)?,
                _ => anyhow::bail!("Give an account number or --all"),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Account", "Recorded", "Ledger total", "Result"]);
            for report in &reports {
                let result = if report.negative_ledger {
                    Cell::new("NEGATIVE LEDGER, not repaired").fg(Color::Red)
                } else if report.was_consistent() {
                    Cell::new("ok").fg(Color::Green)
                } else {
                    Cell::new("repaired").fg(Color::Yellow)
                };
                table.add_row(vec![
                    Cell::new(&report.account_number),
                    Cell::new(money::format_amount(report.recorded_balance)),
                    Cell::new(money::format_amount(report.ledger_total)),
                    result,
                ]);
            }
            println!("{}", table);
        }
        AdminCommands::Users { json } => {
            let users = ctx.user_service.list_users(&identity)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&users)?);
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Email", "Name", "Role", "Accounts"]);
            for user in &users {
                let accounts = user
                    .accounts
                    .iter()
                    .map(|a| a.account_number.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                table.add_row(vec![
                    Cell::new(&user.email),
                    Cell::new(&user.full_name),
                    Cell::new(user.role.as_str()),
                    Cell::new(accounts),
                ]);
            }
            println!("{}", table);
        }
        AdminCommands::PurgeOtps => {
            let removed = ctx.otp_service.purge_expired()?;
            output::success(&format!("Removed {} expired verification code(s)", removed));
        }
    }

    Ok(())
}
