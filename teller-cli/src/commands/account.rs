//! Account command - open accounts, list them and show their summary

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use comfy_table::Cell;

use super::{current_identity, get_context};
use crate::output;

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open another account
    Open {
        /// Display name of the account
        #[arg(long, default_value = "Savings")]
        name: String,
        #[arg(long)]
        currency: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List your accounts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Balance and monthly totals of one account
    Summary {
        account: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(user: Option<&str>, command: AccountCommands) -> Result<()> {
    let ctx = get_context()?;
    let identity = current_identity(&ctx, user)?;

    match command {
        AccountCommands::Open { name, currency, json } => {
            let account = ctx.user_service.open_account(
                &identity,
                identity.user_id,
                &name,
                currency.as_deref(),
            )?;
            if json {
                println!("{}", serde_json::to_string_pretty(&account)?);
            } else {
                output::success(&format!(
                    "Opened {} account {} ({})",
                    account.currency, account.account_number, account.display_name
                ));
            }
        }
        AccountCommands::List { json } => {
            let me = ctx.user_service.get_user(&identity, identity.user_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&me.accounts)?);
                return Ok(());
            }
            if me.accounts.is_empty() {
                println!("No accounts found.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Number", "Name", "Balance", "Opened"]);
            for account in &me.accounts {
                table.add_row(vec![
                    Cell::new(&account.account_number),
                    Cell::new(&account.display_name),
                    output::money_cell(account.balance, &account.currency),
                    Cell::new(output::format_time(account.opened_at)),
                ]);
            }
            println!("{}", table);
        }
        AccountCommands::Summary { account, json } => {
            let summary = ctx.summary_service.get(&identity, &account)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            let currency = &summary.currency;
            println!("{}", format!("Account {}", summary.account_number).bold());
            println!();
            let mut table = output::create_table();
            table.add_row(vec![
                Cell::new("Current balance"),
                output::money_cell(summary.current_balance, currency),
            ]);
            table.add_row(vec![
                Cell::new("Available balance"),
                output::money_cell(summary.available_balance, currency),
            ]);
            table.add_row(vec![
                Cell::new(format!("Deposits ({})", summary.monthly_stats.month)),
                output::money_cell(summary.monthly_stats.total_deposits, currency),
            ]);
            table.add_row(vec![
                Cell::new(format!("Withdrawals ({})", summary.monthly_stats.month)),
                output::money_cell(summary.monthly_stats.total_withdrawals, currency),
            ]);
            table.add_row(vec![
                Cell::new("Net change"),
                output::money_cell(summary.monthly_stats.net_change, currency),
            ]);
            println!("{}", table);

            if let Some(last) = summary.last_transaction_date {
                println!();
                println!("Last transaction: {}", output::format_time(last));
            }
        }
    }

    Ok(())
}
