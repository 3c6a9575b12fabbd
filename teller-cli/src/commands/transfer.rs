//! Transfer command - initiate and complete money transfers

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;

use super::{current_identity, get_context, read_otp};
use crate::output;
use teller_core::domain::{
    money, CompletionResponse, InitiateResponse, TransferCompletion, TransferOutcome,
    TransferRequest,
};

#[derive(Args, Clone)]
pub struct TransferArgs {
    /// Recipient account number (or foreign account for international transfers)
    #[arg(long)]
    pub to: String,
    #[arg(long)]
    pub amount: String,
    /// internal, domestic or international
    #[arg(long = "type", default_value = "internal")]
    pub transfer_type: String,
    /// Source account (your primary account when omitted)
    #[arg(long)]
    pub from: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// Recipient name (international)
    #[arg(long)]
    pub account_name: Option<String>,
    /// Recipient bank (international)
    #[arg(long)]
    pub bank_name: Option<String>,
    /// SWIFT/BIC or IBAN (international)
    #[arg(long)]
    pub swift_iban: Option<String>,
    /// Recipient email for the notice
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub phone: Option<String>,
}

impl From<TransferArgs> for TransferRequest {
    fn from(args: TransferArgs) -> Self {
        TransferRequest {
            from_account: args.from,
            to_account: args.to,
            amount: args.amount,
            transfer_type: args.transfer_type,
            description: args.description,
            account_name: args.account_name,
            bank_name: args.bank_name,
            swift_iban: args.swift_iban,
            email: args.email,
            phone: args.phone,
        }
    }
}

#[derive(Subcommand)]
pub enum TransferCommands {
    /// Validate a transfer and request a verification code if needed
    Initiate {
        #[command(flatten)]
        transfer: TransferArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Submit a transfer; repeat the initiate arguments
    Complete {
        #[command(flatten)]
        transfer: TransferArgs,
        /// Verification code from the email (prompted when required and missing)
        #[arg(long)]
        otp: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Withdraw a verification code you no longer need
    Cancel,
}

pub fn run(user: Option<&str>, command: TransferCommands) -> Result<()> {
    let ctx = get_context()?;
    let identity = current_identity(&ctx, user)?;

    match command {
        TransferCommands::Initiate { transfer, json } => {
            let request = TransferRequest::from(transfer);
            let result = ctx.transfer_service.initiate(&identity, &request);
            if json {
                let response = InitiateResponse::from(result);
                println!("{}", serde_json::to_string_pretty(&response)?);
                if !response.success {
                    std::process::exit(1);
                }
                return Ok(());
            }
            print_initiated(&result?);
        }
        TransferCommands::Complete { transfer, otp, json } => {
            let request = TransferRequest::from(transfer);
            // An unparsable amount is left for the service to reject
            let needs_code = money::parse_amount(&request.amount)
                .map(|amount| ctx.config.otp.requires_otp(amount))
                .unwrap_or(false);
            let otp = if needs_code && !json {
                Some(read_otp(otp)?)
            } else {
                otp
            };
            let completion = TransferCompletion { otp, request };
            let result = ctx.transfer_service.complete(&identity, &completion);
            if json {
                let response = CompletionResponse::from(result);
                println!("{}", serde_json::to_string_pretty(&response)?);
                if !response.success {
                    std::process::exit(1);
                }
                return Ok(());
            }
            print_completed(&result?);
        }
        TransferCommands::Cancel => {
            if ctx.otp_service.revoke(identity.user_id)? {
                output::success("Pending verification code withdrawn");
            } else {
                output::info("No verification code was pending");
            }
        }
    }

    Ok(())
}

pub fn print_initiated(response: &InitiateResponse) {
    output::success(&response.message);
    if response.requires_otp == Some(true) {
        output::info("Check your email, then run the complete command with --otp <code>");
    }
}

pub fn print_completed(outcome: &TransferOutcome) {
    let tx = &outcome.transaction;
    output::success(&format!(
        "Sent {} from {}",
        output::format_money(tx.amount.abs(), &tx.currency),
        tx.account_number
    ));
    if let Some(recipient) = &tx.recipient {
        println!("  To:          {}", recipient.label());
    }
    println!("  Reference:   {}", outcome.reference.bold());
    println!(
        "  New balance: {}",
        output::format_money(outcome.new_balance, &outcome.currency)
    );
}
