//! Pay command - bill payments, always confirmed with a verification code

use anyhow::Result;
use clap::{Args, Subcommand};

use super::transfer::{print_completed, print_initiated};
use super::{current_identity, get_context, read_otp};
use teller_core::domain::{
    BillPaymentCompletion, BillPaymentRequest, CompletionResponse, InitiateResponse,
};

#[derive(Args, Clone)]
pub struct PaymentArgs {
    /// Who is being paid (e.g. "City Power")
    #[arg(long)]
    pub biller: String,
    /// Your customer number with the biller
    #[arg(long = "reference")]
    pub customer_reference: String,
    #[arg(long)]
    pub amount: String,
    /// Source account (your primary account when omitted)
    #[arg(long)]
    pub from: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
}

impl From<PaymentArgs> for BillPaymentRequest {
    fn from(args: PaymentArgs) -> Self {
        BillPaymentRequest {
            from_account: args.from,
            biller: args.biller,
            customer_reference: args.customer_reference,
            amount: args.amount,
            description: args.description,
        }
    }
}

#[derive(Subcommand)]
pub enum PayCommands {
    /// Validate a bill payment and email a verification code
    Initiate {
        #[command(flatten)]
        payment: PaymentArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Submit a bill payment with its verification code
    Complete {
        #[command(flatten)]
        payment: PaymentArgs,
        #[arg(long)]
        otp: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(user: Option<&str>, command: PayCommands) -> Result<()> {
    let ctx = get_context()?;
    let identity = current_identity(&ctx, user)?;

    match command {
        PayCommands::Initiate { payment, json } => {
            let request = BillPaymentRequest::from(payment);
            let result = ctx.transfer_service.initiate_payment(&identity, &request);
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
        PayCommands::Complete { payment, otp, json } => {
            let otp = if json { otp } else { Some(read_otp(otp)?) };
            let completion = BillPaymentCompletion {
                otp,
                request: BillPaymentRequest::from(payment),
            };
            let result = ctx.transfer_service.complete_payment(&identity, &completion);
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
    }

    Ok(())
}
