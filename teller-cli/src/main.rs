//! Teller CLI - operate the demo bank from a terminal

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{account, admin, cash, doctor, history, logs, lookup, pay, status, transfer, users};
use teller_core::LogEvent;

/// Teller - a small retail bank ledger in your terminal
#[derive(Parser)]
#[command(name = "teller", version, about, long_about = None)]
struct Cli {
    /// Act as this registered user (email)
    #[arg(long, short, global = true, env = "TELLER_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a customer (or the first administrator)
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        /// Currency of the first account
        #[arg(long)]
        currency: Option<String>,
        /// Create the bootstrap administrator instead of a customer
        #[arg(long)]
        admin: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a password and show who you are
    Login {
        #[arg(long)]
        email: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage your accounts
    Account {
        #[command(subcommand)]
        command: account::AccountCommands,
    },

    /// Credit an account with cash (administrators)
    Deposit {
        account: String,
        amount: String,
        #[arg(long)]
        description: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pay out cash from an account (administrators)
    Withdraw {
        account: String,
        amount: String,
        #[arg(long)]
        description: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send money (internal, domestic or international)
    Transfer {
        #[command(subcommand)]
        command: transfer::TransferCommands,
    },

    /// Pay a bill
    Pay {
        #[command(subcommand)]
        command: pay::PayCommands,
    },

    /// Did a reference complete? Shows its status and receipt
    Lookup {
        reference: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recent transactions of an account
    History {
        /// Account number (your primary account when omitted)
        #[arg(long)]
        account: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Write the full history as CSV instead
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show account status and summary
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ledger corrections (administrators)
    Admin {
        #[command(subcommand)]
        command: admin::AdminCommands,
    },

    /// Run ledger health checks
    Doctor {
        /// Show verbose output
        #[arg(long, short)]
        verbose: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// View and manage the event log
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Register { .. } => "register",
            Commands::Login { .. } => "login",
            Commands::Account { .. } => "account",
            Commands::Deposit { .. } => "deposit",
            Commands::Withdraw { .. } => "withdraw",
            Commands::Transfer { .. } => "transfer",
            Commands::Pay { .. } => "pay",
            Commands::Lookup { .. } => "lookup",
            Commands::History { .. } => "history",
            Commands::Status { .. } => "status",
            Commands::Admin { .. } => "admin",
            Commands::Doctor { .. } => "doctor",
            Commands::Logs { .. } => "logs",
        }
    }
}

fn main() -> ExitCode {
    pretty_env_logger::init_custom_env("TELLER_LOG");
    let cli = Cli::parse();

    let name = cli.command.name();
    // Opened per event; the ledger context holds its own handle while running
    commands::log_event(
        &commands::get_logger(),
        LogEvent::new("command_run").with_command(name),
    );

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::debug!("{} failed: {:?}", name, e);
            commands::log_event(
                &commands::get_logger(),
                LogEvent::new("command_failed")
                    .with_command(name)
                    .with_error(e.to_string()),
            );
            output::error(&output::public_message(&e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let user = cli.user;
    match cli.command {
        Commands::Register { email, name, currency, admin, json } => {
            users::register(&email, &name, currency.as_deref(), admin, json)
        }
        Commands::Login { email, json } => users::login(&email, json),
        Commands::Account { command } => account::run(user.as_deref(), command),
        Commands::Deposit { account, amount, description, json } => {
            cash::deposit(user.as_deref(), &account, &amount, description.as_deref(), json)
        }
        Commands::Withdraw { account, amount, description, json } => {
            cash::withdraw(user.as_deref(), &account, &amount, description.as_deref(), json)
        }
        Commands::Transfer { command } => transfer::run(user.as_deref(), command),
        Commands::Pay { command } => pay::run(user.as_deref(), command),
        Commands::Lookup { reference, json } => lookup::run(user.as_deref(), &reference, json),
        Commands::History { account, limit, csv, json } => {
            history::run(user.as_deref(), account.as_deref(), limit, csv, json)
        }
        Commands::Status { json } => status::run(user.as_deref(), json),
        Commands::Admin { command } => admin::run(user.as_deref(), command),
        Commands::Doctor { verbose, json } => doctor::run(verbose, json),
        Commands::Logs { command } => logs::run(command),
    }
}
