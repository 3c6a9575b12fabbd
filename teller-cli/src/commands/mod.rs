//! CLI command implementations

pub mod account;
pub mod admin;
pub mod cash;
pub mod doctor;
pub mod history;
pub mod logs;
pub mod lookup;
pub mod pay;
pub mod status;
pub mod transfer;
pub mod users;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use teller_core::{EntryPoint, Identity, LogEvent, LoggingService, TellerContext};

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger() -> Option<LoggingService> {
    let teller_dir = get_teller_dir().ok()?;
    std::fs::create_dir_all(&teller_dir).ok()?;
    LoggingService::new(&teller_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION")).ok()
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: &Option<LoggingService>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}

/// Get the teller directory from environment or default
pub fn get_teller_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("TELLER_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".teller"))
        .ok_or_else(|| anyhow!("Could not find home directory, set TELLER_DIR"))
}

/// Open the ledger
pub fn get_context() -> Result<TellerContext> {
    let teller_dir = get_teller_dir()?;
    std::fs::create_dir_all(&teller_dir)
        .with_context(|| format!("Failed to create teller directory: {:?}", teller_dir))?;

    TellerContext::new(&teller_dir, EntryPoint::Cli).context("Failed to open the ledger")
}

/// Resolve `--user` to the identity every service call is made as
pub fn current_identity(ctx: &TellerContext, user: Option<&str>) -> Result<Identity> {
    let email = user.ok_or_else(|| anyhow!("No user given, pass --user or set TELLER_USER"))?;
    Ok(ctx.user_service.identity_for(email)?)
}

/// Read a password from TELLER_PASSWORD or the terminal
pub fn read_password(confirm: bool) -> Result<String> {
    if let Ok(password) = std::env::var("TELLER_PASSWORD") {
        return Ok(password);
    }
    let mut prompt = dialoguer::Password::new().with_prompt("Password");
    if confirm {
        prompt = prompt.with_confirmation("Repeat password", "Passwords do not match");
    }
    Ok(prompt.interact()?)
}

/// Read a verification code if one was not passed on the command line
pub fn read_otp(otp: Option<String>) -> Result<String> {
    match otp {
        Some(code) => Ok(code),
        None => Ok(dialoguer::Input::<String>::new()
            .with_prompt("Verification code")
            .interact_text()?),
    }
}
