//! Register and login commands

use anyhow::Result;
use colored::Colorize;

use super::{get_context, read_password};
use crate::output;

pub fn register(
    email: &str,
    name: &str,
    currency: Option<&str>,
    admin: bool,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let password = read_password(true)?;
    let user = if admin {
        ctx.user_service.register_admin(email, name, &password)?
    } else {
        ctx.user_service.register(email, name, &password, currency)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
        return Ok(());
    }

    output::success(&format!("Registered {} ({})", user.email, user.role.as_str()));
    for account in &user.accounts {
        println!(
            "  Account {} ({}, {})",
            account.account_number.bold(),
            account.display_name,
            account.currency
        );
    }
    Ok(())
}

pub fn login(email: &str, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let password = read_password(false)?;
    let identity = ctx.user_service.authenticate(email, &password)?;
    let user = ctx.user_service.get_user(&identity, identity.user_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
        return Ok(());
    }

    output::success(&format!("Signed in as {} ({})", user.full_name, user.role.as_str()));
    output::info(&format!("Use --user {} (or TELLER_USER) for further commands", user.email));
    Ok(())
}
