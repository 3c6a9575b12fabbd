//! Output formatting utilities

use chrono::{DateTime, Utc};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, CellAlignment, ContentArrangement, Table};
use rust_decimal::Decimal;
use teller_core::domain::money;

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{}", msg.yellow());
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{}", msg.cyan());
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Right-aligned money cell, red when negative
pub fn money_cell(amount: Decimal, currency: &str) -> Cell {
    let cell = Cell::new(format_money(amount, currency)).set_alignment(CellAlignment::Right);
    if amount.is_sign_negative() && !amount.is_zero() {
        cell.fg(comfy_table::Color::Red)
    } else {
        cell
    }
}

pub fn format_money(amount: Decimal, currency: &str) -> String {
    format!("{} {}", money::format_amount(amount), currency)
}

pub fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

/// Message shown to the operator for a failed command.
///
/// Ledger errors are reduced to their public form; the full chain stays in
/// the debug log and the event log.
pub fn public_message(error: &anyhow::Error) -> String {
    match error.downcast_ref::<teller_core::Error>() {
        Some(e) => format!("Error: {}", e.public_message()),
        None => format!("Error: {:#}", error),
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_public_message_hides_internal_detail() {
        let err = anyhow::Error::new(teller_core::Error::database("disk I/O at page 7"));
        let msg = public_message(&err);
        assert!(!msg.contains("page 7"));

        let plain = anyhow::anyhow!("No user given");
        assert_eq!(public_message(&plain), "Error: No user given");
    }
}
