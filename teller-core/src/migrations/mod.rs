//! Database migrations - embedded SQL files
//!
//! Migrations are compiled into the binary with include_str! and applied
//! in order by `MigrationService`, which also records a checksum of each.

/// Ledger migrations as (filename, sql_content), in application order.
///
/// Applied migrations must never be edited: the stored checksum is
/// compared on every start. Add a new NNN_description.sql instead.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_initial_schema.sql", include_str!("001_initial_schema.sql")),
];
