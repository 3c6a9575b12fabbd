//! Log database migrations - embedded SQL files for logs.duckdb

/// Log migrations as (filename, sql_content), in application order.
pub const LOG_MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    (
        "001_initial_schema.sql",
        include_str!("001_initial_schema.sql"),
    ),
];
