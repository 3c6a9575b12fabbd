//! Migration service - manages database schema migrations
//!
//! Migrations are SQL files embedded at compile time. Each applied
//! migration is recorded in sys_migrations together with a SHA-256 of its
//! text; an applied migration whose text later changes stops startup.

use duckdb::Connection;
use sha2::{Digest, Sha256};

use crate::domain::result::{Error, Result};

const BOOTSTRAP: &str = "000_migrations.sql";

/// Result of running migrations
#[derive(Debug)]
pub struct MigrationResult {
    /// Names of newly applied migrations
    pub applied: Vec<String>,
    /// Count of migrations that were already applied
    pub already_applied: usize,
}

/// Hex SHA-256 of a migration's text
pub fn checksum(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Applies one set of embedded migrations to a connection
pub struct MigrationService<'a> {
    conn: &'a Connection,
    migrations: &'static [(&'static str, &'static str)],
}

impl<'a> MigrationService<'a> {
    pub fn new(conn: &'a Connection, migrations: &'static [(&'static str, &'static str)]) -> Self {
        Self { conn, migrations }
    }

    /// Run all pending migrations.
    ///
    /// Bootstraps sys_migrations first, verifies the checksums of what is
    /// already applied, then applies the rest in order. Each migration runs
    /// in its own transaction together with its bookkeeping row.
    pub fn run_pending(&self) -> Result<MigrationResult> {
        let mut newly_applied = Vec::new();

        if !self.migrations_table_exists()? {
            if let Some((name, sql)) = self.migrations.iter().find(|(n, _)| *n == BOOTSTRAP) {
                self.conn.execute_batch(sql)?;
                self.record_migration(name, sql)?;
                newly_applied.push(name.to_string());
            }
        }

        let applied = self.get_applied_with_checksums()?;
        self.verify_checksums(&applied)?;
        let already_applied = applied.len().saturating_sub(newly_applied.len());

        for (name, sql) in self.migrations.iter() {
            if applied.iter().any(|(n, _)| n == name) {
                continue;
            }
            self.conn.execute_batch("BEGIN TRANSACTION")?;
            let outcome = self
                .conn
                .execute_batch(sql)
                .map_err(Error::from)
                .and_then(|_| self.record_migration(name, sql));
            match outcome {
                Ok(()) => self.conn.execute_batch("COMMIT")?,
                Err(e) => {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(Error::database(format!("migration {} failed: {}", name, e)));
                }
            }
            log::info!("Applied migration {}", name);
            newly_applied.push(name.to_string());
        }

        Ok(MigrationResult {
            applied: newly_applied,
            already_applied,
        })
    }

    fn verify_checksums(&self, applied: &[(String, Option<String>)]) -> Result<()> {
        for (name, stored) in applied {
            let Some(stored) = stored else { continue };
            if let Some((_, sql)) = self.migrations.iter().find(|(n, _)| n == name) {
                let current = checksum(sql);
                if *stored != current {
                    return Err(Error::database(format!(
                        "migration {} was modified after it was applied (stored {}, current {})",
                        name, stored, current
                    )));
                }
            }
        }
        Ok(())
    }

    fn migrations_table_exists(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'sys_migrations'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn get_applied_with_checksums(&self) -> Result<Vec<(String, Option<String>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT migration_name, checksum FROM sys_migrations ORDER BY migration_name")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Names of applied migrations
    pub fn get_applied(&self) -> Result<Vec<String>> {
        Ok(self
            .get_applied_with_checksums()?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// Names of migrations not yet applied
    pub fn get_pending(&self) -> Result<Vec<String>> {
        let applied = if self.migrations_table_exists()? {
            self.get_applied()?
        } else {
            Vec::new()
        };
        Ok(self
            .migrations
            .iter()
            .filter(|(name, _)| !applied.iter().any(|a| a == name))
            .map(|(name, _)| name.to_string())
            .collect())
    }

    fn record_migration(&self, name: &str, sql: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sys_migrations (migration_name, checksum) VALUES (?, ?)",
            [name, checksum(sql).as_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_migrations::LOG_MIGRATIONS;
    use crate::migrations::MIGRATIONS;

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        let service = MigrationService::new(&conn, MIGRATIONS);

        let result = service.run_pending().unwrap();
        assert_eq!(result.applied.len(), MIGRATIONS.len());
        assert_eq!(result.already_applied, 0);

        let again = service.run_pending().unwrap();
        assert_eq!(again.applied.len(), 0);
        assert_eq!(again.already_applied, MIGRATIONS.len());
        assert!(service.get_pending().unwrap().is_empty());
    }

    #[test]
    fn test_log_migrations_apply() {
        let conn = Connection::open_in_memory().unwrap();
        let result = MigrationService::new(&conn, LOG_MIGRATIONS).run_pending().unwrap();
        assert_eq!(result.applied.len(), LOG_MIGRATIONS.len());
    }

    #[test]
    fn test_modified_migration_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        MigrationService::new(&conn, MIGRATIONS).run_pending().unwrap();

        conn.execute(
            "UPDATE sys_migrations SET checksum = 'deadbeef' WHERE migration_name = ?",
            ["001_initial_schema.sql"],
        )
        .unwrap();

        let err = MigrationService::new(&conn, MIGRATIONS).run_pending().unwrap_err();
        assert!(err.to_string().contains("001_initial_schema.sql"));
    }

    #[test]
    fn test_checksum_is_stable_hex() {
        let a = checksum("CREATE TABLE t (x INT);");
        assert_eq!(a.len(), 64);
        assert_eq!(a, checksum("CREATE TABLE t (x INT);"));
        assert_ne!(a, checksum("CREATE TABLE t (y INT);"));
    }
}
