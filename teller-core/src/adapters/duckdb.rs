//! DuckDB ledger storage
//!
//! `DuckDbRepository` owns the connection. All statements run through a
//! `LedgerStore`, handed out either for plain reads (`read`) or inside a
//! database transaction (`in_transaction`) that commits only when the
//! closure returns `Ok`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::{params, Connection, OptionalExt};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::money::parse_stored;
use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, AccountSummary, DeletedTransaction, ModificationEntry, MonthlyStats, OtpChallenge,
    Receipt, RecipientDetails, Role, Transaction, TransactionStatus, TransactionType,
    TransferType, User,
};
use crate::migrations::MIGRATIONS;
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// Storage format for timestamps: fixed width, so text order is time order
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::database(format!("corrupt timestamp '{}': {}", s, e)))
}

fn parse_optional_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_timestamp).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::database(format!("corrupt id '{}': {}", s, e)))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::database(format!("timestamp {} out of range", ms)))
}

/// DuckDB repository
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbRepository {
    /// Open (or create) the ledger database at `db_path`.
    ///
    /// Retries with exponential backoff while another process holds the
    /// file lock.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        log::warn!(
                            "Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::database(format!("failed to open database after {} retries", MAX_RETRIES))
        }))
    }

    /// Throwaway in-memory database, used by unit tests
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        })
    }

    /// Another handle on the same database with its own connection and lock
    pub fn try_clone(&self) -> Result<Self> {
        let conn = self.lock()?;
        Ok(Self {
            conn: Mutex::new(conn.try_clone()?),
            db_path: self.db_path.clone(),
        })
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading off: JSON is linked statically via the "json" feature
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("connection lock poisoned: {}", e)))
    }

    /// Run pending migrations
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.lock()?;
        MigrationService::new(&conn, MIGRATIONS).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    /// Run `f` against the store outside of an explicit transaction.
    ///
    /// Must not be nested inside another `read` or `in_transaction` call on
    /// the same repository; the connection lock is not reentrant.
    pub fn read<T>(&self, f: impl FnOnce(&LedgerStore<'_>) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&LedgerStore::new(&conn))
    }

    /// Run `f` as one all-or-nothing unit of work.
    ///
    /// The transaction commits when `f` returns `Ok`; on `Err` it is dropped
    /// and DuckDB rolls every write back. A write-write conflict with a
    /// concurrent transaction surfaces as `Error::Conflict`.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&LedgerStore<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = {
            let store = LedgerStore::new(&tx);
            f(&store)?
        };
        tx.commit()?;
        Ok(value)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Database file size in bytes (0 for in-memory databases)
    pub fn get_db_size(&self) -> Result<u64> {
        match &self.db_path {
            Some(path) if path.exists() => Ok(std::fs::metadata(path)?.len()),
            _ => Ok(0),
        }
    }
}

/// Row counts for status reporting
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerCounts {
    pub users: i64,
    pub accounts: i64,
    pub transactions: i64,
    pub receipts: i64,
    pub summaries: i64,
    pub pending_otps: i64,
    pub deleted_transactions: i64,
}

/// An account whose stored balance disagrees with something it should equal
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDrift {
    pub account_number: String,
    pub recorded: Decimal,
    pub ledger_total: Decimal,
}

const USER_COLUMNS: &str = "user_id, email, full_name, password_hash, role, created_at";

const ACCOUNT_COLUMNS: &str = "account_id, user_id, account_number, display_name, \
     CAST(balance AS VARCHAR), currency, version, opened_at";

const TRANSACTION_COLUMNS: &str = "transaction_id, user_id, account_number, \
     CAST(amount AS VARCHAR), transaction_type, transfer_type, description, \
     CAST(balance_after AS VARCHAR), CAST(recipient AS VARCHAR), reference, status, currency, \
     created_at, original_date, CAST(modification_history AS VARCHAR)";

const RECEIPT_COLUMNS: &str = "receipt_id, transaction_id, user_id, reference, account_number, \
     CAST(amount AS VARCHAR), CAST(balance_after AS VARCHAR), currency, transaction_type, \
     transfer_type, description, counterparty, status, transaction_date, created_at";

const SUMMARY_COLUMNS: &str = "user_id, account_number, currency, \
     CAST(current_balance AS VARCHAR), CAST(available_balance AS VARCHAR), stats_month, \
     CAST(total_deposits AS VARCHAR), CAST(total_withdrawals AS VARCHAR), \
     CAST(net_change AS VARCHAR), last_transaction_date, updated_at";

const DELETED_COLUMNS: &str = "deleted_id, CAST(record AS VARCHAR), deleted_by, reason, \
     deleted_at, restored_by, restored_at";

struct UserRow {
    id: String,
    email: String,
    full_name: String,
    password_hash: String,
    role: String,
    created_at: String,
}

impl UserRow {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            full_name: row.get(2)?,
            password_hash: row.get(3)?,
            role: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_domain(self) -> Result<User> {
        Ok(User {
            id: parse_uuid(&self.id)?,
            email: self.email,
            full_name: self.full_name,
            password_hash: self.password_hash,
            role: Role::parse(&self.role)?,
            created_at: parse_timestamp(&self.created_at)?,
            accounts: Vec::new(),
        })
    }
}

struct AccountRow {
    id: String,
    user_id: String,
    account_number: String,
    display_name: String,
    balance: String,
    currency: String,
    version: i64,
    opened_at: String,
}

impl AccountRow {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            account_number: row.get(2)?,
            display_name: row.get(3)?,
            balance: row.get(4)?,
            currency: row.get(5)?,
            version: row.get(6)?,
            opened_at: row.get(7)?,
        })
    }

    fn into_domain(self) -> Result<Account> {
        Ok(Account {
            id: parse_uuid(&self.id)?,
            user_id: parse_uuid(&self.user_id)?,
            account_number: self.account_number,
            display_name: self.display_name,
            balance: parse_stored(&self.balance)?,
            currency: self.currency,
            version: self.version,
            opened_at: parse_timestamp(&self.opened_at)?,
        })
    }
}

struct TransactionRow {
    id: String,
    user_id: String,
    account_number: String,
    amount: String,
    transaction_type: String,
    transfer_type: Option<String>,
    description: String,
    balance_after: String,
    recipient: Option<String>,
    reference: String,
    status: String,
    currency: String,
    created_at: String,
    original_date: Option<String>,
    modification_history: String,
}

impl TransactionRow {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            account_number: row.get(2)?,
            amount: row.get(3)?,
            transaction_type: row.get(4)?,
            transfer_type: row.get(5)?,
            description: row.get(6)?,
            balance_after: row.get(7)?,
            recipient: row.get(8)?,
            reference: row.get(9)?,
            status: row.get(10)?,
            currency: row.get(11)?,
            created_at: row.get(12)?,
            original_date: row.get(13)?,
            modification_history: row.get(14)?,
        })
    }

    fn into_domain(self) -> Result<Transaction> {
        let recipient: Option<RecipientDetails> = match self.recipient.as_deref() {
            Some(json) if !json.is_empty() && json != "null" => Some(serde_json::from_str(json)?),
            _ => None,
        };
        let modification_history: Vec<ModificationEntry> =
            serde_json::from_str(&self.modification_history)?;
        Ok(Transaction {
            id: parse_uuid(&self.id)?,
            user_id: parse_uuid(&self.user_id)?,
            account_number: self.account_number,
            amount: parse_stored(&self.amount)?,
            transaction_type: TransactionType::parse(&self.transaction_type)?,
            transfer_type: self
                .transfer_type
                .as_deref()
                .map(TransferType::parse)
                .transpose()?,
            description: self.description,
            balance_after: parse_stored(&self.balance_after)?,
            recipient,
            reference: self.reference,
            status: TransactionStatus::parse(&self.status)?,
            currency: self.currency,
            created_at: parse_timestamp(&self.created_at)?,
            original_date: parse_optional_timestamp(self.original_date)?,
            modification_history,
        })
    }
}

struct ReceiptRow {
    id: String,
    transaction_id: String,
    user_id: String,
    reference: String,
    account_number: String,
    amount: String,
    balance_after: String,
    currency: String,
    transaction_type: String,
    transfer_type: Option<String>,
    description: String,
    counterparty: Option<String>,
    status: String,
    transaction_date: String,
    created_at: String,
}

impl ReceiptRow {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            transaction_id: row.get(1)?,
            user_id: row.get(2)?,
            reference: row.get(3)?,
            account_number: row.get(4)?,
            amount: row.get(5)?,
            balance_after: row.get(6)?,
            currency: row.get(7)?,
            transaction_type: row.get(8)?,
            transfer_type: row.get(9)?,
            description: row.get(10)?,
            counterparty: row.get(11)?,
            status: row.get(12)?,
            transaction_date: row.get(13)?,
            created_at: row.get(14)?,
        })
    }

    fn into_domain(self) -> Result<Receipt> {
        Ok(Receipt {
            id: parse_uuid(&self.id)?,
            transaction_id: parse_uuid(&self.transaction_id)?,
            user_id: parse_uuid(&self.user_id)?,
            reference: self.reference,
            account_number: self.account_number,
            amount: parse_stored(&self.amount)?,
            balance_after: parse_stored(&self.balance_after)?,
            currency: self.currency,
            transaction_type: TransactionType::parse(&self.transaction_type)?,
            transfer_type: self
                .transfer_type
                .as_deref()
                .map(TransferType::parse)
                .transpose()?,
            description: self.description,
            counterparty: self.counterparty,
            status: TransactionStatus::parse(&self.status)?,
            transaction_date: parse_timestamp(&self.transaction_date)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct SummaryRow {
    user_id: String,
    account_number: String,
    currency: String,
    current_balance: String,
    available_balance: String,
    stats_month: String,
    total_deposits: String,
    total_withdrawals: String,
    net_change: String,
    last_transaction_date: Option<String>,
    updated_at: String,
}

impl SummaryRow {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            account_number: row.get(1)?,
            currency: row.get(2)?,
            current_balance: row.get(3)?,
            available_balance: row.get(4)?,
            stats_month: row.get(5)?,
            total_deposits: row.get(6)?,
            total_withdrawals: row.get(7)?,
            net_change: row.get(8)?,
            last_transaction_date: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_domain(self) -> Result<AccountSummary> {
        Ok(AccountSummary {
            user_id: parse_uuid(&self.user_id)?,
            account_number: self.account_number,
            currency: self.currency,
            current_balance: parse_stored(&self.current_balance)?,
            available_balance: parse_stored(&self.available_balance)?,
            monthly_stats: MonthlyStats {
                month: self.stats_month,
                total_deposits: parse_stored(&self.total_deposits)?,
                total_withdrawals: parse_stored(&self.total_withdrawals)?,
                net_change: parse_stored(&self.net_change)?,
            },
            last_transaction_date: parse_optional_timestamp(self.last_transaction_date)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

struct DeletedRow {
    id: String,
    record: String,
    deleted_by: String,
    reason: String,
    deleted_at: String,
    restored_by: Option<String>,
    restored_at: Option<String>,
}

impl DeletedRow {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            record: row.get(1)?,
            deleted_by: row.get(2)?,
            reason: row.get(3)?,
            deleted_at: row.get(4)?,
            restored_by: row.get(5)?,
            restored_at: row.get(6)?,
        })
    }

    fn into_domain(self) -> Result<DeletedTransaction> {
        Ok(DeletedTransaction {
            id: parse_uuid(&self.id)?,
            transaction: serde_json::from_str(&self.record)?,
            deleted_by: parse_uuid(&self.deleted_by)?,
            reason: self.reason,
            deleted_at: parse_timestamp(&self.deleted_at)?,
            restored_by: self.restored_by.as_deref().map(parse_uuid).transpose()?,
            restored_at: parse_optional_timestamp(self.restored_at)?,
        })
    }
}

/// Statements over one borrowed connection (or open transaction)
pub struct LedgerStore<'a> {
    conn: &'a Connection,
}

impl<'a> LedgerStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query_list<R, T>(
        &self,
        sql: &str,
        params: &[&dyn duckdb::ToSql],
        read: fn(&duckdb::Row) -> duckdb::Result<R>,
        convert: fn(R) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| read(row))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(convert(row?)?);
        }
        Ok(out)
    }

    fn query_one<R, T>(
        &self,
        sql: &str,
        params: &[&dyn duckdb::ToSql],
        read: fn(&duckdb::Row) -> duckdb::Result<R>,
        convert: fn(R) -> Result<T>,
    ) -> Result<Option<T>> {
        let row = self
            .conn
            .query_row(sql, params, |row| read(row))
            .optional()?;
        row.map(convert).transpose()
    }

    fn count(&self, sql: &str, params: &[&dyn duckdb::ToSql]) -> Result<i64> {
        Ok(self.conn.query_row(sql, params, |row| row.get(0))?)
    }

    // === Users ===

    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO users ({}) VALUES (?, ?, ?, ?, ?, ?)", USER_COLUMNS),
            params![
                user.id.to_string(),
                user.email,
                user.full_name,
                user.password_hash,
                user.role.as_str(),
                format_timestamp(&user.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_user(&self, user_id: Uuid) -> Result<Option<User>> {
        self.query_one(
            &format!("SELECT {} FROM users WHERE user_id = ?", USER_COLUMNS),
            &[&user_id.to_string()],
            UserRow::read,
            UserRow::into_domain,
        )
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.query_one(
            &format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS),
            &[&email],
            UserRow::read,
            UserRow::into_domain,
        )
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.query_list(
            &format!("SELECT {} FROM users ORDER BY created_at", USER_COLUMNS),
            &[],
            UserRow::read,
            UserRow::into_domain,
        )
    }

    pub fn count_admins(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM users WHERE role = 'admin'", &[])
    }

    // === Accounts ===

    pub fn insert_account(&self, account: &Account) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO bank_accounts ({}) VALUES (?, ?, ?, ?, CAST(? AS DECIMAL(18,2)), ?, ?, ?)",
                ACCOUNT_COLUMNS.replace("CAST(balance AS VARCHAR)", "balance")
            ),
            params![
                account.id.to_string(),
                account.user_id.to_string(),
                account.account_number,
                account.display_name,
                account.balance.to_string(),
                account.currency,
                account.version,
                format_timestamp(&account.opened_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_account(&self, account_number: &str) -> Result<Option<Account>> {
        self.query_one(
            &format!("SELECT {} FROM bank_accounts WHERE account_number = ?", ACCOUNT_COLUMNS),
            &[&account_number],
            AccountRow::read,
            AccountRow::into_domain,
        )
    }

    pub fn accounts_for_user(&self, user_id: Uuid) -> Result<Vec<Account>> {
        self.query_list(
            &format!(
                "SELECT {} FROM bank_accounts WHERE user_id = ? ORDER BY opened_at, account_number",
                ACCOUNT_COLUMNS
            ),
            &[&user_id.to_string()],
            AccountRow::read,
            AccountRow::into_domain,
        )
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        self.query_list(
            &format!("SELECT {} FROM bank_accounts ORDER BY account_number", ACCOUNT_COLUMNS),
            &[],
            AccountRow::read,
            AccountRow::into_domain,
        )
    }

    pub fn account_number_exists(&self, account_number: &str) -> Result<bool> {
        Ok(self.count(
            "SELECT COUNT(*) FROM bank_accounts WHERE account_number = ?",
            &[&account_number],
        )? > 0)
    }

    /// Compare-and-swap the balance.
    ///
    /// Succeeds only while the stored version still equals
    /// `expected_version`; the version is bumped on success.
    pub fn update_balance(
        &self,
        account_number: &str,
        new_balance: Decimal,
        expected_version: i64,
    ) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE bank_accounts
             SET balance = CAST(? AS DECIMAL(18,2)), version = version + 1
             WHERE account_number = ? AND version = ?",
            params![new_balance.to_string(), account_number, expected_version],
        )?;
        if updated != 1 {
            return Err(Error::Conflict(format!(
                "account {} changed concurrently (expected version {})",
                account_number, expected_version
            )));
        }
        Ok(())
    }

    // === Transactions ===

    pub fn reference_exists(&self, reference: &str) -> Result<bool> {
        Ok(self.count(
            "SELECT COUNT(*) FROM ledger_transactions WHERE reference = ?",
            &[&reference],
        )? > 0)
    }

    pub fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        let recipient = tx.recipient.as_ref().map(serde_json::to_string).transpose()?;
        let history = serde_json::to_string(&tx.modification_history)?;
        self.conn.execute(
            "INSERT INTO ledger_transactions (
                transaction_id, user_id, account_number, amount, transaction_type,
                transfer_type, description, balance_after, recipient, reference, status,
                currency, created_at, original_date, modification_history
            ) VALUES (?, ?, ?, CAST(? AS DECIMAL(18,2)), ?, ?, ?, CAST(? AS DECIMAL(18,2)),
                      ?, ?, ?, ?, ?, ?, ?)",
            params![
                tx.id.to_string(),
                tx.user_id.to_string(),
                tx.account_number,
                tx.amount.to_string(),
                tx.transaction_type.as_str(),
                tx.transfer_type.map(|t| t.as_str()),
                tx.description,
                tx.balance_after.to_string(),
                recipient,
                tx.reference,
                tx.status.as_str(),
                tx.currency,
                format_timestamp(&tx.created_at),
                tx.original_date.as_ref().map(format_timestamp),
                history,
            ],
        )?;
        Ok(())
    }

    pub fn find_transaction(&self, transaction_id: Uuid) -> Result<Option<Transaction>> {
        self.query_one(
            &format!(
                "SELECT {} FROM ledger_transactions WHERE transaction_id = ?",
                TRANSACTION_COLUMNS
            ),
            &[&transaction_id.to_string()],
            TransactionRow::read,
            TransactionRow::into_domain,
        )
    }

    pub fn find_transaction_by_reference(&self, reference: &str) -> Result<Option<Transaction>> {
        self.query_one(
            &format!("SELECT {} FROM ledger_transactions WHERE reference = ?", TRANSACTION_COLUMNS),
            &[&reference],
            TransactionRow::read,
            TransactionRow::into_domain,
        )
    }

    /// Newest first
    pub fn transactions_for_account(
        &self,
        account_number: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        let limit = limit.map(|l| l as i64).unwrap_or(i64::MAX);
        self.query_list(
            &format!(
                "SELECT {} FROM ledger_transactions WHERE account_number = ?
                 ORDER BY created_at DESC, reference DESC LIMIT ?",
                TRANSACTION_COLUMNS
            ),
            &[&account_number, &limit],
            TransactionRow::read,
            TransactionRow::into_domain,
        )
    }

    pub fn ledger_total(&self, account_number: &str) -> Result<Decimal> {
        let total: String = self.conn.query_row(
            "SELECT CAST(COALESCE(SUM(amount), 0) AS VARCHAR)
             FROM ledger_transactions WHERE account_number = ?",
            [account_number],
            |row| row.get(0),
        )?;
        parse_stored(&total)
    }

    /// Persist the date fields and audit trail of a backdated transaction
    pub fn update_transaction_dates(&self, tx: &Transaction) -> Result<usize> {
        let history = serde_json::to_string(&tx.modification_history)?;
        Ok(self.conn.execute(
            "UPDATE ledger_transactions
             SET created_at = ?, original_date = ?, modification_history = ?
             WHERE transaction_id = ?",
            params![
                format_timestamp(&tx.created_at),
                tx.original_date.as_ref().map(format_timestamp),
                history,
                tx.id.to_string(),
            ],
        )?)
    }

    pub fn delete_transaction(&self, transaction_id: Uuid) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM ledger_transactions WHERE transaction_id = ?",
            [transaction_id.to_string()],
        )?)
    }

    // === Receipts ===

    pub fn insert_receipt(&self, receipt: &Receipt) -> Result<()> {
        self.conn.execute(
            "INSERT INTO receipts (
                receipt_id, transaction_id, user_id, reference, account_number, amount,
                balance_after, currency, transaction_type, transfer_type, description,
                counterparty, status, transaction_date, created_at
            ) VALUES (?, ?, ?, ?, ?, CAST(? AS DECIMAL(18,2)), CAST(? AS DECIMAL(18,2)),
                      ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                receipt.id.to_string(),
                receipt.transaction_id.to_string(),
                receipt.user_id.to_string(),
                receipt.reference,
                receipt.account_number,
                receipt.amount.to_string(),
                receipt.balance_after.to_string(),
                receipt.currency,
                receipt.transaction_type.as_str(),
                receipt.transfer_type.map(|t| t.as_str()),
                receipt.description,
                receipt.counterparty,
                receipt.status.as_str(),
                format_timestamp(&receipt.transaction_date),
                format_timestamp(&receipt.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn receipts_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<Receipt>> {
        self.query_list(
            &format!("SELECT {} FROM receipts WHERE transaction_id = ?", RECEIPT_COLUMNS),
            &[&transaction_id.to_string()],
            ReceiptRow::read,
            ReceiptRow::into_domain,
        )
    }

    pub fn find_receipt_by_reference(&self, reference: &str) -> Result<Option<Receipt>> {
        self.query_one(
            &format!("SELECT {} FROM receipts WHERE reference = ? LIMIT 1", RECEIPT_COLUMNS),
            &[&reference],
            ReceiptRow::read,
            ReceiptRow::into_domain,
        )
    }

    pub fn update_receipt_date(
        &self,
        transaction_id: Uuid,
        transaction_date: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE receipts SET transaction_date = ? WHERE transaction_id = ?",
            params![format_timestamp(&transaction_date), transaction_id.to_string()],
        )?)
    }

    pub fn delete_receipts_for_transaction(&self, transaction_id: Uuid) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM receipts WHERE transaction_id = ?",
            [transaction_id.to_string()],
        )?)
    }

    // === Summaries ===

    pub fn find_summary(&self, user_id: Uuid, account_number: &str) -> Result<Option<AccountSummary>> {
        self.query_one(
            &format!(
                "SELECT {} FROM account_summaries WHERE user_id = ? AND account_number = ?",
                SUMMARY_COLUMNS
            ),
            &[&user_id.to_string(), &account_number],
            SummaryRow::read,
            SummaryRow::into_domain,
        )
    }

    pub fn find_summary_by_account(&self, account_number: &str) -> Result<Option<AccountSummary>> {
        self.query_one(
            &format!(
                "SELECT {} FROM account_summaries WHERE account_number = ? LIMIT 1",
                SUMMARY_COLUMNS
            ),
            &[&account_number],
            SummaryRow::read,
            SummaryRow::into_domain,
        )
    }

    /// Insert the summary row, or overwrite it when one exists
    pub fn save_summary(&self, summary: &AccountSummary) -> Result<()> {
        let user_id = summary.user_id.to_string();
        let last = summary.last_transaction_date.as_ref().map(format_timestamp);
        let updated_at = format_timestamp(&summary.updated_at);
        let exists = self.count(
            "SELECT COUNT(*) FROM account_summaries WHERE user_id = ? AND account_number = ?",
            &[&user_id, &summary.account_number],
        )? > 0;

        if exists {
            self.conn.execute(
                "UPDATE account_summaries SET
                    currency = ?,
                    current_balance = CAST(? AS DECIMAL(18,2)),
                    available_balance = CAST(? AS DECIMAL(18,2)),
                    stats_month = ?,
                    total_deposits = CAST(? AS DECIMAL(18,2)),
                    total_withdrawals = CAST(? AS DECIMAL(18,2)),
                    net_change = CAST(? AS DECIMAL(18,2)),
                    last_transaction_date = ?,
                    updated_at = ?
                 WHERE user_id = ? AND account_number = ?",
                params![
                    summary.currency,
                    summary.current_balance.to_string(),
                    summary.available_balance.to_string(),
                    summary.monthly_stats.month,
                    summary.monthly_stats.total_deposits.to_string(),
                    summary.monthly_stats.total_withdrawals.to_string(),
                    summary.monthly_stats.net_change.to_string(),
                    last,
                    updated_at,
                    user_id,
                    summary.account_number,
                ],
            )?;
        } else {
            self.conn.execute(
                "INSERT INTO account_summaries (
                    user_id, account_number, currency, current_balance, available_balance,
                    stats_month, total_deposits, total_withdrawals, net_change,
                    last_transaction_date, updated_at
                ) VALUES (?, ?, ?, CAST(? AS DECIMAL(18,2)), CAST(? AS DECIMAL(18,2)), ?,
                          CAST(? AS DECIMAL(18,2)), CAST(? AS DECIMAL(18,2)),
                          CAST(? AS DECIMAL(18,2)), ?, ?)",
                params![
                    user_id,
                    summary.account_number,
                    summary.currency,
                    summary.current_balance.to_string(),
                    summary.available_balance.to_string(),
                    summary.monthly_stats.month,
                    summary.monthly_stats.total_deposits.to_string(),
                    summary.monthly_stats.total_withdrawals.to_string(),
                    summary.monthly_stats.net_change.to_string(),
                    last,
                    updated_at,
                ],
            )?;
        }
        Ok(())
    }

    pub fn touch_summary_last_transaction(
        &self,
        account_number: &str,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let at = format_timestamp(&at);
        Ok(self.conn.execute(
            "UPDATE account_summaries SET last_transaction_date = ?, updated_at = ?
             WHERE account_number = ?",
            params![at, at, account_number],
        )?)
    }

    // === OTP challenges ===

    pub fn find_challenge(&self, user_id: Uuid) -> Result<Option<OtpChallenge>> {
        let row: Option<(String, String, i64, i64)> = self
            .conn
            .query_row(
                "SELECT user_id, code_hash, expires_at, created_at
                 FROM otp_challenges WHERE user_id = ?",
                [user_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(|(user_id, code_hash, expires_at, created_at)| {
            Ok(OtpChallenge {
                user_id: parse_uuid(&user_id)?,
                code_hash,
                expires_at: from_millis(expires_at)?,
                created_at: from_millis(created_at)?,
            })
        })
        .transpose()
    }

    /// Store `challenge`, replacing any pending one for the same user
    pub fn put_challenge(&self, challenge: &OtpChallenge) -> Result<()> {
        let user_id = challenge.user_id.to_string();
        let expires_at = challenge.expires_at.timestamp_millis();
        let created_at = challenge.created_at.timestamp_millis();
        let updated = self.conn.execute(
            "UPDATE otp_challenges SET code_hash = ?, expires_at = ?, created_at = ?
             WHERE user_id = ?",
            params![challenge.code_hash, expires_at, created_at, user_id],
        )?;
        if updated == 0 {
            self.conn.execute(
                "INSERT INTO otp_challenges (user_id, code_hash, expires_at, created_at)
                 VALUES (?, ?, ?, ?)",
                params![user_id, challenge.code_hash, expires_at, created_at],
            )?;
        }
        Ok(())
    }

    /// Delete the challenge only if it is still the one identified by
    /// `code_hash`. Returns the number of rows removed (0 or 1).
    pub fn consume_challenge(&self, user_id: Uuid, code_hash: &str) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM otp_challenges WHERE user_id = ? AND code_hash = ?",
            params![user_id.to_string(), code_hash],
        )?)
    }

    pub fn delete_challenge(&self, user_id: Uuid) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM otp_challenges WHERE user_id = ?",
            [user_id.to_string()],
        )?)
    }

    pub fn delete_expired_challenges(&self, now: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM otp_challenges WHERE expires_at < ?",
            [now.timestamp_millis()],
        )?)
    }

    pub fn count_expired_challenges(&self, now: DateTime<Utc>) -> Result<i64> {
        self.count(
            "SELECT COUNT(*) FROM otp_challenges WHERE expires_at < ?",
            &[&now.timestamp_millis()],
        )
    }

    // === Deleted transactions ===

    pub fn insert_deleted(&self, deleted: &DeletedTransaction) -> Result<()> {
        let tx = &deleted.transaction;
        self.conn.execute(
            "INSERT INTO deleted_transactions (
                deleted_id, transaction_id, reference, user_id, account_number, amount,
                record, deleted_by, reason, deleted_at
            ) VALUES (?, ?, ?, ?, ?, CAST(? AS DECIMAL(18,2)), ?, ?, ?, ?)",
            params![
                deleted.id.to_string(),
                tx.id.to_string(),
                tx.reference,
                tx.user_id.to_string(),
                tx.account_number,
                tx.amount.to_string(),
                serde_json::to_string(tx)?,
                deleted.deleted_by.to_string(),
                deleted.reason,
                format_timestamp(&deleted.deleted_at),
            ],
        )?;
        Ok(())
    }

    /// Archive entries, newest first
    pub fn list_deleted(&self, include_restored: bool) -> Result<Vec<DeletedTransaction>> {
        let filter = if include_restored {
            ""
        } else {
            "WHERE restored_at IS NULL"
        };
        self.query_list(
            &format!(
                "SELECT {} FROM deleted_transactions {} ORDER BY deleted_at DESC",
                DELETED_COLUMNS, filter
            ),
            &[],
            DeletedRow::read,
            DeletedRow::into_domain,
        )
    }

    pub fn deleted_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<DeletedTransaction>> {
        self.query_list(
            &format!(
                "SELECT {} FROM deleted_transactions WHERE transaction_id = ? ORDER BY deleted_at",
                DELETED_COLUMNS
            ),
            &[&transaction_id.to_string()],
            DeletedRow::read,
            DeletedRow::into_domain,
        )
    }

    pub fn mark_restored(
        &self,
        deleted_id: Uuid,
        restored_by: Uuid,
        restored_at: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE deleted_transactions SET restored_by = ?, restored_at = ?
             WHERE deleted_id = ? AND restored_at IS NULL",
            params![
                restored_by.to_string(),
                format_timestamp(&restored_at),
                deleted_id.to_string(),
            ],
        )?)
    }

    // === Consistency checks ===

    pub fn negative_balances(&self) -> Result<Vec<Account>> {
        self.query_list(
            &format!("SELECT {} FROM bank_accounts WHERE balance < 0", ACCOUNT_COLUMNS),
            &[],
            AccountRow::read,
            AccountRow::into_domain,
        )
    }

    fn drift(&self, sql: &str) -> Result<Vec<BalanceDrift>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (account_number, recorded, total) = row?;
            out.push(BalanceDrift {
                account_number,
                recorded: parse_stored(&recorded)?,
                ledger_total: parse_stored(&total)?,
            });
        }
        Ok(out)
    }

    /// Accounts whose balance differs from the sum of their transactions
    pub fn balance_drift(&self) -> Result<Vec<BalanceDrift>> {
        self.drift(
            "SELECT a.account_number, CAST(a.balance AS VARCHAR),
                    CAST(COALESCE(SUM(t.amount), 0) AS VARCHAR)
             FROM bank_accounts a
             LEFT JOIN ledger_transactions t ON t.account_number = a.account_number
             GROUP BY a.account_number, a.balance
             HAVING a.balance <> COALESCE(SUM(t.amount), 0)
             ORDER BY a.account_number",
        )
    }

    /// Summaries whose cached balance differs from the ledger
    pub fn summary_drift(&self) -> Result<Vec<BalanceDrift>> {
        self.drift(
            "SELECT s.account_number, CAST(s.current_balance AS VARCHAR),
                    CAST(COALESCE(SUM(t.amount), 0) AS VARCHAR)
             FROM account_summaries s
             LEFT JOIN ledger_transactions t ON t.account_number = s.account_number
             GROUP BY s.account_number, s.current_balance
             HAVING s.current_balance <> COALESCE(SUM(t.amount), 0)
             ORDER BY s.account_number",
        )
    }

    fn strings(&self, sql: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// References of receipts whose transaction no longer exists
    pub fn orphan_receipts(&self) -> Result<Vec<String>> {
        self.strings(
            "SELECT r.reference FROM receipts r
             WHERE NOT EXISTS (
                 SELECT 1 FROM ledger_transactions t WHERE t.transaction_id = r.transaction_id
             )
             ORDER BY r.reference",
        )
    }

    /// References of transactions without exactly one receipt
    pub fn transactions_without_single_receipt(&self) -> Result<Vec<String>> {
        self.strings(
            "SELECT t.reference FROM ledger_transactions t
             LEFT JOIN receipts r ON r.transaction_id = t.transaction_id
             GROUP BY t.reference
             HAVING COUNT(r.receipt_id) <> 1
             ORDER BY t.reference",
        )
    }

    /// References of receipts that disagree with their transaction
    pub fn mismatched_receipts(&self) -> Result<Vec<String>> {
        self.strings(
            "SELECT r.reference FROM receipts r
             JOIN ledger_transactions t ON t.transaction_id = r.transaction_id
             WHERE r.amount <> t.amount
                OR r.balance_after <> t.balance_after
                OR r.currency <> t.currency
                OR r.transaction_date <> t.created_at
             ORDER BY r.reference",
        )
    }

    pub fn duplicate_references(&self) -> Result<Vec<String>> {
        self.strings(
            "SELECT reference FROM ledger_transactions
             GROUP BY reference HAVING COUNT(*) > 1
             ORDER BY reference",
        )
    }

    pub fn counts(&self) -> Result<LedgerCounts> {
        Ok(LedgerCounts {
            users: self.count("SELECT COUNT(*) FROM users", &[])?,
            accounts: self.count("SELECT COUNT(*) FROM bank_accounts", &[])?,
            transactions: self.count("SELECT COUNT(*) FROM ledger_transactions", &[])?,
            receipts: self.count("SELECT COUNT(*) FROM receipts", &[])?,
            summaries: self.count("SELECT COUNT(*) FROM account_summaries", &[])?,
            pending_otps: self.count("SELECT COUNT(*) FROM otp_challenges", &[])?,
            deleted_transactions: self.count(
                "SELECT COUNT(*) FROM deleted_transactions WHERE restored_at IS NULL",
                &[],
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn repo() -> DuckDbRepository {
        let repo = DuckDbRepository::open_in_memory().unwrap();
        repo.ensure_schema().unwrap();
        repo
    }

    fn account(user_id: Uuid, number: &str) -> Account {
        Account::open(user_id, number, "Checking", "USD").unwrap()
    }

    #[test]
    fn test_account_round_trip_keeps_cents() {
        let repo = repo();
        let user = Uuid::new_v4();
        let mut acc = account(user, "1234567890");
        acc.balance = Decimal::new(100050, 2);

        repo.in_transaction(|store| store.insert_account(&acc)).unwrap();
        let loaded = repo
            .read(|store| store.find_account("1234567890"))
            .unwrap()
            .unwrap();

        assert_eq!(loaded.balance, Decimal::new(100050, 2));
        assert_eq!(loaded.user_id, user);
        assert_eq!(loaded.version, 0);
    }

    #[test]
    fn test_update_balance_rejects_stale_version() {
        let repo = repo();
        let acc = account(Uuid::new_v4(), "1234567890");
        repo.in_transaction(|store| store.insert_account(&acc)).unwrap();

        repo.in_transaction(|store| store.update_balance("1234567890", Decimal::new(50, 0), 0))
            .unwrap();
        let stale = repo
            .in_transaction(|store| store.update_balance("1234567890", Decimal::new(10, 0), 0));
        assert!(matches!(stale, Err(Error::Conflict(_))));

        let loaded = repo.read(|s| s.find_account("1234567890")).unwrap().unwrap();
        assert_eq!(loaded.balance, Decimal::new(50, 0));
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn test_failed_unit_of_work_rolls_back() {
        let repo = repo();
        let acc = account(Uuid::new_v4(), "1234567890");

        let result: Result<()> = repo.in_transaction(|store| {
            store.insert_account(&acc)?;
            Err(Error::validation("abort"))
        });
        assert!(result.is_err());
        assert!(repo.read(|s| s.find_account("1234567890")).unwrap().is_none());
    }

    #[test]
    fn test_challenge_replace_and_consume() {
        let repo = repo();
        let user = Uuid::new_v4();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let first = OtpChallenge::new(user, "hash-1".into(), now, chrono::Duration::minutes(10));
        let second = OtpChallenge::new(user, "hash-2".into(), now, chrono::Duration::minutes(10));

        repo.in_transaction(|s| s.put_challenge(&first)).unwrap();
        repo.in_transaction(|s| s.put_challenge(&second)).unwrap();

        let stored = repo.read(|s| s.find_challenge(user)).unwrap().unwrap();
        assert_eq!(stored.code_hash, "hash-2");
        assert_eq!(stored.expires_at, now + chrono::Duration::minutes(10));

        assert_eq!(repo.in_transaction(|s| s.consume_challenge(user, "hash-1")).unwrap(), 0);
        assert_eq!(repo.in_transaction(|s| s.consume_challenge(user, "hash-2")).unwrap(), 1);
        assert!(repo.read(|s| s.find_challenge(user)).unwrap().is_none());
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let a = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap();
        assert!(format_timestamp(&a) < format_timestamp(&b));
        assert_eq!(parse_timestamp(&format_timestamp(&b)).unwrap(), b);
    }
}
