//! Account statements as CSV

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::money;
use crate::domain::result::{Error, Result};
use crate::domain::{Identity, Transaction};

#[derive(Serialize)]
struct StatementRow<'a> {
    date: String,
    reference: &'a str,
    #[serde(rename = "type")]
    transaction_type: &'a str,
    transfer_type: Option<&'a str>,
    description: &'a str,
    counterparty: Option<String>,
    amount: String,
    balance_after: String,
    currency: &'a str,
}

fn csv_error(e: csv::Error) -> Error {
    Error::Other(format!("CSV write failed: {}", e))
}

pub struct StatementService {
    repository: Arc<DuckDbRepository>,
}

impl StatementService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    fn load(&self, identity: &Identity, account_number: &str) -> Result<Vec<Transaction>> {
        let mut transactions = self.repository.read(|store| {
            store
                .find_account(account_number)?
                .filter(|a| identity.can_access(a.user_id))
                .ok_or_else(|| Error::not_found(format!("account {}", account_number)))?;
            store.transactions_for_account(account_number, None)
        })?;
        // Statements read oldest first
        transactions.reverse();
        Ok(transactions)
    }

    /// Write the full history of an account to `out`; returns the row count
    pub fn write_csv<W: Write>(
        &self,
        identity: &Identity,
        account_number: &str,
        out: W,
    ) -> Result<usize> {
        let transactions = self.load(identity, account_number)?;
        let mut writer = csv::WriterBuilder::new().from_writer(out);
        for tx in &transactions {
            writer
                .serialize(StatementRow {
                    date: tx.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    reference: &tx.reference,
                    transaction_type: tx.transaction_type.as_str(),
                    transfer_type: tx.transfer_type.map(|t| t.as_str()),
                    description: &tx.description,
                    counterparty: tx.recipient.as_ref().map(|r| r.label()),
                    amount: money::format_amount(tx.amount),
                    balance_after: money::format_amount(tx.balance_after),
                    currency: &tx.currency,
                })
                .map_err(csv_error)?;
        }
        writer.flush()?;
        Ok(transactions.len())
    }

    /// Export to a file
    pub fn export_csv(&self, identity: &Identity, account_number: &str, path: &Path) -> Result<usize> {
        let file = std::fs::File::create(path)?;
        let rows = self.write_csv(identity, account_number, file)?;
        log::info!(
            "Exported {} transaction(s) of {} to {}",
            rows,
            account_number,
            path.display()
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, Role, TransactionType, User};
    use crate::services::recorder::{NewTransaction, TransactionRecorder};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    #[test]
    fn test_statement_is_oldest_first_and_owner_only() {
        let repository = Arc::new(DuckDbRepository::open_in_memory().unwrap());
        repository.ensure_schema().unwrap();
        let user = User::new("ann@example.com", "Ann", "x", Role::Customer);
        let account = Account::open(user.id, "1000000001", "Main", "USD").unwrap();
        repository
            .in_transaction(|store| {
                store.insert_user(&user)?;
                store.insert_account(&account)?;
                for (day, amount, reference) in [(1, 100, "DEP-1"), (2, -30, "WDR-1")] {
                    TransactionRecorder::record(
                        store,
                        NewTransaction {
                            user_id: user.id,
                            account_number: "1000000001".into(),
                            amount: Decimal::new(amount, 0),
                            transaction_type: if amount > 0 {
                                TransactionType::Deposit
                            } else {
                                TransactionType::Withdrawal
                            },
                            transfer_type: None,
                            description: "teller".into(),
                            balance_after: Decimal::new(100, 0),
                            reference: reference.into(),
                            currency: "USD".into(),
                            recipient: None,
                            created_at: Utc.with_ymd_and_hms(2025, 3, day, 9, 0, 0).unwrap(),
                        },
                    )?;
                }
                Ok(())
            })
            .unwrap();

        let service = StatementService::new(repository);
        let mut out = Vec::new();
        let rows = service
            .write_csv(&user.identity(), "1000000001", &mut out)
            .unwrap();
        assert_eq!(rows, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("date,reference,type"));
        assert!(lines[1].contains("DEP-1"));
        assert!(lines[2].contains("WDR-1"));
        assert!(lines[2].contains("-30.00"));

        let stranger = Identity::customer(Uuid::new_v4());
        assert!(matches!(
            service.write_csv(&stranger, "1000000001", Vec::new()),
            Err(Error::NotFound(_))
        ));
    }
}
