//! Status service - ledger overview

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::adapters::duckdb::{DuckDbRepository, LedgerCounts};
use crate::domain::result::Result;
use crate::domain::Identity;

/// Status service for the ledger overview
pub struct StatusService {
    repository: Arc<DuckDbRepository>,
}

impl StatusService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Overview of the caller's accounts, or of the whole bank for admins
    pub fn get_status(&self, identity: &Identity) -> Result<StatusSummary> {
        let (accounts, counts) = self.repository.read(|store| {
            let accounts = if identity.is_admin() {
                store.list_accounts()?
            } else {
                store.accounts_for_user(identity.user_id)?
            };
            let counts = if identity.is_admin() {
                Some(store.counts()?)
            } else {
                None
            };
            Ok((accounts, counts))
        })?;
        let db_size_bytes = if identity.is_admin() {
            Some(self.repository.get_db_size()?)
        } else {
            None
        };

        Ok(StatusSummary {
            total_accounts: accounts.len() as i64,
            accounts: accounts
                .into_iter()
                .map(|a| AccountLine {
                    account_number: a.account_number,
                    name: a.display_name,
                    balance: a.balance,
                    currency: a.currency,
                })
                .collect(),
            counts,
            db_size_bytes,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub total_accounts: i64,
    pub accounts: Vec<AccountLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<LedgerCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_size_bytes: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLine {
    pub account_number: String,
    pub name: String,
    pub balance: Decimal,
    pub currency: String,
}
