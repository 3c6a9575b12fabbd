//! Doctor service - ledger health checks

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::adapters::duckdb::{BalanceDrift, DuckDbRepository};
use crate::domain::money;
use crate::domain::result::Result;
use crate::ports::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warning,
    Error,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<serde_json::Value>>,
}

impl CheckResult {
    fn from_findings(
        findings: Vec<serde_json::Value>,
        failing: CheckStatus,
        ok: &str,
        problem: impl FnOnce(usize) -> String,
    ) -> Self {
        if findings.is_empty() {
            Self {
                status: CheckStatus::Pass,
                message: ok.to_string(),
                details: None,
            }
        } else {
            Self {
                status: failing,
                message: problem(findings.len()),
                details: Some(findings),
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DoctorSummary {
    pub passed: i64,
    pub warnings: i64,
    pub errors: i64,
}

#[derive(Debug, Serialize)]
pub struct DoctorResult {
    pub checks: BTreeMap<String, CheckResult>,
    pub summary: DoctorSummary,
}

impl DoctorResult {
    pub fn is_healthy(&self) -> bool {
        self.summary.errors == 0
    }
}

fn drift_details(drift: &[BalanceDrift]) -> Vec<serde_json::Value> {
    drift
        .iter()
        .map(|d| {
            json!({
                "account_number": d.account_number,
                "recorded": money::format_amount(d.recorded),
                "ledger_total": money::format_amount(d.ledger_total),
            })
        })
        .collect()
}

fn references(refs: Vec<String>) -> Vec<serde_json::Value> {
    refs.into_iter().map(|r| json!({ "reference": r })).collect()
}

/// Doctor service for ledger health checks
pub struct DoctorService {
    repository: Arc<DuckDbRepository>,
    clock: Arc<dyn Clock>,
}

impl DoctorService {
    pub fn new(repository: Arc<DuckDbRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Run all health checks
    pub fn run_checks(&self) -> Result<DoctorResult> {
        let now = self.clock.now();
        let mut checks = BTreeMap::new();

        self.repository.read(|store| {
            let negative: Vec<serde_json::Value> = store
                .negative_balances()?
                .iter()
                .map(|a| {
                    json!({
                        "account_number": a.account_number,
                        "balance": money::format_amount(a.balance),
                    })
                })
                .collect();
            checks.insert(
                "negative_balances".to_string(),
                CheckResult::from_findings(negative, CheckStatus::Error, "No negative balances", |n| {
                    format!("{} account(s) have a negative balance", n)
                }),
            );

            checks.insert(
                "balance_drift".to_string(),
                CheckResult::from_findings(
                    drift_details(&store.balance_drift()?),
                    CheckStatus::Error,
                    "Every balance matches its transactions",
                    |n| format!("{} account balance(s) differ from the ledger; run reconcile", n),
                ),
            );

            checks.insert(
                "summary_drift".to_string(),
                CheckResult::from_findings(
                    drift_details(&store.summary_drift()?),
                    CheckStatus::Warning,
                    "Every summary matches its transactions",
                    |n| format!("{} summary(ies) are stale; run reconcile", n),
                ),
            );

            checks.insert(
                "orphan_receipts".to_string(),
                CheckResult::from_findings(
                    references(store.orphan_receipts()?),
                    CheckStatus::Error,
                    "No orphaned receipts found",
                    |n| format!("{} receipt(s) reference missing transactions", n),
                ),
            );

            checks.insert(
                "receipt_coverage".to_string(),
                CheckResult::from_findings(
                    references(store.transactions_without_single_receipt()?),
                    CheckStatus::Error,
                    "Every transaction has exactly one receipt",
                    |n| format!("{} transaction(s) lack exactly one receipt", n),
                ),
            );

            checks.insert(
                "receipt_consistency".to_string(),
                CheckResult::from_findings(
                    references(store.mismatched_receipts()?),
                    CheckStatus::Error,
                    "Receipts agree with their transactions",
                    |n| format!("{} receipt(s) disagree with their transaction", n),
                ),
            );

            checks.insert(
                "duplicate_references".to_string(),
                CheckResult::from_findings(
                    references(store.duplicate_references()?),
                    CheckStatus::Error,
                    "All references are unique",
                    |n| format!("{} reference(s) are used more than once", n),
                ),
            );

            let stale = store.count_expired_challenges(now)?;
            let stale_details = if stale == 0 {
                Vec::new()
            } else {
                vec![json!({ "expired_count": stale })]
            };
            checks.insert(
                "expired_otps".to_string(),
                CheckResult::from_findings(
                    stale_details,
                    CheckStatus::Warning,
                    "No expired OTP challenges",
                    |_| format!("{} expired OTP challenge(s) waiting to be purged", stale),
                ),
            );
            Ok(())
        })?;

        // Calculate summary
        let count = |status| checks.values().filter(|c| c.status == status).count() as i64;
        let summary = DoctorSummary {
            passed: count(CheckStatus::Pass),
            warnings: count(CheckStatus::Warning),
            errors: count(CheckStatus::Error),
        };

        if summary.errors > 0 {
            log::warn!("Doctor found {} failing check(s)", summary.errors);
        }
        Ok(DoctorResult { checks, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SystemClock;
    use crate::domain::{Account, Role, User};
    use rust_decimal::Decimal;

    #[test]
    fn test_fresh_ledger_is_healthy() {
        let repository = Arc::new(DuckDbRepository::open_in_memory().unwrap());
        repository.ensure_schema().unwrap();
        let doctor = DoctorService::new(repository, Arc::new(SystemClock));

        let result = doctor.run_checks().unwrap();
        assert!(result.is_healthy());
        assert_eq!(result.summary.warnings, 0);
        assert_eq!(result.summary.passed, result.checks.len() as i64);
    }

    #[test]
    fn test_drifted_balance_is_an_error() {
        let repository = Arc::new(DuckDbRepository::open_in_memory().unwrap());
        repository.ensure_schema().unwrap();
        let user = User::new("ann@example.com", "Ann", "x", Role::Customer);
        let account = Account::open(user.id, "1000000001", "Main", "USD").unwrap();
        repository
            .in_transaction(|store| {
                store.insert_user(&user)?;
                store.insert_account(&account)?;
                store.update_balance("1000000001", Decimal::new(5, 0), 0)
            })
            .unwrap();

        let result = DoctorService::new(repository, Arc::new(SystemClock))
            .run_checks()
            .unwrap();
        assert!(!result.is_healthy());
        assert_eq!(result.checks["balance_drift"].status, CheckStatus::Error);
        assert_eq!(result.checks["negative_balances"].status, CheckStatus::Pass);
    }
}
