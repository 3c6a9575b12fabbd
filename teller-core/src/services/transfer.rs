//! Transfer orchestrator
//!
//! Drives every balance change: transfers (internal, domestic,
//! international), bill payments, and teller deposits and withdrawals.
//!
//! Initiation validates and, when the OTP policy says so, mails a code.
//! Completion takes the same parameters again plus the code, verifies it,
//! and commits. The commit re-checks everything it depends on and writes
//! the transaction, receipt, balance and summary in one unit of work, in
//! that order. The balance write is a compare-and-swap on the account
//! version, so two commits that read the same balance cannot both land.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::adapters::duckdb::{DuckDbRepository, LedgerStore};
use crate::config::OtpConfig;
use crate::domain::money;
use crate::domain::result::{Error, ErrorClass, Result};
use crate::domain::{
    generate_reference, Account, BillPaymentCompletion, BillPaymentRequest, Destination,
    Identity, InitiateResponse, Receipt, RecipientDetails, Transaction, TransactionStatus,
    TransactionType, TransferCompletion, TransferOutcome, TransferRequest, TransferStage,
    TransferType, ValidatedTransfer,
};
use crate::ports::{Clock, NotificationSender};
use crate::services::logging::{LogEvent, LoggingService};
use crate::services::otp::OtpService;
use crate::services::recorder::{NewTransaction, TransactionRecorder};
use crate::services::summary::SummaryService;

/// Answer to "did reference X complete?"
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceStatus {
    pub reference: String,
    pub status: TransactionStatus,
    pub account_number: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Debit,
    Credit,
}

/// One balance change on its way to the ledger
#[derive(Debug, Clone)]
struct Movement {
    account: Option<String>,
    amount: Decimal,
    direction: Direction,
    transaction_type: TransactionType,
    transfer_type: Option<TransferType>,
    description: String,
    recipient: Option<RecipientDetails>,
    /// Internal transfers also credit this account in the same unit of work
    credit_to: Option<String>,
}

impl Movement {
    fn transfer(validated: &ValidatedTransfer) -> Self {
        let credit_to = match &validated.destination {
            Destination::Internal { account_number } => Some(account_number.clone()),
            _ => None,
        };
        Self {
            account: validated.from_account.clone(),
            amount: validated.amount,
            direction: Direction::Debit,
            transaction_type: TransactionType::Transfer,
            transfer_type: Some(validated.destination.transfer_type()),
            description: validated.description.clone(),
            recipient: Some(validated.recipient()),
            credit_to,
        }
    }

    fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Debit => -self.amount,
            Direction::Credit => self.amount,
        }
    }
}

/// The account a caller acts on: the named one if they may use it,
/// otherwise their oldest account
fn resolve_source(
    store: &LedgerStore<'_>,
    identity: &Identity,
    account_number: Option<&str>,
) -> Result<Account> {
    match account_number {
        Some(number) => store
            .find_account(number)?
            .filter(|a| identity.can_access(a.user_id))
            .ok_or_else(|| Error::not_found(format!("account {}", number))),
        None => store
            .accounts_for_user(identity.user_id)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("no account is open for this user")),
    }
}

/// Internal destination checks, run at initiation and again at commit
fn resolve_internal_recipient(
    store: &LedgerStore<'_>,
    source: &Account,
    account_number: &str,
) -> Result<Account> {
    let recipient = store
        .find_account(account_number)?
        .ok_or_else(|| Error::RecipientNotFound(account_number.to_string()))?;
    if recipient.account_number == source.account_number {
        return Err(Error::validation("cannot transfer to the same account"));
    }
    if recipient.currency != source.currency {
        return Err(Error::validation(format!(
            "cannot transfer {} into a {} account",
            source.currency, recipient.currency
        )));
    }
    Ok(recipient)
}

pub struct TransferService {
    repository: Arc<DuckDbRepository>,
    otp: Arc<OtpService>,
    notifier: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
    policy: OtpConfig,
    events: Option<Arc<LoggingService>>,
}

impl TransferService {
    pub fn new(
        repository: Arc<DuckDbRepository>,
        otp: Arc<OtpService>,
        notifier: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
        policy: OtpConfig,
    ) -> Self {
        Self {
            repository,
            otp,
            notifier,
            clock,
            policy,
            events: None,
        }
    }

    /// Also record failures in the structured event log
    pub fn with_event_log(mut self, events: Arc<LoggingService>) -> Self {
        self.events = Some(events);
        self
    }

    fn stage(&self, identity: &Identity, stage: TransferStage, detail: &str) {
        log::debug!("[{}] user {}: {}", stage.as_str(), identity.user_id, detail);
    }

    // === Transfers ===

    /// First step of a transfer.
    ///
    /// Validates the request against the current ledger and, if the amount
    /// needs one, mails an OTP. Nothing else is stored.
    pub fn initiate(&self, identity: &Identity, request: &TransferRequest) -> Result<InitiateResponse> {
        self.stage(identity, TransferStage::Validating, &request.transfer_type);
        let validated = request.validate()?;

        let source = self.repository.read(|store| {
            let source = resolve_source(store, identity, validated.from_account.as_deref())?;
            if let Destination::Internal { account_number } = &validated.destination {
                resolve_internal_recipient(store, &source, account_number)?;
            }
            Ok(source)
        })?;
        source.ensure_can_debit(validated.amount)?;

        if !self.policy.requires_otp(validated.amount) {
            return Ok(InitiateResponse::ready());
        }

        self.stage(identity, TransferStage::AwaitingOtp, &source.account_number);
        let purpose = format!(
            "a {} transfer of {} {} to {}",
            validated.destination.transfer_type().as_str(),
            money::format_amount(validated.amount),
            source.currency,
            validated.destination.account_number()
        );
        self.send_otp(identity, &purpose)?;
        Ok(InitiateResponse::otp_sent())
    }

    /// Second step of a transfer: verify the code and commit
    pub fn complete(&self, identity: &Identity, completion: &TransferCompletion) -> Result<TransferOutcome> {
        self.stage(identity, TransferStage::Validating, &completion.request.transfer_type);
        let validated = completion.request.validate()?;

        if self.policy.requires_otp(validated.amount) {
            self.stage(identity, TransferStage::Verifying, "checking code");
            self.otp.require(identity.user_id, completion.otp.as_deref())?;
        }

        let outcome = self.commit(identity, Movement::transfer(&validated))?;
        self.send_notice(&outcome.transaction);
        Ok(outcome)
    }

    // === Bill payments ===

    /// First step of a bill payment; always mails an OTP
    pub fn initiate_payment(
        &self,
        identity: &Identity,
        request: &BillPaymentRequest,
    ) -> Result<InitiateResponse> {
        self.stage(identity, TransferStage::Validating, "bill payment");
        let validated = request.validate()?;
        let source = self.repository.read(|store| {
            resolve_source(store, identity, validated.from_account.as_deref())
        })?;
        source.ensure_can_debit(validated.amount)?;

        self.stage(identity, TransferStage::AwaitingOtp, &source.account_number);
        let purpose = format!(
            "a payment of {} {} to {}",
            money::format_amount(validated.amount),
            source.currency,
            validated.biller
        );
        self.send_otp(identity, &purpose)?;
        Ok(InitiateResponse::otp_sent())
    }

    /// Second step of a bill payment. The biller is not looked up; the code
    /// is required regardless of amount or OTP settings.
    pub fn complete_payment(
        &self,
        identity: &Identity,
        completion: &BillPaymentCompletion,
    ) -> Result<TransferOutcome> {
        let validated = completion.request.validate()?;
        self.stage(identity, TransferStage::Verifying, "bill payment");
        self.otp.require(identity.user_id, completion.otp.as_deref())?;

        let outcome = self.commit(
            identity,
            Movement {
                account: validated.from_account.clone(),
                amount: validated.amount,
                direction: Direction::Debit,
                transaction_type: TransactionType::Payment,
                transfer_type: None,
                description: validated.description.clone(),
                recipient: Some(validated.recipient()),
                credit_to: None,
            },
        )?;
        self.send_notice(&outcome.transaction);
        Ok(outcome)
    }

    // === Teller operations ===

    /// Credit an account (administrators only)
    pub fn deposit(
        &self,
        identity: &Identity,
        account_number: &str,
        amount: &str,
        description: Option<&str>,
    ) -> Result<TransferOutcome> {
        identity.require_admin()?;
        let amount = money::parse_amount(amount)?;
        let outcome = self.commit(
            identity,
            Movement {
                account: Some(account_number.to_string()),
                amount,
                direction: Direction::Credit,
                transaction_type: TransactionType::Deposit,
                transfer_type: None,
                description: description.unwrap_or("Cash deposit").to_string(),
                recipient: None,
                credit_to: None,
            },
        )?;
        self.send_notice(&outcome.transaction);
        Ok(outcome)
    }

    /// Debit an account (administrators only)
    pub fn withdraw(
        &self,
        identity: &Identity,
        account_number: &str,
        amount: &str,
        description: Option<&str>,
    ) -> Result<TransferOutcome> {
        identity.require_admin()?;
        let amount = money::parse_amount(amount)?;
        let outcome = self.commit(
            identity,
            Movement {
                account: Some(account_number.to_string()),
                amount,
                direction: Direction::Debit,
                transaction_type: TransactionType::Withdrawal,
                transfer_type: None,
                description: description.unwrap_or("Cash withdrawal").to_string(),
                recipient: None,
                credit_to: None,
            },
        )?;
        self.send_notice(&outcome.transaction);
        Ok(outcome)
    }

    // === Lookups ===

    /// Whether the movement identified by `reference` completed.
    ///
    /// References belonging to someone else are reported as unknown.
    pub fn status(&self, identity: &Identity, reference: &str) -> Result<ReferenceStatus> {
        let tx = self
            .repository
            .read(|store| store.find_transaction_by_reference(reference.trim()))?
            .filter(|tx| identity.can_access(tx.user_id))
            .ok_or_else(|| Error::not_found(format!("reference {}", reference)))?;
        Ok(ReferenceStatus {
            reference: tx.reference,
            status: tx.status,
            account_number: tx.account_number,
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            balance_after: tx.balance_after,
            currency: tx.currency,
            created_at: tx.created_at,
        })
    }

    /// Receipt for a reference
    pub fn receipt(&self, identity: &Identity, reference: &str) -> Result<Receipt> {
        self.repository
            .read(|store| store.find_receipt_by_reference(reference.trim()))?
            .filter(|r| identity.can_access(r.user_id))
            .ok_or_else(|| Error::not_found(format!("receipt for {}", reference)))
    }

    /// Newest transactions of an account
    pub fn history(
        &self,
        identity: &Identity,
        account_number: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        self.repository.read(|store| {
            let account = resolve_source(store, identity, account_number)?;
            store.transactions_for_account(&account.account_number, limit)
        })
    }

    // === Commit ===

    fn commit(&self, identity: &Identity, movement: Movement) -> Result<TransferOutcome> {
        self.stage(identity, TransferStage::Committing, movement.transaction_type.as_str());
        let now = self.clock.now().trunc_subsecs(6);
        let reference = generate_reference(movement.transaction_type, now);

        let result = self.repository.in_transaction(|store| {
            let account = resolve_source(store, identity, movement.account.as_deref())?;
            let credit_target = match &movement.credit_to {
                Some(number) => Some(resolve_internal_recipient(store, &account, number)?),
                None => None,
            };
            if movement.direction == Direction::Debit {
                account.ensure_can_debit(movement.amount)?;
            }

            let signed = movement.signed_amount();
            let new_balance = money::apply_to_balance(account.balance, signed)?;
            if new_balance.is_sign_negative() && !new_balance.is_zero() {
                return Err(Error::InsufficientFunds {
                    available: account.balance,
                    requested: movement.amount,
                });
            }

            let (transaction, _) = TransactionRecorder::record(
                store,
                NewTransaction {
                    user_id: account.user_id,
                    account_number: account.account_number.clone(),
                    amount: signed,
                    transaction_type: movement.transaction_type,
                    transfer_type: movement.transfer_type,
                    description: movement.description.clone(),
                    balance_after: new_balance,
                    reference: reference.clone(),
                    currency: account.currency.clone(),
                    recipient: movement.recipient.clone(),
                    created_at: now,
                },
            )?;
            store.update_balance(&account.account_number, new_balance, account.version)?;
            SummaryService::apply(
                store,
                account.user_id,
                &account.account_number,
                signed,
                movement.transaction_type,
                &account.currency,
                now,
            )?;

            if let Some(target) = credit_target {
                Self::credit_leg(store, &account, &target, &movement, &reference, now)?;
            }

            Ok(TransferOutcome {
                new_balance,
                currency: account.currency.clone(),
                reference: reference.clone(),
                transaction,
            })
        });

        match &result {
            Ok(outcome) => {
                self.stage(identity, TransferStage::Completed, &outcome.reference);
                log::info!(
                    "Committed {} {} on {} ({})",
                    movement.transaction_type.as_str(),
                    outcome.transaction.amount,
                    outcome.transaction.account_number,
                    outcome.reference
                );
                if let Some(events) = &self.events {
                    events.record(
                        LogEvent::new(format!("{}_completed", movement.transaction_type.as_str()))
                            .with_user(identity.user_id)
                            .with_account(&outcome.transaction.account_number)
                            .with_reference(&outcome.reference),
                    );
                }
            }
            Err(e) => self.report_failure(identity, &movement, &reference, e),
        }
        result
    }

    /// Recipient side of an internal transfer, inside the sender's unit of work
    fn credit_leg(
        store: &LedgerStore<'_>,
        sender: &Account,
        recipient: &Account,
        movement: &Movement,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let new_balance = money::apply_to_balance(recipient.balance, movement.amount)?;
        let mut counterparty = RecipientDetails::account(&sender.account_number);
        counterparty.account_name = Some(sender.display_name.clone());

        TransactionRecorder::record(
            store,
            NewTransaction {
                user_id: recipient.user_id,
                account_number: recipient.account_number.clone(),
                amount: movement.amount,
                transaction_type: TransactionType::Transfer,
                transfer_type: Some(TransferType::Internal),
                description: format!("Transfer from {}", sender.account_number),
                balance_after: new_balance,
                reference: format!("{}-CR", reference),
                currency: recipient.currency.clone(),
                recipient: Some(counterparty),
                created_at: now,
            },
        )?;
        store.update_balance(&recipient.account_number, new_balance, recipient.version)?;
        SummaryService::apply(
            store,
            recipient.user_id,
            &recipient.account_number,
            movement.amount,
            TransactionType::Transfer,
            &recipient.currency,
            now,
        )?;
        Ok(())
    }

    fn report_failure(&self, identity: &Identity, movement: &Movement, reference: &str, error: &Error) {
        let account = movement.account.as_deref().unwrap_or("primary");
        match error.class() {
            ErrorClass::Client => {
                self.stage(identity, TransferStage::Rejected, &error.to_string());
            }
            ErrorClass::Conflict | ErrorClass::Dependency => {
                self.stage(identity, TransferStage::Failed, &error.to_string());
                log::error!(
                    "{} failed for user {} account {} reference {}: {}",
                    movement.transaction_type.as_str(),
                    identity.user_id,
                    account,
                    reference,
                    error
                );
                if let Some(events) = &self.events {
                    events.record(
                        LogEvent::new(format!("{}_failed", movement.transaction_type.as_str()))
                            .with_user(identity.user_id)
                            .with_account(account)
                            .with_reference(reference)
                            .with_error(error.to_string()),
                    );
                }
            }
        }
    }

    fn send_otp(&self, identity: &Identity, purpose: &str) -> Result<()> {
        let user = self
            .repository
            .read(|store| store.find_user(identity.user_id))?
            .ok_or_else(|| Error::not_found("user"))?;
        if let Err(e) = self.otp.issue_and_send(&user, purpose) {
            if let Some(events) = &self.events {
                events.record(
                    LogEvent::new("otp_delivery_failed")
                        .with_user(user.id)
                        .with_error(e.to_string()),
                );
            }
            return Err(e);
        }
        Ok(())
    }

    /// Best-effort notice to the account owner; never fails the movement
    fn send_notice(&self, tx: &Transaction) {
        let user = match self.repository.read(|store| store.find_user(tx.user_id)) {
            Ok(Some(user)) => user,
            Ok(None) => return,
            Err(e) => {
                log::warn!("Notice for {} skipped: {}", tx.reference, e);
                return;
            }
        };
        let body = format!(
            "{} of {} {} on account {}.\nReference: {}\nBalance after: {} {}",
            tx.transaction_type.as_str(),
            money::format_amount(tx.amount.abs()),
            tx.currency,
            tx.account_number,
            tx.reference,
            money::format_amount(tx.balance_after),
            tx.currency
        );
        if let Err(e) = self.notifier.send(&user.email, "Transaction notice", &body) {
            log::warn!("Notice for {} not delivered: {}", tx.reference, e);
        }
    }
}
