//! OTP challenge manager
//!
//! At most one pending challenge per user, stored as an Argon2id hash with
//! an expiry. A second `issue` for the same user replaces the first, so a
//! code mailed for an earlier initiation stops working (last writer wins).

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use crate::adapters::duckdb::DuckDbRepository;
use crate::config::OtpConfig;
use crate::domain::otp::{generate_code, OtpChallenge, OtpVerdict};
use crate::domain::result::{Error, OtpFailure, Result};
use crate::domain::{SecretHasher, User};
use crate::ports::{Clock, NotificationSender};

pub const OTP_SUBJECT: &str = "Your verification code";

pub struct OtpService {
    repository: Arc<DuckDbRepository>,
    notifier: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
    hasher: SecretHasher,
    ttl: Duration,
}

impl OtpService {
    pub fn new(
        repository: Arc<DuckDbRepository>,
        notifier: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
        config: &OtpConfig,
    ) -> Self {
        Self {
            repository,
            notifier,
            clock,
            hasher: SecretHasher::new(config.hash),
            ttl: Duration::seconds(config.ttl_seconds as i64),
        }
    }

    fn store(&self, user_id: Uuid) -> Result<(String, OtpChallenge)> {
        let code = generate_code();
        let challenge = OtpChallenge::new(user_id, self.hasher.hash(&code)?, self.clock.now(), self.ttl);
        self.repository
            .in_transaction(|store| store.put_challenge(&challenge))?;
        Ok((code, challenge))
    }

    /// Create a challenge for `user_id` and return the plaintext code.
    ///
    /// Only the hash is stored. Any pending challenge is replaced.
    pub fn issue(&self, user_id: Uuid) -> Result<String> {
        let (code, _) = self.store(user_id)?;
        Ok(code)
    }

    /// Issue a code and mail it to the user.
    ///
    /// If delivery fails the stored challenge is withdrawn again and
    /// `Error::Notification` is returned: a challenge nobody was told
    /// about never stays pending.
    pub fn issue_and_send(&self, user: &User, purpose: &str) -> Result<()> {
        let (code, challenge) = self.store(user.id)?;
        let minutes = (self.ttl.num_seconds() + 59) / 60;
        let body = format!(
            "Your verification code is {}. Use it to confirm {}. It expires in {} minutes. \
             If you did not request this, contact the bank.",
            code, purpose, minutes
        );

        if let Err(e) = self.notifier.send(&user.email, OTP_SUBJECT, &body) {
            log::error!("OTP delivery failed for user {}: {}", user.id, e);
            // Only withdraw our own challenge; a newer one may have replaced it
            let removed = self
                .repository
                .in_transaction(|store| store.consume_challenge(user.id, &challenge.code_hash));
            if let Err(cleanup) = removed {
                log::error!(
                    "Could not withdraw undelivered OTP for user {}: {}",
                    user.id,
                    cleanup
                );
            }
            return Err(match e {
                Error::Notification(msg) => Error::Notification(msg),
                other => Error::Notification(other.to_string()),
            });
        }

        log::info!("OTP issued for user {} ({})", user.id, purpose);
        Ok(())
    }

    /// Check `code` against the pending challenge.
    ///
    /// Expired challenges are cleared. A mismatch leaves the challenge in
    /// place for a retry. A match consumes it; if a concurrent verify (or a
    /// re-issue) got there first the result is `NoChallenge`.
    pub fn verify(&self, user_id: Uuid, code: &str) -> Result<OtpVerdict> {
        let Some(challenge) = self.repository.read(|store| store.find_challenge(user_id))? else {
            return Ok(OtpVerdict::NoChallenge);
        };

        if challenge.is_expired(self.clock.now()) {
            self.repository
                .in_transaction(|store| store.consume_challenge(user_id, &challenge.code_hash))?;
            log::info!("OTP for user {} expired", user_id);
            return Ok(OtpVerdict::Expired);
        }

        if !self.hasher.verify(code.trim(), &challenge.code_hash) {
            log::info!("OTP mismatch for user {}", user_id);
            return Ok(OtpVerdict::Mismatch);
        }

        let consumed = self
            .repository
            .in_transaction(|store| store.consume_challenge(user_id, &challenge.code_hash))?;
        if consumed == 1 {
            Ok(OtpVerdict::Valid)
        } else {
            Ok(OtpVerdict::NoChallenge)
        }
    }

    /// Verify a code that may be missing; `Ok(())` only for a valid code
    pub fn require(&self, user_id: Uuid, code: Option<&str>) -> Result<()> {
        match code.map(str::trim).filter(|c| !c.is_empty()) {
            None => Err(Error::Otp(OtpFailure::Required)),
            Some(code) => self.verify(user_id, code)?.into_result(),
        }
    }

    /// Drop the pending challenge, if any
    pub fn revoke(&self, user_id: Uuid) -> Result<bool> {
        Ok(self
            .repository
            .in_transaction(|store| store.delete_challenge(user_id))?
            > 0)
    }

    /// Sweep challenges past their expiry
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let removed = self
            .repository
            .in_transaction(|store| store.delete_expired_challenges(now))?;
        if removed > 0 {
            log::info!("Purged {} expired OTP challenges", removed);
        }
        Ok(removed)
    }

    pub fn has_pending(&self, user_id: Uuid) -> Result<bool> {
        Ok(self
            .repository
            .read(|store| store.find_challenge(user_id))?
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ManualClock, MemoryNotifier};
    use crate::domain::{HashParams, Role};
    use chrono::{TimeZone, Utc};

    struct Fixture {
        service: OtpService,
        clock: Arc<ManualClock>,
        notifier: Arc<MemoryNotifier>,
        repository: Arc<DuckDbRepository>,
    }

    fn fixture() -> Fixture {
        let repository = Arc::new(DuckDbRepository::open_in_memory().unwrap());
        repository.ensure_schema().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap(),
        ));
        let notifier = Arc::new(MemoryNotifier::new());
        let config = OtpConfig {
            hash: HashParams {
                memory_kib: 64,
                iterations: 1,
            },
            ..OtpConfig::default()
        };
        let service = OtpService::new(
            Arc::clone(&repository),
            notifier.clone(),
            clock.clone(),
            &config,
        );
        Fixture {
            service,
            clock,
            notifier,
            repository,
        }
    }

    #[test]
    fn test_code_is_single_use() {
        let f = fixture();
        let user = Uuid::new_v4();
        let code = f.service.issue(user).unwrap();

        assert_eq!(f.service.verify(user, &code).unwrap(), OtpVerdict::Valid);
        assert_eq!(f.service.verify(user, &code).unwrap(), OtpVerdict::NoChallenge);
    }

    #[test]
    fn test_only_hash_is_stored() {
        let f = fixture();
        let user = Uuid::new_v4();
        let code = f.service.issue(user).unwrap();
        let stored = f.repository.read(|s| s.find_challenge(user)).unwrap().unwrap();
        assert_ne!(stored.code_hash, code);
        assert!(!stored.code_hash.contains(&code));
    }

    #[test]
    fn test_mismatch_keeps_challenge() {
        let f = fixture();
        let user = Uuid::new_v4();
        let code = f.service.issue(user).unwrap();
        let wrong = if code == "123456" { "654321" } else { "123456" };

        assert_eq!(f.service.verify(user, wrong).unwrap(), OtpVerdict::Mismatch);
        assert_eq!(f.service.verify(user, &code).unwrap(), OtpVerdict::Valid);
    }

    #[test]
    fn test_expired_challenge_is_cleared() {
        let f = fixture();
        let user = Uuid::new_v4();
        let code = f.service.issue(user).unwrap();

        f.clock.advance(Duration::seconds(601));
        assert_eq!(f.service.verify(user, &code).unwrap(), OtpVerdict::Expired);
        assert!(!f.service.has_pending(user).unwrap());
        assert_eq!(f.service.verify(user, &code).unwrap(), OtpVerdict::NoChallenge);
    }

    #[test]
    fn test_reissue_replaces_previous_code() {
        let f = fixture();
        let user = Uuid::new_v4();
        let first = f.service.issue(user).unwrap();
        let second = f.service.issue(user).unwrap();

        if first != second {
            assert_eq!(f.service.verify(user, &first).unwrap(), OtpVerdict::Mismatch);
        }
        assert_eq!(f.service.verify(user, &second).unwrap(), OtpVerdict::Valid);
    }

    #[test]
    fn test_failed_delivery_leaves_no_challenge() {
        let f = fixture();
        let user = User::new("jane@example.com", "Jane", "x", Role::Customer);
        f.notifier.set_failing(true);

        let err = f.service.issue_and_send(&user, "a transfer").unwrap_err();
        assert!(matches!(err, Error::Notification(_)));
        assert!(!f.service.has_pending(user.id).unwrap());
    }

    #[test]
    fn test_sent_code_verifies() {
        let f = fixture();
        let user = User::new("jane@example.com", "Jane", "x", Role::Customer);
        f.service.issue_and_send(&user, "a transfer").unwrap();

        let code = f.notifier.last_code_for("jane@example.com").unwrap();
        assert!(f.service.require(user.id, Some(&code)).is_ok());
        assert!(matches!(
            f.service.require(user.id, None),
            Err(Error::Otp(OtpFailure::Required))
        ));
    }

    #[test]
    fn test_purge_expired() {
        let f = fixture();
        f.service.issue(Uuid::new_v4()).unwrap();
        f.clock.advance(Duration::minutes(5));
        f.service.issue(Uuid::new_v4()).unwrap();
        f.clock.advance(Duration::minutes(6));

        assert_eq!(f.service.purge_expired().unwrap(), 1);
    }

    #[test]
    fn test_revoke_withdraws_pending_code() {
        let f = fixture();
        let user = Uuid::new_v4();
        let code = f.service.issue(user).unwrap();

        assert!(f.service.revoke(user).unwrap());
        assert!(!f.service.has_pending(user).unwrap());
        assert_eq!(f.service.verify(user, &code).unwrap(), OtpVerdict::NoChallenge);
        assert!(!f.service.revoke(user).unwrap());
    }
}
