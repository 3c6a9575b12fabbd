//! OTP challenge domain model

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Smallest and largest codes that can be issued (always six digits)
pub const OTP_MIN: u32 = 100_000;
pub const OTP_MAX: u32 = 999_999;

/// Default lifetime of a challenge
pub const DEFAULT_OTP_TTL_SECONDS: u64 = 600;

/// A pending challenge. Only the salted hash of the code is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpChallenge {
    pub user_id: Uuid,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl OtpChallenge {
    pub fn new(user_id: Uuid, code_hash: String, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            user_id,
            code_hash,
            expires_at: now + ttl,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Uniform random code in [100000, 999999]
pub fn generate_code() -> String {
    rand::thread_rng().gen_range(OTP_MIN..=OTP_MAX).to_string()
}

/// Outcome of checking a submitted code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OtpVerdict {
    Valid,
    NoChallenge,
    Expired,
    Mismatch,
}

impl OtpVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, OtpVerdict::Valid)
    }

    /// Turn a failed verdict into the matching client error
    pub fn into_result(self) -> super::result::Result<()> {
        use super::result::{Error, OtpFailure};
        match self {
            OtpVerdict::Valid => Ok(()),
            OtpVerdict::NoChallenge => Err(Error::Otp(OtpFailure::NoChallenge)),
            OtpVerdict::Expired => Err(Error::Otp(OtpFailure::Expired)),
            OtpVerdict::Mismatch => Err(Error::Otp(OtpFailure::Mismatch)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let value: u32 = code.parse().unwrap();
            assert!((OTP_MIN..=OTP_MAX).contains(&value));
        }
    }

    #[test]
    fn test_expiry_is_strict() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let challenge = OtpChallenge::new(Uuid::new_v4(), "h".into(), now, Duration::seconds(600));
        assert!(!challenge.is_expired(now + Duration::seconds(600)));
        assert!(challenge.is_expired(now + Duration::seconds(601)));
    }
}
