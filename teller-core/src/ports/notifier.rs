//! Notification port - out-of-band delivery of codes and notices

use crate::domain::result::Result;

/// Delivers a message to a user's registered address.
///
/// A returned error means the message was not handed off; callers decide
/// whether that fails the operation (OTP issuance) or is only logged
/// (transaction notices).
pub trait NotificationSender: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}
