//! One-time code types.

use chrono::{DateTime, Utc};

use super::signers::AuthChannel;
use super::OtpCodeId;

/// Context under which signing codes are issued.
pub const OTP_CONTEXT_SIGNING: &str = "SIGNING";

/// Short-lived challenge code row. `code_hash` is bcrypt; the row is deleted
/// on successful verification so a code can never be replayed.
#[derive(Clone, Debug)]
pub struct OtpCode {
    pub id: OtpCodeId,
    pub recipient: String,
    pub channel: AuthChannel,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub context: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters for persisting a delivered code
#[derive(Clone, Debug)]
pub struct CreateOtpCodeParams {
    pub recipient: String,
    pub channel: AuthChannel,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub context: String,
}
