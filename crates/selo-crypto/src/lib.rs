//! Hashing, token and one-time-code primitives for selo.
//!
//! Everything here is pure or capability-injected: callers pass a [`Clock`]
//! and an [`Entropy`] source so tests can pin time and randomness while
//! production wires [`SystemClock`] and [`OsEntropy`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

mod mask;

pub use mask::{mask_email, mask_phone};

/// Byte length of a cleartext share token before encoding.
pub const SHARE_TOKEN_BYTES: usize = 32;

const OTP_RANGE: u32 = 900_000;
const OTP_FLOOR: u32 = 100_000;

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 over the UTF-8 concatenation of several parts.
pub fn sha256_hex_concat(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Time source. Injected so tests can drive the clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests: every reading advances by one millisecond
/// so per-entity chains stay strictly ordered.
pub struct ManualClock {
    current: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: std::sync::Mutex::new(start),
        }
    }

    /// Jump the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap();
        *current += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut current = self.current.lock().unwrap();
        *current += Duration::milliseconds(1);
        *current
    }
}

/// Cryptographically strong random bytes. Injected so tests can fix codes.
pub trait Entropy: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

/// OS-seeded CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEntropy;

impl Entropy for OsEntropy {
    fn fill(&self, buf: &mut [u8]) {
        rand::fill(buf);
    }
}

/// Test entropy that repeats a fixed byte pattern.
pub struct FixedEntropy(pub Vec<u8>);

impl Entropy for FixedEntropy {
    fn fill(&self, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.0[i % self.0.len()];
        }
    }
}

/// Generate a fresh URL-safe share token (32 random bytes, base64url).
pub fn generate_share_token(entropy: &dyn Entropy) -> String {
    let mut bytes = [0u8; SHARE_TOKEN_BYTES];
    entropy.fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Lookup hash of a share token. Only this value is ever persisted.
pub fn share_token_hash(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

/// Draw a uniform 6-digit one-time code in `[100000, 999999]`.
///
/// Rejection sampling over 4-byte draws keeps the distribution unbiased.
pub fn six_digit_code(entropy: &dyn Entropy) -> String {
    let zone = (u32::MAX / OTP_RANGE) * OTP_RANGE;
    loop {
        let mut bytes = [0u8; 4];
        entropy.fill(&mut bytes);
        let draw = u32::from_be_bytes(bytes);
        if draw < zone {
            return format!("{}", OTP_FLOOR + draw % OTP_RANGE);
        }
    }
}

/// Errors from code hashing
#[derive(Debug, Error)]
pub enum CodeHashError {
    #[error("code hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// bcrypt-hash a one-time code with the configured cost.
pub fn hash_code(code: &str, cost: u32) -> Result<String, CodeHashError> {
    Ok(bcrypt::hash(code, cost)?)
}

/// Compare a presented code against its stored hash. Malformed hashes read as
/// a mismatch rather than an error.
pub fn verify_code(code: &str, code_hash: &str) -> bool {
    bcrypt::verify(code, code_hash).unwrap_or(false)
}
