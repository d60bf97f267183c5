//! Server configuration module.
//!
//! Everything is driven by environment variables with working defaults:
//!
//! ```bash
//! SELO_DATABASE_URL=sqlite://selo.db   # storage backend
//! SELO_BLOB_ROOT=uploads               # document and artefact files
//! SELO_OTP_TTL_MINUTES=10              # one-time code lifetime
//! SELO_INVITE_TTL_DAYS=30              # share-token lifetime when no deadline
//! SELO_SHORTCODE_LENGTH=6              # hex chars of the signature receipt
//! SELO_BCRYPT_COST=10                  # one-time code hash cost
//! SELO_CHAIN_GENESIS_PREFIX=genesis_block_
//! SELO_PUBLIC_BASE_URL=http://localhost:8080  # signing-link base
//! ```

use std::env;
use std::path::PathBuf;

use thiserror::Error;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub blob_root: PathBuf,
    pub otp_ttl_minutes: i64,
    pub invite_ttl_days: i64,
    pub shortcode_length: usize,
    pub bcrypt_cost: u32,
    pub genesis_prefix: String,
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://selo.db".into(),
            blob_root: "uploads".into(),
            otp_ttl_minutes: 10,
            invite_ttl_days: 30,
            shortcode_length: 6,
            bcrypt_cost: 10,
            genesis_prefix: "genesis_block_".into(),
            public_base_url: "http://localhost:8080".into(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidNumber(&'static str, String),

    #[error("SELO_SHORTCODE_LENGTH must be between 1 and 64, got {0}")]
    ShortcodeLengthOutOfRange(usize),

    #[error("SELO_BCRYPT_COST must be between 4 and 31, got {0}")]
    BcryptCostOutOfRange(u32),
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber(name, raw)),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            database_url: env::var("SELO_DATABASE_URL").unwrap_or(defaults.database_url),
            blob_root: env::var("SELO_BLOB_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.blob_root),
            otp_ttl_minutes: parse_var("SELO_OTP_TTL_MINUTES", defaults.otp_ttl_minutes)?,
            invite_ttl_days: parse_var("SELO_INVITE_TTL_DAYS", defaults.invite_ttl_days)?,
            shortcode_length: parse_var("SELO_SHORTCODE_LENGTH", defaults.shortcode_length)?,
            bcrypt_cost: parse_var("SELO_BCRYPT_COST", defaults.bcrypt_cost)?,
            genesis_prefix: env::var("SELO_CHAIN_GENESIS_PREFIX").unwrap_or(defaults.genesis_prefix),
            public_base_url: env::var("SELO_PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url),
        };

        if !(1..=64).contains(&config.shortcode_length) {
            return Err(ConfigError::ShortcodeLengthOutOfRange(
                config.shortcode_length,
            ));
        }
        if !(4..=31).contains(&config.bcrypt_cost) {
            return Err(ConfigError::BcryptCostOutOfRange(config.bcrypt_cost));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_VARS: &[&str] = &[
        "SELO_DATABASE_URL",
        "SELO_BLOB_ROOT",
        "SELO_OTP_TTL_MINUTES",
        "SELO_INVITE_TTL_DAYS",
        "SELO_SHORTCODE_LENGTH",
        "SELO_BCRYPT_COST",
        "SELO_CHAIN_GENESIS_PREFIX",
        "SELO_PUBLIC_BASE_URL",
    ];

    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
    }

    impl<'a> EnvGuard<'a> {
        fn new() -> Self {
            let lock = ENV_MUTEX.lock().unwrap();
            for var in ENV_VARS {
                env::remove_var(var);
            }
            Self { _lock: lock }
        }

        fn set(&self, key: &str, value: &str) {
            env::set_var(key, value);
        }
    }

    impl<'a> Drop for EnvGuard<'a> {
        fn drop(&mut self) {
            for var in ENV_VARS {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_defaults() {
        let _guard = EnvGuard::new();
        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.otp_ttl_minutes, 10);
        assert_eq!(config.invite_ttl_days, 30);
        assert_eq!(config.shortcode_length, 6);
        assert_eq!(config.bcrypt_cost, 10);
        assert_eq!(config.genesis_prefix, "genesis_block_");
        assert_eq!(config.blob_root, PathBuf::from("uploads"));
    }

    #[test]
    fn test_overrides() {
        let guard = EnvGuard::new();
        guard.set("SELO_OTP_TTL_MINUTES", "5");
        guard.set("SELO_SHORTCODE_LENGTH", "8");
        guard.set("SELO_CHAIN_GENESIS_PREFIX", "anchor_");
        guard.set("SELO_PUBLIC_BASE_URL", "https://sign.example.com/");

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.otp_ttl_minutes, 5);
        assert_eq!(config.shortcode_length, 8);
        assert_eq!(config.genesis_prefix, "anchor_");
        // Trailing slash is trimmed so URL joins stay clean
        assert_eq!(config.public_base_url, "https://sign.example.com");
    }

    #[test]
    fn test_invalid_number() {
        let guard = EnvGuard::new();
        guard.set("SELO_OTP_TTL_MINUTES", "soon");
        assert!(matches!(
            ServerConfig::from_env(),
            Err(ConfigError::InvalidNumber("SELO_OTP_TTL_MINUTES", _))
        ));
    }

    #[test]
    fn test_shortcode_bounds() {
        let guard = EnvGuard::new();
        guard.set("SELO_SHORTCODE_LENGTH", "0");
        assert!(matches!(
            ServerConfig::from_env(),
            Err(ConfigError::ShortcodeLengthOutOfRange(0))
        ));
    }

    #[test]
    fn test_bcrypt_cost_bounds() {
        let guard = EnvGuard::new();
        guard.set("SELO_BCRYPT_COST", "99");
        assert!(matches!(
            ServerConfig::from_env(),
            Err(ConfigError::BcryptCostOutOfRange(99))
        ));
    }
}
