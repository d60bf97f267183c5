//! Strongly-typed identifiers (avoid mixing strings/UUIDs arbitrarily).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new id using UUID v7 (time-ordered)
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

entity_id!(
    /// Tenant identifier.
    TenantId
);
entity_id!(
    /// User identifier.
    UserId
);
entity_id!(
    /// Session identifier.
    SessionId
);
entity_id!(
    /// Document identifier.
    DocumentId
);
entity_id!(
    /// Signer identifier.
    SignerId
);
entity_id!(
    /// Share token row identifier.
    ShareTokenId
);
entity_id!(
    /// One-time code identifier.
    OtpCodeId
);
