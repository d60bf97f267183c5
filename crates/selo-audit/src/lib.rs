//! Audit event model for selo.
//!
//! This crate defines the types representing auditable actions in the system
//! and the forward-linked hash chain that makes the log tamper-evident. Every
//! entity (document or signer) owns its own chain: each entry carries the
//! SHA-256 of its predecessor, so any post-hoc mutation of the stored log is
//! detectable by re-hashing (see [`chain`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod chain;

pub use chain::{BreakReason, ChainVerification, DEFAULT_GENESIS_PREFIX};

/// Unique identifier for an audit log entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditEventId(pub Uuid);

impl AuditEventId {
    /// Generate a new audit event ID using UUID v7 (time-ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AuditEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditEventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AuditEventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of actor behind an audited action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorKind {
    User,
    Signer,
    System,
}

impl std::fmt::Display for ActorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActorKind::User => "USER",
            ActorKind::Signer => "SIGNER",
            ActorKind::System => "SYSTEM",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ActorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(ActorKind::User),
            "SIGNER" => Ok(ActorKind::Signer),
            "SYSTEM" => Ok(ActorKind::System),
            _ => Err(format!("Unknown actor kind: {}", s)),
        }
    }
}

/// Type of entity an audit chain is keyed by
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Document,
    Signer,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityType::Document => "document",
            EntityType::Signer => "signer",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(EntityType::Document),
            "signer" => Ok(EntityType::Signer),
            _ => Err(format!("Unknown entity type: {}", s)),
        }
    }
}

/// Categories of auditable actions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    // Document lifecycle
    StorageUploaded,
    StatusChanged,
    PadesSigned,
    CertificateIssued,

    // Signer workflow
    Invited,
    Viewed,
    OtpSent,
    OtpVerified,
    OtpFailed,
    Signed,
    Declined,

    // Post-commit side effects
    NotificationFailed,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::StorageUploaded => "STORAGE_UPLOADED",
            AuditAction::StatusChanged => "STATUS_CHANGED",
            AuditAction::PadesSigned => "PADES_SIGNED",
            AuditAction::CertificateIssued => "CERTIFICATE_ISSUED",
            AuditAction::Invited => "INVITED",
            AuditAction::Viewed => "VIEWED",
            AuditAction::OtpSent => "OTP_SENT",
            AuditAction::OtpVerified => "OTP_VERIFIED",
            AuditAction::OtpFailed => "OTP_FAILED",
            AuditAction::Signed => "SIGNED",
            AuditAction::Declined => "DECLINED",
            AuditAction::NotificationFailed => "NOTIFICATION_FAILED",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STORAGE_UPLOADED" => Ok(AuditAction::StorageUploaded),
            "STATUS_CHANGED" => Ok(AuditAction::StatusChanged),
            "PADES_SIGNED" => Ok(AuditAction::PadesSigned),
            "CERTIFICATE_ISSUED" => Ok(AuditAction::CertificateIssued),
            "INVITED" => Ok(AuditAction::Invited),
            "VIEWED" => Ok(AuditAction::Viewed),
            "OTP_SENT" => Ok(AuditAction::OtpSent),
            "OTP_VERIFIED" => Ok(AuditAction::OtpVerified),
            "OTP_FAILED" => Ok(AuditAction::OtpFailed),
            "SIGNED" => Ok(AuditAction::Signed),
            "DECLINED" => Ok(AuditAction::Declined),
            "NOTIFICATION_FAILED" => Ok(AuditAction::NotificationFailed),
            _ => Err(format!("Unknown audit action: {}", s)),
        }
    }
}

/// A persisted audit log entry.
///
/// Uses raw UUIDs for the tenant/actor/entity references so the row
/// serializes without dragging in the storage crate's typed ids.
/// `payload` holds the caller's payload only; the chain hash covers the
/// canonical record built from the surrounding metadata plus this payload
/// (see [`chain::canonical_record`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub tenant_id: Uuid,
    pub actor_kind: ActorKind,
    pub actor_id: Option<Uuid>,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub action: AuditAction,
    pub ip: String,
    pub user_agent: String,
    pub payload: serde_json::Value,
    /// When the entry was written. Stored and hashed as millisecond RFC 3339
    /// UTC; the verifier depends on the round-trip being exact.
    pub created_at: DateTime<Utc>,
    pub prev_event_hash: String,
    pub event_hash: String,
}

/// Input for appending an audit entry; hashes and timestamp are assigned by
/// the store at write time, inside the enclosing transaction.
#[derive(Clone, Debug)]
pub struct AuditDraft {
    pub tenant_id: Uuid,
    pub actor_kind: ActorKind,
    pub actor_id: Option<Uuid>,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub action: AuditAction,
    pub ip: String,
    pub user_agent: String,
    pub payload: serde_json::Value,
}

impl AuditDraft {
    pub fn new(
        tenant_id: Uuid,
        actor_kind: ActorKind,
        entity_type: EntityType,
        entity_id: Uuid,
        action: AuditAction,
    ) -> Self {
        Self {
            tenant_id,
            actor_kind,
            actor_id: None,
            entity_type,
            entity_id,
            action,
            ip: String::new(),
            user_agent: String::new(),
            payload: serde_json::json!({}),
        }
    }

    pub fn actor_id(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn client(mut self, ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip = ip.into();
        self.user_agent = user_agent.into();
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_action_display() {
        assert_eq!(AuditAction::StorageUploaded.to_string(), "STORAGE_UPLOADED");
        assert_eq!(AuditAction::OtpSent.to_string(), "OTP_SENT");
        assert_eq!(
            AuditAction::CertificateIssued.to_string(),
            "CERTIFICATE_ISSUED"
        );
    }

    #[test]
    fn test_audit_action_all_variants_roundtrip() {
        let actions = vec![
            AuditAction::StorageUploaded,
            AuditAction::StatusChanged,
            AuditAction::PadesSigned,
            AuditAction::CertificateIssued,
            AuditAction::Invited,
            AuditAction::Viewed,
            AuditAction::OtpSent,
            AuditAction::OtpVerified,
            AuditAction::OtpFailed,
            AuditAction::Signed,
            AuditAction::Declined,
            AuditAction::NotificationFailed,
        ];

        for action in actions {
            let display = action.to_string();
            let parsed: AuditAction = display.parse().unwrap();
            assert_eq!(action, parsed, "Roundtrip failed for {:?}", action);
        }
    }

    #[test]
    fn test_audit_action_parse_error() {
        assert!("NOT_AN_ACTION".parse::<AuditAction>().is_err());
    }

    #[test]
    fn test_actor_kind_roundtrip() {
        for kind in [ActorKind::User, ActorKind::Signer, ActorKind::System] {
            let parsed: ActorKind = kind.to_string().parse().unwrap();
            assert_eq!(kind, parsed);
        }
        assert!("ROBOT".parse::<ActorKind>().is_err());
    }

    #[test]
    fn test_entity_type_roundtrip() {
        for ty in [EntityType::Document, EntityType::Signer] {
            let parsed: EntityType = ty.to_string().parse().unwrap();
            assert_eq!(ty, parsed);
        }
        assert!("tenant".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_audit_action_serde_matches_display() {
        let json = serde_json::to_string(&AuditAction::PadesSigned).unwrap();
        assert_eq!(json, "\"PADES_SIGNED\"");
        let parsed: AuditAction = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, AuditAction::PadesSigned);
    }

    #[test]
    fn test_audit_event_id_is_v7() {
        let id = AuditEventId::new();
        assert_eq!(id.0.get_version_num(), 7);
    }

    #[test]
    fn test_audit_event_id_parse() {
        let uuid = Uuid::new_v4();
        let parsed: AuditEventId = uuid.to_string().parse().unwrap();
        assert_eq!(parsed.0, uuid);
        assert!("not-a-uuid".parse::<AuditEventId>().is_err());
    }

    #[test]
    fn test_draft_builder() {
        let tenant = Uuid::new_v4();
        let entity = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let draft = AuditDraft::new(
            tenant,
            ActorKind::Signer,
            EntityType::Signer,
            entity,
            AuditAction::Viewed,
        )
        .actor_id(actor)
        .client("10.0.0.1", "curl/8")
        .payload(serde_json::json!({"documentId": "d1"}));

        assert_eq!(draft.tenant_id, tenant);
        assert_eq!(draft.actor_id, Some(actor));
        assert_eq!(draft.ip, "10.0.0.1");
        assert_eq!(draft.user_agent, "curl/8");
        assert_eq!(draft.payload["documentId"], "d1");
    }
}
