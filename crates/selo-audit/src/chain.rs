//! Forward-linked chain hashing and verification.
//!
//! Hash rule: `event_hash = SHA-256(prev_event_hash ‖ canonical_json ‖
//! timestamp)` where the canonical JSON is an insertion-ordered object of the
//! audit metadata followed by the caller payload, and the timestamp is the
//! entry's `created_at` rendered as millisecond RFC 3339 UTC. The first entry
//! of a chain links to `SHA-256(genesis_prefix ‖ entity_id)`.
//!
//! The writer and the verifier must produce byte-identical canonical strings;
//! that is why this crate pins `serde_json` with `preserve_order` and why
//! timestamps are stored as the exact string that was hashed.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{ActorKind, AuditAction, AuditEvent, AuditEventId, EntityType};

/// Prefix for the synthetic hash that anchors the first entry of a chain.
pub const DEFAULT_GENESIS_PREFIX: &str = "genesis_block_";

/// Render a timestamp the way chain hashing expects it: UTC, millisecond
/// precision, `Z` suffix.
pub fn timestamp_string(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored chain timestamp back into a `DateTime<Utc>`.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Anchor hash for the first entry of an entity's chain.
pub fn genesis_hash(prefix: &str, entity_id: &Uuid) -> String {
    sha256_hex(format!("{}{}", prefix, entity_id).as_bytes())
}

/// Build the canonical record string for an entry.
///
/// Metadata keys go first, in fixed order; caller payload keys follow. A
/// payload key that collides with a metadata key keeps the metadata position
/// but takes the caller's value, on write and on verify alike.
pub fn canonical_record(
    actor_kind: ActorKind,
    actor_id: Option<&Uuid>,
    entity_type: EntityType,
    entity_id: &Uuid,
    action: AuditAction,
    ip: &str,
    user_agent: &str,
    payload: &Value,
) -> String {
    let mut record = Map::new();
    record.insert("actorKind".into(), Value::String(actor_kind.to_string()));
    record.insert(
        "actorId".into(),
        match actor_id {
            Some(id) => Value::String(id.to_string()),
            None => Value::Null,
        },
    );
    record.insert("entityType".into(), Value::String(entity_type.to_string()));
    record.insert("entityId".into(), Value::String(entity_id.to_string()));
    record.insert("action".into(), Value::String(action.to_string()));
    record.insert("ip".into(), Value::String(ip.to_string()));
    record.insert("userAgent".into(), Value::String(user_agent.to_string()));

    if let Some(fields) = payload.as_object() {
        for (key, value) in fields {
            record.insert(key.clone(), value.clone());
        }
    }

    // Infallible: the map contains only JSON values.
    serde_json::to_string(&Value::Object(record)).unwrap_or_default()
}

/// Hash one entry given its predecessor's hash and its timestamp string.
pub fn event_hash(prev_event_hash: &str, canonical: &str, timestamp: &str) -> String {
    let mut input = String::with_capacity(prev_event_hash.len() + canonical.len() + timestamp.len());
    input.push_str(prev_event_hash);
    input.push_str(canonical);
    input.push_str(timestamp);
    sha256_hex(input.as_bytes())
}

/// Recompute the hash of a stored entry from its own fields.
pub fn compute_event_hash(event: &AuditEvent) -> String {
    let canonical = canonical_record(
        event.actor_kind,
        event.actor_id.as_ref(),
        event.entity_type,
        &event.entity_id,
        event.action,
        &event.ip,
        &event.user_agent,
        &event.payload,
    );
    event_hash(
        &event.prev_event_hash,
        &canonical,
        &timestamp_string(event.created_at),
    )
}

/// Why a chain failed verification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakReason {
    /// `prev_event_hash` does not match the predecessor's `event_hash`
    LinkMismatch,
    /// The recomputed `event_hash` differs from the stored one
    HashMismatch,
    /// A row carries a tenant other than the document's
    TenantMismatch,
}

impl std::fmt::Display for BreakReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BreakReason::LinkMismatch => "link_mismatch",
            BreakReason::HashMismatch => "hash_mismatch",
            BreakReason::TenantMismatch => "tenant_mismatch",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of verifying one chain or a document's chain set
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainVerification {
    Valid {
        count: usize,
    },
    Broken {
        event_id: AuditEventId,
        reason: BreakReason,
    },
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainVerification::Valid { .. })
    }
}

/// Re-hash a single entity chain, ordered as stored (ascending `created_at`).
///
/// Stops at the first discrepancy and names the offending entry.
pub fn verify_chain(
    genesis_prefix: &str,
    entity_id: &Uuid,
    events: &[AuditEvent],
) -> ChainVerification {
    let mut expected_prev = genesis_hash(genesis_prefix, entity_id);

    for event in events {
        if event.prev_event_hash != expected_prev {
            return ChainVerification::Broken {
                event_id: event.id,
                reason: BreakReason::LinkMismatch,
            };
        }
        if compute_event_hash(event) != event.event_hash {
            return ChainVerification::Broken {
                event_id: event.id,
                reason: BreakReason::HashMismatch,
            };
        }
        expected_prev = event.event_hash.clone();
    }

    ChainVerification::Valid {
        count: events.len(),
    }
}

/// Verify a document's chain together with the chains of all its signers.
///
/// Each chain verifies independently; the first failing sub-chain wins.
/// Additionally every row must carry the document's tenant.
pub fn verify_document_chains(
    genesis_prefix: &str,
    tenant_id: &Uuid,
    document_id: &Uuid,
    document_chain: &[AuditEvent],
    signer_chains: &[(Uuid, Vec<AuditEvent>)],
) -> ChainVerification {
    let mut total = 0usize;

    let mut chains: Vec<(&Uuid, &[AuditEvent])> = vec![(document_id, document_chain)];
    for (signer_id, chain) in signer_chains {
        chains.push((signer_id, chain.as_slice()));
    }

    for (entity_id, chain) in chains {
        match verify_chain(genesis_prefix, entity_id, chain) {
            ChainVerification::Valid { count } => total += count,
            broken => return broken,
        }
        if let Some(foreign) = chain.iter().find(|e| e.tenant_id != *tenant_id) {
            return ChainVerification::Broken {
                event_id: foreign.id,
                reason: BreakReason::TenantMismatch,
            };
        }
    }

    ChainVerification::Valid { count: total }
}
