//! SQLite storage backend for selo.
//!
//! The pool holds a single connection, so an open transaction owns the
//! database and every compound operation below is serializable by
//! construction. That is what makes the two hard guarantees hold: audit
//! appends on one entity can never fork the chain, and exactly one
//! `commit_signature` transaction per document observes the signer set
//! becoming complete.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use selo_audit::chain;
use selo_audit::{ActorKind, AuditAction, AuditDraft, AuditEvent, AuditEventId, EntityType};
use selo_crypto::Clock;
use selo_storage::{Store, StoreError, *};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool, Transaction};
use uuid::Uuid;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");


pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    genesis_prefix: String,
}

fn backend<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn ts(t: DateTime<Utc>) -> String {
    chain::timestamp_string(t)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    chain::parse_timestamp(s).map_err(backend)
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(backend)
}

fn channels_to_text(channels: &[AuthChannel]) -> String {
    channels
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn text_to_channels(s: &str) -> Result<Vec<AuthChannel>, StoreError> {
    s.split(',')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<AuthChannel>().map_err(StoreError::Backend))
        .collect()
}

fn document_from_row(row: &SqliteRow) -> Result<Document, StoreError> {
    let deadline: Option<String> = row.try_get("deadline_at").map_err(backend)?;
    Ok(Document {
        id: DocumentId(parse_uuid(&row.try_get::<String, _>("id").map_err(backend)?)?),
        tenant_id: TenantId(parse_uuid(
            &row.try_get::<String, _>("tenant_id").map_err(backend)?,
        )?),
        owner_id: UserId(parse_uuid(
            &row.try_get::<String, _>("owner_id").map_err(backend)?,
        )?),
        title: row.try_get("title").map_err(backend)?,
        mime_type: row.try_get("mime_type").map_err(backend)?,
        size_bytes: row.try_get("size_bytes").map_err(backend)?,
        storage_key: row.try_get("storage_key").map_err(backend)?,
        sha256: row.try_get("sha256").map_err(backend)?,
        status: row
            .try_get::<String, _>("status")
            .map_err(backend)?
            .parse()
            .map_err(StoreError::Backend)?,
        deadline_at: deadline.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(backend)?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at").map_err(backend)?)?,
    })
}

fn signer_from_row(row: &SqliteRow) -> Result<Signer, StoreError> {
    let signed_at: Option<String> = row.try_get("signed_at").map_err(backend)?;
    let position_page: Option<i64> = row.try_get("position_page").map_err(backend)?;
    let position_x: Option<f64> = row.try_get("position_x").map_err(backend)?;
    let position_y: Option<f64> = row.try_get("position_y").map_err(backend)?;
    let position = match (position_page, position_x, position_y) {
        (Some(page), Some(x), Some(y)) => Some(SignaturePosition {
            page: page as u32,
            x: x as f32,
            y: y as f32,
        }),
        _ => None,
    };
    Ok(Signer {
        id: SignerId(parse_uuid(&row.try_get::<String, _>("id").map_err(backend)?)?),
        document_id: DocumentId(parse_uuid(
            &row.try_get::<String, _>("document_id").map_err(backend)?,
        )?),
        name: row.try_get("name").map_err(backend)?,
        email: row.try_get("email").map_err(backend)?,
        phone: row.try_get("phone").map_err(backend)?,
        cpf: row.try_get("cpf").map_err(backend)?,
        qualification: row.try_get("qualification").map_err(backend)?,
        auth_channels: text_to_channels(
            &row.try_get::<String, _>("auth_channels").map_err(backend)?,
        )?,
        order_index: row.try_get::<i64, _>("order_index").map_err(backend)? as i32,
        status: row
            .try_get::<String, _>("status")
            .map_err(backend)?
            .parse()
            .map_err(StoreError::Backend)?,
        signed_at: signed_at.as_deref().map(parse_ts).transpose()?,
        signature_hash: row.try_get("signature_hash").map_err(backend)?,
        signature_artefact_path: row.try_get("signature_artefact_path").map_err(backend)?,
        position,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(backend)?)?,
    })
}

fn share_token_from_row(row: &SqliteRow) -> Result<ShareToken, StoreError> {
    let consumed: Option<String> = row.try_get("consumed_at").map_err(backend)?;
    Ok(ShareToken {
        id: ShareTokenId(parse_uuid(&row.try_get::<String, _>("id").map_err(backend)?)?),
        document_id: DocumentId(parse_uuid(
            &row.try_get::<String, _>("document_id").map_err(backend)?,
        )?),
        signer_id: SignerId(parse_uuid(
            &row.try_get::<String, _>("signer_id").map_err(backend)?,
        )?),
        token_hash: row.try_get("token_hash").map_err(backend)?,
        expires_at: parse_ts(&row.try_get::<String, _>("expires_at").map_err(backend)?)?,
        consumed_at: consumed.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(backend)?)?,
    })
}

fn otp_from_row(row: &SqliteRow) -> Result<OtpCode, StoreError> {
    Ok(OtpCode {
        id: OtpCodeId(parse_uuid(&row.try_get::<String, _>("id").map_err(backend)?)?),
        recipient: row.try_get("recipient").map_err(backend)?,
        channel: row
            .try_get::<String, _>("channel")
            .map_err(backend)?
            .parse()
            .map_err(StoreError::Backend)?,
        code_hash: row.try_get("code_hash").map_err(backend)?,
        expires_at: parse_ts(&row.try_get::<String, _>("expires_at").map_err(backend)?)?,
        context: row.try_get("context").map_err(backend)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(backend)?)?,
    })
}

fn audit_from_row(row: &SqliteRow) -> Result<AuditEvent, StoreError> {
    let actor_id: Option<String> = row.try_get("actor_id").map_err(backend)?;
    let payload: String = row.try_get("payload_json").map_err(backend)?;
    Ok(AuditEvent {
        id: AuditEventId(parse_uuid(&row.try_get::<String, _>("id").map_err(backend)?)?),
        tenant_id: parse_uuid(&row.try_get::<String, _>("tenant_id").map_err(backend)?)?,
        actor_kind: row
            .try_get::<String, _>("actor_kind")
            .map_err(backend)?
            .parse::<ActorKind>()
            .map_err(StoreError::Backend)?,
        actor_id: actor_id.as_deref().map(parse_uuid).transpose()?,
        entity_type: row
            .try_get::<String, _>("entity_type")
            .map_err(backend)?
            .parse::<EntityType>()
            .map_err(StoreError::Backend)?,
        entity_id: parse_uuid(&row.try_get::<String, _>("entity_id").map_err(backend)?)?,
        action: row
            .try_get::<String, _>("action")
            .map_err(backend)?
            .parse::<AuditAction>()
            .map_err(StoreError::Backend)?,
        ip: row.try_get("ip").map_err(backend)?,
        user_agent: row.try_get("user_agent").map_err(backend)?,
        payload: serde_json::from_str(&payload).map_err(backend)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(backend)?)?,
        prev_event_hash: row.try_get("prev_event_hash").map_err(backend)?,
        event_hash: row.try_get("event_hash").map_err(backend)?,
    })
}

impl SqliteStore {
    pub async fn open(url: &str, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(backend)?
            .create_if_missing(true)
            .foreign_keys(true);

        // One connection, held open: transactions own the database, and the
        // in-memory variant survives pool idling.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(backend)?;

        MIGRATOR.run(&pool).await.map_err(backend)?;

        Ok(Self {
            pool,
            clock,
            genesis_prefix: chain::DEFAULT_GENESIS_PREFIX.to_string(),
        })
    }

    pub async fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Self::open("sqlite::memory:", clock).await
    }

    pub fn with_genesis_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.genesis_prefix = prefix.into();
        self
    }

    /// Append one chained entry inside an open transaction: read the latest
    /// hash for the entity, link, hash, insert.
    async fn append_audit_tx(
        &self,
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        draft: AuditDraft,
    ) -> Result<AuditEvent, StoreError> {
        let last: Option<(String,)> = sqlx::query_as(
            "SELECT event_hash FROM audit_log WHERE entity_id = ?
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(draft.entity_id.to_string())
        .fetch_optional(&mut **tx)
        .await
        .map_err(backend)?;

        let prev_event_hash = match last {
            Some((hash,)) => hash,
            None => chain::genesis_hash(&self.genesis_prefix, &draft.entity_id),
        };

        let created_str = ts(self.clock.now());
        // Round-trip through the stored representation so the returned value
        // matches what a later read will produce.
        let created_at = parse_ts(&created_str)?;

        let canonical = chain::canonical_record(
            draft.actor_kind,
            draft.actor_id.as_ref(),
            draft.entity_type,
            &draft.entity_id,
            draft.action,
            &draft.ip,
            &draft.user_agent,
            &draft.payload,
        );
        let event_hash = chain::event_hash(&prev_event_hash, &canonical, &created_str);

        let id = AuditEventId::new();
        let payload_json = serde_json::to_string(&draft.payload).map_err(backend)?;

        sqlx::query(
            "INSERT INTO audit_log(id, tenant_id, actor_kind, actor_id, entity_type, entity_id,
                                   action, ip, user_agent, payload_json, created_at,
                                   prev_event_hash, event_hash)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(draft.tenant_id.to_string())
        .bind(draft.actor_kind.to_string())
        .bind(draft.actor_id.map(|a| a.to_string()))
        .bind(draft.entity_type.to_string())
        .bind(draft.entity_id.to_string())
        .bind(draft.action.to_string())
        .bind(&draft.ip)
        .bind(&draft.user_agent)
        .bind(&payload_json)
        .bind(&created_str)
        .bind(&prev_event_hash)
        .bind(&event_hash)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;

        Ok(AuditEvent {
            id,
            tenant_id: draft.tenant_id,
            actor_kind: draft.actor_kind,
            actor_id: draft.actor_id,
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            action: draft.action,
            ip: draft.ip,
            user_agent: draft.user_agent,
            payload: draft.payload,
            created_at,
            prev_event_hash,
            event_hash,
        })
    }

    async fn get_document_tx(
        &self,
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        document_id: &DocumentId,
    ) -> Result<Document, StoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(document_id.to_string())
            .fetch_optional(&mut **tx)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => document_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn get_signer_tx(
        &self,
        tx: &mut Transaction<'_, sqlx::Sqlite>,
        signer_id: &SignerId,
    ) -> Result<Signer, StoreError> {
        let row = sqlx::query("SELECT * FROM signers WHERE id = ?")
            .bind(signer_id.to_string())
            .fetch_optional(&mut **tx)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => signer_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    // ───────────────────────────── Tenants & users ─────────────────────────────

    async fn create_tenant(&self, name: &str) -> Result<Tenant, StoreError> {
        let tenant = Tenant {
            id: TenantId::new(),
            name: name.to_string(),
            created_at: self.clock.now(),
        };
        sqlx::query("INSERT INTO tenants(id, name, created_at) VALUES(?, ?, ?)")
            .bind(tenant.id.to_string())
            .bind(&tenant.name)
            .bind(ts(tenant.created_at))
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(tenant)
    }

    async fn create_user(&self, params: &CreateUserParams) -> Result<User, StoreError> {
        let user = User {
            id: UserId::new(),
            tenant_id: params.tenant_id,
            email: params.email.clone(),
            name: params.name.clone(),
            role: params.role,
            created_at: self.clock.now(),
        };
        sqlx::query(
            "INSERT INTO users(id, tenant_id, email, name, role, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
        )
        .bind(user.id.to_string())
        .bind(user.tenant_id.to_string())
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.role.to_string())
        .bind(ts(user.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let s = e.to_string();
            if s.contains("UNIQUE") {
                StoreError::AlreadyExists
            } else {
                StoreError::Backend(s)
            }
        })?;
        Ok(user)
    }

    async fn get_user(&self, user_id: &UserId) -> Result<User, StoreError> {
        let row: Option<(String, String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, tenant_id, email, name, role, created_at FROM users WHERE id = ?",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        let Some((id, tenant_id, email, name, role, created_at)) = row else {
            return Err(StoreError::NotFound);
        };
        Ok(User {
            id: UserId(parse_uuid(&id)?),
            tenant_id: TenantId(parse_uuid(&tenant_id)?),
            email,
            name,
            role: role.parse().map_err(StoreError::Backend)?,
            created_at: parse_ts(&created_at)?,
        })
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some((id,)) => self.get_user(&UserId(parse_uuid(&id)?)).await,
            None => Err(StoreError::NotFound),
        }
    }

    async fn create_session(
        &self,
        user_id: &UserId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        let session = Session {
            id: SessionId::new(),
            user_id: *user_id,
            token_hash: token_hash.to_string(),
            created_at: self.clock.now(),
            expires_at,
        };
        sqlx::query(
            "INSERT INTO sessions(id, user_id, token_hash, created_at, expires_at)
             VALUES(?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(&session.token_hash)
        .bind(ts(session.created_at))
        .bind(ts(session.expires_at))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(session)
    }

    async fn get_session_by_token_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        let row: Option<(String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, user_id, token_hash, created_at, expires_at
             FROM sessions WHERE token_hash = ? AND expires_at > ?",
        )
        .bind(token_hash)
        .bind(ts(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        let Some((id, user_id, token_hash, created_at, expires_at)) = row else {
            return Err(StoreError::NotFound);
        };
        Ok(Session {
            id: SessionId(parse_uuid(&id)?),
            user_id: UserId(parse_uuid(&user_id)?),
            token_hash,
            created_at: parse_ts(&created_at)?,
            expires_at: parse_ts(&expires_at)?,
        })
    }

    // ───────────────────────────── Documents ─────────────────────────────

    async fn create_document(
        &self,
        params: &CreateDocumentParams,
        audit: AuditDraft,
    ) -> Result<Document, StoreError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "INSERT INTO documents(id, tenant_id, owner_id, title, mime_type, size_bytes,
                                   storage_key, sha256, status, deadline_at, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.id.to_string())
        .bind(params.tenant_id.to_string())
        .bind(params.owner_id.to_string())
        .bind(&params.title)
        .bind(&params.mime_type)
        .bind(params.size_bytes)
        .bind(&params.storage_key)
        .bind(&params.sha256)
        .bind(DocumentStatus::Ready.to_string())
        .bind(params.deadline_at.map(ts))
        .bind(ts(now))
        .bind(ts(now))
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        self.append_audit_tx(&mut tx, audit).await?;
        let document = self.get_document_tx(&mut tx, &params.id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(document)
    }

    async fn get_document(&self, document_id: &DocumentId) -> Result<Document, StoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(document_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => document_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn find_document_by_sha256(&self, sha256: &str) -> Result<Document, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM documents WHERE sha256 = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(sha256)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        match row {
            Some(row) => document_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn update_document_status(
        &self,
        document_id: &DocumentId,
        new_status: DocumentStatus,
        audit: AuditDraft,
    ) -> Result<Document, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let document = self.get_document_tx(&mut tx, document_id).await?;
        if document.status.is_terminal() {
            return Err(StoreError::Terminal);
        }

        sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
            .bind(new_status.to_string())
            .bind(ts(self.clock.now()))
            .bind(document_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        self.append_audit_tx(&mut tx, audit).await?;
        let document = self.get_document_tx(&mut tx, document_id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(document)
    }

    async fn list_deadline_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM documents
             WHERE deadline_at IS NOT NULL AND deadline_at <= ?
               AND status IN ('draft', 'ready', 'partially_signed')
             ORDER BY deadline_at ASC",
        )
        .bind(ts(cutoff))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(document_from_row).collect()
    }

    // ───────────────────────────── Signers ─────────────────────────────

    async fn create_signer(
        &self,
        params: &CreateSignerParams,
        token: &CreateShareTokenParams,
        audit: AuditDraft,
    ) -> Result<Signer, StoreError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let document = self.get_document_tx(&mut tx, &params.document_id).await?;
        if document.status.is_terminal() {
            return Err(StoreError::Terminal);
        }

        sqlx::query(
            "INSERT INTO signers(id, document_id, name, email, phone, cpf, qualification,
                                 auth_channels, order_index, status, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.id.to_string())
        .bind(params.document_id.to_string())
        .bind(&params.name)
        .bind(&params.email)
        .bind(&params.phone)
        .bind(&params.cpf)
        .bind(&params.qualification)
        .bind(channels_to_text(&params.auth_channels))
        .bind(params.order_index as i64)
        .bind(SignerStatus::Pending.to_string())
        .bind(ts(now))
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query(
            "INSERT INTO share_tokens(id, document_id, signer_id, token_hash, expires_at,
                                      consumed_at, created_at)
             VALUES(?, ?, ?, ?, ?, NULL, ?)",
        )
        .bind(ShareTokenId::new().to_string())
        .bind(token.document_id.to_string())
        .bind(token.signer_id.to_string())
        .bind(&token.token_hash)
        .bind(ts(token.expires_at))
        .bind(ts(now))
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        self.append_audit_tx(&mut tx, audit).await?;
        let signer = self.get_signer_tx(&mut tx, &params.id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(signer)
    }

    async fn get_signer(&self, signer_id: &SignerId) -> Result<Signer, StoreError> {
        let row = sqlx::query("SELECT * FROM signers WHERE id = ?")
            .bind(signer_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => signer_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn list_signers(&self, document_id: &DocumentId) -> Result<Vec<Signer>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM signers WHERE document_id = ? ORDER BY order_index ASC, id ASC",
        )
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(signer_from_row).collect()
    }

    async fn resolve_share_token(
        &self,
        token_hash: &str,
    ) -> Result<(ShareToken, Signer, Document), StoreError> {
        let row = sqlx::query("SELECT * FROM share_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        let Some(row) = row else {
            return Err(StoreError::NotFound);
        };
        let token = share_token_from_row(&row)?;
        let signer = self.get_signer(&token.signer_id).await?;
        let document = self.get_document(&token.document_id).await?;
        Ok((token, signer, document))
    }

    async fn record_signer_view(
        &self,
        signer_id: &SignerId,
        audit: AuditDraft,
    ) -> Result<Signer, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let signer = self.get_signer_tx(&mut tx, signer_id).await?;
        if signer.status == SignerStatus::Pending {
            sqlx::query("UPDATE signers SET status = ? WHERE id = ?")
                .bind(SignerStatus::Viewed.to_string())
                .bind(signer_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            self.append_audit_tx(&mut tx, audit).await?;
        }

        let signer = self.get_signer_tx(&mut tx, signer_id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(signer)
    }

    async fn update_signer_identity(
        &self,
        signer_id: &SignerId,
        cpf: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Signer, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let signer = self.get_signer_tx(&mut tx, signer_id).await?;
        if signer.status.is_terminal() {
            return Err(StoreError::Terminal);
        }

        sqlx::query(
            "UPDATE signers SET cpf = COALESCE(?, cpf), phone = COALESCE(?, phone) WHERE id = ?",
        )
        .bind(cpf)
        .bind(phone)
        .bind(signer_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        let signer = self.get_signer_tx(&mut tx, signer_id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(signer)
    }

    async fn set_signer_position(
        &self,
        signer_id: &SignerId,
        position: SignaturePosition,
    ) -> Result<Signer, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let signer = self.get_signer_tx(&mut tx, signer_id).await?;
        if signer.status.is_terminal() {
            return Err(StoreError::Terminal);
        }

        sqlx::query(
            "UPDATE signers SET position_page = ?, position_x = ?, position_y = ? WHERE id = ?",
        )
        .bind(position.page as i64)
        .bind(position.x as f64)
        .bind(position.y as f64)
        .bind(signer_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        let signer = self.get_signer_tx(&mut tx, signer_id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(signer)
    }

    async fn decline_signer(
        &self,
        signer_id: &SignerId,
        audit: AuditDraft,
    ) -> Result<Signer, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let signer = self.get_signer_tx(&mut tx, signer_id).await?;
        match signer.status {
            SignerStatus::Signed => return Err(StoreError::Terminal),
            // Repeat declines are a no-op rather than a second audit entry.
            SignerStatus::Declined => {
                tx.commit().await.map_err(backend)?;
                return Ok(signer);
            }
            SignerStatus::Pending | SignerStatus::Viewed => {}
        }

        sqlx::query("UPDATE signers SET status = ? WHERE id = ?")
            .bind(SignerStatus::Declined.to_string())
            .bind(signer_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        self.append_audit_tx(&mut tx, audit).await?;
        let signer = self.get_signer_tx(&mut tx, signer_id).await?;
        tx.commit().await.map_err(backend)?;
        Ok(signer)
    }

    async fn commit_signature(
        &self,
        params: &CommitSignatureParams,
        signed_audit: AuditDraft,
        status_audit: AuditDraft,
    ) -> Result<CommitOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let signer = self.get_signer_tx(&mut tx, &params.signer_id).await?;
        if signer.status.is_terminal() {
            return Err(StoreError::Terminal);
        }
        let document = self.get_document_tx(&mut tx, &signer.document_id).await?;
        if !document.status.is_signable() {
            return Err(StoreError::Terminal);
        }

        sqlx::query(
            "UPDATE signers SET status = ?, signed_at = ?, signature_hash = ?,
                                signature_artefact_path = ?
             WHERE id = ?",
        )
        .bind(SignerStatus::Signed.to_string())
        .bind(ts(params.signed_at))
        .bind(&params.signature_hash)
        .bind(&params.signature_artefact_path)
        .bind(params.signer_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query(
            "UPDATE share_tokens SET consumed_at = ? WHERE signer_id = ? AND consumed_at IS NULL",
        )
        .bind(ts(params.signed_at))
        .bind(params.signer_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        self.append_audit_tx(&mut tx, signed_audit).await?;

        let (unsigned,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM signers WHERE document_id = ? AND status != 'signed'",
        )
        .bind(signer.document_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;

        // The document reads partially-signed until finalization rewrites it;
        // the first committer appends the status change.
        let mut document_status = document.status;
        if document.status == DocumentStatus::Ready {
            sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
                .bind(DocumentStatus::PartiallySigned.to_string())
                .bind(ts(self.clock.now()))
                .bind(signer.document_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            self.append_audit_tx(&mut tx, status_audit).await?;
            document_status = DocumentStatus::PartiallySigned;
        }

        let signer = self.get_signer_tx(&mut tx, &params.signer_id).await?;
        tx.commit().await.map_err(backend)?;

        Ok(CommitOutcome {
            signer,
            document_status,
            all_signed: unsigned == 0,
        })
    }

    async fn finalize_document(
        &self,
        document_id: &DocumentId,
        storage_key: &str,
        sha256: &str,
        pades_audit: AuditDraft,
        certificate_audit: AuditDraft,
    ) -> Result<(Document, Certificate), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let document = self.get_document_tx(&mut tx, document_id).await?;
        if document.status == DocumentStatus::Signed {
            // Idempotent re-finalize: nothing to do, return the standing record.
            let row = sqlx::query("SELECT * FROM certificates WHERE document_id = ?")
                .bind(document_id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;
            let Some(row) = row else {
                return Err(StoreError::Conflict);
            };
            let certificate = Certificate {
                document_id: *document_id,
                storage_key: row.try_get("storage_key").map_err(backend)?,
                sha256: row.try_get("sha256").map_err(backend)?,
                issued_at: parse_ts(&row.try_get::<String, _>("issued_at").map_err(backend)?)?,
            };
            tx.commit().await.map_err(backend)?;
            return Ok((document, certificate));
        }
        if document.status.is_terminal() {
            return Err(StoreError::Terminal);
        }

        let (unsigned,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM signers WHERE document_id = ? AND status != 'signed'",
        )
        .bind(document_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        if unsigned > 0 {
            return Err(StoreError::Conflict);
        }

        let issued_at_str = ts(self.clock.now());
        let issued_at = parse_ts(&issued_at_str)?;

        sqlx::query(
            "UPDATE documents SET status = ?, storage_key = ?, sha256 = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(DocumentStatus::Signed.to_string())
        .bind(storage_key)
        .bind(sha256)
        .bind(&issued_at_str)
        .bind(document_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        self.append_audit_tx(&mut tx, pades_audit).await?;
        self.append_audit_tx(&mut tx, certificate_audit).await?;

        sqlx::query(
            "INSERT INTO certificates(document_id, storage_key, sha256, issued_at)
             VALUES(?, ?, ?, ?)",
        )
        .bind(document_id.to_string())
        .bind(storage_key)
        .bind(sha256)
        .bind(&issued_at_str)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            let s = e.to_string();
            if s.contains("UNIQUE") {
                StoreError::AlreadyExists
            } else {
                StoreError::Backend(s)
            }
        })?;

        let document = self.get_document_tx(&mut tx, document_id).await?;
        tx.commit().await.map_err(backend)?;

        Ok((
            document,
            Certificate {
                document_id: *document_id,
                storage_key: storage_key.to_string(),
                sha256: sha256.to_string(),
                issued_at,
            },
        ))
    }

    async fn get_certificate(&self, document_id: &DocumentId) -> Result<Certificate, StoreError> {
        let row = sqlx::query("SELECT * FROM certificates WHERE document_id = ?")
            .bind(document_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        let Some(row) = row else {
            return Err(StoreError::NotFound);
        };
        Ok(Certificate {
            document_id: *document_id,
            storage_key: row.try_get("storage_key").map_err(backend)?,
            sha256: row.try_get("sha256").map_err(backend)?,
            issued_at: parse_ts(&row.try_get::<String, _>("issued_at").map_err(backend)?)?,
        })
    }

    // ───────────────────────────── One-time codes ─────────────────────────────

    async fn create_otp_code(&self, params: &CreateOtpCodeParams) -> Result<OtpCode, StoreError> {
        let code = OtpCode {
            id: OtpCodeId::new(),
            recipient: params.recipient.clone(),
            channel: params.channel,
            code_hash: params.code_hash.clone(),
            expires_at: params.expires_at,
            context: params.context.clone(),
            created_at: self.clock.now(),
        };
        sqlx::query(
            "INSERT INTO otp_codes(id, recipient, channel, code_hash, expires_at, context,
                                   created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(code.id.to_string())
        .bind(&code.recipient)
        .bind(code.channel.to_string())
        .bind(&code.code_hash)
        .bind(ts(code.expires_at))
        .bind(&code.context)
        .bind(ts(code.created_at))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(code)
    }

    async fn latest_otp_code(
        &self,
        recipients: &[String],
        context: &str,
    ) -> Result<OtpCode, StoreError> {
        if recipients.is_empty() {
            return Err(StoreError::NotFound);
        }
        let placeholders = vec!["?"; recipients.len()].join(", ");
        let sql = format!(
            "SELECT * FROM otp_codes WHERE context = ? AND recipient IN ({})
             ORDER BY created_at DESC, id DESC LIMIT 1",
            placeholders
        );
        let mut query = sqlx::query(&sql).bind(context);
        for recipient in recipients {
            query = query.bind(recipient);
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => otp_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn delete_otp_code(&self, id: &OtpCodeId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM otp_codes WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    // ───────────────────────────── Audit ─────────────────────────────

    async fn append_audit(&self, draft: AuditDraft) -> Result<AuditEvent, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let event = self.append_audit_tx(&mut tx, draft).await?;
        tx.commit().await.map_err(backend)?;
        Ok(event)
    }

    async fn list_chain(&self, entity_id: &Uuid) -> Result<Vec<AuditEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM audit_log WHERE entity_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(entity_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(audit_from_row).collect()
    }
}
