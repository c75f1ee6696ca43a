//! Durable session store keyed by conversation thread.
//!
//! The store exclusively owns session lifetime. A transition is only
//! observable after the durable write succeeds: callers mutate a local
//! copy and `save` it, so a failed write is equivalent to the transition
//! never having happened.

use async_trait::async_trait;
use bot_core::error::AppError;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::{info, instrument};

use crate::models::draft::{Draft, DraftKind};
use crate::models::session::{Session, SessionState};
use crate::models::taxonomy::Taxonomy;
use crate::services::metrics::{DB_QUERY_DURATION, SESSIONS_STARTED};

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, AppError>;

    /// Load the session for this thread, creating it when none exists.
    async fn get_or_create(
        &self,
        session_id: &str,
        user_id: &str,
        kind: DraftKind,
        taxonomy: Taxonomy,
    ) -> Result<Session, AppError>;

    /// Durably persist the session. The in-memory copy the caller holds
    /// only becomes authoritative once this returns `Ok`.
    async fn save(&self, session: &Session) -> Result<(), AppError>;

    async fn evict(&self, session_id: &str) -> Result<(), AppError>;

    /// Session ids with no activity since `now - ttl`.
    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Vec<String>, AppError>;
}

// -----------------------------------------------------------------------------
// PostgreSQL store
// -----------------------------------------------------------------------------

/// Sessions persisted in the `bot_sessions` table, draft and taxonomy as
/// jsonb. Survives process restart; reloaded lazily per thread.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn session_from_row(row: &sqlx::postgres::PgRow) -> Result<Session, AppError> {
        let draft: Option<serde_json::Value> = row.try_get("draft").map_err(db_err)?;
        let taxonomy: serde_json::Value = row.try_get("taxonomy").map_err(db_err)?;
        let kind: String = row.try_get("kind").map_err(db_err)?;
        let state: String = row.try_get("state").map_err(db_err)?;

        Ok(Session {
            session_id: row.try_get("session_id").map_err(db_err)?,
            user_id: row.try_get("user_id").map_err(db_err)?,
            kind: DraftKind::from_str(&kind),
            state: SessionState::from_str(&state),
            draft: draft.map(serde_json::from_value::<Draft>).transpose()?,
            taxonomy: serde_json::from_value(taxonomy)?,
            created_at: row.try_get("created_at").map_err(db_err)?,
            last_activity_at: row.try_get("last_activity_at").map_err(db_err)?,
        })
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
}

#[async_trait]
impl SessionStore for PgSessionStore {
    #[instrument(skip(self))]
    async fn get(&self, session_id: &str) -> Result<Option<Session>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_session"])
            .start_timer();

        let row = sqlx::query(
            r#"
            SELECT session_id, user_id, kind, state, draft, taxonomy, created_at, last_activity_at
            FROM bot_sessions
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        timer.observe_duration();

        row.as_ref().map(Self::session_from_row).transpose()
    }

    #[instrument(skip(self, taxonomy))]
    async fn get_or_create(
        &self,
        session_id: &str,
        user_id: &str,
        kind: DraftKind,
        taxonomy: Taxonomy,
    ) -> Result<Session, AppError> {
        if let Some(existing) = self.get(session_id).await? {
            return Ok(existing);
        }

        let session = Session::new(session_id, user_id, kind, taxonomy);
        self.save(&session).await?;
        SESSIONS_STARTED.with_label_values(&[kind.as_str()]).inc();
        info!(session_id = %session_id, kind = %kind, "session created");
        Ok(session)
    }

    #[instrument(skip(self, session), fields(session_id = %session.session_id, state = %session.state))]
    async fn save(&self, session: &Session) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_session"])
            .start_timer();

        let draft = session
            .draft
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let taxonomy = serde_json::to_value(&session.taxonomy)?;

        sqlx::query(
            r#"
            INSERT INTO bot_sessions (session_id, user_id, kind, state, draft, taxonomy, created_at, last_activity_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (session_id) DO UPDATE SET
                state = EXCLUDED.state,
                draft = EXCLUDED.draft,
                taxonomy = EXCLUDED.taxonomy,
                last_activity_at = EXCLUDED.last_activity_at
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.user_id)
        .bind(session.kind.as_str())
        .bind(session.state.as_str())
        .bind(draft)
        .bind(taxonomy)
        .bind(session.created_at)
        .bind(session.last_activity_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn evict(&self, session_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM bot_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        info!(session_id = %session_id, "session evicted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Vec<String>, AppError> {
        let cutoff = now - ttl;
        sqlx::query_scalar("SELECT session_id FROM bot_sessions WHERE last_activity_at < $1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }
}

// -----------------------------------------------------------------------------
// In-memory store
// -----------------------------------------------------------------------------

/// In-memory store for tests and ephemeral deployments. Same contract,
/// no durability.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, AppError> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn get_or_create(
        &self,
        session_id: &str,
        user_id: &str,
        kind: DraftKind,
        taxonomy: Taxonomy,
    ) -> Result<Session, AppError> {
        if let Some(existing) = self.sessions.get(session_id) {
            return Ok(existing.clone());
        }
        let session = Session::new(session_id, user_id, kind, taxonomy);
        self.sessions
            .insert(session_id.to_string(), session.clone());
        SESSIONS_STARTED.with_label_values(&[kind.as_str()]).inc();
        Ok(session)
    }

    async fn save(&self, session: &Session) -> Result<(), AppError> {
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn evict(&self, session_id: &str) -> Result<(), AppError> {
        self.sessions.remove(session_id);
        Ok(())
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Vec<String>, AppError> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_longer_than(now, ttl))
            .map(|entry| entry.key().clone())
            .collect())
    }
}
