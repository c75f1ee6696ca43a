//! Database service for reconciler-service.
//!
//! Wraps the PostgreSQL pool and implements the two store seams the core
//! shares across sessions: the taxonomy read and the transactional ledger
//! write. `MemoryLedger` implements both seams in memory for tests.

use async_trait::async_trait;
use bot_core::error::AppError;
use bot_core::retry::Transient;
use chrono::Datelike;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::entry::NewEntry;
use crate::models::taxonomy::Taxonomy;
use crate::services::metrics::DB_QUERY_DURATION;

/// Failure modes of the ledger write, classified so the gateway can retry
/// connectivity problems but surface constraint violations immediately.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Entry rejected: {0}")]
    Rejected(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Read-only source of the current categories and account names.
#[async_trait]
pub trait TaxonomySource: Send + Sync {
    async fn fetch(&self) -> Result<Taxonomy, AppError>;
}

/// Write path into the ledger: one batched insert per commit, all rows in
/// a single transaction.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_entries(&self, entries: &[NewEntry]) -> Result<Vec<Uuid>, StoreError>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "reconciler-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

/// Connectivity-shaped sqlx failures are worth retrying; everything else
/// means the store looked at the rows and said no.
fn classify_sqlx_error(e: sqlx::Error) -> StoreError {
    let transient = matches!(
        &e,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
    );
    if transient {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Rejected(e.to_string())
    }
}

#[async_trait]
impl TaxonomySource for Database {
    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<Taxonomy, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fetch_taxonomy"])
            .start_timer();

        let year = chrono::Utc::now().year();
        let categories: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT categoria FROM orcamento
            WHERE ano = $1 AND categoria IS NOT NULL
            ORDER BY categoria
            "#,
        )
        .bind(year)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch categories: {}", e)))?;

        let accounts: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT conta FROM transacoes
            WHERE conta IS NOT NULL AND conta <> ''
            ORDER BY conta
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch accounts: {}", e)))?;

        timer.observe_duration();

        Ok(Taxonomy::new(categories, accounts))
    }
}

#[async_trait]
impl LedgerStore for Database {
    /// Insert every derived row of one commit inside a single transaction.
    /// Any rejected row aborts the whole batch.
    #[instrument(skip(self, entries), fields(entry_count = entries.len()))]
    async fn insert_entries(&self, entries: &[NewEntry]) -> Result<Vec<Uuid>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_entries"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;

        let mut entry_ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry_id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO transacoes (entry_id, data, descricao, conta, categoria, centro_custo, valor, referencia)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(entry_id)
            .bind(entry.entry_date)
            .bind(&entry.description)
            .bind(&entry.account)
            .bind(&entry.category)
            .bind(&entry.cost_center)
            .bind(entry.value)
            .bind(entry.reference)
            .execute(&mut *tx)
            .await
            .map_err(classify_sqlx_error)?;

            entry_ids.push(entry_id);
        }

        tx.commit().await.map_err(classify_sqlx_error)?;

        timer.observe_duration();

        info!(entry_count = entry_ids.len(), "ledger entries committed");

        Ok(entry_ids)
    }
}

// -----------------------------------------------------------------------------
// In-memory double
// -----------------------------------------------------------------------------

/// In-memory ledger and taxonomy source for tests. The taxonomy can be
/// swapped mid-conversation and store failures can be scripted.
#[derive(Default)]
pub struct MemoryLedger {
    entries: std::sync::Mutex<Vec<(Uuid, NewEntry)>>,
    taxonomy: std::sync::Mutex<Option<Taxonomy>>,
    failures: std::sync::Mutex<std::collections::VecDeque<StoreError>>,
}

impl MemoryLedger {
    pub fn new(taxonomy: Taxonomy) -> Self {
        Self {
            entries: std::sync::Mutex::new(Vec::new()),
            taxonomy: std::sync::Mutex::new(Some(taxonomy)),
            failures: std::sync::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn set_taxonomy(&self, taxonomy: Taxonomy) {
        *self.taxonomy.lock().expect("taxonomy lock poisoned") = Some(taxonomy);
    }

    /// Script a failure for the next insert attempt.
    pub fn push_failure(&self, error: StoreError) {
        self.failures
            .lock()
            .expect("failure queue poisoned")
            .push_back(error);
    }

    pub fn entries(&self) -> Vec<(Uuid, NewEntry)> {
        self.entries.lock().expect("entries lock poisoned").clone()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().expect("entries lock poisoned").len()
    }
}

#[async_trait]
impl TaxonomySource for MemoryLedger {
    async fn fetch(&self) -> Result<Taxonomy, AppError> {
        self.taxonomy
            .lock()
            .expect("taxonomy lock poisoned")
            .clone()
            .ok_or_else(|| AppError::DatabaseError(anyhow::anyhow!("no taxonomy configured")))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn insert_entries(&self, entries: &[NewEntry]) -> Result<Vec<Uuid>, StoreError> {
        if let Some(failure) = self
            .failures
            .lock()
            .expect("failure queue poisoned")
            .pop_front()
        {
            return Err(failure);
        }

        let mut stored = self.entries.lock().expect("entries lock poisoned");
        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = Uuid::new_v4();
            stored.push((id, entry.clone()));
            ids.push(id);
        }
        Ok(ids)
    }
}
