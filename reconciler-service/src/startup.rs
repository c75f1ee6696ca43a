//! Application wiring: config to running engine.
//!
//! The chat transport is not part of this crate; it consumes the engine
//! through [`Application::engine`] and exchanges the abstract events of
//! `models::event`.

use std::sync::Arc;

use bot_core::error::AppError;
use bot_core::retry::RetryConfig;
use chrono::Duration;
use tracing::info;

use crate::config::ReconcilerConfig;
use crate::services::database::Database;
use crate::services::engine::Engine;
use crate::services::gateway::LedgerGateway;
use crate::services::metrics;
use crate::services::providers::openai::OpenAiProvider;
use crate::services::reconciler::Reconciler;
use crate::services::session_store::PgSessionStore;

pub struct Application {
    engine: Arc<Engine>,
    database: Database,
    sweeper: tokio::task::JoinHandle<()>,
}

impl Application {
    /// Build the full application: connect, migrate, wire the engine and
    /// start the expiry sweeper.
    pub async fn build(config: ReconcilerConfig) -> Result<Self, AppError> {
        Self::build_inner(&config, true).await
    }

    /// Build against an already-migrated database.
    pub async fn build_without_migrations(config: &ReconcilerConfig) -> Result<Self, AppError> {
        Self::build_inner(config, false).await
    }

    async fn build_inner(
        config: &ReconcilerConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        metrics::init_metrics();

        let database = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;

        if run_migrations {
            database.run_migrations().await?;
        }

        let store = Arc::new(PgSessionStore::new(database.pool().clone()));
        let provider = Arc::new(OpenAiProvider::new(config.openai.clone()));

        let reconciler = Reconciler::new(
            provider.clone(),
            provider,
            config.ledger.allow_unknown_accounts,
        );
        let gateway = LedgerGateway::new(
            Arc::new(database.clone()),
            Arc::new(database.clone()),
            RetryConfig::default(),
            config.ledger.cost_center.clone(),
            config.ledger.allow_unknown_accounts,
        );

        let engine = Arc::new(Engine::new(
            store,
            reconciler,
            gateway,
            Arc::new(database.clone()),
            Duration::seconds(config.session.ttl_secs as i64),
        ));

        let sweeper = engine.spawn_sweeper(std::time::Duration::from_secs(
            config.session.sweep_interval_secs,
        ));

        info!(
            ttl_secs = config.session.ttl_secs,
            "reconciler engine ready"
        );

        Ok(Self {
            engine,
            database,
            sweeper,
        })
    }

    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Stop background work; in-flight events finish behind their gates.
    pub fn shutdown(&self) {
        self.sweeper.abort();
    }
}
