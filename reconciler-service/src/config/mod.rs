//! Configuration module for reconciler-service.

use bot_core::config as core_config;
use bot_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub common: core_config::Config,
    pub database: DatabaseConfig,
    pub openai: OpenAiConfig,
    pub session: SessionConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Absent key leaves the capability unconfigured; the reconciler then
    /// runs on the deterministic fallback.
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle seconds before a session expires.
    pub ttl_secs: u64,
    /// Interval between expiry sweeps.
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub cost_center: String,
    /// Whether a free-text account name unknown to the taxonomy may be
    /// registered onto a draft instead of being rejected.
    pub allow_unknown_accounts: bool,
}

impl ReconcilerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load("reconciler-service")?;

        Ok(Self {
            common,
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: core_config::env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: core_config::env_parse("DATABASE_MIN_CONNECTIONS", 2),
            },
            openai: OpenAiConfig {
                api_key: env::var("OPENAI_API_KEY").ok(),
                model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
                max_tokens: core_config::env_parse("OPENAI_MAX_TOKENS", 1024),
            },
            session: SessionConfig {
                ttl_secs: core_config::env_parse("SESSION_TTL_SECS", 3600),
                sweep_interval_secs: core_config::env_parse("SESSION_SWEEP_INTERVAL_SECS", 60),
            },
            ledger: LedgerConfig {
                cost_center: env::var("DEFAULT_COST_CENTER")
                    .unwrap_or_else(|_| "custeio".to_string()),
                allow_unknown_accounts: core_config::env_parse("ALLOW_UNKNOWN_ACCOUNTS", false),
            },
        })
    }
}
