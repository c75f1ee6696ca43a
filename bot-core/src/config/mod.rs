use crate::error::AppError;
use std::env;

/// Settings shared by every service crate.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    pub log_level: String,
}

impl Config {
    pub fn load(default_service_name: &str) -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| default_service_name.to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Read an env var and parse it, falling back to a default.
pub fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_on_missing_or_garbage() {
        assert_eq!(env_parse("BOT_CORE_TEST_MISSING", 7u32), 7);

        env::set_var("BOT_CORE_TEST_NUMBER", "42");
        assert_eq!(env_parse("BOT_CORE_TEST_NUMBER", 0u32), 42);

        env::set_var("BOT_CORE_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_parse("BOT_CORE_TEST_GARBAGE", 3u32), 3);
    }

    #[test]
    fn load_defaults_the_service_name() {
        let config = Config::load("some-service").expect("config load failed");
        assert!(!config.log_level.is_empty());
        assert!(!config.service_name.is_empty());
    }
}
