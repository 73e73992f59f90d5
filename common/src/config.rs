//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton containing
//! runtime configuration values loaded from environment variables. It provides
//! thread-safe access and mutation for testing or overrides in runtime environments.

use std::env;
use std::sync::{OnceLock, RwLock};

/// Represents the complete application configuration loaded from environment variables.
///
/// Engine tunables (`token_*`, `reverify_*`) act as system-wide defaults; tenant
/// rows may override the confidence threshold, sample percent and slot capacity.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_to_stdout: bool,
    pub database_path: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_duration_minutes: u64,
    pub token_rotation_ms: i64,
    pub token_grace_ms: i64,
    pub confidence_threshold: i32,
    pub reverify_sample_percent: i32,
    pub reverify_slot_capacity: i32,
    pub reverify_max_attempts: i32,
    pub reverify_max_retries: i32,
}

/// Lazily-initialized, thread-safe singleton instance of `AppConfig`.
static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// Panics if required variables are missing or improperly formatted.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            env: env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            project_name: env::var("PROJECT_NAME").unwrap_or_else(|_| "presencia".into()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "api=info".into()),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "api.log".into()),
            log_to_stdout: env::var("LOG_TO_STDOUT").unwrap_or_else(|_| "false".into()) == "true",
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "data/presencia.db".into()),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env_parse("PORT", 3000),
            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret".into()),
            jwt_duration_minutes: env_parse("JWT_DURATION_MINUTES", 60),
            token_rotation_ms: env_parse("TOKEN_ROTATION_MS", 5000),
            token_grace_ms: env_parse("TOKEN_GRACE_MS", 1500),
            confidence_threshold: env_parse("CONFIDENCE_THRESHOLD", 70),
            reverify_sample_percent: env_parse("REVERIFY_SAMPLE_PERCENT", 30),
            reverify_slot_capacity: env_parse("REVERIFY_SLOT_CAPACITY", 3),
            reverify_max_attempts: env_parse("REVERIFY_MAX_ATTEMPTS", 3),
            reverify_max_retries: env_parse("REVERIFY_MAX_RETRIES", 2),
        }
    }

    /// Returns a shared reference to the global configuration.
    ///
    /// # Panics
    /// Panics if the lock cannot be acquired.
    pub fn global() -> std::sync::RwLockReadGuard<'static, AppConfig> {
        CONFIG_INSTANCE
            .get_or_init(|| RwLock::new(AppConfig::from_env()))
            .read()
            .expect("Failed to acquire AppConfig read lock")
    }

    /// Resets the configuration by reloading from environment variables.
    ///
    /// Useful in tests to clear overrides.
    pub fn reset() {
        if let Some(lock) = CONFIG_INSTANCE.get() {
            let mut guard = lock.write().unwrap();
            *guard = AppConfig::from_env();
        }
    }

    /// Generic internal setter for any field in the config.
    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = lock
            .write()
            .expect("Failed to acquire AppConfig write lock");
        setter(&mut guard);
    }

    // --- Per-field setters (used by tests) ---

    pub fn set_env(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.env = value.into());
    }

    pub fn set_database_path(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.database_path = value.into());
    }

    pub fn set_jwt_secret(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.jwt_secret = value.into());
    }

    pub fn set_reverify_slot_capacity(value: i32) {
        AppConfig::set_field(|cfg| cfg.reverify_slot_capacity = value);
    }

    pub fn set_reverify_max_retries(value: i32) {
        AppConfig::set_field(|cfg| cfg.reverify_max_retries = value);
    }

    pub fn set_reverify_sample_percent(value: i32) {
        AppConfig::set_field(|cfg| cfg.reverify_sample_percent = value);
    }
}

// --- Free accessor functions ---

pub fn env() -> String {
    AppConfig::global().env.clone()
}

pub fn project_name() -> String {
    AppConfig::global().project_name.clone()
}

pub fn log_level() -> String {
    AppConfig::global().log_level.clone()
}

pub fn log_file() -> String {
    AppConfig::global().log_file.clone()
}

pub fn log_to_stdout() -> bool {
    AppConfig::global().log_to_stdout
}

pub fn database_path() -> String {
    AppConfig::global().database_path.clone()
}

pub fn host() -> String {
    AppConfig::global().host.clone()
}

pub fn port() -> u16 {
    AppConfig::global().port
}

pub fn jwt_secret() -> String {
    AppConfig::global().jwt_secret.clone()
}

pub fn jwt_duration_minutes() -> u64 {
    AppConfig::global().jwt_duration_minutes
}

pub fn token_rotation_ms() -> i64 {
    AppConfig::global().token_rotation_ms
}

pub fn token_grace_ms() -> i64 {
    AppConfig::global().token_grace_ms
}

pub fn confidence_threshold() -> i32 {
    AppConfig::global().confidence_threshold
}

pub fn reverify_sample_percent() -> i32 {
    AppConfig::global().reverify_sample_percent
}

pub fn reverify_slot_capacity() -> i32 {
    AppConfig::global().reverify_slot_capacity
}

pub fn reverify_max_attempts() -> i32 {
    AppConfig::global().reverify_max_attempts
}

pub fn reverify_max_retries() -> i32 {
    AppConfig::global().reverify_max_retries
}
