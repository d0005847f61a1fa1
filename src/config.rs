// Configuration module for repograph
// Reads from environment variables with sensible defaults

use std::env;
use std::str::FromStr;
use std::sync::OnceLock;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Read connection pool size (REPOGRAPH_POOL_SIZE)
    pub pool_size: u32,

    /// Read connection pool minimum idle connections (REPOGRAPH_POOL_MIN_IDLE)
    pub pool_min_idle: u32,

    /// Seconds a store call waits on a locked database before failing (REPOGRAPH_BUSY_TIMEOUT_SECS)
    pub busy_timeout_secs: u64,

    /// Maximum rows returned by an ad-hoc query (REPOGRAPH_MAX_QUERY_ROWS)
    pub max_query_rows: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 10,
            pool_min_idle: 2,
            busy_timeout_secs: 30,
            max_query_rows: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();
        override_from_env("REPOGRAPH_POOL_SIZE", &mut config.pool_size);
        override_from_env("REPOGRAPH_POOL_MIN_IDLE", &mut config.pool_min_idle);
        override_from_env("REPOGRAPH_BUSY_TIMEOUT_SECS", &mut config.busy_timeout_secs);
        override_from_env("REPOGRAPH_MAX_QUERY_ROWS", &mut config.max_query_rows);
        if config.pool_min_idle > config.pool_size {
            config.pool_min_idle = config.pool_size;
        }
        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }
}

fn override_from_env<T>(key: &str, slot: &mut T)
where
    T: FromStr + std::fmt::Display,
{
    let Ok(val) = env::var(key) else {
        return;
    };
    match val.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(
            "invalid {key} value: {val}, using default: {slot}"
        ),
    }
}
