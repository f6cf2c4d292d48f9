// Configuration module for codegraph
// Reads from environment variables with sensible defaults

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-request deadline in the protocol server (CODEGRAPH_REQUEST_TIMEOUT_MS)
    pub request_timeout_ms: u64,

    /// Extraction worker threads, 0 means one per core (CODEGRAPH_WORKERS)
    pub workers: usize,

    /// Files larger than this are skipped with a parse error (CODEGRAPH_MAX_FILE_BYTES)
    pub max_file_bytes: u64,

    /// Fallback rescan interval when file watching is unavailable (CODEGRAPH_REFRESH_INTERVAL_SECS)
    pub refresh_interval_secs: u64,

    /// Debounce window for filesystem events (CODEGRAPH_WATCH_DEBOUNCE_MS)
    pub watch_debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            workers: 0,
            max_file_bytes: 2_000_000,
            refresh_interval_secs: 300,
            watch_debounce_ms: 300,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();
        override_from_env("CODEGRAPH_REQUEST_TIMEOUT_MS", &mut config.request_timeout_ms);
        override_from_env("CODEGRAPH_WORKERS", &mut config.workers);
        override_from_env("CODEGRAPH_MAX_FILE_BYTES", &mut config.max_file_bytes);
        override_from_env(
            "CODEGRAPH_REFRESH_INTERVAL_SECS",
            &mut config.refresh_interval_secs,
        );
        override_from_env("CODEGRAPH_WATCH_DEBOUNCE_MS", &mut config.watch_debounce_ms);
        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

fn override_from_env<T>(key: &str, slot: &mut T)
where
    T: FromStr + Display,
{
    let Ok(val) = env::var(key) else {
        return;
    };
    match val.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(
            "invalid {} value: {}, using default: {}",
            key,
            val,
            slot
        ),
    }
}
