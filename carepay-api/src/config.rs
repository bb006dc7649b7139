//! Environment-driven configuration for the API server

use std::env;

use carepay_engine::engine::PayoutEngineConfig;
use carepay_engine::error::PayoutError;
use carepay_engine::ledger::LedgerConfig;
use carepay_engine::registry::RegistryConfig;
use carepay_engine::scheduler::SchedulerConfig;
use carepay_engine::PayoutResult;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub processor_base_url: String,
    pub processor_api_key: String,
    pub engine: PayoutEngineConfig,
}

impl ApiConfig {
    pub fn from_env() -> PayoutResult<Self> {
        load_dotenv_layers();

        let engine = PayoutEngineConfig {
            fee_rate_percent: read_optional_u32("FEE_RATE_PERCENT", 10)?,
            ledger: LedgerConfig {
                holdback_secs: read_optional_i64("HOLDBACK_SECONDS", 86_400)?,
                max_release_attempts: read_optional_u32("MAX_RELEASE_ATTEMPTS", 5)?,
                backoff_base_secs: read_optional_i64("BACKOFF_BASE_SECONDS", 60)?,
            },
            registry: RegistryConfig {
                freshness_window_secs: read_optional_i64("ACCOUNT_FRESHNESS_SECONDS", 300)?,
            },
            scheduler: SchedulerConfig {
                interval_secs: read_optional_u64("SCHEDULER_INTERVAL_SECONDS", 300)?,
                releasing_timeout_secs: read_optional_i64("RELEASING_TIMEOUT_SECONDS", 900)?,
            },
        };

        Ok(Self {
            host: read_optional_string("API_HOST", "0.0.0.0"),
            port: read_optional_u16("API_PORT", 8080)?,
            processor_base_url: read_var("PROCESSOR_BASE_URL")?,
            processor_api_key: read_var("PROCESSOR_API_KEY")?,
            engine,
        })
    }
}

fn read_var(key: &str) -> PayoutResult<String> {
    env::var(key).map_err(|_| PayoutError::config(format!("missing required env var: {key}")))
}

fn read_optional_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn read_optional_i64(key: &str, default: i64) -> PayoutResult<i64> {
    match env::var(key) {
        Ok(v) => v
            .parse::<i64>()
            .map_err(|e| PayoutError::config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn read_optional_u64(key: &str, default: u64) -> PayoutResult<u64> {
    match env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .map_err(|e| PayoutError::config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn read_optional_u16(key: &str, default: u16) -> PayoutResult<u16> {
    match env::var(key) {
        Ok(v) => v
            .parse::<u16>()
            .map_err(|e| PayoutError::config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn read_optional_u32(key: &str, default: u32) -> PayoutResult<u32> {
    match env::var(key) {
        Ok(v) => v
            .parse::<u32>()
            .map_err(|e| PayoutError::config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn load_dotenv_layers() {
    for path in [".env", "../.env"] {
        let _ = dotenvy::from_path_override(path);
    }
}
