use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

/// Typed settings surface. Loaded via the layered `config`-crate
/// pattern: a base file, an environment
/// override file, then `ENGINE__`-prefixed env vars, each source
/// overriding the one before it.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store_url: Option<String>,
    #[serde(default)]
    pub queue_url: Option<String>,
    #[serde(default = "default_queue_concurrency")]
    pub queue_concurrency: usize,
    #[serde(default = "default_queue_rate_limit")]
    pub queue_rate_limit: usize,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default)]
    pub venue_fees: VenueFees,
    #[serde(default)]
    pub execution_delay: ExecutionDelay,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_server_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            host: default_server_host(),
        }
    }
}

/// Per-venue fee rate, keyed by the `Venue` enum's display name
/// (`"Raydium"`, `"Meteora"`) so config files and env vars can target
/// either driver without a schema change when a third venue is added.
#[derive(Debug, Deserialize, Clone)]
pub struct VenueFees {
    #[serde(flatten)]
    pub per_venue: HashMap<String, Decimal>,
}

impl Default for VenueFees {
    fn default() -> Self {
        let mut per_venue = HashMap::new();
        per_venue.insert("Raydium".to_string(), Decimal::new(25, 4)); // 0.0025
        per_venue.insert("Meteora".to_string(), Decimal::new(20, 4)); // 0.0020
        Self { per_venue }
    }
}

impl VenueFees {
    pub fn get(&self, venue: &str, fallback: Decimal) -> Decimal {
        self.per_venue.get(venue).copied().unwrap_or(fallback)
    }
}

/// Simulated swap execution delay window, test-only.
#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionDelay {
    #[serde(default)]
    pub min_ms: u64,
    #[serde(default)]
    pub max_ms: u64,
}

impl Default for ExecutionDelay {
    fn default() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }
}

fn default_server_port() -> u16 {
    8080
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_queue_concurrency() -> usize {
    10
}

fn default_queue_rate_limit() -> usize {
    100
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let home = env::var("HOME").unwrap_or_else(|_| ".".into());

        let s = Config::builder()
            .add_source(File::with_name(&format!("{home}/.swap-execution-engine/config")).required(false))
            .add_source(File::with_name("config/config").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("ENGINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store_url: None,
            queue_url: None,
            queue_concurrency: default_queue_concurrency(),
            queue_rate_limit: default_queue_rate_limit(),
            max_retry_attempts: default_max_retry_attempts(),
            venue_fees: VenueFees::default(),
            execution_delay: ExecutionDelay::default(),
            log_level: default_log_level(),
        }
    }
}

/// Reads `<KEY>_FILE` env vars pointing at a mounted secret file and
/// sets `<KEY>` from its contents, the way container-orchestrated
/// secrets are usually injected. Must run before any network I/O.
pub fn load_secrets_from_files() {
    const FILE_SUFFIX: &str = "_FILE";

    let vars: Vec<(String, String)> = env::vars().collect();
    for (key, value) in vars {
        if !key.ends_with(FILE_SUFFIX) {
            continue;
        }

        let target_key = key.trim_end_matches(FILE_SUFFIX);
        if env::var(target_key).is_ok() {
            continue;
        }
        if value.is_empty() {
            continue;
        }

        if let Ok(contents) = std::fs::read_to_string(&value) {
            let trimmed = contents.trim().to_string();
            if !trimmed.is_empty() {
                // SAFETY: called once before #[tokio::main] spawns any threads.
                unsafe {
                    env::set_var(target_key, trimmed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.queue_concurrency, 10);
        assert_eq!(settings.queue_rate_limit, 100);
        assert_eq!(settings.max_retry_attempts, 3);
    }

    #[test]
    fn venue_fees_fall_back_when_unconfigured() {
        let fees = VenueFees { per_venue: HashMap::new() };
        assert_eq!(fees.get("Raydium", dec!(0.003)), dec!(0.003));
    }

    #[test]
    fn venue_fees_prefer_configured_value() {
        let fees = VenueFees::default();
        assert_eq!(fees.get("Raydium", dec!(0.1)), dec!(0.0025));
    }
}
