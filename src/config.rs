use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/auction.json";

/// Well-known port the server listens on.
pub const DEFAULT_PORT: u16 = 9876;

pub const BIND_ADDR_ENV: &str = "AUCTION_BIND_ADDR";
pub const SERVER_ADDR_ENV: &str = "AUCTION_SERVER_ADDR";
pub const DATABASE_ENV: &str = "AUCTION_DATABASE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_path: String,
    /// How often the expiry monitor rescans open lots.
    pub expiry_interval_ms: u64,
    /// Upper bound on datagrams handled concurrently.
    pub max_workers: usize,
    /// Completed responses remembered for replay to retried requests.
    pub response_cache_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            database_path: "data/auction.db".to_string(),
            expiry_interval_ms: 2000,
            max_workers: 64,
            response_cache_size: 1024,
        }
    }
}

impl ServerConfig {
    /// Scan period for the expiry monitor, never shorter than one millisecond.
    pub fn expiry_interval(&self) -> Duration {
        if self.expiry_interval_ms == 0 {
            log::warn!("expiry_interval_ms must be positive; scanning every millisecond");
        }
        Duration::from_millis(self.expiry_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_addr: String,
    /// Sends of a request before giving up on a response.
    pub request_attempts: u32,
    pub retry_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            request_attempts: 10,
            retry_interval_ms: 100,
        }
    }
}

impl ClientConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    let mut config = match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    };
    apply_env_overrides(&mut config, |key| env::var(key).ok());
    config
}

/// Environment (or `.env`) values win over the file.
fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(addr) = lookup(BIND_ADDR_ENV) {
        log::info!("{BIND_ADDR_ENV} overrides bind address: {addr}");
        config.server.bind_addr = addr;
    }
    if let Some(addr) = lookup(SERVER_ADDR_ENV) {
        log::info!("{SERVER_ADDR_ENV} overrides server address: {addr}");
        config.client.server_addr = addr;
    }
    if let Some(path) = lookup(DATABASE_ENV) {
        log::info!("{DATABASE_ENV} overrides database path: {path}");
        config.server.database_path = path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("absent.json");
        let config = load_config(path.to_str().unwrap());
        assert_eq!(config.client.request_attempts, 10);
        assert_eq!(config.server.expiry_interval(), Duration::from_secs(2));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("auction.json");
        fs::write(&path, r#"{ "server": { "expiry_interval_ms": 250 } }"#).unwrap();

        let config = load_config(path.to_str().unwrap());
        assert_eq!(config.server.expiry_interval_ms, 250);
        assert_eq!(config.server.max_workers, 64);
        assert_eq!(config.client.retry_interval_ms, 100);
    }

    #[test]
    fn zero_expiry_interval_is_clamped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("auction.json");
        fs::write(&path, r#"{ "server": { "expiry_interval_ms": 0 } }"#).unwrap();

        let config = load_config(path.to_str().unwrap());
        assert_eq!(config.server.expiry_interval_ms, 0);
        assert_eq!(config.server.expiry_interval(), Duration::from_millis(1));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, |key| match key {
            SERVER_ADDR_ENV => Some("10.0.0.5:9876".to_string()),
            DATABASE_ENV => Some("/tmp/other.db".to_string()),
            _ => None,
        });
        assert_eq!(config.client.server_addr, "10.0.0.5:9876");
        assert_eq!(config.server.database_path, "/tmp/other.db");
        assert_eq!(config.server.bind_addr, "0.0.0.0:9876");
    }
}
