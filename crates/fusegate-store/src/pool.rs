use std::time::Duration;

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use serde::Deserialize;

use crate::error::Result;

/// Connection settings for the sorted-set backend.
///
/// A missing `[redis]` section is a startup error; the proxy refuses to run
/// without its telemetry backend configured. It will happily run with the
/// backend *down* (the fail-open path), but not unconfigured.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub password: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_response_timeout_ms() -> u64 {
    1000
}

impl RedisConfig {
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/", password, self.host, self.port),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }

    /// Connection URL with the password masked, safe for startup logs.
    pub fn redacted_url(&self) -> String {
        match &self.password {
            Some(_) => format!("redis://:***@{}:{}/", self.host, self.port),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }
}

/// Opens a multiplexed, auto-reconnecting connection to the backend.
///
/// The manager hands out cheap clones; every caller clones it per
/// operation and the underlying connection is shared. A connection that
/// errors is re-established by the manager, never handed back broken.
pub async fn connect(config: &RedisConfig) -> Result<ConnectionManager> {
    let client = redis::Client::open(config.connection_url())?;
    let manager_config = ConnectionManagerConfig::new()
        .set_connection_timeout(Duration::from_millis(config.connect_timeout_ms))
        .set_response_timeout(Duration::from_millis(config.response_timeout_ms));
    let manager = ConnectionManager::new_with_config(client, manager_config).await?;
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_includes_password_when_set() {
        let config = RedisConfig {
            host: "redis.internal".into(),
            port: 6380,
            password: Some("hunter2".into()),
            connect_timeout_ms: 1000,
            response_timeout_ms: 1000,
        };
        assert_eq!(config.connection_url(), "redis://:hunter2@redis.internal:6380/");
        assert_eq!(config.redacted_url(), "redis://:***@redis.internal:6380/");
    }

    #[test]
    fn url_omits_auth_when_unset() {
        let config = RedisConfig {
            host: "127.0.0.1".into(),
            port: 6379,
            password: None,
            connect_timeout_ms: 1000,
            response_timeout_ms: 1000,
        };
        assert_eq!(config.connection_url(), "redis://127.0.0.1:6379/");
    }
}
