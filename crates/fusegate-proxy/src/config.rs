use serde::Deserialize;

use fusegate_store::pool::RedisConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Admin listener; bound to 127.0.0.1 only.
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
    /// Base URL requests are forwarded to.
    pub upstream: String,
    #[serde(default = "default_rule_dir")]
    pub rule_dir: String,
    /// Retention horizon for recorded events and counter TTLs.
    #[serde(default = "default_expired_seconds")]
    pub expired_seconds: u64,

    /// Telemetry backend. Required: the proxy refuses to start without it.
    pub redis: RedisConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub alarm: AlarmConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_breaker_enabled")]
    pub enabled: bool,
    /// Registry document consulted for alarm evaluation.
    #[serde(default = "default_alarm_rules_name")]
    pub alarm_rules: String,
    /// Registry document consulted for fuse evaluation.
    #[serde(default = "default_fuse_rules_name")]
    pub fuse_rules: String,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_breaker_enabled(),
            alarm_rules: default_alarm_rules_name(),
            fuse_rules: default_fuse_rules_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rate_rules_name")]
    pub rules: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rules: default_rate_rules_name(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlarmConfig {
    /// Alarm endpoint; alarms are disabled when unset.
    pub url: Option<String>,
    #[serde(default = "default_alarm_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_alarm_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_write_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_write_workers")]
    pub workers: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_write_queue_capacity(),
            workers: default_write_workers(),
        }
    }
}

fn default_listen_port() -> u16 {
    8080
}

fn default_admin_port() -> u16 {
    9101
}

fn default_rule_dir() -> String {
    "config/rules".to_string()
}

fn default_expired_seconds() -> u64 {
    600
}

fn default_breaker_enabled() -> bool {
    true
}

fn default_alarm_rules_name() -> String {
    "alarm_rules".to_string()
}

fn default_fuse_rules_name() -> String {
    "fuse_rules".to_string()
}

fn default_rate_rules_name() -> String {
    "rate_rules".to_string()
}

fn default_alarm_timeout_ms() -> u64 {
    500
}

fn default_alarm_queue_capacity() -> usize {
    256
}

fn default_write_queue_capacity() -> usize {
    1024
}

fn default_write_workers() -> usize {
    2
}

impl ProxyConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}
