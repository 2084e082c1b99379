//! Configuration for reachmail
//!
//! Settings load from an optional TOML file and are then overridden by the
//! environment variables documented in the README. Every field has a
//! default so the service boots against a local Postgres + Redis with no
//! file at all.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Relational store configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Key-value store (counters + task queue) configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Outbound SMTP configuration
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Throughput ceilings and pacing
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Delivery worker pool configuration
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            smtp: SmtpConfig::default(),
            throttle: ThrottleConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Relational store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_database_url() -> String {
    "postgres://localhost/reachmail".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

/// Key-value store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Optional AUTH password
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
        }
    }
}

impl RedisConfig {
    /// Build a connection URL understood by the redis client
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/", password, self.host, self.port),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

/// Outbound SMTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Use STARTTLS on the relay connection
    #[serde(default = "default_smtp_starttls")]
    pub use_starttls: bool,

    /// From address used when no sender account row is active
    #[serde(default = "default_from_address")]
    pub from_address: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: None,
            password: None,
            use_starttls: default_smtp_starttls(),
            from_address: default_from_address(),
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_starttls() -> bool {
    true
}

fn default_from_address() -> String {
    "no-reply@localhost".to_string()
}

/// Throughput ceilings and pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Global hourly send ceiling
    #[serde(default = "default_max_emails_per_hour")]
    pub max_emails_per_hour: i64,

    /// Per-sender hourly send ceiling
    #[serde(default = "default_max_emails_per_hour_per_sender")]
    pub max_emails_per_hour_per_sender: i64,

    /// Minimum spacing between outbound SMTP conversations
    #[serde(default = "default_min_delay_between_emails_ms")]
    pub min_delay_between_emails_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_emails_per_hour: default_max_emails_per_hour(),
            max_emails_per_hour_per_sender: default_max_emails_per_hour_per_sender(),
            min_delay_between_emails_ms: default_min_delay_between_emails_ms(),
        }
    }
}

fn default_max_emails_per_hour() -> i64 {
    200
}

fn default_max_emails_per_hour_per_sender() -> i64 {
    50
}

fn default_min_delay_between_emails_ms() -> u64 {
    2000
}

/// Delivery worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent delivery workers
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,

    /// Queue poll interval when no task is ready (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_worker_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_worker_concurrency() -> usize {
    5
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration: optional file, then environment overrides
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/reachmail/config.toml"),
        ];

        let mut config = Config::default();
        for path in paths {
            if path.exists() {
                config = Self::from_file(&path)?;
                break;
            }
        }

        let env: HashMap<String, String> = std::env::vars().collect();
        config.apply_overrides(&env)?;

        Ok(config)
    }

    /// Apply environment-style overrides from a key/value map
    pub fn apply_overrides(&mut self, vars: &HashMap<String, String>) -> crate::Result<()> {
        if let Some(v) = vars.get("PORT") {
            self.server.port = parse_var("PORT", v)?;
        }
        if let Some(v) = vars.get("DATABASE_URL") {
            self.database.url = v.clone();
        }
        if let Some(v) = vars.get("REDIS_HOST") {
            self.redis.host = v.clone();
        }
        if let Some(v) = vars.get("REDIS_PORT") {
            self.redis.port = parse_var("REDIS_PORT", v)?;
        }
        if let Some(v) = vars.get("REDIS_PASSWORD") {
            self.redis.password = Some(v.clone());
        }
        if let Some(v) = vars.get("SMTP_HOST") {
            self.smtp.host = v.clone();
        }
        if let Some(v) = vars.get("SMTP_PORT") {
            self.smtp.port = parse_var("SMTP_PORT", v)?;
        }
        if let Some(v) = vars.get("SMTP_USER") {
            self.smtp.username = Some(v.clone());
        }
        if let Some(v) = vars.get("SMTP_PASSWORD") {
            self.smtp.password = Some(v.clone());
        }
        if let Some(v) = vars.get("SMTP_FROM") {
            self.smtp.from_address = v.clone();
        }
        if let Some(v) = vars.get("MAX_EMAILS_PER_HOUR") {
            self.throttle.max_emails_per_hour = parse_var("MAX_EMAILS_PER_HOUR", v)?;
        }
        if let Some(v) = vars.get("MAX_EMAILS_PER_HOUR_PER_SENDER") {
            self.throttle.max_emails_per_hour_per_sender =
                parse_var("MAX_EMAILS_PER_HOUR_PER_SENDER", v)?;
        }
        if let Some(v) = vars.get("MIN_DELAY_BETWEEN_EMAILS_MS") {
            self.throttle.min_delay_between_emails_ms =
                parse_var("MIN_DELAY_BETWEEN_EMAILS_MS", v)?;
        }
        if let Some(v) = vars.get("WORKER_CONCURRENCY") {
            self.worker.concurrency = parse_var("WORKER_CONCURRENCY", v)?;
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .parse()
        .map_err(|_| crate::Error::Config(format!("Invalid value for {}: {}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.throttle.max_emails_per_hour, 200);
        assert_eq!(config.throttle.max_emails_per_hour_per_sender, 50);
        assert_eq!(config.throttle.min_delay_between_emails_ms, 2000);
        assert_eq!(config.worker.concurrency, 5);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 8080

[database]
url = "postgres://localhost/reachmail_test"

[throttle]
max_emails_per_hour = 1000
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.url, "postgres://localhost/reachmail_test");
        assert_eq!(config.throttle.max_emails_per_hour, 1000);
        // Untouched sections keep their defaults
        assert_eq!(config.worker.concurrency, 5);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        let vars: HashMap<String, String> = [
            ("PORT", "4000"),
            ("REDIS_HOST", "redis.internal"),
            ("MAX_EMAILS_PER_HOUR", "500"),
            ("WORKER_CONCURRENCY", "8"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        config.apply_overrides(&vars).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.redis.host, "redis.internal");
        assert_eq!(config.throttle.max_emails_per_hour, 500);
        assert_eq!(config.worker.concurrency, 8);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = Config::default();
        let vars: HashMap<String, String> =
            [("PORT".to_string(), "not-a-port".to_string())].into();

        assert!(config.apply_overrides(&vars).is_err());
    }

    #[test]
    fn test_redis_url() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.url(), "redis://127.0.0.1:6379/");

        redis.password = Some("secret".to_string());
        assert_eq!(redis.url(), "redis://:secret@127.0.0.1:6379/");
    }
}
