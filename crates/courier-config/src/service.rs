//! Service configuration parsing.

use kdl::KdlDocument;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::kdl_ext::{bool_arg, children, string_arg, u64_arg};
use crate::{ConfigError, ConfigResult};

/// File read when no explicit path is given. Missing is not an error.
pub const DEFAULT_CONFIG_PATH: &str = "courier.kdl";

/// Service-wide configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub realtime: RealtimeConfig,
    pub admin: AdminConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Time in-flight requests get to finish after a shutdown signal.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueConfig {
    /// Longest a claim waits for its subscription lock before reporting
    /// that no job is available.
    pub claim_wait: Duration,
    /// Claimed jobs older than this go back to pending. `None` disables the sweep.
    pub reclaim_after: Option<Duration>,
    pub sweep_interval: Duration,
    /// Refuse a claim while the claimant still holds a job in the subscription.
    pub single_in_flight: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            claim_wait: Duration::from_millis(250),
            reclaim_after: Some(Duration::from_secs(300)),
            sweep_interval: Duration::from_secs(30),
            single_in_flight: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeConfig {
    pub heartbeat: Duration,
    pub subscription_topic_prefix: String,
    pub user_topic_prefix: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            subscription_topic_prefix: "subscription.".to_string(),
            user_topic_prefix: "user.".to_string(),
        }
    }
}

#[derive(Clone, Default, Serialize)]
pub struct AdminConfig {
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogConfig {
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" => Ok(StoreBackend::Postgres),
            other => Err(ConfigError::invalid(
                "store backend",
                format!("unknown backend: {}", other),
            )),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::invalid(
                "log format",
                format!("unknown format: {}", other),
            )),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `path` (or `courier.kdl` when it exists), then
    /// apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::parse(&std::fs::read_to_string(path)?)?,
            None => match std::fs::read_to_string(DEFAULT_CONFIG_PATH) {
                Ok(text) => Self::parse(&text)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
                Err(e) => return Err(e.into()),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a KDL document on top of the defaults. Does not validate.
    pub fn parse(kdl: &str) -> ConfigResult<Self> {
        let doc: KdlDocument = kdl.parse()?;
        let mut config = Self::default();

        for node in doc.nodes() {
            let section = node.name().value();
            for child in children(node) {
                let key = child.name().value();
                let field = format!("{}.{}", section, key);
                match (section, key) {
                    ("server", "bind") => {
                        config.server.bind = parse_addr(&string_arg(child, &field)?, &field)?;
                    }
                    ("server", "shutdown-grace-secs") => {
                        config.server.shutdown_grace = Duration::from_secs(u64_arg(child, &field)?);
                    }
                    ("store", "backend") => {
                        config.store = string_arg(child, &field)?.parse()?;
                    }
                    ("database", "url") => {
                        config.database.url = Some(string_arg(child, &field)?);
                    }
                    ("database", "max-connections") => {
                        config.database.max_connections = u32::try_from(u64_arg(child, &field)?)
                            .map_err(|_| ConfigError::invalid(&field, "too large"))?;
                    }
                    ("queue", "claim-wait-ms") => {
                        config.queue.claim_wait = Duration::from_millis(u64_arg(child, &field)?);
                    }
                    ("queue", "reclaim-after-secs") => {
                        let secs = u64_arg(child, &field)?;
                        config.queue.reclaim_after =
                            (secs > 0).then(|| Duration::from_secs(secs));
                    }
                    ("queue", "sweep-interval-secs") => {
                        config.queue.sweep_interval = Duration::from_secs(u64_arg(child, &field)?);
                    }
                    ("queue", "single-in-flight") => {
                        config.queue.single_in_flight = bool_arg(child, &field)?;
                    }
                    ("realtime", "heartbeat-secs") => {
                        config.realtime.heartbeat = Duration::from_secs(u64_arg(child, &field)?);
                    }
                    ("realtime", "subscription-topic-prefix") => {
                        config.realtime.subscription_topic_prefix = string_arg(child, &field)?;
                    }
                    ("realtime", "user-topic-prefix") => {
                        config.realtime.user_topic_prefix = string_arg(child, &field)?;
                    }
                    ("admin", "token") => {
                        config.admin.token = Some(string_arg(child, &field)?);
                    }
                    ("log", "format") => {
                        config.log.format = string_arg(child, &field)?.parse()?;
                    }
                    _ => {} // Ignore unknown nodes
                }
            }
        }

        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url);
            // A database URL in the environment implies the postgres backend
            // unless the backend was chosen explicitly.
            if let Some(backend) = lookup("COURIER_STORE") {
                self.store = backend.parse()?;
            } else {
                self.store = StoreBackend::Postgres;
            }
        } else if let Some(backend) = lookup("COURIER_STORE") {
            self.store = backend.parse()?;
        }
        if let Some(bind) = lookup("COURIER_BIND") {
            self.server.bind = parse_addr(&bind, "COURIER_BIND")?;
        }
        if let Some(token) = lookup("COURIER_ADMIN_TOKEN") {
            self.admin.token = Some(token);
        }
        if let Some(format) = lookup("COURIER_LOG_FORMAT") {
            self.log.format = format.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.store == StoreBackend::Postgres && self.database.url.is_none() {
            return Err(ConfigError::MissingField("database.url".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::invalid(
                "database.max-connections",
                "must be positive",
            ));
        }
        if self.queue.claim_wait.is_zero() {
            return Err(ConfigError::invalid("queue.claim-wait-ms", "must be positive"));
        }
        if self.queue.sweep_interval.is_zero() {
            return Err(ConfigError::invalid(
                "queue.sweep-interval-secs",
                "must be positive",
            ));
        }
        if self.realtime.heartbeat.is_zero() {
            return Err(ConfigError::invalid(
                "realtime.heartbeat-secs",
                "must be positive",
            ));
        }
        if self.realtime.user_topic_prefix.is_empty() {
            return Err(ConfigError::invalid(
                "realtime.user-topic-prefix",
                "must not be empty",
            ));
        }
        if matches!(&self.admin.token, Some(token) if token.is_empty()) {
            return Err(ConfigError::invalid("admin.token", "must not be empty"));
        }
        Ok(())
    }
}

fn parse_addr(value: &str, field: &str) -> ConfigResult<SocketAddr> {
    value
        .parse()
        .map_err(|e| ConfigError::invalid(field, format!("{}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.queue.claim_wait, Duration::from_millis(250));
    }

    #[test]
    fn test_parse_full_document() {
        let kdl = r#"
            server {
                bind "127.0.0.1:8080"
                shutdown-grace-secs 5
            }
            store {
                backend "postgres"
            }
            database {
                url "postgres://courier@localhost/courier"
                max-connections 4
            }
            queue {
                claim-wait-ms 100
                reclaim-after-secs 60
                sweep-interval-secs 10
                single-in-flight #true
            }
            realtime {
                heartbeat-secs 15
                subscription-topic-prefix "jobs."
            }
            admin {
                token "s3cret"
            }
            log {
                format "json"
            }
        "#;

        let config = ServiceConfig::parse(kdl).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.bind.port(), 8080);
        assert_eq!(config.server.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.store, StoreBackend::Postgres);
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.queue.claim_wait, Duration::from_millis(100));
        assert_eq!(config.queue.reclaim_after, Some(Duration::from_secs(60)));
        assert!(config.queue.single_in_flight);
        assert_eq!(config.realtime.subscription_topic_prefix, "jobs.");
        assert_eq!(config.realtime.user_topic_prefix, "user.");
        assert_eq!(config.admin.token.as_deref(), Some("s3cret"));
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_zero_reclaim_disables_sweep() {
        let config = ServiceConfig::parse("queue { reclaim-after-secs 0 }").unwrap();
        assert_eq!(config.queue.reclaim_after, None);
    }

    #[test]
    fn test_postgres_requires_url() {
        let config = ServiceConfig::parse(r#"store { backend "postgres" }"#).unwrap();
        assert_matches!(config.validate(), Err(ConfigError::MissingField(_)));
    }

    #[test]
    fn test_empty_user_topic_prefix_is_rejected() {
        let mut config = ServiceConfig::default();
        config.realtime.user_topic_prefix.clear();
        assert_matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "realtime.user-topic-prefix"
        );
    }

    #[test]
    fn test_unknown_backend() {
        let result = ServiceConfig::parse(r#"store { backend "redis" }"#);
        assert_matches!(result, Err(ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_wrong_value_type() {
        let result = ServiceConfig::parse(r#"queue { claim-wait-ms "fast" }"#);
        assert_matches!(result, Err(ConfigError::InvalidValue { field, .. }) if field == "queue.claim-wait-ms");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DATABASE_URL", "postgres://env/courier"),
            ("COURIER_BIND", "127.0.0.1:4000"),
            ("COURIER_ADMIN_TOKEN", "from-env"),
        ]
        .into_iter()
        .collect();

        let mut config = ServiceConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.store, StoreBackend::Postgres);
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://env/courier")
        );
        assert_eq!(config.server.bind.port(), 4000);
        assert_eq!(config.admin.token.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_explicit_store_wins_over_database_url() {
        let mut config = ServiceConfig::default();
        config
            .apply_env(|key| match key {
                "DATABASE_URL" => Some("postgres://env/courier".to_string()),
                "COURIER_STORE" => Some("memory".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
    }

    #[test]
    fn test_debug_redacts_token() {
        let admin = AdminConfig {
            token: Some("hunter2".to_string()),
        };
        let debug = format!("{:?}", admin);
        assert!(!debug.contains("hunter2"));
    }
}
