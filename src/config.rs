//! Engine configuration
//!
//! Loaded from a TOML file (usually `namedql.toml`); every field has a default.
//!
//! ## Environment Variables
//!
//! The following environment variables override file settings:
//!
//! - `NAMEDQL_DEFAULT_LIMIT` - page size when the caller gives none
//! - `NAMEDQL_MAX_LIMIT` - upper bound for any requested page size
//! - `NAMEDQL_MAX_SELECT_SIZE` - row cap for `select`
//! - `NAMEDQL_SIZE_VIOLATION` - `raise` or `truncate`
//! - `NAMEDQL_TIMEOUT_SECS` - default statement timeout
//! - `NAMEDQL_STREAM_BATCH_SIZE` - rows fetched per stream batch
//! - `NAMEDQL_STREAM_RETRY_TIMES` - retries per failed stream batch
//! - `NAMEDQL_STREAM_RETRY_INTERVAL_MS` - pause between stream retries
//!
//! These can be set in a `.env` file.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::mapping::Query;

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "namedql.toml";

pub const ENV_DEFAULT_LIMIT: &str = "NAMEDQL_DEFAULT_LIMIT";
pub const ENV_MAX_LIMIT: &str = "NAMEDQL_MAX_LIMIT";
pub const ENV_MAX_SELECT_SIZE: &str = "NAMEDQL_MAX_SELECT_SIZE";
pub const ENV_SIZE_VIOLATION: &str = "NAMEDQL_SIZE_VIOLATION";
pub const ENV_TIMEOUT_SECS: &str = "NAMEDQL_TIMEOUT_SECS";
pub const ENV_STREAM_BATCH_SIZE: &str = "NAMEDQL_STREAM_BATCH_SIZE";
pub const ENV_STREAM_RETRY_TIMES: &str = "NAMEDQL_STREAM_RETRY_TIMES";
pub const ENV_STREAM_RETRY_INTERVAL_MS: &str = "NAMEDQL_STREAM_RETRY_INTERVAL_MS";

/// Query properties that override engine settings per query.
pub const PROP_MAX_SELECT_SIZE: &str = "max-select-size";
pub const PROP_LIMIT: &str = "limit";
pub const PROP_MAX_LIMIT: &str = "max-limit";
pub const PROP_TIMEOUT: &str = "timeout";

/// What `select` does when a result exceeds its maximum size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeViolation {
    #[default]
    Raise,
    Truncate,
}

impl FromStr for SizeViolation {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raise" | "error" => Ok(SizeViolation::Raise),
            "truncate" => Ok(SizeViolation::Truncate),
            other => Err(QueryError::Config(format!(
                "Unknown size violation policy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_select_size: usize,
    pub size_violation: SizeViolation,
    pub default_timeout_secs: Option<u64>,
    pub stream: StreamConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_limit: 16,
            max_limit: 1024,
            max_select_size: 128,
            size_violation: SizeViolation::Raise,
            default_timeout_secs: None,
            stream: StreamConfig::default(),
        }
    }
}

/// Defaults for [`QueryStream`](crate::service::QueryStream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StreamConfig {
    pub batch_size: usize,
    /// 0 disables retry.
    pub retry_times: u32,
    pub retry_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            retry_times: 0,
            retry_interval_ms: 2000,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> QueryResult<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.check()
    }

    pub fn from_path(path: &Path) -> QueryResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load `namedql.toml` from `dir` if present (defaults otherwise), after
    /// loading `.env` from the same directory, then apply environment
    /// overrides.
    pub fn load(dir: &Path) -> QueryResult<Self> {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }

        let config_path = dir.join(CONFIG_FILE_NAME);
        let mut config = if config_path.exists() {
            Self::from_path(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env();
        config.check()
    }

    /// Apply `NAMEDQL_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparseable values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            let raw = lookup(key)?;
            let parsed = raw.trim().parse().ok();
            if parsed.is_none() {
                tracing::warn!("Ignoring invalid value '{}' for {}", raw, key);
            }
            parsed
        }

        if let Some(v) = parse(&lookup, ENV_DEFAULT_LIMIT) {
            self.default_limit = v;
        }
        if let Some(v) = parse(&lookup, ENV_MAX_LIMIT) {
            self.max_limit = v;
        }
        if let Some(v) = parse(&lookup, ENV_MAX_SELECT_SIZE) {
            self.max_select_size = v;
        }
        if let Some(v) = parse(&lookup, ENV_SIZE_VIOLATION) {
            self.size_violation = v;
        }
        if let Some(v) = parse(&lookup, ENV_TIMEOUT_SECS) {
            self.default_timeout_secs = Some(v);
        }
        if let Some(v) = parse(&lookup, ENV_STREAM_BATCH_SIZE) {
            self.stream.batch_size = v;
        }
        if let Some(v) = parse(&lookup, ENV_STREAM_RETRY_TIMES) {
            self.stream.retry_times = v;
        }
        if let Some(v) = parse(&lookup, ENV_STREAM_RETRY_INTERVAL_MS) {
            self.stream.retry_interval_ms = v;
        }
    }

    fn check(self) -> QueryResult<Self> {
        if self.max_limit == 0 || self.default_limit == 0 {
            return Err(QueryError::Config(
                "default-limit and max-limit must be positive".to_string(),
            ));
        }
        if self.default_limit > self.max_limit {
            return Err(QueryError::Config(format!(
                "default-limit {} exceeds max-limit {}",
                self.default_limit, self.max_limit
            )));
        }
        if self.stream.batch_size == 0 {
            return Err(QueryError::Config(
                "stream batch-size must be positive".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn max_select_size(&self, query: &Query) -> usize {
        query
            .property(PROP_MAX_SELECT_SIZE)
            .unwrap_or(self.max_select_size)
    }

    /// Effective page size: the requested limit, else the query's `limit`
    /// property, else the default; capped by the applicable maximum.
    pub fn limit(&self, query: &Query, requested: Option<usize>) -> usize {
        let max = query.property(PROP_MAX_LIMIT).unwrap_or(self.max_limit);
        let limit = requested
            .or_else(|| query.property(PROP_LIMIT))
            .unwrap_or(self.default_limit);
        limit.clamp(1, max.max(1))
    }

    pub fn timeout(&self, query: &Query) -> Option<Duration> {
        query
            .property::<u64>(PROP_TIMEOUT)
            .or(self.default_timeout_secs)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingBuilder, QueryDefinition, ScriptKind};
    use std::collections::HashMap;

    #[test]
    fn test_defaults_and_toml() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());

        let config = EngineConfig::from_toml_str(
            r#"
            max-select-size = 10
            size-violation = "truncate"
            default-timeout-secs = 5

            [stream]
            retry-times = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.max_select_size, 10);
        assert_eq!(config.size_violation, SizeViolation::Truncate);
        assert_eq!(config.default_timeout_secs, Some(5));
        assert_eq!(config.stream.retry_times, 3);
        assert_eq!(config.stream.batch_size, 16);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(EngineConfig::from_toml_str("default-limit = 0").is_err());
        assert!(EngineConfig::from_toml_str("default-limit = 50\nmax-limit = 10").is_err());
        assert!(EngineConfig::from_toml_str("size-violation = \"ignore\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_MAX_SELECT_SIZE, "7"),
            (ENV_SIZE_VIOLATION, "truncate"),
            (ENV_STREAM_RETRY_TIMES, "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut config = EngineConfig::default();
        config.apply_env_with(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.max_select_size, 7);
        assert_eq!(config.size_violation, SizeViolation::Truncate);
        assert_eq!(config.stream.retry_times, 0);
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "default-limit = 20").unwrap();
        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.default_limit, 20);
    }

    #[test]
    fn test_query_property_overrides() {
        let mappings = MappingBuilder::new()
            .query(
                QueryDefinition::new("q", ScriptKind::Literal, "SELECT 1")
                    .property(PROP_MAX_SELECT_SIZE, "3")
                    .property(PROP_LIMIT, "5")
                    .property(PROP_MAX_LIMIT, "50")
                    .property(PROP_TIMEOUT, "9"),
            )
            .query(QueryDefinition::new("plain", ScriptKind::Literal, "SELECT 1"))
            .build()
            .unwrap();
        let config = EngineConfig::default();
        let q = mappings.get_query("q").unwrap();
        let plain = mappings.get_query("plain").unwrap();

        assert_eq!(config.max_select_size(&q), 3);
        assert_eq!(config.max_select_size(&plain), 128);
        assert_eq!(config.limit(&q, None), 5);
        assert_eq!(config.limit(&q, Some(500)), 50);
        assert_eq!(config.limit(&plain, None), 16);
        assert_eq!(config.limit(&plain, Some(0)), 1);
        assert_eq!(config.timeout(&q), Some(Duration::from_secs(9)));
        assert_eq!(config.timeout(&plain), None);
    }
}
