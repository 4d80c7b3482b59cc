//! Datasource configuration loading and validation.
//!
//! Configuration lives in a TOML file (default `rollup.toml`) with the same
//! camelCase keys the dashboard's datasource settings use:
//!
//! ```toml
//! apiUrl = "https://gitlab.example.com"
//! accessToken = "glpat-..."
//! groupId = 42
//! groupName = "acme/platform"
//! apiCallType = "rest"          # rest | graphql | gitbreaker | express
//! refreshInterval = 3600000     # milliseconds
//! ```
//!
//! Every field is optional at parse time; [`Config::validate`] checks that the
//! fields the selected transport needs are present. `ROLLUP_ACCESS_TOKEN`
//! overrides `accessToken`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{CacheOptions, DEFAULT_INGEST_TIMEOUT, DEFAULT_TTL};
use crate::fetcher::{DEFAULT_MAX_CONCURRENT, DEFAULT_MIN_INTERVAL};

/// Environment variable overriding `accessToken`
pub const ACCESS_TOKEN_ENV: &str = "ROLLUP_ACCESS_TOKEN";
/// Relay used by the GraphQL transport when none is configured
pub const DEFAULT_GRAPHQL_PROXY_URL: &str = "http://localhost:3000/graphql-proxy";

/// Which transport ingests the data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiCallType {
    #[default]
    Rest,
    Graphql,
    Gitbreaker,
    Express,
}

impl ApiCallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiCallType::Rest => "rest",
            ApiCallType::Graphql => "graphql",
            ApiCallType::Gitbreaker => "gitbreaker",
            ApiCallType::Express => "express",
        }
    }

    /// Fields this transport cannot work without
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            ApiCallType::Rest | ApiCallType::Gitbreaker => &["apiUrl", "accessToken", "groupId"],
            ApiCallType::Graphql => &["apiUrl", "accessToken", "groupName"],
            ApiCallType::Express => &["apiUrl", "groupId"],
        }
    }
}

impl fmt::Display for ApiCallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiCallType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rest" => Ok(ApiCallType::Rest),
            "graphql" => Ok(ApiCallType::Graphql),
            "gitbreaker" => Ok(ApiCallType::Gitbreaker),
            "express" => Ok(ApiCallType::Express),
            other => Err(ConfigurationError::UnknownCallType(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Missing required field '{field}' for apiCallType '{call_type}'")]
    MissingField {
        field: &'static str,
        call_type: ApiCallType,
    },

    #[error("Unknown apiCallType '{0}'")]
    UnknownCallType(String),

    #[error("apiUrl must start with http:// or https://, got '{0}'")]
    InvalidApiUrl(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Root configuration loaded from `rollup.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the tracking API (or of the proxy for `express`)
    pub api_url: Option<String>,
    pub access_token: Option<String>,
    pub group_id: Option<u64>,
    /// Full path of the group, used by GraphQL
    pub group_name: Option<String>,
    pub api_call_type: Option<ApiCallType>,
    /// Cache TTL in milliseconds (default: 3600000)
    pub refresh_interval: Option<u64>,
    /// GraphQL relay URL (default: http://localhost:3000/graphql-proxy)
    pub graphql_proxy_url: Option<String>,
    /// Bound on one ingestion in milliseconds (default: 300000)
    pub ingest_timeout: Option<u64>,
    /// Concurrent upstream requests (default: 10)
    pub max_concurrent: Option<usize>,
    /// Minimum spacing between request starts in milliseconds (default: 200)
    pub min_interval_ms: Option<u64>,
}

impl Config {
    /// Load a config file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigurationError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(config.with_env_overrides())
    }

    /// Load a config file if it exists, else start from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigurationError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default().with_env_overrides())
        }
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            if !token.is_empty() {
                self.access_token = Some(token);
            }
        }
        self
    }

    /// API base URL without a trailing slash
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or_default().trim_end_matches('/')
    }

    pub fn access_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or_default()
    }

    pub fn group_id(&self) -> u64 {
        self.group_id.unwrap_or_default()
    }

    pub fn group_name(&self) -> &str {
        self.group_name.as_deref().unwrap_or_default()
    }

    pub fn api_call_type(&self) -> ApiCallType {
        self.api_call_type.unwrap_or_default()
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TTL)
    }

    pub fn ingest_timeout(&self) -> Duration {
        self.ingest_timeout
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_INGEST_TIMEOUT)
    }

    pub fn graphql_proxy_url(&self) -> &str {
        self.graphql_proxy_url
            .as_deref()
            .unwrap_or(DEFAULT_GRAPHQL_PROXY_URL)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_MIN_INTERVAL)
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            ttl: self.refresh_interval(),
            ingest_timeout: self.ingest_timeout(),
        }
    }

    /// Check the fields the selected transport needs.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let call_type = self.api_call_type();
        for field in call_type.required_fields() {
            let present = match *field {
                "apiUrl" => !self.api_url().is_empty(),
                "accessToken" => !self.access_token().is_empty(),
                "groupId" => self.group_id.is_some(),
                "groupName" => !self.group_name().is_empty(),
                _ => true,
            };
            if !present {
                return Err(ConfigurationError::MissingField { field, call_type });
            }
        }
        let url = self.api_url();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigurationError::InvalidApiUrl(url.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn rest_config() -> Config {
        Config {
            api_url: Some("https://gitlab.example/".into()),
            access_token: Some("tok".into()),
            group_id: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn test_load_camel_case_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rollup.toml");
        fs::write(
            &path,
            r#"
apiUrl = "https://gitlab.example"
accessToken = "tok"
groupId = 42
groupName = "acme/platform"
apiCallType = "graphql"
refreshInterval = 60000
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.group_id(), 42);
        assert_eq!(config.api_call_type(), ApiCallType::Graphql);
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.graphql_proxy_url(), DEFAULT_GRAPHQL_PROXY_URL);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_call_type(), ApiCallType::Rest);
        assert_eq!(config.refresh_interval(), Duration::from_millis(3_600_000));
        assert_eq!(config.max_concurrent(), 10);
        assert_eq!(config.min_interval(), Duration::from_millis(200));
        assert_eq!(config.ingest_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_error_names_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rollup.toml");
        fs::write(&path, "groupId = \"not a number\"").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse { .. }));
        assert!(err.to_string().contains("rollup.toml"));
    }

    #[test]
    fn test_validate_rest() {
        assert!(rest_config().validate().is_ok());
        assert_eq!(rest_config().api_url(), "https://gitlab.example");

        let mut missing = rest_config();
        missing.access_token = None;
        assert!(matches!(
            missing.validate(),
            Err(ConfigurationError::MissingField { field: "accessToken", .. })
        ));
    }

    #[test]
    fn test_validate_per_call_type() {
        let mut graphql = rest_config();
        graphql.api_call_type = Some(ApiCallType::Graphql);
        assert!(matches!(
            graphql.validate(),
            Err(ConfigurationError::MissingField { field: "groupName", .. })
        ));

        let express = Config {
            api_url: Some("http://localhost:4000".into()),
            group_id: Some(3),
            api_call_type: Some(ApiCallType::Express),
            ..Default::default()
        };
        assert!(express.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = rest_config();
        config.api_url = Some("gitlab.example".into());
        assert!(matches!(config.validate(), Err(ConfigurationError::InvalidApiUrl(_))));
    }

    #[test]
    fn test_call_type_from_str() {
        assert_eq!("GraphQL".parse::<ApiCallType>().unwrap(), ApiCallType::Graphql);
        assert!("soap".parse::<ApiCallType>().is_err());
    }
}
