//! The datasource facade: configuration, transport and cache behind the
//! operations a dashboard calls.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{CacheError, DatasetCache};
use crate::config::{ApiCallType, Config};
use crate::domain::RecordType;
use crate::errors;
use crate::fetcher::{ApiClient, Auth, RateLimiter};
use crate::query::{CompiledQuery, QueryError, QueryRequest, QueryResponse};
use crate::snapshot::Snapshot;
use crate::transport::client::GitlabClient;
use crate::transport::{
    ClientLibraryTransport, GraphQlTransport, ProxyTransport, RestTransport, Transport,
    TransportError,
};

#[derive(Debug, Error)]
pub enum DatasourceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Success,
    Error,
}

/// Result of a connectivity probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: ConnectionState,
    pub message: String,
}

impl ConnectionStatus {
    fn success(message: impl Into<String>) -> Self {
        Self {
            status: ConnectionState::Success,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: ConnectionState::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ConnectionState::Success
    }
}

/// Build the transport selected by `apiCallType`.
///
/// Fields are not validated here; missing ones surface when the transport
/// talks to the API, and [`Datasource::test_connection`] reports them.
pub fn build_transport(config: &Config) -> Result<Arc<dyn Transport>, TransportError> {
    let limiter = Arc::new(RateLimiter::new(config.max_concurrent(), config.min_interval()));
    let token = config.access_token().to_string();
    let api_url = config.api_url().to_string();

    let transport: Arc<dyn Transport> = match config.api_call_type() {
        ApiCallType::Rest => Arc::new(RestTransport::new(
            ApiClient::new(Auth::PrivateToken(token), limiter)?,
            api_url,
            config.group_id(),
        )),
        ApiCallType::Graphql => Arc::new(GraphQlTransport::new(
            ApiClient::new(Auth::Bearer(token), limiter)?,
            config.graphql_proxy_url(),
            &api_url,
            config.group_name(),
        )),
        ApiCallType::Gitbreaker => Arc::new(ClientLibraryTransport::new(
            GitlabClient::new(ApiClient::new(Auth::PrivateToken(token), limiter)?, api_url),
            config.group_id(),
        )),
        ApiCallType::Express => Arc::new(ProxyTransport::new(
            ApiClient::new(Auth::None, limiter)?,
            api_url,
            config.group_id(),
        )),
    };
    Ok(transport)
}

/// Shared handle; clone freely.
#[derive(Clone)]
pub struct Datasource {
    config: Arc<Config>,
    cache: DatasetCache,
}

impl Datasource {
    /// A datasource over the configured live transport.
    pub fn new(config: Config) -> Result<Self, DatasourceError> {
        let transport = build_transport(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// A datasource over any transport (offline dumps, fakes).
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        let cache = DatasetCache::new(transport, config.cache_options());
        Self::with_cache(config, cache)
    }

    pub fn with_cache(config: Config, cache: DatasetCache) -> Self {
        Self {
            config: Arc::new(config),
            cache,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &DatasetCache {
        &self.cache
    }

    /// Current snapshot, falling back to the stale one when a refresh fails.
    ///
    /// Fails only when there has never been a successful refresh.
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>, DatasourceError> {
        match self.cache.fetch_data().await {
            Ok(snapshot) => Ok(snapshot),
            Err(CacheError {
                source,
                stale: Some(stale),
            }) => {
                warn!(
                    "Serving stale data from {} after failed refresh: {}",
                    stale.refreshed_at(),
                    source
                );
                Ok(stale)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Run a query against the cached dataset.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, DatasourceError> {
        let query = CompiledQuery::compile(request)?;
        let snapshot = self.snapshot().await?;
        let response = query.execute(snapshot.all_rows());
        info!(
            "Query grouped by {:?} returned {} rows",
            request.group_by,
            response.rows.len()
        );
        Ok(response)
    }

    /// Distinct values of one field, for filter pickers.
    pub async fn field_values(
        &self,
        record_type: RecordType,
        field: &str,
    ) -> Result<Vec<String>, DatasourceError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.field_values(record_type, field).to_vec())
    }

    /// Force a refresh now.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, DatasourceError> {
        Ok(self.cache.refresh().await?)
    }

    /// Validate the configuration, then probe the transport.
    pub async fn test_connection(&self) -> ConnectionStatus {
        let transport = self.cache.transport();
        if transport.kind() != "dump" {
            if let Err(err) = self.config.validate() {
                return ConnectionStatus::error(errors::configuration(&err).to_error_message());
            }
        }
        match transport.probe().await {
            Ok(message) => ConnectionStatus::success(message),
            Err(err) => ConnectionStatus::error(errors::connection(&err).to_error_message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawIssue;
    use crate::query::FieldFilter;
    use crate::transport::RawDataset;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyTransport {
        fail: AtomicBool,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        fn kind(&self) -> &'static str {
            "flaky"
        }

        async fn ingest(&self) -> Result<RawDataset, TransportError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::GraphQl("boom".into()));
            }
            Ok(RawDataset {
                issues: vec![
                    RawIssue {
                        iid: Some("1".into()),
                        state: Some("opened".into()),
                        labels: Some(vec!["Workflow::Doing".into()]),
                        ..Default::default()
                    },
                    RawIssue {
                        iid: Some("2".into()),
                        state: Some("closed".into()),
                        ..Default::default()
                    },
                ],
                epics: vec![],
            })
        }

        async fn probe(&self) -> Result<String, TransportError> {
            Ok("flaky is up".into())
        }
    }

    fn config() -> Config {
        Config {
            api_url: Some("https://gitlab.example".into()),
            access_token: Some("tok".into()),
            group_id: Some(1),
            ..Default::default()
        }
    }

    fn datasource(fail: bool) -> (Datasource, Arc<FlakyTransport>) {
        let transport = Arc::new(FlakyTransport {
            fail: AtomicBool::new(fail),
        });
        (Datasource::with_transport(config(), transport.clone()), transport)
    }

    fn by_state() -> QueryRequest {
        QueryRequest {
            group_by: vec!["state".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_query_groups_cached_rows() {
        let (ds, _) = datasource(false);
        let response = ds.query(&by_state()).await.unwrap();
        assert_eq!(response.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_cold_failure_is_explicit() {
        let (ds, _) = datasource(true);
        let err = ds.query(&by_state()).await.unwrap_err();
        assert!(matches!(err, DatasourceError::Cache(_)));
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale_rows() {
        let (ds, transport) = datasource(false);
        ds.query(&by_state()).await.unwrap();

        transport.fail.store(true, Ordering::SeqCst);
        assert!(ds.refresh().await.is_err());

        let mut request = by_state();
        request.filters = vec![FieldFilter::new("workflow_state", "Doing")];
        let response = ds.query(&request).await.unwrap();
        assert_eq!(response.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_query_fails_before_io() {
        let (ds, _) = datasource(true);
        let mut request = by_state();
        request.aggregate_function = Some("max".into());
        assert!(matches!(
            ds.query(&request).await,
            Err(DatasourceError::Query(QueryError::UnsupportedAggregate(_)))
        ));
    }

    #[tokio::test]
    async fn test_field_values() {
        let (ds, _) = datasource(false);
        let values = ds.field_values(RecordType::Issue, "state").await.unwrap();
        assert_eq!(values, vec!["opened".to_string(), "closed".to_string()]);
    }

    #[tokio::test]
    async fn test_connection_reports_configuration_error() {
        let transport = Arc::new(FlakyTransport {
            fail: AtomicBool::new(false),
        });
        let ds = Datasource::with_transport(Config::default(), transport);
        let status = ds.test_connection().await;
        assert_eq!(status.status, ConnectionState::Error);
        assert!(status.message.contains("apiUrl"));
    }

    #[tokio::test]
    async fn test_connection_success() {
        let (ds, _) = datasource(false);
        let status = ds.test_connection().await;
        assert!(status.is_success());
        assert_eq!(status.message, "flaky is up");
    }

    #[test]
    fn test_build_transport_per_call_type() {
        for (call_type, kind) in [
            (ApiCallType::Rest, "rest"),
            (ApiCallType::Graphql, "graphql"),
            (ApiCallType::Gitbreaker, "gitbreaker"),
            (ApiCallType::Express, "express"),
        ] {
            let mut config = config();
            config.api_call_type = Some(call_type);
            assert_eq!(build_transport(&config).unwrap().kind(), kind);
        }
    }
}
