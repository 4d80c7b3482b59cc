//! API route definitions

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rollup::datasource::{ConnectionStatus, Datasource, DatasourceError};
use rollup::domain::RecordType;
use rollup::query::{QueryRequest, QueryResponse};

/// Shared application state
pub type AppState = Datasource;

type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// Query errors are the caller's fault; everything else is upstream.
fn datasource_error(context: &str, err: DatasourceError) -> ApiError {
    let status = match &err {
        DatasourceError::Query(_) => StatusCode::BAD_REQUEST,
        DatasourceError::Transport(_) | DatasourceError::Cache(_) => StatusCode::BAD_GATEWAY,
    };
    if status != StatusCode::BAD_REQUEST {
        tracing::error!("{}: {}", context, err);
    }
    api_error(status, err.to_string())
}

/// Create API routes
pub fn create_routes(datasource: Datasource) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/query", post(run_query))
        .route("/test-connection", get(test_connection))
        .route("/fields/:record_type/:field/values", get(field_values))
        .route("/refresh", post(refresh))
        .route("/status", get(cache_status))
        .with_state(datasource)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "rollup-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Run a grouped query against the cached dataset
async fn run_query(
    State(datasource): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    datasource
        .query(&request)
        .await
        .map(Json)
        .map_err(|e| datasource_error("Query failed", e))
}

async fn test_connection(State(datasource): State<AppState>) -> Json<ConnectionStatus> {
    Json(datasource.test_connection().await)
}

/// Distinct values of a field, for filter pickers
async fn field_values(
    Path((record_type, field)): Path<(String, String)>,
    State(datasource): State<AppState>,
) -> Result<Json<Vec<String>>, ApiError> {
    let record_type: RecordType = record_type
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;
    datasource
        .field_values(record_type, &field)
        .await
        .map(Json)
        .map_err(|e| datasource_error("Field values failed", e))
}

/// Cache state summary
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub last_refreshed: Option<DateTime<Utc>>,
    pub ttl_ms: u64,
    pub issues: usize,
    pub epics: usize,
}

fn cache_summary(datasource: &Datasource) -> CacheStatus {
    let cache = datasource.cache();
    let snapshot = cache.snapshot();
    CacheStatus {
        last_refreshed: cache.last_refreshed(),
        ttl_ms: cache.ttl().as_millis() as u64,
        issues: snapshot.as_ref().map_or(0, |s| s.issues().len()),
        epics: snapshot.as_ref().map_or(0, |s| s.epics().len()),
    }
}

async fn cache_status(State(datasource): State<AppState>) -> Json<CacheStatus> {
    Json(cache_summary(&datasource))
}

/// Force a refresh, joining one already in flight
async fn refresh(State(datasource): State<AppState>) -> Result<Json<CacheStatus>, ApiError> {
    datasource
        .refresh()
        .await
        .map_err(|e| datasource_error("Refresh failed", e))?;
    Ok(Json(cache_summary(&datasource)))
}
