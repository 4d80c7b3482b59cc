//! REST transport: per-project issue pages plus group epic pages.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Deserialize;
use tracing::info;

use super::{RawDataset, Transport, TransportError};
use crate::domain::{RawEpic, RawIssue};
use crate::fetcher::ApiClient;

const PER_PAGE: &str = "per_page=100";

#[derive(Debug, Deserialize)]
struct GroupResponse {
    name: Option<String>,
    full_path: Option<String>,
    #[serde(default)]
    projects: Vec<ProjectResponse>,
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    #[serde(rename = "_links")]
    links: Option<ProjectLinks>,
}

#[derive(Debug, Deserialize)]
struct ProjectLinks {
    issues: Option<String>,
}

/// Walks each project's issues link and the group's epics endpoint.
pub struct RestTransport {
    client: ApiClient,
    api_url: String,
    group_id: u64,
}

impl RestTransport {
    pub fn new(client: ApiClient, api_url: impl Into<String>, group_id: u64) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            group_id,
        }
    }

    fn group_url(&self) -> String {
        format!("{}/api/v4/groups/{}", self.api_url, self.group_id)
    }

    async fn group(&self) -> Result<GroupResponse, TransportError> {
        self.client.get_json(&self.group_url()).await
    }
}

#[async_trait]
impl Transport for RestTransport {
    fn kind(&self) -> &'static str {
        "rest"
    }

    async fn ingest(&self) -> Result<RawDataset, TransportError> {
        let group = self.group().await?;
        let issue_urls: Vec<String> = group
            .projects
            .iter()
            .filter_map(|p| p.links.as_ref().and_then(|l| l.issues.clone()))
            .map(|url| format!("{}?{}", url, PER_PAGE))
            .collect();
        info!("Fetching issues for {} projects", issue_urls.len());

        // Projects are walked concurrently; the shared limiter bounds the load.
        let per_project = try_join_all(
            issue_urls
                .iter()
                .map(|url| self.client.fetch_all_pages::<RawIssue>(url)),
        )
        .await?;
        let issues: Vec<RawIssue> = per_project.into_iter().flatten().collect();

        let epics_url = format!("{}/epics?{}", self.group_url(), PER_PAGE);
        let epics: Vec<RawEpic> = self.client.fetch_all_pages(&epics_url).await?;

        Ok(RawDataset { issues, epics })
    }

    async fn probe(&self) -> Result<String, TransportError> {
        let group = self.group().await?;
        let name = group
            .full_path
            .or(group.name)
            .unwrap_or_else(|| self.group_id.to_string());
        Ok(format!("Connected to group {}", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{Auth, RateLimiter};
    use axum::extract::{Path, Query};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn page(params: &HashMap<String, String>) -> u32 {
        params.get("page").and_then(|p| p.parse().ok()).unwrap_or(0)
    }

    async fn fake_gitlab() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let links_base = base.clone();

        let app = Router::new()
            .route(
                "/api/v4/groups/7",
                get(move || {
                    let base = links_base.clone();
                    async move {
                        Json(json!({
                            "name": "Platform",
                            "full_path": "acme/platform",
                            "projects": [
                                {"_links": {"issues": format!("{}/api/v4/projects/1/issues", base)}},
                                {"_links": {"issues": format!("{}/api/v4/projects/2/issues", base)}}
                            ]
                        }))
                    }
                }),
            )
            .route(
                "/api/v4/projects/:id/issues",
                get(
                    |Path(id): Path<u32>, Query(params): Query<HashMap<String, String>>| async move {
                        if params.get("per_page").map(String::as_str) != Some("100") || page(&params) != 1 {
                            return Json(json!([]));
                        }
                        Json(json!([{"iid": id * 10, "title": format!("issue of {}", id)}]))
                    },
                ),
            )
            .route(
                "/api/v4/groups/7/epics",
                get(|Query(params): Query<HashMap<String, String>>| async move {
                    match page(&params) {
                        1 => Json(json!([{"iid": 1, "title": "Auth"}])),
                        _ => Json(json!([])),
                    }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    fn transport(base: &str) -> RestTransport {
        let client = ApiClient::new(
            Auth::PrivateToken("t".into()),
            Arc::new(RateLimiter::new(10, Duration::ZERO)),
        )
        .unwrap();
        RestTransport::new(client, base, 7)
    }

    #[tokio::test]
    async fn test_rest_ingest_walks_projects_and_epics() {
        let base = fake_gitlab().await;
        let dataset = transport(&base).ingest().await.unwrap();

        let mut ids: Vec<_> = dataset.issues.iter().filter_map(|i| i.iid.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["10".to_string(), "20".to_string()]);
        assert_eq!(dataset.epics.len(), 1);
        assert_eq!(dataset.epics[0].title.as_deref(), Some("Auth"));
    }

    #[tokio::test]
    async fn test_rest_probe_names_group() {
        let base = fake_gitlab().await;
        let message = transport(&base).probe().await.unwrap();
        assert_eq!(message, "Connected to group acme/platform");
    }
}
