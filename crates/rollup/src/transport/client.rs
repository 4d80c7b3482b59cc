//! Client-library transport.
//!
//! A small typed GitLab client with resource handles in the style of common
//! API client libraries (`client.epics().all(group)`). Pagination is internal
//! to the resource calls.

use async_trait::async_trait;
use serde::Deserialize;

use super::{RawDataset, Transport, TransportError};
use crate::domain::{RawEpic, RawIssue};
use crate::fetcher::ApiClient;

/// Typed GitLab REST client
#[derive(Debug, Clone)]
pub struct GitlabClient {
    api: ApiClient,
    host: String,
}

impl GitlabClient {
    pub fn new(api: ApiClient, host: impl Into<String>) -> Self {
        Self {
            api,
            host: host.into(),
        }
    }

    pub fn epics(&self) -> Epics<'_> {
        Epics { client: self }
    }

    pub fn issues(&self) -> Issues<'_> {
        Issues { client: self }
    }

    pub fn groups(&self) -> Groups<'_> {
        Groups { client: self }
    }

    fn group_url(&self, group_id: u64) -> String {
        format!("{}/api/v4/groups/{}", self.host, group_id)
    }
}

/// `/groups/:id/epics`
pub struct Epics<'a> {
    client: &'a GitlabClient,
}

impl Epics<'_> {
    pub async fn all(&self, group_id: u64) -> Result<Vec<RawEpic>, TransportError> {
        let url = format!("{}/epics?per_page=100", self.client.group_url(group_id));
        self.client.api.fetch_all_pages(&url).await
    }
}

/// `/groups/:id/issues`
pub struct Issues<'a> {
    client: &'a GitlabClient,
}

impl Issues<'_> {
    pub async fn all(&self, group_id: u64) -> Result<Vec<RawIssue>, TransportError> {
        let url = format!("{}/issues?per_page=100", self.client.group_url(group_id));
        self.client.api.fetch_all_pages(&url).await
    }
}

/// Group summary returned by `/groups/:id`
#[derive(Debug, Clone, Deserialize)]
pub struct GroupSummary {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub full_path: Option<String>,
}

/// `/groups/:id`
pub struct Groups<'a> {
    client: &'a GitlabClient,
}

impl Groups<'_> {
    pub async fn show(&self, group_id: u64) -> Result<GroupSummary, TransportError> {
        self.client.api.get_json(&self.client.group_url(group_id)).await
    }
}

/// Ingests through [`GitlabClient`], one collection call each for epics and issues.
pub struct ClientLibraryTransport {
    client: GitlabClient,
    group_id: u64,
}

impl ClientLibraryTransport {
    pub fn new(client: GitlabClient, group_id: u64) -> Self {
        Self { client, group_id }
    }
}

#[async_trait]
impl Transport for ClientLibraryTransport {
    fn kind(&self) -> &'static str {
        "gitbreaker"
    }

    async fn ingest(&self) -> Result<RawDataset, TransportError> {
        let epics = self.client.epics().all(self.group_id).await?;
        let issues = self.client.issues().all(self.group_id).await?;
        Ok(RawDataset { issues, epics })
    }

    async fn probe(&self) -> Result<String, TransportError> {
        let group = self.client.groups().show(self.group_id).await?;
        let name = group
            .full_path
            .or(group.name)
            .unwrap_or_else(|| self.group_id.to_string());
        Ok(format!("Connected to group {}", name))
    }
}
