//! GraphQL transport: one cursor-paginated query per page, relayed through a
//! CORS-relaxing proxy that forwards to the URL in `x-api-url`.
//!
//! Issues and epics keep independent cursors. A side whose last page has been
//! read is excluded from later queries with `@include`, so its final page is
//! never appended twice.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{RawDataset, Transport, TransportError};
use crate::domain::{
    RawEpic, RawEpicRef, RawIssue, RawIteration, RawMilestone, RawPerson, RawTimeStats,
};
use crate::fetcher::ApiClient;

const GROUP_QUERY: &str = r#"
query($fullPath: ID!, $issuesCursor: String, $epicsCursor: String, $withIssues: Boolean!, $withEpics: Boolean!) {
  group(fullPath: $fullPath) {
    issues(after: $issuesCursor, first: 100, includeSubgroups: true) @include(if: $withIssues) {
      pageInfo { endCursor hasNextPage }
      nodes {
        iid title state description webUrl
        createdAt updatedAt closedAt dueDate
        timeEstimate totalTimeSpent
        author { username name }
        assignees { nodes { username name } }
        labels { nodes { title } }
        milestone { title startDate dueDate }
        iteration { title startDate dueDate }
        epic { iid title webUrl dueDate }
      }
    }
    epics(after: $epicsCursor, first: 100) @include(if: $withEpics) {
      pageInfo { endCursor hasNextPage }
      nodes {
        iid title state description webUrl
        createdAt updatedAt closedAt startDate dueDate
        author { username name }
        labels { nodes { title } }
      }
    }
  }
}
"#;

const CURRENT_USER_QUERY: &str = "query { currentUser { username } }";

#[derive(Debug, Deserialize)]
struct GqlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GqlError>>,
}

impl<T> GqlResponse<T> {
    fn into_data(self) -> Result<T, TransportError> {
        if let Some(errors) = self.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            return Err(TransportError::GraphQl(messages.join("; ")));
        }
        self.data.ok_or(TransportError::MissingField("data"))
    }
}

#[derive(Debug, Deserialize)]
struct GqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GroupData {
    group: Option<GqlGroup>,
}

#[derive(Debug, Deserialize)]
struct GqlGroup {
    issues: Option<Connection<GqlIssue>>,
    epics: Option<Connection<GqlEpic>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<T> {
    page_info: PageInfo,
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    end_cursor: Option<String>,
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct GqlLabel {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlDates {
    title: Option<String>,
    start_date: Option<String>,
    due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlEpicRef {
    iid: Option<String>,
    title: Option<String>,
    web_url: Option<String>,
    due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlIssue {
    iid: Option<String>,
    title: Option<String>,
    state: Option<String>,
    description: Option<String>,
    web_url: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    closed_at: Option<String>,
    due_date: Option<String>,
    time_estimate: Option<i64>,
    total_time_spent: Option<i64>,
    author: Option<RawPerson>,
    assignees: Option<Nodes<RawPerson>>,
    labels: Option<Nodes<GqlLabel>>,
    milestone: Option<GqlDates>,
    iteration: Option<GqlDates>,
    epic: Option<GqlEpicRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlEpic {
    iid: Option<String>,
    title: Option<String>,
    state: Option<String>,
    description: Option<String>,
    web_url: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    closed_at: Option<String>,
    start_date: Option<String>,
    due_date: Option<String>,
    author: Option<RawPerson>,
    labels: Option<Nodes<GqlLabel>>,
}

fn label_titles(labels: Option<Nodes<GqlLabel>>) -> Option<Vec<String>> {
    labels.map(|l| l.nodes.into_iter().map(|label| label.title).collect())
}

impl From<GqlIssue> for RawIssue {
    fn from(node: GqlIssue) -> Self {
        let assignees = node.assignees.map(|a| a.nodes);
        RawIssue {
            iid: node.iid,
            title: node.title,
            state: node.state,
            description: node.description,
            project_id: None,
            web_url: node.web_url,
            labels: label_titles(node.labels),
            author: node.author,
            assignee: assignees.as_ref().and_then(|a| a.first().cloned()),
            assignees,
            closed_by: None,
            milestone: node.milestone.map(|m| RawMilestone {
                title: m.title,
                start_date: m.start_date,
                due_date: m.due_date,
            }),
            iteration: node.iteration.map(|i| RawIteration {
                title: i.title,
                start_date: i.start_date,
                due_date: i.due_date,
            }),
            epic: node.epic.map(|e| RawEpicRef {
                iid: e.iid,
                title: e.title,
                url: e.web_url.clone(),
                web_url: e.web_url,
                human_readable_end_date: None,
                due_date: e.due_date,
            }),
            time_stats: Some(RawTimeStats {
                time_estimate: node.time_estimate,
                total_time_spent: node.total_time_spent,
            }),
            created_at: node.created_at,
            updated_at: node.updated_at,
            closed_at: node.closed_at,
            due_date: node.due_date,
        }
    }
}

impl From<GqlEpic> for RawEpic {
    fn from(node: GqlEpic) -> Self {
        RawEpic {
            iid: node.iid,
            title: node.title,
            state: node.state,
            description: node.description,
            group_id: None,
            web_url: node.web_url,
            labels: label_titles(node.labels),
            author: node.author,
            closed_by: None,
            created_at: node.created_at,
            updated_at: node.updated_at,
            closed_at: node.closed_at,
            start_date: node.start_date,
            end_date: None,
            due_date: node.due_date,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentUserData {
    current_user: Option<RawPerson>,
}

/// Cursor-paginated GraphQL ingestion through a relay proxy.
pub struct GraphQlTransport {
    client: ApiClient,
    proxy_url: String,
    graphql_url: String,
    group_path: String,
}

impl GraphQlTransport {
    /// `client` should authenticate with [`crate::fetcher::Auth::Bearer`].
    pub fn new(
        client: ApiClient,
        proxy_url: impl Into<String>,
        api_url: &str,
        group_path: impl Into<String>,
    ) -> Self {
        Self {
            client,
            proxy_url: proxy_url.into(),
            graphql_url: format!("{}/api/graphql", api_url),
            group_path: group_path.into(),
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        body: &serde_json::Value,
    ) -> Result<T, TransportError> {
        let response: GqlResponse<T> = self
            .client
            .post_json(
                &self.proxy_url,
                &[("x-api-url", self.graphql_url.as_str())],
                body,
            )
            .await?;
        response.into_data()
    }
}

#[async_trait]
impl Transport for GraphQlTransport {
    fn kind(&self) -> &'static str {
        "graphql"
    }

    async fn ingest(&self) -> Result<RawDataset, TransportError> {
        let mut dataset = RawDataset::default();
        let mut issues_cursor: Option<String> = None;
        let mut epics_cursor: Option<String> = None;
        let (mut with_issues, mut with_epics) = (true, true);
        let mut pages = 0;

        while with_issues || with_epics {
            let body = json!({
                "query": GROUP_QUERY,
                "variables": {
                    "fullPath": self.group_path,
                    "issuesCursor": issues_cursor,
                    "epicsCursor": epics_cursor,
                    "withIssues": with_issues,
                    "withEpics": with_epics,
                }
            });
            let group = self
                .post::<GroupData>(&body)
                .await?
                .group
                .ok_or(TransportError::MissingField("group"))?;
            pages += 1;

            if with_issues {
                let page = group.issues.ok_or(TransportError::MissingField("group.issues"))?;
                dataset.issues.extend(page.nodes.into_iter().map(RawIssue::from));
                with_issues = page.page_info.has_next_page && page.page_info.end_cursor.is_some();
                issues_cursor = page.page_info.end_cursor;
            }
            if with_epics {
                let page = group.epics.ok_or(TransportError::MissingField("group.epics"))?;
                dataset.epics.extend(page.nodes.into_iter().map(RawEpic::from));
                with_epics = page.page_info.has_next_page && page.page_info.end_cursor.is_some();
                epics_cursor = page.page_info.end_cursor;
            }
            debug!(
                "GraphQL page {}: {} issues, {} epics so far",
                pages,
                dataset.issues.len(),
                dataset.epics.len()
            );
        }
        Ok(dataset)
    }

    async fn probe(&self) -> Result<String, TransportError> {
        let data: CurrentUserData = self.post(&json!({ "query": CURRENT_USER_QUERY })).await?;
        let user = data
            .current_user
            .and_then(|u| u.handle().map(str::to_string))
            .ok_or(TransportError::MissingField("currentUser"))?;
        Ok(format!("Authenticated as {}", user))
    }
}
