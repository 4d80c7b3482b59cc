//! Rate-limited HTTP access and page walking.
//!
//! All upstream requests of one datasource share a [`RateLimiter`]: at most
//! `max_concurrent` requests are in flight and request starts are spaced at
//! least `min_interval` apart. Callers beyond the cap wait for a slot.

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::transport::TransportError;

/// Default cap on concurrent upstream requests
pub const DEFAULT_MAX_CONCURRENT: usize = 10;
/// Default minimum spacing between request starts
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(200);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Bounded-concurrency, minimum-interval limiter.
#[derive(Debug)]
pub struct RateLimiter {
    permits: Semaphore,
    min_interval: Duration,
    next_start: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        Self {
            permits: Semaphore::new(max_concurrent.max(1)),
            min_interval,
            next_start: Mutex::new(None),
        }
    }

    /// Wait for a free slot and for this request's start time.
    ///
    /// The slot is held until the returned permit is dropped.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, TransportError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TransportError::LimiterClosed)?;

        let start = {
            let mut next = self.next_start.lock().await;
            let now = Instant::now();
            let start = match *next {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            *next = Some(start + self.min_interval);
            start
        };
        sleep_until(start).await;
        Ok(permit)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT, DEFAULT_MIN_INTERVAL)
    }
}

/// How requests authenticate against the tracking API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// `PRIVATE-TOKEN: <token>` header (REST)
    PrivateToken(String),
    /// `Authorization: Bearer <token>` header (GraphQL)
    Bearer(String),
    None,
}

impl Auth {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Auth::PrivateToken(token) => request.header("PRIVATE-TOKEN", token),
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::None => request,
        }
    }
}

/// Append `page=N` to a URL, respecting an existing query string.
pub fn append_page(url: &str, page: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}page={}", url, separator, page)
}

/// HTTP client bound to one rate limiter and one credential.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    limiter: Arc<RateLimiter>,
    auth: Auth,
}

impl ApiClient {
    pub fn new(auth: Auth, limiter: Arc<RateLimiter>) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { http, limiter, auth })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// GET a URL and decode its JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, TransportError> {
        let request = self.auth.apply(self.http.get(url));
        self.execute(url, request).await
    }

    /// POST a JSON body with extra headers and decode the JSON response.
    pub async fn post_json<B, T>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &B,
    ) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.auth.apply(self.http.post(url)).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        self.execute(url, request).await
    }

    /// Walk `base_url` page by page until a page comes back empty.
    pub async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        base_url: &str,
    ) -> Result<Vec<T>, TransportError> {
        self.fetch_all_pages_with(base_url, append_page).await
    }

    /// Walk a paginated endpoint with a custom page parameter appender.
    ///
    /// Any failing page fails the whole walk; nothing fetched so far is kept.
    pub async fn fetch_all_pages_with<T, F>(
        &self,
        base_url: &str,
        page_url: F,
    ) -> Result<Vec<T>, TransportError>
    where
        T: DeserializeOwned,
        F: Fn(&str, u32) -> String,
    {
        let mut records = Vec::new();
        let mut page = 1;
        loop {
            let url = page_url(base_url, page);
            let batch: Vec<T> = self.get_json(&url).await?;
            if batch.is_empty() {
                break;
            }
            debug!("Fetched {} records from page {} of {}", batch.len(), page, base_url);
            records.extend(batch);
            page += 1;
        }
        info!("Fetched {} records in {} pages from {}", records.len(), page - 1, base_url);
        Ok(records)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        url: &str,
        request: RequestBuilder,
    ) -> Result<T, TransportError> {
        let _permit = self.limiter.acquire().await?;
        debug!("Requesting {}", url);

        let response = request.send().await.map_err(|source| TransportError::Request {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(|source| TransportError::Request {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| TransportError::Decode {
            url: url.to_string(),
            source,
        })
    }
}
