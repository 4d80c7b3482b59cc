//! Transport adapters.
//!
//! Every adapter produces the same [`RawDataset`] (raw issues plus raw epics in
//! the REST shape), whatever its wire format. Adapters are interchangeable
//! behind the [`Transport`] trait and selected by `apiCallType`.

pub mod client;
pub mod dump;
pub mod graphql;
pub mod proxy;
pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::{RawEpic, RawIssue};

pub use client::ClientLibraryTransport;
pub use dump::DumpTransport;
pub use graphql::GraphQlTransport;
pub use proxy::ProxyTransport;
pub use rest::RestTransport;

/// Raw output of one ingestion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDataset {
    #[serde(default)]
    pub issues: Vec<RawIssue>,
    #[serde(default)]
    pub epics: Vec<RawEpic>,
}

/// Failures talking to the tracking API or decoding what it returned.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Malformed JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Malformed {what} payload: {source}")]
    Payload {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("GraphQL errors: {0}")]
    GraphQl(String),

    #[error("Response is missing '{0}'")]
    MissingField(&'static str),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Rate limiter is closed")]
    LimiterClosed,
}

/// A source of raw issues and epics.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs and connection messages
    fn kind(&self) -> &'static str;

    /// Fetch every issue and epic of the configured group.
    async fn ingest(&self) -> Result<RawDataset, TransportError>;

    /// Lightweight connectivity check; returns a human-readable description of
    /// what answered.
    async fn probe(&self) -> Result<String, TransportError>;
}
