//! Proxy transport: a caching collaborator serves a previously fetched
//! dataset as base64-encoded JSON.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;

use super::{RawDataset, Transport, TransportError};
use crate::fetcher::ApiClient;

#[derive(Debug, Deserialize)]
struct ProxyEnvelope {
    data: Option<String>,
}

/// Decode a proxy payload (base64 of `{issues, epics}` JSON).
pub fn decode_payload(encoded: &str) -> Result<RawDataset, TransportError> {
    let bytes = general_purpose::STANDARD.decode(encoded.trim())?;
    serde_json::from_slice(&bytes).map_err(|source| TransportError::Payload {
        what: "proxy",
        source,
    })
}

pub struct ProxyTransport {
    client: ApiClient,
    api_url: String,
    group_id: u64,
}

impl ProxyTransport {
    pub fn new(client: ApiClient, api_url: impl Into<String>, group_id: u64) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            group_id,
        }
    }
}

#[async_trait]
impl Transport for ProxyTransport {
    fn kind(&self) -> &'static str {
        "express"
    }

    async fn ingest(&self) -> Result<RawDataset, TransportError> {
        let url = format!("{}/gitlab?group={}", self.api_url, self.group_id);
        let envelope: ProxyEnvelope = self.client.get_json(&url).await?;
        let encoded = envelope.data.ok_or(TransportError::MissingField("data"))?;
        decode_payload(&encoded)
    }

    async fn probe(&self) -> Result<String, TransportError> {
        let url = format!("{}/health", self.api_url);
        let _: serde_json::Value = self.client.get_json(&url).await?;
        Ok(format!("Proxy at {} is reachable", self.api_url))
    }
}
