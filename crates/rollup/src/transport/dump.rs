//! Offline transport reading a saved `{issues, epics}` JSON dump (REST shape).

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{RawDataset, Transport, TransportError};

pub struct DumpTransport {
    path: PathBuf,
}

impl DumpTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Transport for DumpTransport {
    fn kind(&self) -> &'static str {
        "dump"
    }

    async fn ingest(&self) -> Result<RawDataset, TransportError> {
        let content = tokio::fs::read(&self.path)
            .await
            .map_err(|source| TransportError::Io {
                path: self.path.clone(),
                source,
            })?;
        serde_json::from_slice(&content).map_err(|source| TransportError::Payload {
            what: "dump",
            source,
        })
    }

    async fn probe(&self) -> Result<String, TransportError> {
        let dataset = self.ingest().await?;
        Ok(format!(
            "Read {} issues and {} epics from {}",
            dataset.issues.len(),
            dataset.epics.len(),
            self.path.display()
        ))
    }
}
