//! Issue/Epic Rollup Library
//!
//! Ingests issues and epics from a GitLab group over one of several
//! transports, normalizes their label taxonomy into canonical records, links
//! issues to their epics to compute rollups, caches the result behind a TTL,
//! and answers grouped analytical queries over the cached snapshot.
//!
//! The pipeline, leaves first:
//!
//! 1. [`fetcher`]: rate-limited page walking over HTTP
//! 2. [`transport`]: REST, GraphQL, client-library and proxy adapters
//! 3. [`normalize`]: label taxonomy and temporal derivations
//! 4. [`crossref`]: issue/epic linkage and epic rollups
//! 5. [`cache`]: single-flight TTL cache over [`snapshot::Snapshot`]
//! 6. [`query`]: filter, group-by and aggregate engine
//!
//! [`datasource::Datasource`] ties them together behind the operations a
//! dashboard needs.

pub mod cache;
pub mod cli;
pub mod config;
pub mod crossref;
pub mod dates;
pub mod datasource;
pub mod domain;
pub mod errors;
pub mod fetcher;
pub mod labels;
pub mod normalize;
pub mod output;
pub mod query;
pub mod snapshot;
pub mod transport;

// Re-export commonly used types
pub use cache::{Clock, DatasetCache, SystemClock};
pub use config::{ApiCallType, Config};
pub use datasource::{ConnectionStatus, Datasource, DatasourceError};
pub use domain::{Epic, Issue, RawEpic, RawIssue, RecordType, Row};
pub use query::{QueryRequest, QueryResponse};
pub use snapshot::Snapshot;
pub use transport::{RawDataset, Transport, TransportError};
