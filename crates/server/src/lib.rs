//! Rollup HTTP API
//!
//! Serves grouped issue/epic queries, field values and connection checks to
//! dashboards over JSON.

pub mod routes;

pub use routes::create_routes;
