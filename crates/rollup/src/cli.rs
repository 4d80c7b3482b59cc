//! Command-line interface definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::RecordType;
use crate::query::{FieldFilter, QueryRequest};

/// Issue and epic rollups for a GitLab group
///
/// Ingests a group's issues and epics, normalizes their labels, rolls issues
/// up into epics and answers grouped queries over the result.
///
/// Exit Codes:
///   0  - Command succeeded
///   1  - Generic error occurred
///   2  - Invalid arguments or query
///   3  - Configuration error
///  10  - Upstream API or connection failed
#[derive(Parser)]
#[command(name = "rollup")]
#[command(about = "Issue and epic rollups for a GitLab group", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "rollup.toml")]
    pub config: PathBuf,

    /// Read issues and epics from a JSON dump instead of the API
    #[arg(long, global = true)]
    pub dump: Option<PathBuf>,

    /// Suppress non-essential output (for scripting)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check the configuration and reach the API
    TestConnection,

    /// Filter, group and aggregate issues or epics
    ///
    /// Examples:
    ///   rollup query --group-by created_month
    ///   rollup query --type epic --group-by epic_state --aggregate sum
    ///   rollup query --filter state=opened,closed --regex assignee='^J'
    Query(QueryArgs),

    /// List the distinct values of a field
    Values {
        /// Record type: issue or epic
        record_type: RecordType,

        /// Field name, e.g. workflow_state
        field: String,
    },

    /// Ingest from the configured API and write the raw dataset as JSON
    ///
    /// The output can be read back with --dump.
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
pub struct QueryArgs {
    /// Record type to query (issue or epic)
    #[arg(long = "type", default_value = "issue")]
    pub record_type: String,

    /// Inclusive lower bound on created_at (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub created_after: Option<String>,

    #[arg(long)]
    pub created_before: Option<String>,

    #[arg(long)]
    pub updated_after: Option<String>,

    #[arg(long)]
    pub updated_before: Option<String>,

    #[arg(long)]
    pub closed_after: Option<String>,

    #[arg(long)]
    pub closed_before: Option<String>,

    /// Equality filter FIELD=VALUE; VALUE may be a comma list or "null"
    #[arg(long = "filter", value_parser = parse_field_filter)]
    pub filters: Vec<FieldFilter>,

    /// Regex filter FIELD=PATTERN
    #[arg(long = "regex", value_parser = parse_field_filter)]
    pub regex_filters: Vec<FieldFilter>,

    /// Fields to group by (repeatable or comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub group_by: Vec<String>,

    /// Aggregate function: count or sum
    #[arg(long, default_value = "count")]
    pub aggregate: String,
}

impl QueryArgs {
    pub fn to_request(&self) -> QueryRequest {
        QueryRequest {
            type_filter: Some(self.record_type.clone()),
            created_after: self.created_after.clone(),
            created_before: self.created_before.clone(),
            updated_after: self.updated_after.clone(),
            updated_before: self.updated_before.clone(),
            closed_after: self.closed_after.clone(),
            closed_before: self.closed_before.clone(),
            filters: self.filters.clone(),
            regex_filters: self.regex_filters.clone(),
            group_by: self.group_by.clone(),
            aggregate_function: Some(self.aggregate.clone()),
        }
    }
}

/// Parse `FIELD=VALUE`; the value may itself contain `=`.
fn parse_field_filter(s: &str) -> Result<FieldFilter, String> {
    match s.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok(FieldFilter::new(field.trim(), value))
        }
        _ => Err(format!("Invalid filter '{}'. Expected FIELD=VALUE", s)),
    }
}
