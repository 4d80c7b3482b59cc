//! Structured output for CLI commands.
//!
//! Every command can print either a human-readable rendering or a JSON
//! envelope (`success`, `data` or `error`, `metadata`) for scripting.

use chrono::Utc;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt::Display;
use std::io::{self, Write};

use crate::datasource::DatasourceError;
use crate::query::QueryResponse;

/// Version of the JSON output format
const OUTPUT_VERSION: &str = "0.1.0";

/// Controls output verbosity
pub struct OutputContext {
    quiet: bool,
    json: bool,
}

impl OutputContext {
    pub fn new(quiet: bool, json: bool) -> Self {
        Self { quiet, json }
    }

    /// Print essential output (always shown unless --json)
    pub fn print_data(&self, msg: impl Display) -> io::Result<()> {
        if !self.json {
            writeln_safe(&msg.to_string())
        } else {
            Ok(())
        }
    }

    /// Print informational message (suppressed by --quiet or --json)
    pub fn print_info(&self, msg: impl Display) -> io::Result<()> {
        if !self.quiet && !self.json {
            writeln_safe(&msg.to_string())
        } else {
            Ok(())
        }
    }

    pub fn print_json<T: Serialize>(&self, output: &JsonOutput<T>) -> io::Result<()> {
        let json = output.to_json_string().map_err(io::Error::other)?;
        writeln_safe(&json)
    }

    pub fn is_json(&self) -> bool {
        self.json
    }
}

/// Safe println that handles broken pipes gracefully
fn writeln_safe(msg: &str) -> io::Result<()> {
    match writeln!(io::stdout(), "{}", msg) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            // Piping into head and friends
            std::process::exit(0);
        }
        Err(e) => Err(e),
    }
}

/// Successful command output with metadata
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub metadata: Metadata,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn success(data: T, command: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            metadata: Metadata::new(command),
        }
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Failed command output with suggestions
#[derive(Debug, Serialize)]
pub struct JsonError {
    pub success: bool,
    pub error: ErrorDetail,
    pub metadata: Metadata,
}

impl JsonError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
                suggestions: Vec::new(),
            },
            metadata: Metadata::new(command),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.error.suggestions.push(suggestion.into());
        self
    }

    /// Map a datasource failure to its error code and hints.
    pub fn from_datasource(err: &DatasourceError, command: impl Into<String>) -> Self {
        let (code, hint) = match err {
            DatasourceError::Query(_) => (
                ErrorCode::INVALID_QUERY,
                "Supported aggregates: count, sum. Dates use YYYY-MM-DD.",
            ),
            DatasourceError::Transport(_) | DatasourceError::Cache(_) => (
                ErrorCode::UPSTREAM_ERROR,
                "Run 'rollup test-connection' to check connectivity",
            ),
        };
        Self::new(code, err.to_string(), command).with_suggestion(hint)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn exit_code(&self) -> ExitCode {
        ErrorCode::to_exit_code(&self.error.code)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Error code (e.g. "INVALID_QUERY")
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GenericError = 1,
    /// Bad arguments or an invalid query (2)
    InvalidArgument = 2,
    /// Missing or unreadable configuration (3)
    ConfigurationError = 3,
    /// The upstream API or the connection failed (10)
    ExternalError = 10,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Error codes used in JSON responses
pub struct ErrorCode;

impl ErrorCode {
    pub const INVALID_QUERY: &'static str = "INVALID_QUERY";
    pub const INVALID_ARGUMENT: &'static str = "INVALID_ARGUMENT";
    pub const CONFIGURATION_ERROR: &'static str = "CONFIGURATION_ERROR";
    pub const UPSTREAM_ERROR: &'static str = "UPSTREAM_ERROR";
    pub const CONNECTION_FAILED: &'static str = "CONNECTION_FAILED";

    pub fn to_exit_code(code: &str) -> ExitCode {
        match code {
            Self::INVALID_QUERY | Self::INVALID_ARGUMENT => ExitCode::InvalidArgument,
            Self::CONFIGURATION_ERROR => ExitCode::ConfigurationError,
            Self::UPSTREAM_ERROR | Self::CONNECTION_FAILED => ExitCode::ExternalError,
            _ => ExitCode::GenericError,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Metadata {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: chrono::DateTime<Utc>,
    pub version: String,
    pub command: String,
}

impl Metadata {
    fn new(command: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            version: OUTPUT_VERSION.to_string(),
            command: command.into(),
        }
    }
}

fn serialize_timestamp<S>(dt: &chrono::DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&dt.to_rfc3339())
}

/// Render a query response as a tab-separated table with a header line.
pub fn render_table(response: &QueryResponse) -> String {
    let mut out = response
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join("\t");

    for row in &response.rows {
        out.push('\n');
        let cells: Vec<String> = response
            .columns
            .iter()
            .map(|c| match row.get(&c.name) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        out.push_str(&cells.join("\t"));
    }
    out
}
