//! Actionable error formatting for connection and configuration problems.
//!
//! An [`ActionableError`] carries the error message plus possible causes and
//! remediation steps, so a failed connection test tells the user what to fix.

use std::fmt;

use crate::config::{ConfigurationError, ACCESS_TOKEN_ENV};
use crate::transport::TransportError;

/// An error with diagnostic context and remediation steps.
///
/// # Example
///
/// ```
/// use rollup::errors::ActionableError;
///
/// let error = ActionableError::new("Group 42 not found")
///     .with_cause("The group ID may be incorrect")
///     .with_remedy("Check groupId in rollup.toml");
///
/// assert!(error.to_error_message().contains("To fix:"));
/// ```
#[derive(Debug, Clone)]
pub struct ActionableError {
    error: String,
    causes: Vec<String>,
    remediation: Vec<String>,
}

impl ActionableError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            causes: Vec::new(),
            remediation: Vec::new(),
        }
    }

    /// Add a possible cause (diagnostic hint).
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    /// Add a remediation step (actionable fix).
    pub fn with_remedy(mut self, remedy: impl Into<String>) -> Self {
        self.remediation.push(remedy.into());
        self
    }

    /// Convert to a formatted error message suitable for display.
    pub fn to_error_message(&self) -> String {
        let mut msg = format!("Error: {}\n", self.error);

        if !self.causes.is_empty() {
            msg.push_str("\nPossible causes:\n");
            for cause in &self.causes {
                msg.push_str(&format!("  • {}\n", cause));
            }
        }

        if !self.remediation.is_empty() {
            msg.push_str("\nTo fix:\n");
            for remedy in &self.remediation {
                msg.push_str(&format!("  • {}\n", remedy));
            }
        }

        msg
    }
}

impl fmt::Display for ActionableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_error_message())
    }
}

impl std::error::Error for ActionableError {}

/// Standard remediation for configuration errors.
pub fn configuration(err: &ConfigurationError) -> ActionableError {
    let base = ActionableError::new(err.to_string());
    match err {
        ConfigurationError::MissingField { field, call_type } => base
            .with_cause(format!(
                "apiCallType '{}' requires: {}",
                call_type,
                call_type.required_fields().join(", ")
            ))
            .with_remedy(format!("Set {} in rollup.toml", field))
            .with_remedy(if *field == "accessToken" {
                format!("Or export {}=<token>", ACCESS_TOKEN_ENV)
            } else {
                "Or pick an apiCallType that does not need it".to_string()
            }),
        ConfigurationError::UnknownCallType(_) => {
            base.with_remedy("Use one of: rest, graphql, gitbreaker, express")
        }
        ConfigurationError::InvalidApiUrl(_) => base
            .with_cause("apiUrl is missing its scheme")
            .with_remedy("Use a full URL such as https://gitlab.example.com"),
        ConfigurationError::Read { path, .. } => base
            .with_cause("The config file does not exist or is not readable")
            .with_remedy(format!("Create {} or pass --config <path>", path.display())),
        ConfigurationError::Parse { .. } => base
            .with_cause("The file is not valid TOML or a value has the wrong type")
            .with_remedy("Keys are camelCase: apiUrl, accessToken, groupId, groupName, apiCallType"),
    }
}

/// Standard remediation for connection failures.
pub fn connection(err: &TransportError) -> ActionableError {
    let base = ActionableError::new(format!("Connection test failed: {}", err));
    match err {
        TransportError::Status { status: 401, .. } | TransportError::Status { status: 403, .. } => base
            .with_cause("The access token is invalid, expired or lacks the read_api scope")
            .with_remedy("Create a new token with read_api scope and update accessToken"),
        TransportError::Status { status: 404, .. } => base
            .with_cause("The group does not exist or is not visible to this token")
            .with_remedy("Check groupId / groupName"),
        TransportError::Request { .. } => base
            .with_cause("The API host is unreachable")
            .with_remedy("Check apiUrl and network access")
            .with_remedy("For graphql, make sure the relay at graphqlProxyUrl is running"),
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiCallType;

    #[test]
    fn test_actionable_error_formatting() {
        let error = ActionableError::new("Test error")
            .with_cause("First cause")
            .with_remedy("First remedy");

        let msg = error.to_error_message();
        assert!(msg.contains("Error: Test error"));
        assert!(msg.contains("Possible causes:"));
        assert!(msg.contains("• First cause"));
        assert!(msg.contains("To fix:"));
        assert!(msg.contains("• First remedy"));
    }

    #[test]
    fn test_error_without_causes() {
        let msg = ActionableError::new("Simple error").to_error_message();
        assert!(!msg.contains("Possible causes:"));
        assert!(!msg.contains("To fix:"));
    }

    #[test]
    fn test_missing_token_suggests_env_var() {
        let err = ConfigurationError::MissingField {
            field: "accessToken",
            call_type: ApiCallType::Rest,
        };
        let msg = configuration(&err).to_error_message();
        assert!(msg.contains("apiUrl, accessToken, groupId"));
        assert!(msg.contains(ACCESS_TOKEN_ENV));
    }

    #[test]
    fn test_unauthorized_connection_hint() {
        let err = TransportError::Status {
            url: "https://gitlab.example/api/v4/groups/1".into(),
            status: 401,
        };
        let msg = connection(&err).to_error_message();
        assert!(msg.contains("HTTP 401"));
        assert!(msg.contains("read_api"));
    }
}
