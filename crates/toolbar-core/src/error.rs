//! Error types
//!
//! Transport failures are classified so the engine can tell "cannot reach
//! the dev server" apart from "the dev server answered with an error".
//! Write failures wrap the transport error with the flag they concerned.

use std::fmt;

use thiserror::Error;

/// Errors produced by the dev-server transport
#[derive(Error, Debug)]
pub enum ClientError {
    /// Host unreachable, DNS failure, refused connection or timeout
    #[error("Cannot reach dev server at {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-2xx status
    #[error("Dev server returned HTTP {status} for {url}{}", detail_suffix(.body))]
    Request {
        status: u16,
        url: String,
        body: String,
    },

    /// No project key configured yet
    #[error("No dev server project selected")]
    NoProjectSelected,

    /// Response body did not match the expected shape
    #[error("Dev server sent an unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// Base URL cannot be used to build request URLs
    #[error("Invalid dev server URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// HTTP client could not be constructed
    #[error("Failed to initialize HTTP client: {0}")]
    Setup(#[source] reqwest::Error),
}

impl ClientError {
    /// Create a request error from a status and response body
    pub fn request(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Request {
            status,
            url: url.into(),
            body: body.into(),
        }
    }

    /// HTTP status if the server answered with an error
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this is a transport-level failure (server never answered)
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Whether the server reported the resource as missing
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

const MAX_DETAIL_CHARS: usize = 200;

fn detail_suffix(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return String::new();
    }
    let mut detail: String = body.chars().take(MAX_DETAIL_CHARS).collect();
    if body.chars().count() > MAX_DETAIL_CHARS {
        detail.push_str("...");
    }
    format!(": {}", detail)
}

/// Which override mutation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Set,
    Clear,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOp::Set => write!(f, "set"),
            WriteOp::Clear => write!(f, "clear"),
        }
    }
}

/// Failure of a single override write
///
/// Returned to the caller only. Never stored in the shared connection state.
#[derive(Error, Debug)]
#[error("Failed to {op} override for '{flag_key}': {source}")]
pub struct WriteError {
    pub flag_key: String,
    pub op: WriteOp,
    #[source]
    pub source: ClientError,
}

impl WriteError {
    pub fn new(flag_key: impl Into<String>, op: WriteOp, source: ClientError) -> Self {
        Self {
            flag_key: flag_key.into(),
            op,
            source,
        }
    }
}

/// Aggregate failure of `clear_all_overrides`
///
/// Keys in `cleared` were reverted successfully; `failures` holds one
/// error per key that could not be cleared.
#[derive(Error, Debug)]
#[error("{}", clear_all_summary(.cleared, .failures))]
pub struct ClearAllError {
    pub cleared: Vec<String>,
    pub failures: Vec<WriteError>,
}

impl ClearAllError {
    /// Keys whose override is still active on the server
    pub fn failed_keys(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.flag_key.as_str()).collect()
    }
}

fn clear_all_summary(cleared: &[String], failures: &[WriteError]) -> String {
    let keys = failures
        .iter()
        .map(|f| f.flag_key.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Failed to clear {} of {} overrides: {}",
        failures.len(),
        failures.len() + cleared.len(),
        keys
    )
}

/// Errors from engine lifecycle operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Auto-detection found no projects on the dev server
    #[error("No projects found on the dev server. Add a project to the dev server or configure a project key.")]
    NoProjectsAvailable,

    /// Auto-detection could not list projects
    #[error("Could not detect a dev server project: {0}")]
    ProjectDetection(#[source] ClientError),

    /// Operation requires a started engine
    #[error("Sync engine has not been started")]
    NotStarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_display() {
        let err = ClientError::request(500, "http://localhost:8765/dev/projects/p", "boom");
        let msg = err.to_string();
        assert!(msg.contains("HTTP 500"));
        assert!(msg.contains("boom"));
        assert_eq!(err.status(), Some(500));
        assert!(!err.is_connection());
    }

    #[test]
    fn test_request_error_empty_body() {
        let err = ClientError::request(503, "http://x/dev/projects", "  ");
        assert_eq!(
            err.to_string(),
            "Dev server returned HTTP 503 for http://x/dev/projects"
        );
    }

    #[test]
    fn test_request_error_truncates_body() {
        let body = "x".repeat(500);
        let err = ClientError::request(400, "http://x", body);
        let msg = err.to_string();
        assert!(msg.ends_with("..."));
        assert!(msg.len() < 300);
    }

    #[test]
    fn test_not_found() {
        assert!(ClientError::request(404, "u", "").is_not_found());
        assert!(!ClientError::NoProjectSelected.is_not_found());
    }

    #[test]
    fn test_write_error_display() {
        let err = WriteError::new("my-flag", WriteOp::Clear, ClientError::request(500, "u", ""));
        let msg = err.to_string();
        assert!(msg.contains("clear override"));
        assert!(msg.contains("my-flag"));
    }

    #[test]
    fn test_clear_all_error_lists_keys() {
        let err = ClearAllError {
            cleared: vec!["a".to_string(), "c".to_string()],
            failures: vec![WriteError::new(
                "b",
                WriteOp::Clear,
                ClientError::request(500, "u", ""),
            )],
        };
        assert_eq!(err.failed_keys(), vec!["b"]);
        assert_eq!(err.to_string(), "Failed to clear 1 of 3 overrides: b");
    }
}
