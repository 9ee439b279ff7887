//! Unified error handling for ttbot.
//!
//! Errors are split by layer: connection establishment, command execution
//! against a live session, and configuration loading. The dispatcher never
//! returns errors upward; it either mutates state or tears the session down
//! and lets the lifecycle loop decide what happens next.

use thiserror::Error;

/// Errors raised while establishing a connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no address records for {0}")]
    NoAddress(String),

    #[error("connect timed out after {0} seconds")]
    Timeout(u64),

    #[error("connect failed: {0}")]
    Dial(#[from] std::io::Error),
}

/// Errors surfaced to callers of the command API.
///
/// `Server` wraps a recognized `error message=…` frame inside a command
/// bracket and is never retried. The remaining variants are caller
/// invariant violations or connectivity failures.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Server(String),

    #[error("not connected to server")]
    NotConnected,

    #[error("not logged in to server")]
    NotLoggedIn,

    #[error("unable to find current user")]
    OwnUserMissing,

    #[error("{0}")]
    Rejected(String),

    #[error("disconnected while waiting for reply")]
    Disconnected,

    #[error("timed out waiting for reply")]
    Timeout,

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl CommandError {
    /// True when the failure came from the remote rather than this client.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Server(_))
    }
}

/// Fatal configuration problems. The process refuses to start on any of
/// these; there is no interactive repair in the core.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: quick_xml::DeError,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize failed: {0}")]
    Serialize(#[from] quick_xml::SeError),

    #[error("duplicate server name: {0}")]
    DuplicateName(String),

    #[error("duplicate server address: {0}")]
    DuplicateAddress(String),

    #[error("server {server}: invalid port {port}")]
    InvalidPort { server: String, port: String },

    #[error("server {server}: missing required field {field}")]
    MissingField {
        server: String,
        field: &'static str,
    },

    #[error("no servers configured")]
    NoServers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_is_flagged() {
        assert!(CommandError::Server("denied".into()).is_server_error());
        assert!(!CommandError::Timeout.is_server_error());
        assert!(!CommandError::NotConnected.is_server_error());
    }

    #[test]
    fn command_error_display_is_verbatim_for_server_errors() {
        let err = CommandError::Server("Invalid channel".into());
        assert_eq!(err.to_string(), "Invalid channel");
    }
}
