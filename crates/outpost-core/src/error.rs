//! Error types for the Outpost engine

use thiserror::Error;

/// Result type alias using the Outpost error
pub type Result<T> = std::result::Result<T, Error>;

/// Outpost error types
#[derive(Error, Debug)]
pub enum Error {
    // === Dispatch Errors ===
    #[error("Unknown capability: {name}")]
    UnknownCapability { name: String },

    #[error("Stream closed")]
    StreamClosed,

    #[error("Capability {capability} exceeded its {seconds}s budget")]
    Timeout { capability: String, seconds: u64 },

    #[error("Capability panicked: {0}")]
    Panicked(String),

    // === Entity Errors ===
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    // === Process Errors ===
    #[error("Failed to start {command}: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    // === Upstream Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing required configuration: {key}")]
    MissingConfig { key: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // === Generic ===
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error came from something outside the process (tool, API, network)
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::CommandSpawn { .. }
                | Error::CommandFailed { .. }
                | Error::Http(_)
                | Error::Upstream(_)
                | Error::Authentication(_)
        )
    }

    /// Get an error code for logging
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnknownCapability { .. } => "UNKNOWN_CAPABILITY",
            Error::StreamClosed => "STREAM_CLOSED",
            Error::Timeout { .. } => "TIMEOUT",
            Error::Panicked(_) => "PANICKED",
            Error::InvalidKey(_) => "INVALID_KEY",
            Error::InvalidTarget(_) => "INVALID_TARGET",
            Error::CommandSpawn { .. } => "COMMAND_SPAWN",
            Error::CommandFailed { .. } => "COMMAND_FAILED",
            Error::Http(_) => "HTTP_ERROR",
            Error::Upstream(_) => "UPSTREAM_ERROR",
            Error::Authentication(_) => "AUTH_FAILED",
            Error::Configuration(_) => "CONFIG_ERROR",
            Error::MissingConfig { .. } => "MISSING_CONFIG",
            Error::Json(_) => "JSON_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Other(_) => "OTHER",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = Error::UnknownCapability {
            name: "nope".into(),
        };
        assert_eq!(err.code(), "UNKNOWN_CAPABILITY");
        assert_eq!(err.to_string(), "Unknown capability: nope");
        assert!(!err.is_upstream());
    }

    #[test]
    fn test_command_failure_is_upstream() {
        let err = Error::CommandFailed {
            command: "masscan".into(),
            status: "exit status: 1".into(),
            stderr: String::new(),
        };
        assert!(err.is_upstream());
        assert_eq!(err.to_string(), "masscan exited with exit status: 1");
    }
}
