// Error taxonomy for the mirroring pipeline.
//
// Connection failures are retried by the stream listener, protocol failures
// on the rules endpoint are fatal at startup, parse failures skip one stream
// line, and persistence failures surface to whoever touched the dedup file.
// Per-post failures are plain anyhow errors logged by the orchestrator.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Error, Debug)]
pub enum MirrorError {
    /// Network or handshake failure. Never fatal while listening.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Unexpected status from a source-platform endpoint.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Protocol {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// A stream line or response body that could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The dedup file could not be read or written.
    #[error("Dedup store {}: {message}", path.display())]
    Persistence { path: PathBuf, message: String },
}

impl From<reqwest::Error> for MirrorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MirrorError::Parse(err.to_string())
        } else {
            MirrorError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_names_endpoint_and_status() {
        let err = MirrorError::Protocol {
            endpoint: "stream rules".to_string(),
            status: 403,
            body: "forbidden".to_string(),
        };
        assert_eq!(err.to_string(), "stream rules returned HTTP 403: forbidden");
    }

    #[test]
    fn json_errors_become_parse_errors() {
        let err: MirrorError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert!(matches!(err, MirrorError::Parse(_)));
    }

    #[test]
    fn persistence_error_includes_path() {
        let err = MirrorError::Persistence {
            path: PathBuf::from("/tmp/forwarded.json"),
            message: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("/tmp/forwarded.json"));
    }
}
