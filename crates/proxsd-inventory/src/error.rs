//! Error types for cluster inventory queries.

use thiserror::Error;

/// Failure of a single call against the cluster management API.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The HTTP client could not be constructed.
    #[error("failed to build API client: {reason}")]
    ClientBuild {
        /// Underlying builder error.
        reason: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("request to {path} timed out after {timeout_ms}ms")]
    Timeout {
        /// API path that was requested.
        path: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// Connection, TLS or protocol failure before a response arrived.
    #[error("request to {path} failed: {reason}")]
    Transport {
        /// API path that was requested.
        path: String,
        /// Underlying transport error.
        reason: String,
    },

    /// The API answered with a non-success status code.
    #[error("{path} returned HTTP {status}")]
    Status {
        /// API path that was requested.
        path: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body did not match the expected shape.
    #[error("failed to decode response from {path}: {reason}")]
    Decode {
        /// API path that was requested.
        path: String,
        /// Decoder error.
        reason: String,
    },
}

/// Result alias for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_message() {
        let err = InventoryError::Status {
            path: "/cluster/resources".to_string(),
            status: 401,
        };
        assert_eq!(err.to_string(), "/cluster/resources returned HTTP 401");
    }

    #[test]
    fn test_timeout_message() {
        let err = InventoryError::Timeout {
            path: "/nodes/pve1/qemu/100/config".to_string(),
            timeout_ms: 30_000,
        };
        assert!(err.to_string().contains("30000ms"));
    }
}
