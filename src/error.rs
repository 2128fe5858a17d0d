//! Crate-wide error type.
//!
//! Every public operation returns [`Error`]. Its variants follow the failure
//! taxonomy the call engine reasons about:
//!
//! - [`Error::Transport`] - network/TLS failures, retried with backoff
//! - [`Error::Api`] - classified vendor errors, see [`ApiError`]
//! - [`Error::Protocol`] - responses that break the expected contract, never retried
//! - [`Error::Configuration`] and [`Error::ReauthRequired`] - fatal conditions
//!   that must end the operation instead of being retried

use std::path::PathBuf;

use thiserror::Error;

use crate::api::{ApiError, ErrorFlags};
use crate::auth::StoreError;

/// Errors returned by the client library.
#[derive(Debug, Error)]
pub enum Error {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error calling {path}: {source}")]
    Transport {
        /// API path or URL that failed.
        path: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Vendor error reported inside a non-2xx response body.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Non-2xx response whose body carried no vendor error payload.
    #[error("{server} says \"{status}.\"")]
    Http {
        /// Server host name.
        server: String,
        /// Status line, e.g. `502 Bad Gateway`.
        status: String,
    },

    /// Response shape violates the expected contract.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The response body could not be decoded into the expected type.
    #[error("I cannot understand what {server} is saying. ({hint}): {source}")]
    Decode {
        /// Server host name.
        server: String,
        /// Suggestion for diagnosing the payload.
        hint: &'static str,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The session is wired incorrectly and cannot make progress.
    #[error("configuration error: {message}")]
    Configuration {
        /// What is wrong with the configuration.
        message: String,
    },

    /// Reauthentication failed; the stored token was deleted and the caller
    /// must run the authentication flow again.
    #[error("token for {username} is no longer valid, reauthentication required: {reason}")]
    ReauthRequired {
        /// User whose token was discarded.
        username: String,
        /// The error that triggered the failed reauthentication.
        reason: String,
    },

    /// Token store failed to read or write.
    #[error("token store error: {0}")]
    TokenStore(#[from] StoreError),

    /// Request parameters were rejected before sending.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Why the request was rejected.
        message: String,
    },

    /// Local I/O failed while reading a transfer source.
    #[error("IO error on {path}: {source}")]
    Io {
        /// File path or stream description.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Response contract violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The upload list did not contain the requested upload.
    #[error("Upload ID not found.")]
    UploadIdNotFound,

    /// The final chunk response did not carry a result ID.
    #[error("Unexpected empty response from server.")]
    EmptyUploadResponse,

    /// A ranged download resumed at a different byte than requested.
    #[error("Requested byte {requested}, got {got} instead.")]
    RangeMismatch {
        /// Offset sent in the `Range` header.
        requested: u64,
        /// Start reported by `Content-Range`, or the header as received
        /// when no start can be read from it.
        got: String,
    },

    /// The server record reports more progress than the upload can hold.
    #[error("upload record is inconsistent: {detail}")]
    InconsistentUploadRecord {
        /// Which counters disagree.
        detail: String,
    },
}

impl Error {
    /// Creates a transport error from a reqwest error.
    pub fn transport(path: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            path: path.into(),
            source,
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this is a classified vendor error whose flags intersect `mask`.
    #[must_use]
    pub fn is(&self, mask: ErrorFlags) -> bool {
        match self {
            Self::Api(api) => api.is(mask),
            _ => false,
        }
    }

    /// Returns the classified vendor error, if any.
    #[must_use]
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(api) => Some(api),
            _ => None,
        }
    }

    /// Returns true for conditions that must terminate the operation rather
    /// than be retried or reported as an ordinary failure.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::ReauthRequired { .. })
    }
}
