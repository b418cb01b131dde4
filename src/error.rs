//! Error types for the sync engine and its collaborators

use thiserror::Error;

use crate::models::TaskId;

/// Failure of a single REST call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level failure (DNS, TLS, connection reset, timeout).
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The body was not JSON.
    #[error("response from {url} is not JSON (HTTP {status}): {source}")]
    Decode {
        url: String,
        status: u16,
        #[source]
        source: serde_json::Error,
    },

    /// The site answered with an in-band error object (`{"code": ...}`).
    #[error("API error {code}: {message}")]
    Remote {
        code: String,
        message: String,
        status: u16,
        payload: serde_json::Value,
    },

    /// Non-success status without an error object.
    #[error("unexpected HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// JSON was valid but did not have the expected shape.
    #[error("unexpected response shape from {url}: {source}")]
    Shape {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Credentials would have been sent somewhere other than the site's REST root.
    #[error("refusing to send credentials to {url} (site origin is {trusted})")]
    UntrustedOrigin { url: String, trusted: String },
}

impl ApiError {
    /// Error code carried by an in-band API error, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Remote { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Failure of the one-time setup flow. The `Display` text is user facing.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(
        "{host} is hosted on WordPress.com. Connect it with WordPress.com sign-in instead of an application password."
    )]
    HostedPlatform { host: String },

    #[error("I had trouble connecting to REST API on this site.")]
    Unreachable { url: String },

    #[error("\"{0}\" is not a valid site address.")]
    InvalidUrl(String),

    #[error("The site does not expose the {0} endpoint.")]
    MissingRoute(&'static str),

    #[error("The REST API of this site answers at {found}, not {expected}. Connect using {found} instead.")]
    OriginMismatch { expected: String, found: String },

    #[error("{0}")]
    Api(#[from] ApiError),
}

/// Failure of the local key/value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored value for {key} is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to create storage directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Failure of a sync cycle or of a local mutation.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("not connected to a site")]
    NotConnected,

    #[error("no REST endpoint for content type {0}")]
    MissingEndpoint(String),

    #[error("unknown taxonomy {0}")]
    UnknownTaxonomy(String),

    #[error("no task with id {0}")]
    UnknownTask(TaskId),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure reported by a native reminders capability.
#[derive(Debug, Error)]
pub enum RemindersError {
    #[error("reminders are not available on this platform")]
    Unavailable,

    #[error("reminders permission not granted")]
    PermissionDenied,

    #[error("reminder {0} not found")]
    NotFound(String),

    #[error("calendar {0} not found")]
    CalendarNotFound(String),

    #[error("reminders platform error: {0}")]
    Platform(String),
}
