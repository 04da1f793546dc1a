//! Configuration Distribution Error Hierarchy
//!
//! Errors are grouped by the layer that raises them: the network transport,
//! the persistence layer, the client-side repositories and the server-side
//! publish path. Only `StorageError` coming out of `ReleasePublisher::publish`
//! is meant to reach a caller synchronously; everything else is retried,
//! logged or folded into a last-good value by the client runtime.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (network, storage, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Client-side config loading failures
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Server-side publish and notification failures
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    // Network layer
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    // Storage layer
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    //Serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Request did not complete in time
    #[error("Request to {url} timed out after {duration:?}")]
    Timeout { url: String, duration: Duration },

    /// Connection refused, reset, DNS failure and similar
    #[error("Transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// Server answered with a status the caller does not understand
    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// Malformed endpoint addresses
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Server could not bind its listen address
    #[error("Failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures on the local cache or resource files
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// A persisted record could not be decoded
    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },

    /// Store rejected the write (used by in-memory stores and tests)
    #[error("Write rejected: {0}")]
    WriteRejected(String),
}

// Serialization is classified separately (across protocol layers and system layers)
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Bincode serialization failed: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Service discovery returned an empty list
    #[error("No available config service")]
    NoConfigService,

    /// HTTP 404 on fetch: the namespace has never been released
    #[error(
        "Could not find config for namespace - appId: {app_id}, cluster: {cluster}, namespace: {namespace}, please check whether the configs are released"
    )]
    NotReleased {
        app_id: String,
        cluster: String,
        namespace: String,
    },

    /// Every candidate address failed across the whole retry budget
    #[error("Load config failed - namespace: {namespace}, url: {url}")]
    LoadFailed {
        namespace: String,
        url: String,
        #[source]
        source: Box<Error>,
    },

    /// Neither upstream nor local cache could produce a snapshot
    #[error("No snapshot available for namespace {0}")]
    NoSnapshot(String),

    /// The client runtime has already been shut down
    #[error("Client runtime is shut down")]
    ShutDown,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Publish was given an empty topic
    #[error("Release topic must not be empty")]
    EmptyTopic,

    /// Long-poll request body could not be understood
    #[error("Invalid notifications parameter: {0}")]
    InvalidNotifications(String),

    /// Shutdown signal could not be delivered
    #[error("{0}")]
    SignalSendFailed(String),
}

impl ClientError {
    /// True when the error means "namespace not released" rather than an
    /// unreachable control plane.
    pub fn is_not_released(&self) -> bool {
        matches!(self, ClientError::NotReleased { .. })
    }
}

impl Error {
    /// True for failures that came back as HTTP 404 on a config fetch.
    pub fn is_not_released(&self) -> bool {
        match self {
            Error::Client(e) => e.is_not_released(),
            _ => false,
        }
    }
}

// ============== Conversion Implementations ============== //
impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        NetworkError::Transport(err).into()
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        StorageError::DbError(err.to_string()).into()
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        SerializationError::Bincode(err).into()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        SerializationError::Json(err).into()
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError(err).into()
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Error::System(SystemError::TaskFailed(err))
    }
}
