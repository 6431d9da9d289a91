use std::io;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Sync core errors
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transient protocol/network failure reported by a protocol client
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The sync state lacks the MODSEQ cursor needed for an incremental fetch
    #[error("Sync state is missing its modseq cursor")]
    MissingModseq,

    /// Prerequisites (such as the folder list) are not in place yet
    #[error("Sync is moot: {0}")]
    Moot(String),

    /// Folder not found
    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    /// Transactional store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Raw sync state could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error while reading or writing configuration
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SyncError {
    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        SyncError::Protocol(msg.into())
    }

    /// Create a new moot error
    pub fn moot<S: Into<String>>(msg: S) -> Self {
        SyncError::Moot(msg.into())
    }

    /// Create a new store error
    pub fn store<S: Into<String>>(msg: S) -> Self {
        SyncError::Store(msg.into())
    }

    /// Create a new folder not found error
    pub fn folder_not_found<S: Into<String>>(folder: S) -> Self {
        SyncError::FolderNotFound(folder.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        SyncError::Config(msg.into())
    }

    /// Check if retrying the same pass later may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Protocol(_) => true,
            SyncError::Moot(_) => true,
            SyncError::Store(_) => true,
            SyncError::Io(_) => true,
            SyncError::MissingModseq => false, // would require a full folder re-fetch
            SyncError::FolderNotFound(_) => false,
            SyncError::Serialization(_) => false, // corrupt state needs a reset
            SyncError::Config(_) => false,
        }
    }

    /// Check if this is the "prerequisites missing, try later" signal.
    ///
    /// Executors should not count these against the account's health.
    pub fn is_moot(&self) -> bool {
        matches!(self, SyncError::Moot(_))
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}
