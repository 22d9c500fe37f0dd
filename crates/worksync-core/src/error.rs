use std::path::PathBuf;
use thiserror::Error;

/// The local durable store failed. Callers of `enqueue`/`cache_put` must see
/// these: dropping a queued mutation silently is a correctness bug.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open queue database at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("queue database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to encode or decode a stored payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("stored row carries an invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("corrupt queue row: {0}")]
    Corrupt(String),
}

/// A single remote write failed. The orchestrator counts these and keeps the
/// record queued for the next cycle.
#[derive(Debug, Error)]
pub enum RemoteWriteError {
    #[error("network error talking to the remote store: {0}")]
    Network(String),
    #[error("record {collection}/{record_id} does not exist on the remote")]
    MissingRecord {
        collection: String,
        record_id: String,
    },
    #[error("remote store rejected the write: {0}")]
    Rejected(String),
}

/// Why a manual `sync_now` call could not run.
#[derive(Debug, Error)]
pub enum SyncNowError {
    #[error("cannot sync while offline")]
    Offline,
    #[error(transparent)]
    Storage(#[from] StorageError),
}
