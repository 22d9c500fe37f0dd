use crate::error::RemoteWriteError;
use async_trait::async_trait;
use serde_json::Value;

mod http;
mod memory;

pub use http::HttpRemote;
pub use memory::{MemoryRemote, RemoteCall, RemoteCallKind};

/// The hosted record store that queued mutations are replayed against.
///
/// Implementations must keep delete idempotent and patch strict: patching a
/// record that does not exist is an error, never an implicit create.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Write a full record at `collection/id`, creating or overwriting.
    async fn write_record(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
    ) -> Result<(), RemoteWriteError>;

    /// Merge partial data onto the existing record at `collection/id`.
    async fn patch_record(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
    ) -> Result<(), RemoteWriteError>;

    /// Delete the record at `collection/id`; absent records are fine.
    async fn delete_record(&self, collection: &str, id: &str) -> Result<(), RemoteWriteError>;

    /// All records of a collection as `(id, data)` pairs. Only the cache
    /// preload reads this; queued mutations never do.
    async fn list_records(&self, collection: &str)
        -> Result<Vec<(String, Value)>, RemoteWriteError>;
}
