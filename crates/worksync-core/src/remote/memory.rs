use super::RemoteStore;
use crate::error::RemoteWriteError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCallKind {
    Write,
    Patch,
    Delete,
}

/// One attempted mutation against a [`MemoryRemote`], recorded whether it
/// succeeded or not.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub kind: RemoteCallKind,
    pub collection: String,
    pub record_id: String,
    pub payload: Value,
}

/// In-memory [`RemoteStore`] with the same contract as the HTTP client.
///
/// Tests drive failure scenarios through it: `fail_matching` makes every
/// write to one record fail, `fail_next` injects a single error, and
/// `set_latency` makes calls slow enough to overlap.
#[derive(Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, HashMap<String, Value>>,
    calls: Vec<RemoteCall>,
    fail_records: HashSet<(String, String)>,
    fail_listings: HashSet<String>,
    fail_next: VecDeque<RemoteWriteError>,
    latency: Option<Duration>,
}

impl Inner {
    fn take_failure(&mut self, collection: &str, id: &str) -> Option<RemoteWriteError> {
        if let Some(err) = self.fail_next.pop_front() {
            return Some(err);
        }
        if self
            .fail_records
            .contains(&(collection.to_string(), id.to_string()))
        {
            return Some(RemoteWriteError::Rejected(format!(
                "injected failure for {collection}/{id}"
            )));
        }
        None
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a record directly into the remote state, bypassing the call log.
    pub fn seed(&self, collection: &str, id: &str, data: Value) {
        self.lock()
            .records
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
    }

    /// Current remote state of one record.
    pub fn record(&self, collection: &str, id: &str) -> Option<Value> {
        self.lock()
            .records
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned()
    }

    /// Every mutation attempted so far, in call order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Make every write/patch/delete aimed at `collection/id` fail.
    pub fn fail_matching(&self, collection: &str, id: &str) {
        self.lock()
            .fail_records
            .insert((collection.to_string(), id.to_string()));
    }

    /// Fail the next single call, whatever it targets.
    pub fn fail_next(&self, err: RemoteWriteError) {
        self.lock().fail_next.push_back(err);
    }

    /// Make `list_records` for one collection fail.
    pub fn fail_listing(&self, collection: &str) {
        self.lock().fail_listings.insert(collection.to_string());
    }

    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.fail_records.clear();
        inner.fail_listings.clear();
        inner.fail_next.clear();
    }

    /// Delay every call by `latency`, so tests can overlap two drains.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn apply_latency(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn write_record(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
    ) -> Result<(), RemoteWriteError> {
        self.apply_latency().await;
        let mut inner = self.lock();
        inner.calls.push(RemoteCall {
            kind: RemoteCallKind::Write,
            collection: collection.to_string(),
            record_id: id.to_string(),
            payload: data.clone(),
        });
        if let Some(err) = inner.take_failure(collection, id) {
            return Err(err);
        }
        inner
            .records
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data.clone());
        Ok(())
    }

    async fn patch_record(
        &self,
        collection: &str,
        id: &str,
        data: &Value,
    ) -> Result<(), RemoteWriteError> {
        self.apply_latency().await;
        let mut inner = self.lock();
        inner.calls.push(RemoteCall {
            kind: RemoteCallKind::Patch,
            collection: collection.to_string(),
            record_id: id.to_string(),
            payload: data.clone(),
        });
        if let Some(err) = inner.take_failure(collection, id) {
            return Err(err);
        }
        match inner
            .records
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
        {
            Some(existing) => {
                merge(existing, data);
                Ok(())
            }
            None => Err(RemoteWriteError::MissingRecord {
                collection: collection.to_string(),
                record_id: id.to_string(),
            }),
        }
    }

    async fn delete_record(&self, collection: &str, id: &str) -> Result<(), RemoteWriteError> {
        self.apply_latency().await;
        let mut inner = self.lock();
        inner.calls.push(RemoteCall {
            kind: RemoteCallKind::Delete,
            collection: collection.to_string(),
            record_id: id.to_string(),
            payload: Value::Null,
        });
        if let Some(err) = inner.take_failure(collection, id) {
            return Err(err);
        }
        inner.records.get_mut(collection).and_then(|c| c.remove(id));
        Ok(())
    }

    async fn list_records(
        &self,
        collection: &str,
    ) -> Result<Vec<(String, Value)>, RemoteWriteError> {
        self.apply_latency().await;
        let inner = self.lock();
        if inner.fail_listings.contains(collection) {
            return Err(RemoteWriteError::Rejected(format!(
                "injected listing failure for {collection}"
            )));
        }
        let mut records: Vec<(String, Value)> = inner
            .records
            .get(collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }
}

/// Shallow merge: object onto object adds/overwrites keys, anything else
/// replaces the record wholesale.
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
