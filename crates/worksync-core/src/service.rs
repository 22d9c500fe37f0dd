use crate::connectivity::ConnectivityMonitor;
use crate::error::{StorageError, SyncNowError};
use crate::executor::OperationExecutor;
use crate::model::{OperationDraft, PendingOperation};
use crate::queue::QueueStore;
use crate::remote::RemoteStore;
use crate::status::{StatusBus, StatusEvent, StatusSubscription};
use crate::sync::{DrainOutcome, SyncOrchestrator, SyncReport};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What happened to a batch of peer-delivered operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestReport {
    pub accepted: usize,
    pub duplicates: usize,
}

/// Result of warming the cache from the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreloadReport {
    /// Collections successfully fetched and cached.
    pub collections: usize,
    /// Total records cached across those collections.
    pub records: usize,
    /// Collections whose fetch failed; the rest are cached anyway.
    pub failures: usize,
}

/// The one front door for offline-aware mutations.
///
/// Owns the queue, the drain orchestrator and the status bus. The host
/// application constructs exactly one and hands out references; there is no
/// global instance.
pub struct OfflineService {
    store: Arc<QueueStore>,
    remote: Arc<dyn RemoteStore>,
    executor: OperationExecutor,
    orchestrator: SyncOrchestrator,
    monitor: Arc<ConnectivityMonitor>,
    bus: Arc<StatusBus>,
    default_cache_ttl: Duration,
}

impl OfflineService {
    pub fn new(
        store: Arc<QueueStore>,
        remote: Arc<dyn RemoteStore>,
        monitor: Arc<ConnectivityMonitor>,
        bus: Arc<StatusBus>,
        default_cache_ttl: Duration,
    ) -> Self {
        let orchestrator = SyncOrchestrator::new(
            store.clone(),
            remote.clone(),
            monitor.clone(),
            bus.clone(),
        );
        Self {
            store,
            remote: remote.clone(),
            executor: OperationExecutor::new(remote),
            orchestrator,
            monitor,
            bus,
            default_cache_ttl,
        }
    }

    /// Apply a mutation right away when possible, otherwise queue it.
    ///
    /// Returns `true` when the write reached the remote store immediately.
    /// `false` means the mutation is persisted locally and will sync on the
    /// next drain; callers surface that as "saved locally".
    pub async fn submit(&self, draft: OperationDraft) -> Result<bool, StorageError> {
        if self.monitor.is_online() {
            match self.executor.execute(&draft).await {
                Ok(()) => {
                    debug!(
                        collection = %draft.collection,
                        record = %draft.record_id,
                        "mutation applied immediately"
                    );
                    return Ok(true);
                }
                Err(err) => {
                    warn!(
                        collection = %draft.collection,
                        record = %draft.record_id,
                        error = %err,
                        "immediate write failed, queueing instead"
                    );
                }
            }
        }

        self.store.enqueue(&draft)?;
        let pending = self.store.pending_count()?;
        self.bus.publish(StatusEvent::OperationQueued { pending });
        info!(
            collection = %draft.collection,
            record = %draft.record_id,
            pending,
            "mutation queued for later sync"
        );
        Ok(false)
    }

    pub fn pending_count(&self) -> Result<usize, StorageError> {
        self.store.pending_count()
    }

    /// Snapshot of the queue, used when pushing to a peer.
    pub fn list_pending(&self) -> Result<Vec<PendingOperation>, StorageError> {
        self.store.list_pending()
    }

    /// Drain the queue now. Fails fast when offline; a drain already in
    /// flight yields an empty report instead of a second pass.
    pub async fn sync_now(&self) -> Result<SyncReport, SyncNowError> {
        if !self.monitor.is_online() {
            return Err(SyncNowError::Offline);
        }
        match self.orchestrator.drain().await? {
            DrainOutcome::Completed(report) => Ok(report),
            DrainOutcome::AlreadyRunning => Ok(SyncReport::default()),
            DrainOutcome::Offline => Err(SyncNowError::Offline),
        }
    }

    pub fn subscribe_status(&self) -> StatusSubscription {
        self.bus.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    /// Scoped helpers for one collection.
    pub fn collection(&self, name: impl Into<String>) -> CollectionHandle<'_> {
        CollectionHandle {
            service: self,
            collection: name.into(),
        }
    }

    /// Queue operations received from a peer. Never executes them directly;
    /// the orchestrator picks them up on the next drain. Duplicates of
    /// anything already stored, pending or synced, are dropped.
    pub fn ingest_peer_operations(
        &self,
        operations: Vec<OperationDraft>,
    ) -> Result<IngestReport, StorageError> {
        let mut report = IngestReport::default();
        for draft in &operations {
            match self.store.enqueue_if_absent(draft)? {
                Some(_) => report.accepted += 1,
                None => report.duplicates += 1,
            }
        }
        self.bus.publish(StatusEvent::PeerSnapshotReceived {
            accepted: report.accepted,
            duplicates: report.duplicates,
        });
        info!(
            accepted = report.accepted,
            duplicates = report.duplicates,
            "ingested peer operations"
        );
        Ok(report)
    }

    /// Fetch whole collections from the remote store and cache each under its
    /// own name. One collection failing does not stop the others.
    pub async fn preload_collections(
        &self,
        collections: &[&str],
        ttl: Duration,
    ) -> Result<PreloadReport, StorageError> {
        let mut report = PreloadReport::default();
        for name in collections {
            match self.remote.list_records(name).await {
                Ok(records) => {
                    report.records += records.len();
                    let map: serde_json::Map<String, Value> = records.into_iter().collect();
                    self.store.cache_put(name, &Value::Object(map), ttl)?;
                    report.collections += 1;
                }
                Err(err) => {
                    warn!(collection = %name, error = %err, "preload fetch failed");
                    report.failures += 1;
                }
            }
        }
        info!(
            collections = report.collections,
            records = report.records,
            failures = report.failures,
            "cache preload finished"
        );
        Ok(report)
    }

    /// Cache a value under `key` with the service-wide default TTL.
    pub fn cache_put(&self, key: &str, data: &Value) -> Result<(), StorageError> {
        self.store.cache_put(key, data, self.default_cache_ttl)
    }

    pub fn cache_put_with_ttl(
        &self,
        key: &str,
        data: &Value,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        self.store.cache_put(key, data, ttl)
    }

    pub fn cache_get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.store.cache_get(key)
    }

    pub fn cache_sweep_expired(&self) -> Result<usize, StorageError> {
        self.store.cache_sweep_expired()
    }

    /// Trim synced rows confirmed before the cutoff.
    pub fn prune_synced(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        self.store.prune_synced(older_than)
    }
}

/// Create/update/remove helpers pinned to one collection, the shape most
/// callers want.
pub struct CollectionHandle<'a> {
    service: &'a OfflineService,
    collection: String,
}

impl CollectionHandle<'_> {
    pub async fn create(&self, record_id: &str, payload: Value) -> Result<bool, StorageError> {
        self.service
            .submit(OperationDraft::create(&self.collection, record_id, payload))
            .await
    }

    /// Create under a freshly generated record id; returns the id alongside
    /// the applied-immediately flag.
    pub async fn create_new(&self, payload: Value) -> Result<(String, bool), StorageError> {
        let record_id = Uuid::new_v4().to_string();
        let applied = self.create(&record_id, payload).await?;
        Ok((record_id, applied))
    }

    pub async fn update(&self, record_id: &str, payload: Value) -> Result<bool, StorageError> {
        self.service
            .submit(OperationDraft::update(&self.collection, record_id, payload))
            .await
    }

    pub async fn remove(&self, record_id: &str) -> Result<bool, StorageError> {
        self.service
            .submit(OperationDraft::delete(&self.collection, record_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationKind;
    use crate::remote::{MemoryRemote, RemoteCallKind};
    use serde_json::json;

    struct Rig {
        remote: Arc<MemoryRemote>,
        monitor: Arc<ConnectivityMonitor>,
        bus: Arc<StatusBus>,
        service: OfflineService,
    }

    fn rig(online: bool) -> Rig {
        let store = Arc::new(QueueStore::open_in_memory().unwrap());
        let remote = Arc::new(MemoryRemote::new());
        let bus = Arc::new(StatusBus::new());
        let monitor = Arc::new(ConnectivityMonitor::new(bus.clone(), online));
        let service = OfflineService::new(
            store,
            remote.clone(),
            monitor.clone(),
            bus.clone(),
            Duration::from_secs(3600),
        );
        Rig {
            remote,
            monitor,
            bus,
            service,
        }
    }

    #[tokio::test]
    async fn offline_submit_queues_and_notifies() {
        let rig = rig(false);
        let mut sub = rig.service.subscribe_status();

        let applied = rig
            .service
            .submit(OperationDraft::create("items", "x1", json!({"nome": "Pá"})))
            .await
            .unwrap();

        assert!(!applied);
        assert_eq!(rig.service.pending_count().unwrap(), 1);
        assert!(rig.remote.calls().is_empty());
        assert_eq!(sub.try_recv(), Some(StatusEvent::OperationQueued { pending: 1 }));
    }

    #[tokio::test]
    async fn online_submit_applies_immediately() {
        let rig = rig(true);
        let mut sub = rig.service.subscribe_status();

        let applied = rig
            .service
            .submit(OperationDraft::create("items", "x1", json!({"v": 1})))
            .await
            .unwrap();

        assert!(applied);
        assert_eq!(rig.service.pending_count().unwrap(), 0);
        assert_eq!(rig.remote.record("items", "x1"), Some(json!({"v": 1})));
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn failed_immediate_write_falls_back_to_queue() {
        let rig = rig(true);
        rig.remote.fail_matching("items", "x1");

        let applied = rig
            .service
            .submit(OperationDraft::create("items", "x1", json!({"v": 1})))
            .await
            .unwrap();

        assert!(!applied);
        assert_eq!(rig.service.pending_count().unwrap(), 1);
        // The attempt happened before the fallback.
        assert_eq!(rig.remote.calls().len(), 1);
    }

    #[tokio::test]
    async fn offline_create_then_reconnect_syncs_exactly_once() {
        let rig = rig(false);
        rig.service
            .submit(OperationDraft::create("items", "x1", json!({"nome": "Pá"})))
            .await
            .unwrap();
        assert_eq!(rig.service.pending_count().unwrap(), 1);

        rig.monitor.set_online(true);
        let report = rig.service.sync_now().await.unwrap();
        assert_eq!(report, SyncReport { synced: 1, errors: 0 });
        assert_eq!(rig.service.pending_count().unwrap(), 0);

        let writes: Vec<_> = rig
            .remote
            .calls()
            .into_iter()
            .filter(|c| c.kind == RemoteCallKind::Write && c.record_id == "x1")
            .collect();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].payload, json!({"nome": "Pá"}));
    }

    #[tokio::test]
    async fn sync_now_fails_fast_when_offline() {
        let rig = rig(false);
        rig.service
            .submit(OperationDraft::create("items", "x1", json!({})))
            .await
            .unwrap();

        let err = rig.service.sync_now().await.unwrap_err();
        assert!(matches!(err, SyncNowError::Offline));
        assert!(rig.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn ingest_drops_duplicates_and_reports() {
        let rig = rig(false);
        let local = OperationDraft::create("items", "x1", json!({"v": 1}));
        rig.service.submit(local.clone()).await.unwrap();
        let mut sub = rig.service.subscribe_status();

        let report = rig
            .service
            .ingest_peer_operations(vec![
                local,
                OperationDraft::create("items", "x2", json!({"v": 2})),
            ])
            .unwrap();

        assert_eq!(report, IngestReport { accepted: 1, duplicates: 1 });
        assert_eq!(rig.service.pending_count().unwrap(), 2);
        assert_eq!(
            sub.try_recv(),
            Some(StatusEvent::PeerSnapshotReceived {
                accepted: 1,
                duplicates: 1
            })
        );
    }

    #[tokio::test]
    async fn preload_caches_what_it_can() {
        let rig = rig(true);
        rig.remote.seed("tools", "t1", json!({"nome": "Serra"}));
        rig.remote.seed("tools", "t2", json!({"nome": "Pá"}));
        rig.remote.seed("people", "p1", json!({"nome": "Ana"}));
        rig.remote.fail_listing("people");

        let report = rig
            .service
            .preload_collections(&["tools", "people"], Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            report,
            PreloadReport {
                collections: 1,
                records: 2,
                failures: 1
            }
        );
        assert_eq!(
            rig.service.cache_get("tools").unwrap(),
            Some(json!({"t1": {"nome": "Serra"}, "t2": {"nome": "Pá"}}))
        );
        assert_eq!(rig.service.cache_get("people").unwrap(), None);
    }

    #[tokio::test]
    async fn collection_handle_builds_the_right_drafts() {
        let rig = rig(false);
        let items = rig.service.collection("items");

        items.create("x1", json!({"v": 1})).await.unwrap();
        items.update("x1", json!({"v": 2})).await.unwrap();
        items.remove("x1").await.unwrap();
        let (generated, applied) = items.create_new(json!({"v": 3})).await.unwrap();
        assert!(!applied);
        assert_eq!(generated.len(), 36);

        let kinds: Vec<OperationKind> = rig
            .service
            .list_pending()
            .unwrap()
            .iter()
            .map(|op| op.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::Create,
                OperationKind::Update,
                OperationKind::Delete,
                OperationKind::Create
            ]
        );
    }

    #[tokio::test]
    async fn cache_uses_default_ttl() {
        let rig = rig(false);
        rig.service.cache_put("k", &json!({"v": 1})).unwrap();
        assert_eq!(rig.service.cache_get("k").unwrap(), Some(json!({"v": 1})));
        assert_eq!(rig.service.cache_sweep_expired().unwrap(), 0);
    }

    #[tokio::test]
    async fn bus_is_shared_between_monitor_and_service() {
        let rig = rig(false);
        let mut sub = rig.service.subscribe_status();
        rig.monitor.set_online(true);
        assert_eq!(sub.try_recv(), Some(StatusEvent::Online));
        drop(rig.bus);
    }
}
