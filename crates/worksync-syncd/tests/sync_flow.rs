//! End-to-end drain tests against a real HTTP server: queue while
//! offline, flip online, watch the backend receive exactly what was
//! queued.

use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use worksync_core::{
    ConnectivityMonitor, HttpRemote, OfflineService, OperationDraft, QueueStore, StatusBus,
};

fn service_for(base_url: &str) -> (Arc<OfflineService>, Arc<ConnectivityMonitor>) {
    let store = Arc::new(QueueStore::open_in_memory().unwrap());
    let bus = Arc::new(StatusBus::new());
    let monitor = Arc::new(ConnectivityMonitor::new(bus.clone(), false));
    let service = Arc::new(OfflineService::new(
        store,
        Arc::new(HttpRemote::new(base_url)),
        monitor.clone(),
        bus,
        Duration::from_secs(3600),
    ));
    (service, monitor)
}

#[tokio::test]
async fn offline_edit_reaches_the_backend_exactly_once() {
    let mut server = mockito::Server::new_async().await;
    let put = server
        .mock("PUT", "/items/x1")
        .match_body(Matcher::Json(json!({"nome": "Pá"})))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let (service, monitor) = service_for(&server.url());
    let immediate = service
        .submit(OperationDraft::create("items", "x1", json!({"nome": "Pá"})))
        .await
        .unwrap();
    assert!(!immediate);
    assert_eq!(service.pending_count().unwrap(), 1);

    monitor.set_online(true);
    let report = service.sync_now().await.unwrap();
    assert_eq!((report.synced, report.errors), (1, 0));
    assert_eq!(service.pending_count().unwrap(), 0);

    // a second pass finds nothing to send
    let again = service.sync_now().await.unwrap();
    assert_eq!((again.synced, again.errors), (0, 0));
    put.assert_async().await;
}

#[tokio::test]
async fn one_rejected_record_does_not_block_the_rest() {
    let mut server = mockito::Server::new_async().await;
    let first = server
        .mock("PUT", "/items/a1")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let broken = server
        .mock("PUT", "/items/b2")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let third = server
        .mock("PUT", "/items/c3")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let (service, monitor) = service_for(&server.url());
    for id in ["a1", "b2", "c3"] {
        service
            .submit(OperationDraft::create("items", id, json!({"id": id})))
            .await
            .unwrap();
    }

    monitor.set_online(true);
    let report = service.sync_now().await.unwrap();
    assert_eq!((report.synced, report.errors), (2, 1));

    let left = service.list_pending().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].record_id, "b2");

    // the backend recovers and the stuck operation drains on the next pass
    let healed = server
        .mock("PUT", "/items/b2")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let second = service.sync_now().await.unwrap();
    assert_eq!((second.synced, second.errors), (1, 0));
    assert_eq!(service.pending_count().unwrap(), 0);

    first.assert_async().await;
    broken.assert_async().await;
    third.assert_async().await;
    healed.assert_async().await;
}

#[tokio::test]
async fn update_of_a_missing_record_stays_queued() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("PATCH", "/items/ghost")
        .with_status(404)
        .create_async()
        .await;

    let (service, monitor) = service_for(&server.url());
    service
        .submit(OperationDraft::update("items", "ghost", json!({"qty": 5})))
        .await
        .unwrap();

    monitor.set_online(true);
    let report = service.sync_now().await.unwrap();
    assert_eq!((report.synced, report.errors), (0, 1));
    assert_eq!(service.pending_count().unwrap(), 1);
}

#[tokio::test]
async fn delete_of_an_already_gone_record_counts_as_synced() {
    let mut server = mockito::Server::new_async().await;
    let del = server
        .mock("DELETE", "/items/gone")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let (service, monitor) = service_for(&server.url());
    service
        .submit(OperationDraft::delete("items", "gone"))
        .await
        .unwrap();

    monitor.set_online(true);
    let report = service.sync_now().await.unwrap();
    assert_eq!((report.synced, report.errors), (1, 0));
    assert_eq!(service.pending_count().unwrap(), 0);
    del.assert_async().await;
}

#[tokio::test]
async fn queue_survives_a_daemon_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("queue.db");
    let mut server = mockito::Server::new_async().await;
    let put = server
        .mock("PUT", "/items/x7")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    {
        let store = Arc::new(QueueStore::open(&db).unwrap());
        let bus = Arc::new(StatusBus::new());
        let monitor = Arc::new(ConnectivityMonitor::new(bus.clone(), false));
        let service = OfflineService::new(
            store,
            Arc::new(HttpRemote::new(server.url())),
            monitor,
            bus,
            Duration::from_secs(3600),
        );
        service
            .submit(OperationDraft::create("items", "x7", json!({"nome": "Trena"})))
            .await
            .unwrap();
    }

    let store = Arc::new(QueueStore::open(&db).unwrap());
    let bus = Arc::new(StatusBus::new());
    let monitor = Arc::new(ConnectivityMonitor::new(bus.clone(), true));
    let service = OfflineService::new(
        store,
        Arc::new(HttpRemote::new(server.url())),
        monitor,
        bus,
        Duration::from_secs(3600),
    );
    assert_eq!(service.pending_count().unwrap(), 1);
    let report = service.sync_now().await.unwrap();
    assert_eq!((report.synced, report.errors), (1, 0));
    put.assert_async().await;
}
