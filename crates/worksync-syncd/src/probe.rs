use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use worksync_core::ConnectivityMonitor;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Polls the backend to learn whether the network path is up, standing in
/// for the connectivity change events a desktop shell would deliver.
///
/// Only observed flips are pushed into the [`ConnectivityMonitor`]; a
/// steady connection produces no events after the first report.
pub struct ConnectivityProbe {
    client: reqwest::Client,
    monitor: Arc<ConnectivityMonitor>,
    url: String,
    interval: Duration,
}

impl ConnectivityProbe {
    pub fn new(monitor: Arc<ConnectivityMonitor>, url: String, interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            monitor,
            url,
            interval,
        }
    }

    /// One reachability check. Any HTTP response counts as reachable, even
    /// an error status; only a transport failure means offline.
    pub async fn check_once(&self) -> bool {
        match self
            .client
            .head(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => {
                debug!(status = %response.status(), "connectivity probe reached backend");
                true
            }
            Err(err) => {
                debug!(error = %err, "connectivity probe failed");
                false
            }
        }
    }

    /// Poll forever, reporting the first observation and every flip after
    /// it. Meant to run on its own task for the life of the daemon.
    pub async fn run(self) {
        let mut last: Option<bool> = None;
        loop {
            let online = self.check_once().await;
            if last != Some(online) {
                last = Some(online);
                self.monitor.set_online(online);
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worksync_core::{StatusBus, StatusEvent};

    fn probe_for(url: &str, bus: Arc<StatusBus>) -> (ConnectivityProbe, Arc<ConnectivityMonitor>) {
        let monitor = Arc::new(ConnectivityMonitor::new(bus, false));
        let probe = ConnectivityProbe::new(monitor.clone(), url.to_string(), Duration::from_millis(10));
        (probe, monitor)
    }

    #[tokio::test]
    async fn reachable_backend_counts_as_online() {
        let mut server = mockito::Server::new_async().await;
        let health = server.mock("HEAD", "/health").with_status(200).create_async().await;
        let (probe, _monitor) = probe_for(&format!("{}/health", server.url()), Arc::new(StatusBus::new()));
        assert!(probe.check_once().await);
        health.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_still_counts_as_online() {
        let mut server = mockito::Server::new_async().await;
        server.mock("HEAD", "/health").with_status(500).create_async().await;
        let (probe, _monitor) = probe_for(&format!("{}/health", server.url()), Arc::new(StatusBus::new()));
        assert!(probe.check_once().await);
    }

    #[tokio::test]
    async fn unreachable_backend_counts_as_offline() {
        let (probe, monitor) = probe_for("http://127.0.0.1:1/health", Arc::new(StatusBus::new()));
        assert!(!probe.check_once().await);
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn steady_connection_reports_one_flip() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/health")
            .with_status(200)
            .expect_at_least(2)
            .create_async()
            .await;
        let bus = Arc::new(StatusBus::new());
        let mut events = bus.subscribe();
        let (probe, monitor) = probe_for(&format!("{}/health", server.url()), bus);

        let poller = tokio::spawn(probe.run());
        tokio::time::sleep(Duration::from_millis(80)).await;
        poller.abort();

        assert!(monitor.is_online());
        let mut online_events = 0;
        while let Some(event) = events.try_recv() {
            if event == StatusEvent::Online {
                online_events += 1;
            }
        }
        assert_eq!(online_events, 1);
    }
}
