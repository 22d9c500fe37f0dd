use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};
use tracing::{debug, info, warn};
use worksync_core::{
    OfflineService, OperationDraft, OperationKind, PendingOperation, StatusBus, StatusEvent,
    StatusSubscription,
};
use worksync_proto::{
    chunk_frame, encode_frame, FrameAssembler, PeerMessage, WireKind, WireOperation,
};

/// Peer channel failures. None of these ever reach the sync orchestrator;
/// they end at a log line or a status event.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no peer link is established")]
    NotConnected,
    #[error("a peer link is already active")]
    AlreadyConnected,
    #[error("failed to bind peer listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("failed to reach peer at {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("peer channel write failed: {0}")]
    Send(String),
    #[error(transparent)]
    Storage(#[from] worksync_core::StorageError),
}

/// Externally visible lifecycle of the single peer link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerLinkState {
    Disconnected,
    Connecting,
    Connected { peer_name: String },
}

enum Link {
    Disconnected,
    Connecting {
        dial: u64,
    },
    Connected {
        generation: u64,
        peer_name: String,
        writer: mpsc::UnboundedSender<Message>,
    },
}

/// WebSocket mesh link to at most one nearby peer.
///
/// Either side may listen or dial; once a link is up the protocol is
/// symmetric. Outbound messages are chunked to the configured ceiling,
/// inbound chunks go through a [`FrameAssembler`]. Received snapshots are
/// only ever enqueued, never executed here.
pub struct PeerTransport {
    service: Arc<OfflineService>,
    bus: Arc<StatusBus>,
    device_name: String,
    max_chunk_bytes: usize,
    link: Mutex<Link>,
    listener: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
}

impl PeerTransport {
    pub fn new(
        service: Arc<OfflineService>,
        bus: Arc<StatusBus>,
        device_name: String,
        max_chunk_bytes: usize,
    ) -> Self {
        Self {
            service,
            bus,
            device_name,
            max_chunk_bytes,
            link: Mutex::new(Link::Disconnected),
            listener: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> PeerLinkState {
        match &*self.lock_link() {
            Link::Disconnected => PeerLinkState::Disconnected,
            Link::Connecting { .. } => PeerLinkState::Connecting,
            Link::Connected { peer_name, .. } => PeerLinkState::Connected {
                peer_name: peer_name.clone(),
            },
        }
    }

    /// Accept inbound peer connections on `addr`. Returns the bound address
    /// so callers binding port 0 learn the real one. Only one link is
    /// served at a time; extra connections are turned away.
    pub async fn listen(self: Arc<Self>, addr: &str) -> Result<SocketAddr, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        info!(addr = %local_addr, "peer listener ready");

        let this = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        if this.is_busy() {
                            debug!(%remote, "turning peer away, a link is already active");
                            continue;
                        }
                        match accept_async(stream).await {
                            Ok(socket) => {
                                if !this.clone().adopt(socket, remote.to_string(), None) {
                                    debug!(%remote, "a link came up mid-handshake, dropping socket");
                                }
                            }
                            Err(err) => {
                                warn!(%remote, error = %err, "peer handshake failed")
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "peer accept failed");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });
        if let Some(previous) = self.lock_listener().replace(task) {
            previous.abort();
        }
        Ok(local_addr)
    }

    /// Dial the peer a user picked and start the exchange: say hello, then
    /// push our queue (or ask for theirs when ours is empty). A `disconnect`
    /// issued while the dial is in flight cancels it; the socket is dropped
    /// once the handshake resolves.
    pub async fn connect(self: Arc<Self>, url: &str) -> Result<(), TransportError> {
        let dial = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut link = self.lock_link();
            if !matches!(*link, Link::Disconnected) {
                return Err(TransportError::AlreadyConnected);
            }
            *link = Link::Connecting { dial };
        }

        let socket = match connect_async(url).await {
            Ok((socket, _response)) => socket,
            Err(err) => {
                let mut link = self.lock_link();
                if matches!(*link, Link::Connecting { dial: current } if current == dial) {
                    *link = Link::Disconnected;
                }
                return Err(TransportError::Connect {
                    url: url.to_string(),
                    reason: err.to_string(),
                });
            }
        };

        if !self.clone().adopt(socket, url.to_string(), Some(dial)) {
            debug!(%url, "dial canceled before the handshake finished");
            return Ok(());
        }
        info!(%url, "peer link established");
        if let Err(err) = self.sync_with_peer() {
            warn!(error = %err, "initial peer exchange failed");
        }
        Ok(())
    }

    /// Push the current queue snapshot to the peer, chunked. Returns how
    /// many operations were sent.
    pub fn send_snapshot(&self) -> Result<usize, TransportError> {
        let pending = self.service.list_pending()?;
        let count = pending.len();
        let message = PeerMessage::Snapshot {
            operations: pending.iter().map(pending_to_wire).collect(),
            sent_at: Utc::now(),
        };
        self.send_message(&message)?;
        self.bus.publish(StatusEvent::PeerSnapshotSent { count });
        info!(count, "sent queue snapshot to peer");
        Ok(count)
    }

    /// Ask the peer to push its pending operations to us.
    pub fn request_peer_snapshot(&self) -> Result<(), TransportError> {
        self.send_message(&PeerMessage::SnapshotRequest)?;
        debug!("asked peer for its snapshot");
        Ok(())
    }

    /// One round of the exchange a user expects after picking a peer:
    /// send what we have, or request theirs when we have nothing.
    pub fn sync_with_peer(&self) -> Result<(), TransportError> {
        if self.service.pending_count()? == 0 {
            self.request_peer_snapshot()
        } else {
            self.send_snapshot().map(|_| ())
        }
    }

    /// Tear the link down. Safe to call at any time, from any state; a dial
    /// still in flight is canceled and never adopted.
    pub fn disconnect(&self) {
        let previous = {
            let mut link = self.lock_link();
            std::mem::replace(&mut *link, Link::Disconnected)
        };
        if let Link::Connected { peer_name, .. } = previous {
            // Dropping the writer ends the link task, which closes the
            // socket.
            info!(peer = %peer_name, "peer link closed");
            self.bus.publish(StatusEvent::PeerDisconnected);
        }
    }

    /// Stop listening and drop any live link.
    pub fn shutdown(&self) {
        if let Some(task) = self.lock_listener().take() {
            task.abort();
        }
        self.disconnect();
    }

    fn is_busy(&self) -> bool {
        !matches!(*self.lock_link(), Link::Disconnected)
    }

    /// Wire a fresh socket up as the active link and greet the peer. Dialed
    /// sockets carry the dial token taken in `connect`; the link is only
    /// installed while the state still matches how the socket was obtained,
    /// so a `disconnect` issued in the meantime wins. Returns whether the
    /// socket was adopted.
    fn adopt<S>(
        self: Arc<Self>,
        socket: WebSocketStream<S>,
        peer_label: String,
        dial: Option<u64>,
    ) -> bool
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (writer, outbound) = mpsc::unbounded_channel();
        let status = self.bus.subscribe();
        {
            let mut link = self.lock_link();
            let stage_matches = match (&*link, dial) {
                (Link::Connecting { dial: current }, Some(token)) => *current == token,
                (Link::Disconnected, None) => true,
                _ => false,
            };
            if !stage_matches {
                return false;
            }
            *link = Link::Connected {
                generation,
                peer_name: peer_label,
                writer,
            };
        }
        tokio::spawn(Self::run_link(self.clone(), socket, generation, outbound, status));
        if let Err(err) = self.send_message(&PeerMessage::Hello {
            device_name: self.device_name.clone(),
        }) {
            warn!(error = %err, "failed to greet peer");
        }
        true
    }

    /// Single task owning both directions of one link. Ends when the socket
    /// drops, the peer closes, or our writer side is released. Also watches
    /// the status bus so work queued locally while the link is up goes
    /// straight to the peer.
    async fn run_link<S>(
        this: Arc<Self>,
        socket: WebSocketStream<S>,
        generation: u64,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        mut status: StatusSubscription,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = socket.split();
        let mut assembler = FrameAssembler::new();

        loop {
            tokio::select! {
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Binary(chunk))) => {
                            match assembler.feed(&chunk) {
                                Ok(messages) => {
                                    for message in messages {
                                        this.handle_message(message, generation).await;
                                    }
                                }
                                Err(err) => {
                                    warn!(error = %err, "discarded malformed peer data");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("peer closed the link");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(error = %err, "peer socket error");
                            break;
                        }
                    }
                }
                outgoing = outbound.recv() => {
                    match outgoing {
                        Some(message) => {
                            if let Err(err) = sink.send(message).await {
                                warn!(error = %err, "peer write failed");
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
                event = status.recv() => {
                    match event {
                        Some(StatusEvent::OperationQueued { .. }) => {
                            if let Err(err) = this.sync_with_peer() {
                                warn!(error = %err, "queued-work push to peer failed");
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }

        this.finish_link(generation);
    }

    async fn handle_message(&self, message: PeerMessage, generation: u64) {
        match message {
            PeerMessage::Hello { device_name } => {
                if self.note_peer_name(generation, &device_name) {
                    info!(peer = %device_name, "peer connected");
                    self.bus.publish(StatusEvent::PeerConnected {
                        peer_name: device_name,
                    });
                }
            }
            PeerMessage::Snapshot { operations, sent_at } => {
                let received = operations.len();
                debug!(count = received, %sent_at, "received peer snapshot");
                let drafts = operations.into_iter().map(wire_to_draft).collect();
                match self.service.ingest_peer_operations(drafts) {
                    Ok(report) => {
                        if let Err(err) = self.send_message(&PeerMessage::Ack { received }) {
                            debug!(error = %err, "could not acknowledge snapshot");
                        }
                        if self.service.is_online() {
                            match self.service.sync_now().await {
                                Ok(drained) => debug!(
                                    synced = drained.synced,
                                    errors = drained.errors,
                                    "drained queue after peer ingest"
                                ),
                                Err(err) => debug!(error = %err, "post-ingest drain skipped"),
                            }
                        }
                        debug!(
                            accepted = report.accepted,
                            duplicates = report.duplicates,
                            "peer snapshot stored"
                        );
                    }
                    Err(err) => warn!(error = %err, "failed to store peer snapshot"),
                }
            }
            PeerMessage::SnapshotRequest => {
                debug!("peer asked for our snapshot");
                if let Err(err) = self.send_snapshot() {
                    warn!(error = %err, "failed to answer snapshot request");
                }
            }
            PeerMessage::Ack { received } => {
                debug!(received, "peer acknowledged snapshot");
            }
        }
    }

    /// Queue one protocol message for the active link, returning the number
    /// of chunks written.
    fn send_message(&self, message: &PeerMessage) -> Result<usize, TransportError> {
        let frame = encode_frame(message).map_err(|e| TransportError::Send(e.to_string()))?;
        let chunks = chunk_frame(&frame, self.max_chunk_bytes);
        let link = self.lock_link();
        let Link::Connected { writer, .. } = &*link else {
            return Err(TransportError::NotConnected);
        };
        let count = chunks.len();
        for chunk in chunks {
            writer
                .send(Message::Binary(chunk))
                .map_err(|_| TransportError::Send("peer link is closing".to_string()))?;
        }
        Ok(count)
    }

    fn note_peer_name(&self, generation: u64, name: &str) -> bool {
        let mut link = self.lock_link();
        if let Link::Connected {
            generation: current,
            peer_name,
            ..
        } = &mut *link
        {
            if *current == generation {
                *peer_name = name.to_string();
                return true;
            }
        }
        false
    }

    /// Reset state after a link task ends, unless a newer link took over.
    fn finish_link(&self, generation: u64) {
        let dropped = {
            let mut link = self.lock_link();
            match &*link {
                Link::Connected {
                    generation: current,
                    peer_name,
                    ..
                } if *current == generation => {
                    let name = peer_name.clone();
                    *link = Link::Disconnected;
                    Some(name)
                }
                _ => None,
            }
        };
        if let Some(name) = dropped {
            info!(peer = %name, "peer link dropped");
            self.bus.publish(StatusEvent::PeerDisconnected);
        }
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn wire_to_draft(op: WireOperation) -> OperationDraft {
    OperationDraft {
        kind: match op.kind {
            WireKind::Create => OperationKind::Create,
            WireKind::Update => OperationKind::Update,
            WireKind::Delete => OperationKind::Delete,
        },
        collection: op.collection,
        record_id: op.record_id,
        payload: op.payload,
    }
}

fn pending_to_wire(op: &PendingOperation) -> WireOperation {
    WireOperation {
        kind: match op.kind {
            OperationKind::Create => WireKind::Create,
            OperationKind::Update => WireKind::Update,
            OperationKind::Delete => WireKind::Delete,
        },
        collection: op.collection.clone(),
        record_id: op.record_id.clone(),
        payload: op.payload.clone(),
    }
}
