use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vote_core::{ConnectionId, VotingId};
use vote_engine::{Reply, Transport, VotingService};
use vote_telemetry::{MetricsRecorder, CONNECTIONS_ACTIVE, MESSAGES_DROPPED};

use crate::handlers::{self, HandlerState};

/// A connected WebSocket client.
pub struct Client {
    pub id: ConnectionId,
    tx: mpsc::Sender<String>,
    last_pong: AtomicU64,
    groups: Mutex<HashSet<VotingId>>,
}

impl Client {
    fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            last_pong: AtomicU64::new(now_secs()),
            groups: Mutex::new(HashSet::new()),
        }
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of connected WebSocket clients and their broadcast groups.
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, Arc<Client>>,
    groups: DashMap<VotingId, HashSet<ConnectionId>>,
    max_send_queue: usize,
    metrics: Arc<MetricsRecorder>,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            clients: DashMap::new(),
            groups: DashMap::new(),
            max_send_queue,
            metrics,
        }
    }

    /// Register a new client and return its ID + outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue.max(1));
        let _ = self
            .clients
            .insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        self.metrics.gauge_inc(CONNECTIONS_ACTIVE, &[], 1);
        (id, rx)
    }

    /// Remove a client and take it out of every group it joined.
    ///
    /// Returns `false` if it was already gone. Dropping the client closes its
    /// outbound queue, which ends the socket's writer task.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let Some((_, client)) = self.clients.remove(id) else {
            return false;
        };
        let joined: Vec<VotingId> = client.groups.lock().drain().collect();
        for group in joined {
            self.leave_group(id, &group);
        }
        self.metrics.gauge_inc(CONNECTIONS_ACTIVE, &[], -1);
        true
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Queue a message for one client. Drops it if the queue is full.
    pub fn send_text(&self, client_id: &ConnectionId, message: String) -> bool {
        let Some(client) = self.get(client_id) else {
            return false;
        };
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %client_id,
                    msg_len = msg.len(),
                    "Send queue full, dropping message"
                );
                self.metrics
                    .counter_inc(MESSAGES_DROPPED, &[("reason", "queue_full")], 1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a message for every member of a group. Returns how many accepted it.
    pub fn broadcast_text(&self, group: &VotingId, message: &str) -> usize {
        let members: Vec<ConnectionId> = match self.groups.get(group) {
            Some(members) => members.iter().cloned().collect(),
            None => return 0,
        };
        members
            .iter()
            .filter(|member| self.send_text(member, message.to_string()))
            .count()
    }

    pub fn group_members(&self, group: &VotingId) -> Vec<ConnectionId> {
        self.groups
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Unregister clients that haven't answered pings within `timeout`.
    pub fn remove_dead_clients(&self, timeout: Duration) -> Vec<ConnectionId> {
        let dead: Vec<ConnectionId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive(timeout))
            .map(|entry| entry.key().clone())
            .collect();

        dead.into_iter()
            .filter(|id| {
                let removed = self.unregister(id);
                if removed {
                    tracing::info!(connection_id = %id, "Cleaned up dead client");
                }
                removed
            })
            .collect()
    }

    /// Unregister everyone, closing every socket. Used at shutdown.
    pub fn disconnect_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.clients.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.unregister(id)).count()
    }

    fn leave_group(&self, id: &ConnectionId, group: &VotingId) {
        let _ = self.groups.remove_if_mut(group, |_, members| {
            let _ = members.remove(id);
            members.is_empty()
        });
    }

    /// Add a looked-up client to a group, undoing it if the client was
    /// unregistered in the meantime.
    fn join_client(&self, client: &Client, group: &VotingId) {
        let _ = client.groups.lock().insert(group.clone());
        let _ = self
            .groups
            .entry(group.clone())
            .or_default()
            .insert(client.id.clone());
        if !self.clients.contains_key(&client.id) {
            let _ = client.groups.lock().remove(group);
            self.leave_group(&client.id, group);
        }
    }

    fn encode(reply: &Reply) -> Option<String> {
        match serde_json::to_string(reply) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize reply");
                None
            }
        }
    }
}

impl Transport for ClientRegistry {
    fn send_to(&self, connection_id: &ConnectionId, reply: &Reply) -> bool {
        Self::encode(reply).is_some_and(|json| self.send_text(connection_id, json))
    }

    fn broadcast(&self, group: &VotingId, reply: &Reply) -> usize {
        Self::encode(reply).map_or(0, |json| self.broadcast_text(group, &json))
    }

    fn join_group(&self, connection_id: &ConnectionId, group: &VotingId) {
        if let Some(client) = self.get(connection_id) {
            self.join_client(&client, group);
        }
    }

    fn drop_group(&self, group: &VotingId) {
        let Some((_, members)) = self.groups.remove(group) else {
            return;
        };
        for member in members {
            if let Some(client) = self.get(&member) {
                let _ = client.groups.lock().remove(group);
            }
        }
    }
}

/// Handle a WebSocket connection: split into reader/writer, dispatch each
/// text frame in arrival order, keep the peer alive with pings.
///
/// Returns when either side closes or the client is unregistered.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ConnectionId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    state: Arc<HandlerState>,
    heartbeat_interval: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward queued messages to the socket + periodic ping
    let writer_cid = client_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat_interval);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "Sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    // Reader task: handle each envelope to completion before the next
    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if handlers::dispatch(&state, &reader_cid, text.as_str()).is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.get(&reader_cid) {
                        client.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    let writer_abort = writer.abort_handle();
    let reader_abort = reader.abort_handle();
    tokio::select! {
        _ = writer => reader_abort.abort(),
        _ = reader => writer_abort.abort(),
    }
}

/// Periodically unregister clients that stopped answering pings and run
/// the owner-disconnect path for each.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    service: Arc<VotingService>,
    interval: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shutdown.cancelled() => break,
            }
            let dead = registry.remove_dead_clients(timeout);
            for id in &dead {
                let _ = service.on_disconnect(id);
            }
            if !dead.is_empty() {
                tracing::info!(removed = dead.len(), "Dead client cleanup");
            }
        }
    })
}
