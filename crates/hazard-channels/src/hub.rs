//! Console connection hub
//!
//! Tracks the sessions connected to one channel and fans pushes out to all
//! of them.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Broadcast channel capacity
pub const BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug)]
struct ClientState {
    peer: SocketAddr,
    connected_at: DateTime<Utc>,
}

/// Broadcast hub for one console channel
pub struct ConsoleHub<M> {
    name: &'static str,
    broadcast_tx: broadcast::Sender<M>,
    clients: DashMap<Uuid, ClientState>,
    message_count: AtomicUsize,
}

impl<M: Clone + Send + 'static> ConsoleHub<M> {
    pub fn new(name: &'static str) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            name,
            broadcast_tx,
            clients: DashMap::new(),
            message_count: AtomicUsize::new(0),
        }
    }

    /// Register a session and return its push receiver
    pub fn register_client(&self, client_id: Uuid, peer: SocketAddr) -> broadcast::Receiver<M> {
        self.clients.insert(
            client_id,
            ClientState {
                peer,
                connected_at: Utc::now(),
            },
        );
        info!(
            channel = self.name,
            "Client {} ({}) registered ({} total)",
            client_id,
            peer,
            self.clients.len()
        );

        self.broadcast_tx.subscribe()
    }

    pub fn unregister_client(&self, client_id: Uuid) {
        if let Some((_, state)) = self.clients.remove(&client_id) {
            let connected_for = Utc::now().signed_duration_since(state.connected_at);
            info!(
                channel = self.name,
                "Client {} ({}) unregistered after {}s ({} remaining)",
                client_id,
                state.peer,
                connected_for.num_seconds(),
                self.clients.len()
            );
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Push a message to every connected session
    pub fn broadcast(&self, message: M) {
        self.message_count.fetch_add(1, Ordering::Relaxed);

        // Err only means no session is connected
        if self.broadcast_tx.send(message).is_err() {
            debug!(channel = self.name, "Push dropped, no clients connected");
        }
    }

    pub fn message_count(&self) -> usize {
        self.message_count.load(Ordering::Relaxed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
