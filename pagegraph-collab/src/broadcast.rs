//! Cross-tab fan-out of confirmed graph changes.
//!
//! One `TabHub` per client instance; every session of that client joins it
//! and gets a `TabLink`. Frames are encoded once and shared as
//! `Arc<Vec<u8>>` across receivers. A link skips frames carrying its own
//! sender tag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use pagegraph_core::RemoteUpdate;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{BroadcastMessage, Envelope, MessageType, ProtocolError};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames buffered per receiver before a slow link starts lagging. Default: 256.
    pub capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl HubConfig {
    /// Config for testing (tiny buffer so lag paths are reachable).
    pub fn for_testing() -> Self {
        Self { capacity: 8 }
    }
}

/// Statistics for monitoring hub health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_sessions: usize,
}

struct AtomicHubStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicHubStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// Broadcast hub for one client instance.
pub struct TabHub {
    client_id: Uuid,
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    sessions: RwLock<HashMap<Uuid, u64>>,
    capacity: usize,
    stats: Arc<AtomicHubStats>,
}

impl TabHub {
    pub fn new(client_id: Uuid, config: HubConfig) -> Self {
        let (sender, _) = broadcast::channel(config.capacity);
        Self {
            client_id,
            sender,
            sessions: RwLock::new(HashMap::new()),
            capacity: config.capacity,
            stats: Arc::new(AtomicHubStats::new()),
        }
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Join with a fresh sender tag.
    pub async fn join(self: &Arc<Self>) -> TabLink {
        let tag = Uuid::new_v4();
        let receiver = self.sender.subscribe();
        self.sessions.write().await.insert(tag, 0);
        self.send_frame(&Envelope::session_joined(self.client_id, tag));
        debug!("session {tag} joined hub {}", self.client_id);
        TabLink {
            tag,
            hub: Arc::clone(self),
            receiver,
        }
    }

    /// Drop a session's registration. Its receiver stops mattering once the
    /// link is dropped.
    pub async fn leave(&self, tag: &Uuid) -> bool {
        let removed = self.sessions.write().await.remove(tag).is_some();
        if removed {
            self.send_frame(&Envelope::session_left(self.client_id, *tag));
        }
        removed
    }

    /// Publish an update from `message.sender_tag`. Returns the number of
    /// receivers that got the frame (the sender's own link included).
    pub async fn publish(&self, message: &BroadcastMessage) -> Result<usize, ProtocolError> {
        let clock = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(&message.sender_tag) {
                Some(clock) => {
                    *clock += 1;
                    *clock
                }
                None => 0,
            }
        };
        let envelope = Envelope::update(self.client_id, clock, message)?;
        let encoded = envelope.encode()?;
        Ok(self.publish_raw(Arc::new(encoded)))
    }

    /// Publish pre-encoded bytes directly.
    pub fn publish_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    fn send_frame(&self, envelope: &Envelope) {
        match envelope.encode() {
            Ok(bytes) => {
                self.sender.send(Arc::new(bytes)).ok();
            }
            Err(e) => warn!("dropping hub frame: {e}"),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn has_session(&self, tag: &Uuid) -> bool {
        self.sessions.read().await.contains_key(tag)
    }

    pub async fn stats(&self) -> HubStats {
        let sessions = self.sessions.read().await;
        HubStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_sessions: sessions.len(),
        }
    }

    fn record_dropped(&self, count: u64) {
        self.stats.messages_dropped.fetch_add(count, Ordering::Relaxed);
    }
}

/// A session's handle on its hub.
pub struct TabLink {
    tag: Uuid,
    hub: Arc<TabHub>,
    receiver: broadcast::Receiver<Arc<Vec<u8>>>,
}

impl TabLink {
    pub fn tag(&self) -> Uuid {
        self.tag
    }

    pub fn hub(&self) -> &Arc<TabHub> {
        &self.hub
    }

    /// Publish an update under this link's tag.
    pub async fn publish(&self, update: RemoteUpdate) -> Result<usize, ProtocolError> {
        self.hub.publish(&BroadcastMessage::new(update, self.tag)).await
    }

    /// Next update from another session, if one is buffered.
    pub fn try_next(&mut self) -> Result<Option<BroadcastMessage>, ProtocolError> {
        loop {
            match self.receiver.try_recv() {
                Ok(bytes) => {
                    if let Some(message) = self.accept(&bytes)? {
                        return Ok(Some(message));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("link {} lagged, {skipped} frames dropped", self.tag);
                    self.hub.record_dropped(skipped);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(ProtocolError::ConnectionClosed)
                }
            }
        }
    }

    /// Wait for the next update from another session.
    pub async fn next(&mut self) -> Result<BroadcastMessage, ProtocolError> {
        loop {
            match self.receiver.recv().await {
                Ok(bytes) => {
                    if let Some(message) = self.accept(&bytes)? {
                        return Ok(message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("link {} lagged, {skipped} frames dropped", self.tag);
                    self.hub.record_dropped(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ProtocolError::ConnectionClosed)
                }
            }
        }
    }

    fn accept(&self, bytes: &[u8]) -> Result<Option<BroadcastMessage>, ProtocolError> {
        let envelope = Envelope::decode(bytes)?;
        if envelope.sender_tag == self.tag || envelope.msg_type != MessageType::Update {
            return Ok(None);
        }
        envelope.message().map(Some)
    }
}

/// Maps client-instance ids to hubs so different clients never share
/// traffic.
pub struct HubRegistry {
    hubs: RwLock<HashMap<Uuid, Arc<TabHub>>>,
    config: HubConfig,
}

impl HubRegistry {
    pub fn new(config: HubConfig) -> Self {
        Self {
            hubs: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get or create the hub for `client_id`.
    pub async fn get_or_create(&self, client_id: Uuid) -> Arc<TabHub> {
        // Fast path: read lock
        {
            let hubs = self.hubs.read().await;
            if let Some(hub) = hubs.get(&client_id) {
                return hub.clone();
            }
        }

        let mut hubs = self.hubs.write().await;
        if let Some(hub) = hubs.get(&client_id) {
            return hub.clone();
        }
        let hub = Arc::new(TabHub::new(client_id, self.config.clone()));
        hubs.insert(client_id, hub.clone());
        hub
    }

    /// Remove a hub nobody is joined to.
    pub async fn remove_if_empty(&self, client_id: &Uuid) -> bool {
        let mut hubs = self.hubs.write().await;
        if let Some(hub) = hubs.get(client_id) {
            if hub.session_count().await == 0 {
                hubs.remove(client_id);
                return true;
            }
        }
        false
    }

    pub async fn hub_count(&self) -> usize {
        self.hubs.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagegraph_core::{EdgeId, RemoteUpdate, VertexId};

    fn hub() -> Arc<TabHub> {
        Arc::new(TabHub::new(Uuid::new_v4(), HubConfig::for_testing()))
    }

    #[tokio::test]
    async fn test_join_and_leave() {
        let hub = hub();
        let link = hub.join().await;
        assert_eq!(hub.session_count().await, 1);
        assert!(hub.has_session(&link.tag()).await);

        assert!(hub.leave(&link.tag()).await);
        assert_eq!(hub.session_count().await, 0);
        assert!(!hub.leave(&link.tag()).await);
    }

    #[tokio::test]
    async fn test_link_skips_own_messages() {
        let hub = hub();
        let mut alice = hub.join().await;
        let mut bob = hub.join().await;

        alice.publish(RemoteUpdate::DeleteVertex(VertexId(3))).await.unwrap();

        assert_eq!(alice.try_next().unwrap(), None);
        let received = bob.try_next().unwrap().unwrap();
        assert_eq!(received.update, RemoteUpdate::DeleteVertex(VertexId(3)));
        assert_eq!(received.sender_tag, alice.tag());
    }

    #[tokio::test]
    async fn test_async_next_waits_for_peer() {
        let hub = hub();
        let alice = hub.join().await;
        let mut bob = hub.join().await;

        let sender = tokio::spawn(async move {
            alice.publish(RemoteUpdate::DeleteEdge(EdgeId(1))).await.unwrap();
        });
        let message = bob.next().await.unwrap();
        assert_eq!(message.update, RemoteUpdate::DeleteEdge(EdgeId(1)));
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_lagging_link_counts_drops() {
        let hub = hub();
        let alice = hub.join().await;
        let mut bob = hub.join().await;

        for i in 0..20 {
            alice.publish(RemoteUpdate::DeleteEdge(EdgeId(i))).await.unwrap();
        }
        let mut received = 0;
        while bob.try_next().unwrap().is_some() {
            received += 1;
        }
        assert!(received <= 8);
        assert!(hub.stats().await.messages_dropped > 0);
    }

    #[tokio::test]
    async fn test_registry_isolates_clients() {
        let registry = HubRegistry::new(HubConfig::for_testing());
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let hub_a = registry.get_or_create(first).await;
        let hub_b = registry.get_or_create(second).await;
        assert!(Arc::ptr_eq(&hub_a, &registry.get_or_create(first).await));
        assert_eq!(registry.hub_count().await, 2);

        let alice = hub_a.join().await;
        let mut stranger = hub_b.join().await;
        alice.publish(RemoteUpdate::DeleteVertex(VertexId(1))).await.unwrap();
        assert_eq!(stranger.try_next().unwrap(), None);
    }

    #[tokio::test]
    async fn test_registry_cleanup() {
        let registry = HubRegistry::new(HubConfig::default());
        let client = Uuid::new_v4();
        let hub = registry.get_or_create(client).await;
        let link = hub.join().await;

        assert!(!registry.remove_if_empty(&client).await);
        hub.leave(&link.tag()).await;
        assert!(registry.remove_if_empty(&client).await);
        assert_eq!(registry.hub_count().await, 0);
    }
}
