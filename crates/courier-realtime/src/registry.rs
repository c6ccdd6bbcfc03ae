//! Registry of live real-time connections and their topic subscriptions.

use chrono::{DateTime, Utc};
use courier_core::{ConnectionId, Error, Result, Topic};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

/// Outbound frame queued for a connection, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(Arc<str>),
    Ping,
    Close,
}

/// Channel sender half for pushing frames to one connection.
pub type FrameSender = mpsc::UnboundedSender<Frame>;

struct Entry {
    sender: FrameSender,
    topics: HashSet<Topic>,
    connected_at: DateTime<Utc>,
}

/// Connection set and topic index, always changed together.
#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Entry>,
    topics: HashMap<Topic, HashSet<ConnectionId>>,
}

impl Inner {
    fn unindex(&mut self, id: ConnectionId, topic: &Topic) {
        if let Some(members) = self.topics.get_mut(topic) {
            members.remove(&id);
            if members.is_empty() {
                self.topics.remove(topic);
            }
        }
    }
}

/// Snapshot of registry occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub connections: usize,
    /// Subscriber count per topic.
    pub topics: BTreeMap<String, usize>,
}

/// Result of handing one frame to a set of connections.
#[derive(Debug, Default)]
pub(crate) struct FanOut {
    pub delivered: usize,
    pub failed: Vec<ConnectionId>,
}

/// Tracks every open connection.
///
/// A connection is present here exactly while it is open; the topic index
/// never references a connection that is not in the connection map.
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Open a connection with an empty topic set.
    ///
    /// Returns the receiver the transport drains to write frames out.
    pub async fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Frame>) {
        let id = ConnectionId::new();
        let rx = self.register_with_id(id).await;
        (id, rx)
    }

    /// Open a connection under a caller-chosen id, replacing any previous
    /// connection that used it.
    pub async fn register_with_id(&self, id: ConnectionId) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        let entry = Entry {
            sender: tx,
            topics: HashSet::new(),
            connected_at: Utc::now(),
        };

        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.connections.insert(id, entry) {
            for topic in &previous.topics {
                inner.unindex(id, topic);
            }
            let _ = previous.sender.send(Frame::Close);
        }
        debug!(conn_id = %id, total = inner.connections.len(), "Connection registered");
        rx
    }

    /// Add `topic` to an open connection. Subscribing twice is harmless.
    pub async fn subscribe(&self, id: ConnectionId, topic: &Topic) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .connections
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("connection {}", id)))?;
        entry.topics.insert(topic.clone());
        inner.topics.entry(topic.clone()).or_default().insert(id);
        debug!(conn_id = %id, topic = %topic, "Subscribed");
        Ok(())
    }

    /// Remove `topic` from an open connection.
    ///
    /// Once this returns, no later broadcast to `topic` reaches the connection.
    pub async fn unsubscribe(&self, id: ConnectionId, topic: &Topic) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .connections
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("connection {}", id)))?;
        if entry.topics.remove(topic) {
            inner.unindex(id, topic);
        }
        debug!(conn_id = %id, topic = %topic, "Unsubscribed");
        Ok(())
    }

    /// Close a connection and drop it from every topic. Idempotent.
    ///
    /// Returns whether the connection was still open.
    pub async fn deregister(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.connections.remove(&id) else {
            return false;
        };
        for topic in &entry.topics {
            inner.unindex(id, topic);
        }
        let open_for = Utc::now() - entry.connected_at;
        debug!(
            conn_id = %id,
            open_secs = open_for.num_seconds(),
            total = inner.connections.len(),
            "Connection deregistered"
        );
        true
    }

    pub async fn is_open(&self, id: ConnectionId) -> bool {
        self.inner.read().await.connections.contains_key(&id)
    }

    /// Topics of an open connection, sorted.
    pub async fn topics_of(&self, id: ConnectionId) -> Result<Vec<Topic>> {
        let inner = self.inner.read().await;
        let entry = inner
            .connections
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("connection {}", id)))?;
        let mut topics: Vec<Topic> = entry.topics.iter().cloned().collect();
        topics.sort();
        Ok(topics)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Number of connections subscribed to `topic`.
    pub async fn topic_count(&self, topic: &Topic) -> usize {
        self.inner
            .read()
            .await
            .topics
            .get(topic)
            .map_or(0, HashSet::len)
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        RegistryStats {
            connections: inner.connections.len(),
            topics: inner
                .topics
                .iter()
                .map(|(topic, members)| (topic.to_string(), members.len()))
                .collect(),
        }
    }

    /// Queue a frame for one connection.
    pub async fn send_to(&self, id: ConnectionId, frame: Frame) -> Result<()> {
        let inner = self.inner.read().await;
        let entry = inner
            .connections
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("connection {}", id)))?;
        entry
            .sender
            .send(frame)
            .map_err(|_| Error::NotFound(format!("connection {} is closing", id)))
    }

    /// Send a Close frame to every connection, then clear the registry.
    pub async fn shutdown_all(&self) -> usize {
        let mut inner = self.inner.write().await;
        let count = inner.connections.len();
        for entry in inner.connections.values() {
            let _ = entry.sender.send(Frame::Close);
        }
        inner.connections.clear();
        inner.topics.clear();
        info!(count, "Closed all real-time connections");
        count
    }

    /// Send a Ping frame to every connection.
    ///
    /// Connections whose channel is closed are deregistered. Returns how
    /// many pings were queued.
    pub async fn ping_all(&self) -> usize {
        let result = self.fan_out(None, &Frame::Ping).await;
        for id in &result.failed {
            debug!(conn_id = %id, "Ping failed, dropping connection");
            self.deregister(*id).await;
        }
        result.delivered
    }

    /// Hand `frame` to the subscribers of `topic`, or to everyone when
    /// `topic` is `None`.
    ///
    /// Runs entirely under the read lock, so membership cannot change while
    /// frames are being queued.
    pub(crate) async fn fan_out(&self, topic: Option<&Topic>, frame: &Frame) -> FanOut {
        let inner = self.inner.read().await;
        let mut result = FanOut::default();
        let mut deliver = |id: &ConnectionId| match inner.connections.get(id) {
            Some(entry) if entry.sender.send(frame.clone()).is_ok() => result.delivered += 1,
            _ => result.failed.push(*id),
        };

        match topic {
            Some(topic) => {
                if let Some(members) = inner.topics.get(topic) {
                    members.iter().for_each(&mut deliver);
                }
            }
            None => inner.connections.keys().for_each(&mut deliver),
        }
        result
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
