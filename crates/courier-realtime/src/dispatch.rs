//! Broadcast dispatcher.

use courier_core::{ConnectionId, Error, Result, Topic};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::message::{Envelope, EnvelopeKind};
use crate::registry::{ConnectionRegistry, Frame};

/// Fans envelopes out to topic subscribers.
///
/// Every broadcast passes through one dispatch lane, which stamps the
/// envelope sequence and queues frames in call order. Each connection
/// therefore receives broadcasts in the order they were made.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    lane: Mutex<u64>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            lane: Mutex::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Deliver `data` as a `message` to every subscriber of `topic`.
    ///
    /// Returns how many connections it was handed to; zero subscribers is
    /// not an error.
    pub async fn broadcast(&self, topic: &Topic, data: Value) -> usize {
        self.publish(Some(topic), Envelope::new(EnvelopeKind::Message, data))
            .await
    }

    /// Deliver `data` as a `notification` to every subscriber of `topic`.
    pub async fn broadcast_notification(&self, topic: &Topic, data: Value) -> usize {
        self.publish(Some(topic), Envelope::notification(data)).await
    }

    /// Deliver `data` as an `event` to every subscriber of `topic`.
    pub async fn broadcast_event(&self, topic: &Topic, data: Value) -> usize {
        self.publish(Some(topic), Envelope::event(data)).await
    }

    /// Deliver `data` as a `notification` to every open connection.
    pub async fn broadcast_all(&self, data: Value) -> usize {
        self.publish(None, Envelope::notification(data)).await
    }

    /// Send one envelope straight to a single connection.
    pub async fn send_personal(&self, id: ConnectionId, envelope: &Envelope) -> Result<()> {
        let frame = encode(envelope)?;
        self.registry.send_to(id, frame).await
    }

    async fn publish(&self, topic: Option<&Topic>, mut envelope: Envelope) -> usize {
        if let Some(topic) = topic {
            envelope = envelope.with_topic(topic.clone());
        }

        let outcome = {
            let mut sequence = self.lane.lock().await;
            *sequence += 1;
            envelope.sequence = Some(*sequence);
            let frame = match encode(&envelope) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Dropping unencodable broadcast");
                    return 0;
                }
            };
            self.registry.fan_out(topic, &frame).await
        };

        for id in &outcome.failed {
            warn!(conn_id = %id, "Delivery failed, dropping connection");
            self.registry.deregister(*id).await;
        }
        debug!(
            topic = topic.map(Topic::as_str).unwrap_or("*"),
            sequence = envelope.sequence,
            delivered = outcome.delivered,
            failed = outcome.failed.len(),
            "Broadcast dispatched"
        );
        outcome.delivered
    }
}

fn encode(envelope: &Envelope) -> Result<Frame> {
    let text = serde_json::to_string(envelope)
        .map_err(|e| Error::Internal(format!("failed to encode envelope: {}", e)))?;
    Ok(Frame::Text(Arc::from(text)))
}
