//! Job lifecycle events as real-time broadcasts.

use async_trait::async_trait;
use courier_core::{JobEvent, JobNotifier, Topic};
use std::sync::Arc;
use tracing::warn;

use crate::dispatch::Broadcaster;

/// Broadcasts job events on `<prefix><subscription_id>`.
///
/// Only the event is sent, never the job payload.
pub struct NotificationBridge {
    broadcaster: Arc<Broadcaster>,
    topic_prefix: String,
}

impl NotificationBridge {
    pub fn new(broadcaster: Arc<Broadcaster>, topic_prefix: impl Into<String>) -> Self {
        Self {
            broadcaster,
            topic_prefix: topic_prefix.into(),
        }
    }

    /// Topic that events for `event`'s subscription are published on.
    pub fn topic_for(&self, event: &JobEvent) -> courier_core::Result<Topic> {
        Topic::prefixed(&self.topic_prefix, event.subscription_id().as_str())
    }
}

#[async_trait]
impl JobNotifier for NotificationBridge {
    async fn notify(&self, event: &JobEvent) -> usize {
        let topic = match self.topic_for(event) {
            Ok(topic) => topic,
            Err(e) => {
                warn!(job_id = %event.job_id(), error = %e, "No topic for job event");
                return 0;
            }
        };
        let data = match serde_json::to_value(event) {
            Ok(data) => data,
            Err(e) => {
                warn!(job_id = %event.job_id(), error = %e, "Failed to encode job event");
                return 0;
            }
        };
        self.broadcaster.broadcast_event(&topic, data).await
    }
}
