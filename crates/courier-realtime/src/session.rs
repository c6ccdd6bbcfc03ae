//! Per-connection handling of client control messages.

use courier_core::{ConnectionId, Result, Topic};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::dispatch::Broadcaster;
use crate::message::{ClientCommand, Envelope, EnvelopeKind};
use crate::registry::ConnectionRegistry;

/// One open real-time connection as seen from the server side.
///
/// The transport feeds inbound text frames to [`Session::handle_text`];
/// replies are queued through the registry like any other outbound frame.
pub struct Session {
    id: ConnectionId,
    broadcaster: Arc<Broadcaster>,
    reserved_prefix: Option<Arc<str>>,
}

impl Session {
    pub fn new(id: ConnectionId, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            id,
            broadcaster,
            reserved_prefix: None,
        }
    }

    /// Refuse client subscribes to topics starting with `prefix`.
    ///
    /// Personal user topics live under this prefix and are only joined
    /// through [`Session::join_user_topic`].
    pub fn with_reserved_prefix(mut self, prefix: impl Into<Arc<str>>) -> Self {
        self.reserved_prefix = Some(prefix.into());
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.broadcaster.registry()
    }

    /// Subscribe to a user's personal topic and greet them.
    pub async fn join_user_topic(&self, topic: &Topic, user_id: &str) -> Result<()> {
        self.registry().subscribe(self.id, topic).await?;
        info!(conn_id = %self.id, user_id, topic = %topic, "User connected");
        self.reply(Envelope::notification(json!({
            "message": "connected",
            "connection_id": self.id,
            "user_id": user_id,
            "topic": topic,
        })))
        .await
    }

    /// Handle one inbound text frame.
    ///
    /// Malformed input is answered with an `error` envelope; the connection
    /// stays open. Only a failure to queue the reply is returned.
    pub async fn handle_text(&self, text: &str) -> Result<()> {
        let command = match ClientCommand::parse(text) {
            Ok(command) => command,
            Err(message) => {
                debug!(conn_id = %self.id, %message, "Rejected client message");
                return self.reply(Envelope::error(message)).await;
            }
        };

        match command {
            ClientCommand::Subscribe { topic } => {
                if self.is_reserved(&topic) {
                    debug!(conn_id = %self.id, topic = %topic, "Refused reserved topic");
                    return self
                        .reply(Envelope::error(format!("topic {} is reserved", topic)))
                        .await;
                }
                self.registry().subscribe(self.id, &topic).await?;
                self.reply(Envelope::notification(json!({ "subscribed": topic })))
                    .await
            }
            ClientCommand::Unsubscribe { topic } => {
                self.registry().unsubscribe(self.id, &topic).await?;
                self.reply(Envelope::notification(json!({ "unsubscribed": topic })))
                    .await
            }
            ClientCommand::Message(data) => {
                self.reply(Envelope::new(EnvelopeKind::Message, data)).await
            }
            ClientCommand::Ping => self.reply(Envelope::event(json!({ "event": "pong" }))).await,
        }
    }

    /// Leave the registry. Safe to call more than once.
    pub async fn close(&self) {
        self.registry().deregister(self.id).await;
    }

    fn is_reserved(&self, topic: &Topic) -> bool {
        self.reserved_prefix
            .as_deref()
            .is_some_and(|prefix| topic.as_str().starts_with(prefix))
    }

    async fn reply(&self, envelope: Envelope) -> Result<()> {
        self.broadcaster.send_personal(self.id, &envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Frame;
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn open() -> (Session, Arc<ConnectionRegistry>, UnboundedReceiver<Frame>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry.clone()));
        let (id, rx) = registry.register().await;
        (Session::new(id, broadcaster), registry, rx)
    }

    fn next(rx: &mut UnboundedReceiver<Frame>) -> Value {
        match rx.try_recv().unwrap() {
            Frame::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let (session, registry, mut rx) = open().await;
        let topic: Topic = "news".parse().unwrap();

        session
            .handle_text(r#"{"type":"subscribe","data":{"topic":"news"}}"#)
            .await
            .unwrap();
        assert_eq!(next(&mut rx)["data"]["subscribed"], "news");
        assert_eq!(registry.topic_count(&topic).await, 1);

        session
            .handle_text(r#"{"type":"unsubscribe","data":{"topic":"news"}}"#)
            .await
            .unwrap();
        assert_eq!(next(&mut rx)["data"]["unsubscribed"], "news");
        assert_eq!(registry.topic_count(&topic).await, 0);
    }

    #[tokio::test]
    async fn test_ping_gets_pong_and_message_is_echoed() {
        let (session, _registry, mut rx) = open().await;

        session.handle_text(r#"{"type":"ping"}"#).await.unwrap();
        let pong = next(&mut rx);
        assert_eq!(pong["type"], "event");
        assert_eq!(pong["data"]["event"], "pong");

        session
            .handle_text(r#"{"type":"message","data":{"text":"hi"}}"#)
            .await
            .unwrap();
        let echo = next(&mut rx);
        assert_eq!(echo["type"], "message");
        assert_eq!(echo["data"]["text"], "hi");
    }

    #[tokio::test]
    async fn test_garbage_gets_error_and_connection_stays_open() {
        let (session, registry, mut rx) = open().await;

        session.handle_text("{{{").await.unwrap();
        assert_eq!(next(&mut rx)["type"], "error");
        session.handle_text(r#"{"type":"dance"}"#).await.unwrap();
        assert_eq!(next(&mut rx)["type"], "error");
        assert!(registry.is_open(session.id()).await);
    }

    #[tokio::test]
    async fn test_user_topics_cannot_be_subscribed_directly() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry.clone()));
        let user_topic: Topic = "user.42".parse().unwrap();

        let (owner_id, mut owner_rx) = registry.register().await;
        let owner = Session::new(owner_id, broadcaster.clone()).with_reserved_prefix("user.");
        owner.join_user_topic(&user_topic, "42").await.unwrap();
        next(&mut owner_rx);

        let (other_id, mut other_rx) = registry.register().await;
        let other = Session::new(other_id, broadcaster.clone()).with_reserved_prefix("user.");
        other
            .handle_text(r#"{"type":"subscribe","data":{"topic":"user.42"}}"#)
            .await
            .unwrap();
        assert_eq!(next(&mut other_rx)["type"], "error");
        assert!(registry.topics_of(other_id).await.unwrap().is_empty());

        let delivered = broadcaster
            .broadcast_notification(&user_topic, json!({"private": true}))
            .await;
        assert_eq!(delivered, 1);
        assert!(other_rx.try_recv().is_err());
        assert_eq!(next(&mut owner_rx)["data"]["private"], true);
    }

    #[tokio::test]
    async fn test_join_user_topic_sends_welcome() {
        let (session, registry, mut rx) = open().await;
        let topic: Topic = "user.42".parse().unwrap();

        session.join_user_topic(&topic, "42").await.unwrap();
        let welcome = next(&mut rx);
        assert_eq!(welcome["type"], "notification");
        assert_eq!(welcome["data"]["user_id"], "42");
        assert_eq!(registry.topics_of(session.id()).await.unwrap(), vec![topic]);

        session.close().await;
        session.close().await;
        assert!(!registry.is_open(session.id()).await);
    }
}
