//! Wire format of the real-time channel.

use chrono::{DateTime, Utc};
use courier_core::{ResourceId, Topic};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

/// Kind of server-to-client envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Message,
    Notification,
    Event,
    Error,
}

/// Server-to-client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Topic>,
    pub data: Value,
    pub message_id: ResourceId,
    pub timestamp: DateTime<Utc>,
    /// Dispatch order of broadcasts; absent on direct replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, data: Value) -> Self {
        Self {
            kind,
            topic: None,
            data,
            message_id: ResourceId::new(),
            timestamp: Utc::now(),
            sequence: None,
        }
    }

    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topic = Some(topic);
        self
    }

    pub fn notification(data: Value) -> Self {
        Self::new(EnvelopeKind::Notification, data)
    }

    pub fn event(data: Value) -> Self {
        Self::new(EnvelopeKind::Event, data)
    }

    pub fn error(message: impl fmt::Display) -> Self {
        Self::new(EnvelopeKind::Error, json!({ "message": message.to_string() }))
    }
}

/// Client-to-server control message, `{"type": ..., "data": ...}` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
    /// Free-form message, echoed back to the sender.
    Message(Value),
    Ping,
}

#[derive(Deserialize)]
struct RawCommand {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct TopicData {
    topic: Topic,
}

impl ClientCommand {
    /// Parse a text frame. Errors are human-readable and meant for an
    /// `error` envelope.
    pub fn parse(text: &str) -> Result<Self, String> {
        let raw: RawCommand =
            serde_json::from_str(text).map_err(|e| format!("invalid message: {}", e))?;
        match raw.kind.as_str() {
            "subscribe" => Ok(ClientCommand::Subscribe {
                topic: topic_from(raw.data)?,
            }),
            "unsubscribe" => Ok(ClientCommand::Unsubscribe {
                topic: topic_from(raw.data)?,
            }),
            "message" => Ok(ClientCommand::Message(raw.data)),
            "ping" => Ok(ClientCommand::Ping),
            other => Err(format!("unknown message type: {}", other)),
        }
    }
}

fn topic_from(data: Value) -> Result<Topic, String> {
    serde_json::from_value::<TopicData>(data)
        .map(|d| d.topic)
        .map_err(|e| format!("invalid topic: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe() {
        let cmd = ClientCommand::parse(r#"{"type":"subscribe","data":{"topic":"news"}}"#).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Subscribe {
                topic: "news".parse().unwrap()
            }
        );
    }

    #[test]
    fn ping_needs_no_data() {
        assert_eq!(
            ClientCommand::parse(r#"{"type":"ping"}"#).unwrap(),
            ClientCommand::Ping
        );
    }

    #[test]
    fn rejects_unknown_type_and_bad_topic() {
        let err = ClientCommand::parse(r#"{"type":"shout"}"#).unwrap_err();
        assert!(err.contains("shout"));
        assert!(ClientCommand::parse(r#"{"type":"subscribe","data":{"topic":"a b"}}"#).is_err());
        assert!(ClientCommand::parse(r#"{"type":"subscribe"}"#).is_err());
        assert!(ClientCommand::parse("not json").is_err());
    }

    #[test]
    fn envelope_omits_absent_fields() {
        let value = serde_json::to_value(Envelope::notification(json!({"hello": 1}))).unwrap();
        assert_eq!(value["type"], "notification");
        assert!(value.get("topic").is_none());
        assert!(value.get("sequence").is_none());
        assert!(value.get("message_id").is_some());
    }

    #[test]
    fn error_envelope_carries_message() {
        let value = serde_json::to_value(Envelope::error("nope")).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["message"], "nope");
    }
}
