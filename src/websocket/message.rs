use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::store::{LineSnapshot, StoreSnapshot};

/// Envelope `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Init,
    Delete,
    New,
    Update,
    Line,
    Error,
    Shutdown,
    Heartbeat,
    #[serde(other)]
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Init => "init",
            MessageType::Delete => "delete",
            MessageType::New => "new",
            MessageType::Update => "update",
            MessageType::Line => "line",
            MessageType::Error => "error",
            MessageType::Shutdown => "shutdown",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Unknown => "unknown",
        }
    }
}

/// Envelope `resource` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Feedback,
    Question,
    Line,
}

/// The single message shape used in both directions:
/// `{ "type", "resource", "id", "data" }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub resource: Option<Resource>,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            resource: None,
            id: None,
            data: Value::Null,
        }
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Ids arrive as strings from socket clients and as numbers from older web clients.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    }))
}

/// `data` of `new`/`feedback`
#[derive(Debug, Clone, Deserialize)]
pub struct NewFeedback {
    pub student: String,
    pub feedback: String,
}

/// `data` of `new`/`question`
#[derive(Debug, Clone, Deserialize)]
pub struct NewQuestion {
    pub student: String,
    pub question: String,
}

/// `data` of `new`/`line`
#[derive(Debug, Clone, Deserialize)]
pub struct LineRequest {
    pub student: String,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Full feedback and question state
    Update(StoreSnapshot),
    /// Full help line state
    Line(LineSnapshot),
    Error { code: String, message: String },
    Shutdown { reason: String, reconnect_after: Option<u64> },
    Heartbeat,
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn shutdown(reason: impl Into<String>, reconnect_after: Option<u64>) -> Self {
        Self::Shutdown {
            reason: reason.into(),
            reconnect_after,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::Update(_) => MessageType::Update,
            ServerMessage::Line(_) => MessageType::Line,
            ServerMessage::Error { .. } => MessageType::Error,
            ServerMessage::Shutdown { .. } => MessageType::Shutdown,
            ServerMessage::Heartbeat => MessageType::Heartbeat,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let envelope = Envelope::new(self.message_type());
        match self {
            ServerMessage::Update(snapshot) => {
                envelope.data(json!([snapshot.feedback, snapshot.questions]))
            }
            ServerMessage::Line(snapshot) => envelope
                .resource(Resource::Line)
                .data(json!(snapshot.line)),
            ServerMessage::Error { code, message } => {
                envelope.data(json!({ "code": code, "message": message }))
            }
            ServerMessage::Shutdown {
                reason,
                reconnect_after,
            } => envelope.data(json!({ "reason": reason, "reconnect_after": reconnect_after })),
            ServerMessage::Heartbeat => envelope,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_envelope())
    }

    pub fn snapshot_key(&self) -> Option<SnapshotKey> {
        match self {
            ServerMessage::Update(snapshot) => Some(SnapshotKey {
                kind: SnapshotKind::Update,
                revision: snapshot.revision,
            }),
            ServerMessage::Line(snapshot) => Some(SnapshotKey {
                kind: SnapshotKind::Line,
                revision: snapshot.revision,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Update,
    Line,
}

/// Identifies which state a snapshot message mirrors and how fresh it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotKey {
    pub kind: SnapshotKind,
    pub revision: u64,
}

/// What actually travels through a connection's outbound channel
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Raw(ServerMessage),
    /// Serialized once and shared by every recipient of a broadcast
    Serialized {
        kind: MessageType,
        snapshot: Option<SnapshotKey>,
        text: Arc<str>,
    },
    /// Transport-level keepalive. WebSocket writers emit a ping frame,
    /// SSE writers a heartbeat event.
    Ping,
}

impl OutboundMessage {
    pub fn preserialized(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::Serialized {
            kind: message.message_type(),
            snapshot: message.snapshot_key(),
            text: message.to_json()?.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            OutboundMessage::Raw(message) => message.to_json(),
            OutboundMessage::Serialized { text, .. } => Ok(text.to_string()),
            OutboundMessage::Ping => ServerMessage::Heartbeat.to_json(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            OutboundMessage::Raw(message) => message.message_type(),
            OutboundMessage::Serialized { kind, .. } => *kind,
            OutboundMessage::Ping => MessageType::Heartbeat,
        }
    }

    pub fn snapshot_key(&self) -> Option<SnapshotKey> {
        match self {
            OutboundMessage::Raw(message) => message.snapshot_key(),
            OutboundMessage::Serialized { snapshot, .. } => *snapshot,
            OutboundMessage::Ping => None,
        }
    }
}

/// Per-connection guard run by the writer task.
///
/// Broadcasts for different mutations are pushed concurrently, so two
/// snapshots can reach a channel out of order. The writer keeps the newest
/// revision it has written per snapshot kind and drops anything not newer.
#[derive(Debug, Default)]
pub struct SnapshotFilter {
    last_update: Option<u64>,
    last_line: Option<u64>,
}

impl SnapshotFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `message` is a snapshot older than one already written.
    pub fn admit(&mut self, message: &OutboundMessage) -> bool {
        let Some(key) = message.snapshot_key() else {
            return true;
        };

        let last = match key.kind {
            SnapshotKind::Update => &mut self.last_update,
            SnapshotKind::Line => &mut self.last_line,
        };

        if matches!(*last, Some(previous) if previous >= key.revision) {
            return false;
        }
        *last = Some(key.revision);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FeedbackEntry, QuestionEntry};

    fn update(revision: u64) -> ServerMessage {
        ServerMessage::Update(StoreSnapshot {
            revision,
            feedback: vec![FeedbackEntry {
                student: "A".into(),
                feedback: "too fast".into(),
            }],
            questions: vec![QuestionEntry {
                id: "1".into(),
                student: "B".into(),
                question: "what is X?".into(),
                timestamp: None,
            }],
        })
    }

    fn line(revision: u64) -> ServerMessage {
        ServerMessage::Line(LineSnapshot {
            revision,
            line: vec!["A".into()],
        })
    }

    #[test]
    fn test_parse_new_feedback() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"type":"new","resource":"feedback","id":null,"data":{"student":"A","feedback":"good pace"}}"#,
        )
        .unwrap();

        assert_eq!(envelope.kind, MessageType::New);
        assert_eq!(envelope.resource, Some(Resource::Feedback));
        let data: NewFeedback = serde_json::from_value(envelope.data).unwrap();
        assert_eq!(data.feedback, "good pace");
    }

    #[test]
    fn test_parse_numeric_id() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"type":"delete","resource":"question","id":42}"#).unwrap();
        assert_eq!(envelope.id.as_deref(), Some("42"));
        assert_eq!(envelope.data, Value::Null);
    }

    #[test]
    fn test_unknown_type_parses() {
        let envelope: Envelope = serde_json::from_str(r#"{"type":"bbbq"}"#).unwrap();
        assert_eq!(envelope.kind, MessageType::Unknown);
        assert_eq!(envelope.resource, None);
    }

    #[test]
    fn test_missing_type_is_rejected() {
        assert!(serde_json::from_str::<Envelope>(r#"{"resource":"feedback"}"#).is_err());
    }

    #[test]
    fn test_update_envelope_shape() {
        let value: Value = serde_json::from_str(&update(3).to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "update");
        assert_eq!(value["resource"], Value::Null);
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["data"][0][0]["feedback"], "too fast");
        assert_eq!(value["data"][1][0]["id"], "1");
    }

    #[test]
    fn test_line_envelope_shape() {
        let value: Value = serde_json::from_str(&line(1).to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "line");
        assert_eq!(value["resource"], "line");
        assert_eq!(value["data"], json!(["A"]));
    }

    #[test]
    fn test_preserialized_keeps_snapshot_key() {
        let message = OutboundMessage::preserialized(&update(7)).unwrap();
        assert_eq!(message.message_type(), MessageType::Update);
        assert_eq!(
            message.snapshot_key(),
            Some(SnapshotKey {
                kind: SnapshotKind::Update,
                revision: 7
            })
        );
        assert_eq!(message.to_json().unwrap(), update(7).to_json().unwrap());
    }

    #[test]
    fn test_ping_serializes_as_heartbeat() {
        let value: Value = serde_json::from_str(&OutboundMessage::Ping.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "heartbeat");
    }

    #[test]
    fn test_filter_drops_stale_snapshots() {
        let mut filter = SnapshotFilter::new();

        assert!(filter.admit(&OutboundMessage::Raw(update(2))));
        assert!(!filter.admit(&OutboundMessage::Raw(update(1))));
        assert!(!filter.admit(&OutboundMessage::Raw(update(2))));
        assert!(filter.admit(&OutboundMessage::Raw(update(5))));
    }

    #[test]
    fn test_filter_tracks_kinds_independently() {
        let mut filter = SnapshotFilter::new();

        assert!(filter.admit(&OutboundMessage::Raw(line(6))));
        assert!(filter.admit(&OutboundMessage::Raw(update(4))));
        assert!(!filter.admit(&OutboundMessage::Raw(update(0))));
        assert!(filter.admit(&OutboundMessage::Ping));
        assert!(filter.admit(&OutboundMessage::Raw(ServerMessage::error("X", "y"))));
    }
}
