//! Phoenix channel frames used by the hosted realtime backend
//!
//! Frames are JSON objects: `{"topic", "event", "payload", "ref", "join_ref"}`.
//! Change feeds are joined on `realtime:<name>` topics with a
//! `postgres_changes` config; the socket heartbeat runs on the `phoenix` topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::models::{ChangeEvent, ChangeKind, EventFilter};

pub const TOPIC_PREFIX: &str = "realtime:";
pub const HEARTBEAT_TOPIC: &str = "phoenix";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_CHANGES: &str = "postgres_changes";

/// One frame on the realtime socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// Inbound frames the client acts on
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to a join or heartbeat
    Reply {
        topic: String,
        msg_ref: Option<String>,
        ok: bool,
        response: Value,
    },
    /// Topic errored or was closed by the server
    Closed { topic: String, reason: &'static str },
    /// Row change on a topic
    Change { topic: String, event: ChangeEvent },
    /// Anything the client does not handle (presence, broadcast, system)
    Ignored,
}

/// Topic for a logical feed name
pub fn topic_for(name: &str) -> String {
    format!("{}{}", TOPIC_PREFIX, name)
}

/// Feed name for a topic, if it is a change-feed topic
pub fn name_for(topic: &str) -> Option<&str> {
    topic.strip_prefix(TOPIC_PREFIX)
}

impl Frame {
    /// Join `name`'s topic, subscribed to changes on `table`
    pub fn join(
        name: &str,
        table: &str,
        schema: &str,
        access_token: Option<&str>,
        join_ref: &str,
    ) -> Self {
        let filter = EventFilter::table(table).with_schema(schema);
        let mut payload = json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [filter],
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = Value::String(token.to_string());
        }

        Self {
            topic: topic_for(name),
            event: EVENT_JOIN.to_string(),
            payload,
            msg_ref: Some(join_ref.to_string()),
            join_ref: Some(join_ref.to_string()),
        }
    }

    pub fn leave(name: &str, msg_ref: &str, join_ref: Option<&str>) -> Self {
        Self {
            topic: topic_for(name),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: join_ref.map(str::to_string),
        }
    }

    pub fn heartbeat(msg_ref: &str) -> Self {
        Self {
            topic: HEARTBEAT_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Interpret the frame
    pub fn classify(self) -> Inbound {
        match self.event.as_str() {
            EVENT_REPLY => {
                let ok = self.payload.get("status").and_then(Value::as_str) == Some("ok");
                let response = self.payload.get("response").cloned().unwrap_or(Value::Null);
                Inbound::Reply {
                    topic: self.topic,
                    msg_ref: self.msg_ref,
                    ok,
                    response,
                }
            }
            EVENT_ERROR => Inbound::Closed {
                topic: self.topic,
                reason: "error",
            },
            EVENT_CLOSE => Inbound::Closed {
                topic: self.topic,
                reason: "close",
            },
            EVENT_CHANGES => {
                let Some(name) = name_for(&self.topic) else {
                    return Inbound::Ignored;
                };
                match parse_change(name, &self.payload) {
                    Some(event) => Inbound::Change {
                        topic: self.topic,
                        event,
                    },
                    None => Inbound::Ignored,
                }
            }
            _ => Inbound::Ignored,
        }
    }
}

#[derive(Deserialize)]
struct ChangeData {
    schema: String,
    table: String,
    #[serde(default)]
    commit_timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type", alias = "eventType")]
    kind: ChangeKind,
    #[serde(default)]
    record: Value,
    #[serde(default)]
    old_record: Value,
}

fn parse_change(name: &str, payload: &Value) -> Option<ChangeEvent> {
    let data = payload.get("data")?;
    let data: ChangeData = serde_json::from_value(data.clone()).ok()?;

    Some(ChangeEvent {
        channel: name.to_string(),
        kind: data.kind,
        schema: data.schema,
        table: data.table,
        commit_timestamp: data.commit_timestamp,
        record: data.record,
        old_record: data.old_record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_frame_shape() {
        let frame = Frame::join("orders", "orders", "public", Some("jwt"), "3");
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(value["topic"], "realtime:orders");
        assert_eq!(value["event"], "phx_join");
        assert_eq!(value["ref"], "3");
        assert_eq!(value["join_ref"], "3");
        assert_eq!(value["payload"]["access_token"], "jwt");

        let changes = &value["payload"]["config"]["postgres_changes"][0];
        assert_eq!(changes["event"], "*");
        assert_eq!(changes["schema"], "public");
        assert_eq!(changes["table"], "orders");
    }

    #[test]
    fn test_join_frame_for_mapped_feed() {
        let frame = Frame::join("kitchen_queue", "orders", "pos", None, "4");

        assert_eq!(frame.topic, "realtime:kitchen_queue");
        assert!(frame.payload.get("access_token").is_none());
        let changes = &frame.payload["config"]["postgres_changes"][0];
        assert_eq!(changes["table"], "orders");
        assert_eq!(changes["schema"], "pos");
    }

    #[test]
    fn test_heartbeat_frame_omits_join_ref() {
        let text = Frame::heartbeat("9").encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["topic"], "phoenix");
        assert!(value.get("join_ref").is_none());
    }

    #[test]
    fn test_classify_reply() {
        let frame = Frame::decode(
            r#"{"topic":"realtime:orders","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#,
        )
        .unwrap();

        match frame.classify() {
            Inbound::Reply { topic, msg_ref, ok, .. } => {
                assert_eq!(topic, "realtime:orders");
                assert_eq!(msg_ref.as_deref(), Some("1"));
                assert!(ok);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_error_reply() {
        let frame = Frame::decode(
            r#"{"topic":"realtime:orders","event":"phx_reply","payload":{"status":"error","response":{"reason":"unmatched topic"}},"ref":"1"}"#,
        )
        .unwrap();

        assert!(matches!(frame.classify(), Inbound::Reply { ok: false, .. }));
    }

    #[test]
    fn test_classify_change() {
        let frame = Frame::decode(
            r#"{
                "topic": "realtime:orders",
                "event": "postgres_changes",
                "payload": {
                    "ids": [123],
                    "data": {
                        "schema": "public",
                        "table": "orders",
                        "commit_timestamp": "2024-05-01T12:30:00Z",
                        "type": "UPDATE",
                        "record": {"id": 42, "status": "ready"},
                        "old_record": {"id": 42},
                        "columns": [],
                        "errors": null
                    }
                },
                "ref": null
            }"#,
        )
        .unwrap();

        match frame.classify() {
            Inbound::Change { topic, event } => {
                assert_eq!(topic, "realtime:orders");
                assert_eq!(event.channel, "orders");
                assert_eq!(event.kind, ChangeKind::Update);
                assert_eq!(event.record["status"], "ready");
                assert!(event.commit_timestamp.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_server_close_and_unknown() {
        let closed = Frame::decode(
            r#"{"topic":"realtime:orders","event":"phx_close","payload":{},"ref":null}"#,
        )
        .unwrap();
        assert!(matches!(
            closed.classify(),
            Inbound::Closed { reason: "close", .. }
        ));

        let presence = Frame::decode(
            r#"{"topic":"realtime:orders","event":"presence_state","payload":{},"ref":null}"#,
        )
        .unwrap();
        assert_eq!(presence.classify(), Inbound::Ignored);
    }

    #[test]
    fn test_malformed_change_is_ignored() {
        let frame = Frame::decode(
            r#"{"topic":"realtime:orders","event":"postgres_changes","payload":{"data":{"table":"orders"}},"ref":null}"#,
        )
        .unwrap();
        assert_eq!(frame.classify(), Inbound::Ignored);
    }

    #[test]
    fn test_topic_helpers() {
        assert_eq!(topic_for("tables"), "realtime:tables");
        assert_eq!(name_for("realtime:tables"), Some("tables"));
        assert_eq!(name_for("phoenix"), None);
    }
}
