//! WebSocket 帧格式
//!
//! 每帧是 JSON 对象 `{type, requestId, payload}`。requestId 由客户端分配，
//! 原样回显在对应的响应或错误里，服务端从不解析它。

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ErrorCode;
use crate::store::ListingSummary;

/// 入站事件类型
pub const AGENT_SEARCH: &str = "agent.search";
pub const CHAT_MESSAGE: &str = "chat.message";

/// 入站帧；payload 延迟到按类型分发时再解码
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "requestId", default)]
    pub request_id: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentSearchPayload {
    pub query: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub to_user_id: Option<String>,
    pub text: String,
}

/// 解码 payload；缺省（null）视为空对象
pub fn decode_payload<T: DeserializeOwned + Default>(payload: Value) -> Result<T, serde_json::Error> {
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload)
}

/// 出站事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "agent.response")]
    AgentResponse,
    #[serde(rename = "chat.response")]
    ChatResponse,
    #[serde(rename = "chat.deliver")]
    ChatDeliver,
    #[serde(rename = "error")]
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub answer: String,
    pub results: Vec<ListingSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverPayload {
    pub from_user_id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Answer(AnswerPayload),
    Deliver(DeliverPayload),
    Error(ErrorPayload),
}

/// 出站帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn agent_response(request_id: &str, answer: String, results: Vec<ListingSummary>) -> Self {
        Self {
            kind: EventKind::AgentResponse,
            request_id: request_id.to_string(),
            payload: EventPayload::Answer(AnswerPayload { answer, results }),
        }
    }

    pub fn chat_response(request_id: &str, answer: String, results: Vec<ListingSummary>) -> Self {
        Self {
            kind: EventKind::ChatResponse,
            request_id: request_id.to_string(),
            payload: EventPayload::Answer(AnswerPayload { answer, results }),
        }
    }

    pub fn chat_deliver(request_id: &str, from_user_id: &str, text: &str, sent_at: DateTime<Utc>) -> Self {
        Self {
            kind: EventKind::ChatDeliver,
            request_id: request_id.to_string(),
            payload: EventPayload::Deliver(DeliverPayload {
                from_user_id: from_user_id.to_string(),
                text: text.to_string(),
                sent_at,
            }),
        }
    }

    pub fn error(request_id: &str, message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            kind: EventKind::Error,
            request_id: request_id.to_string(),
            payload: EventPayload::Error(ErrorPayload {
                message: message.into(),
                code: code.as_str().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_error_event_wire_shape() {
        let ev = Event::error("r7", "query is required", ErrorCode::MissingQuery);
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(
            v,
            json!({
                "type": "error",
                "requestId": "r7",
                "payload": { "message": "query is required", "code": "MISSING_QUERY" }
            })
        );
    }

    #[test]
    fn test_response_event_keeps_empty_results() {
        let ev = Event::agent_response("r1", "nothing".into(), Vec::new());
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "agent.response");
        assert_eq!(v["payload"]["results"], json!([]));

        let back: Event = serde_json::from_value(v).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn test_inbound_defaults() {
        let ev: InboundEvent = serde_json::from_str(r#"{"type":"agent.search"}"#).unwrap();
        assert_eq!(ev.request_id, "");
        let p: AgentSearchPayload = decode_payload(ev.payload).unwrap();
        assert!(p.query.is_empty());

        let ev: InboundEvent = serde_json::from_str(
            r#"{"type":"chat.message","requestId":"c1","payload":{"toUserId":"bob","text":"hey"}}"#,
        )
        .unwrap();
        let p: ChatMessagePayload = decode_payload(ev.payload).unwrap();
        assert_eq!(p.to_user_id.as_deref(), Some("bob"));
        assert_eq!(p.text, "hey");

        assert!(decode_payload::<AgentSearchPayload>(json!("just a string")).is_err());
        assert!(decode_payload::<AgentSearchPayload>(json!({"query": 5})).is_err());
    }
}
