//! 总线消息定义
//!
//! 每个主题对应封闭的变体集合，订阅方用 match 穷尽分发，不做运行时类型断言。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::ListingSummary;

/// 主题名
pub mod topics {
    pub const AGENT_REQUEST: &str = "agent.request";
    pub const AGENT_RESPONSE: &str = "agent.response";
    pub const CHAT_REQUEST: &str = "chat.request";
    pub const CHAT_RESPONSE: &str = "chat.response";
    pub const CHAT_DELIVER: &str = "chat.deliver";
}

/// 商品查询请求（agent.search）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub user_id: String,
    pub request_id: String,
    pub query: String,
}

/// 查询结果，user_id + request_id 原样取自请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub user_id: String,
    pub request_id: String,
    pub answer: String,
    pub results: Vec<ListingSummary>,
}

/// 与助手的自由对话（chat.message 且未指定 toUserId）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub user_id: String,
    pub request_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub user_id: String,
    pub request_id: String,
    pub answer: String,
    pub results: Vec<ListingSummary>,
}

/// 用户之间的点对点消息，由 Hub 定向投递
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerChatDeliver {
    pub from_user_id: String,
    pub to_user_id: String,
    pub request_id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// 总线负载
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    AgentRequest(AgentRequest),
    AgentResponse(AgentResponse),
    ChatRequest(ChatRequest),
    ChatResponse(ChatResponse),
    PeerChatDeliver(PeerChatDeliver),
}

impl Payload {
    /// 负载的默认主题
    pub fn topic(&self) -> &'static str {
        match self {
            Payload::AgentRequest(_) => topics::AGENT_REQUEST,
            Payload::AgentResponse(_) => topics::AGENT_RESPONSE,
            Payload::ChatRequest(_) => topics::CHAT_REQUEST,
            Payload::ChatResponse(_) => topics::CHAT_RESPONSE,
            Payload::PeerChatDeliver(_) => topics::CHAT_DELIVER,
        }
    }

    /// 用于日志关联
    pub fn request_id(&self) -> &str {
        match self {
            Payload::AgentRequest(r) => &r.request_id,
            Payload::AgentResponse(r) => &r.request_id,
            Payload::ChatRequest(r) => &r.request_id,
            Payload::ChatResponse(r) => &r.request_id,
            Payload::PeerChatDeliver(r) => &r.request_id,
        }
    }
}

/// 总线传输单元
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Payload,
}
