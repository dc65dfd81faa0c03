//! 错误类型
//!
//! 按关注点划分：鉴权（升级前拒绝）、投递（只回报给发起方）、存储（中止本次查询）、
//! LLM（降级为确定性规则，不对用户可见）。

use serde::Serialize;
use thiserror::Error;

/// 连接升级前的鉴权失败；发生时不会创建任何连接状态
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("token is required")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("missing sub")]
    MissingSubject,

    #[error("missing role")]
    MissingRole,

    #[error("auth misconfigured: {0}")]
    Misconfigured(String),
}

/// 定向投递失败（对端不在线 / 对端队列已满），只回报给调用方
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("user not connected: {0}")]
    NotConnected(String),

    #[error("client send buffer full for user: {0}")]
    BufferFull(String),

    #[error("hub is not running")]
    HubClosed,
}

impl DeliveryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DeliveryError::NotConnected(_) | DeliveryError::HubClosed => {
                ErrorCode::RecipientNotConnected
            }
            DeliveryError::BufferFull(_) => ErrorCode::BufferFull,
        }
    }
}

/// 商品库 / 图片库访问失败
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("catalog load error: {0}")]
    Catalog(String),

    #[error("storage call timed out after {0}s")]
    Timeout(u64),

    #[cfg(feature = "async-sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),
}

/// LLM 调用失败；所有调用点都会降级为确定性实现
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM returned an empty reply")]
    EmptyReply,
}

/// 从 LLM 回复中解析意图失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntentError {
    #[error("no JSON object in LLM reply")]
    NoJsonObject,

    #[error("failed to parse intent json: {0}")]
    InvalidJson(String),
}

/// 下发给客户端的错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidPayload,
    MissingQuery,
    MissingText,
    UnknownEvent,
    RecipientNotConnected,
    BufferFull,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPayload => "INVALID_PAYLOAD",
            ErrorCode::MissingQuery => "MISSING_QUERY",
            ErrorCode::MissingText => "MISSING_TEXT",
            ErrorCode::UnknownEvent => "UNKNOWN_EVENT",
            ErrorCode::RecipientNotConnected => "RECIPIENT_NOT_CONNECTED",
            ErrorCode::BufferFull => "BUFFER_FULL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_format() {
        let json = serde_json::to_string(&ErrorCode::RecipientNotConnected).unwrap();
        assert_eq!(json, "\"RECIPIENT_NOT_CONNECTED\"");
        assert_eq!(ErrorCode::InvalidPayload.to_string(), "INVALID_PAYLOAD");
    }

    #[test]
    fn test_delivery_error_codes() {
        assert_eq!(
            DeliveryError::BufferFull("u1".into()).code(),
            ErrorCode::BufferFull
        );
        assert_eq!(
            DeliveryError::NotConnected("u1".into()).code(),
            ErrorCode::RecipientNotConnected
        );
    }
}
