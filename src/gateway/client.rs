//! 单连接的读写泵
//!
//! - 读循环：逐帧读取并解码，校验后发布到总线；坏帧只回错误事件，不断开连接
//! - 写循环：按 FIFO 取出站队列写出，并定期发送 ping 保活
//!
//! 出站队列有界，入队永不阻塞（满则丢弃）。关闭信号由 CancellationToken 传递：
//! Hub 注销或驱逐、任一循环退出、进程关闭都会触发它。

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::event::{
    decode_payload, AgentSearchPayload, ChatMessagePayload, Event, InboundEvent, AGENT_SEARCH,
    CHAT_MESSAGE,
};
use super::hub::HubHandle;
use crate::bus::{AgentRequest, Bus, ChatRequest, Payload, PeerChatDeliver};
use crate::config::ConnectionSection;
use crate::core::{DeliveryError, ErrorCode};

/// 连接 ID；注销按它匹配，被驱逐的旧连接不会误删新连接
pub type ConnId = Uuid;

/// Hub 注册表中保存的连接句柄
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub conn_id: ConnId,
    pub user_id: String,
    pub role: String,
    tx: mpsc::Sender<Event>,
    closed: CancellationToken,
}

impl ClientHandle {
    /// 创建句柄与出站队列接收端；closed 一般取关闭 token 的子 token
    pub fn new(
        user_id: impl Into<String>,
        role: impl Into<String>,
        capacity: usize,
        closed: CancellationToken,
    ) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                conn_id: Uuid::new_v4(),
                user_id: user_id.into(),
                role: role.into(),
                tx,
                closed,
            },
            rx,
        )
    }

    /// 非阻塞入队
    pub fn try_send(&self, event: Event) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::NotConnected(self.user_id.clone()));
        }
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::BufferFull(self.user_id.clone()),
            TrySendError::Closed(_) => DeliveryError::NotConnected(self.user_id.clone()),
        })
    }

    /// 关闭出站队列：写循环发送 close 帧后退出
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// 给本连接回一个错误事件；队列满时丢弃
    fn send_error(&self, request_id: &str, message: &str, code: ErrorCode) {
        if let Err(e) = self.try_send(Event::error(request_id, message, code)) {
            tracing::warn!(
                user_id = %self.user_id,
                request_id,
                code = %code,
                "dropping error event: {}",
                e
            );
        }
    }
}

/// 单个入站帧的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// 合法请求，发布到总线
    Publish(Payload),
    /// 校验失败，回给本连接
    Reject {
        request_id: String,
        message: &'static str,
        code: ErrorCode,
    },
}

impl Inbound {
    fn reject(request_id: String, message: &'static str, code: ErrorCode) -> Self {
        Inbound::Reject {
            request_id,
            message,
            code,
        }
    }
}

/// 解码并校验一个文本帧
pub fn route_inbound(user_id: &str, text: &str) -> Inbound {
    let event: InboundEvent = match serde_json::from_str(text) {
        Ok(ev) => ev,
        Err(_) => return Inbound::reject(String::new(), "invalid payload", ErrorCode::InvalidPayload),
    };
    let request_id = event.request_id;

    match event.kind.as_str() {
        AGENT_SEARCH => {
            let Ok(payload) = decode_payload::<AgentSearchPayload>(event.payload) else {
                return Inbound::reject(request_id, "invalid payload", ErrorCode::InvalidPayload);
            };
            if payload.query.trim().is_empty() {
                return Inbound::reject(request_id, "query is required", ErrorCode::MissingQuery);
            }
            Inbound::Publish(Payload::AgentRequest(AgentRequest {
                user_id: user_id.to_string(),
                request_id,
                query: payload.query,
            }))
        }
        CHAT_MESSAGE => {
            let Ok(payload) = decode_payload::<ChatMessagePayload>(event.payload) else {
                return Inbound::reject(request_id, "invalid payload", ErrorCode::InvalidPayload);
            };
            if payload.text.trim().is_empty() {
                return Inbound::reject(request_id, "text is required", ErrorCode::MissingText);
            }
            let to_user_id = payload
                .to_user_id
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());

            match to_user_id {
                Some(to_user_id) => Inbound::Publish(Payload::PeerChatDeliver(PeerChatDeliver {
                    from_user_id: user_id.to_string(),
                    to_user_id,
                    request_id,
                    text: payload.text,
                    sent_at: Utc::now(),
                })),
                None => Inbound::Publish(Payload::ChatRequest(ChatRequest {
                    user_id: user_id.to_string(),
                    request_id,
                    text: payload.text,
                })),
            }
        }
        _ => Inbound::reject(request_id, "unknown event type", ErrorCode::UnknownEvent),
    }
}

/// 运行一个已完成升级的连接，直到任一方向结束
pub async fn serve_connection(
    socket: WebSocket,
    handle: ClientHandle,
    outbound: mpsc::Receiver<Event>,
    hub: HubHandle,
    bus: Arc<Bus>,
    conn: ConnectionSection,
) {
    let conn_id = handle.conn_id;
    let user_id = handle.user_id.clone();

    if hub.register(handle.clone()).await.is_err() {
        tracing::warn!(user_id = %user_id, conn_id = %conn_id, "hub is not running, closing connection");
        return;
    }

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_pump(
        sink,
        outbound,
        handle.closed_token(),
        conn.ping_period(),
        conn.write_wait(),
    ));

    read_pump(stream, &handle, &bus, conn.pong_wait()).await;

    hub.unregister(&user_id, conn_id).await;
    handle.close();
    let _ = writer.await;

    tracing::info!(user_id = %user_id, conn_id = %conn_id, "connection closed");
}

async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    handle: &ClientHandle,
    bus: &Bus,
    pong_wait: Duration,
) {
    let closed = handle.closed_token();
    loop {
        // 每收到一帧（含 pong）都重新计时
        let next = tokio::select! {
            _ = closed.cancelled() => break,
            next = tokio::time::timeout(pong_wait, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                tracing::info!(user_id = %handle.user_id, "read deadline exceeded, closing");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(user_id = %handle.user_id, "websocket read error: {}", e);
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    handle.send_error("", "invalid payload", ErrorCode::InvalidPayload);
                    continue;
                }
            },
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            WsMessage::Close(_) => break,
        };

        match route_inbound(&handle.user_id, &text) {
            Inbound::Publish(payload) => {
                tracing::debug!(
                    user_id = %handle.user_id,
                    request_id = payload.request_id(),
                    topic = payload.topic(),
                    "received event"
                );
                bus.publish_payload(payload);
            }
            Inbound::Reject {
                request_id,
                message,
                code,
            } => handle.send_error(&request_id, message, code),
        }
    }
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<Event>,
    closed: CancellationToken,
    ping_period: Duration,
    write_wait: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + ping_period, ping_period);

    loop {
        let frame = tokio::select! {
            biased;
            _ = closed.cancelled() => {
                let _ = tokio::time::timeout(write_wait, sink.send(WsMessage::Close(None))).await;
                break;
            }
            event = outbound.recv() => match event {
                Some(event) => match serde_json::to_string(&event) {
                    Ok(text) => WsMessage::Text(text),
                    Err(e) => {
                        tracing::error!(request_id = %event.request_id, "failed to encode event: {}", e);
                        continue;
                    }
                },
                None => {
                    let _ = tokio::time::timeout(write_wait, sink.send(WsMessage::Close(None))).await;
                    break;
                }
            },
            _ = ticker.tick() => WsMessage::Ping(Vec::new()),
        };

        match tokio::time::timeout(write_wait, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!("websocket write error: {}", e);
                break;
            }
            Err(_) => {
                tracing::warn!("websocket write deadline exceeded");
                break;
            }
        }
    }

    // 写端已失效，通知读循环退出
    closed.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reject_code(inbound: Inbound) -> (String, ErrorCode) {
        match inbound {
            Inbound::Reject { request_id, code, .. } => (request_id, code),
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[test]
    fn test_agent_search_validation() {
        let ok = route_inbound(
            "u1",
            r#"{"type":"agent.search","requestId":"r1","payload":{"query":"desk"}}"#,
        );
        assert_eq!(
            ok,
            Inbound::Publish(Payload::AgentRequest(AgentRequest {
                user_id: "u1".into(),
                request_id: "r1".into(),
                query: "desk".into(),
            }))
        );

        let missing = route_inbound("u1", r#"{"type":"agent.search","requestId":"r2","payload":{}}"#);
        assert_eq!(reject_code(missing), ("r2".into(), ErrorCode::MissingQuery));

        let bad = route_inbound("u1", r#"{"type":"agent.search","requestId":"r3","payload":[1]}"#);
        assert_eq!(reject_code(bad), ("r3".into(), ErrorCode::InvalidPayload));
    }

    #[test]
    fn test_chat_message_routes() {
        let assistant = route_inbound(
            "u1",
            r#"{"type":"chat.message","requestId":"c1","payload":{"text":"hi","toUserId":"  "}}"#,
        );
        assert!(matches!(assistant, Inbound::Publish(Payload::ChatRequest(ref r)) if r.text == "hi"));

        let peer = route_inbound(
            "u1",
            r#"{"type":"chat.message","requestId":"c2","payload":{"text":"still available?","toUserId":"u2"}}"#,
        );
        match peer {
            Inbound::Publish(Payload::PeerChatDeliver(d)) => {
                assert_eq!(d.from_user_id, "u1");
                assert_eq!(d.to_user_id, "u2");
                assert_eq!(d.request_id, "c2");
            }
            other => panic!("unexpected {:?}", other),
        }

        let missing = route_inbound("u1", r#"{"type":"chat.message","requestId":"c3","payload":{"text":" "}}"#);
        assert_eq!(reject_code(missing), ("c3".into(), ErrorCode::MissingText));
    }

    #[test]
    fn test_unknown_and_unparseable_frames() {
        let unknown = route_inbound("u1", r#"{"type":"listing.create","requestId":"x1"}"#);
        assert_eq!(reject_code(unknown), ("x1".into(), ErrorCode::UnknownEvent));

        let garbage = route_inbound("u1", "not json");
        assert_eq!(reject_code(garbage), (String::new(), ErrorCode::InvalidPayload));
    }

    #[tokio::test]
    async fn test_handle_try_send_and_close() {
        let (handle, mut rx) = ClientHandle::new("u1", "buyer", 1, CancellationToken::new());
        handle.try_send(Event::error("r1", "x", ErrorCode::UnknownEvent)).unwrap();
        assert_eq!(
            handle.try_send(Event::error("r2", "x", ErrorCode::UnknownEvent)),
            Err(DeliveryError::BufferFull("u1".into()))
        );
        assert_eq!(rx.recv().await.unwrap().request_id, "r1");

        handle.close();
        assert!(handle.is_closed());
        assert_eq!(
            handle.try_send(Event::error("r3", "x", ErrorCode::UnknownEvent)),
            Err(DeliveryError::NotConnected("u1".into()))
        );
    }
}
