//! HTTP 入口：WebSocket 升级与健康检查
//!
//! 鉴权在接受升级之前完成，失败返回 401，不会创建连接状态。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::auth::{extract_token, JwtValidator};
use super::client::{serve_connection, ClientHandle};
use super::hub::HubHandle;
use crate::bus::Bus;
use crate::config::ConnectionSection;

/// 路由共享状态
#[derive(Clone)]
pub struct GatewayState {
    pub hub: HubHandle,
    pub bus: Arc<Bus>,
    pub auth: Arc<JwtValidator>,
    pub connection: ConnectionSection,
    /// 连接的关闭 token 都派生自它，进程退出时一并断开
    pub shutdown: CancellationToken,
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

pub fn router(state: GatewayState, ws_path: &str) -> Router {
    Router::new()
        .route(ws_path, get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn ws_handler(
    ws: Option<WebSocketUpgrade>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<GatewayState>,
) -> Response {
    let token = extract_token(query.token.as_deref(), &headers).unwrap_or_default();
    let claims = match state.auth.validate(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!("websocket auth rejected: {}", e);
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": e.to_string() }))).into_response();
        }
    };

    let Some(ws) = ws else {
        return (StatusCode::BAD_REQUEST, "websocket upgrade required").into_response();
    };

    tracing::info!(user_id = %claims.sub, role = %claims.role, "websocket upgrade accepted");

    let max_bytes = state.connection.max_message_bytes;
    ws.max_message_size(max_bytes)
        .max_frame_size(max_bytes)
        .on_upgrade(move |socket| async move {
            let (handle, outbound) = ClientHandle::new(
                claims.sub,
                claims.role,
                state.connection.send_buffer,
                state.shutdown.child_token(),
            );
            serve_connection(socket, handle, outbound, state.hub, state.bus, state.connection).await;
        })
}

async fn health(State(state): State<GatewayState>) -> Response {
    match state.hub.client_count().await {
        Ok(clients) => Json(json!({ "status": "ok", "clients": clients })).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// 在已绑定的监听器上服务，直到 shutdown 被取消
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    if let Some(addr) = addr {
        tracing::info!("Gateway listening on http://{}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
