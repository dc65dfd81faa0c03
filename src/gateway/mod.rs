//! 实时连接网关
//!
//! ## 组成
//!
//! - **server**：axum 路由，升级前校验 JWT，另有 `/health`
//! - **client**：每个连接一对读写泵，出站队列有界、满则丢弃
//! - **hub**：单一控制循环，独占 userId → 连接 的注册表，把总线上的响应投回发起者
//! - **event**：`{type, requestId, payload}` 帧格式
//!
//! ## 数据流
//!
//! ```text
//! client ──frame──> read pump ──publish──> Bus ──> worker
//!                                                   │
//! client <──frame── write pump <── Hub <──subscribe─┘
//! ```

pub mod auth;
pub mod client;
pub mod event;
pub mod hub;
pub mod server;

pub use auth::{extract_token, Claims, JwtValidator};
pub use client::{route_inbound, ClientHandle, ConnId, Inbound};
pub use event::{Event, EventKind, EventPayload};
pub use hub::{Hub, HubHandle};
pub use server::{router, serve, GatewayState};
