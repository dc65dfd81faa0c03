//! Hub（路由中枢）
//!
//! 单个控制循环独占连接注册表（userId → ClientHandle），串行处理三类事件：
//! 注册、注销、从响应主题收到的消息。注册表只在这个循环里改动，无需加锁；
//! 每个事件的工作量是一次查表加一次非阻塞入队，慢客户端不会拖住循环。
//!
//! 同一用户重复注册时显式驱逐旧连接（关闭其出站队列），再登记新连接。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::client::{ClientHandle, ConnId};
use super::event::Event;
use crate::bus::{topics, Bus, Message, Payload, PeerChatDeliver, Subscription};
use crate::core::DeliveryError;

const COMMAND_CAPACITY: usize = 1024;

enum HubCommand {
    Register(ClientHandle),
    Unregister {
        user_id: String,
        conn_id: ConnId,
    },
    SendToUser {
        user_id: String,
        event: Event,
        reply: oneshot::Sender<Result<(), DeliveryError>>,
    },
    ClientCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Hub 控制循环的调用句柄
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn register(&self, client: ClientHandle) -> Result<(), DeliveryError> {
        self.tx
            .send(HubCommand::Register(client))
            .await
            .map_err(|_| DeliveryError::HubClosed)
    }

    /// 注销；conn_id 与当前登记的不一致时忽略（已被新连接取代）
    pub async fn unregister(&self, user_id: &str, conn_id: ConnId) {
        let _ = self
            .tx
            .send(HubCommand::Unregister {
                user_id: user_id.to_string(),
                conn_id,
            })
            .await;
    }

    /// 定向投递给某个用户
    pub async fn send_to_user(&self, user_id: &str, event: Event) -> Result<(), DeliveryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::SendToUser {
                user_id: user_id.to_string(),
                event,
                reply,
            })
            .await
            .map_err(|_| DeliveryError::HubClosed)?;
        rx.await.map_err(|_| DeliveryError::HubClosed)?
    }

    /// 当前在线连接数
    pub async fn client_count(&self) -> Result<usize, DeliveryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::ClientCount { reply })
            .await
            .map_err(|_| DeliveryError::HubClosed)?;
        rx.await.map_err(|_| DeliveryError::HubClosed)
    }
}

pub struct Hub {
    clients: HashMap<String, ClientHandle>,
    commands: mpsc::Receiver<HubCommand>,
    bus: Arc<Bus>,
    agent_responses: Subscription,
    chat_responses: Subscription,
    peer_messages: Subscription,
}

impl Hub {
    /// 创建 Hub 并立即订阅响应主题，run 之前发布的响应也会排队
    pub fn new(bus: Arc<Bus>) -> (Self, HubHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let hub = Self {
            clients: HashMap::new(),
            commands,
            agent_responses: bus.subscribe(topics::AGENT_RESPONSE),
            chat_responses: bus.subscribe(topics::CHAT_RESPONSE),
            peer_messages: bus.subscribe(topics::CHAT_DELIVER),
            bus,
        };
        (hub, HubHandle { tx })
    }

    /// 创建并在后台运行
    pub fn spawn(bus: Arc<Bus>, shutdown: CancellationToken) -> HubHandle {
        let (hub, handle) = Self::new(bus);
        tokio::spawn(hub.run(shutdown));
        handle
    }

    /// 控制循环，直到收到关闭信号或所有句柄被丢弃
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("hub started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(msg) = self.agent_responses.recv() => self.handle_bus_message(msg),
                Some(msg) = self.chat_responses.recv() => self.handle_bus_message(msg),
                Some(msg) = self.peer_messages.recv() => self.handle_bus_message(msg),
            }
        }

        for sub in [&self.agent_responses, &self.chat_responses, &self.peer_messages] {
            self.bus.unsubscribe(sub.topic(), sub.id());
        }
        for (_, client) in self.clients.drain() {
            client.close();
        }
        tracing::info!("hub stopped");
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register(client) => self.register(client),
            HubCommand::Unregister { user_id, conn_id } => self.unregister(&user_id, conn_id),
            HubCommand::SendToUser {
                user_id,
                event,
                reply,
            } => {
                let _ = reply.send(self.send_to_user(&user_id, event));
            }
            HubCommand::ClientCount { reply } => {
                let _ = reply.send(self.clients.len());
            }
        }
    }

    fn register(&mut self, client: ClientHandle) {
        let user_id = client.user_id.clone();
        let conn_id = client.conn_id;

        if let Some(previous) = self.clients.insert(user_id.clone(), client) {
            if previous.conn_id != conn_id {
                previous.close();
                tracing::info!(
                    user_id = %user_id,
                    conn_id = %previous.conn_id,
                    "evicted previous connection"
                );
            }
        }

        tracing::info!(
            user_id = %user_id,
            conn_id = %conn_id,
            total_clients = self.clients.len(),
            "client registered"
        );
    }

    fn unregister(&mut self, user_id: &str, conn_id: ConnId) {
        let current = self.clients.get(user_id).map(|c| c.conn_id);
        if current != Some(conn_id) {
            return;
        }
        if let Some(client) = self.clients.remove(user_id) {
            client.close();
            tracing::info!(
                user_id,
                conn_id = %conn_id,
                total_clients = self.clients.len(),
                "client unregistered"
            );
        }
    }

    fn send_to_user(&self, user_id: &str, event: Event) -> Result<(), DeliveryError> {
        let client = self
            .clients
            .get(user_id)
            .ok_or_else(|| DeliveryError::NotConnected(user_id.to_string()))?;
        client.try_send(event)
    }

    fn handle_bus_message(&mut self, msg: Message) {
        match msg.payload {
            Payload::AgentResponse(r) => {
                let event = Event::agent_response(&r.request_id, r.answer, r.results);
                self.route_response(&r.user_id, event);
            }
            Payload::ChatResponse(r) => {
                let event = Event::chat_response(&r.request_id, r.answer, r.results);
                self.route_response(&r.user_id, event);
            }
            Payload::PeerChatDeliver(d) => self.deliver_peer(d),
            Payload::AgentRequest(_) | Payload::ChatRequest(_) => {
                tracing::warn!(topic = %msg.topic, "unexpected request payload on response topic");
            }
        }
    }

    /// 响应只投给发起者；不在线或队列满时记录并丢弃
    fn route_response(&self, user_id: &str, event: Event) {
        let request_id = event.request_id.clone();
        match self.send_to_user(user_id, event) {
            Ok(()) => tracing::debug!(user_id, request_id = %request_id, "sent response to client"),
            Err(DeliveryError::NotConnected(_)) => {
                tracing::warn!(user_id, request_id = %request_id, "client not found for response, dropping");
            }
            Err(e) => {
                tracing::warn!(user_id, request_id = %request_id, "dropping response: {}", e);
            }
        }
    }

    /// 点对点消息：投给接收方并回显给发送方；失败只告知发送方
    fn deliver_peer(&self, d: PeerChatDeliver) {
        let event = Event::chat_deliver(&d.request_id, &d.from_user_id, &d.text, d.sent_at);

        match self.send_to_user(&d.to_user_id, event.clone()) {
            Ok(()) => {
                if d.to_user_id != d.from_user_id {
                    if let Err(e) = self.send_to_user(&d.from_user_id, event) {
                        tracing::debug!(
                            user_id = %d.from_user_id,
                            request_id = %d.request_id,
                            "echo to sender failed: {}",
                            e
                        );
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %d.from_user_id,
                    to_user_id = %d.to_user_id,
                    request_id = %d.request_id,
                    "peer delivery failed: {}",
                    e
                );
                let notice = Event::error(&d.request_id, e.to_string(), e.code());
                if let Err(e) = self.send_to_user(&d.from_user_id, notice) {
                    tracing::warn!(
                        user_id = %d.from_user_id,
                        request_id = %d.request_id,
                        "could not report delivery failure: {}",
                        e
                    );
                }
            }
        }
    }
}
