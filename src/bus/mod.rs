//! 进程内发布/订阅总线
//!
//! - 按主题名汇合，一个主题可有多个订阅者，每个订阅者持有独立的有界队列
//! - 发布永不阻塞：某个订阅者队列满时只有它丢失这条消息，其余订阅者照常收到
//! - 至多一次、尽力而为；不持久化、不重放，不同订阅者之间不保证顺序
//!
//! 订阅者列表是唯一需要互斥的结构：订阅/退订取写锁，发布扇出取读锁，
//! 并发发布之间互不串行。

mod message;

pub use message::{
    topics, AgentRequest, AgentResponse, ChatRequest, ChatResponse, Message, Payload,
    PeerChatDeliver,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// 订阅 ID（退订时用于定位具体队列）
pub type SubscriptionId = u64;

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<Message>,
}

/// 一次订阅：调用方负责持续消费
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    rx: mpsc::Receiver<Message>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 等待下一条消息；退订（队列关闭）且已取空后返回 None
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

/// 消息总线
pub struct Bus {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl Bus {
    /// capacity 为每个订阅队列的容量
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// 订阅主题，返回新的有界有序队列
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let list = subscribers.entry(topic.to_string()).or_default();
        // 顺带清理接收端已被丢弃的订阅
        list.retain(|s| !s.tx.is_closed());
        list.push(Subscriber { id, tx });

        tracing::debug!(topic, subscription_id = id, "bus subscribe");
        Subscription {
            id,
            topic: topic.to_string(),
            rx,
        }
    }

    /// 向主题的所有订阅者扇出，逐个非阻塞投递
    pub fn publish(&self, topic: &str, payload: Payload) {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(list) = subscribers.get(topic) else {
            tracing::debug!(topic, request_id = payload.request_id(), "publish with no subscribers");
            return;
        };

        let message = Message {
            topic: topic.to_string(),
            payload,
        };

        for sub in list {
            match sub.tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(dropped)) => {
                    tracing::warn!(
                        topic,
                        subscription_id = sub.id,
                        request_id = dropped.payload.request_id(),
                        "subscriber queue full, dropping message"
                    );
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    /// 发布到负载的默认主题
    pub fn publish_payload(&self, payload: Payload) {
        let topic = payload.topic();
        self.publish(topic, payload);
    }

    /// 退订并关闭指定队列；已不存在时无操作
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(list) = subscribers.get_mut(topic) {
            // 移除即丢弃 Sender，接收端取空后得到 None
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subscribers.remove(topic);
            }
        }
    }

    /// 主题当前的订阅者数量
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn request(id: &str) -> Payload {
        Payload::AgentRequest(AgentRequest {
            user_id: "u1".into(),
            request_id: id.into(),
            query: "desk".into(),
        })
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = Bus::new(4);
        bus.publish(topics::AGENT_REQUEST, request("r1"));
        assert_eq!(bus.subscriber_count(topics::AGENT_REQUEST), 0);
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let bus = Bus::new(4);
        let mut a = bus.subscribe(topics::AGENT_REQUEST);
        let mut b = bus.subscribe(topics::AGENT_REQUEST);
        let mut other = bus.subscribe(topics::CHAT_REQUEST);

        bus.publish(topics::AGENT_REQUEST, request("r1"));

        assert_eq!(a.recv().await.unwrap().payload.request_id(), "r1");
        assert_eq!(b.recv().await.unwrap().payload.request_id(), "r1");
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_full_subscriber_only_loses_its_own_copy() {
        let bus = Bus::new(1);
        let mut slow = bus.subscribe(topics::AGENT_REQUEST);
        let mut fast = bus.subscribe(topics::AGENT_REQUEST);

        bus.publish(topics::AGENT_REQUEST, request("r1"));
        assert_eq!(fast.recv().await.unwrap().payload.request_id(), "r1");

        // slow 仍持有 r1，队列已满
        bus.publish(topics::AGENT_REQUEST, request("r2"));

        assert_eq!(fast.recv().await.unwrap().payload.request_id(), "r2");
        assert_eq!(slow.recv().await.unwrap().payload.request_id(), "r1");
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_order_preserved_per_subscriber() {
        let bus = Bus::new(16);
        let mut sub = bus.subscribe(topics::AGENT_REQUEST);
        for i in 0..10 {
            bus.publish(topics::AGENT_REQUEST, request(&format!("r{}", i)));
        }
        for i in 0..10 {
            let msg = sub.recv().await.unwrap();
            assert_eq!(msg.payload.request_id(), format!("r{}", i));
            assert_eq!(msg.topic, topics::AGENT_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_queue_and_is_idempotent() {
        let bus = Bus::new(4);
        let mut sub = bus.subscribe(topics::CHAT_RESPONSE);
        bus.publish(topics::CHAT_RESPONSE, request("r1"));

        bus.unsubscribe(topics::CHAT_RESPONSE, sub.id());
        bus.unsubscribe(topics::CHAT_RESPONSE, sub.id());
        bus.unsubscribe("no.such.topic", 42);

        // 已入队的消息仍可取出，之后队列关闭
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
        assert_eq!(bus.subscriber_count(topics::CHAT_RESPONSE), 0);
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = Arc::new(Bus::new(1000));
        let mut sub = bus.subscribe(topics::AGENT_REQUEST);

        let mut handles = Vec::new();
        for p in 0..4 {
            let bus = Arc::clone(&bus);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    bus.publish(topics::AGENT_REQUEST, request(&format!("p{}-{}", p, i)));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut received = 0;
        while sub.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, 200);
    }

    #[test]
    fn test_payload_default_topic() {
        let payload = Payload::ChatRequest(ChatRequest {
            user_id: "u1".into(),
            request_id: "r9".into(),
            text: "hello".into(),
        });
        assert_eq!(payload.topic(), topics::CHAT_REQUEST);
        assert_eq!(payload.request_id(), "r9");
    }
}
