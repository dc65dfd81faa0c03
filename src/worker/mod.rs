//! 查询 Worker
//!
//! ## 组成
//!
//! - **classify**：寒暄 / 致谢 / 闲聊 / 商品搜索 规则表
//! - **intent**：LLM 抽取检索条件，失败退回正则与子串规则
//! - **keywords**：课程号展开与收窄、商品关键词抽取
//! - **ladder**：逐级放宽的检索阶梯
//! - **rank**：相关性打分与阈值过滤
//! - **enrich**：主图与签名地址
//! - **answer**：回答模板与兜底句式
//! - **pipeline**：把以上步骤串成一次查询
//!
//! 每个请求主题只订阅一次；同一主题的多个消费循环竞争同一个队列，
//! 每个循环内最多并发 `max_concurrent` 条流水线。

pub mod answer;
pub mod classify;
pub mod enrich;
pub mod intent;
pub mod keywords;
pub mod ladder;
pub mod pipeline;
pub mod rank;

pub use classify::{classify, Classification};
pub use intent::SearchIntent;
pub use pipeline::{PipelineOutput, QueryPipeline};

use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{
    topics, AgentResponse, Bus, ChatResponse, Message, Payload, Subscription, SubscriptionId,
};
use crate::config::WorkerSection;

/// 运行中的 Worker：消费循环句柄与各主题的订阅
pub struct WorkerPool {
    bus: Arc<Bus>,
    subscriptions: Vec<(&'static str, SubscriptionId)>,
    loops: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// 订阅 agent.request 与 chat.request，为每个主题启动 `loops` 个消费循环
    pub fn spawn(
        bus: Arc<Bus>,
        pipeline: Arc<QueryPipeline>,
        config: &WorkerSection,
        shutdown: CancellationToken,
    ) -> Self {
        let loops_per_topic = config.loops.max(1);
        let max_concurrent = config.max_concurrent.max(1);

        let mut subscriptions = Vec::new();
        let mut loops = Vec::new();
        for topic in [topics::AGENT_REQUEST, topics::CHAT_REQUEST] {
            let sub = bus.subscribe(topic);
            subscriptions.push((topic, sub.id()));
            let queue = Arc::new(Mutex::new(sub));

            for n in 0..loops_per_topic {
                loops.push(tokio::spawn(consume(
                    n,
                    Arc::clone(&queue),
                    Arc::clone(&bus),
                    Arc::clone(&pipeline),
                    max_concurrent,
                    shutdown.clone(),
                )));
            }
        }

        tracing::info!(loops_per_topic, max_concurrent, "query workers started");
        Self {
            bus,
            subscriptions,
            loops,
        }
    }

    /// 等待所有消费循环退出（由 shutdown 触发）并退订
    pub async fn join(self) {
        for handle in self.loops {
            if let Err(e) = handle.await {
                tracing::error!("worker loop panicked: {}", e);
            }
        }
        for (topic, id) in self.subscriptions {
            self.bus.unsubscribe(topic, id);
        }
        tracing::info!("query workers stopped");
    }
}

/// 一个消费循环：先拿并发许可再取消息，取到后在独立任务里跑流水线
async fn consume(
    n: usize,
    queue: Arc<Mutex<Subscription>>,
    bus: Arc<Bus>,
    pipeline: Arc<QueryPipeline>,
    max_concurrent: usize,
    shutdown: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent));

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = async { queue.lock().await.recv().await } => message,
        };
        let Some(message) = message else {
            break;
        };

        let bus = Arc::clone(&bus);
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            handle_message(&bus, &pipeline, message).await;
            drop(permit);
        });
    }

    tracing::debug!(worker = n, "worker loop exiting");
}

/// 处理一条请求并把响应发布到对应主题；user_id 与 request_id 原样带回
pub async fn handle_message(bus: &Bus, pipeline: &QueryPipeline, message: Message) {
    match message.payload {
        Payload::AgentRequest(req) => {
            let out = pipeline.respond(&req.user_id, &req.request_id, &req.query).await;
            bus.publish_payload(Payload::AgentResponse(AgentResponse {
                user_id: req.user_id,
                request_id: req.request_id,
                answer: out.answer,
                results: out.results,
            }));
        }
        Payload::ChatRequest(req) => {
            let out = pipeline.respond(&req.user_id, &req.request_id, &req.text).await;
            bus.publish_payload(Payload::ChatResponse(ChatResponse {
                user_id: req.user_id,
                request_id: req.request_id,
                answer: out.answer,
                results: out.results,
            }));
        }
        other => {
            tracing::warn!(
                topic = %message.topic,
                request_id = other.request_id(),
                "unexpected payload on request topic"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bus::{AgentRequest, ChatRequest};
    use crate::config::SearchSection;
    use crate::store::MemoryListingStore;

    fn pipeline() -> Arc<QueryPipeline> {
        Arc::new(QueryPipeline::new(
            Arc::new(MemoryListingStore::new()),
            SearchSection::default(),
        ))
    }

    #[tokio::test]
    async fn test_agent_request_roundtrip_over_bus() {
        let bus = Arc::new(Bus::new(16));
        let mut responses = bus.subscribe(topics::AGENT_RESPONSE);
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::spawn(
            Arc::clone(&bus),
            pipeline(),
            &WorkerSection::default(),
            shutdown.clone(),
        );

        bus.publish_payload(Payload::AgentRequest(AgentRequest {
            user_id: "u1".into(),
            request_id: "r1".into(),
            query: "desk".into(),
        }));

        let msg = tokio::time::timeout(Duration::from_secs(5), responses.recv())
            .await
            .unwrap()
            .unwrap();
        match msg.payload {
            Payload::AgentResponse(resp) => {
                assert_eq!(resp.user_id, "u1");
                assert_eq!(resp.request_id, "r1");
                assert!(resp.results.is_empty());
                assert!(resp.answer.starts_with("I couldn't find"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        shutdown.cancel();
        pool.join().await;
        assert_eq!(bus.subscriber_count(topics::AGENT_REQUEST), 0);
    }

    #[tokio::test]
    async fn test_chat_request_goes_to_chat_response() {
        let bus = Arc::new(Bus::new(16));
        let mut responses = bus.subscribe(topics::CHAT_RESPONSE);
        let shutdown = CancellationToken::new();
        let config = WorkerSection {
            loops: 3,
            max_concurrent: 2,
        };
        let pool = WorkerPool::spawn(Arc::clone(&bus), pipeline(), &config, shutdown.clone());

        for i in 0..4 {
            bus.publish_payload(Payload::ChatRequest(ChatRequest {
                user_id: "u2".into(),
                request_id: format!("c{}", i),
                text: "thanks!".into(),
            }));
        }

        // 多个循环竞争同一队列，每条请求只处理一次
        let mut ids = Vec::new();
        for _ in 0..4 {
            let msg = tokio::time::timeout(Duration::from_secs(5), responses.recv())
                .await
                .unwrap()
                .unwrap();
            if let Payload::ChatResponse(resp) = msg.payload {
                assert!(resp.answer.starts_with("You're welcome!"));
                ids.push(resp.request_id);
            }
        }
        ids.sort();
        assert_eq!(ids, vec!["c0", "c1", "c2", "c3"]);
        assert!(responses.try_recv().is_none());

        shutdown.cancel();
        pool.join().await;
    }
}
