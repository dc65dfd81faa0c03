//! 单次查询的完整处理流程
//!
//! 分类 → 意图 → 检索阶梯 → 课程号收窄 → 相关性排序 → 补全 → 回答。
//! 只有存储错误会中止流程；LLM 在任何一步失败都退回确定性实现。

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use super::answer::{compose_answer, AnswerContext, APOLOGY};
use super::classify::classify;
use super::enrich::Enricher;
use super::intent::extract_intent;
use super::keywords::narrow_by_course_tokens;
use super::ladder::search_with_ladder;
use super::rank::rank_and_filter;
use crate::config::SearchSection;
use crate::core::StoreError;
use crate::llm::LlmClient;
use crate::store::{ImageStore, ListingSearch, ListingSummary, Presigner};

/// 一次查询的结果
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub answer: String,
    pub results: Vec<ListingSummary>,
}

impl PipelineOutput {
    /// 存储失败时的道歉回答，不带结果
    pub fn apology() -> Self {
        Self {
            answer: APOLOGY.to_string(),
            results: Vec::new(),
        }
    }
}

pub struct QueryPipeline {
    search: Arc<dyn ListingSearch>,
    enricher: Enricher,
    llm: Option<Arc<dyn LlmClient>>,
    config: SearchSection,
}

impl QueryPipeline {
    pub fn new(search: Arc<dyn ListingSearch>, config: SearchSection) -> Self {
        Self {
            search,
            enricher: Enricher::new().with_call_timeout(config.store_timeout()),
            llm: None,
            config,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_images(mut self, images: Arc<dyn ImageStore>) -> Self {
        self.enricher = self.enricher.with_images(images);
        self
    }

    pub fn with_presigner(mut self, presigner: Arc<dyn Presigner>, expiry: Duration) -> Self {
        self.enricher = self.enricher.with_presigner(presigner, expiry);
        self
    }

    fn llm(&self) -> Option<&dyn LlmClient> {
        self.llm.as_deref()
    }

    /// 处理一条查询；仅在存储失败时返回错误
    pub async fn process(&self, query: &str) -> Result<PipelineOutput, StoreError> {
        let query = query.trim();
        let kind = classify(query);
        tracing::info!(query, classification = %kind, "processing query");

        if !kind.is_product_search() {
            let answer = compose_answer(self.llm(), query, AnswerContext::Conversational(kind)).await;
            return Ok(PipelineOutput {
                answer,
                results: Vec::new(),
            });
        }

        let intent = extract_intent(self.llm(), query).await;

        let listings = search_with_ladder(
            self.search.as_ref(),
            &intent,
            self.config.page_size,
            self.config.store_timeout(),
        )
        .await?;
        let listings = narrow_by_course_tokens(query, listings);
        let listings = rank_and_filter(query, &intent.keywords, listings, &self.config);
        let results = self.enricher.enrich(&listings).await;

        let ctx = if results.is_empty() {
            AnswerContext::NotFound
        } else {
            AnswerContext::Found(&results)
        };
        let answer = compose_answer(self.llm(), query, ctx).await;

        tracing::info!(query, results = results.len(), "query processed");
        Ok(PipelineOutput { answer, results })
    }

    /// 处理一条查询，存储失败转为道歉回答
    ///
    /// 整个流程运行在 `query` span 内，各步骤的降级日志都带上 user_id 与 request_id。
    pub async fn respond(&self, user_id: &str, request_id: &str, query: &str) -> PipelineOutput {
        let span = tracing::info_span!("query", user_id = %user_id, request_id = %request_id);
        async {
            match self.process(query).await {
                Ok(output) => output,
                Err(e) => {
                    tracing::error!(error = %e, "query failed on storage");
                    PipelineOutput::apology()
                }
            }
        }
        .instrument(span)
        .await
    }
}
