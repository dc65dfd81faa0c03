//! 逐级放宽的检索阶梯
//!
//! 依次尝试：类目+展开关键词 → 类目+原始关键词 → 仅类目 → 去类目+展开关键词 →
//! 去类目+原始关键词 → 去类目去文本。价格区间、在售状态、每页条数、新品优先在每一级保持不变。
//! 第一个非空结果即返回；存储错误或单级超时中止整个阶梯。

use std::time::Duration;

use super::intent::SearchIntent;
use super::keywords::expand_keywords;
use crate::core::StoreError;
use crate::store::{Listing, ListingFilter, ListingSearch, ListingStatus, SortOrder};

/// 阶梯的一级
#[derive(Debug, Clone, PartialEq)]
pub struct Rung {
    pub reason: &'static str,
    pub filter: ListingFilter,
}

/// 构造检索阶梯；与前面某级完全相同的过滤条件不再重复
pub fn build_ladder(intent: &SearchIntent, page_size: usize) -> Vec<Rung> {
    let category = Some(intent.category.trim())
        .filter(|c| !c.is_empty())
        .map(String::from);

    let base = ListingFilter {
        text: String::new(),
        category: category.clone(),
        price_min: intent.min_price,
        price_max: intent.max_price,
        status: Some(ListingStatus::Active),
        limit: page_size,
        offset: 0,
        sort: SortOrder::CreatedDesc,
    };

    let mut variants = Vec::new();
    if !intent.keywords.is_empty() {
        variants.push(expand_keywords(&intent.keywords).join(" "));
        variants.push(intent.keywords.join(" "));
    }
    variants.push(String::new());

    let mut candidates = Vec::new();
    for text in &variants {
        candidates.push(Rung {
            reason: "category+text",
            filter: ListingFilter {
                text: text.clone(),
                ..base.clone()
            },
        });
    }
    for text in &variants {
        candidates.push(Rung {
            reason: "text-only",
            filter: ListingFilter {
                text: text.clone(),
                category: None,
                ..base.clone()
            },
        });
    }
    candidates.push(Rung {
        reason: "broad",
        filter: ListingFilter {
            category: None,
            ..base
        },
    });

    let mut rungs: Vec<Rung> = Vec::with_capacity(candidates.len());
    for rung in candidates {
        if !rungs.iter().any(|r| r.filter == rung.filter) {
            rungs.push(rung);
        }
    }
    rungs
}

/// 逐级检索，返回第一组非空结果；全部为空时返回空列表
///
/// 每一级调用都受 `timeout` 约束，超时按存储错误处理。
pub async fn search_with_ladder(
    search: &dyn ListingSearch,
    intent: &SearchIntent,
    page_size: usize,
    timeout: Duration,
) -> Result<Vec<Listing>, StoreError> {
    for rung in build_ladder(intent, page_size) {
        let page = tokio::time::timeout(timeout, search.search(&rung.filter))
            .await
            .map_err(|_| StoreError::Timeout(timeout.as_secs()))??;
        tracing::debug!(
            reason = rung.reason,
            text = %rung.filter.text,
            category = ?rung.filter.category,
            hits = page.items.len(),
            "search attempt"
        );
        if !page.items.is_empty() {
            tracing::info!(reason = rung.reason, hits = page.items.len(), "search ladder hit");
            return Ok(page.items);
        }
    }
    tracing::info!("search ladder exhausted with no hits");
    Ok(Vec::new())
}
