//! 相关性打分与阈值过滤

use std::collections::HashSet;

use super::keywords::product_keywords;
use crate::config::SearchSection;
use crate::store::Listing;

const EXACT_IN_TITLE: i64 = 1000;
const EXACT_IN_DESCRIPTION: i64 = 500;
const ALL_IN_TITLE: i64 = 800;
const ALL_IN_TEXT: i64 = 400;
const PER_TITLE_MATCH: i64 = 100;
const PER_DESCRIPTION_MATCH: i64 = 50;

/// 单条商品的得分；keywords 需已小写
pub fn score_listing(query: &str, keywords: &[String], listing: &Listing) -> i64 {
    let query = query.trim().to_lowercase();
    let title = listing.title.to_lowercase();
    let description = listing.description.to_lowercase();

    let mut score = 0;
    if !query.is_empty() {
        if title.contains(&query) {
            score += EXACT_IN_TITLE;
        } else if description.contains(&query) {
            score += EXACT_IN_DESCRIPTION;
        }
    }

    if keywords.is_empty() {
        return score;
    }

    let in_title = |k: &String| title.contains(k.as_str());
    let in_description = |k: &String| description.contains(k.as_str());

    if keywords.iter().all(in_title) {
        score += ALL_IN_TITLE;
    }
    if keywords.iter().all(|k| in_title(k) || in_description(k)) {
        score += ALL_IN_TEXT;
    }
    score += PER_TITLE_MATCH * keywords.iter().filter(|k| in_title(*k)).count() as i64;
    score += PER_DESCRIPTION_MATCH * keywords.iter().filter(|k| in_description(*k)).count() as i64;
    score
}

/// 排序用的关键词：查询中的商品词 ∪ 意图关键词，小写去重，保持出现顺序
pub fn ranking_keywords(query: &str, intent_keywords: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    product_keywords(query)
        .into_iter()
        .chain(intent_keywords.iter().map(|k| k.trim().to_lowercase()))
        .filter(|k| !k.is_empty() && seen.insert(k.clone()))
        .collect()
}

/// 按得分稳定降序，过滤低分项；过滤后为空时保留最高分的前 N 条
pub fn rank_and_filter(
    query: &str,
    intent_keywords: &[String],
    listings: Vec<Listing>,
    cfg: &SearchSection,
) -> Vec<Listing> {
    if listings.is_empty() {
        return listings;
    }

    let keywords = ranking_keywords(query, intent_keywords);
    if keywords.is_empty() {
        return listings;
    }

    let mut scored: Vec<(i64, Listing)> = listings
        .into_iter()
        .map(|l| (score_listing(query, &keywords, &l), l))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let min_score = if keywords.len() > 1 {
        cfg.multi_keyword_min_score
    } else {
        cfg.single_keyword_min_score
    };
    let total = scored.len();
    let top_score = scored[0].0;

    if scored.iter().any(|(s, _)| *s >= min_score) {
        let kept: Vec<Listing> = scored
            .into_iter()
            .filter(|(s, _)| *s >= min_score)
            .map(|(_, l)| l)
            .collect();
        if kept.len() < total {
            tracing::debug!(original = total, kept = kept.len(), top_score, "relevance filter reduced results");
        }
        return kept;
    }

    tracing::debug!(top_score, min_score, "relevance filter removed everything, keeping top scored");
    scored
        .into_iter()
        .take(cfg.fallback_top_n)
        .map(|(_, l)| l)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::store::{Condition, ListingStatus};

    fn listing(title: &str, description: &str) -> Listing {
        let now = Utc::now();
        Listing {
            id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            category: "Electronics".into(),
            price: 100.0,
            condition: Condition::Good,
            status: ListingStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    fn kws(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_score_components() {
        let l = listing("MacBook Pro 2019", "works great, new battery");
        // 完整短语在标题 + 全部在标题 + 全部在文本 + 2 个标题命中
        assert_eq!(
            score_listing("macbook pro", &kws(&["macbook", "pro"]), &l),
            1000 + 800 + 400 + 200
        );
        // 只有描述命中
        assert_eq!(score_listing("battery", &kws(&["battery"]), &l), 500 + 400 + 50);
        assert_eq!(score_listing("bike", &kws(&["bike"]), &l), 0);
    }

    #[test]
    fn test_exact_title_outranks_single_keyword() {
        let exact = listing("iPhone 13 case", "");
        let partial = listing("Phone stand", "for any iphone");
        let ranked = rank_and_filter(
            "iphone 13 case",
            &[],
            vec![partial.clone(), exact.clone()],
            &SearchSection::default(),
        );
        assert_eq!(ranked[0].id, exact.id);
    }

    #[test]
    fn test_threshold_filters_weak_matches() {
        let strong = listing("Desk lamp LED", "");
        let weak = listing("Lamp shade", "");

        // "Lamp shade" 只有一个标题命中（100），低于多关键词阈值 150
        let ranked = rank_and_filter(
            "desk lamp",
            &[],
            vec![weak.clone(), strong.clone()],
            &SearchSection::default(),
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, strong.id);

        let cfg = SearchSection {
            multi_keyword_min_score: 50,
            ..SearchSection::default()
        };
        let ranked = rank_and_filter("desk lamp", &[], vec![weak.clone(), strong.clone()], &cfg);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, strong.id);
        assert_eq!(ranked[1].id, weak.id);
    }

    #[test]
    fn test_never_filters_to_nothing() {
        let items: Vec<Listing> = (0..5).map(|i| listing(&format!("item {}", i), "")).collect();
        let ranked = rank_and_filter("unicorn saddle", &[], items, &SearchSection::default());
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn test_stable_for_equal_scores() {
        let a = listing("chair one", "");
        let b = listing("chair two", "");
        let ranked = rank_and_filter("chair", &[], vec![a.clone(), b.clone()], &SearchSection::default());
        assert_eq!(ranked[0].id, a.id);
        assert_eq!(ranked[1].id, b.id);
    }

    #[test]
    fn test_ranking_keywords_union() {
        assert_eq!(
            ranking_keywords("I want a MacBook", &kws(&["MacBook", "Pro"])),
            vec!["macbook", "pro"]
        );
    }
}
