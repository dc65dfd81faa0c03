//! 搜索意图抽取：LLM 优先，确定性规则兜底
//!
//! LLM 的任何失败（网络、超时、回复里没有 JSON、JSON 不合法）都只影响这一步，
//! 由 [`fallback_intent`] 的结果整体替代。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use super::keywords::{collapsed_course_codes, product_keywords};
use crate::core::IntentError;
use crate::llm::{LlmClient, Message};

/// 从查询中抽取出的检索条件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchIntent {
    #[serde(deserialize_with = "null_as_default")]
    pub category: String,
    #[serde(deserialize_with = "null_as_default")]
    pub keywords: Vec<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

impl SearchIntent {
    /// 四个字段都没有内容
    pub fn is_empty(&self) -> bool {
        self.category.trim().is_empty()
            && self.keywords.iter().all(|k| k.trim().is_empty())
            && self.min_price.is_none()
            && self.max_price.is_none()
    }
}

/// LLM 常把缺省字段写成 null
fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

const INTENT_PROMPT: &str = r#"You are a campus marketplace assistant. Analyze the user's query and extract search parameters.
Return ONLY a valid JSON object with these fields:
- category: one of "Textbooks", "Electronics", "Furniture", "Clothing", "Other", or "" if not specified
- keywords: array of relevant search terms (remove filler words like "I want", "to buy", "need")
- minPrice: minimum price as number or null
- maxPrice: maximum price as number or null

IMPORTANT: Extract prices from phrases like "under $500", "under 900$", "under 1600 dollars", "below $100", "less than $200", "max $300", "maximum $400", "up to $500", "at most $600", "cheaper than $700", "over $50", "above $100", "at least $200", "minimum $300", "more than $400".

Examples:
Query: "used textbook for cmpe202"
{"category":"Textbooks","keywords":["cmpe202","used"],"minPrice":null,"maxPrice":null}

Query: "MacBook under $500"
{"category":"Electronics","keywords":["MacBook"],"minPrice":null,"maxPrice":500}

Query: "i want to buy iphone 17 pro under 900$"
{"category":"Electronics","keywords":["iphone","17","pro"],"minPrice":null,"maxPrice":900}

Query: "i need macbook pro under 1600 dollars"
{"category":"Electronics","keywords":["macbook","pro"],"minPrice":null,"maxPrice":1600}

Query: "cheap desk"
{"category":"Furniture","keywords":["desk","cheap"],"minPrice":null,"maxPrice":null}"#;

/// 回复中第一个括号平衡的 `{...}`，字符串字面量里的括号不计
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 解析 LLM 回复（允许前后有说明文字或 ```json 代码块）
pub fn parse_intent_reply(reply: &str) -> Result<SearchIntent, IntentError> {
    let json = first_json_object(reply).ok_or(IntentError::NoJsonObject)?;
    serde_json::from_str(json).map_err(|e| IntentError::InvalidJson(e.to_string()))
}

fn under_price_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:under|below|less than|max|maximum|up to|at most|cheaper than)\s*\$?\s*(\d+(?:\.\d+)?)\s*\$?",
        )
        .ok()
    })
    .as_ref()
}

fn over_price_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:over|above|at least|minimum|more than)\s*\$?\s*(\d+(?:\.\d+)?)\s*\$?").ok()
    })
    .as_ref()
}

fn first_amount(re: Option<&Regex>, text: &str) -> Option<f64> {
    re?.captures(text)?.get(1)?.as_str().parse().ok()
}

/// 从文本中提取价格区间，返回 (min, max)
pub fn extract_prices(text: &str) -> (Option<f64>, Option<f64>) {
    let lower = text.to_lowercase();
    let max = first_amount(under_price_re(), &lower);
    let min = first_amount(over_price_re(), &lower);
    (min, max)
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(*w))
}

fn category_for(lower: &str) -> &'static str {
    // "macbook" 里的 "book" 不算书
    let without_macbook = lower.replace("macbook", "");
    if without_macbook.contains("book") {
        "Textbooks"
    } else if contains_any(lower, &["macbook", "laptop", "electronics", "iphone"]) {
        "Electronics"
    } else if contains_any(lower, &["desk", "chair", "furniture"]) {
        "Furniture"
    } else {
        ""
    }
}

/// 确定性意图：分词 + 子串规则定类目 + 正则取价格
///
/// 关键词里补上连写的课程号（"cmpe 202" → "cmpe202"），后续展开能覆盖各种写法。
pub fn fallback_intent(query: &str) -> SearchIntent {
    let lower = query.trim().to_lowercase();
    let (min_price, max_price) = extract_prices(&lower);

    let mut keywords = product_keywords(&lower);
    for code in collapsed_course_codes(&lower) {
        if !keywords.contains(&code) {
            keywords.push(code);
        }
    }

    SearchIntent {
        category: category_for(&lower).to_string(),
        keywords,
        min_price,
        max_price,
    }
}

/// 合并：LLM 意图有任何内容就用它（价格都为空时用正则补齐），否则整体改用兜底意图
pub fn merge(llm: Option<SearchIntent>, query: &str) -> SearchIntent {
    match llm {
        Some(mut intent) if !intent.is_empty() => {
            if intent.min_price.is_none() && intent.max_price.is_none() {
                let (min, max) = extract_prices(query);
                if min.is_some() || max.is_some() {
                    tracing::debug!(?min, ?max, "backfilled price bounds from query text");
                }
                intent.min_price = min;
                intent.max_price = max;
            }
            intent.keywords.retain(|k| !k.trim().is_empty());
            intent
        }
        _ => fallback_intent(query),
    }
}

/// 请 LLM 抽取意图；未配置或失败时返回 None
pub async fn llm_intent(llm: Option<&dyn LlmClient>, query: &str) -> Option<SearchIntent> {
    let llm = llm?;
    let messages = vec![
        Message::system(INTENT_PROMPT),
        Message::user(format!("Now analyze this query: {}", query)),
    ];

    let reply = match llm.complete(&messages).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(error = %e, "LLM intent extraction failed, using heuristic");
            return None;
        }
    };

    match parse_intent_reply(&reply) {
        Ok(intent) => Some(intent),
        Err(e) => {
            tracing::warn!(error = %e, "LLM intent reply unusable, using heuristic");
            None
        }
    }
}

/// 抽取意图：LLM + 兜底合并
pub async fn extract_intent(llm: Option<&dyn LlmClient>, query: &str) -> SearchIntent {
    let intent = merge(llm_intent(llm, query).await, query);
    tracing::info!(
        category = %intent.category,
        keywords = ?intent.keywords,
        min_price = ?intent.min_price,
        max_price = ?intent.max_price,
        "search intent"
    );
    intent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LlmError;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_extract_prices() {
        assert_eq!(extract_prices("MacBook under $500"), (None, Some(500.0)));
        assert_eq!(extract_prices("textbooks over $20"), (Some(20.0), None));
        assert_eq!(extract_prices("iphone under 900$"), (None, Some(900.0)));
        assert_eq!(
            extract_prices("desk at least 30 and at most 80.5"),
            (Some(30.0), Some(80.5))
        );
        assert_eq!(extract_prices("cheap desk"), (None, None));
    }

    #[test]
    fn test_fallback_intent_course_query() {
        let intent = fallback_intent("used CMPE 202 textbook under $40");
        assert_eq!(intent.category, "Textbooks");
        assert_eq!(intent.max_price, Some(40.0));
        assert_eq!(intent.min_price, None);
        assert!(intent.keywords.contains(&"cmpe202".to_string()));
        assert!(intent.keywords.contains(&"textbook".to_string()));
        assert!(!intent.keywords.iter().any(|k| k.contains('$')));
    }

    #[test]
    fn test_fallback_category_rules() {
        assert_eq!(fallback_intent("MacBook pro").category, "Electronics");
        assert_eq!(fallback_intent("standing desk").category, "Furniture");
        assert_eq!(fallback_intent("macbook case").category, "Electronics");
        assert_eq!(fallback_intent("macbook or a notebook").category, "Textbooks");
        assert_eq!(fallback_intent("bike").category, "");
    }

    #[test]
    fn test_parse_reply_with_surrounding_text() {
        let reply = "Sure! ```json\n{\"category\":\"Electronics\",\"keywords\":[\"MacBook\"],\"minPrice\":null,\"maxPrice\":500}\n``` hope that {helps}";
        let intent = parse_intent_reply(reply).unwrap();
        assert_eq!(intent.category, "Electronics");
        assert_eq!(intent.keywords, vec!["MacBook"]);
        assert_eq!(intent.max_price, Some(500.0));
    }

    #[test]
    fn test_parse_reply_braces_inside_strings() {
        let reply = r#"{"category":"Other","keywords":["a}b"],"minPrice":null,"maxPrice":null}"#;
        assert_eq!(parse_intent_reply(reply).unwrap().keywords, vec!["a}b"]);
    }

    #[test]
    fn test_parse_reply_errors() {
        assert_eq!(
            parse_intent_reply("no json here"),
            Err(IntentError::NoJsonObject)
        );
        assert!(matches!(
            parse_intent_reply("{\"category\": 5}"),
            Err(IntentError::InvalidJson(_))
        ));
        // null 字段视为缺省
        let intent = parse_intent_reply(r#"{"category":null,"keywords":null}"#).unwrap();
        assert!(intent.is_empty());
    }

    #[test]
    fn test_merge_backfills_prices() {
        let llm = SearchIntent {
            category: "Electronics".into(),
            keywords: vec!["macbook".into()],
            ..Default::default()
        };
        let merged = merge(Some(llm), "macbook under $500");
        assert_eq!(merged.category, "Electronics");
        assert_eq!(merged.max_price, Some(500.0));
    }

    #[test]
    fn test_merge_empty_llm_intent_uses_fallback() {
        let merged = merge(Some(SearchIntent::default()), "cheap desk");
        assert_eq!(merged.category, "Furniture");
        assert_eq!(merged.keywords, vec!["cheap", "desk"]);

        let merged = merge(None, "cheap desk");
        assert_eq!(merged.category, "Furniture");
    }

    #[tokio::test]
    async fn test_extract_intent_with_llm_reply() {
        let llm = MockLlmClient::with_replies([
            r#"{"category":"Textbooks","keywords":["cmpe202","used"],"minPrice":null,"maxPrice":null}"#,
        ]);
        let intent = extract_intent(Some(&llm), "used textbook for cmpe202 under $40").await;
        assert_eq!(intent.category, "Textbooks");
        assert_eq!(intent.keywords, vec!["cmpe202", "used"]);
        assert_eq!(intent.max_price, Some(40.0));
        assert!(llm.prompts()[0].contains("cmpe202"));
    }

    #[tokio::test]
    async fn test_extract_intent_llm_failure_degrades() {
        let llm = MockLlmClient::new();
        llm.push_error(LlmError::Timeout(30));
        let intent = extract_intent(Some(&llm), "MacBook under $500").await;
        assert_eq!(intent.category, "Electronics");
        assert_eq!(intent.max_price, Some(500.0));
        assert!(intent.keywords.contains(&"macbook".to_string()));
    }
}
