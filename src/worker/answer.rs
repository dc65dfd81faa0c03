//! 回答生成：三种提示模板 + 确定性兜底句式

use super::classify::{canned_reply, Classification};
use crate::llm::LlmClient;
use crate::store::ListingSummary;

/// 存储失败时返回给用户的回答
pub const APOLOGY: &str =
    "Sorry, I encountered an error processing your request. Please try again.";

/// 提示里最多列出的商品数
const MAX_PROMPT_LISTINGS: usize = 10;

/// 描述短于该长度才放进提示
const MAX_PROMPT_DESCRIPTION: usize = 100;

/// 回答所处的情形
#[derive(Debug, Clone, Copy)]
pub enum AnswerContext<'a> {
    Found(&'a [ListingSummary]),
    NotFound,
    Conversational(Classification),
}

/// 把商品整理成提示用的编号列表
pub fn format_listings(results: &[ListingSummary]) -> String {
    if results.is_empty() {
        return "No listings found.".to_string();
    }

    let mut out = String::new();
    for (i, l) in results.iter().take(MAX_PROMPT_LISTINGS).enumerate() {
        out.push_str(&format!("\n{}. {}", i + 1, l.title));
        if l.price > 0.0 {
            out.push_str(&format!(" - ${:.2}", l.price));
        }
        if !l.condition.is_empty() {
            out.push_str(&format!(" ({} condition)", l.condition));
        }
        if !l.category.is_empty() {
            out.push_str(&format!(" - Category: {}", l.category));
        }
        if !l.description.is_empty() && l.description.len() < MAX_PROMPT_DESCRIPTION {
            out.push_str(&format!(" - {}", l.description));
        }
    }
    out
}

/// 按情形选择提示模板
pub fn build_prompt(query: &str, ctx: AnswerContext<'_>) -> String {
    match ctx {
        AnswerContext::Found(results) => format!(
            r#"You are a helpful AI assistant for CampusHub, a campus marketplace where students buy and sell items.

The user asked: "{query}"

I found {count} matching listings in our database:

{listings}

Please provide a natural, friendly, and helpful response that:
1. Acknowledges what the user is looking for
2. Mentions that you found these listings
3. Highlights 2-3 key details about the best matches (title, price, condition)
4. Encourages them to check out the listings below
5. Keep it conversational and not too long (2-3 sentences)

Be friendly and helpful, like a real assistant would be."#,
            query = query,
            count = results.len(),
            listings = format_listings(results),
        ),
        AnswerContext::NotFound => format!(
            r#"You are a helpful AI assistant for CampusHub, a campus marketplace where students buy and sell items.

The user asked: "{query}"

Unfortunately, I couldn't find any matching listings in our database.

Please provide a natural, friendly, and helpful response that:
1. Acknowledges what they're looking for
2. Politely explains that no listings were found
3. Suggests they try different keywords, adjust price range, or check back later
4. Keep it conversational and encouraging (2-3 sentences)

Be friendly and helpful, like a real assistant would be."#,
            query = query,
        ),
        AnswerContext::Conversational(_) => format!(
            r#"You are a helpful AI assistant for CampusHub, a campus marketplace where students buy and sell items like textbooks, electronics, furniture, and more.

The user said: "{query}"

Please provide a natural, friendly, and conversational response. You can:
- Answer questions about CampusHub
- Help them understand how to use the platform
- Chat naturally about general topics
- Guide them on how to search for products (e.g., "I want to buy iPhone 17" or "MacBook under $500")

Keep your response friendly, helpful, and conversational (2-4 sentences). Don't be too formal."#,
            query = query,
        ),
    }
}

/// 不依赖 LLM 的回答
pub fn fallback_answer(query: &str, ctx: AnswerContext<'_>) -> String {
    match ctx {
        AnswerContext::Found(results) => format!(
            "I found {} listing(s) for '{}'. Check them out below!",
            results.len(),
            query
        ),
        AnswerContext::NotFound => format!(
            "I couldn't find any listings matching '{}'. Try adjusting your search or check back later!",
            query
        ),
        AnswerContext::Conversational(kind) => canned_reply(query, kind).to_string(),
    }
}

/// 生成回答：有 LLM 时请它措辞，失败或空回复时用确定性句式
pub async fn compose_answer(
    llm: Option<&dyn LlmClient>,
    query: &str,
    ctx: AnswerContext<'_>,
) -> String {
    let Some(llm) = llm else {
        return fallback_answer(query, ctx);
    };

    match llm.prompt(&build_prompt(query, ctx)).await {
        Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
        Ok(_) => fallback_answer(query, ctx),
        Err(e) => {
            tracing::warn!(error = %e, "LLM answer generation failed, using fallback");
            fallback_answer(query, ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::core::LlmError;
    use crate::llm::MockLlmClient;

    fn summary(title: &str, price: f64, description: &str) -> ListingSummary {
        ListingSummary {
            id: "id".into(),
            seller_id: "seller".into(),
            title: title.into(),
            description: description.into(),
            category: "Textbooks".into(),
            price,
            condition: "Good".into(),
            status: "active".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            primary_image: None,
        }
    }

    #[test]
    fn test_format_listings() {
        let results = vec![
            summary("CMPE 202 textbook", 35.0, "barely used"),
            summary("Free notes", 0.0, &"x".repeat(120)),
        ];
        assert_eq!(
            format_listings(&results),
            "\n1. CMPE 202 textbook - $35.00 (Good condition) - Category: Textbooks - barely used\n2. Free notes (Good condition) - Category: Textbooks"
        );
        assert_eq!(format_listings(&[]), "No listings found.");
    }

    #[test]
    fn test_format_caps_listing_count() {
        let results: Vec<ListingSummary> =
            (0..12).map(|i| summary(&format!("item {}", i), 1.0, "")).collect();
        let text = format_listings(&results);
        assert!(text.contains("\n10. item 9"));
        assert!(!text.contains("item 10"));
    }

    #[test]
    fn test_fallback_sentences() {
        let results = vec![summary("desk", 20.0, "")];
        assert_eq!(
            fallback_answer("desk", AnswerContext::Found(&results)),
            "I found 1 listing(s) for 'desk'. Check them out below!"
        );
        assert!(fallback_answer("desk", AnswerContext::NotFound).starts_with("I couldn't find"));
        assert!(
            fallback_answer("hi", AnswerContext::Conversational(Classification::Greeting))
                .starts_with("Hey!")
        );
    }

    #[tokio::test]
    async fn test_compose_uses_llm_reply() {
        let llm = MockLlmClient::with_replies(["  Here you go!  "]);
        let results = vec![summary("desk", 20.0, "")];
        let answer = compose_answer(Some(&llm), "desk", AnswerContext::Found(&results)).await;
        assert_eq!(answer, "Here you go!");
        assert!(llm.prompts()[0].contains("I found 1 matching listings"));
    }

    #[tokio::test]
    async fn test_compose_degrades_on_llm_error() {
        let llm = MockLlmClient::new();
        llm.push_error(LlmError::Request("503".into()));
        let answer = compose_answer(Some(&llm), "desk", AnswerContext::NotFound).await;
        assert!(answer.starts_with("I couldn't find any listings matching 'desk'"));
    }
}
