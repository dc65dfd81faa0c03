//! 查询分类：寒暄 / 致谢 / 闲聊 / 商品搜索
//!
//! 规则按表中顺序求值，第一条命中即返回；都不命中视为商品搜索。
//! 每条规则都带商品信号守卫，"hi, I need a calculator" 不会被当作寒暄吞掉。

/// 分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Greeting,
    Thanks,
    Conversational,
    ProductSearch,
}

impl Classification {
    pub fn is_product_search(&self) -> bool {
        matches!(self, Classification::ProductSearch)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Greeting => "greeting",
            Classification::Thanks => "thanks",
            Classification::Conversational => "conversational",
            Classification::ProductSearch => "product_search",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const PUNCT: &str = "!?.,;:";

const EXACT_GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "howdy", "greetings", "hii", "helloo", "heyy",
];

const GREETING_WORDS: &[&str] = &["hi", "hello", "hey", "howdy", "greetings"];

/// 寒暄之后出现这些词就不再是单纯的寒暄
const GREETING_PRODUCT_WORDS: &[&str] = &[
    "find", "search", "looking", "need", "want", "buy", "sell", "price", "textbook", "book",
    "laptop", "calculator", "furniture", "electronics", "clothing", "under", "cheap",
    "affordable", "macbook", "iphone", "cmpe",
];

const GREETING_FOLLOWUPS: &[&str] = &[
    "there",
    "how are you",
    "what's up",
    "how's it going",
    "nice to meet",
    "good to see",
    "how do you do",
    "pleasure",
    "nice",
    "good",
    "fine",
];

const THANKS_WORDS: &[&str] = &["thanks", "thank you", "thx", "appreciate", "grateful"];

/// 商品名词，出现即视为商品搜索
const PRODUCT_NOUNS: &[&str] = &[
    "iphone", "macbook", "laptop", "textbook", "book", "calculator", "desk", "chair",
    "furniture", "electronics", "clothing", "cmpe", "math", "course", "ipad", "tablet", "phone",
    "monitor", "keyboard", "mouse", "headphones", "speaker",
];

/// 搜索动作与价格用语
const SEARCH_TERMS: &[&str] = &[
    "find",
    "search",
    "looking for",
    "buy",
    "sell",
    "purchase",
    "price",
    "cheap",
    "affordable",
    "under $",
    "$",
];

const IDENTITY_PATTERNS: &[&str] = &[
    "how are you",
    "how's it going",
    "what's up",
    "what are you",
    "who are you",
    "what can you do",
    "what do you",
    "can you help",
    "tell me about yourself",
    "what is campus",
    "explain campus",
    "describe campus",
];

const HELP_PATTERNS: &[&str] = &[
    "need your help",
    "need help",
    "want your help",
    "want help",
    "can you help",
    "could you help",
    "would you help",
    "what can you",
    "what do you",
    "how can you",
    "how do you",
    "tell me about",
    "explain",
    "describe",
    "what is",
    "what are",
];

const QUESTION_WORDS: &[&str] = &[
    "what", "who", "how", "why", "when", "where", "can", "do", "are", "is", "you",
];

/// 短问句的长度上限（字节）
const SHORT_QUERY_LEN: usize = 20;

/// 寒暄判断的长度上限
const GREETING_MAX_LEN: usize = 50;

/// 归一化后的查询
struct Query<'a> {
    /// 去首尾空白并小写
    lower: &'a str,
    /// 在 lower 基础上再去掉首尾标点
    clean: &'a str,
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(*n))
}

fn has_product_noun(q: &Query) -> bool {
    contains_any(q.lower, PRODUCT_NOUNS)
}

fn has_product_signal(q: &Query) -> bool {
    has_product_noun(q) || contains_any(q.lower, SEARCH_TERMS)
}

fn is_greeting(q: &Query) -> bool {
    let clean = q.clean;
    if clean.len() > GREETING_MAX_LEN {
        return false;
    }
    if EXACT_GREETINGS.contains(&clean) {
        return true;
    }

    for g in GREETING_WORDS {
        let Some(rest) = clean.strip_prefix(g) else {
            continue;
        };
        if !rest.starts_with([' ', '!', '?', ',']) {
            continue;
        }
        let rest = rest.trim().trim_matches(|c: char| PUNCT.contains(c)).trim();
        if rest.is_empty() {
            return true;
        }
        if contains_any(rest, GREETING_PRODUCT_WORDS) {
            return false;
        }
        if contains_any(rest, GREETING_FOLLOWUPS) {
            return true;
        }
        if rest.split_whitespace().count() <= 2 && rest.len() < SHORT_QUERY_LEN {
            return true;
        }
    }
    false
}

fn is_thanks(q: &Query) -> bool {
    contains_any(q.lower, THANKS_WORDS) && !has_product_signal(q)
}

fn is_conversational(q: &Query) -> bool {
    if has_product_noun(q) {
        return false;
    }
    if contains_any(q.lower, IDENTITY_PATTERNS) || contains_any(q.lower, HELP_PATTERNS) {
        return true;
    }
    if q.lower.len() < SHORT_QUERY_LEN && !has_product_signal(q) {
        return q
            .lower
            .split(|c: char| c.is_whitespace() || PUNCT.contains(c))
            .any(|w| QUESTION_WORDS.contains(&w));
    }
    false
}

struct Rule {
    kind: Classification,
    matches: fn(&Query) -> bool,
}

const RULES: &[Rule] = &[
    Rule {
        kind: Classification::Greeting,
        matches: is_greeting,
    },
    Rule {
        kind: Classification::Thanks,
        matches: is_thanks,
    },
    Rule {
        kind: Classification::Conversational,
        matches: is_conversational,
    },
];

/// 对原始查询分类
pub fn classify(query: &str) -> Classification {
    let lower = query.trim().to_lowercase();
    let clean = lower.trim_matches(|c: char| PUNCT.contains(c)).trim();
    let q = Query {
        lower: &lower,
        clean,
    };

    RULES
        .iter()
        .find(|rule| (rule.matches)(&q))
        .map(|rule| rule.kind)
        .unwrap_or(Classification::ProductSearch)
}

/// 非商品查询在没有 LLM 时的固定回复
pub fn canned_reply(query: &str, kind: Classification) -> &'static str {
    let lower = query.trim().to_lowercase();
    match kind {
        Classification::Greeting => {
            "Hey! 👋 I'm the CampusHub assistant. I can help you find products on campus or just chat! Try asking me \"I want to buy iPhone 17\" or \"MacBook under $500\"!"
        }
        Classification::Thanks => {
            "You're welcome! 😊 If you need anything else, just ask. I can help you find products or answer questions!"
        }
        _ if lower.contains("how are you") => {
            "I'm doing great, thanks for asking! 😊 I'm here to help you find products on CampusHub. What are you looking for today?"
        }
        _ if lower.contains("what are you") || lower.contains("who are you") => {
            "I'm the CampusHub AI assistant! I help students find products like textbooks, electronics, furniture, and more. Just tell me what you're looking for, and I'll search our listings for you."
        }
        _ if lower.contains("what can you do") || lower.contains("help") => {
            "I can help you:\n• Search for products (e.g., \"I want to buy iPhone 17\" or \"MacBook under $500\")\n• Find textbooks by course (e.g., \"CMPE 202 textbook\")\n• Chat and answer questions\n\nJust ask me anything!"
        }
        _ => "I'm here to help! I can search for products on CampusHub or chat with you. What would you like to know?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greetings() {
        assert_eq!(classify("hi"), Classification::Greeting);
        assert_eq!(classify("  Hello!! "), Classification::Greeting);
        assert_eq!(classify("hey there, how are you?"), Classification::Greeting);
        assert_eq!(classify("heyy"), Classification::Greeting);
    }

    #[test]
    fn test_greeting_with_product_is_search() {
        assert_eq!(classify("hi, I need a calculator"), Classification::ProductSearch);
        assert_eq!(classify("hello looking for a desk"), Classification::ProductSearch);
    }

    #[test]
    fn test_thanks() {
        assert_eq!(classify("thanks!"), Classification::Thanks);
        assert_eq!(classify("Thank you so much"), Classification::Thanks);
        assert_eq!(
            classify("thanks, can you find a cheaper laptop"),
            Classification::ProductSearch
        );
    }

    #[test]
    fn test_conversational() {
        assert_eq!(classify("who are you?"), Classification::Conversational);
        assert_eq!(classify("what can you do"), Classification::Conversational);
        assert_eq!(classify("I need help"), Classification::Conversational);
        assert_eq!(classify("why?"), Classification::Conversational);
    }

    #[test]
    fn test_product_search() {
        assert_eq!(classify("MacBook under $500"), Classification::ProductSearch);
        assert_eq!(classify("used textbook for CMPE 202"), Classification::ProductSearch);
        assert_eq!(classify("desk"), Classification::ProductSearch);
        assert_eq!(classify("can you help me find a desk"), Classification::ProductSearch);
        // 短查询里的 "do" 只按整词匹配，"door" 不算问句
        assert_eq!(classify("door mat"), Classification::ProductSearch);
    }

    #[test]
    fn test_canned_replies() {
        assert!(canned_reply("hi", Classification::Greeting).starts_with("Hey!"));
        assert!(canned_reply("how are you", Classification::Conversational).starts_with("I'm doing great"));
        assert!(canned_reply("who are you", Classification::Conversational).contains("AI assistant"));
        assert!(canned_reply("I need help", Classification::Conversational).starts_with("I can help you:"));
        assert!(canned_reply("why?", Classification::Conversational).starts_with("I'm here to help!"));
    }
}
