//! 关键词处理：课程号展开、按课程号收窄、从自然语言中抽取商品关键词

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::store::Listing;

/// 课程号：2-5 个字母，可选分隔符，2-3 位数字，可选字母后缀（CMPE 202、math-133a）
fn course_code_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b([a-z]{2,5})\s*[- ]?\s*(\d{2,3}[a-z]?)\b").ok())
        .as_ref()
}

/// 小写去重，保持首次出现的顺序
struct Dedup {
    seen: HashSet<String>,
    out: Vec<String>,
}

impl Dedup {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            out: Vec::new(),
        }
    }

    fn add(&mut self, s: &str) {
        let s = s.trim().to_lowercase();
        if s.is_empty() || !self.seen.insert(s.clone()) {
            return;
        }
        self.out.push(s);
    }
}

/// 把 "cmpe202" 拆成 ("cmpe", "202")；字母段必须全是小写字母，数字段至少两位
fn split_alpha_numeric(s: &str) -> Option<(&str, &str)> {
    let i = s.find(|c: char| c.is_ascii_digit())?;
    if i == 0 || i >= s.len() - 1 {
        return None;
    }
    let (alpha, numeric) = s.split_at(i);
    if !alpha.chars().all(|c| c.is_ascii_lowercase()) {
        return None;
    }
    if !numeric.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((alpha, numeric))
}

/// 关键词展开：字母+数字的词额外生成 "cmpe202" / "cmpe 202" / "cmpe-202"，大小写不敏感去重
pub fn expand_keywords<S: AsRef<str>>(src: &[S]) -> Vec<String> {
    let mut d = Dedup::new();
    for tok in src {
        let tok = tok.as_ref();
        d.add(tok);

        let collapsed = tok.trim().to_lowercase().replace([' ', '-'], "");
        if let Some((alpha, numeric)) = split_alpha_numeric(&collapsed) {
            d.add(&format!("{}{}", alpha, numeric));
            d.add(&format!("{} {}", alpha, numeric));
            d.add(&format!("{}-{}", alpha, numeric));
        }
    }
    d.out
}

/// 查询里出现的课程号，连写形式（"cmpe202"）
pub fn collapsed_course_codes(text: &str) -> Vec<String> {
    let Some(re) = course_code_re() else {
        return Vec::new();
    };
    let lower = text.to_lowercase();
    let mut d = Dedup::new();
    for caps in re.captures_iter(&lower) {
        if let (Some(alpha), Some(num)) = (caps.get(1), caps.get(2)) {
            d.add(&format!("{}{}", alpha.as_str(), num.as_str()));
        }
    }
    d.out
}

/// 查询里出现的课程号的全部写法
pub fn course_tokens(text: &str) -> Vec<String> {
    let Some(re) = course_code_re() else {
        return Vec::new();
    };
    let lower = text.to_lowercase();
    let mut raw = Vec::new();
    for caps in re.captures_iter(&lower) {
        let (Some(alpha), Some(num)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let (alpha, num) = (alpha.as_str().trim(), num.as_str().trim());
        raw.push(format!("{}{}", alpha, num));
        raw.push(format!("{} {}", alpha, num));
        raw.push(format!("{}-{}", alpha, num));
    }
    expand_keywords(&raw)
}

/// 查询含课程号时只保留标题或描述里出现该课程号的商品；收窄为空时原样返回
pub fn narrow_by_course_tokens(query: &str, listings: Vec<Listing>) -> Vec<Listing> {
    let tokens = course_tokens(query);
    if tokens.is_empty() || listings.is_empty() {
        return listings;
    }

    let matched: Vec<Listing> = listings
        .iter()
        .filter(|l| {
            let text = format!("{} {}", l.title, l.description).to_lowercase();
            tokens.iter().any(|t| text.contains(t.as_str()))
        })
        .cloned()
        .collect();

    if matched.is_empty() {
        listings
    } else {
        matched
    }
}

const FILLER_PHRASES: &[&str] = &[
    "i want",
    "i need",
    "i'm looking for",
    "i am looking for",
    "looking for",
    "need",
    "want",
    "search for",
    "find",
    "show me",
    "give me",
    "can i get",
    "do you have",
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "should", "could", "may", "might", "this", "that", "these", "those",
    "under", "over", "above", "below",
];

/// 从自然语言查询中抽取商品关键词：去掉开头的口语前缀，再去停用词和价格词（"$40"）
pub fn product_keywords(query: &str) -> Vec<String> {
    let mut q = query.trim().to_lowercase();
    for filler in FILLER_PHRASES {
        if let Some(rest) = q.strip_prefix(filler) {
            q = rest.trim().to_string();
        }
    }

    q.split_whitespace()
        .map(|w| w.trim_matches(|c: char| ".,!?;:".contains(c)))
        .filter(|w| !w.is_empty() && !w.contains('$') && !STOP_WORDS.contains(w))
        .map(String::from)
        .collect()
}
