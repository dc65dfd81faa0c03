//! 商品库抽象层
//!
//! Worker 只通过这里的窄接口访问外部协作方：商品检索、主图查询、对象存储签名。
//! 提供内存实现（JSON 目录种子）和 SQLite 实现（async-sqlite feature）。

mod memory;
mod presign;
#[cfg(feature = "async-sqlite")]
mod sqlite;

pub use memory::{Catalog, MemoryListingStore};
pub use presign::PublicUrlPresigner;
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteListingStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::StoreError;

/// 商品状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Sold,
    Removed,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "active",
            ListingStatus::Sold => "sold",
            ListingStatus::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ListingStatus::Active),
            "sold" => Some(ListingStatus::Sold),
            "removed" => Some(ListingStatus::Removed),
            _ => None,
        }
    }
}

/// 成色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    New,
    LikeNew,
    Good,
    Fair,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::New => "New",
            Condition::LikeNew => "LikeNew",
            Condition::Good => "Good",
            Condition::Fair => "Fair",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "New" => Some(Condition::New),
            "LikeNew" => Some(Condition::LikeNew),
            "Good" => Some(Condition::Good),
            "Fair" => Some(Condition::Fair),
            _ => None,
        }
    }
}

/// 商品（只读投影）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price: f64,
    pub condition: Condition,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 商品图片
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingImage {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub s3_key: String,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

/// 排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    CreatedDesc,
    PriceAsc,
    PriceDesc,
}

/// 检索条件；text 为空表示不按文本过滤
#[derive(Debug, Clone, PartialEq)]
pub struct ListingFilter {
    pub text: String,
    pub category: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub status: Option<ListingStatus>,
    pub limit: usize,
    pub offset: usize,
    pub sort: SortOrder,
}

impl Default for ListingFilter {
    fn default() -> Self {
        Self {
            text: String::new(),
            category: None,
            price_min: None,
            price_max: None,
            status: Some(ListingStatus::Active),
            limit: 20,
            offset: 0,
            sort: SortOrder::CreatedDesc,
        }
    }
}

/// 一页检索结果与匹配总数
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<Listing>,
    pub total: usize,
}

/// 商品检索
#[async_trait]
pub trait ListingSearch: Send + Sync {
    async fn search(&self, filter: &ListingFilter) -> Result<SearchPage, StoreError>;
}

/// 商品主图
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn primary_image(&self, listing_id: Uuid) -> Result<Option<ListingImage>, StoreError>;
}

/// 对象存储的限时访问地址
#[async_trait]
pub trait Presigner: Send + Sync {
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StoreError>;
}

/// 返回给客户端的主图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryImage {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// 返回给客户端的商品摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingSummary {
    pub id: String,
    pub seller_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price: f64,
    pub condition: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_image: Option<PrimaryImage>,
}

impl From<&Listing> for ListingSummary {
    fn from(l: &Listing) -> Self {
        Self {
            id: l.id.to_string(),
            seller_id: l.seller_id.to_string(),
            title: l.title.clone(),
            description: l.description.clone(),
            category: l.category.clone(),
            price: l.price,
            condition: l.condition.as_str().to_string(),
            status: l.status.as_str().to_string(),
            created_at: l.created_at,
            updated_at: l.updated_at,
            primary_image: None,
        }
    }
}

/// 按过滤条件判断单条商品是否命中（文本为标题或描述的大小写不敏感子串）
pub(crate) fn matches_filter(listing: &Listing, filter: &ListingFilter) -> bool {
    if let Some(status) = filter.status {
        if listing.status != status {
            return false;
        }
    }
    if let Some(category) = filter.category.as_deref() {
        if !category.is_empty() && listing.category != category {
            return false;
        }
    }
    if let Some(min) = filter.price_min {
        if listing.price < min {
            return false;
        }
    }
    if let Some(max) = filter.price_max {
        if listing.price > max {
            return false;
        }
    }
    if !filter.text.is_empty() {
        let needle = filter.text.to_lowercase();
        if !listing.title.to_lowercase().contains(&needle)
            && !listing.description.to_lowercase().contains(&needle)
        {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(title: &str, price: f64) -> Listing {
        let now = Utc::now();
        Listing {
            id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            title: title.to_string(),
            description: "barely used".to_string(),
            category: "Textbooks".to_string(),
            price,
            condition: Condition::Good,
            status: ListingStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_matches_filter_text_is_case_insensitive() {
        let l = listing("CMPE 202 Design Patterns", 35.0);
        let filter = ListingFilter {
            text: "cmpe 202".into(),
            ..ListingFilter::default()
        };
        assert!(matches_filter(&l, &filter));

        let filter = ListingFilter {
            text: "BARELY".into(),
            ..ListingFilter::default()
        };
        assert!(matches_filter(&l, &filter));
    }

    #[test]
    fn test_matches_filter_price_bounds_inclusive() {
        let l = listing("Desk", 40.0);
        let filter = ListingFilter {
            price_max: Some(40.0),
            price_min: Some(40.0),
            ..ListingFilter::default()
        };
        assert!(matches_filter(&l, &filter));

        let filter = ListingFilter {
            price_max: Some(39.99),
            ..ListingFilter::default()
        };
        assert!(!matches_filter(&l, &filter));
    }

    #[test]
    fn test_summary_json_shape() {
        let l = listing("Desk", 40.0);
        let json = serde_json::to_value(ListingSummary::from(&l)).unwrap();
        assert_eq!(json["sellerId"], l.seller_id.to_string());
        assert_eq!(json["condition"], "Good");
        assert_eq!(json["status"], "active");
        assert!(json.get("primaryImage").is_none());
        assert!(json["createdAt"].is_string());
    }
}
