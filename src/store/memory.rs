//! 内存商品库
//!
//! 本地运行与测试使用；可从 JSON 目录文件加载种子数据。

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    matches_filter, ImageStore, Listing, ListingFilter, ListingImage, ListingSearch, SearchPage,
    SortOrder,
};
use crate::core::StoreError;

/// JSON 目录文件格式
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub listings: Vec<Listing>,
    pub images: Vec<ListingImage>,
}

#[derive(Default)]
pub struct MemoryListingStore {
    listings: RwLock<Vec<Listing>>,
    images: RwLock<Vec<ListingImage>>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: Catalog) -> Self {
        Self {
            listings: RwLock::new(catalog.listings),
            images: RwLock::new(catalog.images),
        }
    }

    /// 从 JSON 目录文件加载
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Catalog(format!("{}: {}", path.display(), e)))?;
        let catalog: Catalog = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Catalog(format!("{}: {}", path.display(), e)))?;

        tracing::info!(
            "Loaded catalog from {} ({} listings, {} images)",
            path.display(),
            catalog.listings.len(),
            catalog.images.len()
        );
        Ok(Self::from_catalog(catalog))
    }

    pub async fn insert_listing(&self, listing: Listing) {
        self.listings.write().await.push(listing);
    }

    pub async fn insert_image(&self, image: ListingImage) {
        self.images.write().await.push(image);
    }

    pub async fn len(&self) -> usize {
        self.listings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.listings.read().await.is_empty()
    }
}

#[async_trait]
impl ListingSearch for MemoryListingStore {
    async fn search(&self, filter: &ListingFilter) -> Result<SearchPage, StoreError> {
        let listings = self.listings.read().await;

        let mut hits: Vec<&Listing> = listings
            .iter()
            .filter(|l| matches_filter(l, filter))
            .collect();

        match filter.sort {
            SortOrder::CreatedDesc => hits.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortOrder::PriceAsc => hits.sort_by(|a, b| {
                a.price
                    .total_cmp(&b.price)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            }),
            SortOrder::PriceDesc => hits.sort_by(|a, b| {
                b.price
                    .total_cmp(&a.price)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            }),
        }

        let total = hits.len();
        let limit = if filter.limit == 0 { 20 } else { filter.limit };
        let items = hits
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .cloned()
            .collect();

        Ok(SearchPage { items, total })
    }
}

#[async_trait]
impl ImageStore for MemoryListingStore {
    /// 优先取标记为主图的图片，否则取最早上传的一张
    async fn primary_image(&self, listing_id: Uuid) -> Result<Option<ListingImage>, StoreError> {
        let images = self.images.read().await;
        let mut candidates: Vec<&ListingImage> =
            images.iter().filter(|i| i.listing_id == listing_id).collect();
        candidates.sort_by(|a, b| {
            b.is_primary
                .cmp(&a.is_primary)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(candidates.first().map(|i| (*i).clone()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::store::{Condition, ListingStatus};

    fn listing(title: &str, category: &str, price: f64, age_hours: i64) -> Listing {
        let at = Utc::now() - Duration::hours(age_hours);
        Listing {
            id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            title: title.to_string(),
            description: String::new(),
            category: category.to_string(),
            price,
            condition: Condition::Good,
            status: ListingStatus::Active,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_search_newest_first_with_limit_and_total() {
        let store = MemoryListingStore::new();
        store.insert_listing(listing("old desk", "Furniture", 20.0, 5)).await;
        store.insert_listing(listing("new desk", "Furniture", 30.0, 1)).await;
        store.insert_listing(listing("mid desk", "Furniture", 25.0, 3)).await;
        store.insert_listing(listing("iPhone", "Electronics", 300.0, 2)).await;

        let page = store
            .search(&ListingFilter {
                category: Some("Furniture".into()),
                limit: 2,
                ..ListingFilter::default()
            })
            .await
            .unwrap();

        assert_eq!(page.total, 3);
        let titles: Vec<_> = page.items.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, vec!["new desk", "mid desk"]);
    }

    #[tokio::test]
    async fn test_search_price_sort_and_status() {
        let store = MemoryListingStore::new();
        store.insert_listing(listing("a", "Other", 30.0, 1)).await;
        store.insert_listing(listing("b", "Other", 10.0, 1)).await;
        let mut sold = listing("c", "Other", 5.0, 1);
        sold.status = ListingStatus::Sold;
        store.insert_listing(sold).await;

        let page = store
            .search(&ListingFilter {
                sort: SortOrder::PriceAsc,
                ..ListingFilter::default()
            })
            .await
            .unwrap();
        let titles: Vec<_> = page.items.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_primary_image_prefers_flagged() {
        let store = MemoryListingStore::new();
        let l = listing("desk", "Furniture", 20.0, 1);
        let id = l.id;
        store.insert_listing(l).await;

        assert!(store.primary_image(id).await.unwrap().is_none());

        let base = Utc::now();
        store
            .insert_image(ListingImage {
                id: Uuid::new_v4(),
                listing_id: id,
                s3_key: "first.jpg".into(),
                is_primary: false,
                created_at: base - Duration::minutes(10),
            })
            .await;
        assert_eq!(store.primary_image(id).await.unwrap().unwrap().s3_key, "first.jpg");

        store
            .insert_image(ListingImage {
                id: Uuid::new_v4(),
                listing_id: id,
                s3_key: "cover.jpg".into(),
                is_primary: true,
                created_at: base,
            })
            .await;
        assert_eq!(store.primary_image(id).await.unwrap().unwrap().s3_key, "cover.jpg");
    }

    #[tokio::test]
    async fn test_load_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let l = listing("Calculator TI-84", "Electronics", 45.0, 1);
        let json = serde_json::json!({ "listings": [l] });
        std::fs::write(&path, json.to_string()).unwrap();

        let store = MemoryListingStore::load(&path).await.unwrap();
        assert_eq!(store.len().await, 1);

        assert!(MemoryListingStore::load(dir.path().join("missing.json")).await.is_err());
    }
}
