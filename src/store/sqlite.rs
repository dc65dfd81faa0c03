//! SQLite 商品库
//!
//! 启用 async-sqlite feature 时可用；表结构为商品库的只读投影，
//! 时间以统一格式的 RFC3339 文本存储，可直接按字典序排序。

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use super::{
    Condition, ImageStore, Listing, ListingFilter, ListingImage, ListingSearch, ListingStatus,
    SearchPage, SortOrder,
};
use crate::core::StoreError;

pub struct SqliteListingStore {
    pool: SqlitePool,
}

impl SqliteListingStore {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        tracing::info!("SQLite listing store opened at {}", db_path.as_ref().display());
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS listings (
                id TEXT PRIMARY KEY,
                seller_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL,
                price REAL NOT NULL,
                condition TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS listing_images (
                id TEXT PRIMARY KEY,
                listing_id TEXT NOT NULL,
                s3_key TEXT NOT NULL,
                is_primary INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (listing_id) REFERENCES listings(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_listings_status ON listings(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_listing_images_listing ON listing_images(listing_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_listing(&self, listing: &Listing) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO listings
                (id, seller_id, title, description, category, price, condition, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(listing.id.to_string())
        .bind(listing.seller_id.to_string())
        .bind(&listing.title)
        .bind(&listing.description)
        .bind(&listing.category)
        .bind(listing.price)
        .bind(listing.condition.as_str())
        .bind(listing.status.as_str())
        .bind(timestamp(&listing.created_at))
        .bind(timestamp(&listing.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_image(&self, image: &ListingImage) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO listing_images (id, listing_id, s3_key, is_primary, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(image.id.to_string())
        .bind(image.listing_id.to_string())
        .bind(&image.s3_key)
        .bind(image.is_primary)
        .bind(timestamp(&image.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp {:?}: {}", raw, e)))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Backend(format!("bad uuid {:?}: {}", raw, e)))
}

/// 转义 LIKE 通配符，使文本按字面子串匹配（与内存库一致）
fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ListingFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(category) = filter.category.as_deref().filter(|c| !c.is_empty()) {
        qb.push(" AND category = ").push_bind(category.to_string());
    }
    if let Some(min) = filter.price_min {
        qb.push(" AND price >= ").push_bind(min);
    }
    if let Some(max) = filter.price_max {
        qb.push(" AND price <= ").push_bind(max);
    }
    if !filter.text.is_empty() {
        let pattern = like_pattern(&filter.text);
        qb.push(" AND (lower(title) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR lower(description) LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

fn listing_from_row(row: &SqliteRow) -> Result<Listing, StoreError> {
    let id: String = row.try_get("id")?;
    let seller_id: String = row.try_get("seller_id")?;
    let condition: String = row.try_get("condition")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Listing {
        id: parse_uuid(&id)?,
        seller_id: parse_uuid(&seller_id)?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        price: row.try_get("price")?,
        condition: Condition::parse(&condition)
            .ok_or_else(|| StoreError::Backend(format!("unknown condition {:?}", condition)))?,
        status: ListingStatus::parse(&status)
            .ok_or_else(|| StoreError::Backend(format!("unknown status {:?}", status)))?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

#[async_trait]
impl ListingSearch for SqliteListingStore {
    async fn search(&self, filter: &ListingFilter) -> Result<SearchPage, StoreError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS total FROM listings");
        push_filters(&mut count, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("total")?;

        let mut select = QueryBuilder::<Sqlite>::new(
            "SELECT id, seller_id, title, description, category, price, condition, status, created_at, updated_at FROM listings",
        );
        push_filters(&mut select, filter);
        select.push(match filter.sort {
            SortOrder::CreatedDesc => " ORDER BY created_at DESC",
            SortOrder::PriceAsc => " ORDER BY price ASC, created_at DESC",
            SortOrder::PriceDesc => " ORDER BY price DESC, created_at DESC",
        });
        let limit = if filter.limit == 0 { 20 } else { filter.limit };
        select.push(" LIMIT ").push_bind(limit as i64);
        select.push(" OFFSET ").push_bind(filter.offset as i64);

        let rows = select.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(listing_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SearchPage {
            items,
            total: total.max(0) as usize,
        })
    }
}

#[async_trait]
impl ImageStore for SqliteListingStore {
    async fn primary_image(&self, listing_id: Uuid) -> Result<Option<ListingImage>, StoreError> {
        let row = sqlx::query(
            "SELECT id, listing_id, s3_key, is_primary, created_at
             FROM listing_images
             WHERE listing_id = ?
             ORDER BY is_primary DESC, created_at ASC
             LIMIT 1",
        )
        .bind(listing_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row.try_get("id")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(Some(ListingImage {
            id: parse_uuid(&id)?,
            listing_id,
            s3_key: row.try_get("s3_key")?,
            is_primary: row.try_get("is_primary")?,
            created_at: parse_time(&created_at)?,
        }))
    }
}
