//! 公开访问前缀签名器
//!
//! 适用于本地开发或 CDN 前置的对象存储：生成 `{base}/{key}?expires=<unix>`。

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::Presigner;
use crate::core::StoreError;

pub struct PublicUrlPresigner {
    base_url: String,
}

impl PublicUrlPresigner {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Presigner for PublicUrlPresigner {
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StoreError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StoreError::Backend("empty object key".into()));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Backend(format!("invalid ttl: {}", e)))?;
        let expires = (Utc::now() + ttl).timestamp();
        Ok(format!("{}/{}?expires={}", self.base_url, key, expires))
    }
}
