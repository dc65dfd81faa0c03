//! 结果补全：主图与限时访问地址
//!
//! 图片库或签名器缺席、调用失败或超时都只让对应字段缺省，不影响商品本身返回。

use std::sync::Arc;
use std::time::Duration;

use crate::store::{ImageStore, Listing, ListingSummary, Presigner, PrimaryImage};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Enricher {
    images: Option<Arc<dyn ImageStore>>,
    presigner: Option<Arc<dyn Presigner>>,
    expiry: Duration,
    call_timeout: Duration,
}

impl Default for Enricher {
    fn default() -> Self {
        Self {
            images: None,
            presigner: None,
            expiry: Duration::ZERO,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl Enricher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单次图片库 / 签名调用的超时
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_images(mut self, images: Arc<dyn ImageStore>) -> Self {
        self.images = Some(images);
        self
    }

    /// expiry 为零时不签名
    pub fn with_presigner(mut self, presigner: Arc<dyn Presigner>, expiry: Duration) -> Self {
        self.presigner = Some(presigner);
        self.expiry = expiry;
        self
    }

    async fn primary_image(&self, listing: &Listing) -> Option<PrimaryImage> {
        let images = self.images.as_ref()?;
        let image = match tokio::time::timeout(self.call_timeout, images.primary_image(listing.id)).await {
            Ok(Ok(Some(image))) => image,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                tracing::warn!(listing_id = %listing.id, error = %e, "primary image lookup failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(listing_id = %listing.id, "primary image lookup timed out");
                return None;
            }
        };

        let mut primary = PrimaryImage {
            key: image.s3_key,
            url: None,
        };
        if let Some(presigner) = self.presigner.as_ref().filter(|_| !self.expiry.is_zero()) {
            match tokio::time::timeout(self.call_timeout, presigner.presign_get(&primary.key, self.expiry)).await {
                Ok(Ok(url)) => primary.url = Some(url),
                Ok(Err(e)) => {
                    tracing::warn!(key = %primary.key, error = %e, "presign failed");
                }
                Err(_) => {
                    tracing::warn!(key = %primary.key, "presign timed out");
                }
            }
        }
        Some(primary)
    }

    /// 按输入顺序映射为客户端摘要
    pub async fn enrich(&self, listings: &[Listing]) -> Vec<ListingSummary> {
        let mut out = Vec::with_capacity(listings.len());
        for listing in listings {
            let mut summary = ListingSummary::from(listing);
            summary.primary_image = self.primary_image(listing).await;
            out.push(summary);
        }
        out
    }
}
