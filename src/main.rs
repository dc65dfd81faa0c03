//! CampusHub 网关进程
//!
//! 入口：初始化日志、加载配置，启动 Hub、查询 Worker 与 HTTP/WebSocket 服务，
//! 直到收到 Ctrl+C / SIGTERM。
//!
//! ```bash
//! JWT_SECRET=... cargo run
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use campushub::bus::Bus;
use campushub::config::{load_config, StorageSection};
use campushub::core::{ShutdownManager, ShutdownReason};
use campushub::gateway::{self, GatewayState, Hub, JwtValidator};
use campushub::llm::OpenAiClient;
use campushub::observability;
use campushub::store::{ImageStore, ListingSearch, MemoryListingStore, PublicUrlPresigner};
use campushub::worker::{QueryPipeline, WorkerPool};
use tokio::net::TcpListener;

/// 同一个后端同时提供检索与主图
type Stores = (Arc<dyn ListingSearch>, Arc<dyn ImageStore>);

async fn open_stores(storage: &StorageSection) -> anyhow::Result<Stores> {
    #[cfg(feature = "async-sqlite")]
    if let Some(path) = &storage.sqlite_path {
        let store = Arc::new(
            campushub::store::SqliteListingStore::open(path)
                .await
                .with_context(|| format!("Failed to open sqlite store at {}", path.display()))?,
        );
        tracing::info!(path = %path.display(), "using sqlite listing store");
        let search: Arc<dyn ListingSearch> = store.clone();
        let images: Arc<dyn ImageStore> = store;
        return Ok((search, images));
    }

    let store = match &storage.catalog_path {
        Some(path) => MemoryListingStore::load(path)
            .await
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => {
            tracing::warn!("no catalog configured, starting with an empty listing store");
            MemoryListingStore::new()
        }
    };
    let store = Arc::new(store);
    let search: Arc<dyn ListingSearch> = store.clone();
    let images: Arc<dyn ImageStore> = store;
    Ok((search, images))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;

    let Some(secret) = cfg.auth.resolved_secret() else {
        bail!("JWT secret is not configured (set auth.jwt_secret or JWT_SECRET)");
    };
    let auth = Arc::new(JwtValidator::new(&secret).context("Invalid JWT secret")?);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let bus = Arc::new(Bus::new(cfg.bus.subscriber_capacity));
    let hub = Hub::spawn(Arc::clone(&bus), shutdown.token());

    let (search, images) = open_stores(&cfg.storage).await?;
    let mut pipeline = QueryPipeline::new(search, cfg.search.clone()).with_images(images);
    if let Some(base) = &cfg.storage.presign_base_url {
        pipeline = pipeline.with_presigner(
            Arc::new(PublicUrlPresigner::new(base.clone())),
            Duration::from_secs(cfg.storage.presign_expiry_minutes * 60),
        );
    }
    match OpenAiClient::from_config(&cfg.llm) {
        Some(client) => {
            tracing::info!(model = %client.model(), "LLM enabled");
            pipeline = pipeline.with_llm(Arc::new(client));
        }
        None => tracing::warn!("no LLM API key configured, using heuristic intent and canned answers"),
    }

    let workers = WorkerPool::spawn(
        Arc::clone(&bus),
        Arc::new(pipeline),
        &cfg.worker,
        shutdown.token(),
    );

    let listener = match TcpListener::bind(&cfg.server.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
            workers.join().await;
            return Err(anyhow::Error::new(e).context(format!("Failed to bind {}", cfg.server.bind_addr)));
        }
    };

    let state = GatewayState {
        hub,
        bus,
        auth,
        connection: cfg.connection.clone(),
        shutdown: shutdown.token(),
    };
    let app = gateway::router(state, &cfg.server.ws_path);

    tracing::info!("Press Ctrl+C to stop");
    let served = gateway::serve(listener, app, shutdown.token()).await;

    // 服务异常退出时也要让其余组件停下；正常返回说明关闭已由信号触发
    if let Err(e) = &served {
        shutdown.shutdown(ShutdownReason::FatalError(format!("server error: {}", e)));
    }
    workers.join().await;
    match shutdown.reason() {
        Some(reason) => tracing::info!(%reason, "CampusHub stopped"),
        None => tracing::info!("CampusHub stopped"),
    }

    served.context("Server error")
}
