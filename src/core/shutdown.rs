//! 优雅关闭
//!
//! 统一的关闭信号：HTTP/WebSocket 服务停止接受新连接，Worker 停止拉取新请求。
//! 已在处理中的查询不会被取消，结果按常规路径发布（目标连接已断开时由 Hub 丢弃）。
//! 关闭原因只记录第一次触发的那个，进程退出前打印。

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 致命错误（监听失败、服务异常退出）
    FatalError(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::UserInitiated => write!(f, "ctrl-c"),
            ShutdownReason::Signal => write!(f, "SIGTERM"),
            ShutdownReason::FatalError(e) => write!(f, "fatal error: {}", e),
        }
    }
}

/// 关闭信号管理器
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker 循环、Hub 与 axum graceful shutdown 共用的 token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭；已关闭时只忽略新的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.reason.set(reason.clone()).is_err() {
            tracing::debug!(ignored = %reason, "shutdown already in progress");
        }
        self.token.cancel();
    }

    /// 第一次触发关闭时的原因
    pub fn reason(&self) -> Option<&ShutdownReason> {
        self.reason.get()
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}
