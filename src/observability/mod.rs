//! 可观测性：tracing 日志初始化
//!
//! 默认 `campushub=info`，可通过 RUST_LOG 覆盖（如 `RUST_LOG=campushub=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("campushub=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
