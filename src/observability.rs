//! 日志初始化

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化全局日志：默认 info，可通过 RUST_LOG 覆盖
pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(fmt::layer())
        .init();
}
