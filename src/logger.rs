use tracing_subscriber::{EnvFilter, fmt};

/// 初始化日志系统，默认级别 info
pub fn init_logger() -> bool {
    init_with_default("info")
}

/// 安装全局 subscriber
///
/// `RUST_LOG` 优先；未设置时使用 `default` 作为过滤指令，例如：
/// - `collrun=debug`
/// - `collrun::runner=trace,collrun::variable=warn`
///
/// 已经安装过时返回 false，可以重复调用。
pub fn init_with_default(default: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(filter = default, "logger initialized");
    }
    installed
}
