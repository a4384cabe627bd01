//! 日志初始化
//!
//! 使用 tracing-subscriber 输出到标准错误，级别由 `RUST_LOG` 控制，默认 info。
//! 重复初始化（例如宿主应用已经安装了订阅器）时静默忽略。

use tracing_subscriber::EnvFilter;

/// 默认日志级别
pub const DEFAULT_FILTER: &str = "info";

/// 初始化全局日志订阅器
///
/// 返回是否由本次调用完成安装。
pub fn init() -> bool {
    init_with(DEFAULT_FILTER)
}

/// 使用指定的默认过滤规则初始化（`RUST_LOG` 优先）
pub fn init_with(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("[Logging] 日志已初始化");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_ignored() {
        let _ = init_with("debug");
        assert!(!init());
    }
}
