//! 统一日志系统初始化模块
//!
//! 控制台输出 + 按天滚动的非阻塞文件日志，过滤规则由配置决定，
//! 设置了 RUST_LOG 时以环境变量为准。

use crate::fxcommon::{AppError, LoggingConfig, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "fx_feed.log";

/// 构建过滤字符串，压低第三方网络库的噪音
pub fn build_filter_string(log_level: &str) -> String {
    format!(
        "{},hyper=warn,reqwest=warn,tungstenite=warn,tokio_tungstenite=warn,rusqlite=warn",
        log_level
    )
}

/// 初始化日志系统
///
/// 返回文件写入器的 guard，调用方需要持有它直到进程结束，
/// 否则缓冲中的日志会丢失。
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(env_filter) if !env_filter.is_empty() => EnvFilter::new(env_filter),
        _ => EnvFilter::new(build_filter_string(&config.log_level)),
    };

    let console_layer = if config.console_output {
        Some(fmt::layer().with_target(true))
    } else {
        None
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) if !dir.is_empty() => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = if config.json_format {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            };
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    Registry::default()
        .with(file_layer)
        .with(console_layer)
        .with(filter)
        .try_init()
        .map_err(|e| AppError::ConfigError(format!("初始化日志系统失败: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_string_keeps_level_first() {
        let filter = build_filter_string("debug");
        assert!(filter.starts_with("debug,"));
        assert!(filter.contains("reqwest=warn"));
    }
}
