// 外汇形态行情采集服务主程序
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use fx_pattern_feed::fxcommon::config::constants::DEFAULT_CONFIG_PATH;
use fx_pattern_feed::fxcommon::logging_setup::init_logging;
use fx_pattern_feed::fxcommon::{FeedConfig, SqliteKvStore, Timeframe};
use fx_pattern_feed::fxdata::TwelveDataClient;
use fx_pattern_feed::fxsignal::{LogNotifier, NullPatternDetector};
use fx_pattern_feed::{IngestionService, ServiceStatus};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// `--once` 模式等待首个序列的最长时间
const ONCE_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("fx_feed_service")
        .about("外汇K线采集与形态信号服务")
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .value_name("PATH")
            .help("配置文件路径")
            .default_value(DEFAULT_CONFIG_PATH))
        .arg(Arg::new("focus")
            .short('f')
            .long("focus")
            .value_name("INSTRUMENT")
            .help("覆盖配置中的关注品种，例如 EUR/USD"))
        .arg(Arg::new("timeframe")
            .short('t')
            .long("timeframe")
            .value_name("TIMEFRAME")
            .help("覆盖配置中的周期 (H4, D1, W1)"))
        .arg(Arg::new("once")
            .long("once")
            .help("拉取一次焦点序列后退出")
            .action(ArgAction::SetTrue))
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);

    let mut config = if Path::new(config_path).exists() {
        FeedConfig::from_file(config_path).with_context(|| format!("加载配置文件 {} 失败", config_path))?
    } else {
        eprintln!("配置文件 {} 不存在，使用默认配置", config_path);
        FeedConfig::default()
    };

    if let Some(focus) = matches.get_one::<String>("focus") {
        config.market.focused_instrument = focus.clone();
        if !config.market.instruments.contains(focus) {
            config.market.instruments.push(focus.clone());
        }
    }
    if let Some(raw) = matches.get_one::<String>("timeframe") {
        config.market.focused_timeframe = raw.parse::<Timeframe>()?;
    }
    let once = matches.get_flag("once");
    if once {
        config.feed.stream_enabled = false;
    }

    // 持有 guard，直到 main 函数结束，确保日志被完整写入
    let _log_guard = init_logging(&config.logging)?;

    info!(
        target: "采集服务",
        config = config_path,
        instrument = %config.market.focused_instrument,
        timeframe = %config.market.focused_timeframe,
        once,
        "启动外汇形态采集服务"
    );

    let store = Arc::new(SqliteKvStore::open(&config.store.database_path)?);
    let fetcher = TwelveDataClient::new(&config.feed)?;
    let handle = IngestionService::start(config, fetcher, NullPatternDetector, Arc::new(LogNotifier), store)?;
    let mut status = handle.status();

    if once {
        let wait = tokio::time::timeout(ONCE_TIMEOUT, async {
            loop {
                if let Some(done) = settled(&status.borrow_and_update()) {
                    return done;
                }
                if status.changed().await.is_err() {
                    return status.borrow().clone();
                }
            }
        })
        .await;

        match wait {
            Ok(final_status) => report(&final_status),
            Err(_) => warn!(target: "采集服务", "等待首个序列超时"),
        }
        handle.stop().await?;
        return Ok(());
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(target: "采集服务", signal = "ctrl_c", error.details = %e, "监听退出信号失败");
            }
            info!(target: "采集服务", "收到退出信号");
        }
        _ = watch_status(&mut status) => {}
    }

    handle.stop().await?;
    info!(target: "采集服务", "采集服务已停止");
    Ok(())
}

/// 首个序列已应用，或拉取失败
fn settled(status: &ServiceStatus) -> Option<ServiceStatus> {
    (status.data_source.is_some() || status.last_error.is_some()).then(|| status.clone())
}

fn report(status: &ServiceStatus) {
    info!(
        target: "采集服务",
        instrument = %status.focused_instrument,
        source = ?status.data_source,
        candles = status.candles,
        feed = status.feed_len,
        credential_index = status.active_credential_index,
        error = ?status.last_error,
        "采集结果"
    );
}

/// 记录状态变化，服务退出时返回
async fn watch_status(status: &mut tokio::sync::watch::Receiver<ServiceStatus>) {
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        if current.is_demo() {
            warn!(target: "采集服务", instrument = %current.focused_instrument, "凭证耗尽，正在展示模拟数据");
        } else if current.is_stale() {
            warn!(target: "采集服务", instrument = %current.focused_instrument, "凭证耗尽，正在展示过期缓存");
        }
        if let Some(scanning) = &current.scanning {
            info!(target: "后台扫描", instrument = %scanning, "正在扫描");
        }
        if !current.running {
            break;
        }
    }
}
