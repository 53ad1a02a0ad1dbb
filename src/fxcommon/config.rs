//! 行情采集服务配置模块

use crate::fxcommon::{AppError, Credential, NotificationConfig, Result, Timeframe};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 系统配置常量
pub mod constants {
    /// 默认配置文件路径
    pub const DEFAULT_CONFIG_PATH: &str = "config/FxFeedConfig.toml";

    /// 凭证环境变量（逗号分隔），配置文件未填写凭证时使用
    pub const CREDENTIALS_ENV_VAR: &str = "FX_FEED_API_KEYS";

    /// 每次请求的K线数量
    pub const DEFAULT_OUTPUT_SIZE: usize = 50;

    /// 缓存有效期（秒）
    pub const DEFAULT_CACHE_TTL_SECS: u64 = 15 * 60;

    /// 轮询间隔（秒）
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15 * 60;

    /// 轮询时判定缓存过期的阈值（秒），14.5分钟
    pub const DEFAULT_POLL_STALE_AFTER_SECS: u64 = 870;

    /// 后台扫描间隔（秒）
    pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 5 * 60;

    /// 出站请求最小间隔（毫秒）
    pub const DEFAULT_MIN_REQUEST_SPACING_MS: u64 = 2000;

    /// 实时流心跳间隔（秒）
    pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

    /// 检测结果上限
    pub const MAX_FEED_ENTRIES: usize = 1000;
}

use constants::*;

/// 行情采集服务配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub feed: FeedEndpointConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub market: MarketConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// 键值存储中没有通知配置时使用的初始值
    #[serde(default)]
    pub notifications: Option<NotificationConfig>,
}

/// 数据源端点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedEndpointConfig {
    /// REST 接口根地址
    pub rest_url: String,

    /// 实时报价 WebSocket 地址
    pub stream_url: String,

    /// 每次请求的K线数量
    pub output_size: usize,

    /// 请求超时（秒）
    pub request_timeout_secs: u64,

    /// 连接超时（秒）
    pub connect_timeout_secs: u64,

    /// 是否打开实时报价流
    pub stream_enabled: bool,
}

/// 凭证配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// 有序的访问令牌列表
    #[serde(default)]
    pub keys: Vec<String>,
}

/// 调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cache_ttl_secs: u64,
    pub poll_interval_secs: u64,
    pub poll_stale_after_secs: u64,
    pub scan_interval_secs: u64,
    /// 后台扫描使用的固定周期
    pub scan_timeframe: Timeframe,
    /// "正在扫描"状态自动清除的延迟（秒）
    pub scan_status_clear_secs: u64,
    pub min_request_spacing_ms: u64,
    pub heartbeat_interval_secs: u64,
}

/// 品种配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub instruments: Vec<String>,
    pub focused_instrument: String,
    pub focused_timeframe: Timeframe,
}

/// 键值存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite 数据库文件路径
    pub database_path: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别 (trace, debug, info, warn, error)
    pub log_level: String,

    /// 日志文件目录，为空时不写文件
    pub log_dir: Option<String>,

    /// 是否启用控制台输出
    pub console_output: bool,

    /// 文件日志是否使用JSON格式
    pub json_format: bool,
}

impl Default for FeedEndpointConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://api.twelvedata.com".to_string(),
            stream_url: "wss://ws.twelvedata.com/v1/quotes/price".to_string(),
            output_size: DEFAULT_OUTPUT_SIZE,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            stream_enabled: true,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            poll_stale_after_secs: DEFAULT_POLL_STALE_AFTER_SECS,
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            scan_timeframe: Timeframe::D1,
            scan_status_clear_secs: 3,
            min_request_spacing_ms: DEFAULT_MIN_REQUEST_SPACING_MS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        let instruments = [
            "EUR/USD", "GBP/USD", "USD/JPY", "GBP/JPY", "AUD/USD", "USD/CAD", "USD/CHF", "XAU/USD",
        ];
        Self {
            instruments: instruments.iter().map(|s| s.to_string()).collect(),
            focused_instrument: "EUR/USD".to_string(),
            focused_timeframe: Timeframe::H4,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: "data/fx_feed.db".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: Some("logs".to_string()),
            console_output: true,
            json_format: false,
        }
    }
}

impl ScheduleConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_stale_after(&self) -> Duration {
        Duration::from_secs(self.poll_stale_after_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn scan_status_clear(&self) -> Duration {
        Duration::from_secs(self.scan_status_clear_secs)
    }

    pub fn min_request_spacing(&self) -> Duration {
        Duration::from_millis(self.min_request_spacing_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl FeedConfig {
    /// 从文件加载配置
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::ConfigError(format!("解析配置文件失败: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::ConfigError(format!("序列化配置失败: {}", e)))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// 解析凭证列表：优先配置文件，其次环境变量
    pub fn resolve_credentials(&self) -> Vec<Credential> {
        let from_file: Vec<Credential> = self
            .credentials
            .keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(Credential::new)
            .collect();
        if !from_file.is_empty() {
            return from_file;
        }

        std::env::var(CREDENTIALS_ENV_VAR)
            .map(|raw| {
                raw.split(',')
                    .map(|k| k.trim())
                    .filter(|k| !k.is_empty())
                    .map(Credential::new)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 初始通知配置：未配置时对全部品种、全部形态开启
    pub fn initial_notification_config(&self) -> NotificationConfig {
        self.notifications
            .clone()
            .unwrap_or_else(|| NotificationConfig::all_enabled(self.market.instruments.iter().cloned()))
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.resolve_credentials().is_empty() {
            return Err(AppError::ConfigError(format!(
                "未配置任何凭证，请在 [credentials] 中填写或设置环境变量 {}",
                CREDENTIALS_ENV_VAR
            )));
        }

        if self.market.instruments.is_empty() {
            return Err(AppError::ConfigError("品种列表不能为空".to_string()));
        }

        if !self.market.instruments.contains(&self.market.focused_instrument) {
            return Err(AppError::ConfigError(format!(
                "关注品种 {} 不在品种列表中",
                self.market.focused_instrument
            )));
        }

        if self.feed.output_size == 0 {
            return Err(AppError::ConfigError("每次请求的K线数量必须大于0".to_string()));
        }

        let schedule = &self.schedule;
        if schedule.cache_ttl_secs == 0
            || schedule.poll_interval_secs == 0
            || schedule.scan_interval_secs == 0
            || schedule.heartbeat_interval_secs == 0
        {
            return Err(AppError::ConfigError("调度间隔必须大于0".to_string()));
        }

        if schedule.scan_status_clear_secs >= schedule.scan_interval_secs {
            return Err(AppError::ConfigError(
                "扫描状态清除延迟必须小于扫描间隔".to_string()
            ));
        }

        if schedule.poll_stale_after_secs > schedule.poll_interval_secs {
            return Err(AppError::ConfigError(
                "轮询过期阈值不能大于轮询间隔".to_string()
            ));
        }

        Ok(())
    }
}
