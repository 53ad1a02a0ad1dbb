use crate::fxcommon::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// K线 - 固定周期的OHLC价格摘要
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 开盘时间（秒级时间戳）
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// 以单一价格创建K线（开高低收相同）
    pub fn flat(time: i64, price: f64) -> Self {
        Self { time, open: price, high: price, low: price, close: price }
    }

    /// high ≥ max(open, close) 且 low ≤ min(open, close)
    pub fn is_consistent(&self) -> bool {
        self.high >= self.open.max(self.close) && self.low <= self.open.min(self.close)
    }
}

/// 单个 (品种, 周期) 的有序K线序列
pub type CandleSeries = Vec<Candle>;

/// 校验序列：时间严格递增、每根K线满足OHLC约束，可选校验固定间隔
pub fn validate_series(series: &[Candle], step_secs: Option<i64>) -> Result<()> {
    for (i, candle) in series.iter().enumerate() {
        if !candle.is_consistent() {
            return Err(AppError::MalformedResponse(format!("K线 {} 违反OHLC约束", candle.time)));
        }
        if i == 0 {
            continue;
        }
        let prev = &series[i - 1];
        if candle.time <= prev.time {
            return Err(AppError::MalformedResponse(format!(
                "K线时间未严格递增: {} -> {}",
                prev.time, candle.time
            )));
        }
        if let Some(step) = step_secs {
            if candle.time - prev.time != step {
                return Err(AppError::MalformedResponse(format!(
                    "K线间隔 {} 不等于周期 {}",
                    candle.time - prev.time,
                    step
                )));
            }
        }
    }
    Ok(())
}

/// 从Unix纪元日（星期四）回溯到周一所需的偏移量（秒）
const MONDAY_ALIGNMENT_OFFSET_SECS: i64 = 3 * 24 * 60 * 60;

/// 支持的时间周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    H4,
    D1,
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::H4, Timeframe::D1, Timeframe::W1];

    /// 周期长度（秒）
    pub fn duration_secs(&self) -> i64 {
        match self {
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
            Timeframe::W1 => 7 * 24 * 60 * 60,
        }
    }

    /// 对齐到周期网格的开盘时间，周线对齐到周一 00:00 UTC
    pub fn align(&self, ts_secs: i64) -> i64 {
        let d = self.duration_secs();
        match self {
            Timeframe::W1 => {
                (ts_secs + MONDAY_ALIGNMENT_OFFSET_SECS).div_euclid(d) * d - MONDAY_ALIGNMENT_OFFSET_SECS
            }
            _ => ts_secs.div_euclid(d) * d,
        }
    }

    /// 映射到数据源的 interval 词汇
    pub fn feed_interval(&self) -> &'static str {
        match self {
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1day",
            Timeframe::W1 => "1week",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
        };
        f.write_str(s)
    }
}

impl FromStr for Timeframe {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h4" | "4h" => Ok(Timeframe::H4),
            "d1" | "1d" | "1day" => Ok(Timeframe::D1),
            "w1" | "1w" | "1week" => Ok(Timeframe::W1),
            other => Err(AppError::ConfigError(format!("无效的时间周期: {}", other))),
        }
    }
}

/// 品种分类，决定模拟数据的基准价格区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentClass {
    JpyQuoted,
    Metal,
    Major,
}

impl InstrumentClass {
    pub fn of(instrument: &str) -> Self {
        let upper = instrument.to_ascii_uppercase();
        if upper.starts_with("XAU") || upper.starts_with("XAG") {
            InstrumentClass::Metal
        } else if upper.ends_with("JPY") {
            InstrumentClass::JpyQuoted
        } else {
            InstrumentClass::Major
        }
    }

    /// 基准价格区间 (下限, 上限)
    pub fn base_price_range(&self) -> (f64, f64) {
        match self {
            InstrumentClass::JpyQuoted => (140.0, 160.0),
            InstrumentClass::Metal => (1900.0, 2100.0),
            InstrumentClass::Major => (1.05, 1.35),
        }
    }
}

/// 缓存键: `instrument|timeframe`
pub fn cache_key(instrument: &str, timeframe: Timeframe) -> String {
    format!("{}|{}", instrument, timeframe)
}

/// 数据源访问凭证，Debug 输出时隐藏内容
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.0.chars().take(4).collect();
        write!(f, "Credential({}***)", visible)
    }
}

/// 形态类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatternKind {
    BullishEngulfing,
    BearishEngulfing,
    Hammer,
    ShootingStar,
    Doji,
    MorningStar,
    EveningStar,
    InsideBar,
}

impl PatternKind {
    pub const ALL: [PatternKind; 8] = [
        PatternKind::BullishEngulfing,
        PatternKind::BearishEngulfing,
        PatternKind::Hammer,
        PatternKind::ShootingStar,
        PatternKind::Doji,
        PatternKind::MorningStar,
        PatternKind::EveningStar,
        PatternKind::InsideBar,
    ];
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PatternKind::BullishEngulfing => "Bullish Engulfing",
            PatternKind::BearishEngulfing => "Bearish Engulfing",
            PatternKind::Hammer => "Hammer",
            PatternKind::ShootingStar => "Shooting Star",
            PatternKind::Doji => "Doji",
            PatternKind::MorningStar => "Morning Star",
            PatternKind::EveningStar => "Evening Star",
            PatternKind::InsideBar => "Inside Bar",
        };
        f.write_str(s)
    }
}

/// 由 品种+周期+K线时间+形态 确定性生成的检测ID，重复扫描得到相同ID
pub fn detection_id(instrument: &str, timeframe: Timeframe, timestamp: i64, pattern: PatternKind) -> String {
    format!("{}-{}-{}-{:?}", instrument, timeframe, timestamp, pattern)
}

/// 一次形态检测结果，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: String,
    pub instrument: String,
    pub timeframe: Timeframe,
    pub pattern: PatternKind,
    /// 触发形态的K线时间（秒）
    pub timestamp: i64,
    pub price: f64,
}

impl Detection {
    pub fn new(instrument: &str, timeframe: Timeframe, pattern: PatternKind, timestamp: i64, price: f64) -> Self {
        Self {
            id: detection_id(instrument, timeframe, timestamp, pattern),
            instrument: instrument.to_string(),
            timeframe,
            pattern,
            timestamp,
            price,
        }
    }
}

/// 用户通知偏好
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub master_enabled: bool,
    #[serde(default)]
    pub instruments: BTreeSet<String>,
    #[serde(default)]
    pub patterns: BTreeSet<PatternKind>,
}

impl NotificationConfig {
    /// 对给定品种和全部形态开启通知
    pub fn all_enabled<I, S>(instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            master_enabled: true,
            instruments: instruments.into_iter().map(Into::into).collect(),
            patterns: PatternKind::ALL.iter().copied().collect(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            master_enabled: true,
            instruments: BTreeSet::new(),
            patterns: PatternKind::ALL.iter().copied().collect(),
        }
    }
}

/// 序列的来源，用于界面上的演示/过期数据标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    Network,
    Cache,
    StaleCache,
    Synthetic,
}

impl DataSource {
    /// 是否需要可见的降级提示
    pub fn is_degraded(&self) -> bool {
        matches!(self, DataSource::StaleCache | DataSource::Synthetic)
    }
}

/// 一次拉取编排的结果
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub instrument: String,
    pub timeframe: Timeframe,
    pub series: CandleSeries,
    pub source: DataSource,
    /// 结束时生效的凭证索引
    pub credential_index: usize,
    /// 成功凭证与开始时不同
    pub rotated: bool,
    /// 实际发出的请求次数
    pub attempts: usize,
}
