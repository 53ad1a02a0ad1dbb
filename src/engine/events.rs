// src/engine/events.rs
use crate::fxcommon::{
    CandleSeries, DataSource, Detection, FetchOutcome, NotificationConfig, Result, Timeframe,
};
use crate::fxdata::ConnectionState;
use tokio::sync::oneshot;

/// 外部对服务的请求，经命令通道进入事件循环
#[derive(Debug)]
pub enum ServiceCommand {
    Focus {
        instrument: String,
        timeframe: Timeframe,
    },
    /// 手动刷新焦点序列
    Refresh,
    ForceCredential {
        index: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    SaveNotificationConfig(NotificationConfig),
    Feed(oneshot::Sender<Vec<Detection>>),
    Series(oneshot::Sender<CandleSeries>),
    Stop(oneshot::Sender<()>),
}

/// 后台拉取任务完成后回送给事件循环的结果
#[derive(Debug)]
pub enum FetchEvent {
    /// 焦点序列的拉取，带代际号，与当前代际不一致的结果被丢弃
    Foreground {
        generation: u64,
        result: Result<FetchOutcome>,
    },
    /// 后台扫描
    Scan {
        instrument: String,
        timeframe: Timeframe,
        result: Result<FetchOutcome>,
    },
}

/// 对外发布的服务状态（演示数据、过期数据、断线和错误提示）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceStatus {
    pub running: bool,
    pub focused_instrument: String,
    pub focused_timeframe: Option<Timeframe>,
    pub connection: ConnectionState,
    /// 当前焦点序列的来源，尚未加载时为 `None`
    pub data_source: Option<DataSource>,
    /// 正在后台扫描的品种，短暂显示后自动清除
    pub scanning: Option<String>,
    pub last_error: Option<String>,
    pub active_credential_index: usize,
    pub candles: usize,
    pub feed_len: usize,
}

impl ServiceStatus {
    /// 是否在展示模拟数据
    pub fn is_demo(&self) -> bool {
        self.data_source == Some(DataSource::Synthetic)
    }

    pub fn is_stale(&self) -> bool {
        self.data_source == Some(DataSource::StaleCache)
    }
}
