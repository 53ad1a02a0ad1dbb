use crate::fxcommon::config::ScheduleConfig;
use crate::fxcommon::Timeframe;
use std::time::Duration;
use tracing::debug;

/// 焦点品种的定时轮询
///
/// 计时器由服务事件循环驱动；这里只判断一次触发是否需要强制重新拉取。
#[derive(Debug, Clone)]
pub struct PollingScheduler {
    interval: Duration,
    stale_after: Duration,
}

impl PollingScheduler {
    pub fn new(interval: Duration, stale_after: Duration) -> Self {
        Self { interval, stale_after }
    }

    pub fn from_config(schedule: &ScheduleConfig) -> Self {
        Self::new(schedule.poll_interval(), schedule.poll_stale_after())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 缓存条目缺失，或年龄超过阈值时需要重新拉取
    pub fn should_refetch(&self, age_ms: Option<i64>) -> bool {
        match age_ms {
            None => true,
            Some(age) => age > self.stale_after.as_millis() as i64,
        }
    }
}

/// 后台轮询扫描：按轮转顺序扫描焦点以外的品种
#[derive(Debug, Clone)]
pub struct BackgroundScanner {
    instruments: Vec<String>,
    cursor: usize,
    interval: Duration,
    timeframe: Timeframe,
}

impl BackgroundScanner {
    pub fn new(instruments: Vec<String>, interval: Duration, timeframe: Timeframe) -> Self {
        Self { instruments, cursor: 0, interval, timeframe }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// 推进游标并返回下一个扫描目标，跳过当前焦点品种
    ///
    /// 列表为空或只剩焦点品种时返回 `None`。
    pub fn next_target(&mut self, focused: &str) -> Option<String> {
        let len = self.instruments.len();
        for _ in 0..len {
            let candidate = &self.instruments[self.cursor % len];
            self.cursor = (self.cursor + 1) % len;
            if candidate != focused {
                debug!(target: "后台扫描", instrument = %candidate, cursor = self.cursor, "选中扫描目标");
                return Some(candidate.clone());
            }
        }
        None
    }
}
