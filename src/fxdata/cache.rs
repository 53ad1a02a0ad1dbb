use crate::fxcommon::{Candle, CandleSeries};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// 缓存条目：最近一次成功拉取的序列及拉取时刻
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub series: CandleSeries,
    /// 拉取时刻（毫秒时间戳）
    pub fetched_at_ms: i64,
}

impl CacheEntry {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.fetched_at_ms
    }
}

/// 按 `instrument|timeframe` 索引的 TTL 缓存
///
/// 读写都是短临界区，不会跨越 await。
#[derive(Clone, Debug, Default)]
pub struct CandleCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl CandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取条目，不论是否过期
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        match self.entries.read() {
            Ok(entries) => entries.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    /// 读取未过期的条目：`now - fetched_at < ttl`
    pub fn get_fresh(&self, key: &str, now_ms: i64, ttl: Duration) -> Option<CacheEntry> {
        self.get(key)
            .filter(|entry| entry.age_ms(now_ms) < ttl.as_millis() as i64)
    }

    pub fn age_ms(&self, key: &str, now_ms: i64) -> Option<i64> {
        self.get(key).map(|entry| entry.age_ms(now_ms))
    }

    pub fn insert(&self, key: &str, series: CandleSeries, now_ms: i64) {
        debug!(target: "缓存", key, candles = series.len(), "写入缓存条目");
        let entry = CacheEntry { series, fetched_at_ms: now_ms };
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(key.to_string(), entry);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key.to_string(), entry);
            }
        }
    }

    /// 只替换序列，保留拉取时刻（实时报价跟踪用）
    pub fn update_series(&self, key: &str, series: &[Candle]) {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entry) = entries.get_mut(key) {
            entry.series.clear();
            entry.series.extend_from_slice(series);
        }
    }

    pub fn evict(&self, key: &str) -> Option<CacheEntry> {
        debug!(target: "缓存", key, "移除缓存条目");
        match self.entries.write() {
            Ok(mut entries) => entries.remove(key),
            Err(poisoned) => poisoned.into_inner().remove(key),
        }
    }

    pub fn clear(&self) {
        match self.entries.write() {
            Ok(mut entries) => entries.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
