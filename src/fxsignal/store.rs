use crate::fxcommon::config::constants::MAX_FEED_ENTRIES;
use crate::fxcommon::store::{load_json, save_json, FEED_KEY};
use crate::fxcommon::{Detection, KeyValueStore, Result};
use std::collections::HashSet;
use tracing::{debug, info};

/// 合并新的检测结果
///
/// 丢弃ID已存在的条目（包括 `new` 内部的重复），按时间倒序排列，
/// 只保留前 1000 条。重复合并同一批结果不会改变结果。
pub fn merge(existing: &[Detection], new: Vec<Detection>) -> Vec<Detection> {
    let mut seen: HashSet<&str> = existing.iter().map(|d| d.id.as_str()).collect();
    let mut fresh = Vec::with_capacity(new.len());
    for detection in &new {
        if seen.insert(detection.id.as_str()) {
            fresh.push(detection.clone());
        }
    }

    let mut feed = fresh;
    feed.extend(existing.iter().cloned());
    // 稳定排序：时间相同时新条目排在前面
    feed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    feed.truncate(MAX_FEED_ENTRIES);
    feed
}

/// 检测结果列表，`merge` 是唯一的修改入口
#[derive(Debug, Clone, Default)]
pub struct DetectionStore {
    feed: Vec<Detection>,
}

impl DetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_feed(feed: Vec<Detection>) -> Self {
        // 持久化的数据也走一遍合并，保证顺序和上限
        Self { feed: merge(&[], feed) }
    }

    /// 从键值存储读取，缺失时为空
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        let feed: Vec<Detection> = load_json(store, FEED_KEY)?.unwrap_or_default();
        info!(target: "信号", entries = feed.len(), "加载检测结果");
        Ok(Self::from_feed(feed))
    }

    pub fn persist(&self, store: &dyn KeyValueStore) -> Result<()> {
        save_json(store, FEED_KEY, &self.feed)?;
        debug!(target: "信号", entries = self.feed.len(), "检测结果已保存");
        Ok(())
    }

    /// 合并并返回实际新增（且未被截断）的条目
    pub fn merge(&mut self, new: Vec<Detection>) -> Vec<Detection> {
        let merged = merge(&self.feed, new);
        let previous: HashSet<&str> = self.feed.iter().map(|d| d.id.as_str()).collect();
        let added: Vec<Detection> = merged
            .iter()
            .filter(|d| !previous.contains(d.id.as_str()))
            .cloned()
            .collect();
        self.feed = merged;
        added
    }

    pub fn feed(&self) -> &[Detection] {
        &self.feed
    }

    pub fn len(&self) -> usize {
        self.feed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feed.is_empty()
    }
}
