use crate::fxcommon::{AppError, Credential, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// 凭证轮换器
///
/// 持有有序凭证集合和当前生效的索引。克隆后共享同一个索引，
/// 前台拉取和后台扫描使用同一份轮换状态。
#[derive(Clone, Debug)]
pub struct CredentialRotator {
    credentials: Arc<Vec<Credential>>,
    index: Arc<AtomicUsize>,
}

impl CredentialRotator {
    pub fn new(credentials: Vec<Credential>) -> Result<Self> {
        Self::with_index(credentials, 0)
    }

    /// 从指定索引开始（例如从存储中恢复），索引按集合大小取模
    pub fn with_index(credentials: Vec<Credential>, start: usize) -> Result<Self> {
        if credentials.is_empty() {
            return Err(AppError::ConfigError("凭证集合不能为空".to_string()));
        }
        let start = start % credentials.len();
        Ok(Self {
            credentials: Arc::new(credentials),
            index: Arc::new(AtomicUsize::new(start)),
        })
    }

    /// 当前生效的凭证
    pub fn current(&self) -> Credential {
        self.credentials[self.current_index()].clone()
    }

    pub fn current_index(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    /// 切换到下一个凭证并返回它
    pub fn rotate(&self) -> Credential {
        let size = self.credentials.len();
        let previous = self
            .index
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % size))
            .unwrap_or_else(|i| i);
        let next = (previous + 1) % size;
        info!(target: "凭证轮换", from = previous, to = next, size, "切换到下一个凭证");
        self.credentials[next].clone()
    }

    pub fn size(&self) -> usize {
        self.credentials.len()
    }

    /// 手动指定当前凭证。调用方负责让缓存失效。
    pub fn force_index(&self, index: usize) -> Result<()> {
        if index >= self.credentials.len() {
            warn!(target: "凭证轮换", index, size = self.credentials.len(), "手动指定的凭证索引越界");
            return Err(AppError::ConfigError(format!(
                "凭证索引 {} 越界（共 {} 个）",
                index,
                self.credentials.len()
            )));
        }
        self.index.store(index, Ordering::SeqCst);
        info!(target: "凭证轮换", index, "手动指定当前凭证");
        Ok(())
    }
}
