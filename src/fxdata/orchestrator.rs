use crate::fxcommon::{cache_key, AppError, DataSource, FetchOutcome, Result, Timeframe};
use crate::fxdata::cache::CandleCache;
use crate::fxdata::credentials::CredentialRotator;
use crate::fxdata::fetcher::HistoricalFetcher;
use crate::fxdata::rate_limit::RequestSpacer;
use crate::fxdata::synthetic::synthetic_series;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// 拉取编排：缓存 → 凭证轮换重试（每次请求前限流） → 降级兜底
///
/// 前台拉取、定时轮询和后台扫描共用同一个实例（克隆共享缓存、凭证和限流状态）。
pub struct FetchOrchestrator<F> {
    fetcher: Arc<F>,
    rotator: CredentialRotator,
    cache: CandleCache,
    spacer: RequestSpacer,
    cache_ttl: Duration,
}

impl<F> Clone for FetchOrchestrator<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            rotator: self.rotator.clone(),
            cache: self.cache.clone(),
            spacer: self.spacer.clone(),
            cache_ttl: self.cache_ttl,
        }
    }
}

impl<F: HistoricalFetcher> FetchOrchestrator<F> {
    pub fn new(
        fetcher: Arc<F>,
        rotator: CredentialRotator,
        cache: CandleCache,
        spacer: RequestSpacer,
        cache_ttl: Duration,
    ) -> Self {
        Self { fetcher, rotator, cache, spacer, cache_ttl }
    }

    pub fn cache(&self) -> &CandleCache {
        &self.cache
    }

    pub fn rotator(&self) -> &CredentialRotator {
        &self.rotator
    }

    /// 获取 (品种, 周期) 的序列
    ///
    /// 只有非额度类错误（网络、格式）会返回 `Err`；凭证全部耗尽时
    /// 返回过期缓存或模拟序列，并在 `source` 中标记。
    #[instrument(skip_all, fields(instrument = %instrument, timeframe = %timeframe))]
    pub async fn fetch_series(&self, instrument: &str, timeframe: Timeframe) -> Result<FetchOutcome> {
        let key = cache_key(instrument, timeframe);

        if let Some(entry) = self.cache.get_fresh(&key, now_ms(), self.cache_ttl) {
            debug!(target: "缓存", key = %key, "缓存命中，跳过网络请求");
            return Ok(FetchOutcome {
                instrument: instrument.to_string(),
                timeframe,
                series: entry.series,
                source: DataSource::Cache,
                credential_index: self.rotator.current_index(),
                rotated: false,
                attempts: 0,
            });
        }

        let start_index = self.rotator.current_index();
        let size = self.rotator.size();
        let mut credential = self.rotator.current();

        for attempt in 1..=size {
            // 轮换重试同样计入进程级请求间隔
            self.spacer.acquire().await;
            match self.fetcher.fetch(instrument, timeframe, &credential).await {
                Ok(series) => {
                    self.cache.insert(&key, series.clone(), now_ms());
                    let credential_index = self.rotator.current_index();
                    let rotated = credential_index != start_index;
                    info!(
                        target: "历史数据",
                        key = %key,
                        attempt,
                        credential_index,
                        rotated,
                        candles = series.len(),
                        "拉取成功"
                    );
                    return Ok(FetchOutcome {
                        instrument: instrument.to_string(),
                        timeframe,
                        series,
                        source: DataSource::Network,
                        credential_index,
                        rotated,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        target: "凭证轮换",
                        key = %key,
                        attempt,
                        credential_index = self.rotator.current_index(),
                        error.summary = e.get_error_type_summary(),
                        error.details = %e,
                        "凭证额度耗尽，轮换后重试"
                    );
                    credential = self.rotator.rotate();
                }
                Err(e) => {
                    error!(
                        target: "历史数据",
                        key = %key,
                        attempt,
                        error.summary = e.get_error_type_summary(),
                        error.details = %e,
                        "拉取失败，不轮换凭证"
                    );
                    return Err(e);
                }
            }
        }

        let exhausted = AppError::AllCredentialsExhausted(size);
        error!(
            target: "凭证轮换",
            key = %key,
            error.summary = exhausted.get_error_type_summary(),
            error.details = %exhausted,
            "全部凭证耗尽，使用兜底数据"
        );

        let (series, source) = match self.cache.get(&key) {
            Some(entry) => (entry.series, DataSource::StaleCache),
            None => {
                let now_secs = Utc::now().timestamp();
                let mut rng = StdRng::from_entropy();
                let series = synthetic_series(instrument, timeframe, now_secs, &mut rng);
                (series, DataSource::Synthetic)
            }
        };

        Ok(FetchOutcome {
            instrument: instrument.to_string(),
            timeframe,
            series,
            source,
            credential_index: self.rotator.current_index(),
            rotated: false,
            attempts: size,
        })
    }

    /// 移除缓存条目后强制走网络（定时轮询用）
    pub async fn refetch(&self, instrument: &str, timeframe: Timeframe) -> Result<FetchOutcome> {
        self.cache.evict(&cache_key(instrument, timeframe));
        self.fetch_series(instrument, timeframe).await
    }

    /// 手动指定凭证，并让全部缓存失效
    pub fn force_credential(&self, index: usize) -> Result<()> {
        self.rotator.force_index(index)?;
        self.cache.clear();
        Ok(())
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
