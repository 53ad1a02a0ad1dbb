//! 拉取编排：凭证轮换、降级兜底和响应解析的端到端场景

use fx_pattern_feed::fxcommon::{validate_series, AppError, CandleSeries, Credential, DataSource, Result, Timeframe};
use fx_pattern_feed::fxdata::{
    parse_time_series, CandleCache, CredentialRotator, FetchOrchestrator, HistoricalFetcher, RequestSpacer,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 模拟数据源：额度耗尽的凭证返回 credits 错误体
struct FeedStub {
    exhausted: Vec<&'static str>,
    calls: AtomicUsize,
}

impl FeedStub {
    fn new(exhausted: Vec<&'static str>) -> Self {
        Self { exhausted, calls: AtomicUsize::new(0) }
    }
}

fn values_body(count: usize) -> String {
    // 数据源按时间倒序返回
    let values: Vec<_> = (0..count)
        .rev()
        .map(|i| {
            let day = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64);
            json!({
                "datetime": day.format("%Y-%m-%d").to_string(),
                "open": "1.1000",
                "high": "1.1050",
                "low": "1.0950",
                "close": "1.1020"
            })
        })
        .collect();
    json!({ "meta": { "symbol": "EUR/USD", "interval": "1day" }, "values": values, "status": "ok" }).to_string()
}

impl HistoricalFetcher for FeedStub {
    async fn fetch(&self, _instrument: &str, _timeframe: Timeframe, credential: &Credential) -> Result<CandleSeries> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = if self.exhausted.iter().any(|t| *t == credential.token()) {
            r#"{"code":429,"message":"You have run out of API credits for the current minute.","status":"error"}"#
                .to_string()
        } else {
            values_body(50)
        };
        parse_time_series(&body)
    }
}

fn orchestrator(stub: FeedStub, spacing_ms: u64) -> (FetchOrchestrator<FeedStub>, Arc<FeedStub>) {
    let stub = Arc::new(stub);
    let rotator = CredentialRotator::new(vec![Credential::new("A"), Credential::new("B")]).unwrap();
    let orch = FetchOrchestrator::new(
        stub.clone(),
        rotator,
        CandleCache::new(),
        RequestSpacer::new(Duration::from_millis(spacing_ms)),
        Duration::from_secs(900),
    );
    (orch, stub)
}

#[tokio::test]
async fn test_rotation_then_cache_hit() {
    let (orch, stub) = orchestrator(FeedStub::new(vec!["A"]), 0);

    let first = orch.fetch_series("EUR/USD", Timeframe::D1).await.unwrap();
    assert_eq!(first.source, DataSource::Network);
    assert_eq!(first.series.len(), 50);
    assert!(validate_series(&first.series, Some(Timeframe::D1.duration_secs())).is_ok());
    assert_eq!(orch.rotator().current().token(), "B");
    assert_eq!(stub.calls.load(Ordering::SeqCst), 2);

    let second = orch.fetch_series("EUR/USD", Timeframe::D1).await.unwrap();
    assert_eq!(second.source, DataSource::Cache);
    assert_eq!(second.series, first.series);
    assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_exhaustion_produces_valid_synthetic_series() {
    let (orch, stub) = orchestrator(FeedStub::new(vec!["A", "B"]), 0);

    let outcome = orch.fetch_series("GBP/JPY", Timeframe::H4).await.unwrap();
    assert_eq!(outcome.source, DataSource::Synthetic);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    assert!(validate_series(&outcome.series, Some(Timeframe::H4.duration_secs())).is_ok());
    assert!(outcome.series.iter().all(|c| (120.0..180.0).contains(&c.close)));
}

#[tokio::test]
async fn test_request_spacing_applies_across_invocations() {
    let (orch, _stub) = orchestrator(FeedStub::new(Vec::new()), 100);

    let start = Instant::now();
    orch.fetch_series("EUR/USD", Timeframe::H4).await.unwrap();
    orch.fetch_series("GBP/USD", Timeframe::H4).await.unwrap();
    orch.fetch_series("USD/JPY", Timeframe::H4).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[test]
fn test_quota_payload_is_retryable() {
    let err = parse_time_series(r#"{"code":429,"message":"Too many requests","status":"error"}"#).unwrap_err();
    assert!(matches!(err, AppError::QuotaExceeded(_)));
    assert!(err.is_retryable());
}
