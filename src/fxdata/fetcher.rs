use crate::fxcommon::config::FeedEndpointConfig;
use crate::fxcommon::{AppError, Candle, CandleSeries, Credential, Result, Timeframe};
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};
use url::Url;

/// 历史K线拉取接口
///
/// 一次请求只使用调用方给定的凭证；在多个凭证之间重试由拉取编排负责。
pub trait HistoricalFetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        credential: &Credential,
    ) -> impl Future<Output = Result<CandleSeries>> + Send;
}

/// 数据源 REST 客户端
#[derive(Clone, Debug)]
pub struct TwelveDataClient {
    base_url: String,
    output_size: usize,
    client: Client,
}

impl TwelveDataClient {
    /// 创建新的API客户端实例
    #[instrument(skip_all, fields(rest_url = %config.rest_url))]
    pub fn new(config: &FeedEndpointConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| AppError::NetworkError(format!("创建HTTP客户端失败: {}", e)))?;

        debug!(target: "历史数据", endpoint = %config.rest_url, "API客户端初始化完成");
        Ok(Self {
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            output_size: config.output_size,
            client,
        })
    }

    /// 构建请求URL：品种、映射后的周期、凭证和固定的数量
    pub fn request_url(&self, instrument: &str, timeframe: Timeframe, credential: &Credential) -> Result<Url> {
        let output_size = self.output_size.to_string();
        let url = Url::parse_with_params(
            &format!("{}/time_series", self.base_url),
            &[
                ("symbol", instrument),
                ("interval", timeframe.feed_interval()),
                ("outputsize", output_size.as_str()),
                ("apikey", credential.token()),
            ],
        )?;
        Ok(url)
    }
}

impl HistoricalFetcher for TwelveDataClient {
    #[instrument(skip_all, fields(instrument = %instrument, timeframe = %timeframe), err)]
    async fn fetch(&self, instrument: &str, timeframe: Timeframe, credential: &Credential) -> Result<CandleSeries> {
        let url = self.request_url(instrument, timeframe, credential)?;

        let response = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let http_error = AppError::from(e);
                error!(
                    target: "历史数据",
                    instrument,
                    error.summary = http_error.get_error_type_summary(),
                    error.details = %http_error,
                    "HTTP请求失败"
                );
                return Err(http_error);
            }
        };

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(target: "历史数据", instrument, "数据源返回429，额度耗尽");
            return Err(AppError::QuotaExceeded(format!("HTTP 429: {}", preview(&body))));
        }

        if !status.is_success() {
            // 错误体里也可能是额度耗尽，先按数据源的格式分类
            if let Err(e @ AppError::QuotaExceeded(_)) = parse_time_series(&body) {
                return Err(e);
            }
            let api_error = AppError::NetworkError(format!("HTTP {}: {}", status, preview(&body)));
            error!(
                target: "历史数据",
                instrument,
                status = %status,
                error.summary = api_error.get_error_type_summary(),
                error.details = %api_error,
                "API响应状态错误"
            );
            return Err(api_error);
        }

        let series = parse_time_series(&body)?;
        debug!(target: "历史数据", instrument, %timeframe, candles = series.len(), "K线数据解析完成");
        Ok(series)
    }
}

/// 响应体前 300 个字符，用于日志和错误信息
fn preview(body: &str) -> &str {
    match body.char_indices().nth(300) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// 解析并分类 time_series 响应
///
/// - `status == "error"` 且 message 提到 credits 或 code 为 429：额度耗尽
/// - 其他 `status == "error"`：网络错误，携带数据源的消息
/// - 缺少 `values` 列表或记录无法解析：响应格式错误
/// - 否则按时间升序返回，重复时间只保留最后一条
pub fn parse_time_series(body: &str) -> Result<CandleSeries> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|e| AppError::MalformedResponse(format!("响应不是有效的JSON: {}", e)))?;

    if payload.get("status").and_then(Value::as_str) == Some("error") {
        let message = payload.get("message").and_then(Value::as_str).unwrap_or_default();
        let code = payload.get("code").and_then(Value::as_i64);
        if message.to_ascii_lowercase().contains("credits") || code == Some(429) {
            return Err(AppError::QuotaExceeded(message.to_string()));
        }
        return Err(AppError::NetworkError(format!("数据源错误 {:?}: {}", code, message)));
    }

    let values = payload
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::MalformedResponse(format!("响应缺少values列表: {}", preview(body))))?;

    if values.is_empty() {
        return Err(AppError::MalformedResponse("values列表为空".to_string()));
    }

    let mut series = values
        .iter()
        .map(parse_record)
        .collect::<Result<Vec<Candle>>>()?;

    series.sort_by_key(|c| c.time);
    series.dedup_by(|later, earlier| {
        if later.time == earlier.time {
            *earlier = *later;
            true
        } else {
            false
        }
    });

    Ok(series)
}

fn parse_record(record: &Value) -> Result<Candle> {
    let datetime = record
        .get("datetime")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::MalformedResponse("记录缺少datetime".to_string()))?;

    let time = parse_datetime(datetime)?;
    let open = parse_price(record, "open")?;
    let close = parse_price(record, "close")?;
    // 保证 high/low 覆盖开收盘价
    let high = parse_price(record, "high")?.max(open).max(close);
    let low = parse_price(record, "low")?.min(open).min(close);

    Ok(Candle { time, open, high, low, close })
}

/// 支持 "YYYY-MM-DD HH:MM:SS" 和 "YYYY-MM-DD"，按 UTC 解释
pub fn parse_datetime(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&dt).timestamp());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
        .ok_or_else(|| AppError::MalformedResponse(format!("无法解析时间: {}", raw)))
}

fn parse_price(record: &Value, field: &str) -> Result<f64> {
    let price = match record.get(field) {
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    };
    price
        .filter(|p| p.is_finite())
        .ok_or_else(|| AppError::MalformedResponse(format!("字段 {} 无法解析为价格", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fxcommon::validate_series;

    #[test]
    fn test_credits_message_is_quota() {
        let body = r#"{"code":400,"message":"You have run out of API credits for the current minute.","status":"error"}"#;
        assert!(matches!(parse_time_series(body), Err(AppError::QuotaExceeded(_))));
    }

    #[test]
    fn test_code_429_is_quota() {
        let body = r#"{"code":429,"message":"Too many requests","status":"error"}"#;
        assert!(matches!(parse_time_series(body), Err(AppError::QuotaExceeded(_))));
    }

    #[test]
    fn test_other_errors_are_fatal() {
        let body = r#"{"code":400,"message":"symbol not found","status":"error"}"#;
        let err = parse_time_series(body).unwrap_err();
        assert!(matches!(err, AppError::NetworkError(ref m) if m.contains("symbol not found")));
        assert!(!err.is_retryable());
        assert!(matches!(parse_time_series(r#"{"values": "nope"}"#), Err(AppError::MalformedResponse(_))));
        assert!(matches!(parse_time_series("<html>"), Err(AppError::MalformedResponse(_))));
    }

    #[test]
    fn test_values_are_sorted_ascending() {
        let body = r#"{
            "meta": {"symbol": "EUR/USD", "interval": "4h"},
            "values": [
                {"datetime": "2024-01-02 08:00:00", "open": "1.0950", "high": "1.0970", "low": "1.0940", "close": "1.0960"},
                {"datetime": "2024-01-02 04:00:00", "open": "1.0940", "high": "1.0955", "low": "1.0930", "close": "1.0950"},
                {"datetime": "2024-01-02 00:00:00", "open": "1.0930", "high": "1.0945", "low": "1.0920", "close": "1.0940"}
            ],
            "status": "ok"
        }"#;
        let series = parse_time_series(body).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].time, 1_704_153_600);
        assert!(validate_series(&series, Some(Timeframe::H4.duration_secs())).is_ok());
        assert_eq!(series[2].close, 1.0960);
    }

    #[test]
    fn test_daily_dates_and_duplicates() {
        let body = r#"{"values": [
            {"datetime": "2024-01-03", "open": 1.1, "high": 1.2, "low": 1.0, "close": 1.15},
            {"datetime": "2024-01-03", "open": 1.1, "high": 1.3, "low": 1.0, "close": 1.25},
            {"datetime": "2024-01-02", "open": 1.0, "high": 1.1, "low": 0.9, "close": 1.1}
        ], "status": "ok"}"#;
        let series = parse_time_series(body).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].close, 1.25);
        assert!(validate_series(&series, None).is_ok());
    }

    #[test]
    fn test_inconsistent_high_low_is_normalised() {
        let body = r#"{"values": [
            {"datetime": "2024-01-02", "open": "1.10", "high": "1.05", "low": "1.12", "close": "1.08"}
        ]}"#;
        let series = parse_time_series(body).unwrap();
        assert!(series[0].is_consistent());
        assert_eq!(series[0].high, 1.10);
        assert_eq!(series[0].low, 1.08);
    }

    #[test]
    fn test_bad_price_is_malformed() {
        let body = r#"{"values": [{"datetime": "2024-01-02", "open": "x", "high": "1", "low": "1", "close": "1"}]}"#;
        assert!(matches!(parse_time_series(body), Err(AppError::MalformedResponse(_))));
    }

    #[test]
    fn test_request_url_contains_feed_vocabulary() {
        let client = TwelveDataClient::new(&FeedEndpointConfig::default()).unwrap();
        let url = client
            .request_url("EUR/USD", Timeframe::W1, &Credential::new("secret"))
            .unwrap();
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("symbol".to_string(), "EUR/USD".to_string())));
        assert!(query.contains(&("interval".to_string(), "1week".to_string())));
        assert!(query.contains(&("outputsize".to_string(), "50".to_string())));
        assert!(query.contains(&("apikey".to_string(), "secret".to_string())));
    }
}
