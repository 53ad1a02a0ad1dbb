//! 测试错误分类系统
//!
//! 验证 AppError 的 get_error_type_summary() 和凭证轮换分类器

use fx_pattern_feed::fxcommon::error::AppError;

#[test]
fn test_quota_error_classification() {
    let error = AppError::QuotaExceeded("You have run out of API credits".to_string());
    assert_eq!(error.get_error_type_summary(), "feed_quota_exceeded");
    assert!(error.is_retryable()); // 额度耗尽换凭证重试
}

#[test]
fn test_network_and_payload_errors_are_fatal() {
    let network = AppError::NetworkError("connection reset".to_string());
    assert_eq!(network.get_error_type_summary(), "feed_connection_failed");
    assert!(!network.is_retryable());

    let malformed = AppError::MalformedResponse("missing values".to_string());
    assert_eq!(malformed.get_error_type_summary(), "feed_payload_malformed");
    assert!(!malformed.is_retryable());
}

#[test]
fn test_all_error_types_have_classification() {
    let test_cases = vec![
        (AppError::QuotaExceeded("test".to_string()), "feed_quota_exceeded"),
        (AppError::NetworkError("test".to_string()), "feed_connection_failed"),
        (AppError::MalformedResponse("test".to_string()), "feed_payload_malformed"),
        (AppError::AllCredentialsExhausted(3), "feed_credentials_exhausted"),
        (AppError::WebSocketError("test".to_string()), "realtime_price_stream_failed"),
        (AppError::ConfigError("test".to_string()), "feed_service_configuration_invalid"),
        (AppError::StoreError("test".to_string()), "signal_persistence_failed"),
        (AppError::ChannelError("test".to_string()), "ingestion_pipeline_failed"),
        (
            AppError::JsonError(serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err()),
            "signal_data_parsing_failed",
        ),
        (AppError::UrlParseError(url::Url::parse("not a url").unwrap_err()), "feed_endpoint_invalid"),
    ];

    for (error, expected_summary) in test_cases {
        assert_eq!(error.get_error_type_summary(), expected_summary);
        assert_eq!(error.is_retryable(), expected_summary == "feed_quota_exceeded");
    }
}
