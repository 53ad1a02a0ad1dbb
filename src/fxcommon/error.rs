use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// 数据源额度耗尽（credits 用尽或 429），可通过切换凭证重试
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// 所有凭证都返回额度耗尽，参数为尝试次数
    #[error("All {0} credentials exhausted")]
    AllCredentialsExhausted(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("URL parsing error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        // 429 在传输层就能识别出来，其余一律视为网络错误
        if e.status().map(|s| s.as_u16()) == Some(429) {
            AppError::QuotaExceeded(e.to_string())
        } else {
            AppError::NetworkError(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::WebSocketError(e.to_string())
    }
}

impl AppError {
    /// 获取错误类型的简洁摘要，用于日志中的错误分类
    pub fn get_error_type_summary(&self) -> &'static str {
        match self {
            // 行情数据获取相关
            AppError::QuotaExceeded(_) => "feed_quota_exceeded",
            AppError::NetworkError(_) => "feed_connection_failed",
            AppError::MalformedResponse(_) => "feed_payload_malformed",
            AppError::AllCredentialsExhausted(_) => "feed_credentials_exhausted",

            // 实时行情流
            AppError::WebSocketError(_) => "realtime_price_stream_failed",
            AppError::UrlParseError(_) => "feed_endpoint_invalid",

            // 数据处理与存储
            AppError::JsonError(_) => "signal_data_parsing_failed",
            AppError::StoreError(_) => "signal_persistence_failed",
            AppError::SqliteError(_) => "signal_storage_operation_failed",
            AppError::IoError(_) => "file_operation_failed",

            AppError::ConfigError(_) => "feed_service_configuration_invalid",
            AppError::ChannelError(_) => "ingestion_pipeline_failed",
        }
    }

    /// 检查错误是否可以通过切换凭证重试
    ///
    /// 这是拉取编排里的分类器：只有额度耗尽会轮换凭证后重试，
    /// 其余错误对本次拉取而言都是致命的，立即返回给调用方。
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::QuotaExceeded(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
