// 数据获取：凭证、历史K线、缓存、限流、编排、调度与实时流

pub mod cache;
pub mod credentials;
pub mod fetcher;
pub mod orchestrator;
pub mod rate_limit;
pub mod scheduler;
pub mod streamer;
pub mod synthetic;

pub use cache::{CacheEntry, CandleCache};
pub use credentials::CredentialRotator;
pub use fetcher::{parse_time_series, HistoricalFetcher, TwelveDataClient};
pub use orchestrator::FetchOrchestrator;
pub use rate_limit::RequestSpacer;
pub use scheduler::{BackgroundScanner, PollingScheduler};
pub use streamer::{
    closed_portion, ConnectionEvent, ConnectionState, DetectionGate, LiveAggregator, StreamCommand,
    StreamConnection, StreamEvent, TickEffect,
};
pub use synthetic::synthetic_series;
