// 导出共享模块
pub mod config;
pub mod error;
pub mod logging_setup;
pub mod models;
pub mod store;

// 重新导出常用类型，方便使用
pub use config::{FeedConfig, LoggingConfig, ScheduleConfig};
pub use error::{AppError, Result};
pub use models::{
    cache_key, detection_id, validate_series, Candle, CandleSeries, Credential, DataSource,
    Detection, FetchOutcome, InstrumentClass, NotificationConfig, PatternKind, Timeframe,
};
pub use store::{KeyValueStore, MemoryKvStore, SqliteKvStore};
