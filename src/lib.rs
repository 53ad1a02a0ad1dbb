// 导出模块
pub mod engine;
pub mod fxcommon;
pub mod fxdata;
pub mod fxsignal;

// Re-export error types
pub use fxcommon::error::AppError;

pub use engine::{IngestionService, ServiceHandle, ServiceStatus};
