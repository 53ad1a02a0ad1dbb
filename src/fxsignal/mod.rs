// 形态检测结果：检测能力接口、检测结果存储和通知分发

pub mod detector;
pub mod notify;
pub mod store;

pub use detector::{NullPatternDetector, PatternDetector};
pub use notify::{should_alert, LogNotifier, NotificationDispatcher, Notifier};
pub use store::{merge, DetectionStore};
