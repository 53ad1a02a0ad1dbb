use crate::fxcommon::{Detection, NotificationConfig};
use std::sync::Arc;
use tracing::{debug, info};

/// 对外发出用户可见提醒的能力
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, title: &str, body: &str);
}

/// 以日志形式输出提醒
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!(target: "通知", title, body, "形态提醒");
    }
}

/// 总开关打开，且品种和形态都在订阅范围内
pub fn should_alert(detection: &Detection, config: &NotificationConfig) -> bool {
    config.master_enabled
        && config.instruments.contains(&detection.instrument)
        && config.patterns.contains(&detection.pattern)
}

/// 实时路径上新产生的检测结果的提醒分发
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// 返回是否发出了提醒
    pub fn consider(&self, detection: &Detection, config: &NotificationConfig) -> bool {
        if !should_alert(detection, config) {
            debug!(target: "通知", id = %detection.id, "不满足通知条件，跳过");
            return false;
        }
        let title = format!("{} on {}", detection.pattern, detection.instrument);
        let body = format!(
            "{} candle closed at {:.5} ({})",
            detection.timeframe, detection.price, detection.timestamp
        );
        self.notifier.notify(&title, &body);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fxcommon::{PatternKind, Timeframe};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, body: &str) {
            self.sent.lock().unwrap().push((title.to_string(), body.to_string()));
        }
    }

    fn hammer() -> Detection {
        Detection::new("EUR/USD", Timeframe::H4, PatternKind::Hammer, 1_704_283_200, 1.0951)
    }

    #[test]
    fn test_should_alert_requires_all_three() {
        let config = NotificationConfig::all_enabled(["EUR/USD"]);
        assert!(should_alert(&hammer(), &config));

        let mut off = config.clone();
        off.master_enabled = false;
        assert!(!should_alert(&hammer(), &off));

        let mut other_instrument = config.clone();
        other_instrument.instruments.clear();
        assert!(!should_alert(&hammer(), &other_instrument));

        let mut no_hammer = config;
        no_hammer.patterns.remove(&PatternKind::Hammer);
        assert!(!should_alert(&hammer(), &no_hammer));
    }

    #[test]
    fn test_dispatch_formats_title() {
        let recorder = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::new(recorder.clone());

        assert!(dispatcher.consider(&hammer(), &NotificationConfig::all_enabled(["EUR/USD"])));
        assert!(!dispatcher.consider(&hammer(), &NotificationConfig::default()));

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Hammer on EUR/USD");
        assert!(sent[0].1.starts_with("H4 candle closed at 1.09510"));
    }
}
