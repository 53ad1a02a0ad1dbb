use crate::fxcommon::{Candle, Detection, Timeframe};

/// 形态识别能力
///
/// 识别算法由外部提供。`scan_history` 用于整段历史的回补扫描，
/// `detect_patterns` 只评估刚收盘的最后一根K线。
pub trait PatternDetector: Send + Sync + 'static {
    fn scan_history(&self, series: &[Candle], instrument: &str, timeframe: Timeframe) -> Vec<Detection>;

    fn detect_patterns(&self, series: &[Candle], instrument: &str, timeframe: Timeframe) -> Option<Detection>;
}

/// 不识别任何形态
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPatternDetector;

impl PatternDetector for NullPatternDetector {
    fn scan_history(&self, _series: &[Candle], _instrument: &str, _timeframe: Timeframe) -> Vec<Detection> {
        Vec::new()
    }

    fn detect_patterns(&self, _series: &[Candle], _instrument: &str, _timeframe: Timeframe) -> Option<Detection> {
        None
    }
}
