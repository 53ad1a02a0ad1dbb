use crate::fxcommon::{Candle, Timeframe};
use tracing::{debug, trace};

/// 一次报价对序列的影响
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEffect {
    /// 在最后一根K线内更新
    Updated,
    /// 越过边界，追加了一根新K线
    Opened { time: i64 },
    /// 序列为空或价格无效
    Ignored,
}

/// 实时报价聚合到固定周期K线
///
/// 唯一的隐含状态是最后一根K线的开盘时间；新K线按网格对齐，
/// 一次越界只追加一根，不补齐中间缺失的周期。
#[derive(Debug, Clone, Copy)]
pub struct LiveAggregator {
    step_secs: i64,
}

impl LiveAggregator {
    pub fn new(step_secs: i64) -> Self {
        Self { step_secs }
    }

    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        Self::new(timeframe.duration_secs())
    }

    pub fn apply_tick(&self, series: &mut Vec<Candle>, price: f64, wall_secs: i64) -> TickEffect {
        if !price.is_finite() {
            debug!(target: "实时流", price, "忽略无效报价");
            return TickEffect::Ignored;
        }
        let Some(last) = series.last_mut() else {
            return TickEffect::Ignored;
        };

        let boundary = last.time + self.step_secs;
        if wall_secs < boundary {
            last.high = last.high.max(price);
            last.low = last.low.min(price);
            last.close = price;
            trace!(target: "实时流", time = last.time, price, "更新当前K线");
            TickEffect::Updated
        } else {
            series.push(Candle::flat(boundary, price));
            debug!(target: "实时流", time = boundary, price, wall_secs, "越过周期边界，开启新K线");
            TickEffect::Opened { time: boundary }
        }
    }
}

/// 形态检测触发条件：序列长度恰好比上次观察时多 1
#[derive(Debug, Clone, Default)]
pub struct DetectionGate {
    last_len: Option<usize>,
}

impl DetectionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 整体替换序列后重置基准长度
    pub fn reset(&mut self, len: usize) {
        self.last_len = Some(len);
    }

    pub fn observe(&mut self, len: usize) -> bool {
        let fire = matches!(self.last_len, Some(prev) if len == prev + 1);
        self.last_len = Some(len);
        fire
    }
}

/// 去掉仍未收盘的最后一根K线
pub fn closed_portion(series: &[Candle]) -> &[Candle] {
    &series[..series.len().saturating_sub(1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fxcommon::validate_series;

    const H4: i64 = 14_400;

    fn series() -> Vec<Candle> {
        vec![
            Candle { time: 0, open: 1.10, high: 1.12, low: 1.09, close: 1.11 },
            Candle { time: H4, open: 1.11, high: 1.13, low: 1.10, close: 1.12 },
        ]
    }

    #[test]
    fn test_tick_inside_boundary_updates_in_place() {
        let agg = LiveAggregator::new(H4);
        let mut s = series();

        assert_eq!(agg.apply_tick(&mut s, 1.15, H4 + 100), TickEffect::Updated);
        assert_eq!(agg.apply_tick(&mut s, 1.05, H4 + 200), TickEffect::Updated);
        assert_eq!(s.len(), 2);
        let last = s[1];
        assert_eq!((last.open, last.high, last.low, last.close), (1.11, 1.15, 1.05, 1.05));
        assert_eq!(s[0], series()[0]);
    }

    #[test]
    fn test_crossing_appends_exactly_one_grid_aligned_candle() {
        let agg = LiveAggregator::new(H4);
        let mut s = series();

        // 跨越了多个周期也只追加一根，时间按网格而非墙钟
        let effect = agg.apply_tick(&mut s, 1.20, 5 * H4 + 37);
        assert_eq!(effect, TickEffect::Opened { time: 2 * H4 });
        assert_eq!(s.len(), 3);
        assert_eq!(s[2], Candle::flat(2 * H4, 1.20));

        // 同一批后续报价更新新K线
        assert_eq!(agg.apply_tick(&mut s, 1.21, 2 * H4 + 10), TickEffect::Updated);
        assert_eq!(s[2].high, 1.21);
        assert!(validate_series(&s, Some(H4)).is_ok());
    }

    #[test]
    fn test_empty_series_and_bad_price_are_ignored() {
        let agg = LiveAggregator::new(H4);
        let mut empty = Vec::new();
        assert_eq!(agg.apply_tick(&mut empty, 1.0, 0), TickEffect::Ignored);
        let mut s = series();
        assert_eq!(agg.apply_tick(&mut s, f64::NAN, H4 + 1), TickEffect::Ignored);
        assert_eq!(s, series());
    }

    #[test]
    fn test_gate_fires_only_on_single_increase() {
        let mut gate = DetectionGate::new();
        assert!(!gate.observe(50));
        assert!(!gate.observe(50));
        assert!(gate.observe(51));
        assert!(!gate.observe(51));
        assert!(!gate.observe(53));
        assert!(gate.observe(54));

        gate.reset(10);
        assert!(gate.observe(11));
    }

    #[test]
    fn test_closed_portion_excludes_open_candle() {
        let s = series();
        assert_eq!(closed_portion(&s), &s[..1]);
        assert!(closed_portion(&[]).is_empty());
    }
}
