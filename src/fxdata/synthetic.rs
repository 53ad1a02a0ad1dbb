use crate::fxcommon::{Candle, CandleSeries, InstrumentClass, Timeframe};
use rand::Rng;
use tracing::warn;

/// 模拟序列的K线数量，与历史请求的 outputsize 一致
pub const SYNTHETIC_CANDLES: usize = 50;

/// 每根K线相对基准价的最大波动比例
const VOLATILITY: f64 = 0.002;

/// 所有凭证耗尽且没有缓存时的演示数据
///
/// 最后一根K线的开盘时间为 `align(now) - Δ`，向前按周期等距排列；
/// 价格从品种分类对应的区间内随机起步，做有界的乘性随机游走。
pub fn synthetic_series<R: Rng>(
    instrument: &str,
    timeframe: Timeframe,
    now_secs: i64,
    rng: &mut R,
) -> CandleSeries {
    let step = timeframe.duration_secs();
    let last_time = timeframe.align(now_secs) - step;
    let first_time = last_time - step * (SYNTHETIC_CANDLES as i64 - 1);

    let (low_bound, high_bound) = InstrumentClass::of(instrument).base_price_range();
    let base = rng.gen_range(low_bound..high_bound);
    let max_wick = base * VOLATILITY * 0.5;

    warn!(
        target: "历史数据",
        instrument,
        %timeframe,
        base_price = base,
        "使用模拟数据"
    );

    let mut price = base;
    (0..SYNTHETIC_CANDLES as i64)
        .map(|i| {
            let open = price;
            let close = open * (1.0 + rng.gen_range(-VOLATILITY..=VOLATILITY));
            let high = open.max(close) + rng.gen_range(0.0..=max_wick);
            let low = (open.min(close) - rng.gen_range(0.0..=max_wick)).max(0.0);
            price = close;
            Candle { time: first_time + i * step, open, high, low, close }
        })
        .collect()
}
