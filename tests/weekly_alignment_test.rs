//! 周线对齐：K线网格和模拟序列都以周一 00:00 UTC 为起点

use chrono::{Datelike, TimeZone, Utc, Weekday};
use fx_pattern_feed::fxcommon::Timeframe;
use fx_pattern_feed::fxdata::synthetic_series;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn weekday(ts: i64) -> Weekday {
    Utc.timestamp_opt(ts, 0).unwrap().weekday()
}

#[test]
fn test_weekly_alignment_always_lands_on_monday() {
    let test_cases = [
        0,             // 1970-01-01（周四）
        1_704_067_200, // 2024-01-01 00:00:00（周一）
        1_704_153_599, // 2024-01-01 23:59:59
        1_704_585_600, // 2024-01-07 00:00:00（周日）
        1_704_671_999, // 2024-01-07 23:59:59
        1_709_251_200, // 2024-03-01（周五）
    ];

    for ts in test_cases {
        let aligned = Timeframe::W1.align(ts);
        assert_eq!(weekday(aligned), Weekday::Mon, "ts={}", ts);
        assert!(aligned <= ts && ts - aligned < Timeframe::W1.duration_secs());
    }
}

#[test]
fn test_synthetic_weekly_series_is_monday_aligned() {
    let mut rng = StdRng::seed_from_u64(2024);
    let now = 1_709_251_200;
    let series = synthetic_series("XAU/USD", Timeframe::W1, now, &mut rng);
    assert!(series.iter().all(|c| weekday(c.time) == Weekday::Mon));
    assert_eq!(series.last().unwrap().time, Timeframe::W1.align(now) - Timeframe::W1.duration_secs());
}
