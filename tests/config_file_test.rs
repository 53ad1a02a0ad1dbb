//! 示例配置文件可以被解析，并与默认值保持一致

use fx_pattern_feed::fxcommon::config::constants::DEFAULT_CONFIG_PATH;
use fx_pattern_feed::fxcommon::{FeedConfig, Timeframe};
use tempfile::TempDir;

fn sample_config() -> FeedConfig {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
    let raw = std::fs::read_to_string(path).unwrap();
    toml::from_str(&raw).unwrap()
}

#[test]
fn test_sample_config_matches_defaults() {
    let config = sample_config();
    let defaults = FeedConfig::default();

    assert_eq!(config.market.instruments, defaults.market.instruments);
    assert_eq!(config.market.focused_timeframe, Timeframe::H4);
    assert_eq!(config.schedule.cache_ttl_secs, defaults.schedule.cache_ttl_secs);
    assert_eq!(config.schedule.poll_stale_after_secs, 870);
    assert_eq!(config.schedule.min_request_spacing_ms, 2000);
    assert_eq!(config.feed.output_size, 50);
    assert!(config.credentials.keys.is_empty());

    let notifications = config.initial_notification_config();
    assert!(notifications.master_enabled);
    assert!(notifications.instruments.contains("XAU/USD"));
    assert!(!notifications.instruments.contains("USD/CHF"));
}

#[test]
fn test_save_and_reload_with_credentials() {
    let mut config = sample_config();
    config.credentials.keys = vec!["first".to_string(), "second".to_string()];
    config.market.focused_instrument = "USD/JPY".to_string();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("FxFeedConfig.toml");
    let path = path.to_str().unwrap();
    config.save_to_file(path).unwrap();

    let reloaded = FeedConfig::from_file(path).unwrap();
    assert_eq!(reloaded.market.focused_instrument, "USD/JPY");
    assert_eq!(reloaded.resolve_credentials().len(), 2);
}
