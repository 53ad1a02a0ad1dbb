use crate::fxcommon::{AppError, Result};
use serde_json::{json, Value};

/// 实时流收到的消息
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// 报价事件
    Price {
        symbol: String,
        price: f64,
        /// 数据源给出的报价时间（秒），缺失时由调用方使用本地时间
        timestamp: Option<i64>,
    },
    /// 订阅结果，`fails` 为订阅失败的品种
    SubscribeStatus { ok: bool, fails: Vec<String> },
    Heartbeat,
    Other(String),
}

/// 创建订阅消息
pub fn subscribe_message(symbol: &str) -> String {
    json!({
        "action": "subscribe",
        "params": { "symbols": symbol }
    })
    .to_string()
}

/// 创建退订消息，切换焦点品种时先退订旧品种
pub fn unsubscribe_message(symbol: &str) -> String {
    json!({
        "action": "unsubscribe",
        "params": { "symbols": symbol }
    })
    .to_string()
}

/// 创建心跳消息
pub fn heartbeat_message() -> String {
    json!({ "action": "heartbeat" }).to_string()
}

/// 解析实时流消息
pub fn parse_stream_message(text: &str) -> Result<StreamMessage> {
    let json: Value = serde_json::from_str(text)
        .map_err(|e| AppError::MalformedResponse(format!("实时流消息不是有效的JSON: {}", e)))?;

    let event = json.get("event").and_then(Value::as_str).unwrap_or_default();
    match event {
        "price" => {
            let symbol = json
                .get("symbol")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::MalformedResponse("报价消息缺少symbol".to_string()))?
                .to_string();
            let price = match json.get("price") {
                Some(Value::Number(n)) => n.as_f64(),
                Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|p| p.is_finite())
            .ok_or_else(|| AppError::MalformedResponse(format!("报价消息价格无效: {}", text)))?;
            let timestamp = json.get("timestamp").and_then(Value::as_i64);
            Ok(StreamMessage::Price { symbol, price, timestamp })
        }
        "subscribe-status" => {
            let ok = json.get("status").and_then(Value::as_str) == Some("ok");
            let fails = json
                .get("fails")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.get("symbol").and_then(Value::as_str).or_else(|| item.as_str()))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Ok(StreamMessage::SubscribeStatus { ok, fails })
        }
        "heartbeat" => Ok(StreamMessage::Heartbeat),
        other => Ok(StreamMessage::Other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_messages() {
        let sub: Value = serde_json::from_str(&subscribe_message("EUR/USD")).unwrap();
        assert_eq!(sub["action"], "subscribe");
        assert_eq!(sub["params"]["symbols"], "EUR/USD");

        let hb: Value = serde_json::from_str(&heartbeat_message()).unwrap();
        assert_eq!(hb, json!({ "action": "heartbeat" }));
    }

    #[test]
    fn test_parse_price_event() {
        let text = r#"{"event":"price","symbol":"EUR/USD","currency_base":"Euro","exchange":"PHYSICAL CURRENCY","timestamp":1704283200,"price":1.0951}"#;
        assert_eq!(
            parse_stream_message(text).unwrap(),
            StreamMessage::Price { symbol: "EUR/USD".to_string(), price: 1.0951, timestamp: Some(1_704_283_200) }
        );
    }

    #[test]
    fn test_parse_control_events() {
        let status = r#"{"event":"subscribe-status","status":"error","success":[],"fails":[{"symbol":"FOO/BAR"}]}"#;
        assert_eq!(
            parse_stream_message(status).unwrap(),
            StreamMessage::SubscribeStatus { ok: false, fails: vec!["FOO/BAR".to_string()] }
        );
        assert_eq!(
            parse_stream_message(r#"{"event":"heartbeat","status":"ok"}"#).unwrap(),
            StreamMessage::Heartbeat
        );
        assert_eq!(
            parse_stream_message(r#"{"event":"reset"}"#).unwrap(),
            StreamMessage::Other("reset".to_string())
        );
    }

    #[test]
    fn test_bad_price_is_rejected() {
        assert!(parse_stream_message(r#"{"event":"price","symbol":"EUR/USD","price":"abc"}"#).is_err());
        assert!(parse_stream_message("not json").is_err());
    }
}
