// 实时报价流：连接状态机、消息编解码、连接任务和K线聚合

mod aggregator;
mod connection;
mod message;

use tracing::warn;

pub use aggregator::{closed_portion, DetectionGate, LiveAggregator, TickEffect};
pub use connection::{stream_url, StreamCommand, StreamConnection, StreamEvent};
pub use message::{heartbeat_message, parse_stream_message, subscribe_message, unsubscribe_message, StreamMessage};

/// 实时流连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// 驱动连接状态变化的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// 发起连接
    Open,
    /// 握手完成并已发送订阅
    Established,
    /// 连接或读写失败
    Failed,
    /// 主动关闭或服务端关闭
    Closed,
}

impl ConnectionState {
    /// 非法的状态变化会被忽略，状态保持不变
    pub fn transition(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self, event) {
            (Disconnected, Open) => Connecting,
            (Connecting, Established) => Connected,
            (Connecting | Connected, Failed) => Disconnected,
            (_, Closed) => Disconnected,
            (state, event) => {
                warn!(target: "实时流", ?state, ?event, "忽略非法的连接状态变化");
                state
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lifecycle() {
        let state = ConnectionState::default();
        let state = state.transition(ConnectionEvent::Open);
        assert_eq!(state, ConnectionState::Connecting);
        let state = state.transition(ConnectionEvent::Established);
        assert!(state.is_connected());
        assert_eq!(state.transition(ConnectionEvent::Failed), ConnectionState::Disconnected);
        assert_eq!(state.transition(ConnectionEvent::Closed), ConnectionState::Disconnected);
    }

    #[test]
    fn test_invalid_transitions_are_ignored() {
        assert_eq!(
            ConnectionState::Disconnected.transition(ConnectionEvent::Established),
            ConnectionState::Disconnected
        );
        assert_eq!(ConnectionState::Connected.transition(ConnectionEvent::Open), ConnectionState::Connected);
        assert_eq!(
            ConnectionState::Disconnected.transition(ConnectionEvent::Failed),
            ConnectionState::Disconnected
        );
    }
}
