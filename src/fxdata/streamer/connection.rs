use crate::fxcommon::{AppError, Credential, Result};
use crate::fxdata::streamer::message::{
    heartbeat_message, parse_stream_message, subscribe_message, unsubscribe_message, StreamMessage,
};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use url::Url;

/// 关闭连接时等待关闭帧发出的最长时间
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// 发给连接任务的命令
#[derive(Debug, Clone, PartialEq)]
pub enum StreamCommand {
    Resubscribe(String),
    Close,
}

/// 连接任务上报的事件，都带有连接ID，旧连接的事件由接收方丢弃
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected {
        conn_id: u64,
    },
    Price {
        conn_id: u64,
        symbol: String,
        price: f64,
        timestamp: Option<i64>,
    },
    Disconnected {
        conn_id: u64,
        reason: Option<String>,
    },
}

impl StreamEvent {
    pub fn conn_id(&self) -> u64 {
        match self {
            StreamEvent::Connected { conn_id }
            | StreamEvent::Price { conn_id, .. }
            | StreamEvent::Disconnected { conn_id, .. } => *conn_id,
        }
    }
}

/// 带凭证的实时流地址
pub fn stream_url(base: &str, credential: &Credential) -> Result<Url> {
    Ok(Url::parse_with_params(base, &[("apikey", credential.token())])?)
}

/// 一条实时报价连接
///
/// 连接、订阅、心跳和读取都在同一个后台任务里；任务结束时心跳随之停止。
/// 出错只上报 `Disconnected`，不自动重连。句柄被丢弃时任务被中止。
///
/// 传入 `previous` 时，新任务先关闭旧连接（最多等待 `CLOSE_GRACE`，超时中止），
/// 旧任务结束并上报 `Disconnected` 之后才发起新连接。
pub struct StreamConnection {
    conn_id: u64,
    cmd_tx: mpsc::Sender<StreamCommand>,
    task: Option<JoinHandle<()>>,
}

impl StreamConnection {
    pub fn spawn(
        url: Url,
        symbol: &str,
        heartbeat: Duration,
        conn_id: u64,
        previous: Option<StreamConnection>,
        event_tx: mpsc::Sender<StreamEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let symbol = symbol.to_string();

        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                debug!(target: "实时流", conn_id, previous = previous.conn_id, "等待旧连接关闭");
                previous.shutdown().await;
            }
            let result = run_connection(url, symbol, heartbeat, conn_id, cmd_rx, event_tx.clone()).await;
            let reason = match result {
                Ok(()) => {
                    info!(target: "实时流", conn_id, "连接已关闭");
                    None
                }
                Err(e) => {
                    error!(
                        target: "实时流",
                        conn_id,
                        error.summary = e.get_error_type_summary(),
                        error.details = %e,
                        "连接中断"
                    );
                    Some(e.to_string())
                }
            };
            let _ = event_tx.send(StreamEvent::Disconnected { conn_id, reason }).await;
        });

        Self { conn_id, cmd_tx, task: Some(task) }
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// 切换订阅的品种
    pub fn resubscribe(&self, symbol: &str) -> Result<()> {
        self.cmd_tx
            .try_send(StreamCommand::Resubscribe(symbol.to_string()))
            .map_err(|e| AppError::ChannelError(format!("发送重新订阅命令失败: {}", e)))
    }

    /// 在后台关闭，不等待结果
    pub fn close(self) {
        tokio::spawn(self.shutdown());
    }

    /// 请求关闭并等待任务结束；关闭帧未能及时发出时中止任务
    pub async fn shutdown(mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        if self.cmd_tx.try_send(StreamCommand::Close).is_err() {
            task.abort();
            return;
        }
        if timeout(CLOSE_GRACE, &mut task).await.is_err() {
            warn!(target: "实时流", conn_id = self.conn_id, "关闭超时，中止连接任务");
            task.abort();
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_connection(
    url: Url,
    mut symbol: String,
    heartbeat: Duration,
    conn_id: u64,
    mut cmd_rx: mpsc::Receiver<StreamCommand>,
    event_tx: mpsc::Sender<StreamEvent>,
) -> Result<()> {
    info!(target: "实时流", conn_id, host = url.host_str().unwrap_or_default(), %symbol, "连接实时报价流");
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();

    write.send(Message::Text(subscribe_message(&symbol))).await?;
    info!(target: "实时流", conn_id, %symbol, "连接已建立，已发送订阅");
    event_tx
        .send(StreamEvent::Connected { conn_id })
        .await
        .map_err(|e| AppError::ChannelError(e.to_string()))?;

    let mut heartbeat_timer = interval(heartbeat);
    heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // 第一次 tick 立即完成
    heartbeat_timer.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat_timer.tick() => {
                debug!(target: "实时流", conn_id, "发送心跳");
                write.send(Message::Text(heartbeat_message())).await?;
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(StreamCommand::Resubscribe(next)) => {
                    if next != symbol {
                        write.send(Message::Text(unsubscribe_message(&symbol))).await?;
                    }
                    write.send(Message::Text(subscribe_message(&next))).await?;
                    info!(target: "实时流", conn_id, from = %symbol, to = %next, "重新订阅");
                    symbol = next;
                }
                Some(StreamCommand::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => match parse_stream_message(&text) {
                    Ok(StreamMessage::Price { symbol: quoted, price, timestamp }) => {
                        let event = StreamEvent::Price { conn_id, symbol: quoted, price, timestamp };
                        if event_tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    Ok(StreamMessage::SubscribeStatus { ok, fails }) => {
                        if ok && fails.is_empty() {
                            debug!(target: "实时流", conn_id, "订阅成功");
                        } else {
                            warn!(target: "实时流", conn_id, ?fails, "订阅部分失败");
                        }
                    }
                    Ok(StreamMessage::Heartbeat) => debug!(target: "实时流", conn_id, "心跳确认"),
                    Ok(StreamMessage::Other(event)) => debug!(target: "实时流", conn_id, %event, "忽略其他事件"),
                    Err(e) => warn!(
                        target: "实时流",
                        conn_id,
                        error.summary = e.get_error_type_summary(),
                        error.details = %e,
                        "解析消息失败"
                    ),
                },
                Some(Ok(Message::Ping(data))) => {
                    write.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(AppError::WebSocketError(format!("服务端关闭连接: {:?}", frame)));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(AppError::WebSocketError("连接已结束".to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url_carries_credential() {
        let url = stream_url("wss://ws.twelvedata.com/v1/quotes/price", &Credential::new("k1")).unwrap();
        assert_eq!(url.as_str(), "wss://ws.twelvedata.com/v1/quotes/price?apikey=k1");
    }

    #[test]
    fn test_event_conn_id() {
        let event = StreamEvent::Price { conn_id: 7, symbol: "EUR/USD".to_string(), price: 1.1, timestamp: None };
        assert_eq!(event.conn_id(), 7);
        assert_eq!(StreamEvent::Disconnected { conn_id: 3, reason: None }.conn_id(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_disconnect() {
        let (tx, mut rx) = mpsc::channel(8);
        let url = Url::parse("ws://127.0.0.1:9/quotes").unwrap();
        let _conn = StreamConnection::spawn(url, "EUR/USD", Duration::from_secs(10), 11, None, tx);

        let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        match event {
            StreamEvent::Disconnected { conn_id, reason } => {
                assert_eq!(conn_id, 11);
                assert!(reason.is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    /// 本地 WebSocket 服务：接受任意连接并读到对端关闭为止
    async fn local_server() -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_close() {
                            break;
                        }
                    }
                });
            }
        });
        Url::parse(&format!("ws://{}/quotes", addr)).unwrap()
    }

    async fn next_event(rx: &mut mpsc::Receiver<StreamEvent>) -> StreamEvent {
        timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_replacement_connects_after_previous_closed() {
        let url = local_server().await;
        let (tx, mut rx) = mpsc::channel(8);

        let first = StreamConnection::spawn(url.clone(), "EUR/USD", Duration::from_secs(10), 1, None, tx.clone());
        assert_eq!(next_event(&mut rx).await, StreamEvent::Connected { conn_id: 1 });

        let second = StreamConnection::spawn(url, "EUR/USD", Duration::from_secs(10), 2, Some(first), tx);
        assert_eq!(next_event(&mut rx).await, StreamEvent::Disconnected { conn_id: 1, reason: None });
        assert_eq!(next_event(&mut rx).await, StreamEvent::Connected { conn_id: 2 });

        second.shutdown().await;
        assert_eq!(next_event(&mut rx).await, StreamEvent::Disconnected { conn_id: 2, reason: None });
    }
}
