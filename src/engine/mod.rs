// src/engine/mod.rs
pub mod events;


use crate::fxcommon::store::{load_json, save_json, CREDENTIAL_INDEX_KEY, FEED_KEY, NOTIFICATION_CONFIG_KEY};
use crate::fxcommon::{
    cache_key, AppError, CandleSeries, DataSource, Detection, FeedConfig, FetchOutcome, KeyValueStore,
    NotificationConfig, Result, Timeframe,
};
use crate::fxdata::streamer::stream_url;
use crate::fxdata::{
    closed_portion, BackgroundScanner, CandleCache, ConnectionEvent, ConnectionState, CredentialRotator,
    DetectionGate, FetchOrchestrator, HistoricalFetcher, LiveAggregator, PollingScheduler, RequestSpacer,
    StreamConnection, StreamEvent, TickEffect,
};
use crate::fxsignal::{DetectionStore, NotificationDispatcher, Notifier, PatternDetector};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub use events::{FetchEvent, ServiceCommand, ServiceStatus};

const COMMAND_CHANNEL_SIZE: usize = 64;
const EVENT_CHANNEL_SIZE: usize = 256;

/// 行情采集服务
///
/// 唯一持有焦点序列、检测结果、通知配置和实时流连接的实例。所有状态变更
/// 都发生在 `run` 的事件循环里；网络请求在独立任务中执行，结果带着代际号
/// 或连接ID回到循环，过期的结果直接丢弃。
pub struct IngestionService<F, D> {
    config: Arc<FeedConfig>,
    orchestrator: FetchOrchestrator<F>,
    detector: Arc<D>,
    dispatcher: NotificationDispatcher,
    store: Arc<dyn KeyValueStore>,

    // 核心状态
    feed: DetectionStore,
    notification_config: NotificationConfig,
    instrument: String,
    timeframe: Timeframe,
    series: CandleSeries,
    aggregator: LiveAggregator,
    gate: DetectionGate,
    data_source: Option<DataSource>,
    last_error: Option<String>,
    running: bool,

    // 调度
    poller: PollingScheduler,
    scanner: BackgroundScanner,
    generation: u64,
    scanning: Option<String>,
    scan_clear_at: Option<Instant>,

    // 最近一次持久化并用于实时流的凭证索引
    credential_index: usize,

    // 实时流
    stream: Option<StreamConnection>,
    next_conn_id: u64,
    connection: ConnectionState,

    // 通信
    cmd_rx: mpsc::Receiver<ServiceCommand>,
    fetch_tx: mpsc::Sender<FetchEvent>,
    fetch_rx: mpsc::Receiver<FetchEvent>,
    stream_tx: mpsc::Sender<StreamEvent>,
    stream_rx: mpsc::Receiver<StreamEvent>,
    status_tx: watch::Sender<ServiceStatus>,
}

impl<F: HistoricalFetcher, D: PatternDetector> IngestionService<F, D> {
    /// 组装服务并启动事件循环，必须在 tokio 运行时内调用
    pub fn start(
        config: FeedConfig,
        fetcher: F,
        detector: D,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<ServiceHandle> {
        let (service, cmd_tx, status_rx) = Self::build(config, fetcher, detector, notifier, store)?;
        let task = tokio::spawn(service.run());
        Ok(ServiceHandle { cmd_tx, status_rx, task })
    }

    fn build(
        config: FeedConfig,
        fetcher: F,
        detector: D,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<(Self, mpsc::Sender<ServiceCommand>, watch::Receiver<ServiceStatus>)> {
        config.validate()?;

        // 持久化数据损坏时使用默认值，不阻止服务启动
        let credentials = config.resolve_credentials();
        let start_index = recover_persisted(CREDENTIAL_INDEX_KEY, load_json(store.as_ref(), CREDENTIAL_INDEX_KEY))
            .flatten()
            .unwrap_or(0usize);
        let rotator = CredentialRotator::with_index(credentials, start_index)?;
        let feed = recover_persisted(FEED_KEY, DetectionStore::load(store.as_ref())).unwrap_or_default();
        let notification_config =
            recover_persisted(NOTIFICATION_CONFIG_KEY, load_json(store.as_ref(), NOTIFICATION_CONFIG_KEY))
                .flatten()
                .unwrap_or_else(|| config.initial_notification_config());

        let schedule = &config.schedule;
        let orchestrator = FetchOrchestrator::new(
            Arc::new(fetcher),
            rotator,
            CandleCache::new(),
            RequestSpacer::new(schedule.min_request_spacing()),
            schedule.cache_ttl(),
        );
        let poller = PollingScheduler::from_config(schedule);
        let scanner = BackgroundScanner::new(
            config.market.instruments.clone(),
            schedule.scan_interval(),
            schedule.scan_timeframe,
        );

        let instrument = config.market.focused_instrument.clone();
        let timeframe = config.market.focused_timeframe;
        let credential_index = orchestrator.rotator().current_index();

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (fetch_tx, fetch_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (stream_tx, stream_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (status_tx, status_rx) = watch::channel(ServiceStatus::default());

        info!(
            target: "采集服务",
            %instrument,
            %timeframe,
            credentials = orchestrator.rotator().size(),
            credential_index = orchestrator.rotator().current_index(),
            feed_entries = feed.len(),
            "采集服务初始化完成"
        );

        let service = Self {
            config: Arc::new(config),
            orchestrator,
            detector: Arc::new(detector),
            dispatcher: NotificationDispatcher::new(notifier),
            store,
            feed,
            notification_config,
            instrument,
            timeframe,
            series: Vec::new(),
            aggregator: LiveAggregator::for_timeframe(timeframe),
            gate: DetectionGate::new(),
            data_source: None,
            last_error: None,
            running: true,
            poller,
            scanner,
            generation: 0,
            scanning: None,
            scan_clear_at: None,
            credential_index,
            stream: None,
            next_conn_id: 0,
            connection: ConnectionState::Disconnected,
            cmd_rx,
            fetch_tx,
            fetch_rx,
            stream_tx,
            stream_rx,
            status_tx,
        };
        Ok((service, cmd_tx, status_rx))
    }

    async fn run(mut self) {
        if self.config.feed.stream_enabled {
            self.open_stream(None);
        }
        self.request_foreground(false);
        self.publish_status();

        let poll_every = self.poller.interval();
        let scan_every = self.scanner.interval();
        let mut poll_timer = interval_at(Instant::now() + poll_every, poll_every);
        let mut scan_timer = interval_at(Instant::now() + scan_every, scan_every);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        scan_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let scan_clear_at = self.scan_clear_at;
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ServiceCommand::Stop(reply)) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(event) = self.fetch_rx.recv() => self.handle_fetch_event(event),
                Some(event) = self.stream_rx.recv() => self.handle_stream_event(event),
                _ = poll_timer.tick() => self.on_poll_tick(),
                _ = scan_timer.tick() => self.on_scan_tick(),
                _ = sleep_until(scan_clear_at.unwrap_or_else(Instant::now)), if scan_clear_at.is_some() => {
                    self.clear_scan_status();
                }
            }
        }

        info!(target: "采集服务", "事件循环已退出");
    }

    fn handle_command(&mut self, cmd: ServiceCommand) {
        match cmd {
            ServiceCommand::Focus { instrument, timeframe } => self.focus(instrument, timeframe),
            ServiceCommand::Refresh => {
                info!(target: "采集服务", instrument = %self.instrument, timeframe = %self.timeframe, "手动刷新");
                self.request_foreground(true);
            }
            ServiceCommand::ForceCredential { index, reply } => {
                let result = self.force_credential(index);
                let _ = reply.send(result);
            }
            ServiceCommand::SaveNotificationConfig(config) => {
                self.notification_config = config;
                if let Err(e) = save_json(self.store.as_ref(), NOTIFICATION_CONFIG_KEY, &self.notification_config) {
                    self.report_store_error(&e, "保存通知配置失败");
                }
            }
            ServiceCommand::Feed(reply) => {
                let _ = reply.send(self.feed.feed().to_vec());
            }
            ServiceCommand::Series(reply) => {
                let _ = reply.send(self.series.clone());
            }
            ServiceCommand::Stop(reply) => {
                let _ = reply.send(());
            }
        }
    }

    /// 切换焦点。旧的在途请求因代际号变化而失效。
    fn focus(&mut self, instrument: String, timeframe: Timeframe) {
        info!(target: "采集服务", from = %self.instrument, to = %instrument, %timeframe, "切换焦点");
        let instrument_changed = instrument != self.instrument;

        self.instrument = instrument;
        self.timeframe = timeframe;
        self.series.clear();
        self.aggregator = LiveAggregator::for_timeframe(timeframe);
        self.gate = DetectionGate::new();
        self.data_source = None;

        if instrument_changed {
            if let Some(stream) = &self.stream {
                if let Err(e) = stream.resubscribe(&self.instrument) {
                    warn!(
                        target: "实时流",
                        instrument = %self.instrument,
                        error.summary = e.get_error_type_summary(),
                        error.details = %e,
                        "重新订阅失败"
                    );
                }
            }
        }

        self.request_foreground(false);
        self.publish_status();
    }

    fn force_credential(&mut self, index: usize) -> Result<()> {
        self.orchestrator.force_credential(index)?;
        self.sync_credential();
        self.request_foreground(false);
        self.publish_status();
        Ok(())
    }

    /// 在独立任务中拉取焦点序列
    fn request_foreground(&mut self, force: bool) {
        self.generation += 1;
        let generation = self.generation;
        let orchestrator = self.orchestrator.clone();
        let instrument = self.instrument.clone();
        let timeframe = self.timeframe;
        let fetch_tx = self.fetch_tx.clone();

        debug!(target: "采集服务", generation, %instrument, %timeframe, force, "发起焦点拉取");
        tokio::spawn(async move {
            let result = if force {
                orchestrator.refetch(&instrument, timeframe).await
            } else {
                orchestrator.fetch_series(&instrument, timeframe).await
            };
            let _ = fetch_tx.send(FetchEvent::Foreground { generation, result }).await;
        });
    }

    fn handle_fetch_event(&mut self, event: FetchEvent) {
        if !self.running {
            return;
        }
        match event {
            FetchEvent::Foreground { generation, result } => {
                if generation != self.generation {
                    debug!(
                        target: "采集服务",
                        generation,
                        current = self.generation,
                        "焦点已变化，丢弃过期的拉取结果"
                    );
                    self.sync_credential();
                    return;
                }
                match result {
                    Ok(outcome) => self.apply_foreground(outcome),
                    Err(e) => {
                        error!(
                            target: "采集服务",
                            instrument = %self.instrument,
                            timeframe = %self.timeframe,
                            error.summary = e.get_error_type_summary(),
                            error.details = %e,
                            "焦点序列拉取失败"
                        );
                        self.last_error = Some(e.to_string());
                        // 额度轮换之后才失败时，轮换结果同样生效
                        self.sync_credential();
                        self.publish_status();
                    }
                }
            }
            FetchEvent::Scan { instrument, timeframe, result } => {
                self.scan_clear_at = Some(Instant::now() + self.config.schedule.scan_status_clear());
                match result {
                    Ok(outcome) => self.apply_scan(outcome),
                    Err(e) => {
                        warn!(
                            target: "后台扫描",
                            %instrument,
                            %timeframe,
                            error.summary = e.get_error_type_summary(),
                            error.details = %e,
                            "后台扫描拉取失败"
                        );
                        self.sync_credential();
                    }
                }
                self.publish_status();
            }
        }
    }

    fn apply_foreground(&mut self, outcome: FetchOutcome) {
        if outcome.instrument != self.instrument || outcome.timeframe != self.timeframe {
            debug!(target: "采集服务", instrument = %outcome.instrument, "结果与当前焦点不符，丢弃");
            return;
        }

        info!(
            target: "采集服务",
            instrument = %outcome.instrument,
            timeframe = %outcome.timeframe,
            source = ?outcome.source,
            candles = outcome.series.len(),
            attempts = outcome.attempts,
            "应用焦点序列"
        );

        self.series = outcome.series;
        self.gate.reset(self.series.len());
        self.data_source = Some(outcome.source);
        self.last_error = None;

        // 历史回补只入库，不提醒
        let historical = self.detector.scan_history(&self.series, &self.instrument, self.timeframe);
        self.merge_detections(historical);

        self.sync_credential();
        self.publish_status();
    }

    fn on_poll_tick(&mut self) {
        let key = cache_key(&self.instrument, self.timeframe);
        let age = self.orchestrator.cache().age_ms(&key, Utc::now().timestamp_millis());
        if self.poller.should_refetch(age) {
            info!(target: "定时轮询", key = %key, ?age, "缓存已过期，强制重新拉取");
            self.request_foreground(true);
        } else {
            debug!(target: "定时轮询", key = %key, ?age, "缓存仍然新鲜");
        }
    }

    fn on_scan_tick(&mut self) {
        let Some(instrument) = self.scanner.next_target(&self.instrument) else {
            debug!(target: "后台扫描", "没有可扫描的品种");
            return;
        };
        let timeframe = self.scanner.timeframe();

        self.scanning = Some(instrument.clone());
        // 扫描完成后才开始倒计时
        self.scan_clear_at = None;
        self.publish_status();

        let orchestrator = self.orchestrator.clone();
        let fetch_tx = self.fetch_tx.clone();
        info!(target: "后台扫描", %instrument, %timeframe, "开始后台扫描");
        tokio::spawn(async move {
            let result = orchestrator.fetch_series(&instrument, timeframe).await;
            let _ = fetch_tx.send(FetchEvent::Scan { instrument, timeframe, result }).await;
        });
    }

    fn apply_scan(&mut self, outcome: FetchOutcome) {
        let detections = self.detector.scan_history(&outcome.series, &outcome.instrument, outcome.timeframe);
        let found = detections.len();
        let added = self.merge_detections(detections);
        info!(
            target: "后台扫描",
            instrument = %outcome.instrument,
            source = ?outcome.source,
            found,
            added = added.len(),
            "后台扫描完成"
        );

        // 后台扫描与前台共用凭证，轮换后实时流也要换凭证
        self.sync_credential();
    }

    fn clear_scan_status(&mut self) {
        self.scan_clear_at = None;
        if self.scanning.take().is_some() {
            self.publish_status();
        }
    }

    fn handle_stream_event(&mut self, event: StreamEvent) {
        let current = self.stream.as_ref().map(StreamConnection::conn_id);
        if !self.running || current != Some(event.conn_id()) {
            debug!(target: "实时流", conn_id = event.conn_id(), ?current, "丢弃旧连接的事件");
            return;
        }

        match event {
            StreamEvent::Connected { .. } => {
                self.connection = self.connection.transition(ConnectionEvent::Established);
                self.publish_status();
            }
            StreamEvent::Disconnected { reason, .. } => {
                let event = if reason.is_some() { ConnectionEvent::Failed } else { ConnectionEvent::Closed };
                self.connection = self.connection.transition(event);
                self.stream = None;
                if let Some(reason) = reason {
                    self.last_error = Some(reason);
                }
                self.publish_status();
            }
            StreamEvent::Price { symbol, price, .. } => {
                self.on_price(&symbol, price, Utc::now().timestamp());
            }
        }
    }

    /// 实时报价路径：聚合、门控检测、合并、提醒
    fn on_price(&mut self, symbol: &str, price: f64, wall_secs: i64) {
        if symbol != self.instrument {
            return;
        }
        let effect = self.aggregator.apply_tick(&mut self.series, price, wall_secs);
        if effect == TickEffect::Ignored {
            return;
        }

        let key = cache_key(&self.instrument, self.timeframe);
        self.orchestrator.cache().update_series(&key, &self.series);

        if !self.gate.observe(self.series.len()) {
            return;
        }

        let closed = closed_portion(&self.series);
        let Some(detection) = self.detector.detect_patterns(closed, &self.instrument, self.timeframe) else {
            return;
        };
        let added = self.merge_detections(vec![detection]);
        for detection in &added {
            self.dispatcher.consider(detection, &self.notification_config);
        }
        if !added.is_empty() {
            self.publish_status();
        }
    }

    /// 合并检测结果，有新增时立即持久化
    fn merge_detections(&mut self, detections: Vec<Detection>) -> Vec<Detection> {
        if detections.is_empty() {
            return Vec::new();
        }
        let added = self.feed.merge(detections);
        if !added.is_empty() {
            debug!(target: "信号", added = added.len(), total = self.feed.len(), "新增检测结果");
            if let Err(e) = self.feed.persist(self.store.as_ref()) {
                self.report_store_error(&e, "保存检测结果失败");
            }
        }
        added
    }

    /// 生效凭证与上次记录的不同时，持久化索引并用新凭证重建实时流
    fn sync_credential(&mut self) {
        let index = self.orchestrator.rotator().current_index();
        if index == self.credential_index {
            return;
        }
        info!(target: "凭证轮换", from = self.credential_index, to = index, "生效凭证已变化");
        self.credential_index = index;
        if let Err(e) = save_json(self.store.as_ref(), CREDENTIAL_INDEX_KEY, &index) {
            self.report_store_error(&e, "保存凭证索引失败");
        }
        self.reconnect_stream();
    }

    fn report_store_error(&mut self, e: &AppError, message: &str) {
        error!(
            target: "存储",
            instrument = %self.instrument,
            error.summary = e.get_error_type_summary(),
            error.details = %e,
            "{}", message
        );
        self.last_error = Some(e.to_string());
    }

    /// 用当前凭证打开实时流；`previous` 在新连接发起前关闭
    fn open_stream(&mut self, previous: Option<StreamConnection>) {
        let credential = self.orchestrator.rotator().current();
        let url = match stream_url(&self.config.feed.stream_url, &credential) {
            Ok(url) => url,
            Err(e) => {
                if let Some(previous) = previous {
                    previous.close();
                }
                error!(
                    target: "实时流",
                    instrument = %self.instrument,
                    error.summary = e.get_error_type_summary(),
                    error.details = %e,
                    "实时流地址无效"
                );
                self.last_error = Some(e.to_string());
                return;
            }
        };

        self.next_conn_id += 1;
        let stream = StreamConnection::spawn(
            url,
            &self.instrument,
            self.config.schedule.heartbeat_interval(),
            self.next_conn_id,
            previous,
            self.stream_tx.clone(),
        );
        self.connection = self.connection.transition(ConnectionEvent::Open);
        self.stream = Some(stream);
    }

    /// 先关闭旧连接再用当前凭证打开新连接
    ///
    /// 新连接的任务等旧连接关闭（或超过关闭宽限期被中止）后才发起连接；
    /// 旧连接此后上报的事件因连接ID不符被丢弃。
    fn reconnect_stream(&mut self) {
        if !self.config.feed.stream_enabled {
            return;
        }
        let previous = self.stream.take();
        if let Some(old) = &previous {
            info!(target: "实时流", conn_id = old.conn_id(), "凭证已切换，重建实时流连接");
            self.connection = self.connection.transition(ConnectionEvent::Closed);
        }
        self.open_stream(previous);
    }

    fn shutdown(&mut self) {
        info!(target: "采集服务", "停止采集服务");
        self.running = false;
        self.scan_clear_at = None;
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        self.connection = self.connection.transition(ConnectionEvent::Closed);
        self.publish_status();
    }

    fn publish_status(&self) {
        let status = ServiceStatus {
            running: self.running,
            focused_instrument: self.instrument.clone(),
            focused_timeframe: Some(self.timeframe),
            connection: self.connection,
            data_source: self.data_source,
            scanning: self.scanning.clone(),
            last_error: self.last_error.clone(),
            active_credential_index: self.orchestrator.rotator().current_index(),
            candles: self.series.len(),
            feed_len: self.feed.len(),
        };
        self.status_tx.send_replace(status);
    }
}

/// 读取持久化数据失败时记录错误并返回 `None`
fn recover_persisted<T>(key: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!(
                target: "存储",
                key,
                error.summary = e.get_error_type_summary(),
                error.details = %e,
                "持久化数据无法读取，使用默认值"
            );
            None
        }
    }
}

/// 服务句柄：所有操作都以命令形式发给事件循环
pub struct ServiceHandle {
    cmd_tx: mpsc::Sender<ServiceCommand>,
    status_rx: watch::Receiver<ServiceStatus>,
    task: JoinHandle<()>,
}

impl ServiceHandle {
    async fn send(&self, cmd: ServiceCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| AppError::ChannelError(format!("采集服务已停止: {}", e)))
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ServiceCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|e| AppError::ChannelError(format!("采集服务未响应: {}", e)))
    }

    pub async fn focus(&self, instrument: &str, timeframe: Timeframe) -> Result<()> {
        self.send(ServiceCommand::Focus { instrument: instrument.to_string(), timeframe }).await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.send(ServiceCommand::Refresh).await
    }

    pub async fn force_credential(&self, index: usize) -> Result<()> {
        self.request(|reply| ServiceCommand::ForceCredential { index, reply }).await?
    }

    pub async fn save_notification_config(&self, config: NotificationConfig) -> Result<()> {
        self.send(ServiceCommand::SaveNotificationConfig(config)).await
    }

    pub fn status(&self) -> watch::Receiver<ServiceStatus> {
        self.status_rx.clone()
    }

    pub async fn feed(&self) -> Result<Vec<Detection>> {
        self.request(ServiceCommand::Feed).await
    }

    pub async fn series(&self) -> Result<CandleSeries> {
        self.request(ServiceCommand::Series).await
    }

    /// 停止服务：关闭实时流、停止计时器，之后到达的拉取结果不再生效
    pub async fn stop(self) -> Result<()> {
        self.request(ServiceCommand::Stop).await?;
        self.task
            .await
            .map_err(|e| AppError::ChannelError(format!("等待事件循环退出失败: {}", e)))
    }
}
