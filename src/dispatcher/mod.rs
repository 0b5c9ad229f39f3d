//! 事件分发 Actor
//!
//! 所有会话状态（客户端注册表、封禁表）只存在于 Dispatcher 任务内部。
//! 读任务通过有界队列投递 `DispatchEvent`，Dispatcher 逐个处理、处理完（包括广播）再取下一个，
//! 因此两张表都不需要锁。

pub mod broadcast;

pub use broadcast::BroadcastReport;

use bytes::Bytes;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::infra::metrics;
use crate::logging::Sensitive;
use crate::security::{BanRegistry, ClientState, RateLimitConfig, RateLimiter};
use crate::session::{ClientRecord, ClientRegistry};
use crate::transport::{ClientId, Connection};

/// 读任务投递给 Dispatcher 的事件
pub enum DispatchEvent<C> {
    /// 新连接建立
    Connected(C),
    /// 连接结束（读失败或被关闭）
    Disconnected(C),
    /// 收到一块原始数据（不保证是合法 UTF-8）
    NewMessage(C, Bytes),
}

impl<C: Connection> DispatchEvent<C> {
    pub fn connection(&self) -> &C {
        match self {
            DispatchEvent::Connected(conn)
            | DispatchEvent::Disconnected(conn)
            | DispatchEvent::NewMessage(conn, _) => conn,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DispatchEvent::Connected(_) => "connected",
            DispatchEvent::Disconnected(_) => "disconnected",
            DispatchEvent::NewMessage(..) => "new_message",
        }
    }
}

pub type EventSender<C> = mpsc::Sender<DispatchEvent<C>>;
pub type EventReceiver<C> = mpsc::Receiver<DispatchEvent<C>>;

/// 投递事件；队列已满时等待，Dispatcher 已退出时返回 `QueueClosed`
pub async fn submit<C>(events: &EventSender<C>, event: DispatchEvent<C>) -> Result<()> {
    events
        .send(event)
        .await
        .map_err(|_| ServerError::QueueClosed)
}

/// Dispatcher 配置
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// 限流与积分阈值
    pub rate_limit: RateLimitConfig,
    /// 封禁时长
    pub ban_timeout: Duration,
    /// 维护周期（清理过期封禁、输出统计）
    pub sweep_interval: Duration,
    /// 调试模式：为 true 时日志与加入通知显示真实地址
    pub debug_mode: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for DispatcherConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            rate_limit: config.security.clone().into(),
            ban_timeout: config.security.ban_timeout(),
            sweep_interval: config.security.ban_sweep_interval(),
            debug_mode: config.debug_mode,
        }
    }
}

/// 单写者分发 Actor
pub struct Dispatcher<C: Connection> {
    pub(crate) clients: ClientRegistry<C>,
    pub(crate) bans: BanRegistry,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) config: DispatcherConfig,
}

impl<C: Connection> Dispatcher<C> {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            clients: ClientRegistry::new(),
            bans: BanRegistry::new(config.ban_timeout),
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// 处理单个事件
    ///
    /// `now` 由调用方提供：运行循环传入 `Instant::now()`，测试可以传入构造的时间点。
    pub async fn handle(&mut self, event: DispatchEvent<C>, now: Instant) {
        debug!(
            "📨 Dispatcher: {} from {}",
            event.kind(),
            event.connection().id()
        );

        match event {
            DispatchEvent::Connected(conn) => self.on_connected(conn, now).await,
            DispatchEvent::Disconnected(conn) => self.on_disconnected(conn, now).await,
            DispatchEvent::NewMessage(conn, payload) => self.on_message(conn, payload, now).await,
        }
    }

    /// 事件循环：直到收到关闭信号或所有发送端都已释放
    ///
    /// 维护 tick 优先于事件，持续有事件到达时封禁清理和指标刷新照常进行。
    pub async fn run(
        mut self,
        mut events: EventReceiver<C>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RunStats {
        let mut stats = RunStats::default();
        let mut maintenance = tokio::time::interval(self.config.sweep_interval);
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 第一次 tick 立即完成
        maintenance.tick().await;

        info!(
            "🚀 Dispatcher 启动: rate_limit={:?}, strike_threshold={}, ban_timeout={:?}",
            self.config.rate_limit.min_interval,
            self.config.rate_limit.strike_threshold,
            self.config.ban_timeout
        );

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("🛑 Dispatcher 收到关闭信号");
                        break;
                    }
                }
                _ = maintenance.tick() => {
                    stats.maintenance_runs += 1;
                    self.maintain(Instant::now());
                }
                event = events.recv() => match event {
                    Some(event) => {
                        stats.events_handled += 1;
                        self.handle(event, Instant::now()).await;
                    }
                    None => {
                        info!("🛑 事件队列已关闭");
                        break;
                    }
                },
            }
        }

        self.close_all().await;
        info!(
            "✅ Dispatcher 已退出: 处理事件 {} 个, 维护 {} 次",
            stats.events_handled, stats.maintenance_runs
        );
        stats
    }

    /// 在独立任务中运行，返回句柄
    pub fn spawn(self, queue_capacity: usize) -> DispatcherHandle<C> {
        let (events, receiver) = mpsc::channel(queue_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(receiver, shutdown_rx));

        DispatcherHandle {
            events,
            shutdown,
            task,
        }
    }

    /// 周期维护：清理过期封禁、刷新指标
    pub fn maintain(&mut self, now: Instant) {
        let swept = self.bans.sweep_expired(now);
        if swept > 0 {
            info!("🧹 清理过期封禁 {} 条", swept);
        }

        debug!(
            "📊 在线客户端: {}, 生效封禁: {}",
            self.clients.len(),
            self.bans.len()
        );
        metrics::record_connection_count(self.clients.len());
        metrics::record_ban_count(self.bans.len());
    }

    /// 关闭所有已注册连接（退出前调用）
    pub async fn close_all(&mut self) {
        let records = self.clients.drain();
        if records.is_empty() {
            return;
        }

        info!("🔌 关闭全部 {} 个客户端连接", records.len());
        for record in records {
            self.release(record, ClientState::RemovedByDisconnect).await;
        }
        metrics::record_connection_count(0);
    }

    /// 释放被移除的客户端：关闭连接（幂等，只会真正释放一次）
    pub(crate) async fn release(&self, record: ClientRecord<C>, state: ClientState) -> bool {
        debug_assert!(ClientState::Active.can_transition_to(state));

        let released = record.conn.close().await;
        if released {
            metrics::record_client_removed(state);
            debug!(
                "🔒 连接已释放: {} ({}), state={}",
                self.redact(&record.id),
                record.connection_id(),
                state
            );
        }
        released
    }

    /// 按调试模式决定是否脱敏
    pub(crate) fn redact<'a, T: std::fmt::Display + ?Sized>(&self, value: &'a T) -> Sensitive<'a, T> {
        Sensitive::new(value, self.config.debug_mode)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_registered(&self, id: &ClientId) -> bool {
        self.clients.contains(id)
    }

    pub fn session_duration(&self, id: &ClientId, now: Instant) -> Option<Duration> {
        self.clients.get(id).map(|record| record.session_duration(now))
    }

    pub fn strike_count(&self, id: &ClientId) -> Option<u32> {
        self.clients.get(id).map(|record| record.strikes.strike_count)
    }

    pub fn is_banned(&self, ip: IpAddr, now: Instant) -> bool {
        self.bans.is_banned(ip, now)
    }

    pub fn ban_count(&self) -> usize {
        self.bans.len()
    }
}

/// 事件循环退出时的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// 处理的事件数
    pub events_handled: u64,
    /// 执行的周期维护次数（不含启动时立即完成的第一次 tick）
    pub maintenance_runs: u64,
}

/// 运行中的 Dispatcher 句柄
pub struct DispatcherHandle<C> {
    events: EventSender<C>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<RunStats>,
}

impl<C: Connection> DispatcherHandle<C> {
    /// 事件发送端（每个读任务持有一份）
    pub fn sender(&self) -> EventSender<C> {
        self.events.clone()
    }

    /// 通知 Dispatcher 关闭所有连接并退出，等待其结束
    ///
    /// 任务异常结束时返回 None。
    pub async fn shutdown(self) -> Option<RunStats> {
        let DispatcherHandle {
            events,
            shutdown,
            task,
        } = self;
        drop(events);

        if shutdown.send(true).is_err() {
            debug!("Dispatcher 已提前退出");
        }
        match task.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("⚠️ Dispatcher 任务异常结束: {}", e);
                None
            }
        }
    }
}
