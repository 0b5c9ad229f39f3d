use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::{self, DispatchEvent, Dispatcher, DispatcherConfig, EventSender};
use crate::error::{Result, ServerError};
use crate::infra::metrics;
use crate::logging::Sensitive;
use crate::transport::{Connection, ConnectionReader, TcpConnection};

/// accept 失败后的退避时间（例如文件描述符耗尽）
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// 聊天广播服务器
///
/// 负责监听、为每个连接启动读任务，并把事件投递给 Dispatcher。
/// 服务器本身不持有任何会话状态。
pub struct ChatServer {
    config: ServerConfig,
    listener: TcpListener,
    connection_limit: Arc<Semaphore>,
}

impl ChatServer {
    /// 绑定监听地址
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = config
            .bind_address()
            .map_err(|e| ServerError::Configuration(e.to_string()))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Network(format!("无法监听 {}: {}", addr, e)))?;

        let connection_limit = Arc::new(Semaphore::new(config.max_connections as usize));

        Ok(Self {
            config,
            listener,
            connection_limit,
        })
    }

    /// 实际监听地址（端口为 0 时由系统分配）
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// 运行直到收到 Ctrl-C
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("🛑 收到 Ctrl-C"),
                Err(e) => {
                    error!("❌ 无法监听 Ctrl-C 信号: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }

    /// 运行直到 `shutdown` 完成：停止接受新连接，关闭所有客户端后返回
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if self.config.metrics.enabled {
            let metrics_addr = self
                .config
                .metrics_address()
                .map_err(|e| ServerError::Configuration(e.to_string()))?;
            metrics::init(metrics_addr)?;
            info!("📈 Prometheus 指标端点: http://{}/metrics", metrics_addr);
        }

        self.show_config_info();

        let dispatcher = Dispatcher::<TcpConnection>::new(DispatcherConfig::from(&self.config))
            .spawn(self.config.event_queue_capacity);
        let events = dispatcher.sender();

        info!("🔗 开始接受连接: {}", self.local_addr()?);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("🛑 停止接受新连接");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => self.accept_connection(stream, peer_addr, &events),
                    Err(e) => {
                        error!("❌ 接受连接失败: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        drop(events);
        dispatcher.shutdown().await;
        info!("✅ 服务器已停止");
        Ok(())
    }

    fn accept_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        events: &EventSender<TcpConnection>,
    ) {
        let debug_mode = self.config.debug_mode;

        let permit = match self.connection_limit.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    "⚠️ 连接数已达上限 {}，拒绝: {}",
                    self.config.max_connections,
                    Sensitive::new(&peer_addr, debug_mode)
                );
                metrics::record_connection_rejected("capacity");
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay 失败: {}", e);
        }

        let (conn, reader) = TcpConnection::split(
            stream,
            peer_addr,
            self.config.read_buffer_size,
            self.config.write_timeout(),
        );
        debug!(
            "🔗 新连接: {} ({})",
            Sensitive::new(&peer_addr, debug_mode),
            conn.id()
        );

        tokio::spawn(read_loop(conn, reader, events.clone(), permit, debug_mode));
    }

    fn show_config_info(&self) {
        let security = &self.config.security;
        info!("📊 服务器配置信息:");
        info!("  - 最大连接数: {}", self.config.max_connections);
        info!("  - 读取缓冲区: {} 字节", self.config.read_buffer_size);
        info!("  - 事件队列容量: {}", self.config.event_queue_capacity);
        info!("  - 写超时: {}ms", self.config.write_timeout_ms);
        info!("  - 最小发送间隔: {}ms", security.rate_limit_ms);
        info!("  - 违规阈值: {}", security.strike_threshold);
        info!("  - 封禁时长: {}s", security.ban_timeout_secs);
        info!("  - 调试模式: {}", self.config.debug_mode);
    }
}

/// 单个连接的读任务
///
/// 只读取自己的 socket 并投递事件：一次 `Connected`，若干 `NewMessage`，最后一次 `Disconnected`。
/// 连接被 Dispatcher 关闭时 `read_chunk` 返回 `None`，循环随之结束。
async fn read_loop(
    conn: TcpConnection,
    mut reader: ConnectionReader,
    events: EventSender<TcpConnection>,
    _permit: OwnedSemaphorePermit,
    debug_mode: bool,
) {
    if let Err(e) = forward_reads(&conn, &mut reader, &events, debug_mode).await {
        // Dispatcher 已退出，连接不会再被它释放
        let released = conn.close().await;
        debug!("读任务结束 ({}): {}, released={}", conn.id(), e, released);
    }
}

async fn forward_reads(
    conn: &TcpConnection,
    reader: &mut ConnectionReader,
    events: &EventSender<TcpConnection>,
    debug_mode: bool,
) -> Result<()> {
    dispatcher::submit(events, DispatchEvent::Connected(conn.clone())).await?;

    loop {
        match reader.read_chunk().await {
            Ok(Some(chunk)) => {
                dispatcher::submit(events, DispatchEvent::NewMessage(conn.clone(), chunk)).await?;
            }
            Ok(None) => break,
            Err(e) => {
                debug!("读取失败: {}", Sensitive::new(&e, debug_mode));
                break;
            }
        }
    }

    dispatcher::submit(events, DispatchEvent::Disconnected(conn.clone())).await
}
