//! 传输层
//!
//! 连接句柄由 Dispatcher 独占：只有 Dispatcher 会写入或关闭连接，
//! 读任务只负责读取自己的 socket 并把事件投递到队列。

pub mod mock_connection;
pub mod tcp_connection;

pub use mock_connection::MockConnection;
pub use tcp_connection::{ConnectionReader, TcpConnection};

use async_trait::async_trait;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Result;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// 进程内唯一的连接编号
///
/// 用于区分先后复用同一远端地址的两条连接，防止迟到的断开事件误删新连接。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// 分配下一个连接编号
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// 客户端身份：远端完整地址 `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for ClientId {
    fn from(addr: SocketAddr) -> Self {
        ClientId(addr.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 连接句柄
///
/// 句柄可以廉价克隆（事件中携带的是同一连接的引用），但 `close` 保证底层连接只被释放一次。
#[async_trait]
pub trait Connection: Clone + Send + Sync + 'static {
    /// 连接编号
    fn id(&self) -> ConnectionId;

    /// 远端地址
    fn peer_addr(&self) -> SocketAddr;

    /// 客户端身份（注册表的键）
    fn client_id(&self) -> ClientId {
        ClientId::from(self.peer_addr())
    }

    /// 远端 IP（封禁表的键）
    fn peer_ip(&self) -> IpAddr {
        self.peer_addr().ip()
    }

    /// 写入全部数据
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// 关闭连接；返回 true 表示本次调用真正释放了连接，重复调用返回 false
    async fn close(&self) -> bool;

    /// 是否已关闭
    fn is_closed(&self) -> bool;
}
