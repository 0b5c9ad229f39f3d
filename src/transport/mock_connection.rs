use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Connection, ConnectionId};
use crate::error::{Result, ServerError};

/// 内存中的连接（用于测试）
///
/// 记录所有写入的数据与关闭次数，可以模拟写失败。
#[derive(Clone)]
pub struct MockConnection {
    inner: Arc<MockInner>,
}

struct MockInner {
    id: ConnectionId,
    peer_addr: SocketAddr,
    written: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
    releases: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MockConnection {
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            inner: Arc::new(MockInner {
                id: ConnectionId::next(),
                peer_addr,
                written: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                releases: AtomicUsize::new(0),
                fail_writes: AtomicBool::new(false),
            }),
        }
    }

    /// 让后续写入全部失败（模拟对端断开）
    pub fn fail_writes(&self) {
        self.inner.fail_writes.store(true, Ordering::Release);
    }

    /// 已写入的所有数据块
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.inner.written.lock().clone()
    }

    /// 已写入的数据（按 UTF-8 有损解码）
    pub fn written_text(&self) -> Vec<String> {
        self.inner
            .written
            .lock()
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect()
    }

    /// 清空写入记录
    pub fn clear(&self) {
        self.inner.written.lock().clear();
    }

    /// 底层连接被真正释放的次数（应当至多为 1）
    pub fn release_count(&self) -> usize {
        self.inner.releases.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.inner.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(ServerError::ConnectionClosed);
        }
        if self.inner.fail_writes.load(Ordering::Acquire) {
            return Err(ServerError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock peer gone",
            )));
        }
        self.inner.written.lock().push(data.to_vec());
        Ok(())
    }

    async fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.releases.fetch_add(1, Ordering::AcqRel);
        true
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
