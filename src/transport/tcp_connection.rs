use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use super::{Connection, ConnectionId};
use crate::error::{Result, ServerError};

/// TCP 连接句柄（写半部）
#[derive(Clone)]
pub struct TcpConnection {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    peer_addr: SocketAddr,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: AtomicBool,
    /// 关闭时唤醒读任务
    close_signal: Notify,
    write_timeout: Duration,
}

/// 读任务持有的读半部
pub struct ConnectionReader {
    reader: OwnedReadHalf,
    buffer: Vec<u8>,
    conn: Arc<Inner>,
}

impl TcpConnection {
    /// 拆分 TcpStream：写半部交给 Dispatcher，读半部留给读任务
    pub fn split(
        stream: TcpStream,
        peer_addr: SocketAddr,
        read_buffer_size: usize,
        write_timeout: Duration,
    ) -> (TcpConnection, ConnectionReader) {
        let (reader, writer) = stream.into_split();

        let inner = Arc::new(Inner {
            id: ConnectionId::next(),
            peer_addr,
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
            write_timeout,
        });

        let reader = ConnectionReader {
            reader,
            buffer: vec![0u8; read_buffer_size.max(1)],
            conn: inner.clone(),
        };

        (TcpConnection { inner }, reader)
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn id(&self) -> ConnectionId {
        self.inner.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(ServerError::ConnectionClosed)?;

        let timeout = self.inner.write_timeout;
        match tokio::time::timeout(timeout, writer.write_all(data)).await {
            Ok(result) => result.map_err(ServerError::from),
            Err(_) => Err(ServerError::WriteTimeout(timeout.as_millis() as u64)),
        }
    }

    async fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let timeout = self.inner.write_timeout;
            if let Err(e) = tokio::time::timeout(timeout, writer.shutdown()).await {
                debug!("shutdown {} timed out: {}", self.inner.id, e);
            }
        }

        // 读任务可能正阻塞在 read 上，notify_one 会在无人等待时保留一个许可
        self.inner.close_signal.notify_one();
        true
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl ConnectionReader {
    /// 读取下一块数据
    ///
    /// 返回 `Ok(None)` 表示对端关闭或连接已被 Dispatcher 关闭。
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.conn.closed.load(Ordering::Acquire) {
            return Ok(None);
        }

        tokio::select! {
            _ = self.conn.close_signal.notified() => Ok(None),
            read = self.reader.read(&mut self.buffer) => {
                let n = read?;
                if n == 0 {
                    Ok(None)
                } else {
                    Ok(Some(Bytes::copy_from_slice(&self.buffer[..n])))
                }
            }
        }
    }
}
