use std::time::Instant;
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;
use crate::infra::metrics;
use crate::security::ClientState;
use crate::transport::Connection;

impl<C: Connection> Dispatcher<C> {
    /// 处理连接结束：移除记录并关闭连接，不向其他客户端广播
    ///
    /// 记录已被移除（封禁、写失败）或属于同地址的新连接时只关闭本连接。
    pub(crate) async fn on_disconnected(&mut self, conn: C, now: Instant) {
        let id = conn.client_id();

        match self.clients.remove_if_connection(&id, conn.id()) {
            Some(record) => {
                let online_for = record.session_duration(now);
                self.release(record, ClientState::RemovedByDisconnect).await;
                info!(
                    "🔌 客户端断开: {} ({}), 在线时长: {:?}, 在线: {}",
                    self.redact(&id),
                    conn.id(),
                    online_for,
                    self.clients.len()
                );
                metrics::record_connection_count(self.clients.len());
            }
            None => {
                let released = conn.close().await;
                debug!(
                    "🔌 未注册连接结束: {} ({}), released={}",
                    self.redact(&id),
                    conn.id(),
                    released
                );
            }
        }
    }
}
