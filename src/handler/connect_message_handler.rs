use std::time::Instant;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::infra::metrics;
use crate::protocol::Notice;
use crate::security::{BanStatus, ClientState};
use crate::session::ClientRecord;
use crate::transport::Connection;

impl<C: Connection> Dispatcher<C> {
    /// 处理新连接：封禁检查 -> 加入通知 -> 注册
    pub(crate) async fn on_connected(&mut self, conn: C, now: Instant) {
        let ip = conn.peer_ip();

        match self.bans.check(ip, now) {
            BanStatus::Active { remaining } => {
                info!(
                    "🚫 拒绝封禁中的 IP: {} (剩余 {}s)",
                    self.redact(&ip),
                    remaining.as_secs()
                );
                metrics::record_connection_rejected("banned");

                if let Err(e) = conn.write(&Notice::CurrentlyBanned.to_bytes()).await {
                    debug!("封禁通知发送失败: {}", self.redact(&e));
                }
                conn.close().await;
                return;
            }
            BanStatus::Lifted { banned_for } => {
                // 被封禁时旧记录已移除，新连接按全新客户端注册，积分从 0 开始
                info!(
                    "🔓 封禁到期解除: {} (已封禁 {}s)",
                    self.redact(&ip),
                    banned_for.as_secs()
                );
                metrics::record_ban_count(self.bans.len());
            }
            BanStatus::Clear => {}
        }

        let id = conn.client_id();
        let notice = Notice::joined(id.as_str(), self.config.debug_mode);
        if let Err(e) = conn.write(&notice.to_bytes()).await {
            warn!(
                "⚠️ 加入通知发送失败，放弃注册: {} ({})",
                self.redact(&id),
                self.redact(&e)
            );
            metrics::record_write_failure();
            conn.close().await;
            return;
        }

        let record = ClientRecord::new(conn, now);
        let connection_id = record.connection_id();
        if let Some(displaced) = self.clients.register(record) {
            if displaced.connection_id() != connection_id {
                warn!(
                    "⚠️ 同一身份的旧连接被替换: {} ({} -> {})",
                    self.redact(&id),
                    displaced.connection_id(),
                    connection_id
                );
                self.release(displaced, ClientState::RemovedByDisconnect).await;
            }
        }

        info!(
            "✅ 客户端加入: {} ({}), 在线: {}",
            self.redact(&id),
            connection_id,
            self.clients.len()
        );
        metrics::record_connection_count(self.clients.len());
    }
}
