use bytes::Bytes;
use std::time::Instant;
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::infra::metrics;
use crate::protocol::Notice;
use crate::security::{ClientState, MessageVerdict};
use crate::transport::Connection;

impl<C: Connection> Dispatcher<C> {
    /// 处理一块入站数据：限流判定 -> 广播或计违规 -> 超过阈值则封禁
    pub(crate) async fn on_message(&mut self, conn: C, payload: Bytes, now: Instant) {
        let id = conn.client_id();

        let Some(record) = self.clients.get_for_connection_mut(&id, conn.id()) else {
            debug!(
                "🚫 未注册的连接发来消息: {} ({})",
                self.redact(&id),
                conn.id()
            );
            if let Err(e) = conn.write(&Notice::Banned.to_bytes()).await {
                debug!("封禁通知发送失败: {}", self.redact(&e));
            }
            conn.close().await;
            return;
        };

        let outcome = self.rate_limiter.evaluate(&mut record.strikes, &payload, now);

        match outcome.verdict {
            MessageVerdict::Accepted => {
                let report = self.broadcast(&id, &payload).await;
                debug!(
                    "📢 广播 {} 字节: {} -> {}/{} 送达",
                    payload.len(),
                    self.redact(&id),
                    report.delivered,
                    report.recipients
                );
            }
            MessageVerdict::Rejected(violation) => {
                metrics::record_strike(violation);
                debug!(
                    "⚠️ 违规 {}: {} strike={}/{}",
                    violation.as_label(),
                    self.redact(&id),
                    outcome.strike_count,
                    self.rate_limiter.config().strike_threshold
                );
            }
        }

        if outcome.should_ban {
            self.execute_ban(&conn, outcome.strike_count, now).await;
        }
    }

    /// 封禁：记录 IP -> 通知 -> 关闭并移除
    ///
    /// 同一 IP 的其他在线连接一并移除，封禁期间该 IP 不保留任何注册记录。
    async fn execute_ban(&mut self, conn: &C, strike_count: u32, now: Instant) {
        let ip = conn.peer_ip();
        self.bans.ban(ip, now);

        let ban_timeout = self.bans.ban_timeout();
        let until = chrono::Local::now()
            + chrono::Duration::from_std(ban_timeout).unwrap_or_else(|_| chrono::Duration::zero());
        warn!(
            "🚫 封禁 IP: {} (strike={} > {}), 解封时间: {}",
            self.redact(&ip),
            strike_count,
            self.rate_limiter.config().strike_threshold,
            until.format("%Y-%m-%d %H:%M:%S")
        );
        metrics::record_ban();
        metrics::record_ban_count(self.bans.len());

        for record in self.clients.remove_by_ip(ip) {
            if let Err(e) = record.conn.write(&Notice::Banned.to_bytes()).await {
                debug!("封禁通知发送失败: {}", self.redact(&e));
            }
            self.release(record, ClientState::RemovedByBan).await;
        }
        // 记录可能已不存在（例如被同地址的新连接替换），确保本连接也被关闭
        conn.close().await;

        metrics::record_connection_count(self.clients.len());
    }
}
