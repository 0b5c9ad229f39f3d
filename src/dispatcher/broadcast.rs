use tracing::{debug, warn};

use super::Dispatcher;
use crate::infra::metrics;
use crate::security::ClientState;
use crate::transport::{ClientId, Connection};

/// 一次广播的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// 目标客户端数（不含发送者）
    pub recipients: usize,
    /// 写入成功数
    pub delivered: usize,
    /// 写入失败并被移除的客户端数
    pub failed: usize,
}

impl<C: Connection> Dispatcher<C> {
    /// 向除发送者以外的所有已注册客户端转发原始数据
    ///
    /// 写入失败视为隐式断开：在这里直接关闭并移除该对端，不再投递 `Disconnected` 事件。
    pub async fn broadcast(&mut self, sender: &ClientId, payload: &[u8]) -> BroadcastReport {
        let peers = self.clients.peers_except(sender);
        let mut report = BroadcastReport {
            recipients: peers.len(),
            ..Default::default()
        };

        for (peer_id, conn) in peers {
            match conn.write(payload).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    metrics::record_write_failure();

                    let error_text = e.to_string();
                    if e.is_peer_gone() {
                        debug!(
                            "📤 对端已失效，移除: {} ({})",
                            self.redact(&peer_id),
                            self.redact(error_text.as_str())
                        );
                    } else {
                        warn!(
                            "⚠️ 广播写入失败，移除: {} ({})",
                            self.redact(&peer_id),
                            self.redact(error_text.as_str())
                        );
                    }

                    if let Some(record) = self.clients.remove_if_connection(&peer_id, conn.id()) {
                        self.release(record, ClientState::RemovedByWriteFailure).await;
                    }
                }
            }
        }

        if report.failed > 0 {
            metrics::record_connection_count(self.clients.len());
        }
        metrics::record_broadcast(report.delivered);
        report
    }
}
