//! Prometheus 指标：在线客户端、封禁数、广播量、违规积分等
//!
//! 通过 `init()` 安装全局 Recorder 并启动 HTTP 抓取端点。
//! 未初始化时各 `record_*` 调用为空操作。

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::OnceLock;

use crate::error::{Result, ServerError};
use crate::security::{ClientState, ViolationType};

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// 指标名称
const GAUGE_CLIENTS: &str = "chatcast_clients_current";
const GAUGE_BANS: &str = "chatcast_bans_current";
const COUNTER_MESSAGES_BROADCAST: &str = "chatcast_messages_broadcast_total";
const COUNTER_DELIVERIES: &str = "chatcast_deliveries_total";
const COUNTER_STRIKES: &str = "chatcast_strikes_total";
const COUNTER_BANS: &str = "chatcast_bans_total";
const COUNTER_CONNECTIONS_REJECTED: &str = "chatcast_connections_rejected_total";
const COUNTER_WRITE_FAILURES: &str = "chatcast_write_failures_total";
const COUNTER_CLIENTS_REMOVED: &str = "chatcast_clients_removed_total";

/// 安装 Prometheus Recorder，并在 `addr` 上暴露 `/metrics`。
/// 仅需在进程内调用一次；重复调用会返回 Err。
pub fn init(addr: SocketAddr) -> Result<()> {
    if let Some(existing) = INSTALLED.get() {
        return Err(ServerError::Metrics(format!(
            "metrics already initialized on {}",
            existing
        )));
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;

    INSTALLED
        .set(addr)
        .map_err(|_| ServerError::Metrics("metrics already initialized".to_string()))?;
    Ok(())
}

/// 更新当前在线客户端数（Gauge）。在注册/移除后调用。
pub fn record_connection_count(count: usize) {
    metrics::gauge!(GAUGE_CLIENTS).set(count as f64);
}

/// 更新当前封禁 IP 数（Gauge）。
pub fn record_ban_count(count: usize) {
    metrics::gauge!(GAUGE_BANS).set(count as f64);
}

/// 记录一次广播：消息数 +1，成功投递数 +delivered。
pub fn record_broadcast(delivered: usize) {
    metrics::counter!(COUNTER_MESSAGES_BROADCAST).increment(1);
    metrics::counter!(COUNTER_DELIVERIES).increment(delivered as u64);
}

/// 记录一次违规（按类型打标签）。
pub fn record_strike(violation: ViolationType) {
    metrics::counter!(COUNTER_STRIKES, "kind" => violation.as_label()).increment(1);
}

/// 记录一次封禁。
pub fn record_ban() {
    metrics::counter!(COUNTER_BANS).increment(1);
}

/// 记录一次连接被拒绝（封禁中或超过连接上限）。
pub fn record_connection_rejected(reason: &'static str) {
    metrics::counter!(COUNTER_CONNECTIONS_REJECTED, "reason" => reason).increment(1);
}

/// 记录一次向对端写入失败。
pub fn record_write_failure() {
    metrics::counter!(COUNTER_WRITE_FAILURES).increment(1);
}

/// 记录一次客户端移除（按最终状态打标签）。
pub fn record_client_removed(state: ClientState) {
    metrics::counter!(COUNTER_CLIENTS_REMOVED, "state" => state.as_label()).increment(1);
}
