//! IP 封禁表
//!
//! 封禁以 IP 为粒度（同一 IP 的所有连接），有固定时长。
//! 过期的封禁在下一次来自该 IP 的连接时解除，或由定期清理统一移除。

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// 连接时的封禁检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanStatus {
    /// 未被封禁
    Clear,
    /// 封禁已过期，本次检查已将其解除
    Lifted { banned_for: Duration },
    /// 仍在封禁期内
    Active { remaining: Duration },
}

impl BanStatus {
    pub fn is_banned(&self) -> bool {
        matches!(self, BanStatus::Active { .. })
    }
}

/// IP 封禁表
#[derive(Debug)]
pub struct BanRegistry {
    /// IP -> 封禁时间
    bans: HashMap<IpAddr, Instant>,
    /// 封禁时长
    ban_timeout: Duration,
}

impl BanRegistry {
    pub fn new(ban_timeout: Duration) -> Self {
        Self {
            bans: HashMap::new(),
            ban_timeout,
        }
    }

    pub fn ban_timeout(&self) -> Duration {
        self.ban_timeout
    }

    /// 封禁 IP（已存在则刷新封禁时间）；返回是否为新增
    pub fn ban(&mut self, ip: IpAddr, now: Instant) -> bool {
        self.bans.insert(ip, now).is_none()
    }

    /// 检查 IP，过期的封禁在此解除
    ///
    /// 从封禁时刻起满 `ban_timeout`（含边界）即视为过期。
    pub fn check(&mut self, ip: IpAddr, now: Instant) -> BanStatus {
        let Some(&banned_at) = self.bans.get(&ip) else {
            return BanStatus::Clear;
        };

        let banned_for = now.saturating_duration_since(banned_at);
        if banned_for >= self.ban_timeout {
            self.bans.remove(&ip);
            BanStatus::Lifted { banned_for }
        } else {
            BanStatus::Active {
                remaining: self.ban_timeout - banned_for,
            }
        }
    }

    /// 只读检查，不解除过期封禁
    pub fn is_banned(&self, ip: IpAddr, now: Instant) -> bool {
        self.bans
            .get(&ip)
            .map(|banned_at| now.saturating_duration_since(*banned_at) < self.ban_timeout)
            .unwrap_or(false)
    }

    /// 清理所有已过期的封禁，返回清理数量
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let before = self.bans.len();
        let timeout = self.ban_timeout;
        self.bans
            .retain(|_, banned_at| now.saturating_duration_since(*banned_at) < timeout);
        before - self.bans.len()
    }

    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}
