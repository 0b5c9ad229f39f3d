//! 客户端生命周期状态机
//!
//! Unregistered -> Active -> { Active, RemovedByDisconnect, RemovedByBan, RemovedByWriteFailure }
//!
//! 被封禁移除的客户端还会在封禁表中留下记录，阻止同一 IP 在封禁期内再次进入 Active。

use std::fmt;

/// 客户端状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// 尚未注册（刚建立连接，或连接被拒绝）
    Unregistered,

    /// 已注册，可以收发消息
    /// - 违规时积分累加
    /// - 合法且未超频的消息使积分清零
    Active,

    /// 对端断开或读失败
    RemovedByDisconnect,

    /// 积分超过阈值被封禁
    RemovedByBan,

    /// 广播写入失败，视为隐式断开
    RemovedByWriteFailure,
}

impl ClientState {
    /// 是否为终止状态
    pub fn is_removed(&self) -> bool {
        matches!(
            self,
            ClientState::RemovedByDisconnect
                | ClientState::RemovedByBan
                | ClientState::RemovedByWriteFailure
        )
    }

    /// 状态转换是否合法
    pub fn can_transition_to(&self, next: ClientState) -> bool {
        match (self, next) {
            (ClientState::Unregistered, ClientState::Active) => true,
            (ClientState::Active, ClientState::Active) => true,
            (ClientState::Active, next) => next.is_removed(),
            _ => false,
        }
    }

    /// 用作指标标签
    pub fn as_label(&self) -> &'static str {
        match self {
            ClientState::Unregistered => "unregistered",
            ClientState::Active => "active",
            ClientState::RemovedByDisconnect => "disconnect",
            ClientState::RemovedByBan => "ban",
            ClientState::RemovedByWriteFailure => "write_failure",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// 违规类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationType {
    /// 发送过快（间隔不超过限流阈值）
    RateLimit,
    /// 非法编码（不是合法 UTF-8）
    MalformedPayload,
}

impl ViolationType {
    pub fn as_label(&self) -> &'static str {
        match self {
            ViolationType::RateLimit => "rate_limit",
            ViolationType::MalformedPayload => "malformed_payload",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        assert!(ClientState::Unregistered.can_transition_to(ClientState::Active));
        assert!(ClientState::Active.can_transition_to(ClientState::Active));
        assert!(ClientState::Active.can_transition_to(ClientState::RemovedByBan));
        assert!(ClientState::Active.can_transition_to(ClientState::RemovedByWriteFailure));

        // 不能跳过注册直接移除，移除后也不能复活
        assert!(!ClientState::Unregistered.can_transition_to(ClientState::RemovedByBan));
        assert!(!ClientState::RemovedByBan.can_transition_to(ClientState::Active));
        assert!(!ClientState::RemovedByDisconnect.can_transition_to(ClientState::Active));
    }
}
