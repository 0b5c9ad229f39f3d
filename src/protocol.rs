//! 对外发送的纯文本通知
//!
//! 协议没有分帧：广播内容原样转发，服务器自身只发送以下几种文本通知。

use std::fmt;

use crate::logging::Sensitive;

/// 服务器下发给客户端的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// 加入通知（发给新连接自身）
    Joined { identity: String },
    /// 连接时 IP 仍在封禁期内
    CurrentlyBanned,
    /// 因违规被封禁，或未注册的连接发来消息
    Banned,
}

impl Notice {
    /// 构造加入通知，非调试模式下身份标识会被脱敏
    pub fn joined(identity: &str, reveal: bool) -> Self {
        Notice::Joined {
            identity: Sensitive::new(identity, reveal).to_string(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Joined { identity } => writeln!(f, "{} has joined the chat", identity),
            Notice::CurrentlyBanned => writeln!(f, "You are currently banned!"),
            Notice::Banned => writeln!(f, "You are banned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_text() {
        assert_eq!(
            Notice::joined("127.0.0.1:5000", true).to_string(),
            "127.0.0.1:5000 has joined the chat\n"
        );
        assert_eq!(
            Notice::joined("127.0.0.1:5000", false).to_string(),
            "[REDACTED] has joined the chat\n"
        );
        assert_eq!(Notice::CurrentlyBanned.to_bytes(), b"You are currently banned!\n");
        assert_eq!(Notice::Banned.to_bytes(), b"You are banned\n");
    }
}
