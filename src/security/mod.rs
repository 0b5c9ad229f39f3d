//! 安全模块
//!
//! 提供广播服务器的反滥用能力：
//! - 客户端状态机（Unregistered -> Active -> Removed）
//! - 按客户端的最小发送间隔限流与违规积分（strike）
//! - 积分超过阈值后按 IP 临时封禁
//!
//! 这里的类型都是普通的可变数据结构，不带锁：它们只由 Dispatcher 所在的单个任务持有。

pub mod ban_registry;
pub mod client_state;
pub mod rate_limiter;

pub use ban_registry::{BanRegistry, BanStatus};
pub use client_state::{ClientState, ViolationType};
pub use rate_limiter::{MessageVerdict, RateLimitConfig, RateLimiter, StrikeOutcome, StrikeState};
