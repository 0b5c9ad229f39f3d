//! 按客户端的限流与违规积分
//!
//! 核心规则：
//! 1. 距上一条被接受的消息超过 `min_interval` 且内容是合法 UTF-8：接受，积分清零
//! 2. 超过间隔但内容非法：积分 +1，不刷新时间戳
//! 3. 未超过间隔（无论内容是否合法）：积分 +1
//! 4. 积分严格大于阈值时应当封禁

use std::time::{Duration, Instant};

use super::client_state::ViolationType;

/// 限流配置
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// 两条被接受消息之间的最小间隔
    pub min_interval: Duration,
    /// 违规积分阈值（严格大于时封禁）
    pub strike_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            strike_threshold: 10,
        }
    }
}

/// 单个客户端的限流状态
#[derive(Debug, Clone, Copy)]
pub struct StrikeState {
    /// 最后一条被接受消息的时间（注册时为注册时间）
    pub last_message_at: Instant,
    /// 违规积分
    pub strike_count: u32,
}

impl StrikeState {
    pub fn new(now: Instant) -> Self {
        Self {
            last_message_at: now,
            strike_count: 0,
        }
    }
}

/// 单条消息的判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageVerdict {
    /// 接受并广播
    Accepted,
    /// 拒绝（计一次违规）
    Rejected(ViolationType),
}

/// 判定结果 + 判定后的积分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrikeOutcome {
    pub verdict: MessageVerdict,
    pub strike_count: u32,
    pub should_ban: bool,
}

/// 限流器
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// 判定一条消息并更新该客户端的限流状态
    pub fn evaluate(&self, state: &mut StrikeState, payload: &[u8], now: Instant) -> StrikeOutcome {
        let elapsed = now.saturating_duration_since(state.last_message_at);

        let verdict = if elapsed <= self.config.min_interval {
            MessageVerdict::Rejected(ViolationType::RateLimit)
        } else if std::str::from_utf8(payload).is_err() {
            MessageVerdict::Rejected(ViolationType::MalformedPayload)
        } else {
            MessageVerdict::Accepted
        };

        match verdict {
            MessageVerdict::Accepted => {
                state.last_message_at = now;
                state.strike_count = 0;
            }
            MessageVerdict::Rejected(_) => {
                state.strike_count = state.strike_count.saturating_add(1);
            }
        }

        StrikeOutcome {
            verdict,
            strike_count: state.strike_count,
            should_ban: self.exceeds_threshold(state.strike_count),
        }
    }

    /// 积分是否超过阈值
    pub fn exceeds_threshold(&self, strike_count: u32) -> bool {
        strike_count > self.config.strike_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            min_interval: Duration::from_secs(1),
            strike_threshold: 3,
        })
    }

    #[test]
    fn test_accepts_after_interval() {
        let limiter = limiter();
        let start = Instant::now();
        let mut state = StrikeState::new(start);
        state.strike_count = 2;

        let later = start + Duration::from_millis(1500);
        let outcome = limiter.evaluate(&mut state, b"hello", later);

        assert_eq!(outcome.verdict, MessageVerdict::Accepted);
        assert_eq!(state.strike_count, 0);
        assert_eq!(state.last_message_at, later);
        assert!(!outcome.should_ban);
    }

    #[test]
    fn test_too_soon_is_a_strike_even_when_valid() {
        let limiter = limiter();
        let start = Instant::now();
        let mut state = StrikeState::new(start);

        // 恰好等于间隔也算过快
        let outcome = limiter.evaluate(&mut state, b"hi", start + Duration::from_secs(1));
        assert_eq!(outcome.verdict, MessageVerdict::Rejected(ViolationType::RateLimit));
        assert_eq!(outcome.strike_count, 1);
        assert_eq!(state.last_message_at, start);
    }

    #[test]
    fn test_invalid_utf8_does_not_refresh_timestamp() {
        let limiter = limiter();
        let start = Instant::now();
        let mut state = StrikeState::new(start);

        let later = start + Duration::from_secs(2);
        let outcome = limiter.evaluate(&mut state, &[0xff, 0xfe, 0xfd], later);
        assert_eq!(
            outcome.verdict,
            MessageVerdict::Rejected(ViolationType::MalformedPayload)
        );
        assert_eq!(state.last_message_at, start);
        assert_eq!(state.strike_count, 1);
    }

    #[test]
    fn test_ban_only_after_threshold_exceeded() {
        let limiter = limiter();
        let start = Instant::now();
        let mut state = StrikeState::new(start);

        for i in 1..=3 {
            let outcome = limiter.evaluate(&mut state, b"spam", start);
            assert_eq!(outcome.strike_count, i);
            assert!(!outcome.should_ban);
        }

        let outcome = limiter.evaluate(&mut state, b"spam", start);
        assert_eq!(outcome.strike_count, 4);
        assert!(outcome.should_ban);
    }
}
