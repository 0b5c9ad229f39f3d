use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 服务器监听地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
    /// 最大连接数
    pub max_connections: u32,
    /// 单次读取缓冲区大小（字节），每次读取的数据原样作为一条消息
    pub read_buffer_size: usize,
    /// 事件队列容量（读任务 -> Dispatcher）
    pub event_queue_capacity: usize,
    /// 单次写入超时（毫秒），超时视为对端失效
    pub write_timeout_ms: u64,
    /// 调试模式：为 false 时日志与加入通知中的地址统一脱敏
    pub debug_mode: bool,
    /// 日志级别
    pub log_level: String,
    /// 安全防护配置
    pub security: SecurityProtectionConfig,
    /// 监控指标配置
    pub metrics: MetricsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8125,
            max_connections: 1000,
            read_buffer_size: 512,
            event_queue_capacity: 1024,
            write_timeout_ms: 1000,
            debug_mode: false,
            log_level: "info".to_string(),
            security: SecurityProtectionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// 创建新的服务器配置
    pub fn new() -> Self {
        Self::default()
    }

    /// TCP 监听地址（host 可以是 IPv4 或 IPv6）
    pub fn bind_address(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.host_ip()?, self.port))
    }

    /// Prometheus 抓取地址，与监听地址共用 host
    pub fn metrics_address(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.host_ip()?, self.metrics.port))
    }

    fn host_ip(&self) -> Result<IpAddr> {
        self.host
            .parse::<IpAddr>()
            .with_context(|| format!("无效的监听地址: {}", self.host))
    }

    /// 写超时
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// 从 TOML 字符串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content).context("配置文件格式错误")?;
        let config: Self = toml_config.into();
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            anyhow::bail!("read_buffer_size 必须大于 0");
        }
        if self.event_queue_capacity == 0 {
            anyhow::bail!("event_queue_capacity 必须大于 0");
        }
        if self.max_connections == 0 {
            anyhow::bail!("max_connections 必须大于 0");
        }
        if self.security.ban_timeout_secs == 0 {
            anyhow::bail!("security.ban_timeout_secs 必须大于 0");
        }
        Ok(())
    }

    /// 从环境变量加载配置（CHATCAST_ 前缀）
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(host) = env::var("CHATCAST_HOST") {
            self.host = host;
        }
        if let Ok(port) = env::var("CHATCAST_PORT") {
            self.port = port.parse().unwrap_or(self.port);
        }
        if let Ok(max_conn) = env::var("CHATCAST_MAX_CONNECTIONS") {
            self.max_connections = max_conn.parse().unwrap_or(self.max_connections);
        }
        if let Ok(size) = env::var("CHATCAST_READ_BUFFER_SIZE") {
            self.read_buffer_size = size.parse().unwrap_or(self.read_buffer_size);
        }
        if let Ok(debug) = env::var("CHATCAST_DEBUG_MODE") {
            self.debug_mode = debug.parse().unwrap_or(self.debug_mode);
        }
        if let Ok(log_level) = env::var("CHATCAST_LOG_LEVEL") {
            if !log_level.trim().is_empty() {
                self.log_level = log_level;
            }
        }

        // 安全配置
        if let Ok(rate_limit) = env::var("CHATCAST_RATE_LIMIT_MS") {
            self.security.rate_limit_ms = rate_limit.parse().unwrap_or(self.security.rate_limit_ms);
        }
        if let Ok(threshold) = env::var("CHATCAST_STRIKE_THRESHOLD") {
            self.security.strike_threshold =
                threshold.parse().unwrap_or(self.security.strike_threshold);
        }
        if let Ok(timeout) = env::var("CHATCAST_BAN_TIMEOUT_SECS") {
            self.security.ban_timeout_secs =
                timeout.parse().unwrap_or(self.security.ban_timeout_secs);
        }

        // 监控配置
        if let Ok(enabled) = env::var("CHATCAST_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }
        if let Ok(port) = env::var("CHATCAST_METRICS_PORT") {
            self.metrics.port = port.parse().unwrap_or(self.metrics.port);
        }

        Ok(())
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(max_conn) = cli.max_connections {
            self.max_connections = max_conn;
        }
        if let Some(rate_limit) = cli.rate_limit_ms {
            self.security.rate_limit_ms = rate_limit;
        }
        if let Some(threshold) = cli.strike_threshold {
            self.security.strike_threshold = threshold;
        }
        if let Some(timeout) = cli.ban_timeout_secs {
            self.security.ban_timeout_secs = timeout;
        }
        if cli.enable_metrics {
            self.metrics.enabled = true;
        }
        if let Some(port) = cli.metrics_port {
            self.metrics.port = port;
        }
        if cli.dev {
            self.debug_mode = true;
        }
        if let Some(log_level) = cli.get_log_level() {
            self.log_level = log_level;
        }
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        // 1. 配置文件（如果指定）或默认值
        let mut config = if let Some(config_file) = &cli.config_file {
            if Path::new(config_file).exists() {
                info!("📄 从配置文件加载: {}", config_file);
                Self::from_toml_file(config_file)?
            } else {
                tracing::warn!("⚠️ 配置文件不存在: {}", config_file);
                Self::new()
            }
        } else if Path::new("config.toml").exists() {
            info!("📄 从默认配置文件加载: config.toml");
            Self::from_toml_file("config.toml")?
        } else {
            Self::new()
        };

        // 2. 环境变量（优先级高于配置文件）
        config.merge_from_env()?;

        // 3. 命令行参数（最高优先级）
        config.merge_from_cli(cli);

        config.validate()?;
        Ok(config)
    }
}

/// 安全防护配置：限流、积分（strike）与封禁
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityProtectionConfig {
    /// 两条被接受消息之间的最小间隔（毫秒）
    pub rate_limit_ms: u64,
    /// 违规积分阈值，超过即封禁
    pub strike_threshold: u32,
    /// IP 封禁时长（秒）
    pub ban_timeout_secs: u64,
    /// 过期封禁清理间隔（秒）
    pub ban_sweep_interval_secs: u64,
}

impl Default for SecurityProtectionConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: 1000,
            strike_threshold: 10,
            ban_timeout_secs: 10 * 60,
            ban_sweep_interval_secs: 60,
        }
    }
}

impl SecurityProtectionConfig {
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn ban_timeout(&self) -> Duration {
        Duration::from_secs(self.ban_timeout_secs)
    }

    pub fn ban_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.ban_sweep_interval_secs.max(1))
    }
}

impl From<SecurityProtectionConfig> for crate::security::RateLimitConfig {
    fn from(config: SecurityProtectionConfig) -> Self {
        crate::security::RateLimitConfig {
            min_interval: config.rate_limit(),
            strike_threshold: config.strike_threshold,
        }
    }
}

/// Prometheus 监控配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// 是否启用 /metrics 导出
    pub enabled: bool,
    /// 导出端口
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9125,
        }
    }
}

/// TOML 配置文件结构（用于反序列化）
#[derive(Debug, Deserialize)]
struct TomlConfig {
    server: Option<TomlServerConfig>,
    security: Option<TomlSecurityConfig>,
    metrics: Option<TomlMetricsConfig>,
    logging: Option<TomlLoggingConfig>,
}

#[derive(Debug, Deserialize)]
struct TomlServerConfig {
    host: Option<String>,
    port: Option<u16>,
    max_connections: Option<u32>,
    read_buffer_size: Option<usize>,
    event_queue_capacity: Option<usize>,
    write_timeout_ms: Option<u64>,
    debug_mode: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TomlSecurityConfig {
    rate_limit_ms: Option<u64>,
    strike_threshold: Option<u32>,
    ban_timeout_secs: Option<u64>,
    ban_sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlMetricsConfig {
    enabled: Option<bool>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct TomlLoggingConfig {
    level: Option<String>,
    format: Option<String>,
    file: Option<String>,
}

impl From<TomlConfig> for ServerConfig {
    fn from(toml: TomlConfig) -> Self {
        let mut config = Self::default();

        if let Some(server) = toml.server {
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
            if let Some(max_conn) = server.max_connections {
                config.max_connections = max_conn;
            }
            if let Some(size) = server.read_buffer_size {
                config.read_buffer_size = size;
            }
            if let Some(capacity) = server.event_queue_capacity {
                config.event_queue_capacity = capacity;
            }
            if let Some(timeout) = server.write_timeout_ms {
                config.write_timeout_ms = timeout;
            }
            if let Some(debug) = server.debug_mode {
                config.debug_mode = debug;
            }
        }

        if let Some(security) = toml.security {
            if let Some(rate_limit) = security.rate_limit_ms {
                config.security.rate_limit_ms = rate_limit;
            }
            if let Some(threshold) = security.strike_threshold {
                config.security.strike_threshold = threshold;
            }
            if let Some(timeout) = security.ban_timeout_secs {
                config.security.ban_timeout_secs = timeout;
            }
            if let Some(interval) = security.ban_sweep_interval_secs {
                config.security.ban_sweep_interval_secs = interval;
            }
        }

        if let Some(metrics) = toml.metrics {
            if let Some(enabled) = metrics.enabled {
                config.metrics.enabled = enabled;
            }
            if let Some(port) = metrics.port {
                config.metrics.port = port;
            }
        }

        if let Some(logging) = toml.logging {
            if let Some(level) = logging.level {
                config.log_level = level;
            }
        }

        config
    }
}

/// 早期日志配置（日志系统初始化之前读取）
#[derive(Debug, Default)]
pub struct EarlyLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

/// 只读取配置文件的 [logging] 段，不加载完整配置
pub fn load_early_logging_config(config_file: Option<&str>) -> EarlyLoggingConfig {
    let path = config_file.unwrap_or("config.toml");
    let Ok(content) = fs::read_to_string(path) else {
        return EarlyLoggingConfig::default();
    };

    #[derive(Deserialize)]
    struct LoggingOnly {
        logging: Option<TomlLoggingConfig>,
    }

    match toml::from_str::<LoggingOnly>(&content) {
        Ok(LoggingOnly {
            logging: Some(logging),
        }) => EarlyLoggingConfig {
            level: logging.level,
            format: logging.format,
            file: logging.file,
        },
        _ => EarlyLoggingConfig::default(),
    }
}

/// 日志系统实际使用的级别
///
/// 优先级：CLI > CHATCAST_LOG_LEVEL > config.toml > "info"，与 `ServerConfig::load` 一致。
pub fn effective_log_level(
    cli_level: Option<String>,
    env_level: Option<String>,
    file_level: Option<String>,
) -> String {
    cli_level
        .or(env_level.filter(|level| !level.trim().is_empty()))
        .or(file_level)
        .unwrap_or_else(|| "info".to_string())
}

/// 默认配置文件内容（generate-config 子命令输出）
pub const DEFAULT_CONFIG_TOML: &str = r#"# Chatcast Server 配置文件
# 此文件由 chatcast generate-config 生成

[server]
host = "0.0.0.0"
port = 8125
max_connections = 1000
read_buffer_size = 512
event_queue_capacity = 1024
write_timeout_ms = 1000
debug_mode = false

[security]
rate_limit_ms = 1000
strike_threshold = 10
ban_timeout_secs = 600
ban_sweep_interval_secs = 60

[metrics]
enabled = false
port = 9125

[logging]
level = "info"
format = "compact"
# file = "./logs/server.log"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_reference_constants() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8125);
        assert_eq!(config.read_buffer_size, 512);
        assert_eq!(config.security.rate_limit(), Duration::from_secs(1));
        assert_eq!(config.security.strike_threshold, 10);
        assert_eq!(config.security.ban_timeout(), Duration::from_secs(600));
        assert!(!config.debug_mode);
    }

    #[test]
    fn test_generated_config_round_trips() {
        let config = ServerConfig::from_toml_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(config.port, 8125);
        assert_eq!(config.security.strike_threshold, 10);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            [security]
            strike_threshold = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.security.strike_threshold, 3);
        assert_eq!(config.security.rate_limit_ms, 1000);
        assert_eq!(config.port, 8125);
    }

    #[test]
    fn test_validation_rejects_zero_buffer() {
        let result = ServerConfig::from_toml_str(
            r#"
            [server]
            read_buffer_size = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_bind_address() {
        let mut config = ServerConfig::default();
        config.host = "127.0.0.1".to_string();
        config.port = 0;
        assert_eq!(config.bind_address().unwrap().to_string(), "127.0.0.1:0");
    }

    #[test]
    fn test_ipv6_host_addresses() {
        let mut config = ServerConfig::default();
        config.host = "::".to_string();
        config.port = 8125;
        config.metrics.port = 9125;
        assert_eq!(config.bind_address().unwrap().to_string(), "[::]:8125");
        assert_eq!(config.metrics_address().unwrap().to_string(), "[::]:9125");

        config.host = "::1".to_string();
        assert!(config.bind_address().unwrap().is_ipv6());

        config.host = "not-an-ip".to_string();
        assert!(config.bind_address().is_err());
        assert!(config.metrics_address().is_err());
    }

    #[test]
    fn test_effective_log_level_precedence() {
        let some = |s: &str| Some(s.to_string());

        assert_eq!(effective_log_level(None, None, None), "info");
        assert_eq!(effective_log_level(None, None, some("warn")), "warn");
        assert_eq!(effective_log_level(None, some("debug"), some("warn")), "debug");
        assert_eq!(
            effective_log_level(some("trace"), some("debug"), some("warn")),
            "trace"
        );
        // 空的环境变量不覆盖配置文件
        assert_eq!(effective_log_level(None, some(""), some("warn")), "warn");
    }

    #[test]
    fn test_rate_limit_config_conversion() {
        let security = SecurityProtectionConfig {
            rate_limit_ms: 250,
            strike_threshold: 4,
            ..Default::default()
        };
        let rate: crate::security::RateLimitConfig = security.into();
        assert_eq!(rate.min_interval, Duration::from_millis(250));
        assert_eq!(rate.strike_threshold, 4);
    }
}
