use clap::{Parser, Subcommand};

/// Chatcast Server - 实时文本广播服务器
#[derive(Parser, Debug, Default)]
#[command(name = "chatcast")]
#[command(version)]
#[command(about = "带限流与封禁的实时 TCP 文本广播服务器", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", help = "指定配置文件路径")]
    pub config_file: Option<String>,

    /// 服务器监听地址
    #[arg(long, value_name = "ADDRESS", help = "服务器监听地址")]
    pub host: Option<String>,

    /// TCP 端口
    #[arg(long, short = 'p', value_name = "PORT", help = "TCP 监听端口")]
    pub port: Option<u16>,

    /// 最大连接数
    #[arg(long, value_name = "NUM", help = "最大并发连接数")]
    pub max_connections: Option<u32>,

    /// 限流间隔
    #[arg(long, value_name = "MS", help = "两条消息之间的最小间隔（毫秒）")]
    pub rate_limit_ms: Option<u64>,

    /// 违规阈值
    #[arg(long, value_name = "NUM", help = "违规积分阈值，超过即封禁")]
    pub strike_threshold: Option<u32>,

    /// 封禁时长
    #[arg(long, value_name = "SECS", help = "IP 封禁时长（秒）")]
    pub ban_timeout_secs: Option<u64>,

    /// 日志级别
    #[arg(
        long,
        value_name = "LEVEL",
        help = "日志级别: trace, debug, info, warn, error"
    )]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", help = "日志格式: pretty, json, compact")]
    pub log_format: Option<String>,

    /// 日志文件路径
    #[arg(long, value_name = "PATH", help = "日志输出文件路径")]
    pub log_file: Option<String>,

    /// 启用监控指标
    #[arg(long, help = "启用 Prometheus 监控指标")]
    pub enable_metrics: bool,

    /// 监控端口
    #[arg(long, value_name = "PORT", help = "监控指标服务端口")]
    pub metrics_port: Option<u16>,

    /// 详细输出（可重复使用：-v, -vv, -vvv）
    #[arg(short, action = clap::ArgAction::Count, help = "详细输出级别")]
    pub verbose: u8,

    /// 静默模式
    #[arg(long, short = 'q', help = "静默模式（不输出日志）")]
    pub quiet: bool,

    /// 开发模式（等同于 --log-level debug --log-format pretty，并关闭地址脱敏）
    #[arg(long, help = "启用开发模式")]
    pub dev: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成默认配置文件
    GenerateConfig {
        /// 输出文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 验证配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 显示最终配置（合并后的配置）
    ShowConfig,
}

impl Cli {
    /// 获取日志级别（考虑 verbose 和 quiet）
    pub fn get_log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }

        if self.dev {
            return Some("debug".to_string());
        }

        if let Some(level) = &self.log_level {
            return Some(level.clone());
        }

        // 根据 verbose 级别设置
        match self.verbose {
            0 => None, // 使用默认或配置文件
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }

    /// 获取日志格式
    pub fn get_log_format(&self) -> Option<String> {
        if self.dev {
            return Some("pretty".to_string());
        }
        self.log_format.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_precedence() {
        let cli = Cli::try_parse_from(["chatcast", "-vv"]).unwrap();
        assert_eq!(cli.get_log_level().as_deref(), Some("debug"));

        let cli = Cli::try_parse_from(["chatcast", "--quiet", "--log-level", "trace"]).unwrap();
        assert_eq!(cli.get_log_level().as_deref(), Some("error"));

        let cli = Cli::try_parse_from(["chatcast"]).unwrap();
        assert_eq!(cli.get_log_level(), None);
    }

    #[test]
    fn test_policy_overrides_parse() {
        let cli = Cli::try_parse_from([
            "chatcast",
            "--port",
            "9000",
            "--rate-limit-ms",
            "200",
            "--strike-threshold",
            "3",
        ])
        .unwrap();

        let mut config = crate::config::ServerConfig::default();
        config.merge_from_cli(&cli);
        assert_eq!(config.port, 9000);
        assert_eq!(config.security.rate_limit_ms, 200);
        assert_eq!(config.security.strike_threshold, 3);
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_subcommand_parse() {
        let cli = Cli::try_parse_from(["chatcast", "validate-config", "custom.toml"]).unwrap();
        match cli.command {
            Some(Commands::ValidateConfig { path }) => assert_eq!(path, "custom.toml"),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
