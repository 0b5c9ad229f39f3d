use thiserror::Error;

/// 服务器错误类型
#[derive(Debug, Error)]
pub enum ServerError {
    /// 网络错误
    #[error("Network error: {0}")]
    Network(String),
    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// 写超时
    #[error("Write timed out after {0}ms")]
    WriteTimeout(u64),
    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,
    /// 事件队列已关闭（Dispatcher 已退出）
    #[error("Event queue closed")]
    QueueClosed,
    /// 指标导出器初始化失败
    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl From<toml::de::Error> for ServerError {
    fn from(err: toml::de::Error) -> Self {
        ServerError::Configuration(err.to_string())
    }
}

impl From<std::net::AddrParseError> for ServerError {
    fn from(err: std::net::AddrParseError) -> Self {
        ServerError::Configuration(err.to_string())
    }
}

impl ServerError {
    /// 是否属于对端断开类错误（广播时据此清理对端）
    pub fn is_peer_gone(&self) -> bool {
        match self {
            ServerError::ConnectionClosed | ServerError::WriteTimeout(_) => true,
            ServerError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServerError>;
