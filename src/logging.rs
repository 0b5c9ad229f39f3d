use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 脱敏占位符
pub const REDACTED: &str = "[REDACTED]";

/// 初始化日志系统
///
/// 指定 `log_file` 时额外写入文件（非阻塞），返回的 guard 需要在进程生命周期内持有，
/// 否则缓冲中的日志会丢失。
pub fn init_logging(
    log_level: &str,
    log_format: Option<&str>,
    log_file: Option<&str>,
    quiet: bool,
) -> Result<Option<WorkerGuard>> {
    // 如果静默模式，只输出错误
    let level = if quiet { "error" } else { log_level };

    // 解析日志级别
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // 根据格式选择不同的输出方式
    let stdout_layer = match log_format {
        // JSON 格式（适合生产环境）
        Some("json") => tracing_fmt::layer().json().boxed(),
        // Pretty 格式（适合开发环境）
        Some("pretty") | Some("dev") => tracing_fmt::layer().pretty().boxed(),
        // Compact 格式（默认）
        _ => tracing_fmt::layer().compact().boxed(),
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let path = Path::new(path);
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("无效的日志文件路径: {}", path.display()))?;
            std::fs::create_dir_all(directory)
                .with_context(|| format!("无法创建日志目录: {}", directory.display()))?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("日志系统初始化失败")?;

    Ok(guard)
}

/// 敏感信息包装：非调试模式下显示为 `[REDACTED]`
///
/// 用于日志中的对端地址、错误详情以及加入通知中的身份标识。
#[derive(Clone, Copy)]
pub struct Sensitive<'a, T: fmt::Display + ?Sized> {
    value: &'a T,
    reveal: bool,
}

impl<'a, T: fmt::Display + ?Sized> Sensitive<'a, T> {
    pub fn new(value: &'a T, reveal: bool) -> Self {
        Self { value, reveal }
    }
}

impl<T: fmt::Display + ?Sized> fmt::Display for Sensitive<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reveal {
            self.value.fmt(f)
        } else {
            f.write_str(REDACTED)
        }
    }
}

impl<T: fmt::Display + ?Sized> fmt::Debug for Sensitive<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
