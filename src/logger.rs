use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    /// 从字符串解析日志级别
    ///
    /// Accepts both the tracing names and the engine's own spelling
    /// (`warning`, `none`).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "none" | "off" => Some(LogLevel::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

pub fn init_logger(log_level: Option<LogLevel>) {
    let filter = if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        env_filter
    } else {
        let level = log_level.unwrap_or_default();
        EnvFilter::new(format!("tenant_core={}", level.as_str()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(true)
                .with_ansi(true)
                .compact(),
        )
        .init();
}

pub mod log {
    pub use tracing::{debug, error, info, warn};

    /// 记录节点生命周期事件
    pub fn node(name: &str, event: &str) {
        info!(node = name, event = event, "Node");
    }

    /// 记录用户批量变更事件
    pub fn users(node: &str, event: &str, count: usize) {
        info!(node = node, event = event, count = count, "Users");
    }

    /// 记录回滚事件
    pub fn rollback(scope: &str, steps: usize, failed: usize) {
        if failed > 0 {
            warn!(scope = scope, steps = steps, failed = failed, "Rollback incomplete");
        } else {
            debug!(scope = scope, steps = steps, "Rolled back");
        }
    }
}
