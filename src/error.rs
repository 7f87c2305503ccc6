use std::io;
use thiserror::Error;

/// 引擎侧的错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// 标签重复
    #[error("tag {0} already exists")]
    DuplicateTag(String),

    /// 标签不存在
    #[error("tag {0} not found")]
    TagNotFound(String),

    /// 用户重复
    #[error("user {0} already exists")]
    DuplicateUser(String),

    /// 用户不存在
    #[error("user {0} not found")]
    UserNotFound(String),

    /// 配置对象无法构建
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// 引擎已关闭
    #[error("engine is closed")]
    Closed,
}

/// 引擎结果类型别名
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// 控制层统一的错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON 解析错误
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 端口无效
    #[error("invalid port: {0:?}")]
    InvalidPort(String),

    /// 缺少证书或私钥
    #[error("cert or key path is not valid for node {0}")]
    MissingTls(String),

    /// 不支持的协议
    #[error("unsupported node type: {0}")]
    UnsupportedProtocol(String),

    /// 节点扩展参数错误
    #[error("invalid node options: {0}")]
    InvalidOptions(String),

    /// 规则无法编译
    #[error("invalid rule {rule:?}: {reason}")]
    InvalidRule { rule: String, reason: String },

    /// 用户参数错误
    #[error("invalid user {user}: {reason}")]
    InvalidUser { user: String, reason: String },

    /// 节点已存在
    #[error("node {0} already exists")]
    NodeExists(String),

    /// 节点不存在
    #[error("node {0} not found")]
    NodeNotFound(String),

    /// 入站处理器不支持用户管理
    #[error("handler {0} does not implement user management")]
    NotUserManager(String),

    /// 未知用户
    #[error("unknown user {0}")]
    UnknownUser(String),

    /// 引擎调用错误
    #[error("{context}: {source}")]
    Engine {
        context: String,
        #[source]
        source: EngineError,
    },

    /// 核心已启动
    #[error("core is already started")]
    AlreadyStarted,

    /// 核心未启动
    #[error("core is not started")]
    NotStarted,
}

impl CoreError {
    /// Wrap an engine error with the operation it came from
    pub fn engine(context: impl Into<String>, source: EngineError) -> Self {
        CoreError::Engine {
            context: context.into(),
            source,
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;
