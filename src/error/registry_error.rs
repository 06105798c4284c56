//! 注册中心统一错误类型

use super::code::ErrorCode;
use thiserror::Error;

/// 注册中心统一错误类型
///
/// 同步调用（注册、注销、发现、健康检查、KV 读写）直接返回该错误；
/// 后台订阅循环内部的错误只记录日志，不经由此类型暴露给调用方。
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    /// 请求的键、服务或实例不存在
    #[error("not found: {0}")]
    NotFound(String),

    /// 实例存在，但其存活机制（lease / session / TTL 检查）缺失或已过期
    #[error("service is not ready: {0}")]
    NotReady(String),

    /// 网络或后端 RPC 失败
    #[error("transport error [{code}]: {message}", code = .code.as_str())]
    Transport {
        code: ErrorCode,
        message: String,
    },

    /// 载荷无法解析为结构化数据
    #[error("decode error: {0}")]
    Decode(String),

    /// 载荷无法编码
    #[error("encode error: {0}")]
    Encode(String),

    /// 连接 URI 或选项不合法
    #[error("configuration error [{code}]: {message}", code = .code.as_str())]
    Configuration {
        code: ErrorCode,
        message: String,
    },

    /// 注册中心已关闭
    #[error("registry is closed")]
    Closed,

    /// 订阅请求被调用方取消
    #[error("subscription cancelled")]
    Cancelled,

    /// 订阅接收方拒绝了投递的值
    #[error("sink rejected value for {key}: {reason}")]
    Sink { key: String, reason: String },

    /// 值无法转换为目标类型
    #[error("cannot convert {from} to {to}")]
    Conversion { from: &'static str, to: &'static str },
}

impl RegistryError {
    /// 创建不存在错误
    pub fn not_found(what: impl Into<String>) -> Self {
        RegistryError::NotFound(what.into())
    }

    /// 创建未就绪错误
    pub fn not_ready(what: impl Into<String>) -> Self {
        RegistryError::NotReady(what.into())
    }

    /// 创建不可重试的传输错误
    pub fn transport(message: impl Into<String>) -> Self {
        RegistryError::Transport {
            code: ErrorCode::TransportFailed,
            message: message.into(),
        }
    }

    /// 创建可重试的传输错误（后端暂不可用）
    pub fn unavailable(message: impl Into<String>) -> Self {
        RegistryError::Transport {
            code: ErrorCode::TransportUnavailable,
            message: message.into(),
        }
    }

    /// 创建可重试的超时错误
    pub fn timeout(message: impl Into<String>) -> Self {
        RegistryError::Transport {
            code: ErrorCode::TransportTimeout,
            message: message.into(),
        }
    }

    /// 创建 URI 解析错误
    pub fn invalid_uri(message: impl Into<String>) -> Self {
        RegistryError::Configuration {
            code: ErrorCode::InvalidUri,
            message: message.into(),
        }
    }

    /// 创建不支持的 scheme 错误
    pub fn unsupported_scheme(scheme: impl Into<String>) -> Self {
        RegistryError::Configuration {
            code: ErrorCode::UnsupportedScheme,
            message: format!("unsupported registry scheme: {}", scheme.into()),
        }
    }

    /// 创建选项错误
    pub fn invalid_option(message: impl Into<String>) -> Self {
        RegistryError::Configuration {
            code: ErrorCode::InvalidOption,
            message: message.into(),
        }
    }

    /// 创建接收方拒绝错误
    pub fn sink(key: impl Into<String>, reason: impl Into<String>) -> Self {
        RegistryError::Sink {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            RegistryError::NotFound(_) => ErrorCode::NotFound,
            RegistryError::NotReady(_) => ErrorCode::NotReady,
            RegistryError::Transport { code, .. } => *code,
            RegistryError::Decode(_) => ErrorCode::DecodeFailed,
            RegistryError::Encode(_) => ErrorCode::EncodeFailed,
            RegistryError::Configuration { code, .. } => *code,
            RegistryError::Closed => ErrorCode::RegistryClosed,
            RegistryError::Cancelled => ErrorCode::SubscriptionCancelled,
            RegistryError::Sink { .. } => ErrorCode::SinkRejected,
            RegistryError::Conversion { .. } => ErrorCode::ValueConversion,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, RegistryError::NotReady(_))
    }

    /// 判断是否为可重试的错误
    ///
    /// 长轮询订阅遇到可重试错误时会重置游标，强制下一轮完整读取
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, RegistryError>;
