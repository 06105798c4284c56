//! 错误代码和错误类别定义
//!
//! 注册中心客户端对外暴露的错误种类，按后端无关的语义分组

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 资源相关错误（不存在、未就绪）
/// - 2000-2999: 传输相关错误
/// - 3000-3999: 编解码相关错误
/// - 4000-4999: 配置相关错误
/// - 5000-5999: 生命周期相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 资源相关错误 (1000-1999)
    // ============================================================
    NotFound = 1000,
    NotReady = 1001,

    // ============================================================
    // 传输相关错误 (2000-2999)
    // ============================================================
    TransportFailed = 2000,
    TransportUnavailable = 2001,
    TransportTimeout = 2002,

    // ============================================================
    // 编解码相关错误 (3000-3999)
    // ============================================================
    DecodeFailed = 3000,
    EncodeFailed = 3001,

    // ============================================================
    // 配置相关错误 (4000-4999)
    // ============================================================
    InvalidUri = 4000,
    UnsupportedScheme = 4001,
    InvalidOption = 4002,

    // ============================================================
    // 生命周期相关错误 (5000-5999)
    // ============================================================
    RegistryClosed = 5000,
    SubscriptionCancelled = 5001,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    SinkRejected = 9000,
    ValueConversion = 9001,
    UnknownError = 9999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::NotReady => "NOT_READY",
            ErrorCode::TransportFailed => "TRANSPORT_FAILED",
            ErrorCode::TransportUnavailable => "TRANSPORT_UNAVAILABLE",
            ErrorCode::TransportTimeout => "TRANSPORT_TIMEOUT",
            ErrorCode::DecodeFailed => "DECODE_FAILED",
            ErrorCode::EncodeFailed => "ENCODE_FAILED",
            ErrorCode::InvalidUri => "INVALID_URI",
            ErrorCode::UnsupportedScheme => "UNSUPPORTED_SCHEME",
            ErrorCode::InvalidOption => "INVALID_OPTION",
            ErrorCode::RegistryClosed => "REGISTRY_CLOSED",
            ErrorCode::SubscriptionCancelled => "SUBSCRIPTION_CANCELLED",
            ErrorCode::SinkRejected => "SINK_REJECTED",
            ErrorCode::ValueConversion => "VALUE_CONVERSION",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 获取错误代码的类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Resource,
            2000..=2999 => ErrorCategory::Transport,
            3000..=3999 => ErrorCategory::Codec,
            4000..=4999 => ErrorCategory::Configuration,
            5000..=5999 => ErrorCategory::Lifecycle,
            _ => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::TransportUnavailable | ErrorCode::TransportTimeout
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Resource,
    Transport,
    Codec,
    Configuration,
    Lifecycle,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Resource => write!(f, "RESOURCE"),
            ErrorCategory::Transport => write!(f, "TRANSPORT"),
            ErrorCategory::Codec => write!(f, "CODEC"),
            ErrorCategory::Configuration => write!(f, "CONFIGURATION"),
            ErrorCategory::Lifecycle => write!(f, "LIFECYCLE"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}
