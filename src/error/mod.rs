//! 错误处理模块
//!
//! 提供统一的错误种类：不存在、未就绪、传输失败、解码失败、配置错误，
//! 以及各后端客户端错误到统一错误的转换

pub mod code;
pub mod conversions;
pub mod registry_error;

// 重新导出公共类型
pub use code::{ErrorCategory, ErrorCode};
pub use registry_error::{RegistryError, Result};
