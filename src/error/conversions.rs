//! 错误类型转换实现
//!
//! 将各后端客户端库的错误映射到统一的错误种类

use super::RegistryError;
use std::io;

impl From<io::Error> for RegistryError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => RegistryError::timeout(err.to_string()),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => RegistryError::unavailable(err.to_string()),
            _ => RegistryError::transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Decode(err.to_string())
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        RegistryError::invalid_uri(err.to_string())
    }
}

impl From<toml::de::Error> for RegistryError {
    fn from(err: toml::de::Error) -> Self {
        RegistryError::invalid_option(err.to_string())
    }
}

#[cfg(feature = "consul")]
impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RegistryError::timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            RegistryError::unavailable(err.to_string())
        } else if err.is_decode() {
            RegistryError::Decode(err.to_string())
        } else if err.status().is_some_and(|s| s.is_server_error()) {
            RegistryError::unavailable(err.to_string())
        } else {
            RegistryError::transport(err.to_string())
        }
    }
}

#[cfg(feature = "etcd")]
impl From<etcd_client::Error> for RegistryError {
    fn from(err: etcd_client::Error) -> Self {
        // gRPC 状态码：DEADLINE_EXCEEDED=4, RESOURCE_EXHAUSTED=8, UNAVAILABLE=14
        match &err {
            etcd_client::Error::GRpcStatus(status) => match status.code() as i32 {
                4 => RegistryError::timeout(err.to_string()),
                8 | 14 => RegistryError::unavailable(err.to_string()),
                _ => RegistryError::transport(err.to_string()),
            },
            etcd_client::Error::TransportError(_) => RegistryError::unavailable(err.to_string()),
            _ => RegistryError::transport(err.to_string()),
        }
    }
}

#[cfg(feature = "zookeeper")]
impl From<zookeeper_client::Error> for RegistryError {
    fn from(err: zookeeper_client::Error) -> Self {
        match err {
            zookeeper_client::Error::NoNode => RegistryError::not_found(err.to_string()),
            zookeeper_client::Error::ConnectionLoss | zookeeper_client::Error::SessionExpired => {
                RegistryError::unavailable(err.to_string())
            }
            _ => RegistryError::transport(err.to_string()),
        }
    }
}
