//! 服务注册发现模块
//!
//! 支持多种后端：Consul、etcd、ZooKeeper，以及进程内的内存实现和空实现。
//! 通过连接 URI 的 scheme 选择后端。

#[cfg(feature = "consul")]
pub mod consul;
pub mod dummy;
#[cfg(feature = "etcd")]
pub mod etcd;
pub mod memory;
mod scope;
pub mod trait_def;
#[cfg(feature = "zookeeper")]
pub mod zookeeper;

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::utils::RegistryUri;

#[cfg(feature = "consul")]
pub use consul::{ConsulOptions, ConsulRegistry};
pub use dummy::DummyRegistry;
#[cfg(feature = "etcd")]
pub use etcd::{EtcdOptions, EtcdRegistry};
pub use memory::{MemoryOptions, MemoryRegistry};
pub use trait_def::{BoxRegistry, Registry, ValueClient};
#[cfg(feature = "zookeeper")]
pub use zookeeper::{ZookeeperOptions, ZookeeperRegistry};

/// 注册中心后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryType {
    Consul,
    Etcd,
    Zookeeper,
    Memory,
    Dummy,
}

impl RegistryType {
    /// 根据 URI scheme 判断后端类型
    pub fn from_scheme(scheme: &str) -> Result<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "consul" | "consuls" | "consul+http" | "consul+https" => Ok(RegistryType::Consul),
            "etcd" | "etcds" | "http" | "https" => Ok(RegistryType::Etcd),
            "zookeeper" | "zk" => Ok(RegistryType::Zookeeper),
            "memory" | "mem" => Ok(RegistryType::Memory),
            "dummy" => Ok(RegistryType::Dummy),
            other => Err(RegistryError::unsupported_scheme(other)),
        }
    }

    /// 根据连接 URI 判断后端类型
    pub fn from_uri(uri: &str) -> Result<Self> {
        Self::from_scheme(&RegistryUri::parse(uri)?.scheme)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryType::Consul => "consul",
            RegistryType::Etcd => "etcd",
            RegistryType::Zookeeper => "zookeeper",
            RegistryType::Memory => "memory",
            RegistryType::Dummy => "dummy",
        }
    }
}

/// 按连接 URI 创建注册中心
///
/// ```no_run
/// # async fn demo() -> cloud_registry::Result<()> {
/// let registry = cloud_registry::connect_uri("consul://127.0.0.1:8500?wait=5s").await?;
/// registry.close().await?;
/// # Ok(())
/// # }
/// ```
pub async fn connect_uri(uri: &str) -> Result<BoxRegistry> {
    let registry_type = RegistryType::from_uri(uri)?;
    tracing::debug!(registry = registry_type.as_str(), "connecting registry");

    match registry_type {
        #[cfg(feature = "consul")]
        RegistryType::Consul => Ok(Box::new(ConsulRegistry::connect_uri(uri).await?)),
        #[cfg(feature = "etcd")]
        RegistryType::Etcd => Ok(Box::new(EtcdRegistry::connect_uri(uri).await?)),
        #[cfg(feature = "zookeeper")]
        RegistryType::Zookeeper => Ok(Box::new(ZookeeperRegistry::connect_uri(uri).await?)),
        RegistryType::Memory => Ok(Box::new(MemoryRegistry::new(MemoryOptions::from_uri(
            uri,
        )?))),
        RegistryType::Dummy => Ok(Box::new(DummyRegistry::new())),
        #[allow(unreachable_patterns)]
        other => Err(RegistryError::invalid_option(format!(
            "registry backend {} is not enabled in this build",
            other.as_str()
        ))),
    }
}

/// 按配置创建注册中心
pub async fn connect(config: &RegistryConfig) -> Result<BoxRegistry> {
    connect_uri(&config.uri).await
}
