//! Cloud Registry
//!
//! 统一的服务注册、发现、健康检查与分层 KV 订阅客户端。调用方面向
//! [`Registry`] / [`ValueClient`] 编写与后端无关的代码，具体的网络交互由
//! Consul、etcd、ZooKeeper 驱动完成；另提供进程内的内存实现与空实现。
//!
//! ```no_run
//! use cloud_registry::{Registry, Service, ServicePrefix, Check};
//! use std::time::Duration;
//!
//! # async fn demo() -> cloud_registry::Result<()> {
//! let registry = cloud_registry::connect_uri("etcd://127.0.0.1:2379").await?;
//! let service = Service::new("example", "127.0.0.1", 8080)
//!     .with_check(Check::ttl(Duration::from_secs(10)));
//! registry.register(&service).await?;
//! let found = registry
//!     .discover(&ServicePrefix::new("example"), Duration::from_secs(10))
//!     .await?;
//! assert!(!found.is_empty());
//! registry.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod types;
pub mod utils;
pub mod value;
pub mod watch;

// Re-exports
pub use config::{Config, RegistryConfig};
pub use error::{ErrorCategory, ErrorCode, RegistryError, Result};
pub use registry::{
    BoxRegistry, DummyRegistry, MemoryOptions, MemoryRegistry, Registry, RegistryType,
    ValueClient, connect, connect_uri,
};
pub use types::{
    Check, Host, HttpCheck, Ports, Service, ServiceID, ServiceInfo, ServicePrefix,
    generate_instance_id,
};
pub use value::{
    FromValue, SyncAtomicValue, SyncInt64Value, SyncUInt64Value, SyncValue, Value, ValueSetter,
    ValueSetterFn, Valuer,
};

#[cfg(feature = "consul")]
pub use registry::{ConsulOptions, ConsulRegistry};
#[cfg(feature = "etcd")]
pub use registry::{EtcdOptions, EtcdRegistry};
#[cfg(feature = "zookeeper")]
pub use registry::{ZookeeperOptions, ZookeeperRegistry};

// 订阅取消信号
pub use tokio_util::sync::CancellationToken;
