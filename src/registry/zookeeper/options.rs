//! ZooKeeper 连接配置

use crate::error::{RegistryError, Result};
use crate::utils::{RegistryUri, parse_duration};
use crate::watch::DEFAULT_QUEUE_CAPACITY;
use std::time::Duration;

/// 默认会话超时
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// 默认根路径
pub const DEFAULT_BASE_PATH: &str = "/services";

/// ZooKeeper 连接配置
///
/// URI 格式：`zookeeper://host1:port1,host2:port2/myapp?timeout=5s`
#[derive(Debug, Clone)]
pub struct ZookeeperOptions {
    pub hosts: Vec<String>,
    pub session_timeout: Duration,
    /// 所有节点的根路径，以 `/` 开头且不以 `/` 结尾
    pub base_path: String,
    /// 订阅请求队列容量
    pub queue_capacity: usize,
}

impl Default for ZookeeperOptions {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost:2181".to_string()],
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            base_path: DEFAULT_BASE_PATH.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// 规范化根路径：空或 `/` 使用默认值，否则保证单个前导 `/` 且去掉尾部 `/`
pub fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        DEFAULT_BASE_PATH.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

impl ZookeeperOptions {
    pub fn from_uri(uri: &str) -> Result<Self> {
        Self::default().with_uri(uri)
    }

    /// 用连接 URI 覆盖配置
    ///
    /// 非法或非正的 `timeout` 回退到默认会话超时
    pub fn with_uri(mut self, uri: &str) -> Result<Self> {
        let uri = RegistryUri::parse(uri)?;
        if !matches!(uri.scheme.as_str(), "zookeeper" | "zk") {
            return Err(RegistryError::unsupported_scheme(uri.scheme));
        }

        if !uri.hosts.is_empty() {
            self.hosts = uri.hosts.clone();
        }
        self.session_timeout = uri
            .option("timeout")
            .and_then(|v| parse_duration(v).ok())
            .filter(|t| !t.is_zero())
            .unwrap_or(DEFAULT_SESSION_TIMEOUT);
        self.base_path = normalize_base_path(&uri.path);
        Ok(self)
    }

    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts
            .into_iter()
            .map(Into::into)
            .filter(|h: &String| !h.is_empty())
            .collect();
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_base_path(mut self, path: &str) -> Self {
        self.base_path = normalize_base_path(path);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// 连接串，`host1:port1,host2:port2`
    pub fn cluster(&self) -> String {
        self.hosts.join(",")
    }
}
