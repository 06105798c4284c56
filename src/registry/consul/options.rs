//! Consul 连接配置

use crate::error::{RegistryError, Result};
use crate::utils::RegistryUri;
use crate::watch::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WAIT_TIME};
use std::path::PathBuf;
use std::time::Duration;

/// Consul 连接配置
///
/// URI 格式：`consul[s|+http|+https]://[user:password@]host[:port][/path][?dc=&token=&token_file=&partition=&wait=]`
#[derive(Debug, Clone)]
pub struct ConsulOptions {
    /// HTTP scheme（`http` / `https`）
    pub scheme: String,
    /// Agent 地址，`host:port`
    pub address: String,
    /// API 路径前缀（反向代理场景）
    pub path_prefix: String,
    pub datacenter: Option<String>,
    pub token: Option<String>,
    /// 连接时读取的 token 文件，内容去除首尾空白
    pub token_file: Option<PathBuf>,
    pub partition: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 长轮询阻塞窗口
    pub wait: Duration,
    /// 订阅请求队列容量
    pub queue_capacity: usize,
}

impl Default for ConsulOptions {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            address: "127.0.0.1:8500".to_string(),
            path_prefix: String::new(),
            datacenter: None,
            token: None,
            token_file: None,
            partition: None,
            username: None,
            password: None,
            wait: DEFAULT_WAIT_TIME,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ConsulOptions {
    /// 从连接 URI 解析配置
    pub fn from_uri(uri: &str) -> Result<Self> {
        Self::default().with_uri(uri)
    }

    /// 用连接 URI 覆盖配置
    pub fn with_uri(mut self, uri: &str) -> Result<Self> {
        let uri = RegistryUri::parse(uri)?;
        self.scheme = match uri.scheme.as_str() {
            "consul" => "http".to_string(),
            "consuls" => "https".to_string(),
            scheme => match scheme.strip_prefix("consul+") {
                Some(inner @ ("http" | "https")) => inner.to_string(),
                _ => return Err(RegistryError::unsupported_scheme(scheme)),
            },
        };

        if let Some(host) = uri.hosts.first() {
            self.address = host.clone();
        }
        if uri.user.is_some() {
            self.username = uri.user.clone();
            self.password = uri.password.clone();
        }
        self.path_prefix = uri.path.trim_end_matches('/').to_string();

        if let Some(wait) = uri.duration_option("wait")? {
            self.wait = wait;
        }
        if let Some(dc) = uri.option("dc").filter(|v| !v.is_empty()) {
            self.datacenter = Some(dc.to_string());
        }
        if let Some(token) = uri.option("token").filter(|v| !v.is_empty()) {
            self.token = Some(token.to_string());
        }
        if let Some(file) = uri.option("token_file").filter(|v| !v.is_empty()) {
            self.token_file = Some(PathBuf::from(file));
        }
        if let Some(partition) = uri.option("partition").filter(|v| !v.is_empty()) {
            self.partition = Some(partition.to_string());
        }
        Ok(self)
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    pub fn with_wait_time(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// 基础 URL，例如 `http://127.0.0.1:8500/consul`
    pub fn base_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.address, self.path_prefix)
    }

    /// 解析最终使用的 token：显式 token 优先，其次读取 token 文件
    pub(crate) async fn resolve_token(&self) -> Result<Option<String>> {
        if self.token.is_some() {
            return Ok(self.token.clone());
        }
        match &self.token_file {
            Some(path) => {
                let token = tokio::fs::read_to_string(path).await.map_err(|e| {
                    RegistryError::invalid_option(format!(
                        "failed to read consul token file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let token = token.trim();
                Ok(Some(token.to_string()).filter(|t| !t.is_empty()))
            }
            None => Ok(None),
        }
    }
}
