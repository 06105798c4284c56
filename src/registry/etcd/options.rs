//! etcd 连接配置

use crate::error::{RegistryError, Result};
use crate::utils::{RegistryUri, cast_bool};
use crate::watch::DEFAULT_QUEUE_CAPACITY;
use etcd_client::ConnectOptions;
use std::time::Duration;
use tracing::warn;

/// 默认拨号超时
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// 未指定 keepalivetimeout 时的 keep-alive 超时
const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(20);

/// etcd 连接配置
///
/// URI 格式：`etcd[s]://[user:password@]host:port[,host:port...][?timeout=5s&keepalive=5s&keepalivetimeout=5s&maxmsgsize=4194304&rejectoldcluster=true]`
#[derive(Debug, Clone)]
pub struct EtcdOptions {
    /// 完整的 endpoint 列表，例如 `http://127.0.0.1:2379`
    pub endpoints: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub dial_timeout: Duration,
    pub keep_alive: Option<Duration>,
    pub keep_alive_timeout: Option<Duration>,
    pub max_msg_size: Option<usize>,
    pub reject_old_cluster: bool,
    /// 订阅请求队列容量
    pub queue_capacity: usize,
}

impl Default for EtcdOptions {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            username: None,
            password: None,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            keep_alive: None,
            keep_alive_timeout: None,
            max_msg_size: None,
            reject_old_cluster: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl EtcdOptions {
    pub fn from_uri(uri: &str) -> Result<Self> {
        Self::default().with_uri(uri)
    }

    pub fn with_uri(mut self, uri: &str) -> Result<Self> {
        let uri = RegistryUri::parse(uri)?;
        let scheme = match uri.scheme.as_str() {
            "etcd" | "http" => "http",
            "etcds" | "https" => "https",
            other => return Err(RegistryError::unsupported_scheme(other)),
        };

        if uri.user.is_some() {
            self.username = uri.user.clone();
            self.password = uri.password.clone();
        }
        if !uri.hosts.is_empty() {
            self.endpoints = uri
                .hosts
                .iter()
                .map(|host| format!("{}://{}", scheme, host))
                .collect();
        }

        if let Some(timeout) = uri.duration_option("timeout")? {
            self.dial_timeout = timeout;
        }
        if let Some(keep_alive) = uri.duration_option("keepalive")? {
            self.keep_alive = Some(keep_alive);
        }
        if let Some(timeout) = uri.duration_option("keepalivetimeout")? {
            self.keep_alive_timeout = Some(timeout);
        }
        if let Some(size) = uri.option("maxmsgsize").filter(|v| !v.is_empty()) {
            let size = size
                .parse::<usize>()
                .map_err(|e| RegistryError::invalid_option(format!("maxmsgsize: {}", e)))?;
            self.max_msg_size = Some(size);
        }
        if let Some(reject) = uri.option("rejectoldcluster").filter(|v| !v.is_empty()) {
            self.reject_old_cluster = cast_bool(reject);
        }
        Ok(self)
    }

    pub fn with_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.keep_alive = Some(interval);
        self.keep_alive_timeout = Some(timeout);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// 转换为 etcd-client 的连接选项
    pub(crate) fn connect_options(&self) -> ConnectOptions {
        let dial_timeout = if self.dial_timeout.is_zero() {
            DEFAULT_DIAL_TIMEOUT
        } else {
            self.dial_timeout
        };
        let mut options = ConnectOptions::new().with_connect_timeout(dial_timeout);

        if let Some(user) = &self.username {
            options = options.with_user(user.clone(), self.password.clone().unwrap_or_default());
        }
        if let Some(interval) = self.keep_alive {
            let timeout = self.keep_alive_timeout.unwrap_or(DEFAULT_KEEP_ALIVE_TIMEOUT);
            options = options.with_keep_alive(interval, timeout);
        }
        if let Some(size) = self.max_msg_size {
            warn!(maxmsgsize = size, "etcd client does not limit message size; option ignored");
        }
        if self.reject_old_cluster {
            warn!("etcd client does not check cluster version; rejectoldcluster ignored");
        }
        options
    }
}
