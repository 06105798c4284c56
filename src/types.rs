//! 服务描述模型
//!
//! 纯数据类型，除了键路径推导之外不带任何行为

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// 主机或服务暴露的端口，key 为协议名，value 为端口
///
/// ```
/// use cloud_registry::Ports;
///
/// let ports: Ports = [("http".to_string(), "80".to_string())].into();
/// assert_eq!(ports["http"], "80");
/// ```
pub type Ports = HashMap<String, String>;

/// 生成伪随机的服务实例 ID，格式为 `<name>-<number>`
pub fn generate_instance_id(service_name: &str) -> String {
    format!("{}-{}", service_name, rand::random::<u64>() >> 1)
}

/// 按 `services/[namespace/]name/[partition/]` 渲染路径，空段整体省略
fn render_path(namespace: &str, name: &str, partition: &str) -> String {
    let mut path = String::with_capacity(
        "services/".len() + namespace.len() + name.len() + partition.len() + 3,
    );
    path.push_str("services/");
    if !namespace.is_empty() {
        path.push_str(namespace);
        path.push('/');
    }
    path.push_str(name);
    path.push('/');
    if !partition.is_empty() {
        path.push_str(partition);
        path.push('/');
    }
    path
}

/// 主机描述
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub hostname: String,
    #[serde(default)]
    pub ports: Ports,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// HTTP 健康检查描述
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpCheck {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, Vec<String>>,
}

/// 健康检查
///
/// `ttl` 为零表示不做主动的存活维护
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Check {
    pub id: String,
    pub ttl: Duration,
    pub http: Option<HttpCheck>,
}

impl Check {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    pub fn http(ttl: Duration, url: impl Into<String>) -> Self {
        Self {
            ttl,
            http: Some(HttpCheck {
                url: url.into(),
                method: "GET".to_string(),
                headers: HashMap::new(),
            }),
            ..Default::default()
        }
    }
}

/// 服务实例标识
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ServiceID {
    pub name: String,
    pub namespace: String,
    pub partition: String,
    pub instance_id: String,
}

impl ServiceID {
    pub fn new(name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_id: instance_id.into(),
            ..Default::default()
        }
    }

    /// 实例所在的目录路径（不含实例 ID）
    pub fn path(&self) -> String {
        render_path(&self.namespace, &self.name, &self.partition)
    }

    /// 实例的完整键
    pub fn key(&self) -> String {
        let mut key = self.path();
        key.push_str(&self.instance_id);
        key
    }

    pub fn prefix(&self) -> ServicePrefix {
        ServicePrefix {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            partition: self.partition.clone(),
        }
    }
}

impl fmt::Display for ServiceID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// 服务发现范围
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ServicePrefix {
    pub name: String,
    pub namespace: String,
    pub partition: String,
}

impl ServicePrefix {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn path(&self) -> String {
        render_path(&self.namespace, &self.name, &self.partition)
    }

    /// 判断实例是否落在该范围内（空段不参与过滤）
    pub fn matches(&self, info: &ServiceInfo) -> bool {
        info.name == self.name
            && (self.namespace.is_empty() || self.namespace == info.namespace)
            && (self.partition.is_empty() || self.partition == info.partition)
    }
}

impl fmt::Display for ServicePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// 服务注册载荷
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    pub partition: String,
    pub instance_id: String,
    pub hostname: String,
    pub port: u16,
    pub public: Vec<Host>,
    pub private: Vec<Host>,
    pub tags: Vec<String>,
    pub meta: HashMap<String, String>,
    pub check: Check,
}

impl Service {
    /// 创建服务，实例 ID 自动生成
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        let name = name.into();
        Self {
            instance_id: generate_instance_id(&name),
            name,
            hostname: hostname.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_check(mut self, check: Check) -> Self {
        self.check = check;
        self
    }

    pub fn id(&self) -> ServiceID {
        ServiceID {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            partition: self.partition.clone(),
            instance_id: self.instance_id.clone(),
        }
    }

    pub fn prefix(&self) -> ServicePrefix {
        ServicePrefix {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            partition: self.partition.clone(),
        }
    }
}

/// 服务发现结果
///
/// `last_update` 由驱动在写入或发现时设置，调用方不应自行填写
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub partition: String,
    pub instance_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public: Vec<Host>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private: Vec<Host>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
    #[serde(default)]
    pub last_update: DateTime<Utc>,
    /// 后端原生的实例信息
    #[serde(skip)]
    pub raw_info: Option<serde_json::Value>,
}

impl ServiceInfo {
    /// 由注册载荷生成，`last_update` 取当前时间
    pub fn from_service(service: &Service) -> Self {
        Self {
            name: service.name.clone(),
            namespace: service.namespace.clone(),
            partition: service.partition.clone(),
            instance_id: service.instance_id.clone(),
            hostname: service.hostname.clone(),
            port: service.port,
            public: service.public.clone(),
            private: service.private.clone(),
            tags: service.tags.clone(),
            meta: service.meta.clone(),
            last_update: Utc::now(),
            raw_info: None,
        }
    }

    /// 判断自上次更新以来是否已超过 `ttl`；`ttl` 为零时永不过期
    pub fn is_stale(&self, ttl: Duration) -> bool {
        if ttl.is_zero() {
            return false;
        }
        let age = Utc::now().signed_duration_since(self.last_update);
        age.to_std().map(|age| age > ttl).unwrap_or(false)
    }

    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }
}
