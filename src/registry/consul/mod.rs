//! Consul 服务注册发现实现
//!
//! 服务注册走 agent 接口，发现走 catalog 接口，KV 订阅使用 blocking query
//! （`index` + `wait`）驱动长轮询循环。

mod options;

pub use options::ConsulOptions;

use super::scope::{ScopeRoot, ScopedValues, delegate_value_client};
use super::trait_def::Registry;
use crate::error::{RegistryError, Result};
use crate::types::{Host, Service, ServiceID, ServiceInfo, ServicePrefix};
use crate::value::ValueSetter;
use crate::watch::dispatcher::Dispatcher;
use crate::watch::long_poll::{self, LongPollSource, PollResult, PollWatch};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "is_empty")]
    namespace: &'a str,
    #[serde(skip_serializing_if = "is_empty")]
    partition: &'a str,
    address: &'a str,
    port: u16,
    tags: &'a [String],
    meta: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    check: Option<AgentServiceCheck>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceCheck {
    #[serde(rename = "CheckID")]
    check_id: String,
    #[serde(rename = "TTL", skip_serializing_if = "Option::is_none")]
    ttl: Option<String>,
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    http: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<HashMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<String>,
    deregister_critical_service_after: String,
}

impl AgentServiceCheck {
    /// TTL 检查，或带 HTTP 描述时的 HTTP 检查（间隔等于 TTL）；TTL 为零时不注册检查
    fn from_service(service: &Service) -> Option<Self> {
        let ttl = service.check.ttl;
        if ttl.is_zero() {
            return None;
        }
        let check_id = if service.check.id.is_empty() {
            format!("service:{}", service.instance_id)
        } else {
            service.check.id.clone()
        };
        let deregister_after = go_duration(ttl * 3);

        Some(match &service.check.http {
            Some(http) => Self {
                check_id,
                ttl: None,
                http: Some(http.url.clone()),
                method: Some(http.method.clone()).filter(|m| !m.is_empty()),
                header: Some(http.headers.clone()).filter(|h| !h.is_empty()),
                interval: Some(go_duration(ttl)),
                deregister_critical_service_after: deregister_after,
            },
            None => Self {
                check_id,
                ttl: Some(go_duration(ttl)),
                http: None,
                method: None,
                header: None,
                interval: None,
                deregister_critical_service_after: deregister_after,
            },
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogService {
    #[serde(default)]
    address: String,
    #[serde(rename = "ServiceID")]
    service_id: String,
    service_name: String,
    #[serde(default)]
    service_address: String,
    #[serde(default)]
    service_port: u16,
    #[serde(default)]
    service_tags: Option<Vec<String>>,
    #[serde(default)]
    service_meta: Option<HashMap<String, String>>,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    partition: String,
}

impl CatalogService {
    fn into_info(self, raw: serde_json::Value) -> ServiceInfo {
        let hostname = if self.service_address.is_empty() {
            self.address
        } else {
            self.service_address
        };
        ServiceInfo {
            name: self.service_name,
            namespace: self.namespace,
            partition: self.partition,
            instance_id: self.service_id,
            public: vec![Host {
                hostname: hostname.clone(),
                ports: [("http".to_string(), self.service_port.to_string())].into(),
                ..Default::default()
            }],
            hostname,
            port: self.service_port,
            tags: self.service_tags.unwrap_or_default(),
            meta: self.service_meta.unwrap_or_default(),
            last_update: Utc::now(),
            raw_info: Some(raw),
            ..Default::default()
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceHealth {
    #[serde(default)]
    checks: Option<Vec<AgentCheck>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentCheck {
    #[serde(rename = "CheckID")]
    check_id: String,
    #[serde(default)]
    status: String,
    #[serde(default, rename = "Type")]
    kind: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvPair {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

impl KvPair {
    fn decode(self) -> Result<(String, Vec<u8>)> {
        let raw = match self.value {
            Some(encoded) => BASE64
                .decode(encoded)
                .map_err(|e| RegistryError::Decode(format!("{}: {}", self.key, e)))?,
            None => Vec::new(),
        };
        Ok((self.key, raw))
    }
}

fn is_empty(s: &&str) -> bool {
    s.is_empty()
}

/// Consul 时长格式，精确到毫秒
fn go_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// 非成功状态码映射为统一错误
async fn status_error(response: Response) -> RegistryError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = format!("consul responded {}: {}", status, body.trim());
    match status {
        StatusCode::NOT_FOUND => RegistryError::not_found(message),
        StatusCode::TOO_MANY_REQUESTS => RegistryError::unavailable(message),
        s if s.is_server_error() => RegistryError::unavailable(message),
        _ => RegistryError::transport(message),
    }
}

/// Consul HTTP API 客户端
pub(crate) struct ConsulClient {
    http: reqwest::Client,
    base: Url,
    path_prefix: String,
    token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    datacenter: Option<String>,
    partition: Option<String>,
}

impl ConsulClient {
    async fn new(options: &ConsulOptions) -> Result<Self> {
        let base = Url::parse(&format!("{}://{}", options.scheme, options.address))?;
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base,
            path_prefix: options.path_prefix.clone(),
            token: options.resolve_token().await?,
            username: options.username.clone(),
            password: options.password.clone(),
            datacenter: options.datacenter.clone(),
            partition: options.partition.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut url = self.base.clone();
        url.set_path(&format!("{}{}", self.path_prefix, path));

        let mut request = self.http.request(method, url);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_deref());
        }
        if let Some(dc) = &self.datacenter {
            request = request.query(&[("dc", dc)]);
        }
        if let Some(partition) = &self.partition {
            request = request.query(&[("partition", partition)]);
        }
        request
    }

    async fn register(&self, service: &Service) -> Result<()> {
        let registration = AgentServiceRegistration {
            id: &service.instance_id,
            name: &service.name,
            namespace: &service.namespace,
            partition: &service.partition,
            address: &service.hostname,
            port: service.port,
            tags: &service.tags,
            meta: &service.meta,
            check: AgentServiceCheck::from_service(service),
        };
        let response = self
            .request(Method::PUT, "/v1/agent/service/register")
            .json(&registration)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }

    async fn deregister(&self, instance_id: &str) -> Result<()> {
        let response = self
            .request(
                Method::PUT,
                &format!("/v1/agent/service/deregister/{}", instance_id),
            )
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(status_error(response).await),
        }
    }

    async fn catalog(&self, prefix: &ServicePrefix) -> Result<Vec<ServiceInfo>> {
        let mut request = self.request(
            Method::GET,
            &format!("/v1/catalog/service/{}", prefix.name),
        );
        if !prefix.namespace.is_empty() {
            request = request.query(&[("ns", &prefix.namespace)]);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let entries: Vec<serde_json::Value> = response.json().await?;
        let mut found = Vec::with_capacity(entries.len());
        for raw in entries {
            let entry: CatalogService = match serde_json::from_value(raw.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(service = %prefix.name, error = %e, "skipping undecodable catalog entry");
                    continue;
                }
            };
            let info = entry.into_info(raw);
            if prefix.matches(&info) {
                found.push(info);
            }
        }
        Ok(found)
    }

    async fn health_check(&self, instance_id: &str) -> Result<()> {
        let response = self
            .request(
                Method::GET,
                &format!("/v1/agent/health/service/id/{}", instance_id),
            )
            .query(&[("format", "json")])
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::not_found(instance_id));
        }
        if !(status.is_success()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::SERVICE_UNAVAILABLE)
        {
            return Err(status_error(response).await);
        }

        let health: AgentServiceHealth = response.json().await?;
        let checks = health.checks.unwrap_or_default();
        if checks.is_empty() {
            return Err(RegistryError::not_ready(format!(
                "{}: no health checks",
                instance_id
            )));
        }

        for check in checks {
            if check.kind.eq_ignore_ascii_case("ttl") {
                self.pass_check(&check.check_id).await?;
            } else if check.status == "critical" {
                return Err(RegistryError::not_ready(format!(
                    "{}: check {} is critical",
                    instance_id, check.check_id
                )));
            }
        }
        Ok(())
    }

    async fn pass_check(&self, check_id: &str) -> Result<()> {
        let response = self
            .request(Method::PUT, &format!("/v1/agent/check/pass/{}", check_id))
            .send()
            .await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(RegistryError::not_ready(format!(
                "check {} is gone",
                check_id
            ))),
            _ => Err(status_error(response).await),
        }
    }

    async fn kv_get(&self, key: &str) -> Result<String> {
        let response = self
            .request(Method::GET, &format!("/v1/kv/{}", key))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::not_found(key));
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let pairs: Vec<KvPair> = response.json().await?;
        let pair = pairs
            .into_iter()
            .next()
            .ok_or_else(|| RegistryError::not_found(key))?;
        let (_, raw) = pair.decode()?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    async fn kv_put(&self, key: &str, value: &str) -> Result<()> {
        let response = self
            .request(Method::PUT, &format!("/v1/kv/{}", key))
            .body(value.to_string())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let stored: bool = response.json().await?;
        if !stored {
            return Err(RegistryError::transport(format!(
                "consul rejected write of {}",
                key
            )));
        }
        Ok(())
    }

    /// 带索引的 blocking query，键不存在时返回空结果和当前索引
    async fn blocking_kv(
        &self,
        key: &str,
        recurse: bool,
        index: u64,
        wait: Duration,
    ) -> Result<PollResult> {
        let mut request = self
            .request(Method::GET, &format!("/v1/kv/{}", key))
            .query(&[("stale", "")]);
        if recurse {
            request = request.query(&[("recurse", "true")]);
        }
        if index > 0 {
            request = request.query(&[
                ("index", index.to_string()),
                ("wait", go_duration(wait)),
            ]);
        }

        let response = request.send().await?;
        let last_index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            .max(1);

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(PollResult {
                index: last_index,
                entries: Vec::new(),
            });
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let pairs: Vec<KvPair> = response.json().await?;
        let entries = pairs
            .into_iter()
            .map(KvPair::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(PollResult {
            index: last_index,
            entries,
        })
    }
}

#[async_trait]
impl LongPollSource for ConsulClient {
    async fn poll_key(&self, key: &str, index: u64, wait: Duration) -> Result<PollResult> {
        self.blocking_kv(key, false, index, wait).await
    }

    async fn poll_prefix(&self, prefix: &str, index: u64, wait: Duration) -> Result<PollResult> {
        self.blocking_kv(prefix, true, index, wait).await
    }
}

pub(crate) struct ConsulInner {
    client: Arc<ConsulClient>,
    dispatcher: Dispatcher<PollWatch>,
    wait: Duration,
}

impl ConsulInner {
    async fn enqueue(&self, cancel: &CancellationToken, watch: PollWatch) -> Result<()> {
        self.dispatcher.enqueue(cancel, watch).await?;
        let client = self.client.clone();
        let wait = self.wait;
        self.dispatcher
            .start_once(move |rx, shutdown| long_poll::run(client, rx, shutdown, wait));
        Ok(())
    }
}

#[async_trait]
impl ScopeRoot for ConsulInner {
    async fn get(&self, key: &str) -> Result<String> {
        self.dispatcher.ensure_open()?;
        self.client.kv_get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.dispatcher.ensure_open()?;
        self.client.kv_put(key, value).await
    }

    async fn watch_key(
        &self,
        cancel: &CancellationToken,
        key: String,
        sink: Arc<dyn ValueSetter>,
    ) -> Result<()> {
        self.enqueue(cancel, PollWatch::key(key, sink)).await
    }

    async fn watch_prefix(
        &self,
        cancel: &CancellationToken,
        prefix: String,
        sink: Arc<dyn ValueSetter>,
    ) -> Result<()> {
        self.enqueue(cancel, PollWatch::prefix(prefix, sink)).await
    }
}

/// Consul 注册中心
pub struct ConsulRegistry {
    inner: Arc<ConsulInner>,
    values: ScopedValues<ConsulInner>,
}

impl ConsulRegistry {
    /// 连接 Consul agent
    pub async fn connect(options: ConsulOptions) -> Result<Self> {
        let client = ConsulClient::new(&options).await?;
        info!(address = %options.base_url(), "connected to consul");
        let inner = Arc::new(ConsulInner {
            client: Arc::new(client),
            dispatcher: Dispatcher::new(options.queue_capacity),
            wait: options.wait,
        });
        Ok(Self {
            values: ScopedValues::new(inner.clone(), ""),
            inner,
        })
    }

    /// 通过连接 URI 连接
    pub async fn connect_uri(uri: &str) -> Result<Self> {
        Self::connect(ConsulOptions::from_uri(uri)?).await
    }
}

delegate_value_client!(ConsulRegistry);

#[async_trait]
impl Registry for ConsulRegistry {
    async fn register(&self, service: &Service) -> Result<()> {
        self.inner.dispatcher.ensure_open()?;
        self.inner.client.register(service).await?;
        info!(
            service = %service.name,
            instance_id = %service.instance_id,
            address = %format!("{}:{}", service.hostname, service.port),
            "service registered with consul"
        );
        Ok(())
    }

    async fn deregister(&self, id: &ServiceID) -> Result<()> {
        self.inner.dispatcher.ensure_open()?;
        self.inner.client.deregister(&id.instance_id).await?;
        info!(service = %id.name, instance_id = %id.instance_id, "service deregistered from consul");
        Ok(())
    }

    async fn discover(&self, prefix: &ServicePrefix, _ttl: Duration) -> Result<Vec<ServiceInfo>> {
        self.inner.dispatcher.ensure_open()?;
        let found = self.inner.client.catalog(prefix).await?;
        if found.is_empty() {
            return Err(RegistryError::not_found(prefix.path()));
        }
        Ok(found)
    }

    async fn health_check(&self, id: &ServiceID, _ttl: Duration) -> Result<()> {
        self.inner.dispatcher.ensure_open()?;
        self.inner.client.health_check(&id.instance_id).await
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.dispatcher.is_shutdown() {
            info!("closing consul registry");
        }
        self.inner.dispatcher.shutdown().await;
        Ok(())
    }
}
