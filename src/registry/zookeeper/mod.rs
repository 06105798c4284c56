//! ZooKeeper 服务注册发现实现
//!
//! 实例注册为临时节点 `<base>/services/[ns/]name/[partition/]<instance>`，
//! 会话断开时节点自动消失；TTL 大于零的实例另有刷新任务定期更新 `last_update`。

mod options;
mod watch;

pub use options::{DEFAULT_BASE_PATH, DEFAULT_SESSION_TIMEOUT, ZookeeperOptions, normalize_base_path};

use self::watch::ZkWatch;
use super::scope::{ScopeRoot, ScopedValues, delegate_value_client};
use super::trait_def::Registry;
use crate::error::{RegistryError, Result};
use crate::types::{Service, ServiceID, ServiceInfo, ServicePrefix};
use crate::value::ValueSetter;
use crate::watch::dispatcher::Dispatcher;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zookeeper_client::{Acls, Client, CreateMode};

/// 按路径语义拼接，结果以 `/` 开头且不含空段
pub fn join_path(base: &str, name: &str) -> String {
    let mut joined = String::with_capacity(base.len() + name.len() + 1);
    for segment in base.split('/').chain(name.split('/')) {
        if segment.is_empty() {
            continue;
        }
        joined.push('/');
        joined.push_str(segment);
    }
    if joined.is_empty() {
        joined.push('/');
    }
    joined
}

/// 父路径，根路径的父路径为自身
fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// 逐级创建持久节点，已存在的节点跳过
async fn ensure_path(client: &Client, path: &str) -> Result<()> {
    let mut current = String::with_capacity(path.len());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        let options = CreateMode::Persistent.with_acls(Acls::anyone_all());
        match client.create(&current, &[], &options).await {
            Ok(_) | Err(zookeeper_client::Error::NodeExists) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// 读取实例信息，刷新 `last_update` 后按版本写回
async fn touch_instance(client: &Client, path: &str) -> Result<()> {
    let (data, stat) = client.get_data(path).await?;
    let mut info: ServiceInfo = serde_json::from_slice(&data)?;
    info.touch();
    let payload = serde_json::to_vec(&info).map_err(|e| RegistryError::Encode(e.to_string()))?;
    client.set_data(path, &payload, Some(stat.version)).await?;
    Ok(())
}

/// 刷新间隔下限
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// 刷新任务：每 TTL/3 刷新一次，任何失败都静默退出
async fn refresh(client: Client, path: String, ttl: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval((ttl / 3).max(MIN_REFRESH_INTERVAL));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = touch_instance(&client, &path).await {
                    debug!(path = %path, error = %e, "instance refresher exited");
                    break;
                }
            }
        }
    }
}

pub(crate) struct ZookeeperInner {
    client: Client,
    base_path: String,
    dispatcher: Dispatcher<ZkWatch>,
    refreshers: Mutex<HashMap<String, CancellationToken>>,
}

impl ZookeeperInner {
    fn instance_path(&self, id: &ServiceID) -> String {
        join_path(&self.base_path, &id.key())
    }

    fn stop_refresher(&self, path: &str) {
        if let Some(stop) = self.refreshers.lock().remove(path) {
            stop.cancel();
        }
    }

    fn start_refresher(&self, path: String, ttl: Duration) {
        let stop = self.dispatcher.shutdown_token().child_token();
        if let Some(previous) = self.refreshers.lock().insert(path.clone(), stop.clone()) {
            previous.cancel();
        }
        self.dispatcher
            .spawn(refresh(self.client.clone(), path, ttl, stop));
    }

    async fn enqueue(&self, cancel: &CancellationToken, watch: ZkWatch) -> Result<()> {
        self.dispatcher.enqueue(cancel, watch).await?;
        let client = self.client.clone();
        let tracker = self.dispatcher.tracker();
        self.dispatcher
            .start_once(move |rx, shutdown| watch::route(client, tracker, rx, shutdown));
        Ok(())
    }
}

#[async_trait]
impl ScopeRoot for ZookeeperInner {
    fn extend_scope(&self, current: &str, extra: &[&str]) -> String {
        join_path(current, &extra.join("/"))
    }

    fn full_key(&self, scope: &str, name: &str) -> String {
        join_path(scope, name)
    }

    async fn get(&self, key: &str) -> Result<String> {
        self.dispatcher.ensure_open()?;
        let (data, _stat) = self.client.get_data(key).await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.dispatcher.ensure_open()?;
        ensure_path(&self.client, parent_path(key)).await?;
        match self.client.set_data(key, value.as_bytes(), None).await {
            Ok(_) => Ok(()),
            Err(zookeeper_client::Error::NoNode) => {
                let options = CreateMode::Persistent.with_acls(Acls::anyone_all());
                match self.client.create(key, value.as_bytes(), &options).await {
                    Ok(_) => Ok(()),
                    // 并发创建，改为覆盖
                    Err(zookeeper_client::Error::NodeExists) => {
                        self.client.set_data(key, value.as_bytes(), None).await?;
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn watch_key(
        &self,
        cancel: &CancellationToken,
        key: String,
        sink: Arc<dyn ValueSetter>,
    ) -> Result<()> {
        self.enqueue(cancel, ZkWatch::key(key, sink)).await
    }

    async fn watch_prefix(
        &self,
        cancel: &CancellationToken,
        prefix: String,
        sink: Arc<dyn ValueSetter>,
    ) -> Result<()> {
        self.enqueue(cancel, ZkWatch::prefix(prefix, sink)).await
    }
}

/// ZooKeeper 注册中心
pub struct ZookeeperRegistry {
    inner: Arc<ZookeeperInner>,
    values: ScopedValues<ZookeeperInner>,
}

impl ZookeeperRegistry {
    /// 连接 ZooKeeper 集群并确保根路径存在
    pub async fn connect(options: ZookeeperOptions) -> Result<Self> {
        let client = Client::connector()
            .session_timeout(options.session_timeout)
            .connect(&options.cluster())
            .await?;
        ensure_path(&client, &options.base_path).await?;
        info!(hosts = %options.cluster(), base_path = %options.base_path, "connected to zookeeper");
        Ok(Self::with_client(client, &options.base_path, options.queue_capacity))
    }

    pub async fn connect_uri(uri: &str) -> Result<Self> {
        Self::connect(ZookeeperOptions::from_uri(uri)?).await
    }

    /// 基于已建立的会话创建注册中心，根路径需已存在
    pub fn with_client(client: Client, base_path: &str, queue_capacity: usize) -> Self {
        let base_path = normalize_base_path(base_path);
        let inner = Arc::new(ZookeeperInner {
            client,
            base_path: base_path.clone(),
            dispatcher: Dispatcher::new(queue_capacity),
            refreshers: Mutex::new(HashMap::new()),
        });
        Self {
            values: ScopedValues::new(inner.clone(), base_path),
            inner,
        }
    }
}

delegate_value_client!(ZookeeperRegistry);

#[async_trait]
impl Registry for ZookeeperRegistry {
    async fn register(&self, service: &Service) -> Result<()> {
        self.inner.dispatcher.ensure_open()?;
        let path = self.inner.instance_path(&service.id());
        let payload = serde_json::to_vec(&ServiceInfo::from_service(service))
            .map_err(|e| RegistryError::Encode(e.to_string()))?;

        ensure_path(&self.inner.client, parent_path(&path)).await?;
        let options = CreateMode::Ephemeral.with_acls(Acls::anyone_all());
        match self.inner.client.create(&path, &payload, &options).await {
            Ok(_) => {}
            Err(zookeeper_client::Error::NodeExists) => {
                self.inner.client.set_data(&path, &payload, None).await?;
            }
            Err(e) => return Err(e.into()),
        }

        if service.check.ttl.is_zero() {
            self.inner.stop_refresher(&path);
        } else {
            self.inner.start_refresher(path.clone(), service.check.ttl);
        }
        info!(path = %path, "service registered");
        Ok(())
    }

    async fn deregister(&self, id: &ServiceID) -> Result<()> {
        self.inner.dispatcher.ensure_open()?;
        let path = self.inner.instance_path(id);
        self.inner.stop_refresher(&path);
        match self.inner.client.delete(&path, None).await {
            Ok(()) => info!(path = %path, "service deregistered"),
            Err(zookeeper_client::Error::NoNode) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn discover(&self, prefix: &ServicePrefix, ttl: Duration) -> Result<Vec<ServiceInfo>> {
        self.inner.dispatcher.ensure_open()?;
        let dir = join_path(&self.inner.base_path, &prefix.path());
        let children = match self.inner.client.list_children(&dir).await {
            Ok(children) => children,
            Err(zookeeper_client::Error::NoNode) => return Err(RegistryError::not_found(dir)),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::with_capacity(children.len());
        for child in children {
            let path = join_path(&dir, &child);
            let data = match self.inner.client.get_data(&path).await {
                Ok((data, _stat)) => data,
                Err(e) => {
                    debug!(path = %path, error = %e, "skipping unreadable instance node");
                    continue;
                }
            };
            match serde_json::from_slice::<ServiceInfo>(&data) {
                Ok(info) if prefix.matches(&info) && !info.is_stale(ttl) => found.push(info),
                Ok(_) => {}
                Err(e) => debug!(path = %path, error = %e, "skipping undecodable service entry"),
            }
        }

        if found.is_empty() {
            return Err(RegistryError::not_found(dir));
        }
        Ok(found)
    }

    async fn health_check(&self, id: &ServiceID, _ttl: Duration) -> Result<()> {
        self.inner.dispatcher.ensure_open()?;
        let path = self.inner.instance_path(id);
        let stat = self
            .inner
            .client
            .check_stat(&path)
            .await?
            .ok_or_else(|| RegistryError::not_found(path.clone()))?;
        if stat.ephemeral_owner == 0 {
            return Err(RegistryError::not_ready(format!(
                "{}: node is not ephemeral",
                path
            )));
        }
        touch_instance(&self.inner.client, &path).await
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.dispatcher.is_shutdown() {
            info!("closing zookeeper registry");
        }
        self.inner.dispatcher.shutdown().await;
        self.inner.refreshers.lock().clear();
        Ok(())
    }
}
