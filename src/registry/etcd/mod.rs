//! etcd 服务注册发现实现
//!
//! 实例存活依赖 lease：注册时按 TTL 申请 lease，后台任务每 TTL/3 续约一次。
//! KV 订阅使用原生 watch 事件流。

mod options;
mod watch;

pub use options::{DEFAULT_DIAL_TIMEOUT, EtcdOptions};

use self::watch::EtcdWatch;
use super::scope::{ScopeRoot, ScopedValues, delegate_value_client};
use super::trait_def::Registry;
use crate::error::{RegistryError, Result};
use crate::types::{Service, ServiceID, ServiceInfo, ServicePrefix};
use crate::value::ValueSetter;
use crate::watch::dispatcher::Dispatcher;
use async_trait::async_trait;
use etcd_client::{
    Client, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions, WatchOptions,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 续约间隔下限
const MIN_KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(500);

/// 一个已注册实例的 lease 与续约任务的停止信号
struct LeaseHandle {
    lease_id: i64,
    stop: CancellationToken,
}

pub(crate) struct EtcdInner {
    client: Client,
    dispatcher: Dispatcher<EtcdWatch>,
    leases: Mutex<HashMap<String, LeaseHandle>>,
}

impl EtcdInner {
    async fn subscribe(
        &self,
        cancel: &CancellationToken,
        key: String,
        prefix: bool,
        sink: Arc<dyn ValueSetter>,
    ) -> Result<()> {
        self.dispatcher.ensure_open()?;
        let options = if prefix {
            WatchOptions::new().with_prefix()
        } else {
            WatchOptions::new()
        };
        let mut client = self.client.clone();
        let (watcher, stream) = client.watch(key.clone(), Some(options)).await?;
        debug!(key = %key, prefix, "etcd watch opened");

        self.dispatcher
            .enqueue(cancel, EtcdWatch::new(key, sink, watcher, stream))
            .await?;
        self.dispatcher.start_once(watch::run);
        Ok(())
    }

    /// 停止实例的续约任务，返回其 lease
    fn stop_keep_alive(&self, key: &str) -> Option<i64> {
        let handle = self.leases.lock().remove(key)?;
        handle.stop.cancel();
        Some(handle.lease_id)
    }

    fn start_keep_alive(&self, key: String, lease_id: i64, ttl: Duration) {
        let stop = self.dispatcher.shutdown_token().child_token();
        let previous = self.leases.lock().insert(
            key.clone(),
            LeaseHandle {
                lease_id,
                stop: stop.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.stop.cancel();
        }

        let client = self.client.clone();
        self.dispatcher
            .spawn(keep_alive(client, key, lease_id, ttl, stop));
    }
}

/// 续约任务：每 TTL/3 续约一次，lease 失效或出错时退出
/// 发送一次续约请求并等待应答，返回 lease 剩余秒数；流结束视为已过期
async fn refresh_lease(keeper: &mut LeaseKeeper, stream: &mut LeaseKeepAliveStream) -> Result<i64> {
    keeper.keep_alive().await?;
    Ok(stream.message().await?.map(|resp| resp.ttl()).unwrap_or(0))
}

/// 把 TTL 换算为 lease 秒数：向上取整且至少 1 秒，亚秒 TTL 同样获得 lease
fn lease_seconds(ttl: Duration) -> i64 {
    let secs = ttl.as_millis().div_ceil(1000).max(1);
    i64::try_from(secs).unwrap_or(i64::MAX)
}

async fn keep_alive(
    mut client: Client,
    key: String,
    lease_id: i64,
    ttl: Duration,
    stop: CancellationToken,
) {
    let (mut keeper, mut stream) = match client.lease_keep_alive(lease_id).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(key = %key, lease_id, error = %e, "failed to start lease keep-alive");
            return;
        }
    };

    let mut ticker = tokio::time::interval((ttl / 3).max(MIN_KEEP_ALIVE_INTERVAL));
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // 续约往返同样受停止信号约束
        let refreshed = tokio::select! {
            _ = stop.cancelled() => break,
            refreshed = refresh_lease(&mut keeper, &mut stream) => refreshed,
        };
        match refreshed {
            Ok(remaining) if remaining > 0 => {
                debug!(key = %key, lease_id, ttl = remaining, "lease refreshed");
            }
            Ok(_) => {
                warn!(key = %key, lease_id, "lease expired, keep-alive stopped");
                break;
            }
            Err(e) => {
                warn!(key = %key, lease_id, error = %e, "lease keep-alive failed");
                break;
            }
        }
    }
    debug!(key = %key, lease_id, "lease keep-alive exited");
}

#[async_trait]
impl ScopeRoot for EtcdInner {
    async fn get(&self, key: &str) -> Result<String> {
        self.dispatcher.ensure_open()?;
        let mut client = self.client.clone();
        let resp = client.get(key, None).await?;
        resp.kvs()
            .first()
            .map(|kv| String::from_utf8_lossy(kv.value()).into_owned())
            .ok_or_else(|| RegistryError::not_found(key))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.dispatcher.ensure_open()?;
        let mut client = self.client.clone();
        client.put(key, value, None).await?;
        Ok(())
    }

    async fn watch_key(
        &self,
        cancel: &CancellationToken,
        key: String,
        sink: Arc<dyn ValueSetter>,
    ) -> Result<()> {
        self.subscribe(cancel, key, false, sink).await
    }

    async fn watch_prefix(
        &self,
        cancel: &CancellationToken,
        prefix: String,
        sink: Arc<dyn ValueSetter>,
    ) -> Result<()> {
        self.subscribe(cancel, prefix, true, sink).await
    }
}

/// etcd 注册中心
pub struct EtcdRegistry {
    inner: Arc<EtcdInner>,
    values: ScopedValues<EtcdInner>,
}

impl EtcdRegistry {
    /// 连接 etcd 集群
    pub async fn connect(options: EtcdOptions) -> Result<Self> {
        let client = Client::connect(&options.endpoints, Some(options.connect_options())).await?;
        info!(endpoints = ?options.endpoints, "connected to etcd");
        Ok(Self::with_client(client, options.queue_capacity))
    }

    pub async fn connect_uri(uri: &str) -> Result<Self> {
        Self::connect(EtcdOptions::from_uri(uri)?).await
    }

    /// 基于已建立的客户端创建注册中心
    pub fn with_client(client: Client, queue_capacity: usize) -> Self {
        let inner = Arc::new(EtcdInner {
            client,
            dispatcher: Dispatcher::new(queue_capacity),
            leases: Mutex::new(HashMap::new()),
        });
        Self {
            values: ScopedValues::new(inner.clone(), ""),
            inner,
        }
    }
}

delegate_value_client!(EtcdRegistry);

#[async_trait]
impl Registry for EtcdRegistry {
    async fn register(&self, service: &Service) -> Result<()> {
        self.inner.dispatcher.ensure_open()?;
        let key = service.id().key();
        let payload = serde_json::to_string(&ServiceInfo::from_service(service))
            .map_err(|e| RegistryError::Encode(e.to_string()))?;
        let ttl = service.check.ttl;
        let mut client = self.inner.client.clone();

        if ttl.is_zero() {
            self.inner.stop_keep_alive(&key);
            client.put(key.as_str(), payload, None).await?;
            info!(key = %key, "service registered without lease");
            return Ok(());
        }

        let lease = client.lease_grant(lease_seconds(ttl), None).await?;
        client
            .put(
                key.as_str(),
                payload,
                Some(PutOptions::new().with_lease(lease.id())),
            )
            .await?;
        self.inner.start_keep_alive(key.clone(), lease.id(), ttl);

        info!(key = %key, lease_id = lease.id(), ttl = ?ttl, "service registered");
        Ok(())
    }

    async fn deregister(&self, id: &ServiceID) -> Result<()> {
        self.inner.dispatcher.ensure_open()?;
        let key = id.key();
        let lease = self.inner.stop_keep_alive(&key);
        let mut client = self.inner.client.clone();
        client.delete(key.as_str(), None).await?;
        if let Some(lease_id) = lease {
            if let Err(e) = client.lease_revoke(lease_id).await {
                debug!(key = %key, lease_id, error = %e, "lease revoke failed");
            }
        }
        info!(key = %key, "service deregistered");
        Ok(())
    }

    async fn discover(&self, prefix: &ServicePrefix, _ttl: Duration) -> Result<Vec<ServiceInfo>> {
        self.inner.dispatcher.ensure_open()?;
        let path = prefix.path();
        let mut client = self.inner.client.clone();
        let resp = client
            .get(path.as_str(), Some(GetOptions::new().with_prefix()))
            .await?;

        let mut found = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            match serde_json::from_slice::<ServiceInfo>(kv.value()) {
                Ok(info) if prefix.matches(&info) => found.push(info),
                Ok(_) => {}
                Err(e) => {
                    debug!(key = %String::from_utf8_lossy(kv.key()), error = %e, "skipping undecodable service entry");
                }
            }
        }

        if found.is_empty() {
            return Err(RegistryError::not_found(path));
        }
        Ok(found)
    }

    async fn health_check(&self, id: &ServiceID, _ttl: Duration) -> Result<()> {
        self.inner.dispatcher.ensure_open()?;
        let key = id.key();
        let mut client = self.inner.client.clone();
        let resp = client
            .get(key.as_str(), Some(GetOptions::new().with_keys_only()))
            .await?;

        let kv = resp
            .kvs()
            .first()
            .ok_or_else(|| RegistryError::not_found(key.clone()))?;
        let lease_id = kv.lease();
        if lease_id == 0 {
            return Err(RegistryError::not_ready(format!("{}: no lease", key)));
        }

        let (mut keeper, mut stream) = client.lease_keep_alive(lease_id).await?;
        keeper.keep_alive().await?;
        match stream.message().await? {
            Some(resp) if resp.ttl() > 0 => Ok(()),
            _ => Err(RegistryError::not_ready(format!(
                "{}: lease {} expired",
                key, lease_id
            ))),
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.dispatcher.is_shutdown() {
            info!("closing etcd registry");
        }
        self.inner.dispatcher.shutdown().await;
        self.inner.leases.lock().clear();
        Ok(())
    }
}
