//! 内存注册中心
//!
//! 进程内的协调存储：全局单调递增的修改索引、每个键的修改索引与删除墓碑、
//! 已注册服务的 TTL 租约，以及"有变化才返回"的阻塞读取。
//! 订阅走与 Consul 相同的长轮询循环，适合测试和单机场景。

use super::scope::{ScopeRoot, ScopedValues, delegate_value_client};
use super::trait_def::Registry;
use crate::error::{RegistryError, Result};
use crate::types::{Service, ServiceID, ServiceInfo, ServicePrefix};
use crate::utils::RegistryUri;
use crate::value::ValueSetter;
use crate::watch::dispatcher::Dispatcher;
use crate::watch::long_poll::{self, LongPollSource, PollResult, PollWatch};
use crate::watch::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WAIT_TIME};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 内存注册中心配置
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    /// 单轮监听的阻塞窗口
    pub wait: Duration,
    /// 订阅请求队列容量
    pub queue_capacity: usize,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            wait: DEFAULT_WAIT_TIME,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl MemoryOptions {
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// 从 `memory://[?wait=1s]` 形式的 URI 解析
    pub fn from_uri(uri: &str) -> Result<Self> {
        let uri = RegistryUri::parse(uri)?;
        if !matches!(uri.scheme.as_str(), "memory" | "mem") {
            return Err(RegistryError::unsupported_scheme(uri.scheme));
        }
        let mut options = Self::default();
        if let Some(wait) = uri.duration_option("wait")? {
            if !wait.is_zero() {
                options.wait = wait;
            }
        }
        Ok(options)
    }
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    modify_index: u64,
    deleted: bool,
}

#[derive(Debug)]
struct Lease {
    ttl: Duration,
    expires_at: Instant,
    revoked: bool,
}

impl Lease {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            expires_at: Instant::now() + ttl,
            revoked: false,
        }
    }

    fn is_alive(&self) -> bool {
        !self.revoked && Instant::now() < self.expires_at
    }
}

#[derive(Debug)]
struct State {
    index: u64,
    entries: BTreeMap<String, Entry>,
    leases: HashMap<String, Lease>,
}

impl Default for State {
    // 从 1 开始：从未写入的键报告全局索引，首次写入必须严格大于它
    fn default() -> Self {
        Self {
            index: 1,
            entries: BTreeMap::new(),
            leases: HashMap::new(),
        }
    }
}

impl State {
    fn live(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key).filter(|e| !e.deleted)
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> u64 {
        self.index += 1;
        let index = self.index;
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                modify_index: index,
                deleted: false,
            },
        );
        index
    }

    /// 写入墓碑；键不存在时返回 `None`
    fn delete(&mut self, key: &str) -> Option<u64> {
        self.live(key)?;
        self.index += 1;
        let index = self.index;
        if let Some(entry) = self.entries.get_mut(key) {
            entry.value.clear();
            entry.deleted = true;
            entry.modify_index = index;
        }
        Some(index)
    }

    /// 单个键的版本；从未出现过的键使用全局索引
    fn key_index(&self, key: &str) -> u64 {
        self.entries
            .get(key)
            .map(|e| e.modify_index)
            .unwrap_or(self.index)
    }

    /// 前缀下所有键（包括墓碑）的最大版本；前缀下为空时使用全局索引
    fn prefix_index(&self, prefix: &str) -> u64 {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, e)| e.modify_index)
            .max()
            .unwrap_or(self.index)
    }

    fn snapshot_key(&self, key: &str) -> PollResult {
        PollResult {
            index: self.key_index(key),
            entries: self
                .live(key)
                .map(|e| vec![(key.to_string(), e.value.clone())])
                .unwrap_or_default(),
        }
    }

    fn snapshot_prefix(&self, prefix: &str) -> PollResult {
        PollResult {
            index: self.prefix_index(prefix),
            entries: self
                .entries
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .filter(|(_, e)| !e.deleted)
                .map(|(k, e)| (k.clone(), e.value.clone()))
                .collect(),
        }
    }
}

/// 内存存储，提供阻塞读取
pub(crate) struct MemoryStore {
    state: Mutex<State>,
    changed: watch::Sender<u64>,
}

impl MemoryStore {
    fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            state: Mutex::new(State::default()),
            changed,
        }
    }

    fn notify(&self, index: u64) {
        self.changed.send_replace(index);
    }

    fn put(&self, key: &str, value: Vec<u8>) -> u64 {
        let index = self.state.lock().put(key, value);
        self.notify(index);
        index
    }

    fn delete(&self, key: &str) -> Option<u64> {
        let index = self.state.lock().delete(key);
        if let Some(index) = index {
            self.notify(index);
        }
        index
    }

    /// 阻塞到快照的版本不再等于 `index`，或等待超时
    async fn wait_changed<F>(&self, index: u64, wait: Duration, snapshot: F) -> PollResult
    where
        F: Fn(&State) -> PollResult,
    {
        let mut changed = self.changed.subscribe();
        let deadline = Instant::now() + wait;
        loop {
            let current = snapshot(&*self.state.lock());
            if index == 0 || current.index != index {
                return current;
            }
            tokio::select! {
                res = changed.changed() => {
                    if res.is_err() {
                        return current;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => return current,
            }
        }
    }
}

#[async_trait]
impl LongPollSource for MemoryStore {
    async fn poll_key(&self, key: &str, index: u64, wait: Duration) -> Result<PollResult> {
        Ok(self
            .wait_changed(index, wait, |state| state.snapshot_key(key))
            .await)
    }

    async fn poll_prefix(&self, prefix: &str, index: u64, wait: Duration) -> Result<PollResult> {
        Ok(self
            .wait_changed(index, wait, |state| state.snapshot_prefix(prefix))
            .await)
    }
}

pub(crate) struct MemoryInner {
    store: Arc<MemoryStore>,
    dispatcher: Dispatcher<PollWatch>,
    wait: Duration,
}

impl MemoryInner {
    async fn enqueue(&self, cancel: &CancellationToken, watch: PollWatch) -> Result<()> {
        self.dispatcher.enqueue(cancel, watch).await?;
        let store = self.store.clone();
        let wait = self.wait;
        self.dispatcher
            .start_once(move |rx, shutdown| long_poll::run(store, rx, shutdown, wait));
        Ok(())
    }
}

#[async_trait]
impl ScopeRoot for MemoryInner {
    async fn get(&self, key: &str) -> Result<String> {
        self.dispatcher.ensure_open()?;
        let state = self.store.state.lock();
        state
            .live(key)
            .map(|e| String::from_utf8_lossy(&e.value).into_owned())
            .ok_or_else(|| RegistryError::not_found(key))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.dispatcher.ensure_open()?;
        self.store.put(key, value.as_bytes().to_vec());
        Ok(())
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

/// 内存注册中心
pub struct MemoryRegistry {
    inner: Arc<MemoryInner>,
    values: ScopedValues<MemoryInner>,
}

impl MemoryRegistry {
    pub fn new(options: MemoryOptions) -> Self {
        let inner = Arc::new(MemoryInner {
            store: Arc::new(MemoryStore::new()),
            dispatcher: Dispatcher::new(options.queue_capacity),
            wait: options.wait,
        });
        Self {
            values: ScopedValues::new(inner.clone(), ""),
            inner,
        }
    }

    /// 强制使实例的存活租约失效，之后的健康检查返回 `NotReady`
    pub fn revoke_lease(&self, id: &ServiceID) -> Result<()> {
        let key = id.key();
        let mut state = self.inner.store.state.lock();
        if state.live(&key).is_none() {
            return Err(RegistryError::not_found(key));
        }
        match state.leases.get_mut(&key) {
            Some(lease) => lease.revoked = true,
            None => {
                let mut lease = Lease::new(Duration::ZERO);
                lease.revoked = true;
                state.leases.insert(key.clone(), lease);
            }
        }
        debug!(key = %key, "lease revoked");
        Ok(())
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new(MemoryOptions::default())
    }
}

delegate_value_client!(MemoryRegistry);

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, service: &Service) -> Result<()> {
        self.inner.dispatcher.ensure_open()?;
        let key = service.id().key();
        let info = ServiceInfo::from_service(service);
        let payload =
            serde_json::to_vec(&info).map_err(|e| RegistryError::Encode(e.to_string()))?;

        let mut state = self.inner.store.state.lock();
        let index = state.put(&key, payload);
        if service.check.ttl.is_zero() {
            state.leases.remove(&key);
        } else {
            state.leases.insert(key.clone(), Lease::new(service.check.ttl));
        }
        drop(state);
        self.inner.store.notify(index);

        info!(key = %key, "service registered");
        Ok(())
    }

    async fn deregister(&self, id: &ServiceID) -> Result<()> {
        self.inner.dispatcher.ensure_open()?;
        let key = id.key();
        self.inner.store.state.lock().leases.remove(&key);
        if self.inner.store.delete(&key).is_some() {
            info!(key = %key, "service deregistered");
        }
        Ok(())
    }

    async fn discover(&self, prefix: &ServicePrefix, ttl: Duration) -> Result<Vec<ServiceInfo>> {
        self.inner.dispatcher.ensure_open()?;
        let path = prefix.path();
        let state = self.inner.store.state.lock();

        let mut found = Vec::new();
        for (key, entry) in state
            .entries
            .range(path.clone()..)
            .take_while(|(k, _)| k.starts_with(&path))
            .filter(|(_, e)| !e.deleted)
        {
            let info: ServiceInfo = match serde_json::from_slice(&entry.value) {
                Ok(info) => info,
                Err(e) => {
                    debug!(key = %key, error = %e, "skipping undecodable service entry");
                    continue;
                }
            };
            if !prefix.matches(&info) {
                continue;
            }
            let alive = match state.leases.get(key) {
                Some(lease) => lease.is_alive(),
                None => !info.is_stale(ttl),
            };
            if alive {
                found.push(info);
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
        let mut state = self.inner.store.state.lock();

        let raw = state
            .live(&key)
            .map(|e| e.value.clone())
            .ok_or_else(|| RegistryError::not_found(key.clone()))?;
        let lease = state
            .leases
            .get_mut(&key)
            .ok_or_else(|| RegistryError::not_ready(format!("{}: no lease", key)))?;
        if !lease.is_alive() {
            return Err(RegistryError::not_ready(format!("{}: lease expired", key)));
        }
        lease.expires_at = Instant::now() + lease.ttl;

        let mut info: ServiceInfo = serde_json::from_slice(&raw)?;
        info.touch();
        let payload =
            serde_json::to_vec(&info).map_err(|e| RegistryError::Encode(e.to_string()))?;
        let index = state.put(&key, payload);
        drop(state);
        self.inner.store.notify(index);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.dispatcher.is_shutdown() {
            info!("closing memory registry");
        }
        self.inner.dispatcher.shutdown().await;
        Ok(())
    }
}
