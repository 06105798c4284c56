//! ZooKeeper 监听循环
//!
//! 路由任务按路径分组订阅，每个新路径派生一个监听任务；同一路径的后续订阅
//! 追加接收方，并单独读取一次当前值投递给它。监听任务循环执行：一次性 watch、等待触发或关闭、投递当前值、
//! 休眠 1 秒去抖。

use super::join_path;
use crate::error::{RegistryError, Result};
use crate::value::{Value, ValueSetter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use zookeeper_client::{Client, OneshotWatcher};

/// 两轮监听之间的去抖间隔
const DEBOUNCE: Duration = Duration::from_secs(1);

pub(crate) struct ZkWatch {
    path: String,
    is_prefix: bool,
    sink: Arc<dyn ValueSetter>,
}

impl ZkWatch {
    pub fn key(path: String, sink: Arc<dyn ValueSetter>) -> Self {
        Self {
            path,
            is_prefix: false,
            sink,
        }
    }

    pub fn prefix(path: String, sink: Arc<dyn ValueSetter>) -> Self {
        Self {
            path,
            is_prefix: true,
            sink,
        }
    }
}

type Sinks = Arc<Mutex<Vec<Arc<dyn ValueSetter>>>>;

/// 路由任务主体
///
/// 路径表只增不减：订阅在注册中心关闭前一直有效，每个路径的监听任务也存活到关闭为止。
pub(crate) async fn route(
    client: Client,
    tracker: TaskTracker,
    mut rx: mpsc::Receiver<ZkWatch>,
    shutdown: CancellationToken,
) {
    let mut paths: HashMap<(String, bool), Sinks> = HashMap::new();
    loop {
        let watch = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(watch) => watch,
                None => break,
            },
        };

        let route_key = (watch.path.clone(), watch.is_prefix);
        if let Some(sinks) = paths.get(&route_key) {
            // 监听任务已投递过当前值并在等待下一次变化，新接收方单独补一次当前值
            sinks.lock().push(watch.sink.clone());
            tracker.spawn(deliver_current(client.clone(), watch, shutdown.clone()));
            continue;
        }

        let sinks: Sinks = Arc::new(Mutex::new(vec![watch.sink]));
        paths.insert(route_key, sinks.clone());
        debug!(path = %watch.path, prefix = watch.is_prefix, "starting zookeeper path watcher");
        tracker.spawn(watch_path(
            client.clone(),
            watch.path,
            watch.is_prefix,
            sinks,
            shutdown.clone(),
        ));
    }
    debug!(paths = paths.len(), "zookeeper watch router stopped");
}

/// 向新加入的接收方投递当前值；节点不存在时不投递，由路径监听任务在创建后投递
async fn deliver_current(client: Client, watch: ZkWatch, shutdown: CancellationToken) {
    let read = async {
        if watch.is_prefix {
            read_children(&client, &watch.path).await
        } else {
            match client.get_data(&watch.path).await {
                Ok((data, _stat)) => Ok(vec![(watch.path.clone(), data)]),
                Err(zookeeper_client::Error::NoNode) => Ok(Vec::new()),
                Err(e) => Err(RegistryError::from(e)),
            }
        }
    };

    let entries = tokio::select! {
        _ = shutdown.cancelled() => return,
        entries = read => entries,
    };
    match entries {
        Ok(entries) => {
            let targets = [watch.sink];
            for (path, data) in entries {
                deliver(&targets, &path, &data);
            }
        }
        Err(e) => warn!(path = %watch.path, error = %e, "failed to read current value for new subscriber"),
    }
}

async fn watch_path(
    client: Client,
    path: String,
    is_prefix: bool,
    sinks: Sinks,
    shutdown: CancellationToken,
) {
    while !shutdown.is_cancelled() {
        let armed = if is_prefix {
            watch_children(&client, &path, &sinks).await
        } else {
            watch_node(&client, &path, &sinks).await
        };

        match armed {
            Ok(watcher) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = watcher.changed() => {
                        debug!(path = %path, event = ?event.event_type, "zookeeper watch fired");
                    }
                }
            }
            Err(e) => warn!(path = %path, error = %e, "zookeeper watch failed"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(DEBOUNCE) => {}
        }
    }
    debug!(path = %path, "zookeeper path watcher stopped");
}

/// 读取节点并设置数据 watch；节点不存在时设置存在性 watch 等待创建
async fn watch_node(client: &Client, path: &str, sinks: &Sinks) -> Result<OneshotWatcher> {
    match client.get_and_watch_data(path).await {
        Ok((data, _stat, watcher)) => {
            deliver(&sinks.lock().clone(), path, &data);
            Ok(watcher)
        }
        Err(zookeeper_client::Error::NoNode) => wait_creation(client, path).await,
        Err(e) => Err(e.into()),
    }
}

/// 列出子节点并设置子节点 watch，逐个投递子节点的当前值
async fn watch_children(client: &Client, path: &str, sinks: &Sinks) -> Result<OneshotWatcher> {
    let (children, watcher) = match client.list_and_watch_children(path).await {
        Ok(listed) => listed,
        Err(zookeeper_client::Error::NoNode) => return wait_creation(client, path).await,
        Err(e) => return Err(e.into()),
    };

    let targets = sinks.lock().clone();
    for (child_path, data) in read_each(client, path, children).await {
        deliver(&targets, &child_path, &data);
    }
    Ok(watcher)
}

/// 读取前缀下所有子节点的当前值，前缀节点不存在时返回空
async fn read_children(client: &Client, path: &str) -> Result<Vec<(String, Vec<u8>)>> {
    match client.list_children(path).await {
        Ok(children) => Ok(read_each(client, path, children).await),
        Err(zookeeper_client::Error::NoNode) => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// 逐个读取子节点，读取期间被删除的子节点跳过
async fn read_each(client: &Client, path: &str, children: Vec<String>) -> Vec<(String, Vec<u8>)> {
    let mut entries = Vec::with_capacity(children.len());
    for child in children {
        let child_path = join_path(path, &child);
        match client.get_data(&child_path).await {
            Ok((data, _stat)) => entries.push((child_path, data)),
            Err(zookeeper_client::Error::NoNode) => {}
            Err(e) => {
                let e: RegistryError = e.into();
                debug!(path = %child_path, error = %e, "failed to read watched child");
            }
        }
    }
    entries
}

async fn wait_creation(client: &Client, path: &str) -> Result<OneshotWatcher> {
    let (_stat, watcher) = client.check_and_watch_stat(path).await?;
    Ok(watcher)
}

fn deliver(targets: &[Arc<dyn ValueSetter>], path: &str, data: &[u8]) {
    for sink in targets {
        if let Err(e) = sink.set_value(path, Value::decode(data)) {
            warn!(path = %path, error = %e, "value sink rejected update");
        }
    }
}
