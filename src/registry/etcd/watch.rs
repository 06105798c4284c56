//! etcd 事件流监听循环
//!
//! 订阅时立即打开原生 watch 流，分发任务把所有流合并后逐批投递事件。

use crate::value::{Value, ValueSetter};
use etcd_client::{EventType, WatchResponse, WatchStream, Watcher};
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 一个已打开的 watch 流及其接收方
pub(crate) struct EtcdWatch {
    key: String,
    sink: Arc<dyn ValueSetter>,
    // 持有 watcher，流才不会被服务端取消
    _watcher: Watcher,
    stream: WatchStream,
}

impl EtcdWatch {
    pub fn new(
        key: String,
        sink: Arc<dyn ValueSetter>,
        watcher: Watcher,
        stream: WatchStream,
    ) -> Self {
        Self {
            key,
            sink,
            _watcher: watcher,
            stream,
        }
    }
}

struct Batch {
    key: String,
    sink: Arc<dyn ValueSetter>,
    response: WatchResponse,
}

/// 把订阅展开成批次流；流结束或出错时该订阅被丢弃
fn into_batches(watch: EtcdWatch) -> BoxStream<'static, Batch> {
    stream::unfold(Some(watch), |state| async move {
        let mut watch = state?;
        match watch.stream.message().await {
            Ok(Some(response)) => {
                let batch = Batch {
                    key: watch.key.clone(),
                    sink: watch.sink.clone(),
                    response,
                };
                Some((batch, Some(watch)))
            }
            Ok(None) => {
                debug!(key = %watch.key, "etcd watch stream closed");
                None
            }
            Err(e) => {
                warn!(key = %watch.key, error = %e, "etcd watch stream failed, dropping subscription");
                None
            }
        }
    })
    .boxed()
}

fn deliver(batch: Batch) {
    if batch.response.canceled() {
        warn!(key = %batch.key, reason = %batch.response.cancel_reason(), "etcd watch cancelled by server");
    }
    for event in batch.response.events() {
        let Some(kv) = event.kv() else { continue };
        let key = String::from_utf8_lossy(kv.key());
        let value = match event.event_type() {
            EventType::Delete => Value::Null,
            EventType::Put => Value::decode(kv.value()),
        };
        debug!(key = %key, revision = kv.mod_revision(), "delivering watched value");
        if let Err(e) = batch.sink.set_value(&key, value) {
            warn!(key = %key, error = %e, "value sink rejected update");
        }
    }
}

/// 分发任务主体
pub(crate) async fn run(mut rx: mpsc::Receiver<EtcdWatch>, shutdown: CancellationToken) {
    let mut streams: SelectAll<BoxStream<'static, Batch>> = SelectAll::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(watch) => streams.push(into_batches(watch)),
                None => break,
            },
            Some(batch) = streams.next(), if !streams.is_empty() => deliver(batch),
        }
    }
    debug!(active = streams.len(), "etcd watcher stopped");
}
