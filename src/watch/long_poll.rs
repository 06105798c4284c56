//! 基于版本索引的长轮询监听循环
//!
//! 单个后台任务持有全部订阅，轮流对每个订阅发起一次带索引的阻塞读取，
//! 同一时刻最多只有一个进行中的后端调用。索引变化时投递，未变化时不投递。

use crate::error::Result;
use crate::value::{Value, ValueSetter};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 单轮监听的默认阻塞窗口
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(10);

/// 出错后再次轮询前的等待时间
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// 一次阻塞读取的结果
#[derive(Debug, Default)]
pub struct PollResult {
    /// 后端返回的版本索引
    pub index: u64,
    /// 命中的键和原始值
    pub entries: Vec<(String, Vec<u8>)>,
}

/// 支持“有变化才返回”阻塞读取的后端
///
/// `index` 为零时必须立即返回当前状态；否则阻塞到版本不再等于 `index`
/// 或 `wait` 超时为止。
#[async_trait]
pub trait LongPollSource: Send + Sync + 'static {
    async fn poll_key(&self, key: &str, index: u64, wait: Duration) -> Result<PollResult>;

    async fn poll_prefix(&self, prefix: &str, index: u64, wait: Duration) -> Result<PollResult>;
}

/// 一个订阅及其游标
pub(crate) struct PollWatch {
    sink: Arc<dyn ValueSetter>,
    key: String,
    is_prefix: bool,
    wait_index: u64,
}

impl PollWatch {
    pub fn key(key: String, sink: Arc<dyn ValueSetter>) -> Self {
        Self {
            sink,
            key,
            is_prefix: false,
            wait_index: 0,
        }
    }

    pub fn prefix(prefix: String, sink: Arc<dyn ValueSetter>) -> Self {
        Self {
            sink,
            key: prefix,
            is_prefix: true,
            wait_index: 0,
        }
    }
}

/// 监听循环主体，由分发器在第一次订阅时启动
pub(crate) async fn run<S: LongPollSource + ?Sized>(
    source: Arc<S>,
    mut rx: mpsc::Receiver<PollWatch>,
    shutdown: CancellationToken,
    wait: Duration,
) {
    let mut queue: VecDeque<PollWatch> = VecDeque::new();
    loop {
        while let Ok(watch) = rx.try_recv() {
            queue.push_back(watch);
        }

        let mut watch = match queue.pop_front() {
            Some(watch) => watch,
            None => tokio::select! {
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(watch) => watch,
                    None => break,
                },
            },
        };

        let healthy = tokio::select! {
            _ = shutdown.cancelled() => break,
            healthy = poll_once(source.as_ref(), &mut watch, wait) => healthy,
        };

        if !healthy {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(ERROR_BACKOFF) => {}
            }
        }

        if shutdown.is_cancelled() {
            break;
        }
        queue.push_back(watch);
    }
    debug!(pending = queue.len(), "long-poll watcher stopped");
}

/// 处理一个订阅的一轮轮询，返回本轮是否成功
async fn poll_once<S: LongPollSource + ?Sized>(
    source: &S,
    watch: &mut PollWatch,
    wait: Duration,
) -> bool {
    let polled = if watch.is_prefix {
        source.poll_prefix(&watch.key, watch.wait_index, wait).await
    } else {
        source.poll_key(&watch.key, watch.wait_index, wait).await
    };

    let polled = match polled {
        Ok(polled) => polled,
        Err(e) => {
            if e.is_retryable() {
                debug!(key = %watch.key, "resetting watch index after retryable error");
                watch.wait_index = 0;
            }
            warn!(key = %watch.key, error = %e, "watch poll failed");
            return false;
        }
    };

    if polled.index == watch.wait_index {
        return true;
    }
    watch.wait_index = polled.index;

    for (key, raw) in polled.entries {
        let value = Value::decode(&raw);
        debug!(key = %key, index = polled.index, "delivering watched value");
        if let Err(e) = watch.sink.set_value(&key, value) {
            warn!(key = %key, error = %e, "value sink rejected update");
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::value::ValueSetterFn;
    use parking_lot::Mutex;

    /// 按脚本依次返回结果并记录每次调用携带的索引；脚本用完后阻塞一个窗口并报告未变化
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<PollResult>>>,
        seen: Mutex<Vec<u64>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<PollResult>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen: Mutex::default(),
            }
        }

        fn seen(&self) -> Vec<u64> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl LongPollSource for ScriptedSource {
        async fn poll_key(&self, _key: &str, index: u64, wait: Duration) -> Result<PollResult> {
            self.seen.lock().push(index);
            let next = self.script.lock().pop_front();
            match next {
                Some(result) => result,
                None => {
                    tokio::time::sleep(wait).await;
                    Ok(PollResult {
                        index,
                        entries: Vec::new(),
                    })
                }
            }
        }

        async fn poll_prefix(&self, prefix: &str, index: u64, wait: Duration) -> Result<PollResult> {
            self.poll_key(prefix, index, wait).await
        }
    }

    fn at(index: u64, value: &str) -> Result<PollResult> {
        Ok(PollResult {
            index,
            entries: vec![("cfg/k".to_string(), value.as_bytes().to_vec())],
        })
    }

    fn counting_watch() -> (PollWatch, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = ValueSetterFn::shared(move |_key: &str, value: Value| {
            let _ = tx.send(value);
            Ok(())
        });
        (PollWatch::key("cfg/k".to_string(), sink), rx)
    }

    #[tokio::test]
    async fn test_retryable_error_resets_index() {
        let source = ScriptedSource::new(vec![
            at(5, "1"),
            Err(RegistryError::unavailable("connection refused")),
            at(5, "1"),
        ]);
        let (mut watch, mut rx) = counting_watch();
        let wait = Duration::from_millis(10);

        assert!(poll_once(&source, &mut watch, wait).await);
        assert_eq!(watch.wait_index, 5);

        assert!(!poll_once(&source, &mut watch, wait).await);
        assert_eq!(watch.wait_index, 0);

        // 游标归零后同一索引视为新状态，重新投递
        assert!(poll_once(&source, &mut watch, wait).await);
        assert_eq!(watch.wait_index, 5);

        assert_eq!(source.seen(), vec![0, 5, 0]);
        assert_eq!(rx.try_recv().unwrap(), Value::from(1i64));
        assert_eq!(rx.try_recv().unwrap(), Value::from(1i64));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_non_retryable_error_keeps_index() {
        let source = ScriptedSource::new(vec![
            at(5, "1"),
            Err(RegistryError::transport("bad response")),
        ]);
        let (mut watch, mut rx) = counting_watch();
        let wait = Duration::from_millis(10);

        assert!(poll_once(&source, &mut watch, wait).await);
        assert!(!poll_once(&source, &mut watch, wait).await);
        assert_eq!(watch.wait_index, 5);

        // 脚本用完，后端报告索引未变化，不重复投递
        assert!(poll_once(&source, &mut watch, wait).await);
        assert_eq!(source.seen(), vec![0, 5, 5]);
        assert_eq!(rx.try_recv().unwrap(), Value::from(1i64));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_loop_continues_after_error() {
        let source = Arc::new(ScriptedSource::new(vec![
            Err(RegistryError::timeout("deadline exceeded")),
            at(3, "42"),
        ]));
        let (watch, mut rx) = counting_watch();
        let (tx, watch_rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(run(
            source.clone(),
            watch_rx,
            shutdown.clone(),
            Duration::from_millis(50),
        ));
        tx.send(watch).await.unwrap();

        let value = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("delivery after backoff")
            .expect("sink dropped");
        assert_eq!(value, Value::from(42i64));
        assert_eq!(source.seen()[..2], [0, 0]);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher stops on shutdown")
            .unwrap();
    }
}
