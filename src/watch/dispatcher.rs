//! 订阅分发器
//!
//! 每个根注册中心持有一个分发器：一个有界的订阅请求队列、一个只启动一次的
//! 后台监听任务、一个广播式关闭信号，以及对所有后台任务的跟踪。
//! 作用域子句柄共享同一个分发器。

use crate::error::{RegistryError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Once;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// 订阅请求队列默认容量
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

pub(crate) struct Dispatcher<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<Option<mpsc::Receiver<T>>>,
    started: Once,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl<T: Send + 'static> Dispatcher<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            started: Once::new(),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.is_shutdown() {
            Err(RegistryError::Closed)
        } else {
            Ok(())
        }
    }

    /// 启动后台监听任务，每个分发器至多启动一次
    pub fn start_once<F, Fut>(&self, worker: F)
    where
        F: FnOnce(mpsc::Receiver<T>, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutdown() {
            return;
        }
        self.started.call_once(|| {
            if let Some(rx) = self.rx.lock().take() {
                debug!("starting watch dispatcher");
                self.tracker.spawn(worker(rx, self.shutdown.clone()));
            }
        });
    }

    /// 在跟踪下派生辅助任务（续约、逐路径监听等），关闭时会等待它们退出
    pub fn spawn<Fut>(&self, task: Fut) -> JoinHandle<()>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// 任务跟踪器，供后台任务自行派生子任务
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// 把订阅请求放入队列
    ///
    /// 队列满时等待；关闭信号或调用方取消都会中止等待
    pub async fn enqueue(&self, cancel: &CancellationToken, item: T) -> Result<()> {
        self.ensure_open()?;
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(RegistryError::Closed),
            _ = cancel.cancelled() => Err(RegistryError::Cancelled),
            sent = self.tx.send(item) => sent.map_err(|_| RegistryError::Closed),
        }
    }

    /// 广播关闭信号并等待所有后台任务退出；可重复调用
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
