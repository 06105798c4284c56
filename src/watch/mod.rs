//! 订阅/监听引擎
//!
//! - [`dispatcher`]：每个根注册中心共享的订阅队列、一次性启动闩锁与关闭信号
//! - [`long_poll`]：基于版本索引的长轮询循环（Consul、内存后端）
//!
//! 事件流（etcd）与一次性 watch + 轮询（ZooKeeper）的循环位于各自的驱动模块中。

pub(crate) mod dispatcher;
pub mod long_poll;

pub use dispatcher::DEFAULT_QUEUE_CAPACITY;
pub use long_poll::{DEFAULT_WAIT_TIME, LongPollSource, PollResult};
