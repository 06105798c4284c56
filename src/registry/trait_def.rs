//! 注册中心 Trait 定义

use crate::error::Result;
use crate::types::{Service, ServiceID, ServiceInfo, ServicePrefix};
use crate::value::ValueSetter;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// KV 客户端 Trait
///
/// 所有键都相对于客户端当前的前缀；`values` 返回的作用域客户端与根注册中心
/// 共享连接、订阅队列和关闭信号。
#[async_trait]
pub trait ValueClient: Send + Sync {
    /// 当前作用域前缀
    fn scope(&self) -> &str;

    /// 返回作用域客户端
    ///
    /// 不带前缀时返回同一作用域的句柄；带前缀时作用域为 `当前前缀 + 前缀`
    fn values(&self, prefix: &[&str]) -> Box<dyn ValueClient>;

    /// 读取单个值，不存在时返回 `NotFound`
    async fn value(&self, name: &str) -> Result<String>;

    /// 写入单个值
    async fn set_value(&self, name: &str, value: &str) -> Result<()>;

    /// 订阅单个键
    ///
    /// 请求被接受后立即返回，不等待首次投递；`sink` 在注册中心关闭前
    /// 会被异步调用一次或多次。`cancel` 用于放弃排队中的订阅请求。
    async fn subscribe_value(
        &self,
        cancel: &CancellationToken,
        name: &str,
        sink: Arc<dyn ValueSetter>,
    ) -> Result<()>;

    /// 订阅某个前缀下的所有键，每个变化的子键各投递一次
    async fn subscribe_value_with_prefix(
        &self,
        cancel: &CancellationToken,
        prefix: &str,
        sink: Arc<dyn ValueSetter>,
    ) -> Result<()>;
}

/// 注册中心 Trait
#[async_trait]
pub trait Registry: ValueClient {
    /// 注册服务实例，对同一实例重复调用会覆盖
    async fn register(&self, service: &Service) -> Result<()>;

    /// 注销服务实例，实例不存在不视为错误
    async fn deregister(&self, id: &ServiceID) -> Result<()>;

    /// 发现服务实例，结果为空时返回 `NotFound`
    ///
    /// `ttl` 仅用于没有原生存活机制的后端：超过 `ttl` 未更新的实例被过滤
    async fn discover(&self, prefix: &ServicePrefix, ttl: Duration) -> Result<Vec<ServiceInfo>>;

    /// 健康检查（同时刷新存活状态）
    ///
    /// 实例不存在返回 `NotFound`，存活机制缺失或过期返回 `NotReady`
    async fn health_check(&self, id: &ServiceID, ttl: Duration) -> Result<()>;

    /// 停止所有后台投递并释放连接，可重复调用
    async fn close(&self) -> Result<()>;
}

/// 注册中心（类型别名，便于动态分发）
pub type BoxRegistry = Box<dyn Registry>;
