//! 空注册中心：所有操作都成功，但不做任何事

use super::trait_def::{Registry, ValueClient};
use crate::error::Result;
use crate::types::{Service, ServiceID, ServiceInfo, ServicePrefix};
use crate::value::ValueSetter;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 空注册中心
///
/// 发现返回空列表，读取返回空字符串，订阅被接受但永不触发
#[derive(Debug, Clone, Default)]
pub struct DummyRegistry {
    scope: String,
}

impl DummyRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValueClient for DummyRegistry {
    fn scope(&self) -> &str {
        &self.scope
    }

    fn values(&self, prefix: &[&str]) -> Box<dyn ValueClient> {
        Box::new(Self {
            scope: prefix.iter().fold(self.scope.clone(), |mut scope, p| {
                scope.push_str(p);
                scope
            }),
        })
    }

    async fn value(&self, _name: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn set_value(&self, _name: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn subscribe_value(
        &self,
        _cancel: &CancellationToken,
        _name: &str,
        _sink: Arc<dyn ValueSetter>,
    ) -> Result<()> {
        Ok(())
    }

    async fn subscribe_value_with_prefix(
        &self,
        _cancel: &CancellationToken,
        _prefix: &str,
        _sink: Arc<dyn ValueSetter>,
    ) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Registry for DummyRegistry {
    async fn register(&self, _service: &Service) -> Result<()> {
        Ok(())
    }

    async fn deregister(&self, _id: &ServiceID) -> Result<()> {
        Ok(())
    }

    async fn discover(&self, _prefix: &ServicePrefix, _ttl: Duration) -> Result<Vec<ServiceInfo>> {
        Ok(Vec::new())
    }

    async fn health_check(&self, _id: &ServiceID, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
