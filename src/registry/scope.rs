//! 作用域句柄
//!
//! 作用域句柄只持有根状态的引用和自身前缀，所有订阅都直接进入根的分发器，
//! 不存在父链遍历。作用域句柄只暴露 KV 能力，不能关闭根注册中心。

use super::trait_def::ValueClient;
use crate::error::Result;
use crate::value::ValueSetter;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 根注册中心共享给作用域句柄的 KV 能力，所有键均为完整键
#[async_trait]
pub(crate) trait ScopeRoot: Send + Sync + 'static {
    /// 计算作用域前缀，默认直接拼接
    fn extend_scope(&self, current: &str, extra: &[&str]) -> String {
        let mut scope = current.to_string();
        for part in extra {
            scope.push_str(part);
        }
        scope
    }

    /// 计算作用域内的完整键，默认直接拼接
    fn full_key(&self, scope: &str, name: &str) -> String {
        format!("{}{}", scope, name)
    }

    async fn get(&self, key: &str) -> Result<String>;

    async fn put(&self, key: &str, value: &str) -> Result<()>;

    async fn watch_key(
        &self,
        cancel: &CancellationToken,
        key: String,
        sink: Arc<dyn ValueSetter>,
    ) -> Result<()>;

    async fn watch_prefix(
        &self,
        cancel: &CancellationToken,
        prefix: String,
        sink: Arc<dyn ValueSetter>,
    ) -> Result<()>;
}

/// 作用域 KV 客户端
pub(crate) struct ScopedValues<R> {
    root: Arc<R>,
    scope: String,
}

impl<R> Clone for ScopedValues<R> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<R> ScopedValues<R> {
    pub(crate) fn new(root: Arc<R>, scope: impl Into<String>) -> Self {
        Self {
            root,
            scope: scope.into(),
        }
    }
}

#[async_trait]
impl<R: ScopeRoot> ValueClient for ScopedValues<R> {
    fn scope(&self) -> &str {
        &self.scope
    }

    fn values(&self, prefix: &[&str]) -> Box<dyn ValueClient> {
        if prefix.is_empty() {
            return Box::new(self.clone());
        }
        Box::new(ScopedValues {
            root: self.root.clone(),
            scope: self.root.extend_scope(&self.scope, prefix),
        })
    }

    async fn value(&self, name: &str) -> Result<String> {
        self.root.get(&self.root.full_key(&self.scope, name)).await
    }

    async fn set_value(&self, name: &str, value: &str) -> Result<()> {
        self.root
            .put(&self.root.full_key(&self.scope, name), value)
            .await
    }

    async fn subscribe_value(
        &self,
        cancel: &CancellationToken,
        name: &str,
        sink: Arc<dyn ValueSetter>,
    ) -> Result<()> {
        let key = self.root.full_key(&self.scope, name);
        self.root.watch_key(cancel, key, sink).await
    }

    async fn subscribe_value_with_prefix(
        &self,
        cancel: &CancellationToken,
        prefix: &str,
        sink: Arc<dyn ValueSetter>,
    ) -> Result<()> {
        let key = self.root.full_key(&self.scope, prefix);
        self.root.watch_prefix(cancel, key, sink).await
    }
}

/// 为根注册中心生成委托给 `self.values` 的 [`ValueClient`] 实现
macro_rules! delegate_value_client {
    ($registry:ty) => {
        #[async_trait::async_trait]
        impl $crate::registry::ValueClient for $registry {
            fn scope(&self) -> &str {
                self.values.scope()
            }

            fn values(&self, prefix: &[&str]) -> Box<dyn $crate::registry::ValueClient> {
                self.values.values(prefix)
            }

            async fn value(&self, name: &str) -> $crate::error::Result<String> {
                self.values.value(name).await
            }

            async fn set_value(&self, name: &str, value: &str) -> $crate::error::Result<()> {
                self.values.set_value(name, value).await
            }

            async fn subscribe_value(
                &self,
                cancel: &tokio_util::sync::CancellationToken,
                name: &str,
                sink: std::sync::Arc<dyn $crate::value::ValueSetter>,
            ) -> $crate::error::Result<()> {
                self.values.subscribe_value(cancel, name, sink).await
            }

            async fn subscribe_value_with_prefix(
                &self,
                cancel: &tokio_util::sync::CancellationToken,
                prefix: &str,
                sink: std::sync::Arc<dyn $crate::value::ValueSetter>,
            ) -> $crate::error::Result<()> {
                self.values
                    .subscribe_value_with_prefix(cancel, prefix, sink)
                    .await
            }
        }
    };
}

pub(crate) use delegate_value_client;
