//! 订阅值接收方

use super::Value;
use crate::error::Result;
use std::sync::Arc;

/// 订阅值接收方
///
/// 后端在后台监听循环中调用 `set_value`，可能被调用多次；
/// 返回的错误只会被记录，不会中断监听循环。
pub trait ValueSetter: Send + Sync {
    fn set_value(&self, key: &str, value: Value) -> Result<()>;
}

/// 持有最新值的接收方
pub trait Valuer<T>: ValueSetter {
    fn value(&self) -> T;
}

/// 允许把普通闭包当作 [`ValueSetter`] 使用
///
/// ```
/// use cloud_registry::{Value, ValueSetter, ValueSetterFn};
///
/// let setter = ValueSetterFn::new(|key: &str, value: Value| {
///     println!("{key} = {value}");
///     Ok(())
/// });
/// setter.set_value("config/limit", Value::from(10i64)).unwrap();
/// ```
pub struct ValueSetterFn<F>(F);

impl<F> ValueSetterFn<F>
where
    F: Fn(&str, Value) -> Result<()> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ValueSetterFn<F>
where
    F: Fn(&str, Value) -> Result<()> + Send + Sync + 'static,
{
    /// 包装为可共享的订阅方
    pub fn shared(f: F) -> Arc<dyn ValueSetter> {
        Arc::new(Self(f))
    }
}

impl<F> ValueSetter for ValueSetterFn<F>
where
    F: Fn(&str, Value) -> Result<()> + Send + Sync,
{
    fn set_value(&self, key: &str, value: Value) -> Result<()> {
        (self.0)(key, value)
    }
}

impl<T: ValueSetter + ?Sized> ValueSetter for Arc<T> {
    fn set_value(&self, key: &str, value: Value) -> Result<()> {
        (**self).set_value(key, value)
    }
}
