//! 线程安全的值持有者
//!
//! 订阅某个键后，调用方可以把它当作一个实时更新的标量读取，
//! 无需自己编写回调。转换失败时保留旧值并返回错误。

use super::{FromValue, Value, ValueSetter, Valuer};
use crate::error::Result;
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// 读写锁保护的任意类型值
#[derive(Debug, Default)]
pub struct SyncValue<T> {
    val: RwLock<T>,
}

impl<T> SyncValue<T> {
    pub fn new(val: T) -> Self {
        Self {
            val: RwLock::new(val),
        }
    }
}

impl<T: Clone> SyncValue<T> {
    pub fn value(&self) -> T {
        self.val.read().clone()
    }
}

impl<T> ValueSetter for SyncValue<T>
where
    T: FromValue + Send + Sync,
{
    fn set_value(&self, _key: &str, value: Value) -> Result<()> {
        let converted = T::from_value(&value)?;
        *self.val.write() = converted;
        Ok(())
    }
}

impl<T> Valuer<T> for SyncValue<T>
where
    T: FromValue + Clone + Send + Sync,
{
    fn value(&self) -> T {
        SyncValue::value(self)
    }
}

/// 无锁替换的任意类型值，读多写少时使用
#[derive(Debug)]
pub struct SyncAtomicValue<T> {
    val: ArcSwap<T>,
}

impl<T> SyncAtomicValue<T> {
    pub fn new(val: T) -> Self {
        Self {
            val: ArcSwap::from_pointee(val),
        }
    }

    /// 读取当前值的共享引用，不做拷贝
    pub fn load(&self) -> Arc<T> {
        self.val.load_full()
    }
}

impl<T: Default> Default for SyncAtomicValue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone> SyncAtomicValue<T> {
    pub fn value(&self) -> T {
        T::clone(&self.val.load())
    }
}

impl<T> ValueSetter for SyncAtomicValue<T>
where
    T: FromValue + Send + Sync,
{
    fn set_value(&self, _key: &str, value: Value) -> Result<()> {
        let converted = T::from_value(&value)?;
        self.val.store(Arc::new(converted));
        Ok(())
    }
}

impl<T> Valuer<T> for SyncAtomicValue<T>
where
    T: FromValue + Clone + Send + Sync,
{
    fn value(&self) -> T {
        SyncAtomicValue::value(self)
    }
}

/// 原子 i64 值
#[derive(Debug, Default)]
pub struct SyncInt64Value {
    val: AtomicI64,
}

impl SyncInt64Value {
    pub fn new(val: i64) -> Self {
        Self {
            val: AtomicI64::new(val),
        }
    }

    pub fn value(&self) -> i64 {
        self.val.load(Ordering::Acquire)
    }
}

impl ValueSetter for SyncInt64Value {
    fn set_value(&self, _key: &str, value: Value) -> Result<()> {
        let n = i64::from_value(&value)?;
        self.val.store(n, Ordering::Release);
        Ok(())
    }
}

impl Valuer<i64> for SyncInt64Value {
    fn value(&self) -> i64 {
        SyncInt64Value::value(self)
    }
}

/// 原子 u64 值
#[derive(Debug, Default)]
pub struct SyncUInt64Value {
    val: AtomicU64,
}

impl SyncUInt64Value {
    pub fn new(val: u64) -> Self {
        Self {
            val: AtomicU64::new(val),
        }
    }

    pub fn value(&self) -> u64 {
        self.val.load(Ordering::Acquire)
    }
}

impl ValueSetter for SyncUInt64Value {
    fn set_value(&self, _key: &str, value: Value) -> Result<()> {
        let n = u64::from_value(&value)?;
        self.val.store(n, Ordering::Release);
        Ok(())
    }
}

impl Valuer<u64> for SyncUInt64Value {
    fn value(&self) -> u64 {
        SyncUInt64Value::value(self)
    }
}
