//! 内存注册中心契约测试
//!
//! 内存后端与其他后端共享同一套语义（注册、发现、健康检查、分层 KV、订阅、关闭），
//! 这里用它验证与后端无关的行为。

use cloud_registry::{
    CancellationToken, Check, ErrorCode, FromValue, MemoryOptions, MemoryRegistry, Registry, RegistryError,
    Service, ServiceID, ServicePrefix, Value, ValueClient, ValueSetterFn,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const TTL: Duration = Duration::from_secs(10);
const RECV_TIMEOUT: Duration = Duration::from_secs(3);

fn create_registry() -> MemoryRegistry {
    MemoryRegistry::new(MemoryOptions::default().with_wait(Duration::from_millis(200)))
}

fn example_service() -> Service {
    Service::new("example", "localhost", 8080)
        .with_instance_id("example-42")
        .with_check(Check::ttl(TTL))
}

/// 把投递的值转发到通道，便于断言顺序
fn channel_sink() -> (
    std::sync::Arc<dyn cloud_registry::ValueSetter>,
    mpsc::UnboundedReceiver<(String, Value)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = ValueSetterFn::shared(move |key: &str, value: Value| {
        let _ = tx.send((key.to_string(), value));
        Ok(())
    });
    (sink, rx)
}

async fn next_delivery(rx: &mut mpsc::UnboundedReceiver<(String, Value)>) -> (String, Value) {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("sink dropped")
}

#[tokio::test]
async fn test_register_discover_deregister() {
    let registry = create_registry();
    let service = example_service();

    registry.register(&service).await.unwrap();

    let found = registry.discover(&service.prefix(), TTL).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "example");
    assert_eq!(found[0].instance_id, "example-42");
    assert_eq!(found[0].port, 8080);
    assert_eq!(found[0].hostname, "localhost");

    registry.health_check(&service.id(), TTL).await.unwrap();

    registry.deregister(&service.id()).await.unwrap();
    let err = registry.discover(&service.prefix(), TTL).await.unwrap_err();
    assert!(err.is_not_found());
    let err = registry.health_check(&service.id(), TTL).await.unwrap_err();
    assert!(err.is_not_found());

    // 重复注销不是错误
    registry.deregister(&service.id()).await.unwrap();
    registry.close().await.unwrap();
}

#[tokio::test]
async fn test_register_overwrites_and_discovers_all_instances() {
    let registry = create_registry();
    let first = example_service();
    let second = Service::new("example", "10.0.0.2", 9090).with_check(Check::ttl(TTL));
    let other = Service::new("example-admin", "10.0.0.3", 7070).with_check(Check::ttl(TTL));

    registry.register(&first).await.unwrap();
    registry.register(&first.clone().with_tag("v2")).await.unwrap();
    registry.register(&second).await.unwrap();
    registry.register(&other).await.unwrap();

    let mut found = registry
        .discover(&ServicePrefix::new("example"), TTL)
        .await
        .unwrap();
    found.sort_by(|a, b| a.port.cmp(&b.port));
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].tags, vec!["v2".to_string()]);
    assert_eq!(found[1].port, 9090);
}

#[tokio::test]
async fn test_discover_unknown_service() {
    let registry = create_registry();
    let err = registry
        .discover(&ServicePrefix::new("missing"), TTL)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_health_check_not_ready() {
    let registry = create_registry();

    let no_ttl = Service::new("worker", "localhost", 1).with_instance_id("worker-1");
    registry.register(&no_ttl).await.unwrap();
    let err = registry.health_check(&no_ttl.id(), TTL).await.unwrap_err();
    assert!(err.is_not_ready(), "{err}");

    let service = example_service();
    registry.register(&service).await.unwrap();
    registry.health_check(&service.id(), TTL).await.unwrap();

    registry.revoke_lease(&service.id()).unwrap();
    let err = registry.health_check(&service.id(), TTL).await.unwrap_err();
    assert!(err.is_not_ready(), "{err}");

    let missing = ServiceID::new("example", "example-0");
    assert!(registry.revoke_lease(&missing).unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_lease_expiry_hides_instance() {
    let registry = create_registry();
    let service = Service::new("short", "localhost", 1)
        .with_instance_id("short-1")
        .with_check(Check::ttl(Duration::from_millis(100)));
    registry.register(&service).await.unwrap();
    assert_eq!(registry.discover(&service.prefix(), TTL).await.unwrap().len(), 1);

    sleep(Duration::from_millis(250)).await;

    assert!(registry
        .discover(&service.prefix(), TTL)
        .await
        .unwrap_err()
        .is_not_found());
    assert!(registry
        .health_check(&service.id(), TTL)
        .await
        .unwrap_err()
        .is_not_ready());

    // 重新注册恢复租约
    registry.register(&service).await.unwrap();
    registry.health_check(&service.id(), TTL).await.unwrap();
}

#[tokio::test]
async fn test_value_round_trip() {
    let registry = create_registry();
    let samples = ["", "plain", "héllo 世界", r#"{"a":[1,2],"b":null}"#];

    for (i, sample) in samples.iter().enumerate() {
        let key = format!("round/{}", i);
        registry.set_value(&key, sample).await.unwrap();
        assert_eq!(registry.value(&key).await.unwrap(), *sample);
    }

    let err = registry.value("round/missing").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_scoped_values() {
    let registry = create_registry();
    assert_eq!(registry.scope(), "");

    let child = registry.values(&["a/"]);
    assert_eq!(child.scope(), "a/");
    child.set_value("b", "1").await.unwrap();
    assert_eq!(registry.value("a/b").await.unwrap(), "1");
    assert_eq!(child.value("b").await.unwrap(), "1");

    let nested = child.values(&["x/", "y/"]);
    assert_eq!(nested.scope(), "a/x/y/");
    nested.set_value("z", "deep").await.unwrap();
    assert_eq!(registry.value("a/x/y/z").await.unwrap(), "deep");

    assert_eq!(child.values(&[]).scope(), "a/");
}

#[tokio::test]
async fn test_subscribe_delivers_in_order_without_duplicates() {
    let registry = create_registry();
    let cancel = CancellationToken::new();
    let (sink, mut rx) = channel_sink();

    registry
        .subscribe_value(&cancel, "config/limit", sink)
        .await
        .unwrap();

    // 不存在的键不投递
    sleep(Duration::from_millis(300)).await;
    assert!(rx.try_recv().is_err());

    registry.set_value("config/limit", "1").await.unwrap();
    let (key, value) = next_delivery(&mut rx).await;
    assert_eq!(key, "config/limit");
    assert_eq!(value, Value::from(1i64));

    // 阻塞窗口超时后没有变化，不能重复投递
    sleep(Duration::from_millis(500)).await;
    assert!(rx.try_recv().is_err());

    registry.set_value("config/limit", "2").await.unwrap();
    let (_, value) = next_delivery(&mut rx).await;
    assert_eq!(value, Value::from(2i64));

    registry.close().await.unwrap();
}

#[tokio::test]
async fn test_burst_of_writes_converges_to_last_value() {
    let registry = create_registry();
    let (sink, mut rx) = channel_sink();
    registry
        .subscribe_value(&CancellationToken::new(), "burst", sink)
        .await
        .unwrap();

    for i in 0..50 {
        registry.set_value("burst", &i.to_string()).await.unwrap();
    }

    // 中间值可以合并，但投递序列不能回退，且最终停在最后一次写入
    let mut delivered = Vec::new();
    while delivered.last() != Some(&49) {
        let (_, value) = next_delivery(&mut rx).await;
        delivered.push(i64::from_value(&value).unwrap());
    }
    assert!(delivered.windows(2).all(|w| w[0] <= w[1]), "{delivered:?}");

    sleep(Duration::from_millis(500)).await;
    assert!(rx.try_recv().is_err());

    registry.close().await.unwrap();
    let closed = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap();
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_subscribe_existing_value_delivered_first() {
    let registry = create_registry();
    registry.set_value("greeting", "hello").await.unwrap();

    let (sink, mut rx) = channel_sink();
    registry
        .subscribe_value(&CancellationToken::new(), "greeting", sink)
        .await
        .unwrap();

    let (key, value) = next_delivery(&mut rx).await;
    assert_eq!(key, "greeting");
    assert_eq!(value, Value::from("hello"));
    registry.close().await.unwrap();
}

#[tokio::test]
async fn test_subscribe_prefix_through_scope() {
    let registry = create_registry();
    registry.set_value("example/a", "1").await.unwrap();
    registry.set_value("example/b", r#"{"on":true}"#).await.unwrap();

    let (sink, mut rx) = channel_sink();
    let scoped = registry.values(&["example/"]);
    scoped
        .subscribe_value_with_prefix(&CancellationToken::new(), "", sink)
        .await
        .unwrap();

    let (first, _) = next_delivery(&mut rx).await;
    let (second, value) = next_delivery(&mut rx).await;
    assert_eq!(first, "example/a");
    assert_eq!(second, "example/b");
    assert_eq!(value, Value::Structured(serde_json::json!({"on": true})));

    scoped.set_value("c", "3").await.unwrap();
    let mut keys = Vec::new();
    for _ in 0..3 {
        keys.push(next_delivery(&mut rx).await.0);
    }
    assert!(keys.contains(&"example/c".to_string()));
    registry.close().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_subscription_request() {
    let registry = create_registry();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (sink, _rx) = channel_sink();
    let err = registry
        .subscribe_value(&cancel, "any", sink)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Cancelled));
}

#[tokio::test]
async fn test_close_stops_delivery_and_rejects_operations() {
    let registry = create_registry();
    let child = registry.values(&["cfg/"]);
    let (sink, mut rx) = channel_sink();

    child.set_value("k", "v1").await.unwrap();
    child
        .subscribe_value(&CancellationToken::new(), "k", sink)
        .await
        .unwrap();
    next_delivery(&mut rx).await;

    registry.close().await.unwrap();
    // 后台任务退出后接收方被释放
    let closed = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap();
    assert!(closed.is_none());

    // 可重复关闭
    registry.close().await.unwrap();

    let service = example_service();
    let (sink, _rx) = channel_sink();
    let errors = [
        registry.register(&service).await.unwrap_err(),
        registry.deregister(&service.id()).await.unwrap_err(),
        registry.discover(&service.prefix(), TTL).await.unwrap_err(),
        registry.health_check(&service.id(), TTL).await.unwrap_err(),
        registry.value("cfg/k").await.unwrap_err(),
        registry.set_value("cfg/k", "v2").await.unwrap_err(),
        child.set_value("k", "v2").await.unwrap_err(),
        child
            .subscribe_value(&CancellationToken::new(), "k", sink)
            .await
            .unwrap_err(),
    ];
    for err in errors {
        assert_eq!(err.code(), ErrorCode::RegistryClosed, "{err}");
    }
}
