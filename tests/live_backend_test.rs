//! 真实后端集成测试
//!
//! 这些测试需要运行中的 Consul / etcd / ZooKeeper 实例。
//! 默认情况下，测试会被忽略，需要使用 `cargo test --test live_backend_test -- --ignored` 运行。
//!
//! ```bash
//! docker run -d --name consul-test -p 8500:8500 hashicorp/consul:1.18 agent -dev -client=0.0.0.0
//! docker run -d --name etcd-test -p 2379:2379 quay.io/coreos/etcd:v3.5.9 \
//!   etcd --advertise-client-urls=http://127.0.0.1:2379 --listen-client-urls=http://0.0.0.0:2379
//! docker run -d --name zk-test -p 2181:2181 zookeeper:3.9
//! ```

use cloud_registry::{
    BoxRegistry, CancellationToken, Check, Registry, Service, Value, ValueClient, ValueSetterFn,
    generate_instance_id,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const TTL: Duration = Duration::from_secs(10);

/// 可以通过环境变量 CONSUL_ADDR 覆盖，默认为 127.0.0.1:8500
fn consul_uri() -> String {
    let addr = std::env::var("CONSUL_ADDR").unwrap_or_else(|_| "127.0.0.1:8500".to_string());
    format!("consul://{}?wait=2s", addr)
}

/// 可以通过环境变量 ETCD_ENDPOINTS 覆盖，默认为 127.0.0.1:2379
fn etcd_uri() -> String {
    let endpoints =
        std::env::var("ETCD_ENDPOINTS").unwrap_or_else(|_| "127.0.0.1:2379".to_string());
    let hosts: Vec<&str> = endpoints
        .split(',')
        .map(|e| e.trim().trim_start_matches("http://"))
        .collect();
    format!("etcd://{}?timeout=5s", hosts.join(","))
}

/// 可以通过环境变量 ZK_HOSTS 覆盖，默认为 127.0.0.1:2181
fn zk_uri() -> String {
    let hosts = std::env::var("ZK_HOSTS").unwrap_or_else(|_| "127.0.0.1:2181".to_string());
    format!("zk://{}/cloud-registry-test?timeout=10s", hosts)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cloud_registry=debug")
        .with_test_writer()
        .try_init();
}

/// 与后端无关的完整契约：注册、发现、健康检查、KV、订阅、注销、关闭
async fn run_contract(registry: BoxRegistry) {
    let name = format!("crtest-{}", rand_suffix());
    let service = Service::new(name.as_str(), "127.0.0.1", 8080)
        .with_instance_id(generate_instance_id(&name))
        .with_check(Check::ttl(TTL));

    registry.register(&service).await.expect("register");
    let found = registry
        .discover(&service.prefix(), TTL)
        .await
        .expect("discover");
    assert!(found.iter().any(|s| s.instance_id == service.instance_id));
    println!("discovered {} instance(s) of {}", found.len(), name);

    registry
        .health_check(&service.id(), TTL)
        .await
        .expect("health check");

    let scope = format!("{}/", name);
    let values = registry.values(&[scope.as_str()]);
    values.set_value("key", "v1").await.expect("set value");
    assert_eq!(values.value("key").await.expect("value"), "v1");

    let (tx, mut rx) = mpsc::unbounded_channel();
    values
        .subscribe_value(
            &CancellationToken::new(),
            "key",
            ValueSetterFn::shared(move |key: &str, value: Value| {
                let _ = tx.send((key.to_string(), value));
                Ok(())
            }),
        )
        .await
        .expect("subscribe");

    values.set_value("key", "v2").await.expect("set value");
    let mut latest = None;
    while let Ok(Some((key, value))) = timeout(Duration::from_secs(15), rx.recv()).await {
        println!("delivered {} = {}", key, value);
        let done = value == Value::from("v2");
        latest = Some(value);
        if done {
            break;
        }
    }
    assert_eq!(latest, Some(Value::from("v2")));

    registry
        .deregister(&service.id())
        .await
        .expect("deregister");
    let err = registry
        .health_check(&service.id(), TTL)
        .await
        .expect_err("health check after deregister");
    assert!(err.is_not_found(), "{err}");

    registry.close().await.expect("close");
    assert!(registry.value("anything").await.is_err());
}

fn rand_suffix() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default()
}

#[tokio::test]
#[ignore] // 需要运行中的 Consul agent
async fn test_consul_contract() {
    init_tracing();
    let registry = cloud_registry::connect_uri(&consul_uri())
        .await
        .expect("connect consul");
    run_contract(registry).await;
}

#[tokio::test]
#[ignore] // 需要运行中的 etcd 服务器
async fn test_etcd_contract() {
    init_tracing();
    let registry = cloud_registry::connect_uri(&etcd_uri())
        .await
        .expect("connect etcd");
    run_contract(registry).await;
}

#[tokio::test]
#[ignore] // 需要运行中的 ZooKeeper 服务器
async fn test_zookeeper_contract() {
    init_tracing();
    let registry = cloud_registry::connect_uri(&zk_uri())
        .await
        .expect("connect zookeeper");
    run_contract(registry).await;
}

#[tokio::test]
#[ignore] // 需要运行中的 etcd 服务器
async fn test_etcd_delete_delivers_null() {
    init_tracing();
    let registry = cloud_registry::connect_uri(&etcd_uri())
        .await
        .expect("connect etcd");
    let service = Service::new("crtest-null", "127.0.0.1", 1).with_check(Check::ttl(TTL));
    registry.register(&service).await.expect("register");

    let (tx, mut rx) = mpsc::unbounded_channel();
    registry
        .subscribe_value(
            &CancellationToken::new(),
            &service.id().key(),
            ValueSetterFn::shared(move |_key: &str, value: Value| {
                let _ = tx.send(value);
                Ok(())
            }),
        )
        .await
        .expect("subscribe");
    // etcd 的 watch 只投递订阅之后的事件
    tokio::time::sleep(Duration::from_millis(500)).await;

    registry.deregister(&service.id()).await.expect("deregister");
    let value = timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("delivery timeout")
        .expect("sink dropped");
    assert!(value.is_null());
    registry.close().await.expect("close");
}

#[tokio::test]
#[ignore] // 需要运行中的 ZooKeeper 服务器
async fn test_zookeeper_second_subscriber_receives_current_value() {
    init_tracing();
    let registry = cloud_registry::connect_uri(&zk_uri())
        .await
        .expect("connect zookeeper");
    let scope = format!("crtest-shared-{}/", rand_suffix());
    let values = registry.values(&[scope.as_str()]);
    values.set_value("static", "fixed").await.expect("set value");

    let mut receivers = Vec::new();
    for _ in 0..2 {
        let (tx, rx) = mpsc::unbounded_channel();
        values
            .subscribe_value(
                &CancellationToken::new(),
                "static",
                ValueSetterFn::shared(move |_key: &str, value: Value| {
                    let _ = tx.send(value);
                    Ok(())
                }),
            )
            .await
            .expect("subscribe");
        receivers.push(rx);
        // 第二个订阅到达时，第一个的监听任务已在等待节点变化
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    // 节点不再写入，两个订阅都必须拿到当前值
    for rx in receivers.iter_mut() {
        let value = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("delivery timeout")
            .expect("sink dropped");
        assert_eq!(value, Value::from("fixed"));
    }
    registry.close().await.expect("close");
}
