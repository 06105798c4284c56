//! 空注册中心测试

use cloud_registry::{
    CancellationToken, DummyRegistry, Registry, Service, ServicePrefix, ValueClient,
    ValueSetterFn,
};
use std::time::Duration;

#[tokio::test]
async fn test_dummy_accepts_everything() {
    let registry = DummyRegistry::new();
    let service = Service::new("example", "localhost", 8080);

    registry.register(&service).await.unwrap();
    registry.health_check(&service.id(), Duration::from_secs(1)).await.unwrap();
    let found = registry
        .discover(&ServicePrefix::new("example"), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(found.is_empty());
    registry.deregister(&service.id()).await.unwrap();

    registry.set_value("k", "v").await.unwrap();
    assert_eq!(registry.value("k").await.unwrap(), "");

    let sink = ValueSetterFn::shared(|_key: &str, _value| panic!("dummy never delivers"));
    registry
        .subscribe_value(&CancellationToken::new(), "k", sink.clone())
        .await
        .unwrap();
    registry
        .subscribe_value_with_prefix(&CancellationToken::new(), "p/", sink)
        .await
        .unwrap();

    registry.close().await.unwrap();
    registry.close().await.unwrap();
}

#[tokio::test]
async fn test_dummy_scopes() {
    let registry = DummyRegistry::new();
    let child = registry.values(&["a/", "b/"]);
    assert_eq!(child.scope(), "a/b/");
    assert_eq!(child.values(&["c/"]).scope(), "a/b/c/");

    let boxed = cloud_registry::connect_uri("dummy://").await.unwrap();
    assert_eq!(boxed.scope(), "");
}
