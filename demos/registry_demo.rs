//! 注册中心使用示例
//!
//! 注册一个 `example` 服务，订阅 `example/` 前缀下的值变化，并每秒写入一次当前时间，
//! Ctrl+C 后注销服务并关闭注册中心。
//!
//! ```bash
//! REGISTRY_URI=etcd://127.0.0.1:2379 cargo run --example registry_demo
//! REGISTRY_URI=consul://127.0.0.1:8500 cargo run --example registry_demo
//! ```

use cloud_registry::{
    CancellationToken, Check, Registry, Service, Value, ValueClient, ValueSetterFn,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let uri = std::env::var("REGISTRY_URI").unwrap_or_else(|_| "memory://".to_string());
    info!(uri = %uri, "connecting registry");
    let registry: Arc<dyn Registry> = Arc::from(cloud_registry::connect_uri(&uri).await?);

    let service = Service::new("example", "localhost", 8080)
        .with_check(Check::ttl(Duration::from_secs(10)));
    registry.register(&service).await?;
    info!(service = %service.name, instance = %service.instance_id, "service registered");

    let cancel = CancellationToken::new();
    let prefix = service.prefix();
    let discoverer = registry.clone();
    registry
        .subscribe_value_with_prefix(
            &cancel,
            "example/",
            ValueSetterFn::shared(move |key: &str, value: Value| {
                info!(key = %key, value = %value, "value changed");
                let discoverer = discoverer.clone();
                let prefix = prefix.clone();
                tokio::spawn(async move {
                    match discoverer.discover(&prefix, Duration::from_secs(10)).await {
                        Ok(found) => info!(count = found.len(), "service discovered"),
                        Err(e) => error!(error = %e, "discover failed"),
                    }
                });
                Ok(())
            }),
        )
        .await?;

    let values = registry.values(&["example/"]);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let now = chrono::Utc::now().to_rfc3339();
                info!(value = %now, "set new value");
                if let Err(e) = values.set_value("key", &now).await {
                    error!(error = %e, "set value failed");
                }
            }
        }
    }

    cancel.cancel();
    if let Err(e) = registry.deregister(&service.id()).await {
        error!(error = %e, "deregister failed");
    }
    registry.close().await?;
    info!("registry closed");
    Ok(())
}
