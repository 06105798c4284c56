//! 服务描述模型测试：键路径推导、实例 ID、过期判断

use chrono::{Duration as ChronoDuration, Utc};
use cloud_registry::{Check, Service, ServiceID, ServiceInfo, ServicePrefix, generate_instance_id};
use std::time::Duration;

#[test]
fn test_service_paths() {
    let id = ServiceID::new("example", "example-42");
    assert_eq!(id.path(), "services/example/");
    assert_eq!(id.key(), "services/example/example-42");

    let scoped = ServiceID {
        name: "billing".to_string(),
        namespace: "prod".to_string(),
        partition: "eu".to_string(),
        instance_id: "b-1".to_string(),
    };
    assert_eq!(scoped.path(), "services/prod/billing/eu/");
    assert_eq!(scoped.key(), "services/prod/billing/eu/b-1");
    assert_eq!(scoped.prefix().path(), "services/prod/billing/eu/");
}

#[test]
fn test_prefix_path_omits_empty_segments() {
    let mut prefix = ServicePrefix::new("api");
    assert_eq!(prefix.path(), "services/api/");
    prefix.partition = "blue".to_string();
    assert_eq!(prefix.path(), "services/api/blue/");
}

#[test]
fn test_prefix_matches() {
    let service = Service::new("api", "10.0.0.1", 80).with_namespace("prod");
    let info = ServiceInfo::from_service(&service);

    assert!(ServicePrefix::new("api").matches(&info));
    assert!(service.prefix().matches(&info));
    assert!(!ServicePrefix::new("web").matches(&info));

    let mut other_ns = ServicePrefix::new("api");
    other_ns.namespace = "dev".to_string();
    assert!(!other_ns.matches(&info));
}

#[test]
fn test_generate_instance_id() {
    let a = generate_instance_id("example");
    let b = generate_instance_id("example");
    assert!(a.starts_with("example-"));
    assert!(a["example-".len()..].parse::<u64>().is_ok());
    assert_ne!(a, b);
}

#[test]
fn test_service_builder() {
    let service = Service::new("example", "localhost", 8080)
        .with_instance_id("example-42")
        .with_tag("v1")
        .with_meta("zone", "a")
        .with_check(Check::ttl(Duration::from_secs(10)));

    assert_eq!(service.id().key(), "services/example/example-42");
    assert_eq!(service.check.ttl, Duration::from_secs(10));
    assert_eq!(service.tags, vec!["v1".to_string()]);
    assert_eq!(service.meta.get("zone").map(String::as_str), Some("a"));

    let http = Check::http(Duration::from_secs(5), "http://localhost:8080/health");
    assert_eq!(http.http.as_ref().map(|h| h.method.as_str()), Some("GET"));
}

#[test]
fn test_info_staleness() {
    let service = Service::new("example", "localhost", 8080);
    let mut info = ServiceInfo::from_service(&service);
    assert!(!info.is_stale(Duration::from_secs(10)));

    info.last_update = Utc::now() - ChronoDuration::seconds(30);
    assert!(info.is_stale(Duration::from_secs(10)));
    assert!(!info.is_stale(Duration::ZERO));

    info.touch();
    assert!(!info.is_stale(Duration::from_secs(10)));
}

#[test]
fn test_info_json_shape() {
    let service = Service::new("example", "localhost", 8080).with_instance_id("example-1");
    let info = ServiceInfo::from_service(&service);
    let json = serde_json::to_value(&info).unwrap();

    assert_eq!(json["name"], "example");
    assert_eq!(json["instance_id"], "example-1");
    assert_eq!(json["port"], 8080);
    assert!(json.get("namespace").is_none());
    assert!(json.get("raw_info").is_none());

    let decoded: ServiceInfo = serde_json::from_value(json).unwrap();
    assert_eq!(decoded.hostname, "localhost");
}
