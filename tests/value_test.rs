//! 订阅值模型与持有型接收方测试

use cloud_registry::{
    FromValue, RegistryError, SyncAtomicValue, SyncInt64Value, SyncUInt64Value, SyncValue, Value,
    ValueSetter, ValueSetterFn, Valuer,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn test_decode_prefers_json() {
    assert_eq!(Value::decode(b"42"), Value::from(42i64));
    assert_eq!(Value::decode(b"true"), Value::Bool(true));
    assert_eq!(Value::decode(b"null"), Value::Null);
    assert_eq!(Value::decode(br#""quoted""#), Value::from("quoted"));
    assert_eq!(
        Value::decode(br#"{"a":1}"#),
        Value::Structured(json!({"a": 1}))
    );
    assert_eq!(Value::decode(b"[1,2]"), Value::Structured(json!([1, 2])));
}

#[test]
fn test_decode_falls_back_to_raw_string() {
    assert_eq!(Value::decode(b"hello"), Value::from("hello"));
    assert_eq!(Value::decode(b""), Value::from(""));
    assert_eq!(
        Value::decode("2024-01-01 10:00:00".as_bytes()),
        Value::from("2024-01-01 10:00:00")
    );
}

#[test]
fn test_display() {
    assert_eq!(Value::from("plain").to_string(), "plain");
    assert_eq!(Value::from(7i64).to_string(), "7");
    assert_eq!(Value::Null.to_string(), "null");
    assert_eq!(Value::Structured(json!({"k": "v"})).to_string(), r#"{"k":"v"}"#);
}

#[test]
fn test_from_value_conversions() {
    assert_eq!(i64::from_value(&Value::from("12")).unwrap(), 12);
    assert_eq!(i64::from_value(&Value::from(" 3.9 ")).unwrap(), 3);
    assert_eq!(i64::from_value(&Value::Null).unwrap(), 0);
    assert_eq!(u64::from_value(&Value::from(5u64)).unwrap(), 5);
    assert!(u64::from_value(&Value::from(-1i64)).is_err());
    assert!(bool::from_value(&Value::from("yes")).unwrap());
    assert!(!bool::from_value(&Value::from("off")).unwrap());
    assert!(bool::from_value(&Value::from("maybe")).is_err());
    assert_eq!(f64::from_value(&Value::from("1.5")).unwrap(), 1.5);
    assert_eq!(String::from_value(&Value::from(10i64)).unwrap(), "10");
    assert_eq!(String::from_value(&Value::Null).unwrap(), "");
}

#[test]
fn test_conversion_error_names_types() {
    let err = i64::from_value(&Value::Structured(json!([1]))).unwrap_err();
    match err {
        RegistryError::Conversion { from, to } => {
            assert_eq!(from, "structured");
            assert_eq!(to, "i64");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_sync_int64_keeps_previous_on_error() {
    let holder = SyncInt64Value::new(1);
    holder.set_value("limit", Value::from("25")).unwrap();
    assert_eq!(holder.value(), 25);

    assert!(holder.set_value("limit", Value::from("abc")).is_err());
    assert_eq!(holder.value(), 25);
}

#[test]
fn test_sync_uint64_and_atomic_holders() {
    let counter = SyncUInt64Value::default();
    counter.set_value("n", Value::from(9u64)).unwrap();
    assert_eq!(counter.value(), 9);

    let name = SyncAtomicValue::new(String::from("initial"));
    name.set_value("name", Value::from("updated")).unwrap();
    assert_eq!(name.value(), "updated");
    assert_eq!(name.load().as_str(), "updated");
}

#[test]
fn test_sync_value_as_valuer() {
    let flag: SyncValue<bool> = SyncValue::new(false);
    flag.set_value("feature", Value::from("on")).unwrap();

    let valuer: &dyn Valuer<bool> = &flag;
    assert!(valuer.value());
}

#[test]
fn test_closure_setter_shared() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let sink = ValueSetterFn::shared(move |key: &str, value: Value| {
        assert_eq!(key, "a/b");
        assert_eq!(value, Value::from(1i64));
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    sink.set_value("a/b", Value::decode(b"1")).unwrap();
    sink.set_value("a/b", Value::decode(b"1")).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_closure_setter_error_propagates() {
    let sink = ValueSetterFn::new(|key: &str, _value: Value| {
        Err(RegistryError::sink(key, "rejected"))
    });
    let err = sink.set_value("k", Value::Null).unwrap_err();
    assert_eq!(err.code(), cloud_registry::ErrorCode::SinkRejected);
}
