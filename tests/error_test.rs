//! 错误码与错误种类测试

use cloud_registry::{ErrorCategory, ErrorCode, RegistryError};

#[test]
fn test_error_codes_and_categories() {
    let cases = [
        (RegistryError::not_found("k"), ErrorCode::NotFound, ErrorCategory::Resource),
        (RegistryError::not_ready("svc"), ErrorCode::NotReady, ErrorCategory::Resource),
        (RegistryError::transport("boom"), ErrorCode::TransportFailed, ErrorCategory::Transport),
        (RegistryError::Decode("bad".into()), ErrorCode::DecodeFailed, ErrorCategory::Codec),
        (RegistryError::invalid_uri("x"), ErrorCode::InvalidUri, ErrorCategory::Configuration),
        (RegistryError::Closed, ErrorCode::RegistryClosed, ErrorCategory::Lifecycle),
        (RegistryError::sink("k", "no"), ErrorCode::SinkRejected, ErrorCategory::General),
    ];
    for (err, code, category) in cases {
        assert_eq!(err.code(), code, "{err}");
        assert_eq!(err.code().category(), category, "{err}");
    }
}

#[test]
fn test_retryable() {
    assert!(RegistryError::unavailable("down").is_retryable());
    assert!(RegistryError::timeout("slow").is_retryable());
    assert!(!RegistryError::transport("403").is_retryable());
    assert!(!RegistryError::not_found("k").is_retryable());
}

#[test]
fn test_predicates_and_display() {
    let err = RegistryError::not_found("services/example/");
    assert!(err.is_not_found());
    assert!(!err.is_not_ready());
    assert_eq!(err.to_string(), "not found: services/example/");

    let err = RegistryError::unsupported_scheme("redis");
    assert_eq!(
        err.to_string(),
        "configuration error [UNSUPPORTED_SCHEME]: unsupported registry scheme: redis"
    );
    assert_eq!(ErrorCode::NotReady.as_u32(), 1001);
}

#[test]
fn test_conversions() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
    assert_eq!(RegistryError::from(io).code(), ErrorCode::TransportUnavailable);

    let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert_eq!(RegistryError::from(json).code(), ErrorCode::DecodeFailed);
}
