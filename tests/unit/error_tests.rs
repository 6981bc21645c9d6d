//! Unit tests for `AppError` display format and conversions.

use interview_link::AppError;

#[test]
fn every_variant_has_a_distinct_prefix() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Transport("x".into()), "transport: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::Persistence("x".into()), "persistence: x"),
        (AppError::InvalidSession("x".into()), "invalid session: x"),
        (AppError::NotFound("x".into()), "not found: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn messages_have_no_trailing_period() {
    let err = AppError::Persistence("submit answer q1 failed with 500".into());
    let s = err.to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}

#[test]
fn malformed_json_maps_to_protocol() {
    let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: AppError = parse_err.into();
    assert!(matches!(err, AppError::Protocol(ref msg) if msg.starts_with("malformed json")));
}

#[test]
fn bad_toml_maps_to_config() {
    let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
    let err: AppError = toml_err.into();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn socket_errors_map_to_transport() {
    let err: AppError = tokio_tungstenite::tungstenite::Error::ConnectionClosed.into();
    assert!(matches!(err, AppError::Transport(_)));
}

#[test]
fn io_errors_map_to_io() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
    assert_eq!(err.to_string(), "io: pipe");
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error + Send + Sync + 'static>(_: &E) {}
    assert_error(&AppError::NotFound("s-1".into()));
}
