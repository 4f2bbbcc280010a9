//! Probe tests
//!
//! Configured clients stay offline until probed; these tests run the
//! probe against mock servers over both handshakes.

use crate::integration::{MockMemcached, MockMemcachedBuilder, ResponseMode, MOCK_VERSION};
use memconnect::core::transport::TransportError;
use memconnect::core::{
    ClientOption, ConnectionBuilder, OptionMap, OptionValue, ProbeError, ProtocolError, Registry,
    Setting,
};
use std::time::Duration;

fn options(pairs: &[(&str, OptionValue)]) -> OptionMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_build_does_not_connect() {
    let mock = MockMemcached::new().await.unwrap();
    let registry = Registry::new();

    let client = ConnectionBuilder::new()
        .with_registry(&registry)
        .build(mock.dsn(None).as_str(), &OptionMap::new())
        .unwrap();

    assert_eq!(client.server_list().len(), 1);
    assert_eq!(mock.stats().connections, 0);
    mock.shutdown();
}

#[tokio::test]
async fn test_probe_binary_version() {
    let mock = MockMemcached::new().await.unwrap();
    let registry = Registry::new();

    let client = ConnectionBuilder::new()
        .with_registry(&registry)
        .build(mock.dsn(None).as_str(), &OptionMap::new())
        .unwrap();
    assert_eq!(client.option(ClientOption::BinaryProtocol), Setting::Bool(true));

    let outcomes = client.probe().await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_up());
    assert_eq!(outcomes[0].result.as_ref().unwrap(), MOCK_VERSION);

    let stats = mock.stats();
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.binary_versions, 1);
    assert_eq!(stats.auth_attempts, 0);
    mock.shutdown();
}

#[tokio::test]
async fn test_probe_text_version() {
    let mock = MockMemcached::new().await.unwrap();
    let registry = Registry::new();

    let client = ConnectionBuilder::new()
        .with_registry(&registry)
        .build(
            mock.dsn(None).as_str(),
            &options(&[("binary_protocol", false.into())]),
        )
        .unwrap();

    let outcomes = client.probe().await;
    assert!(outcomes[0].is_up());
    assert_eq!(outcomes[0].result.as_ref().unwrap(), MOCK_VERSION);
    assert_eq!(mock.stats().text_versions, 1);

    let commands: Vec<_> = mock.requests().into_iter().map(|r| r.command).collect();
    assert_eq!(commands, vec!["version"]);
    mock.shutdown();
}

#[tokio::test]
async fn test_probe_reports_each_server() {
    let up = MockMemcached::new().await.unwrap();
    let down = MockMemcachedBuilder::new()
        .response_mode(ResponseMode::Failure)
        .build()
        .await
        .unwrap();
    let registry = Registry::new();

    let client = ConnectionBuilder::new()
        .with_registry(&registry)
        .build(
            vec![up.dsn(None), down.dsn(None)],
            &OptionMap::new(),
        )
        .unwrap();

    let outcomes = client.probe().await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].is_up());
    assert!(!outcomes[1].is_up());
    assert!(matches!(outcomes[1].result, Err(ProbeError::Protocol(_))));
    assert_eq!(outcomes[1].server.to_string(), down.addr());

    up.shutdown();
    down.shutdown();
}

#[tokio::test]
async fn test_probe_garbage_text_reply() {
    let mock = MockMemcachedBuilder::new()
        .response_mode(ResponseMode::Custom("SERVER_ERROR out of memory\r\n".to_string()))
        .build()
        .await
        .unwrap();
    let registry = Registry::new();

    let client = ConnectionBuilder::new()
        .with_registry(&registry)
        .build(
            mock.dsn(None).as_str(),
            &options(&[("binary_protocol", false.into())]),
        )
        .unwrap();

    let outcomes = client.probe().await;
    match &outcomes[0].result {
        Err(ProbeError::Protocol(ProtocolError::ParseError(message))) => {
            assert_eq!(message, "out of memory")
        }
        other => panic!("unexpected probe result: {:?}", other),
    }
    mock.shutdown();
}

#[tokio::test]
async fn test_probe_waits_for_slow_server_within_poll_timeout() {
    let mock = MockMemcachedBuilder::new()
        .response_mode(ResponseMode::Slow(Duration::from_millis(50)))
        .build()
        .await
        .unwrap();
    let registry = Registry::new();

    let client = ConnectionBuilder::new()
        .with_registry(&registry)
        .build(mock.dsn(None).as_str(), &OptionMap::new())
        .unwrap();

    let outcomes = client.probe().await;
    assert!(outcomes[0].is_up());
    mock.shutdown();
}

#[tokio::test]
async fn test_probe_times_out_on_slow_server() {
    let mock = MockMemcachedBuilder::new()
        .response_mode(ResponseMode::Slow(Duration::from_millis(500)))
        .build()
        .await
        .unwrap();
    let registry = Registry::new();

    let client = ConnectionBuilder::new()
        .with_registry(&registry)
        .build(
            mock.dsn(None).as_str(),
            &options(&[("poll_timeout", OptionValue::Int(100))]),
        )
        .unwrap();

    let outcomes = client.probe().await;
    assert!(matches!(
        outcomes[0].result,
        Err(ProbeError::Transport(TransportError::Timeout(_)))
    ));
    assert_eq!(mock.stats().connections, 1);
    mock.shutdown();
}

#[cfg(feature = "sasl")]
#[tokio::test]
async fn test_probe_authenticates_with_dsn_credentials() {
    let mock = MockMemcachedBuilder::new()
        .sasl("user", "secret")
        .build()
        .await
        .unwrap();
    let registry = Registry::new();

    let client = ConnectionBuilder::new()
        .with_registry(&registry)
        .build(mock.dsn(Some("user:secret")).as_str(), &OptionMap::new())
        .unwrap();

    let outcomes = client.probe().await;
    assert!(outcomes[0].is_up());

    let commands: Vec<_> = mock.requests().into_iter().map(|r| r.command).collect();
    assert_eq!(commands, vec!["binary:auth PLAIN user", "binary:version"]);
    mock.shutdown();
}

#[cfg(feature = "sasl")]
#[tokio::test]
async fn test_probe_rejected_credentials() {
    let mock = MockMemcachedBuilder::new()
        .sasl("user", "secret")
        .build()
        .await
        .unwrap();
    let registry = Registry::new();

    let client = ConnectionBuilder::new()
        .with_registry(&registry)
        .build(
            mock.dsn(None).as_str(),
            &options(&[("username", "user".into()), ("password", "wrong".into())]),
        )
        .unwrap();

    let outcomes = client.probe().await;
    match &outcomes[0].result {
        Err(ProbeError::Protocol(ProtocolError::Status { status, .. })) => {
            assert_eq!(*status, 0x20)
        }
        other => panic!("unexpected probe result: {:?}", other),
    }
    assert_eq!(mock.stats().binary_versions, 0);
    mock.shutdown();
}

#[cfg(feature = "sasl")]
#[tokio::test]
async fn test_text_protocol_cannot_authenticate() {
    let mock = MockMemcached::new().await.unwrap();
    let registry = Registry::new();

    let client = ConnectionBuilder::new()
        .with_registry(&registry)
        .build(
            mock.dsn(Some("user:secret")).as_str(),
            &options(&[("binary_protocol", false.into())]),
        )
        .unwrap();

    let outcomes = client.probe().await;
    assert!(matches!(
        outcomes[0].result,
        Err(ProbeError::Protocol(ProtocolError::Unsupported(_)))
    ));
    mock.shutdown();
}
