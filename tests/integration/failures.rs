use std::time::{Duration, Instant};

use chunkline_central::{LoopbackConfig, SessionError, TransportError};
use chunkline_core::DechunkError;

use crate::*;

#[tokio::test]
async fn discovery_times_out() {
    let central = central_with(
        fast_config(),
        LoopbackConfig {
            discovery_delay: None,
            ..Default::default()
        },
    );

    let started = Instant::now();
    let err = central.exchange("anyone there?").await.unwrap_err();

    assert_eq!(err, SessionError::DiscoveryTimedOut);
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(!central.is_busy());
    assert!(!central.transport().is_discovering());
    let commands = central.transport().commands();
    assert_eq!(commands, vec!["discover", "stop_discovery"]);
}

#[tokio::test]
async fn refused_connection_is_an_endpoint_failure() {
    let central = central_with(
        fast_config(),
        LoopbackConfig {
            refuse_connect: true,
            ..Default::default()
        },
    );

    let err = central.exchange("hello").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::EndpointResolutionFailed(TransportError::ConnectFailed(_))
    ));
    assert!(!central.is_busy());
    assert!(!central.transport().commands().contains(&"write_fragment"));
}

#[tokio::test]
async fn unresolved_endpoints_abort_and_disconnect() {
    let central = central_with(
        fast_config(),
        LoopbackConfig {
            refuse_resolve: true,
            ..Default::default()
        },
    );

    let err = central.exchange("hello").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::EndpointResolutionFailed(TransportError::ResolveFailed(_))
    ));
    assert_eq!(central.transport().commands().last(), Some(&"disconnect"));
    assert!(!central.transport().is_connected());
}

#[tokio::test]
async fn failed_write_aborts_the_transfer() {
    let central = central_with(
        fast_config(),
        LoopbackConfig {
            fail_write_at: Some(1),
            ..Default::default()
        },
    );

    let err = central.exchange("y".repeat(60)).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::TransportWriteFailed(TransportError::WriteFailed(_))
    ));
    assert_eq!(central.transport().writes(), 2);
    assert!(!central.transport().is_connected());
    assert!(!central.is_busy());
}

#[tokio::test]
async fn central_recovers_after_an_aborted_transfer() {
    let central = central_with(
        fast_config(),
        LoopbackConfig {
            fail_write_at: Some(0),
            ..Default::default()
        },
    );

    assert!(central.exchange("doomed").await.is_err());
    let resp = central.exchange("second try").await.unwrap();
    assert_eq!(resp.text, "second try");
}

#[tokio::test]
async fn oversized_response_fragment_is_rejected() {
    let central = central_with(
        fast_config(),
        LoopbackConfig {
            oversized_response: true,
            ..Default::default()
        },
    );

    let err = central.exchange("hello").await.unwrap_err();
    assert_eq!(
        err,
        SessionError::DechunkFailed(DechunkError::OversizedFragment { len: 20, max: 19 })
    );
    assert!(!central.transport().is_connected());
    assert!(!central.is_busy());
}

#[tokio::test]
async fn undecodable_response_still_tears_down() {
    let (sink, events) = chunkline_central::event_channel();
    let transport = chunkline_central::LoopbackTransport::new(sink, LoopbackConfig::default())
        .with_responder(|_| vec![0xff, 0xfe, 0xfd]);
    let central = chunkline_central::Central::new(transport, events, fast_config());

    let err = central.exchange("hello").await.unwrap_err();
    match err {
        SessionError::DecodeFailed(e) => assert_eq!(e.into_bytes(), vec![0xff, 0xfe, 0xfd]),
        other => panic!("expected DecodeFailed, got {other:?}"),
    }
    assert_eq!(central.transport().commands().last(), Some(&"disconnect"));
    assert!(!central.is_busy());
}

#[tokio::test]
async fn lost_link_is_reported() {
    let central = central_with(
        fast_config(),
        LoopbackConfig {
            drop_link_after_request: true,
            ..Default::default()
        },
    );

    let err = central.exchange("hello").await.unwrap_err();
    assert_eq!(err, SessionError::ConnectionLost);
    assert!(!central.is_busy());
}

#[tokio::test]
async fn silent_peer_hits_the_exchange_deadline() {
    let mut config = fast_config();
    config.session.exchange_timeout_ms = 100;
    let central = central_with(
        config,
        LoopbackConfig {
            silent: true,
            ..Default::default()
        },
    );

    let err = tokio::time::timeout(TEST_DEADLINE, central.exchange("hello"))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err, SessionError::ExchangeTimedOut);
    assert!(!central.transport().is_connected());
}

#[tokio::test]
async fn cancel_tears_down_a_stuck_transfer() {
    let central = central_with(
        fast_config(),
        LoopbackConfig {
            silent: true,
            ..Default::default()
        },
    );

    let mut handle = central.start("hello").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(central.transport().is_connected());

    handle.cancel();
    let err = tokio::time::timeout(TEST_DEADLINE, handle.outcome())
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err, SessionError::Cancelled);
    assert!(!central.transport().is_connected());
    assert!(!central.is_busy());
}

#[tokio::test]
async fn oversized_request_is_refused_not_truncated() {
    let mut config = fast_config();
    config.fragment.max_payload_len = 40;
    let central = central_with(config, LoopbackConfig::default());

    let request = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let err = tokio::time::timeout(TEST_DEADLINE, central.exchange(request))
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::TransportWriteFailed(TransportError::WriteFailed(_))
    ));
    assert_eq!(central.transport().writes(), 3);
    assert!(central.transport().requests().is_empty());
    assert!(!central.transport().is_connected());
    assert!(!central.is_busy());

    let resp = central.exchange("short").await.unwrap();
    assert_eq!(resp.text, "short");
}

#[tokio::test]
async fn failed_notifications_abort_and_disconnect() {
    let central = central_with(
        fast_config(),
        LoopbackConfig {
            notify_fails: true,
            ..Default::default()
        },
    );

    let err = tokio::time::timeout(TEST_DEADLINE, central.exchange("hello"))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::NotificationFailed(TransportError::NotifyFailed(_))
    ));
    assert_eq!(central.transport().commands().last(), Some(&"disconnect"));
    assert!(!central.transport().is_connected());
    assert!(!central.is_busy());
}

#[tokio::test]
async fn connect_command_error_skips_disconnect() {
    let central = central_with(
        fast_config(),
        LoopbackConfig {
            connect_unavailable: true,
            ..Default::default()
        },
    );

    let err = central.exchange("hello").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::EndpointResolutionFailed(TransportError::Unavailable(_))
    ));
    assert_eq!(
        central.transport().commands(),
        vec!["discover", "stop_discovery", "connect"]
    );
    assert!(!central.is_busy());
}
