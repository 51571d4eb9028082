use std::time::Duration;

use bytes::Bytes;
use chunkline_central::{
    event_channel, Central, LoopbackConfig, LoopbackTransport, PeerHandle, SessionError,
    TransferState, TransportEvent,
};

use crate::*;

#[tokio::test]
async fn echo_round_trip() {
    let central = echo_central();
    let text = "Call me Ishmael. Some years ago - never mind how long precisely - \
                having little or no money in my purse, I thought I would sail about.";

    let resp = tokio::time::timeout(TEST_DEADLINE, central.exchange(text))
        .await
        .expect("exchange should finish")
        .expect("exchange should succeed");

    assert_eq!(resp.text, text);
    assert_eq!(resp.report.request_bytes, text.len());
    assert_eq!(resp.report.response_bytes, text.len());
    assert_eq!(resp.report.fragments_sent, text.len().div_ceil(19));
    assert_eq!(resp.report.response_fragments, text.len().div_ceil(19));
    assert_eq!(resp.report.request_digest, resp.report.response_digest);

    assert!(!central.is_busy());
    assert_eq!(central.state(), TransferState::Idle);
    assert!(!central.transport().is_connected());
}

#[tokio::test]
async fn commands_follow_the_protocol_order() {
    let central = echo_central();
    central.exchange("short").await.unwrap();

    let commands = central.transport().commands();
    assert_eq!(
        commands,
        vec![
            "discover",
            "stop_discovery",
            "connect",
            "resolve_endpoints",
            "subscribe",
            "write_fragment",
            "disconnect",
        ]
    );
}

#[tokio::test]
async fn exact_multiple_payload_completes() {
    let central = echo_central();
    let text = "x".repeat(38);

    let resp = tokio::time::timeout(TEST_DEADLINE, central.exchange(text.clone()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(resp.text, text);
    assert_eq!(resp.report.fragments_sent, 2);
    assert_eq!(central.transport().writes(), 2);
}

#[tokio::test]
async fn empty_payload_round_trips() {
    let central = echo_central();
    let resp = central.exchange("").await.unwrap();
    assert_eq!(resp.text, "");
    assert_eq!(resp.report.fragments_sent, 1);
    assert_eq!(central.transport().requests(), vec![bytes::Bytes::new()]);
}

#[tokio::test]
async fn responder_shapes_the_response() {
    let mut config = fast_config();
    config.fragment.max_fragment_size = 7;
    let (sink, events) = chunkline_central::event_channel();
    let transport = chunkline_central::LoopbackTransport::new(
        sink,
        LoopbackConfig {
            max_fragment_size: 7,
            ..Default::default()
        },
    )
    .with_responder(|req| String::from_utf8_lossy(req).to_uppercase().into_bytes());
    let central = chunkline_central::Central::new(transport, events, config);

    let resp = central.exchange("ahoy there, shipmate").await.unwrap();
    assert_eq!(resp.text, "AHOY THERE, SHIPMATE");
    assert_eq!(resp.report.fragments_sent, 3);
}

#[tokio::test]
async fn central_runs_exchanges_back_to_back() {
    let central = echo_central();

    let first = central.exchange("first").await.unwrap();
    let second = central.exchange("second").await.unwrap();

    assert_eq!(first.text, "first");
    assert_eq!(second.text, "second");
    assert_eq!(second.report.transfer_id, first.report.transfer_id + 1);
    assert_eq!(central.transport().requests().len(), 2);
}

#[tokio::test]
async fn pacing_spreads_the_request_out() {
    let mut config = fast_config();
    config.session.pacing_ms = 10;
    let central = central_with(config, LoopbackConfig::default());

    // 5 fragments → at least 4 pacing gaps
    let text = "p".repeat(19 * 5);
    let resp = central.exchange(text).await.unwrap();
    assert!(resp.report.elapsed_ms >= Duration::from_millis(40).as_millis());
}

#[tokio::test]
async fn watched_state_returns_to_idle() {
    let central = echo_central();
    let mut states = central.watch_state();

    let handle = central.start("watch me").unwrap();
    states.changed().await.unwrap();
    assert_ne!(*states.borrow_and_update(), TransferState::Idle);

    handle.outcome().await.unwrap();
    assert_eq!(*states.borrow(), TransferState::Idle);
}

#[tokio::test]
async fn stale_events_are_discarded_at_start() {
    let (sink, events) = event_channel();
    let transport = LoopbackTransport::new(
        sink.clone(),
        LoopbackConfig {
            discovery_delay: None,
            ..Default::default()
        },
    );
    let central = Central::new(transport, events, fast_config());

    // a leftover sighting must not stand in for discovery
    sink.emit(TransportEvent::PeerFound(PeerHandle(42)));
    let err = central.exchange("hello").await.unwrap_err();
    assert_eq!(err, SessionError::DiscoveryTimedOut);
    assert_eq!(
        central.transport().commands(),
        vec!["discover", "stop_discovery"]
    );
}

#[tokio::test]
async fn stray_fragment_does_not_leak_into_the_next_response() {
    let (sink, events) = event_channel();
    let transport = LoopbackTransport::new(sink.clone(), LoopbackConfig::default());
    let central = Central::new(transport, events, fast_config());

    sink.emit(TransportEvent::FragmentReceived(Bytes::from_static(&[
        0, b'Z', b'Z',
    ])));
    let resp = tokio::time::timeout(TEST_DEADLINE, central.exchange("fresh"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resp.text, "fresh");
    assert_eq!(resp.report.response_fragments, 1);
}

#[tokio::test]
async fn idle_is_published_after_the_guard_is_released() {
    let central = echo_central();
    let mut states = central.watch_state();

    let handle = central.start("ready again").unwrap();
    let outcome = tokio::spawn(handle.outcome());

    tokio::time::timeout(TEST_DEADLINE, async {
        states.wait_for(|s| *s != TransferState::Idle).await.unwrap();
        states.wait_for(|s| *s == TransferState::Idle).await.unwrap();
    })
    .await
    .unwrap();
    assert!(!central.is_busy());
    let next = central.start("next").unwrap();

    outcome.await.unwrap().unwrap();
    assert_eq!(next.outcome().await.unwrap().text, "next");
}
