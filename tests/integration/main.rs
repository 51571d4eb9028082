//! chunkline integration test harness.
//!
//! Every test runs a real `Central` against the in-process loopback
//! peripheral, so the whole path (discovery, pacing, reassembly, teardown)
//! is exercised without a radio.

use std::time::Duration;

use chunkline_central::{event_channel, Central, LoopbackConfig, LoopbackTransport};
use chunkline_core::ChunklineConfig;

mod exchange;
mod failures;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Config with short timings so tests stay fast.
pub fn fast_config() -> ChunklineConfig {
    let mut config = ChunklineConfig::default();
    config.session.discovery_timeout_ms = 200;
    config.session.pacing_ms = 1;
    config
}

/// A central wired to a loopback peer with the given faults.
pub fn central_with(
    config: ChunklineConfig,
    loopback: LoopbackConfig,
) -> Central<LoopbackTransport> {
    let (sink, events) = event_channel();
    let loopback = LoopbackConfig {
        max_fragment_size: config.fragment.max_fragment_size,
        max_payload_len: config.fragment.max_payload_len,
        ..loopback
    };
    Central::new(LoopbackTransport::new(sink, loopback), events, config)
}

/// A central wired to a well-behaved echoing loopback peer.
pub fn echo_central() -> Central<LoopbackTransport> {
    central_with(fast_config(), LoopbackConfig::default())
}

/// Upper bound on any single test exchange.
pub const TEST_DEADLINE: Duration = Duration::from_secs(5);
