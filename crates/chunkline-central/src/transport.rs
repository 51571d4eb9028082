//! Transport boundary — what the central needs from the radio.
//!
//! Commands are non-blocking. Anything that completes later (a peer showing
//! up, a connection coming up, a notified packet) is reported as a
//! [`TransportEvent`] through the [`EventSink`] the transport was built with.
//! A command that fails synchronously returns `Err` and produces no event.

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

use chunkline_core::config::IdentityConfig;

/// Opaque handle for a discovered peer, assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle(pub u64);

/// Opaque handle for a resolved endpoint (a characteristic, a stream, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointHandle(pub u64);

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// The logical service a transfer talks to, and its two endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointIdentity {
    pub service: String,
    pub request_endpoint: String,
    pub response_endpoint: String,
}

impl From<&IdentityConfig> for EndpointIdentity {
    fn from(c: &IdentityConfig) -> Self {
        Self {
            service: c.service.clone(),
            request_endpoint: c.request_endpoint.clone(),
            response_endpoint: c.response_endpoint.clone(),
        }
    }
}

impl Default for EndpointIdentity {
    fn default() -> Self {
        Self::from(&IdentityConfig::default())
    }
}

/// Errors reported by a transport, either from a command or as an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("endpoint resolution failed: {0}")]
    ResolveFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("notification failed: {0}")]
    NotifyFailed(String),
    #[error("not connected")]
    NotConnected,
}

/// Asynchronous completions delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    PeerFound(PeerHandle),
    Connected(PeerHandle),
    ConnectFailed(TransportError),
    EndpointsResolved {
        write: EndpointHandle,
        notify: EndpointHandle,
    },
    ResolveFailed(TransportError),
    FragmentReceived(Bytes),
    NotifyFailed(TransportError),
    /// The link dropped without being asked to.
    Disconnected(PeerHandle),
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::PeerFound(_) => "peer_found",
            TransportEvent::Connected(_) => "connected",
            TransportEvent::ConnectFailed(_) => "connect_failed",
            TransportEvent::EndpointsResolved { .. } => "endpoints_resolved",
            TransportEvent::ResolveFailed(_) => "resolve_failed",
            TransportEvent::FragmentReceived(_) => "fragment_received",
            TransportEvent::NotifyFailed(_) => "notify_failed",
            TransportEvent::Disconnected(_) => "disconnected",
        }
    }
}

/// Sending half of the event channel. Cloned into the transport.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    /// Deliver an event. Dropped silently if the central is gone.
    pub fn emit(&self, event: TransportEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event sink closed, dropping transport event");
        }
    }
}

/// Receiving half of the event channel, consumed by one transfer at a time.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Create a connected sink/stream pair.
pub fn event_channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

/// Raw operations a packet transport must provide.
///
/// Implementations must deliver `FragmentReceived` events for one
/// connection in the order the peer sent them, exactly once.
pub trait Transport: Send + Sync + 'static {
    /// Start looking for a peer offering `identity.service`.
    /// Completes with `PeerFound`.
    fn discover(&self, identity: &EndpointIdentity) -> Result<(), TransportError>;

    /// Stop an in-progress discovery. Idempotent.
    fn stop_discovery(&self);

    /// Completes with `Connected` or `ConnectFailed`.
    fn connect(&self, peer: PeerHandle) -> Result<(), TransportError>;

    /// Completes with `EndpointsResolved` or `ResolveFailed`.
    fn resolve_endpoints(
        &self,
        peer: PeerHandle,
        identity: &EndpointIdentity,
    ) -> Result<(), TransportError>;

    /// Enable notifications. Produces a stream of `FragmentReceived`,
    /// terminated early by `NotifyFailed`.
    fn subscribe(&self, peer: PeerHandle, notify: EndpointHandle) -> Result<(), TransportError>;

    /// Write one fragment without waiting for acknowledgement.
    fn write_fragment(
        &self,
        peer: PeerHandle,
        endpoint: EndpointHandle,
        fragment: Bytes,
    ) -> Result<(), TransportError>;

    /// Tear the connection down. Idempotent.
    fn disconnect(&self, peer: PeerHandle);
}
