//! chunkline-central — drives one request/response exchange over a
//! packet-limited, connection-oriented transport.
//!
//! The [`Central`] owns the busy guard and runs each transfer as a single
//! ordered event loop. Raw transport operations are delegated to a
//! [`Transport`] implementation, whose completions come back as
//! [`TransportEvent`]s.

pub mod chunk;
pub mod loopback;
pub mod session;
pub mod transport;

pub use loopback::{LoopbackConfig, LoopbackTransport};
pub use session::{
    Central, Response, SessionError, TransferHandle, TransferReport, TransferState,
};
pub use transport::{
    event_channel, EndpointHandle, EndpointIdentity, EventSink, EventStream, PeerHandle,
    Transport, TransportError, TransportEvent,
};
