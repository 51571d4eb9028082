//! In-process loopback peripheral.
//!
//! Plays the remote side of an exchange without a radio: it answers
//! discovery, reassembles the request written to it, runs a responder over
//! the request and notifies the response back fragment by fragment. Faults
//! can be switched on to exercise every abort path of the central.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;

use chunkline_core::wire::FLAG_FINAL;
use chunkline_core::{make_fragments, Dechunker, FragmentOutcome};

use crate::transport::{
    EndpointHandle, EndpointIdentity, EventSink, PeerHandle, Transport, TransportError,
    TransportEvent,
};

/// Endpoint the loopback accepts request fragments on.
pub const REQUEST_ENDPOINT: EndpointHandle = EndpointHandle(1);
/// Endpoint the loopback notifies response fragments on.
pub const RESPONSE_ENDPOINT: EndpointHandle = EndpointHandle(2);

/// Computes the response for a reassembled request.
pub type Responder = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Delay before the peer is "seen". `None` means it never shows up.
    pub discovery_delay: Option<Duration>,
    /// Body size used for both reassembly and the response fragments.
    pub max_fragment_size: usize,
    pub max_payload_len: usize,
    pub refuse_connect: bool,
    /// Fail the `connect` command itself, before any event is emitted.
    pub connect_unavailable: bool,
    pub refuse_resolve: bool,
    /// Accept `subscribe` but report the notifications as failed.
    pub notify_fails: bool,
    /// Fail the write with this zero-based index.
    pub fail_write_at: Option<usize>,
    /// Notify one fragment whose body is a byte over the limit.
    pub oversized_response: bool,
    /// Drop the link instead of answering once the request is in.
    pub drop_link_after_request: bool,
    /// Never answer the request.
    pub silent: bool,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            discovery_delay: Some(Duration::from_millis(10)),
            max_fragment_size: chunkline_core::wire::DEFAULT_MAX_FRAGMENT_SIZE,
            max_payload_len: 64 * 1024,
            refuse_connect: false,
            connect_unavailable: false,
            refuse_resolve: false,
            notify_fails: false,
            fail_write_at: None,
            oversized_response: false,
            drop_link_after_request: false,
            silent: false,
        }
    }
}

#[derive(Debug, Default)]
struct Peripheral {
    discovery_generation: u64,
    discovering: bool,
    next_peer: u64,
    connected: Option<PeerHandle>,
    subscribed: bool,
    /// Set once a request fragment is rejected; cleared by its FINAL.
    discarding: bool,
    writes: usize,
    requests: Vec<Bytes>,
    commands: Vec<&'static str>,
}

/// A [`Transport`] whose peer lives in the same process.
#[derive(Clone)]
pub struct LoopbackTransport {
    sink: EventSink,
    config: LoopbackConfig,
    responder: Responder,
    dechunker: Arc<Mutex<Dechunker>>,
    inner: Arc<Mutex<Peripheral>>,
}

impl LoopbackTransport {
    /// Build a loopback peer that echoes every request.
    pub fn new(sink: EventSink, config: LoopbackConfig) -> Self {
        let dechunker = Dechunker::new(config.max_fragment_size, config.max_payload_len);
        Self {
            sink,
            config,
            responder: Arc::new(|request: &[u8]| request.to_vec()),
            dechunker: Arc::new(Mutex::new(dechunker)),
            inner: Arc::new(Mutex::new(Peripheral {
                next_peer: 1,
                ..Default::default()
            })),
        }
    }

    pub fn with_responder(
        mut self,
        responder: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    /// Names of every command received, in order.
    pub fn commands(&self) -> Vec<&'static str> {
        self.lock().commands.clone()
    }

    /// Requests reassembled so far.
    pub fn requests(&self) -> Vec<Bytes> {
        self.lock().requests.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected.is_some()
    }

    pub fn is_discovering(&self) -> bool {
        self.lock().discovering
    }

    /// Fragments written to the peer over its lifetime.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> MutexGuard<'_, Peripheral> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_dechunker(&self) -> MutexGuard<'_, Dechunker> {
        self.dechunker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require_link(&self, peer: PeerHandle) -> Result<(), TransportError> {
        if self.lock().connected == Some(peer) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    /// Events the peer sends once a full request has arrived.
    fn answer(&self, peer: PeerHandle, request: &[u8]) -> Vec<TransportEvent> {
        if self.config.drop_link_after_request {
            let mut inner = self.lock();
            inner.connected = None;
            inner.subscribed = false;
            return vec![TransportEvent::Disconnected(peer)];
        }
        if self.config.silent || !self.lock().subscribed {
            return Vec::new();
        }

        let mut events = Vec::new();
        if self.config.oversized_response {
            let mut packet = vec![0u8];
            packet.extend(std::iter::repeat(b'!').take(self.config.max_fragment_size + 1));
            events.push(TransportEvent::FragmentReceived(Bytes::from(packet)));
        }

        let response = Bytes::from((self.responder)(request));
        tracing::debug!(
            request_bytes = request.len(),
            response_bytes = response.len(),
            "loopback answering"
        );
        events.extend(
            make_fragments(&response, self.config.max_fragment_size)
                .iter()
                .map(|f| TransportEvent::FragmentReceived(f.encode())),
        );
        events
    }
}

impl Transport for LoopbackTransport {
    fn discover(&self, identity: &EndpointIdentity) -> Result<(), TransportError> {
        let generation = {
            let mut inner = self.lock();
            inner.commands.push("discover");
            inner.discovering = true;
            inner.discovery_generation += 1;
            inner.discovery_generation
        };

        let Some(delay) = self.config.discovery_delay else {
            tracing::debug!(service = %identity.service, "loopback peer is hidden");
            return Ok(());
        };

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let peer = {
                let mut inner = this.lock();
                if !inner.discovering || inner.discovery_generation != generation {
                    return;
                }
                let peer = PeerHandle(inner.next_peer);
                inner.next_peer += 1;
                peer
            };
            this.sink.emit(TransportEvent::PeerFound(peer));
        });
        Ok(())
    }

    fn stop_discovery(&self) {
        let mut inner = self.lock();
        inner.commands.push("stop_discovery");
        inner.discovering = false;
    }

    fn connect(&self, peer: PeerHandle) -> Result<(), TransportError> {
        let event = {
            let mut inner = self.lock();
            inner.commands.push("connect");
            if self.config.connect_unavailable {
                return Err(TransportError::Unavailable("radio is off".into()));
            }
            if self.config.refuse_connect {
                TransportEvent::ConnectFailed(TransportError::ConnectFailed(
                    "peer refused connection".into(),
                ))
            } else {
                inner.connected = Some(peer);
                TransportEvent::Connected(peer)
            }
        };
        self.sink.emit(event);
        Ok(())
    }

    fn resolve_endpoints(
        &self,
        peer: PeerHandle,
        _identity: &EndpointIdentity,
    ) -> Result<(), TransportError> {
        self.lock().commands.push("resolve_endpoints");
        self.require_link(peer)?;
        let event = if self.config.refuse_resolve {
            TransportEvent::ResolveFailed(TransportError::ResolveFailed(
                "service not found".into(),
            ))
        } else {
            TransportEvent::EndpointsResolved {
                write: REQUEST_ENDPOINT,
                notify: RESPONSE_ENDPOINT,
            }
        };
        self.sink.emit(event);
        Ok(())
    }

    fn subscribe(&self, peer: PeerHandle, notify: EndpointHandle) -> Result<(), TransportError> {
        self.lock().commands.push("subscribe");
        self.require_link(peer)?;
        if notify != RESPONSE_ENDPOINT {
            return Err(TransportError::NotifyFailed(format!(
                "endpoint {} does not notify",
                notify.0
            )));
        }
        if self.config.notify_fails {
            self.sink.emit(TransportEvent::NotifyFailed(TransportError::NotifyFailed(
                "notifications refused".into(),
            )));
            return Ok(());
        }
        self.lock().subscribed = true;
        Ok(())
    }

    fn write_fragment(
        &self,
        peer: PeerHandle,
        endpoint: EndpointHandle,
        fragment: Bytes,
    ) -> Result<(), TransportError> {
        let index = {
            let mut inner = self.lock();
            inner.commands.push("write_fragment");
            if inner.connected != Some(peer) {
                return Err(TransportError::NotConnected);
            }
            if endpoint != REQUEST_ENDPOINT {
                return Err(TransportError::WriteFailed(format!(
                    "endpoint {} is not writable",
                    endpoint.0
                )));
            }
            inner.writes += 1;
            inner.writes - 1
        };

        if self.config.fail_write_at == Some(index) {
            return Err(TransportError::WriteFailed(format!(
                "fragment {index} lost"
            )));
        }

        let is_final = fragment.first().is_some_and(|h| h & FLAG_FINAL != 0);
        {
            let mut inner = self.lock();
            if inner.discarding {
                inner.discarding = !is_final;
                return Err(TransportError::WriteFailed(format!(
                    "fragment {index} belongs to a rejected request"
                )));
            }
        }

        let outcome = self.lock_dechunker().add_fragment(&fragment);
        let events = match outcome {
            Ok(FragmentOutcome::Incomplete) => Vec::new(),
            Ok(FragmentOutcome::Complete(request)) => {
                self.lock().requests.push(request.clone());
                self.answer(peer, &request)
            }
            Err(e) => {
                tracing::warn!(error = %e, index, "loopback rejected request");
                self.lock().discarding = !is_final;
                return Err(TransportError::WriteFailed(format!(
                    "request rejected: {e}"
                )));
            }
        };

        for event in events {
            self.sink.emit(event);
        }
        Ok(())
    }

    fn disconnect(&self, peer: PeerHandle) {
        {
            let mut inner = self.lock();
            inner.commands.push("disconnect");
            if inner.connected == Some(peer) {
                inner.connected = None;
                inner.subscribed = false;
            }
            inner.discarding = false;
        }
        self.lock_dechunker().reset();
    }
}

/// A single FINAL packet carrying `body`, for hand-built responses.
pub fn final_packet(body: &[u8]) -> Bytes {
    let mut packet = Vec::with_capacity(body.len() + 1);
    packet.push(FLAG_FINAL);
    packet.extend_from_slice(body);
    Bytes::from(packet)
}
