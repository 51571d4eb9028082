//! One transfer: a single ordered event loop from discovery to teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{oneshot, watch, OwnedMutexGuard};
use tokio::task::{JoinError, JoinHandle};

use chunkline_core::config::{FragmentConfig, SessionConfig};
use chunkline_core::{make_fragments, ChunklineConfig, Dechunker, FragmentOutcome};

use crate::chunk::SendWorker;
use crate::transport::{
    EndpointHandle, EndpointIdentity, EventStream, PeerHandle, Transport, TransportError,
    TransportEvent,
};

use super::state::{Deadline, DeadlineKind, TransferState};
use super::{short_digest, Response, SessionError, TransferReport};

type WorkerHandle = JoinHandle<Result<usize, TransportError>>;

pub(super) struct Transfer<T: Transport> {
    id: u64,
    transport: Arc<T>,
    identity: EndpointIdentity,
    fragment: FragmentConfig,
    session: SessionConfig,
    payload: Bytes,
    /// Busy guard. Released when the transfer is dropped.
    events: OwnedMutexGuard<EventStream>,
    state: Arc<watch::Sender<TransferState>>,
    dechunker: Dechunker,
    peer: Option<PeerHandle>,
    deadline: Option<Deadline>,
    worker: Option<WorkerHandle>,
    fragments_sent: Arc<AtomicUsize>,
    response_fragments: usize,
    started: Instant,
}

impl<T: Transport> Transfer<T> {
    pub fn new(
        id: u64,
        transport: Arc<T>,
        identity: EndpointIdentity,
        config: &ChunklineConfig,
        payload: Bytes,
        events: OwnedMutexGuard<EventStream>,
        state: Arc<watch::Sender<TransferState>>,
    ) -> Self {
        Self {
            id,
            transport,
            identity,
            dechunker: Dechunker::new(
                config.fragment.max_fragment_size,
                config.fragment.max_payload_len,
            ),
            fragment: config.fragment.clone(),
            session: config.session.clone(),
            payload,
            events,
            state,
            peer: None,
            deadline: None,
            worker: None,
            fragments_sent: Arc::new(AtomicUsize::new(0)),
            response_fragments: 0,
            started: Instant::now(),
        }
    }

    pub async fn run(mut self, cancel: oneshot::Receiver<()>) -> Result<Response, SessionError> {
        let result = self.drive(cancel).await;
        self.teardown(&result);

        // Idle is only published once the busy guard is gone
        let (id, state) = (self.id, self.state.clone());
        drop(self);
        let prev = state.send_replace(TransferState::Idle);
        tracing::debug!(transfer = id, from = %prev, to = "idle", "state change");
        result
    }

    async fn drive(&mut self, mut cancel: oneshot::Receiver<()>) -> Result<Response, SessionError> {
        tracing::info!(
            transfer = self.id,
            request_bytes = self.payload.len(),
            service = %self.identity.service,
            "transfer starting"
        );

        self.set_state(TransferState::Discovering);
        self.deadline = Some(Deadline::after(
            self.session.discovery_timeout(),
            DeadlineKind::Discovery,
        ));
        self.transport
            .discover(&self.identity)
            .map_err(SessionError::DiscoveryFailed)?;

        let mut cancel_open = true;

        loop {
            let deadline = self.deadline;
            let timer_at = deadline.map(|d| d.at).unwrap_or_else(tokio::time::Instant::now);

            tokio::select! {
                biased;

                signal = &mut cancel, if cancel_open => {
                    cancel_open = false;
                    if signal.is_ok() {
                        return Err(SessionError::Cancelled);
                    }
                    // handle dropped without cancelling: keep going detached
                }

                _ = tokio::time::sleep_until(timer_at), if deadline.is_some() => {
                    let err = deadline.map(Deadline::error).unwrap_or(SessionError::ExchangeTimedOut);
                    tracing::warn!(transfer = self.id, state = %self.current_state(), error = %err, "timed out");
                    return Err(err);
                }

                joined = join_worker(&mut self.worker), if self.worker.is_some() => {
                    self.worker = None;
                    self.on_worker_done(joined)?;
                }

                event = self.events.recv() => {
                    let event = event.ok_or(SessionError::EventStreamClosed)?;
                    if let Some(payload) = self.on_event(event)? {
                        return self.complete(payload);
                    }
                }
            }
        }
    }

    fn on_event(&mut self, event: TransportEvent) -> Result<Option<Bytes>, SessionError> {
        let state = self.current_state();
        tracing::trace!(transfer = self.id, %state, event = event.name(), "transport event");

        match (state, event) {
            (TransferState::Discovering, TransportEvent::PeerFound(peer)) => {
                tracing::info!(transfer = self.id, %peer, "peer discovered");
                self.transport.stop_discovery();
                self.deadline = self
                    .session
                    .exchange_timeout()
                    .map(|t| Deadline::after(t, DeadlineKind::Exchange));
                self.set_state(TransferState::Connecting);
                self.transport
                    .connect(peer)
                    .map_err(SessionError::EndpointResolutionFailed)?;
                self.peer = Some(peer);
            }

            (TransferState::Connecting, TransportEvent::Connected(peer))
                if Some(peer) == self.peer =>
            {
                tracing::debug!(transfer = self.id, %peer, "connected");
                self.set_state(TransferState::ResolvingEndpoints);
                self.transport
                    .resolve_endpoints(peer, &self.identity)
                    .map_err(SessionError::EndpointResolutionFailed)?;
            }

            (TransferState::Connecting, TransportEvent::ConnectFailed(e)) => {
                self.peer = None;
                return Err(SessionError::EndpointResolutionFailed(e));
            }

            (TransferState::ResolvingEndpoints, TransportEvent::EndpointsResolved { write, notify }) => {
                self.begin_sending(write, notify)?;
            }

            (TransferState::ResolvingEndpoints, TransportEvent::ResolveFailed(e)) => {
                return Err(SessionError::EndpointResolutionFailed(e));
            }

            (s, TransportEvent::FragmentReceived(packet)) if s.receives_fragments() => {
                return self.on_fragment(&packet);
            }

            (s, TransportEvent::NotifyFailed(e)) if s.is_linked() => {
                return Err(SessionError::NotificationFailed(e));
            }

            (s, TransportEvent::Disconnected(peer)) if s.is_linked() && Some(peer) == self.peer => {
                self.peer = None;
                return Err(SessionError::ConnectionLost);
            }

            (s, other) => {
                tracing::debug!(transfer = self.id, state = %s, event = other.name(), "ignoring event");
            }
        }

        Ok(None)
    }

    fn begin_sending(
        &mut self,
        write: EndpointHandle,
        notify: EndpointHandle,
    ) -> Result<(), SessionError> {
        let peer = self.peer.ok_or(SessionError::ConnectionLost)?;

        self.transport
            .subscribe(peer, notify)
            .map_err(SessionError::NotificationFailed)?;

        let fragments = make_fragments(&self.payload, self.fragment.max_fragment_size);
        tracing::info!(
            transfer = self.id,
            request_bytes = self.payload.len(),
            fragments = fragments.len(),
            fragment_size = self.fragment.max_fragment_size,
            "request chunked"
        );

        self.set_state(TransferState::Sending);
        let worker = SendWorker::new(
            self.transport.clone(),
            peer,
            write,
            fragments,
            self.session.pacing(),
        );
        self.fragments_sent = worker.progress();
        self.worker = Some(tokio::spawn(worker.run()));
        Ok(())
    }

    fn on_worker_done(
        &mut self,
        joined: Result<Result<usize, TransportError>, JoinError>,
    ) -> Result<(), SessionError> {
        match joined {
            Ok(Ok(sent)) => {
                tracing::trace!(transfer = self.id, sent, "send worker finished");
                if self.current_state() == TransferState::Sending {
                    self.set_state(TransferState::AwaitingResponse);
                }
                Ok(())
            }
            Ok(Err(e)) => Err(SessionError::TransportWriteFailed(e)),
            Err(e) => Err(SessionError::TaskFailed(e.to_string())),
        }
    }

    fn on_fragment(&mut self, packet: &[u8]) -> Result<Option<Bytes>, SessionError> {
        tracing::trace!(transfer = self.id, len = packet.len(), "received fragment");
        match self.dechunker.add_fragment(packet) {
            Ok(FragmentOutcome::Incomplete) => {
                self.response_fragments += 1;
                Ok(None)
            }
            Ok(FragmentOutcome::Complete(payload)) => {
                self.response_fragments += 1;
                tracing::debug!(
                    transfer = self.id,
                    response_bytes = payload.len(),
                    "dechunker done"
                );
                Ok(Some(payload))
            }
            Err(e) => Err(SessionError::DechunkFailed(e)),
        }
    }

    fn complete(&mut self, payload: Bytes) -> Result<Response, SessionError> {
        self.set_state(TransferState::Completing);
        self.deadline = None;

        let report = TransferReport {
            transfer_id: self.id,
            request_bytes: self.payload.len(),
            fragments_sent: self.fragments_sent.load(Ordering::Acquire),
            response_bytes: payload.len(),
            response_fragments: self.response_fragments,
            elapsed_ms: self.started.elapsed().as_millis(),
            request_digest: short_digest(&self.payload),
            response_digest: short_digest(&payload),
        };

        let text = String::from_utf8(payload.to_vec()).map_err(|e| {
            tracing::warn!(transfer = self.id, error = %e, "failed to parse response");
            SessionError::DecodeFailed(e)
        })?;

        tracing::info!(
            transfer = self.id,
            response_bytes = report.response_bytes,
            digest = %report.response_digest,
            "got response"
        );
        Ok(Response { text, report })
    }

    fn teardown(&mut self, result: &Result<Response, SessionError>) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        if self.current_state() == TransferState::Discovering {
            self.transport.stop_discovery();
        }
        if let Some(peer) = self.peer.take() {
            self.transport.disconnect(peer);
        }
        self.dechunker.reset();

        let elapsed = self.started.elapsed();
        match result {
            Ok(_) => tracing::info!(
                transfer = self.id,
                elapsed_secs = secs(elapsed),
                "disconnect after transfer"
            ),
            Err(e) => tracing::warn!(
                transfer = self.id,
                state = %self.current_state(),
                elapsed_secs = secs(elapsed),
                error = %e,
                "transfer aborted"
            ),
        }
    }

    fn current_state(&self) -> TransferState {
        *self.state.borrow()
    }

    fn set_state(&self, next: TransferState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(transfer = self.id, from = %prev, to = %next, "state change");
        }
    }
}

async fn join_worker(
    worker: &mut Option<WorkerHandle>,
) -> Result<Result<usize, TransportError>, JoinError> {
    match worker {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}
