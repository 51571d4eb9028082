//! Central session — runs one request/response exchange at a time.
//!
//! `start` either hands back a [`TransferHandle`] or fails with
//! [`SessionError::Busy`]. Holding the handle's transfer means holding the
//! event stream: the busy guard is the lock on it, so overlapping transfers
//! are impossible by construction and no transport call is made for a
//! rejected `start`.

mod state;
mod transfer;

pub use state::TransferState;

use std::string::FromUtf8Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use chunkline_core::{ChunklineConfig, DechunkError};

use crate::transport::{EndpointIdentity, EventStream, Transport, TransportError};

use transfer::Transfer;

/// Why a transfer did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("a transfer is already in progress")]
    Busy,
    #[error("discovery could not start: {0}")]
    DiscoveryFailed(TransportError),
    #[error("no peer found before the discovery timeout")]
    DiscoveryTimedOut,
    #[error("could not reach peer endpoints: {0}")]
    EndpointResolutionFailed(TransportError),
    #[error("fragment write failed: {0}")]
    TransportWriteFailed(TransportError),
    #[error("response notifications failed: {0}")]
    NotificationFailed(TransportError),
    #[error("response could not be reassembled: {0}")]
    DechunkFailed(DechunkError),
    #[error("response is not valid UTF-8: {0}")]
    DecodeFailed(FromUtf8Error),
    #[error("peer disconnected mid-transfer")]
    ConnectionLost,
    #[error("exchange did not complete before its deadline")]
    ExchangeTimedOut,
    #[error("transfer cancelled")]
    Cancelled,
    #[error("transport event stream closed")]
    EventStreamClosed,
    #[error("transfer task failed: {0}")]
    TaskFailed(String),
}

/// Summary of a completed exchange.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub transfer_id: u64,
    pub request_bytes: usize,
    pub fragments_sent: usize,
    pub response_bytes: usize,
    pub response_fragments: usize,
    pub elapsed_ms: u128,
    /// First 8 bytes of the BLAKE3 hash of the request, hex.
    pub request_digest: String,
    /// First 8 bytes of the BLAKE3 hash of the response, hex.
    pub response_digest: String,
}

/// A decoded response and how it got here.
#[derive(Debug, Clone)]
pub struct Response {
    pub text: String,
    pub report: TransferReport,
}

pub(crate) fn short_digest(data: &[u8]) -> String {
    hex::encode(&blake3::hash(data).as_bytes()[..8])
}

/// Token for one running transfer.
pub struct TransferHandle {
    id: u64,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<Response, SessionError>>,
}

impl TransferHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Abort the transfer. It tears down and resolves to `Cancelled`,
    /// unless it already finished.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the transfer to finish.
    pub async fn outcome(self) -> Result<Response, SessionError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(SessionError::TaskFailed(e.to_string())),
        }
    }
}

/// Drives exchanges over a transport, one at a time.
pub struct Central<T: Transport> {
    transport: Arc<T>,
    config: ChunklineConfig,
    identity: EndpointIdentity,
    events: Arc<Mutex<EventStream>>,
    state: Arc<watch::Sender<TransferState>>,
    next_id: AtomicU64,
}

impl<T: Transport> Central<T> {
    /// `events` must be the stream paired with the sink `transport` emits on.
    pub fn new(transport: T, events: EventStream, config: ChunklineConfig) -> Self {
        let identity = EndpointIdentity::from(&config.identity);
        let (state, _) = watch::channel(TransferState::Idle);
        Self {
            transport: Arc::new(transport),
            config,
            identity,
            events: Arc::new(Mutex::new(events)),
            state: Arc::new(state),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn config(&self) -> &ChunklineConfig {
        &self.config
    }

    pub fn state(&self) -> TransferState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<TransferState> {
        self.state.subscribe()
    }

    /// Whether a transfer currently holds the busy guard.
    pub fn is_busy(&self) -> bool {
        self.events.try_lock().is_err()
    }

    /// Begin an exchange. Must be called from within a tokio runtime.
    pub fn start(&self, payload: impl Into<Bytes>) -> Result<TransferHandle, SessionError> {
        let mut events = match self.events.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!("busy, ignoring request");
                return Err(SessionError::Busy);
            }
        };

        let mut stale = 0usize;
        while events.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(stale, "discarded events from a previous transfer");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let transfer = Transfer::new(
            id,
            self.transport.clone(),
            self.identity.clone(),
            &self.config,
            payload.into(),
            events,
            self.state.clone(),
        );
        let task = tokio::spawn(transfer.run(cancel_rx));

        Ok(TransferHandle {
            id,
            cancel: Some(cancel_tx),
            task,
        })
    }

    /// Start an exchange and wait for its response.
    pub async fn exchange(&self, payload: impl Into<Bytes>) -> Result<Response, SessionError> {
        self.start(payload)?.outcome().await
    }
}
