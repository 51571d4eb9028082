//! Send worker — writes a transfer's fragments in order with fixed pacing.
//!
//! There is no flow-control signal from the receiver, so a constant delay
//! between writes stands in for backpressure. Writes are not retried; the
//! first failure ends the worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chunkline_core::Fragment;

use crate::transport::{EndpointHandle, PeerHandle, Transport, TransportError};

pub struct SendWorker<T: Transport> {
    transport: Arc<T>,
    peer: PeerHandle,
    endpoint: EndpointHandle,
    fragments: Vec<Fragment>,
    pacing: Duration,
    progress: Arc<AtomicUsize>,
}

impl<T: Transport> SendWorker<T> {
    pub fn new(
        transport: Arc<T>,
        peer: PeerHandle,
        endpoint: EndpointHandle,
        fragments: Vec<Fragment>,
        pacing: Duration,
    ) -> Self {
        Self {
            transport,
            peer,
            endpoint,
            fragments,
            pacing,
            progress: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of fragments written so far, readable while the worker runs.
    pub fn progress(&self) -> Arc<AtomicUsize> {
        self.progress.clone()
    }

    /// Write every fragment. Returns how many were written.
    pub async fn run(self) -> Result<usize, TransportError> {
        let total = self.fragments.len();

        for (i, fragment) in self.fragments.into_iter().enumerate() {
            if i > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            let wire = fragment.encode();
            tracing::trace!(
                index = i + 1,
                total,
                wire_len = wire.len(),
                is_final = fragment.is_final,
                preview = hex::encode(&wire[..wire.len().min(8)]),
                "sending fragment"
            );

            if let Err(e) = self.transport.write_fragment(self.peer, self.endpoint, wire) {
                tracing::warn!(index = i + 1, total, error = %e, "fragment write failed");
                return Err(e);
            }
            self.progress.fetch_add(1, Ordering::Release);
        }

        tracing::debug!(fragments = total, peer = %self.peer, "request fully written");
        Ok(total)
    }
}
