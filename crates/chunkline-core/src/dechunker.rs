//! Dechunker — accumulate fragments back into a payload.
//!
//! Fragments must be fed in the order the chunker produced them. The
//! dechunker does no reordering and no deduplication; it relies on the
//! transport delivering each connection's packets in order, exactly once.
//!
//! After any completion or rejection the buffer is empty and the dechunker
//! behaves as if freshly constructed.

use bytes::{Bytes, BytesMut};

use crate::wire;

/// Result of feeding one accepted fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Fragment appended; more are expected.
    Incomplete,
    /// Fragment appended and it was the last one. Carries the whole payload.
    Complete(Bytes),
}

/// Why a fragment was rejected. The partial payload is discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DechunkError {
    #[error("fragment body is {len} bytes, limit is {max}")]
    OversizedFragment { len: usize, max: usize },
    #[error("fragment has no header byte")]
    EmptyFragment,
    #[error("fragment header has reserved bits set: {0:#04x}")]
    ReservedFlags(u8),
    #[error("reassembled payload would reach {len} bytes, limit is {max}")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Stateful reassembler for one payload at a time.
#[derive(Debug)]
pub struct Dechunker {
    max_fragment_size: usize,
    max_payload_len: usize,
    buffer: BytesMut,
    fragments: usize,
}

impl Dechunker {
    pub fn new(max_fragment_size: usize, max_payload_len: usize) -> Self {
        Self {
            max_fragment_size,
            max_payload_len,
            buffer: BytesMut::new(),
            fragments: 0,
        }
    }

    /// Feed one wire packet.
    pub fn add_fragment(&mut self, packet: &[u8]) -> Result<FragmentOutcome, DechunkError> {
        let (is_final, body) = match wire::parse(packet) {
            Ok(parts) => parts,
            Err(e) => return Err(self.reject(e)),
        };

        if body.len() > self.max_fragment_size {
            return Err(self.reject(DechunkError::OversizedFragment {
                len: body.len(),
                max: self.max_fragment_size,
            }));
        }

        let total = self.buffer.len() + body.len();
        if total > self.max_payload_len {
            return Err(self.reject(DechunkError::PayloadTooLarge {
                len: total,
                max: self.max_payload_len,
            }));
        }

        self.buffer.extend_from_slice(body);
        self.fragments += 1;
        tracing::trace!(
            body_len = body.len(),
            buffered = self.buffer.len(),
            is_final,
            "fragment accepted"
        );

        if is_final {
            let payload = self.buffer.split().freeze();
            self.fragments = 0;
            Ok(FragmentOutcome::Complete(payload))
        } else {
            Ok(FragmentOutcome::Incomplete)
        }
    }

    /// Drop any partial payload.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.fragments = 0;
    }

    /// Bytes accumulated so far for the payload in progress.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Fragments accepted so far for the payload in progress.
    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    fn reject(&mut self, err: DechunkError) -> DechunkError {
        tracing::debug!(error = %err, discarded = self.buffer.len(), "fragment rejected");
        self.reset();
        err
    }
}
