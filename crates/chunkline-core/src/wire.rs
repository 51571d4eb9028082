//! chunkline wire format — the on-air layout of a single fragment.
//!
//! Every fragment is one transport packet:
//!
//! ```text
//! [flags: u8][body: 0..=max_fragment_size bytes]
//!   bit 0    : FINAL — set only on the last fragment of a payload
//!   bits 1-7 : reserved, must be zero
//! ```
//!
//! The receiver learns that a payload is complete from the FINAL bit alone.
//! Body length carries no meaning, so a payload whose length is an exact
//! multiple of the body size still terminates.

use bytes::{BufMut, Bytes, BytesMut};

use crate::dechunker::DechunkError;

/// Length of the fragment header in bytes.
pub const HEADER_LEN: usize = 1;

/// Header bit marking the last fragment of a payload.
pub const FLAG_FINAL: u8 = 0x01;

/// Mask of header bits that must be zero.
pub const RESERVED_FLAGS: u8 = !FLAG_FINAL;

/// Default maximum body length. With the header byte this fills the 20-byte
/// payload of a default BLE ATT packet.
pub const DEFAULT_MAX_FRAGMENT_SIZE: usize = 19;

/// One fragment of a payload, as produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Whether this is the last fragment of its payload.
    pub is_final: bool,
    /// The slice of payload this fragment carries.
    pub body: Bytes,
}

impl Fragment {
    /// Serialize to the wire layout.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        out.put_u8(if self.is_final { FLAG_FINAL } else { 0 });
        out.extend_from_slice(&self.body);
        out.freeze()
    }

    /// Parse one wire packet into an owned fragment.
    pub fn decode(packet: &[u8]) -> Result<Self, DechunkError> {
        let (is_final, body) = parse(packet)?;
        Ok(Self {
            is_final,
            body: Bytes::copy_from_slice(body),
        })
    }

    /// Length of this fragment on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }
}

/// Split a wire packet into its FINAL flag and body without copying.
pub fn parse(packet: &[u8]) -> Result<(bool, &[u8]), DechunkError> {
    let (&flags, body) = packet.split_first().ok_or(DechunkError::EmptyFragment)?;
    if flags & RESERVED_FLAGS != 0 {
        return Err(DechunkError::ReservedFlags(flags));
    }
    Ok((flags & FLAG_FINAL != 0, body))
}
