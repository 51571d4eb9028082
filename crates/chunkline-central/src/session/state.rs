//! Transfer state and deadline tracking.

use std::fmt;

use serde::Serialize;
use tokio::time::Instant;

use super::SessionError;

/// Where the active transfer is. `Idle` when none is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Idle,
    Discovering,
    Connecting,
    ResolvingEndpoints,
    Sending,
    AwaitingResponse,
    Completing,
}

impl TransferState {
    pub fn name(self) -> &'static str {
        match self {
            TransferState::Idle => "idle",
            TransferState::Discovering => "discovering",
            TransferState::Connecting => "connecting",
            TransferState::ResolvingEndpoints => "resolving_endpoints",
            TransferState::Sending => "sending",
            TransferState::AwaitingResponse => "awaiting_response",
            TransferState::Completing => "completing",
        }
    }

    /// States in which response fragments are accepted.
    pub fn receives_fragments(self) -> bool {
        matches!(self, TransferState::Sending | TransferState::AwaitingResponse)
    }

    /// States reached after a peer was found, where a link may exist.
    pub fn is_linked(self) -> bool {
        matches!(
            self,
            TransferState::Connecting
                | TransferState::ResolvingEndpoints
                | TransferState::Sending
                | TransferState::AwaitingResponse
                | TransferState::Completing
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeadlineKind {
    Discovery,
    Exchange,
}

/// The single timer armed for the current phase of a transfer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    pub at: Instant,
    pub kind: DeadlineKind,
}

impl Deadline {
    pub fn after(duration: std::time::Duration, kind: DeadlineKind) -> Self {
        Self {
            at: Instant::now() + duration,
            kind,
        }
    }

    pub fn error(self) -> SessionError {
        match self.kind {
            DeadlineKind::Discovery => SessionError::DiscoveryTimedOut,
            DeadlineKind::Exchange => SessionError::ExchangeTimedOut,
        }
    }
}
