//! Outbound fragment transmission — the data plane.
//!
//! Request payloads are split by the chunker and written one fragment at a
//! time, paced, on a task of their own so reception is never blocked.

pub mod send_worker;

pub use send_worker::SendWorker;
