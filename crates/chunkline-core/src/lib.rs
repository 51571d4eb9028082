//! chunkline-core — fragment wire format, chunking, reassembly and configuration.
//! All other chunkline crates depend on this one.

pub mod chunker;
pub mod config;
pub mod dechunker;
pub mod wire;

pub use chunker::make_fragments;
pub use config::{ChunklineConfig, ConfigError};
pub use dechunker::{DechunkError, Dechunker, FragmentOutcome};
pub use wire::Fragment;
