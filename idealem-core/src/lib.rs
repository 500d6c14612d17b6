//! IDEALEM Core - Adaptive Buffer-Based Lossless Compression for Sensor Series
//!
//! Compresses scalar time-series sampled at fixed intervals by:
//! - Splitting the stream into variable-size blocks
//! - Matching each block against a small pool of recently seen blocks
//! - Emitting a compact token stream that references buffers instead of
//!   repeating raw data
//!
//! # Architecture
//!
//! - **Similarity**: two-sample Kolmogorov–Smirnov test and friends
//! - **Buffer pool**: fixed-capacity reference blocks with FIFO-at-0 eviction
//! - **Optimizer**: randomized and windowed block-size searches
//! - **Encoder / Decoder**: token stream producer and its exact replay
//! - **Storage**: checksummed on-disk records behind a sample-source boundary

pub mod compression;
pub mod pipeline;
pub mod storage;

mod error;
mod types;

pub use error::{IdealemError, Result};
pub use types::*;

/// IDEALEM version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Initial block size (2 hours at 5-minute sampling)
    pub const BLOCK_SIZE: usize = 24;

    /// Smallest block size the optimizer may choose (1 hour)
    pub const MIN_BLOCK_SIZE: usize = 12;

    /// Largest block size the optimizer may choose (4 hours)
    pub const MAX_BLOCK_SIZE: usize = 48;

    /// KS p-value above which two blocks are exchangeable
    pub const SIMILARITY_THRESHOLD: f64 = 0.8;

    /// Buffer pool capacity
    pub const NUM_BUFFERS: usize = 16;

    /// Candidate spread of the windowed search
    pub const SAMPLING_WINDOW: usize = 5;

    /// Narrowing rounds of the windowed search
    pub const SAMPLING_TRIALS: usize = 2;

    /// Proposed sizes within this distance of the current one are ignored
    pub const DENIAL_WINDOW: usize = 2;

    /// Most recent values kept for the windowed search
    pub const SAMPLING_RECENT_SIZE: usize = 1000;

    /// Blocks between two windowed searches
    pub const SAMPLING_INTERVAL: usize = 10;

    /// Bytes per original sample when computing persisted compression ratios
    pub const SAMPLE_BYTES: usize = 8;
}
