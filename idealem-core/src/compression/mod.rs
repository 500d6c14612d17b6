//! Adaptive buffer-based lossless compression
//!
//! A value stream is cut into blocks. Each block is either a reference to a
//! buffer already held by both sides (a HIT) or sent raw and remembered.
//! The block size adapts mid-stream; every change flushes the buffers.
//!
//! Achieves large ratios on periodic sensor data where whole blocks repeat.

mod buffer_pool;
mod decoder;
mod encoder;
mod optimizer;
mod policy;
pub mod similarity;
mod wire;

pub use buffer_pool::{BufferPool, InsertResult};
pub use decoder::{decompress, Decoder};
pub use encoder::{Encoder, EncoderState};
pub use optimizer::{simulate_compress, BlockSizeOptimizer, SimulationOutcome};
pub use policy::{
    BlockSizePolicy, FixedBlockSize, PolicyKind, ScanSnapshot, StabilityConfig, StabilityScore,
    WindowedSampling,
};
pub use similarity::{KsTest, SimilarityWeights};
pub use wire::EncodedStream;

use crate::{config, IdealemError, Result};
use serde::{Deserialize, Serialize};

/// Replace a buffer slot; followed by the slot index and a raw block
pub const OVERWRITE_MARKER: u32 = 0xFF;

/// Flush buffers and switch block size; followed by the new size
pub const BLOCKSIZE_MARKER: u32 = 0xFE;

/// Raw block follows
pub const RAW_MARKER: u32 = 0xFD;

/// One instruction of the encoded stream
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Block equals the buffer at this index
    Hit(u32),
    /// No match; block is sent raw and appended to (or evicts slot 0 of) the pool
    Raw(Vec<f64>),
    /// No match with a full pool; block replaces `slot` and is sent raw
    Overwrite { slot: u32, block: Vec<f64> },
    /// Buffers are flushed and the block size becomes this value
    Resize(u32),
}

impl Token {
    /// Check if this token is a buffer reference
    pub fn is_hit(&self) -> bool {
        matches!(self, Token::Hit(_))
    }
}

/// How a block must agree with a buffer to count as a HIT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// KS-exchangeable and bit-identical; round trips exactly
    #[default]
    Exact,
    /// KS-exchangeable only; the decoder replays the buffer's values
    Shape,
}

/// Compressor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    /// Block size used when the initial search is disabled
    pub block_size: usize,
    /// Smallest block size any search may return
    pub min_block_size: usize,
    /// Largest block size any search may return
    pub max_block_size: usize,
    /// KS p-value above which blocks are exchangeable
    pub similarity_threshold: f64,
    /// Buffer pool capacity (must stay below `RAW_MARKER`)
    pub num_buffers: usize,
    /// Windowed search: candidate spread and narrowing radius
    pub sampling_window: usize,
    /// Windowed search: narrowing rounds
    pub sampling_trials: usize,
    /// Windowed search: proposals within this distance are ignored
    pub denial_window: usize,
    /// Windowed search: most recent values considered
    pub sampling_recent_size: usize,
    /// Windowed search: blocks between two searches
    pub sampling_interval: usize,
    /// Multistage search: polynomial fit window around the best size
    pub wc: usize,
    /// Multistage search: resampling window around the best size
    pub wp: usize,
    /// Multistage search: vertex tolerance around the best size
    pub wn: usize,
    /// Multistage search: candidates drawn per stage
    pub sample_size: usize,
    /// Multistage search: number of stages
    pub stages: usize,
    /// Multistage search: evaluation budget (default `sample_size * stages + 4`)
    pub kmax: Option<usize>,
    /// Run the multistage search over the whole input before scanning
    pub initial_search: bool,
    /// Mid-stream block size controller
    pub policy: PolicyKind,
    /// HIT criterion
    pub match_mode: MatchMode,
    /// Seed for the multistage search; entropy when absent
    pub seed: Option<u64>,
    /// Stability-score controller settings
    pub stability: StabilityConfig,
    /// Weights of the composite similarity score
    pub similarity_weights: SimilarityWeights,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            block_size: config::BLOCK_SIZE,
            min_block_size: config::MIN_BLOCK_SIZE,
            max_block_size: config::MAX_BLOCK_SIZE,
            similarity_threshold: config::SIMILARITY_THRESHOLD,
            num_buffers: config::NUM_BUFFERS,
            sampling_window: config::SAMPLING_WINDOW,
            sampling_trials: config::SAMPLING_TRIALS,
            denial_window: config::DENIAL_WINDOW,
            sampling_recent_size: config::SAMPLING_RECENT_SIZE,
            sampling_interval: config::SAMPLING_INTERVAL,
            wc: 5,
            wp: 5,
            wn: 2,
            sample_size: 5,
            stages: 3,
            kmax: None,
            initial_search: true,
            policy: PolicyKind::Windowed,
            match_mode: MatchMode::Exact,
            seed: None,
            stability: StabilityConfig::default(),
            similarity_weights: SimilarityWeights::default(),
        }
    }
}

impl CompressorConfig {
    /// Fixed block size, no adaptation; handy for reproducible streams
    pub fn fixed(block_size: usize, num_buffers: usize) -> Self {
        Self {
            block_size,
            min_block_size: block_size.min(config::MIN_BLOCK_SIZE),
            max_block_size: block_size.max(config::MAX_BLOCK_SIZE),
            num_buffers,
            initial_search: false,
            policy: PolicyKind::Fixed,
            ..Default::default()
        }
    }

    /// Evaluation budget of the multistage search
    pub fn kmax(&self) -> usize {
        self.kmax.unwrap_or(self.sample_size * self.stages + 4)
    }

    /// Check the configuration for values the encoder cannot honor
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(IdealemError::Config(msg));

        if self.num_buffers == 0 || self.num_buffers >= RAW_MARKER as usize {
            return fail(format!(
                "num_buffers must be in 1..{}, got {}",
                RAW_MARKER, self.num_buffers
            ));
        }
        if self.min_block_size == 0 || self.min_block_size > self.max_block_size {
            return fail(format!(
                "invalid block size bounds [{}, {}]",
                self.min_block_size, self.max_block_size
            ));
        }
        if self.max_block_size > u32::MAX as usize {
            return fail(format!("max_block_size {} does not fit the stream", self.max_block_size));
        }
        if self.block_size < self.min_block_size || self.block_size > self.max_block_size {
            return fail(format!(
                "block_size {} outside [{}, {}]",
                self.block_size, self.min_block_size, self.max_block_size
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return fail(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            ));
        }
        if self.sampling_interval == 0 || self.sampling_trials == 0 || self.sampling_recent_size == 0 {
            return fail("sampling interval, trials and recent size must be positive".into());
        }
        if self.stages == 0 || self.sample_size == 0 || self.kmax() == 0 {
            return fail("multistage search needs at least one stage and one sample".into());
        }
        Ok(())
    }
}

/// Metadata persisted next to an encoded stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionMetadata {
    /// Block size in force at the end of the stream
    pub block_size: usize,
    /// Buffer pool capacity used by encoder and decoder
    pub num_buffers: usize,
    /// Number of values to reconstruct
    pub original_length: usize,
    /// HITs over processed blocks
    pub hit_ratio: f64,
    /// Filled in from persisted sizes once stored; 0 until then
    pub compression_ratio: f64,
}

/// Output of one compression run
#[derive(Debug, Clone, PartialEq)]
pub struct Compressed {
    /// Token stream
    pub stream: EncodedStream,
    /// Replay metadata
    pub metadata: CompressionMetadata,
    /// Number of blocks processed
    pub total_blocks: usize,
    /// Number of HIT blocks
    pub hits: usize,
}

impl Compressed {
    /// Replay the stream back into values
    pub fn decompress(&self) -> Result<Vec<f64>> {
        decompress(self.stream.tokens(), &self.metadata)
    }
}
