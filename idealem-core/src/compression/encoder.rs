//! Block encoder
//!
//! Scans the values left to right. Each block becomes a HIT on an existing
//! buffer or is sent raw and remembered; the block size policy may switch
//! sizes between blocks.

use super::buffer_pool::{BufferPool, InsertResult};
use super::optimizer::BlockSizeOptimizer;
use super::policy::ScanSnapshot;
use super::similarity::similarity_score;
use super::{
    CompressionMetadata, Compressed, CompressorConfig, EncodedStream, MatchMode, SimilarityWeights,
    Token,
};
use crate::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Mutable state of one compression run
#[derive(Debug, Clone)]
pub struct EncoderState {
    block_size: usize,
    pool: BufferPool,
    stream: Vec<Token>,
    hits: usize,
    total_blocks: usize,
}

impl EncoderState {
    /// Fresh state with an empty pool and stream
    pub fn new(block_size: usize, num_buffers: usize) -> Self {
        Self {
            block_size,
            pool: BufferPool::new(num_buffers),
            stream: Vec::new(),
            hits: 0,
            total_blocks: 0,
        }
    }

    /// Encode one block. Returns true on a HIT.
    pub fn encode_block(&mut self, block: &[f64], threshold: f64, mode: MatchMode) -> bool {
        self.total_blocks += 1;

        let matched = match mode {
            MatchMode::Exact => self.pool.try_match_lossless(block, threshold),
            MatchMode::Shape => self.pool.try_match(block, threshold),
        };
        if let Some(index) = matched {
            self.stream.push(Token::Hit(index as u32));
            self.hits += 1;
            return true;
        }

        let token = match self.pool.insert_or_overwrite(block) {
            InsertResult::Appended(_) => Token::Raw(block.to_vec()),
            InsertResult::Overwrote(slot) => Token::Overwrite {
                slot: slot as u32,
                block: block.to_vec(),
            },
        };
        self.stream.push(token);
        false
    }

    /// Switch to `new_size` and flush every buffer
    pub fn change_block_size(&mut self, new_size: u32) {
        self.stream.push(Token::Resize(new_size));
        self.block_size = new_size as usize;
        self.pool.clear();
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn stream(&self) -> &[Token] {
        &self.stream
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    /// HITs over processed blocks; 0 before the first block
    pub fn hit_ratio(&self) -> f64 {
        if self.total_blocks == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_blocks as f64
        }
    }

    pub fn into_stream(self) -> EncodedStream {
        EncodedStream::from_tokens(self.stream)
    }
}

/// Adaptive block compressor
#[derive(Debug, Clone)]
pub struct Encoder {
    config: CompressorConfig,
}

impl Encoder {
    /// Create an encoder after validating `config`
    pub fn new(config: CompressorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    /// Compress `values`.
    ///
    /// Returns `None` when there are fewer values than `min_block_size`.
    pub fn compress(&self, values: &[f64]) -> Option<Compressed> {
        let config = &self.config;
        if values.len() < config.min_block_size {
            debug!(
                "Skipping compression: {} values, need at least {}",
                values.len(),
                config.min_block_size
            );
            return None;
        }

        let initial = self.initial_block_size(values);
        let mut state = EncoderState::new(initial, config.num_buffers);
        let mut policy = config.policy.build(config);
        let mut recent: VecDeque<f64> = VecDeque::with_capacity(config.sampling_recent_size);
        let mut pos = 0;

        while pos < values.len() {
            let end = (pos + state.block_size()).min(values.len());
            let block = &values[pos..end];

            recent.extend(block.iter().copied());
            while recent.len() > config.sampling_recent_size {
                recent.pop_front();
            }

            let last_similarity = policy
                .needs_similarity()
                .then(|| best_similarity(state.pool(), block, &config.similarity_weights));
            let hit = state.encode_block(block, config.similarity_threshold, config.match_mode);
            pos = end;

            // No resize after the last block
            if pos >= values.len() {
                break;
            }

            let snapshot = ScanSnapshot {
                block_size: state.block_size(),
                total_blocks: state.total_blocks(),
                hits: state.hits(),
                last_hit: hit,
                last_similarity,
                recent: recent.make_contiguous(),
            };
            if let Some(proposed) = policy.propose_block_size(&snapshot) {
                let proposed = proposed.clamp(config.min_block_size, config.max_block_size);
                if proposed != state.block_size() {
                    info!(
                        "Block size {} -> {} at block {}",
                        state.block_size(),
                        proposed,
                        state.total_blocks()
                    );
                    state.change_block_size(proposed as u32);
                }
            }
        }

        let total_blocks = state.total_blocks();
        let hits = state.hits();
        let metadata = CompressionMetadata {
            block_size: state.block_size(),
            num_buffers: config.num_buffers,
            original_length: values.len(),
            hit_ratio: state.hit_ratio(),
            // Computed from persisted sizes by the store
            compression_ratio: 0.0,
        };
        let stream = state.into_stream();

        info!(
            "Compressed {} values into {} tokens: {} blocks, {} hits (hit_ratio={:.4})",
            values.len(),
            stream.len(),
            total_blocks,
            hits,
            metadata.hit_ratio
        );

        Some(Compressed {
            stream,
            metadata,
            total_blocks,
            hits,
        })
    }

    fn initial_block_size(&self, values: &[f64]) -> usize {
        if !self.config.initial_search {
            return self.config.block_size;
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let size = BlockSizeOptimizer::new(&self.config).multistage_search(values, &mut rng);
        debug!("Initial block size search picked {}", size);
        size
    }
}

/// Best composite similarity of `block` against the live buffers
fn best_similarity(pool: &BufferPool, block: &[f64], weights: &SimilarityWeights) -> f64 {
    pool.iter()
        .map(|buffer| similarity_score(block, buffer, weights))
        .fold(0.0, f64::max)
}
