//! Mid-stream block size controllers
//!
//! The encoder consults its policy after every block except the last. A
//! proposal that differs from the current size becomes a `Resize` token and
//! flushes the buffer pool on both sides.

use super::optimizer::BlockSizeOptimizer;
use super::CompressorConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// What the encoder has seen so far, handed to the policy after each block
#[derive(Debug, Clone, Copy)]
pub struct ScanSnapshot<'a> {
    /// Block size in force
    pub block_size: usize,
    /// Blocks processed, including the one just encoded
    pub total_blocks: usize,
    /// HITs so far
    pub hits: usize,
    /// Whether the block just encoded was a HIT
    pub last_hit: bool,
    /// Best composite similarity of the last block against the pool, when
    /// the policy asked for it
    pub last_similarity: Option<f64>,
    /// Most recent raw values, oldest first
    pub recent: &'a [f64],
}

/// A block size controller
pub trait BlockSizePolicy: Send {
    /// Propose a block size after the block described by `snapshot`.
    ///
    /// `None` or the current size keeps it.
    fn propose_block_size(&mut self, snapshot: &ScanSnapshot<'_>) -> Option<usize>;

    /// Whether the encoder should fill in `last_similarity`
    fn needs_similarity(&self) -> bool {
        false
    }
}

/// Selects the controller built by [`PolicyKind::build`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Never adjust
    Fixed,
    /// Periodic windowed search over recent values
    #[default]
    Windowed,
    /// Hysteresis controller driven by hit ratio and similarity
    StabilityScore,
}

impl PolicyKind {
    /// Build the controller for `config`
    pub fn build(self, config: &CompressorConfig) -> Box<dyn BlockSizePolicy> {
        match self {
            PolicyKind::Fixed => Box::new(FixedBlockSize),
            PolicyKind::Windowed => Box::new(WindowedSampling::new(config)),
            PolicyKind::StabilityScore => Box::new(StabilityScore::new(config)),
        }
    }
}

/// Keeps the starting block size
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedBlockSize;

impl BlockSizePolicy for FixedBlockSize {
    fn propose_block_size(&mut self, _snapshot: &ScanSnapshot<'_>) -> Option<usize> {
        None
    }
}

/// From the third block on, every `sampling_interval` blocks, run the
/// windowed search over the recent values.
#[derive(Debug, Clone)]
pub struct WindowedSampling {
    optimizer: BlockSizeOptimizer,
    interval: usize,
}

impl WindowedSampling {
    pub fn new(config: &CompressorConfig) -> Self {
        Self {
            optimizer: BlockSizeOptimizer::new(config),
            interval: config.sampling_interval.max(1),
        }
    }
}

impl BlockSizePolicy for WindowedSampling {
    fn propose_block_size(&mut self, snapshot: &ScanSnapshot<'_>) -> Option<usize> {
        if snapshot.total_blocks < 3 || snapshot.total_blocks % self.interval != 0 {
            return None;
        }
        let proposed = self
            .optimizer
            .windowed_search(snapshot.recent, snapshot.block_size);
        (proposed != snapshot.block_size).then_some(proposed)
    }
}

/// Stability-score controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Score after every size change
    pub initial_score: f64,
    /// Score ceiling
    pub max_score: f64,
    /// Periods at one size before a stabilization phase may start
    pub stability_threshold: usize,
    /// Blocks per hit-ratio window
    pub window_size: usize,
    /// Window hit ratios kept during a stabilization phase
    pub stability_window_size: usize,
    /// Blocks between two adjustments (doubled above score 80)
    pub min_adjustment_interval: usize,
    /// Blocks processed before the first adjustment
    pub min_blocks_before_adjustment: usize,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            initial_score: 20.0,
            max_score: 100.0,
            stability_threshold: 5,
            window_size: 10,
            stability_window_size: 10,
            min_adjustment_interval: 5,
            min_blocks_before_adjustment: 5,
        }
    }
}

/// Grows the block size while hits and similarity are high, shrinks it when
/// either is poor, and holds still once the current size has proven stable.
#[derive(Debug, Clone)]
pub struct StabilityScore {
    settings: StabilityConfig,
    min_block_size: usize,
    max_block_size: usize,
    score: f64,
    stable_block_size: Option<usize>,
    stable_periods: usize,
    in_stabilization: bool,
    stability_hit_ratios: VecDeque<f64>,
    window_blocks: usize,
    window_hits: usize,
    last_window_hit_ratio: Option<f64>,
    similarities: VecDeque<f64>,
    last_adjustment_block: usize,
}

/// Similarity scores averaged for the recent similarity
const SIMILARITY_HISTORY: usize = 5;

impl StabilityScore {
    pub fn new(config: &CompressorConfig) -> Self {
        let settings = config.stability.clone();
        Self {
            score: settings.initial_score,
            settings,
            min_block_size: config.min_block_size,
            max_block_size: config.max_block_size,
            stable_block_size: None,
            stable_periods: 0,
            in_stabilization: false,
            stability_hit_ratios: VecDeque::new(),
            window_blocks: 0,
            window_hits: 0,
            last_window_hit_ratio: None,
            similarities: VecDeque::with_capacity(SIMILARITY_HISTORY),
            last_adjustment_block: 0,
        }
    }

    /// Current stability score
    pub fn score(&self) -> f64 {
        self.score
    }

    fn recent_similarity(&self) -> f64 {
        if self.similarities.len() < SIMILARITY_HISTORY {
            1.0
        } else {
            self.similarities.iter().sum::<f64>() / self.similarities.len() as f64
        }
    }

    fn record(&mut self, snapshot: &ScanSnapshot<'_>) {
        if let Some(similarity) = snapshot.last_similarity {
            if self.similarities.len() == SIMILARITY_HISTORY {
                self.similarities.pop_front();
            }
            self.similarities.push_back(similarity);
        }

        self.window_blocks += 1;
        if snapshot.last_hit {
            self.window_hits += 1;
        }
        if self.window_blocks >= self.settings.window_size.max(1) {
            self.last_window_hit_ratio = Some(self.window_hits as f64 / self.window_blocks as f64);
            self.window_blocks = 0;
            self.window_hits = 0;
        }
    }

    fn update_score(&mut self, block_size: usize, hit_ratio: f64, similarity: f64) {
        if self.stable_block_size != Some(block_size) {
            self.stable_block_size = Some(block_size);
            self.stable_periods = 1;
            self.score = self.settings.initial_score;
            self.in_stabilization = false;
            self.stability_hit_ratios.clear();
            return;
        }

        self.stable_periods += 1;
        let hit_good = hit_ratio >= 0.55;
        let similarity_good = similarity >= 0.6;
        let max = self.settings.max_score;

        self.score = match (hit_good, similarity_good) {
            (true, true) => {
                let step = ((max - self.score) * 0.1).floor().max(1.0);
                (self.score + step).min(max)
            }
            (true, false) | (false, true) => (self.score + 1.0).min(max),
            (false, false) => (self.score - 2.0).max(0.0),
        };
    }
}

impl BlockSizePolicy for StabilityScore {
    fn propose_block_size(&mut self, snapshot: &ScanSnapshot<'_>) -> Option<usize> {
        self.record(snapshot);

        if snapshot.total_blocks < self.settings.min_blocks_before_adjustment {
            return None;
        }

        let overall = snapshot.hits as f64 / snapshot.total_blocks.max(1) as f64;
        let hit_ratio = self.last_window_hit_ratio.unwrap_or(overall);
        let similarity = self.recent_similarity();

        if self.in_stabilization {
            if self.stability_hit_ratios.len() == self.settings.stability_window_size.max(1) {
                self.stability_hit_ratios.pop_front();
            }
            self.stability_hit_ratios.push_back(hit_ratio);
        }

        self.update_score(snapshot.block_size, hit_ratio, similarity);

        let since_adjustment = snapshot.total_blocks - self.last_adjustment_block;
        if self.stable_periods >= self.settings.stability_threshold && self.score >= 50.0 {
            self.in_stabilization = true;
            let holding = self.stability_hit_ratios.is_empty()
                || self.stability_hit_ratios.iter().sum::<f64>()
                    / self.stability_hit_ratios.len() as f64
                    >= 0.5;
            if holding
                && self.score > 80.0
                && since_adjustment < self.settings.min_adjustment_interval * 2
            {
                return None;
            }
        }

        if since_adjustment < self.settings.min_adjustment_interval {
            return None;
        }

        let current = snapshot.block_size;
        let proposed = if hit_ratio > 0.6 && similarity > 0.7 {
            ((current as f64 * 1.2) as usize).min(self.max_block_size)
        } else if hit_ratio < 0.4 || similarity < 0.5 {
            ((current as f64 * 0.8) as usize).max(self.min_block_size)
        } else {
            current
        };

        if proposed == current {
            return None;
        }
        debug!(
            "Stability score {:.0}: block size {} -> {} (hit_ratio={:.3}, similarity={:.3})",
            self.score, current, proposed, hit_ratio, similarity
        );
        self.last_adjustment_block = snapshot.total_blocks;
        Some(proposed)
    }

    fn needs_similarity(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(block_size: usize, total_blocks: usize, hits: usize, last_hit: bool) -> ScanSnapshot<'static> {
        ScanSnapshot {
            block_size,
            total_blocks,
            hits,
            last_hit,
            last_similarity: Some(if last_hit { 1.0 } else { 0.1 }),
            recent: &[],
        }
    }

    #[test]
    fn test_fixed_never_proposes() {
        let mut policy = FixedBlockSize;
        for blocks in 1..50 {
            assert_eq!(policy.propose_block_size(&snapshot(24, blocks, 0, false)), None);
        }
    }

    #[test]
    fn test_windowed_only_on_interval() {
        let config = CompressorConfig::default();
        let mut policy = WindowedSampling::new(&config);
        let recent: Vec<f64> = (0..240).map(|i| (i % 24) as f64).collect();
        for total_blocks in [1, 2, 3, 7, 9, 11] {
            let snap = ScanSnapshot {
                recent: &recent,
                ..snapshot(24, total_blocks, 0, false)
            };
            assert_eq!(policy.propose_block_size(&snap), None);
        }
    }

    #[test]
    fn test_windowed_proposal_stays_in_bounds() {
        let config = CompressorConfig::default();
        let mut policy = WindowedSampling::new(&config);
        let recent: Vec<f64> = (0..600).map(|i| ((i % 12) as f64).powi(2)).collect();
        let snap = ScanSnapshot {
            recent: &recent,
            ..snapshot(40, 10, 0, false)
        };
        if let Some(size) = policy.propose_block_size(&snap) {
            assert!((12..=48).contains(&size));
            assert_ne!(size, 40);
        }
    }

    #[test]
    fn test_stability_shrinks_on_misses() {
        let config = CompressorConfig::default();
        let mut policy = StabilityScore::new(&config);
        let mut proposal = None;
        for total_blocks in 1..=5 {
            proposal = policy.propose_block_size(&snapshot(30, total_blocks, 0, false));
        }
        assert_eq!(proposal, Some(24));
    }

    #[test]
    fn test_stability_grows_on_hits_and_respects_max() {
        let config = CompressorConfig::default();
        let mut policy = StabilityScore::new(&config);
        let mut proposal = None;
        for total_blocks in 1..=5 {
            proposal = policy.propose_block_size(&snapshot(45, total_blocks, total_blocks, true));
        }
        assert_eq!(proposal, Some(48));
    }

    #[test]
    fn test_stability_waits_between_adjustments() {
        let config = CompressorConfig::default();
        let mut policy = StabilityScore::new(&config);
        for total_blocks in 1..=5 {
            policy.propose_block_size(&snapshot(30, total_blocks, 0, false));
        }
        for total_blocks in 6..=9 {
            assert_eq!(policy.propose_block_size(&snapshot(24, total_blocks, 0, false)), None);
        }
        assert_eq!(policy.propose_block_size(&snapshot(24, 10, 0, false)), Some(19));
    }

    #[test]
    fn test_stability_score_rises_while_stable() {
        let config = CompressorConfig::default();
        let mut policy = StabilityScore::new(&config);
        let mut hits = 0;
        for total_blocks in 1..=30 {
            hits += 1;
            // Mid-range hit ratio and similarity: no adjustment, score climbs
            let snap = ScanSnapshot {
                last_similarity: Some(0.65),
                ..snapshot(24, total_blocks, hits / 2, total_blocks % 2 == 0)
            };
            assert_eq!(policy.propose_block_size(&snap), None);
        }
        assert!(policy.score() > 20.0);
    }

    #[test]
    fn test_policy_kind_serde() {
        let kind: PolicyKind = serde_json::from_str("\"stability_score\"").unwrap();
        assert_eq!(kind, PolicyKind::StabilityScore);
        assert!(kind.build(&CompressorConfig::default()).needs_similarity());
        assert!(!PolicyKind::Windowed.build(&CompressorConfig::default()).needs_similarity());
    }
}
