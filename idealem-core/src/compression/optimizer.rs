//! Block size search
//!
//! Both searches score a candidate size by simulating a compression pass
//! over sample data:
//!
//! - **Multistage** (run once over the whole input): random candidates,
//!   resampled around the best one for a few stages, then refined by a
//!   quadratic fit of the metric around the winner.
//! - **Windowed** (run periodically on recent data): evenly spaced
//!   candidates, narrowed around the best hit ratio each trial, with a
//!   denial window against small adjustments.

use super::buffer_pool::{BufferPool, InsertResult};
use super::similarity::ks_raw_exchangeable;
use super::CompressorConfig;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use tracing::debug;

/// Result of a simulated compression pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationOutcome {
    /// `len(data) / tokens emitted`
    pub compression_ratio: f64,
    /// Blocks that matched a buffer
    pub hits: usize,
    /// Blocks processed, including a trailing partial block
    pub blocks: usize,
    /// Whole blocks in the data (`len(data) / block_size`)
    pub full_blocks: usize,
}

impl SimulationOutcome {
    /// Hits per whole block; 0 when the data is shorter than one block
    pub fn hit_ratio(&self) -> f64 {
        if self.full_blocks == 0 {
            0.0
        } else {
            self.hits as f64 / self.full_blocks as f64
        }
    }
}

/// Block size search over simulated compression passes
#[derive(Debug, Clone)]
pub struct BlockSizeOptimizer {
    config: CompressorConfig,
}

impl BlockSizeOptimizer {
    /// Create an optimizer bound to a compressor configuration
    pub fn new(config: &CompressorConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Simulate compressing `data` with `block_size` and this optimizer's pool settings
    pub fn simulate(&self, data: &[f64], block_size: usize) -> SimulationOutcome {
        simulate_compress(
            data,
            block_size,
            self.config.num_buffers,
            self.config.similarity_threshold,
        )
    }

    /// Multistage random sampling over `[min_block_size, max_block_size]`
    /// maximizing the simulated compression ratio.
    pub fn multistage_search<R: Rng + ?Sized>(&self, data: &[f64], rng: &mut R) -> usize {
        let (min_n, max_n) = (self.config.min_block_size, self.config.max_block_size);
        let kmax = self.config.kmax();
        let mut cache: HashMap<usize, f64> = HashMap::new();
        let mut metric = |n: usize| {
            *cache
                .entry(n)
                .or_insert_with(|| self.simulate(data, n).compression_ratio)
        };

        let mut samples: Vec<usize> = (min_n..=max_n).collect();
        samples.shuffle(rng);
        samples.truncate(self.config.sample_size);

        let Some(&first) = samples.first() else {
            return min_n;
        };
        let mut nbest = first;
        let mut best_metric = f64::NEG_INFINITY;
        let mut evaluated = 0;

        for stage in 0..self.config.stages {
            if evaluated >= kmax {
                break;
            }
            for &n in &samples {
                let value = metric(n);
                if value > best_metric {
                    best_metric = value;
                    nbest = n;
                }
                evaluated += 1;
                if evaluated >= kmax {
                    break;
                }
            }
            debug!(
                "Multistage stage {}: candidates={:?}, best n={} (ratio={:.4})",
                stage + 1,
                samples,
                nbest,
                best_metric
            );

            if stage + 1 < self.config.stages {
                samples = window_around(nbest, self.config.wp, min_n, max_n);
                samples.shuffle(rng);
                samples.truncate(self.config.sample_size);
            }
        }

        // Quadratic refinement around the winner
        let window = window_around(nbest, self.config.wc, min_n, max_n);
        if window.len() < 3 {
            return nbest;
        }
        let points: Vec<(f64, f64)> = window
            .iter()
            .map(|&n| (n as f64 - nbest as f64, metric(n)))
            .collect();

        adopt_vertex(nbest, &points, self.config.wn, min_n, max_n)
    }

    /// Windowed sampling around the current size maximizing the simulated
    /// hit ratio. Returns `current` unless the winner differs by more than
    /// the denial window.
    pub fn windowed_search(&self, data: &[f64], current: usize) -> usize {
        let mut cache: HashMap<usize, SimulationOutcome> = HashMap::new();
        self.windowed_best(current, |n| {
            cache
                .entry(n)
                .or_insert_with(|| self.simulate(data, n))
                .hit_ratio()
        })
    }

    /// Coarse grid over the size range, then `sampling_trials - 1` rounds
    /// narrowed to `±sampling_window` around the running winner.
    fn windowed_best(&self, current: usize, mut score: impl FnMut(usize) -> f64) -> usize {
        let (min_n, max_n) = (self.config.min_block_size, self.config.max_block_size);
        let window = self.config.sampling_window;
        let step = (max_n.saturating_sub(min_n) / window.max(1)).max(1);

        let mut candidates: Vec<usize> = (min_n..=max_n).step_by(step).collect();
        let mut best_n = current;
        let mut best_hit_ratio = -1.0;

        for trial in 0..self.config.sampling_trials {
            let mut round_best: Option<(usize, f64)> = None;
            for &n in &candidates {
                let hit_ratio = score(n);
                if round_best.map_or(true, |(_, best)| hit_ratio > best) {
                    round_best = Some((n, hit_ratio));
                }
            }
            if let Some((n, hit_ratio)) = round_best {
                best_n = n;
                best_hit_ratio = hit_ratio;
            }
            debug!(
                "Windowed trial {}: candidates={:?}, best n={} (hit_ratio={:.4})",
                trial + 1,
                candidates,
                best_n,
                best_hit_ratio
            );
            candidates = window_around(best_n, window, min_n, max_n);
        }

        if best_n.abs_diff(current) > self.config.denial_window {
            debug!(
                "Windowed search proposes {} -> {} (hit_ratio={:.4})",
                current, best_n, best_hit_ratio
            );
            best_n
        } else {
            current
        }
    }
}

/// Vertex of the quadratic fitted to `points` (offsets from `nbest`).
/// Adopted, clamped to the size range, only when it lies outside `±wn`.
fn adopt_vertex(
    nbest: usize,
    points: &[(f64, f64)],
    wn: usize,
    min_n: usize,
    max_n: usize,
) -> usize {
    let Some((a, b, _)) = fit_quadratic(points) else {
        return nbest;
    };
    if a == 0.0 {
        return nbest;
    }
    let vertex = (nbest as f64 - b / (2.0 * a)).round();
    if !vertex.is_finite() {
        return nbest;
    }

    let wn = wn as f64;
    if vertex < nbest as f64 - wn || vertex > nbest as f64 + wn {
        let adopted = vertex.clamp(min_n as f64, max_n as f64) as usize;
        debug!("Multistage vertex {} adopted over n={}", adopted, nbest);
        adopted
    } else {
        nbest
    }
}

/// Simulated compression pass: raw KS comparison, FIFO-at-0 eviction.
///
/// Counts one token per HIT or appended block and three per overwrite.
pub fn simulate_compress(
    data: &[f64],
    block_size: usize,
    num_buffers: usize,
    threshold: f64,
) -> SimulationOutcome {
    let block_size = block_size.max(1);
    let mut pool = BufferPool::new(num_buffers);
    let mut hits = 0;
    let mut blocks = 0;
    let mut tokens = 0;

    for block in data.chunks(block_size) {
        blocks += 1;
        if pool
            .find(|buffer| ks_raw_exchangeable(block, buffer, threshold))
            .is_some()
        {
            hits += 1;
            tokens += 1;
            continue;
        }
        tokens += match pool.insert_or_overwrite(block) {
            InsertResult::Appended(_) => 1,
            InsertResult::Overwrote(_) => 3,
        };
    }

    SimulationOutcome {
        compression_ratio: data.len() as f64 / tokens.max(1) as f64,
        hits,
        blocks,
        full_blocks: data.len() / block_size,
    }
}

/// `[center - radius, center + radius]` clipped to `[min, max]`, never empty
fn window_around(center: usize, radius: usize, min: usize, max: usize) -> Vec<usize> {
    let lo = center.saturating_sub(radius).max(min);
    let hi = center.saturating_add(radius).min(max);
    if lo > hi {
        return vec![center.clamp(min, max)];
    }
    (lo..=hi).collect()
}

/// Least-squares fit of `y = a x^2 + b x + c`
fn fit_quadratic(points: &[(f64, f64)]) -> Option<(f64, f64, f64)> {
    let mut s = [0.0f64; 5];
    let (mut sy, mut sxy, mut sx2y) = (0.0, 0.0, 0.0);
    for &(x, y) in points {
        let mut p = 1.0;
        for power in s.iter_mut() {
            *power += p;
            p *= x;
        }
        sy += y;
        sxy += x * y;
        sx2y += x * x * y;
    }

    let mut m = [
        [s[4], s[3], s[2], sx2y],
        [s[3], s[2], s[1], sxy],
        [s[2], s[1], s[0], sy],
    ];

    // Gaussian elimination with partial pivoting
    for col in 0..3 {
        let pivot = (col..3).max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))?;
        if m[pivot][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot);
        for row in col + 1..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
        }
    }

    let c = m[2][3] / m[2][2];
    let b = (m[1][3] - m[1][2] * c) / m[1][1];
    let a = (m[0][3] - m[0][2] * c - m[0][1] * b) / m[0][0];
    Some((a, b, c))
}
