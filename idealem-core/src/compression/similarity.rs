//! Statistical agreement between blocks
//!
//! The buffer pool decides HIT/MISS with a two-sample Kolmogorov–Smirnov
//! test on z-normalized blocks, so matching is invariant to shift and scale.
//! Pearson correlation and the compression error rate (CER) feed the
//! composite score used by the stability-score block-size policy.

use serde::{Deserialize, Serialize};

/// Above this many lattice cells the asymptotic distribution is used
const EXACT_CELL_LIMIT: usize = 250_000;

/// Result of a two-sample Kolmogorov–Smirnov test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KsTest {
    /// Largest distance between the two empirical CDFs
    pub statistic: f64,
    /// Probability of a distance at least this large under "same distribution"
    pub p_value: f64,
}

/// Weights of the composite similarity score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityWeights {
    /// Weight of the KS agreement (distribution)
    pub ks_test: f64,
    /// Weight of Pearson correlation (trend)
    pub correlation: f64,
    /// Weight of `1 - CER` (accuracy)
    pub cer: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            ks_test: 0.3,
            correlation: 0.3,
            cer: 0.4,
        }
    }
}

/// Shift a block to zero mean and scale it to unit (population) deviation.
///
/// Constant blocks normalize to all zeros.
pub fn normalize(block: &[f64]) -> Vec<f64> {
    let Some(&first) = block.first() else {
        return Vec::new();
    };
    if block.iter().all(|&v| v == first) {
        return vec![0.0; block.len()];
    }

    let n = block.len() as f64;
    let mean = block.iter().sum::<f64>() / n;
    let variance = block.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let std = variance.sqrt();
    let scale = if std > 0.0 { std } else { 1.0 };

    block.iter().map(|v| (v - mean) / scale).collect()
}

/// Two-sample Kolmogorov–Smirnov test (two-sided).
///
/// Returns `None` when either sample is empty.
pub fn ks_2samp(a: &[f64], b: &[f64]) -> Option<KsTest> {
    if a.is_empty() || b.is_empty() {
        return None;
    }

    let mut x = a.to_vec();
    let mut y = b.to_vec();
    x.sort_by(f64::total_cmp);
    y.sort_by(f64::total_cmp);

    let (m, n) = (x.len(), y.len());
    let h = scaled_statistic(&x, &y);

    let p_value = if m * n <= EXACT_CELL_LIMIT {
        exact_p_value(m, n, h)
    } else {
        asymptotic_p_value(m, n, h as f64 / (m * n) as f64)
    };

    Some(KsTest {
        statistic: h as f64 / (m * n) as f64,
        p_value: p_value.clamp(0.0, 1.0),
    })
}

/// Shape match: true iff the KS p-value of the normalized blocks exceeds
/// `threshold`. Blocks of different length are never exchangeable.
pub fn ks_exchangeable(a: &[f64], b: &[f64], threshold: f64) -> bool {
    if a.len() != b.len() {
        return false;
    }
    ks_2samp(&normalize(a), &normalize(b)).map_or(false, |ks| ks.p_value > threshold)
}

/// Same KS test on the raw (non-normalized) values, as used by the
/// block-size simulations.
pub fn ks_raw_exchangeable(a: &[f64], b: &[f64], threshold: f64) -> bool {
    if a.len() != b.len() {
        return false;
    }
    ks_2samp(a, b).map_or(false, |ks| ks.p_value > threshold)
}

/// Pearson correlation coefficient; `None` if undefined
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }

    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

/// Compression error rate: mean absolute difference relative to the range of `a`
pub fn compression_error_rate(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return f64::INFINITY;
    }

    let mean_diff = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f64>() / a.len() as f64;
    let max = a.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = a.iter().copied().fold(f64::INFINITY, f64::min);
    let range = max - min;

    if range > 0.0 {
        mean_diff / range
    } else if mean_diff == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}

/// Weighted agreement in `[-weights.correlation, 1]`; 0 for mismatched lengths
pub fn similarity_score(a: &[f64], b: &[f64], weights: &SimilarityWeights) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let ks_score = match ks_2samp(a, b) {
        Some(ks) if ks.p_value > 0.05 => 1.0 - ks.statistic,
        _ => 0.0,
    };
    let correlation = pearson(a, b).unwrap_or(0.0);
    let cer_score = 1.0 - compression_error_rate(a, b).min(1.0);

    ks_score * weights.ks_test + correlation * weights.correlation + cer_score * weights.cer
}

/// Strict similarity: same distribution, correlated trend, low error
pub fn is_similar(a: &[f64], b: &[f64]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    match ks_2samp(a, b) {
        Some(ks) if ks.p_value >= 0.05 => {}
        _ => return false,
    }
    // Constant blocks have no correlation; accept only identical ones
    if !pearson(a, b).map_or(a == b, |r| r >= 0.6) {
        return false;
    }
    compression_error_rate(a, b) <= 0.1
}

/// `D * m * n` as an integer, so lattice comparisons stay exact
fn scaled_statistic(x: &[f64], y: &[f64]) -> usize {
    let (m, n) = (x.len(), y.len());
    let (mut i, mut j) = (0, 0);
    let mut h = 0;

    while i < m && j < n {
        let v = if x[i].total_cmp(&y[j]).is_le() { x[i] } else { y[j] };
        while i < m && x[i].total_cmp(&v).is_le() {
            i += 1;
        }
        while j < n && y[j].total_cmp(&v).is_le() {
            j += 1;
        }
        h = h.max((i * n).abs_diff(j * m));
    }
    h
}

/// P(D >= h / mn) by counting lattice paths that leave the band
/// `|i*n - j*m| < h`, carried as probabilities of a uniformly random path.
fn exact_p_value(m: usize, n: usize, h: usize) -> f64 {
    if h == 0 {
        return 1.0;
    }

    let inside = |i: usize, j: usize| (i * n).abs_diff(j * m) < h;
    let total = m + n;
    let mut row = vec![0.0f64; n + 1];

    for i in 0..=m {
        for j in 0..=n {
            if i == 0 && j == 0 {
                row[0] = 1.0;
                continue;
            }
            if !inside(i, j) {
                row[j] = 0.0;
                continue;
            }
            // row[j] still holds P(i - 1, j); row[j - 1] already holds P(i, j - 1)
            let from_left = if i > 0 {
                row[j] * ((m - i + 1) as f64 / (total - (i - 1) - j) as f64)
            } else {
                0.0
            };
            let from_below = if j > 0 {
                row[j - 1] * ((n - j + 1) as f64 / (total - i - (j - 1)) as f64)
            } else {
                0.0
            };
            row[j] = from_left + from_below;
        }
    }

    1.0 - row[n]
}

/// Kolmogorov limiting distribution with Stephens' small-sample correction
fn asymptotic_p_value(m: usize, n: usize, d: f64) -> f64 {
    let en = (m * n) as f64 / (m + n) as f64;
    let root = en.sqrt();
    let lambda = (root + 0.12 + 0.11 / root) * d;
    kolmogorov_survival(lambda)
}

fn kolmogorov_survival(lambda: f64) -> f64 {
    if lambda < 0.2 {
        return 1.0;
    }

    let mut sum = 0.0;
    let mut sign = 1.0;
    for k in 1..=100u32 {
        let k = k as f64;
        let term = sign * (-2.0 * k * k * lambda * lambda).exp();
        sum += term;
        if term.abs() <= 1e-12 * sum.abs() {
            break;
        }
        sign = -sign;
    }
    (2.0 * sum).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_constant_block() {
        assert_eq!(normalize(&[0.1, 0.1, 0.1]), vec![0.0, 0.0, 0.0]);
        assert!(normalize(&[]).is_empty());

        let z = normalize(&[1.0, 2.0, 3.0, 4.0]);
        let mean: f64 = z.iter().sum::<f64>() / 4.0;
        assert!(mean.abs() < 1e-12);
        let var: f64 = z.iter().map(|v| v * v).sum::<f64>() / 4.0;
        assert!((var - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ks_identical_samples() {
        let a: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let ks = ks_2samp(&a, &a).unwrap();
        assert_eq!(ks.statistic, 0.0);
        assert_eq!(ks.p_value, 1.0);
        assert!(ks_2samp(&a, &[]).is_none());
    }

    #[test]
    fn test_ks_disjoint_samples() {
        // Completely separated samples of size 4: p = 2 / C(8, 4) = 1/35
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [10.0, 11.0, 12.0, 13.0];
        let ks = ks_2samp(&a, &b).unwrap();
        assert_eq!(ks.statistic, 1.0);
        assert!((ks.p_value - 2.0 / 70.0).abs() < 1e-12);
    }

    #[test]
    fn test_ks_half_shift() {
        // D = 0.5 for n = m = 4: 16 of the 70 paths stay within the band
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.5, 3.5, 4.5, 5.5];
        let ks = ks_2samp(&a, &b).unwrap();
        assert_eq!(ks.statistic, 0.5);
        assert!((ks.p_value - 54.0 / 70.0).abs() < 1e-12);
    }

    #[test]
    fn test_ks_large_samples_use_asymptotic() {
        let a: Vec<f64> = (0..600).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..600).map(|i| i as f64 + 0.5).collect();
        let ks = ks_2samp(&a, &b).unwrap();
        assert!(ks.p_value > 0.99);

        let far: Vec<f64> = (0..600).map(|i| i as f64 + 10_000.0).collect();
        assert!(ks_2samp(&a, &far).unwrap().p_value < 1e-10);
    }

    #[test]
    fn test_exchangeable_is_shape_match() {
        let a: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let shifted: Vec<f64> = a.iter().map(|v| v * 3.0 + 1000.0).collect();
        assert!(ks_exchangeable(&a, &shifted, 0.8));
        assert!(!ks_raw_exchangeable(&a, &shifted, 0.8));

        let mut spike = vec![0.0; 24];
        spike[23] = 1.0;
        assert!(!ks_exchangeable(&a, &spike, 0.8));
        assert!(!ks_exchangeable(&a, &a[..12], 0.0));
    }

    #[test]
    fn test_exchangeable_symmetry() {
        let a = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
        let b = [2.0, 7.0, 1.0, 8.0, 2.0, 8.0, 1.0, 8.0];
        for threshold in [0.01, 0.05, 0.5, 0.8, 0.99] {
            assert_eq!(
                ks_exchangeable(&a, &b, threshold),
                ks_exchangeable(&b, &a, threshold)
            );
        }
        assert_eq!(ks_2samp(&a, &b), ks_2samp(&b, &a));
    }

    #[test]
    fn test_constant_block_always_matches_itself() {
        let block = [42.0; 12];
        assert!(ks_exchangeable(&block, &block, 0.999));
    }

    #[test]
    fn test_pearson_and_cer() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!(pearson(&a, &[1.0, 1.0, 1.0, 1.0]).is_none());
        assert!(pearson(&a, &b[..3]).is_none());

        assert_eq!(compression_error_rate(&a, &a), 0.0);
        assert!((compression_error_rate(&a, &b) - 2.5 / 3.0).abs() < 1e-12);
        assert_eq!(compression_error_rate(&a, &b[..2]), f64::INFINITY);
    }

    #[test]
    fn test_similarity_score_and_is_similar() {
        let a = [10.0, 12.0, 11.0, 13.0, 12.0, 14.0];
        let weights = SimilarityWeights::default();
        assert!((similarity_score(&a, &a, &weights) - 1.0).abs() < 1e-12);
        assert!(is_similar(&a, &a));

        let far = [100.0, 90.0, 95.0, 80.0, 99.0, 70.0];
        assert!(similarity_score(&a, &far, &weights) < 0.5);
        assert!(!is_similar(&a, &far));
        assert_eq!(similarity_score(&a, &far[..3], &weights), 0.0);
    }
}
