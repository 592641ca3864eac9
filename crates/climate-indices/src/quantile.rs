//! Sample quantile estimators (Hyndman & Fan 1996).

use serde::{Deserialize, Serialize};

/// Sample quantile definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantileMethod {
    /// Type 8, approximately median-unbiased regardless of distribution.
    #[default]
    MedianUnbiased,
    /// Type 7, linear interpolation between closest ranks.
    Linear,
}

impl QuantileMethod {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "median_unbiased" | "type8" | "8" => Some(Self::MedianUnbiased),
            "linear" | "type7" | "7" => Some(Self::Linear),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MedianUnbiased => "median_unbiased",
            Self::Linear => "linear",
        }
    }

    /// 1-based fractional rank of probability `p` in a sample of `n`.
    fn rank(&self, n: usize, p: f64) -> f64 {
        let n = n as f64;
        match self {
            Self::MedianUnbiased => (n + 1.0 / 3.0) * p + 1.0 / 3.0,
            Self::Linear => (n - 1.0) * p + 1.0,
        }
    }
}

/// Quantile of an ascending, NaN-free sample. `p` is in `[0, 1]`.
///
/// Returns NaN for an empty sample.
pub fn quantile_sorted(sorted: &[f32], p: f64, method: QuantileMethod) -> f32 {
    let n = sorted.len();
    if n == 0 {
        return f32::NAN;
    }
    if n == 1 {
        return sorted[0];
    }

    let h = method.rank(n, p.clamp(0.0, 1.0));
    if h <= 1.0 {
        return sorted[0];
    }
    if h >= n as f64 {
        return sorted[n - 1];
    }

    let lo = h.floor() as usize;
    let frac = h - lo as f64;
    let a = sorted[lo - 1] as f64;
    let b = sorted[lo] as f64;
    (a + frac * (b - a)) as f32
}

/// Drop NaN and sort a pool in place.
pub fn prepare_pool(pool: &mut Vec<f32>) {
    pool.retain(|v| !v.is_nan());
    pool.sort_unstable_by(|a, b| a.total_cmp(b));
}

/// Quantile of an unsorted sample, ignoring NaN.
pub fn nan_quantile(values: &[f32], p: f64, method: QuantileMethod) -> f32 {
    let mut pool = values.to_vec();
    prepare_pool(&mut pool);
    quantile_sorted(&pool, p, method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::assert_approx_eq;

    fn one_to_ten() -> Vec<f32> {
        (1..=10).map(|v| v as f32).collect()
    }

    #[test]
    fn test_linear_matches_reference() {
        // numpy.percentile(1..=10, 90, method="linear") == 9.1
        let data = one_to_ten();
        assert_approx_eq!(quantile_sorted(&data, 0.9, QuantileMethod::Linear), 9.1, 1e-5);
        assert_approx_eq!(quantile_sorted(&data, 0.5, QuantileMethod::Linear), 5.5, 1e-5);
    }

    #[test]
    fn test_median_unbiased_matches_reference() {
        // numpy.percentile(1..=10, 90, method="median_unbiased") == 9.6333...
        let data = one_to_ten();
        assert_approx_eq!(
            quantile_sorted(&data, 0.9, QuantileMethod::MedianUnbiased),
            9.633_333,
            1e-4
        );
        assert_approx_eq!(
            quantile_sorted(&data, 0.1, QuantileMethod::MedianUnbiased),
            1.366_667,
            1e-4
        );
        assert_approx_eq!(
            quantile_sorted(&data, 0.5, QuantileMethod::MedianUnbiased),
            5.5,
            1e-5
        );
    }

    #[test]
    fn test_edges() {
        assert!(quantile_sorted(&[], 0.5, QuantileMethod::Linear).is_nan());
        assert_eq!(quantile_sorted(&[3.0], 0.99, QuantileMethod::MedianUnbiased), 3.0);
        let data = one_to_ten();
        assert_eq!(quantile_sorted(&data, 0.0, QuantileMethod::MedianUnbiased), 1.0);
        assert_eq!(quantile_sorted(&data, 1.0, QuantileMethod::MedianUnbiased), 10.0);
    }

    #[test]
    fn test_constant_sample() {
        let data = vec![35.0; 17];
        for method in [QuantileMethod::Linear, QuantileMethod::MedianUnbiased] {
            assert_eq!(quantile_sorted(&data, 0.9, method), 35.0);
        }
    }

    #[test]
    fn test_nan_ignored() {
        let values = vec![f32::NAN, 3.0, 1.0, f32::NAN, 2.0];
        assert_approx_eq!(nan_quantile(&values, 0.5, QuantileMethod::Linear), 2.0, 1e-6);
        assert!(nan_quantile(&[f32::NAN], 0.5, QuantileMethod::Linear).is_nan());
    }

    #[test]
    fn test_monotone_in_p() {
        let data: Vec<f32> = (0..50).map(|i| ((i * 37) % 50) as f32).collect();
        let mut sorted = data.clone();
        prepare_pool(&mut sorted);
        for method in [QuantileMethod::Linear, QuantileMethod::MedianUnbiased] {
            let mut prev = f32::NEG_INFINITY;
            for k in 0..=100 {
                let q = quantile_sorted(&sorted, k as f64 / 100.0, method);
                assert!(q >= prev);
                prev = q;
            }
        }
    }
}
