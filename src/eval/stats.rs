//! Binomial statistics for evaluation reports.

/// 97.5th percentile of the standard normal; two-sided 95%.
const Z_95: f64 = 1.959_963_984_540_054;

/// 95% Wilson score interval for a binomial proportion. Well-behaved near 0
/// and 1, unlike the normal approximation.
pub fn wilson_interval(successes: u64, trials: u64) -> (f64, f64) {
    if trials == 0 {
        return (0.0, 1.0);
    }
    let n = trials as f64;
    let p = successes as f64 / n;
    let z2 = Z_95 * Z_95;
    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let margin = (Z_95 / denom) * ((p * (1.0 - p) / n) + z2 / (4.0 * n * n)).sqrt();
    ((center - margin).max(0.0), (center + margin).min(1.0))
}

/// Two-sided significance of `H0: p = 0.5` at α = 0.05: true when the
/// Wilson interval excludes one half.
pub fn significant_vs_half(successes: u64, trials: u64) -> bool {
    let (low, high) = wilson_interval(successes, trials);
    low > 0.5 || high < 0.5
}

/// Cohen's h effect size between two proportions.
pub fn cohen_h(p1: f64, p2: f64) -> f64 {
    let phi = |p: f64| 2.0 * p.clamp(0.0, 1.0).sqrt().asin();
    phi(p1) - phi(p2)
}

/// Sample variance of a slice (population form).
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wilson_known_value() {
        // 8/10: Wilson 95% interval ≈ (0.490, 0.943).
        let (low, high) = wilson_interval(8, 10);
        assert!((low - 0.4902).abs() < 5e-3, "low {}", low);
        assert!((high - 0.9433).abs() < 5e-3, "high {}", high);
    }

    #[test]
    fn test_wilson_extremes_stay_in_unit_interval() {
        let (low, high) = wilson_interval(0, 20);
        assert_eq!(low, 0.0);
        assert!(high > 0.0 && high < 0.3);
        let (low, high) = wilson_interval(20, 20);
        assert!(low > 0.7 && low < 1.0);
        assert_eq!(high, 1.0);
    }

    #[test]
    fn test_significance_against_half() {
        assert!(!significant_vs_half(11, 20));
        assert!(significant_vs_half(19, 20));
        assert!(significant_vs_half(1, 20));
    }

    #[test]
    fn test_cohen_h_symmetry_and_magnitude() {
        assert!((cohen_h(0.5, 0.5)).abs() < 1e-12);
        assert!((cohen_h(0.7, 0.5) + cohen_h(0.5, 0.7)).abs() < 1e-12);
        // Conventional small effect ≈ 0.2 for 0.5 vs 0.6.
        assert!((cohen_h(0.6, 0.5).abs() - 0.2).abs() < 0.01);
    }

    #[test]
    fn test_variance() {
        assert_eq!(variance(&[]), 0.0);
        assert_eq!(variance(&[3.0, 3.0, 3.0]), 0.0);
        assert!((variance(&[1.0, 2.0, 3.0]) - 2.0 / 3.0).abs() < 1e-12);
    }
}
