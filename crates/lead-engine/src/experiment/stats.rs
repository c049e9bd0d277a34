//! Significance tests for experiment promotion

/// Critical z value for the supported confidence levels (two-sided)
pub fn z_threshold(confidence: u8) -> f64 {
    match confidence {
        90 => 1.645,
        99 => 2.576,
        // 95 is the default; unknown levels fall back to it
        _ => 1.960,
    }
}

/// Two-proportion z statistic for successes/samples of two variants.
/// Returns 0.0 when either sample is empty or the pooled variance
/// degenerates.
pub fn two_proportion_z(successes_a: u64, n_a: u64, successes_b: u64, n_b: u64) -> f64 {
    if n_a == 0 || n_b == 0 {
        return 0.0;
    }
    let p_a = successes_a as f64 / n_a as f64;
    let p_b = successes_b as f64 / n_b as f64;
    let pooled = (successes_a + successes_b) as f64 / (n_a + n_b) as f64;
    let variance = pooled * (1.0 - pooled) * (1.0 / n_a as f64 + 1.0 / n_b as f64);
    if variance <= 0.0 {
        return 0.0;
    }
    (p_a - p_b).abs() / variance.sqrt()
}

/// Welch-style z statistic on two sample means, for mean-valued
/// metrics (handling time, satisfaction)
pub fn welch_z(sum_a: f64, sumsq_a: f64, n_a: u64, sum_b: f64, sumsq_b: f64, n_b: u64) -> f64 {
    if n_a < 2 || n_b < 2 {
        return 0.0;
    }
    let (na, nb) = (n_a as f64, n_b as f64);
    let mean_a = sum_a / na;
    let mean_b = sum_b / nb;
    let var_a = ((sumsq_a - na * mean_a * mean_a) / (na - 1.0)).max(0.0);
    let var_b = ((sumsq_b - nb * mean_b * mean_b) / (nb - 1.0)).max(0.0);
    let denom = (var_a / na + var_b / nb).sqrt();
    if denom <= 0.0 {
        return 0.0;
    }
    (mean_a - mean_b).abs() / denom
}
