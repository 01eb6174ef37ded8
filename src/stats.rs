//! Summary statistics over timing samples.

use core::fmt;

/// Which statistic the timing report leads with (`-S`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Statistic {
    #[default]
    Mean,
    Min,
    Max,
    Median,
}

impl Statistic {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Statistic::Min,
            2 => Statistic::Max,
            3 => Statistic::Median,
            _ => Statistic::Mean,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Statistic::Mean => "mean",
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Median => "median",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

pub fn stdev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let m = mean(samples);
    let var = samples.iter().map(|s| (s - m) * (s - m)).sum::<f64>() / (samples.len() - 1) as f64;
    var.sqrt()
}

pub fn median(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(core::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}

/// The selected statistic over `samples`.
pub fn summarize(samples: &[f64], stat: Statistic) -> f64 {
    match stat {
        Statistic::Mean => mean(samples),
        Statistic::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
        Statistic::Max => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Statistic::Median => median(samples),
    }
}

/// Timing report line printed by rank 0.
pub fn report(name: &str, size: usize, samples: &[f64], stat: Statistic) -> String {
    format!(
        "{name}: n={size} {}={:.3e} s (N={}, mean={:.3e} s, stdev={:.3e} s)",
        stat.label(),
        summarize(samples, stat),
        samples.len(),
        mean(samples),
        stdev(samples),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_over_known_samples() {
        let samples = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(summarize(&samples, Statistic::Mean), 2.5);
        assert_eq!(summarize(&samples, Statistic::Min), 1.0);
        assert_eq!(summarize(&samples, Statistic::Max), 4.0);
        assert_eq!(summarize(&samples, Statistic::Median), 2.5);
        assert_eq!(median(&[5.0, 1.0, 3.0]), 3.0);
    }

    #[test]
    fn stdev_of_constant_samples_is_zero() {
        let samples = [2.0; 8];
        assert_eq!(stdev(&samples), 0.0);
        assert_eq!(stdev(&[1.0]), 0.0);
    }

    #[test]
    fn codes_map_like_the_cli() {
        assert_eq!(Statistic::from_code(0), Statistic::Mean);
        assert_eq!(Statistic::from_code(1), Statistic::Min);
        assert_eq!(Statistic::from_code(2), Statistic::Max);
        assert_eq!(Statistic::from_code(3), Statistic::Median);
        assert_eq!(Statistic::from_code(99), Statistic::Mean);
    }
}
