//! Statistical utility functions.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{Error, ErrorDetails};

/// Computes the mean of a slice of data.
pub fn mean(data: &[f64]) -> Option<f64> {
    let count = data.len();
    if count == 0 {
        return None;
    }

    Some(data.iter().sum::<f64>() / count as f64)
}

/// Index of the largest value, breaking ties by the lowest index.
/// NaN values are never selected. Returns `None` if no value is comparable.
pub fn argmax(values: &[f64]) -> Option<usize> {
    argmax_defined(values.iter().map(|&v| Some(v)))
}

/// Like [`argmax`], but over optional values: `None` entries never win.
pub fn argmax_defined(values: impl IntoIterator<Item = Option<f64>>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, value) in values.into_iter().enumerate() {
        let Some(value) = value else {
            continue;
        };
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

/// Standard normal quantile for a two-sided interval at error level `alpha`,
/// i.e. `Φ⁻¹(1 - alpha / 2)`.
pub fn two_sided_z(alpha: f64) -> Result<f64, Error> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(Error::new(ErrorDetails::InvalidParameter {
            name: "alpha".to_string(),
            message: format!("must be in (0, 1), got {alpha}"),
        }));
    }
    let standard_normal = Normal::new(0.0, 1.0).map_err(|e| {
        Error::new(ErrorDetails::Simulation {
            message: format!("Failed to build the standard normal distribution: {e}"),
        })
    })?;
    Ok(standard_normal.inverse_cdf(1.0 - alpha / 2.0))
}

/// Computes the Wald confidence interval for continuous data.
/// Uses the formula: mean ± z * sqrt(variance / n)
/// Returns `None` if there is no data.
pub fn wald_confint(mean: f64, variance: f64, count: u64, z: f64) -> Option<(f64, f64)> {
    if count == 0 {
        return None;
    }

    let margin = z * (variance / count as f64).sqrt();
    Some((mean - margin, mean + margin))
}

/// Half-width of the two-sided asymptotic confidence sequence for a mean at time `count`.
///
/// The bound is `sqrt((n σ² ρ² + 1) / (n² ρ²) · ln((n σ² ρ² + 1) / α²))`, which holds
/// uniformly over time (anytime-valid) asymptotically. `rho` tunes the time at which the
/// sequence is tightest.
///
/// Reference: Waudby-Smith, I., Arbour, D., Sinha, R., Kennedy, E. H., & Ramdas, A. (2021).
/// Time-uniform central limit theory and asymptotic confidence sequences.
/// <https://arxiv.org/abs/2103.06476>
pub fn asymptotic_cs_margin(variance: f64, count: u64, alpha: f64, rho: f64) -> f64 {
    let n = count as f64;
    let rho2 = rho * rho;
    let scaled = n * variance * rho2 + 1.0;
    (scaled / (n * n * rho2) * (scaled / (alpha * alpha)).ln()).sqrt()
}
