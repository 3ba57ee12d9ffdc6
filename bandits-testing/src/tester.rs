//! Sequential best-arm identification with uniform sampling.
//!
//! The tester keeps running sufficient statistics per arm (pull count, sum, sum of squares),
//! builds a two-sided confidence interval for each arm's mean, and stops once the empirical
//! leader's lower bound clears every other arm's upper bound (minus a tolerance `epsilon`).

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorDetails};
use crate::statistics_util::{argmax_defined, asymptotic_cs_margin, two_sided_z, wald_confint};

/// Lower bound applied to sample variances so standard errors never collapse to zero.
pub const VARIANCE_FLOOR: f64 = 1e-12;
/// Placeholder variance for arms with fewer than two pulls.
pub const DEFAULT_VARIANCE: f64 = 1.0;

pub const DEFAULT_DELTA: f64 = 0.05;
pub const DEFAULT_MIN_PULLS_PER_ARM: u64 = 10;
pub const DEFAULT_RHO: f64 = 0.5;

/// How per-arm confidence intervals are built.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum IntervalKind {
    /// Fixed-time normal-approximation interval: `mean ± z·sqrt(variance / n)`.
    #[default]
    Wald,
    /// Anytime-valid asymptotic confidence sequence.
    /// `rho` controls the time at which the sequence is tightest.
    AsymptoticConfidenceSequence {
        #[serde(default = "default_rho")]
        rho: f64,
    },
}

fn default_rho() -> f64 {
    DEFAULT_RHO
}

fn default_delta() -> f64 {
    DEFAULT_DELTA
}

fn default_min_pulls_per_arm() -> u64 {
    DEFAULT_MIN_PULLS_PER_ARM
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TesterConfig {
    /// Error level of each confidence interval, in (0, 1).
    #[serde(default = "default_delta")]
    pub delta: f64,
    /// Indifference tolerance (≥ 0). The leader may be up to `epsilon` worse than a competitor.
    #[serde(default)]
    pub epsilon: f64,
    /// Stopping is never considered until every arm has at least this many pulls.
    #[serde(default = "default_min_pulls_per_arm")]
    pub min_pulls_per_arm: u64,
    /// Split `delta` across the `K` simultaneous intervals.
    #[serde(default)]
    pub bonferroni: bool,
    #[serde(default)]
    pub interval: IntervalKind,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self::naive()
    }
}

impl TesterConfig {
    /// Uniform sampling with uncorrected Wald intervals.
    pub fn naive() -> Self {
        Self {
            delta: DEFAULT_DELTA,
            epsilon: 0.0,
            min_pulls_per_arm: DEFAULT_MIN_PULLS_PER_ARM,
            bonferroni: false,
            interval: IntervalKind::Wald,
        }
    }

    /// Uniform sampling with Bonferroni-corrected Wald intervals.
    pub fn naive_bonferroni() -> Self {
        Self {
            bonferroni: true,
            ..Self::naive()
        }
    }

    /// Identifier recorded in trial results, e.g. `naive_uniform_bonferroni`.
    pub fn algorithm_name(&self) -> String {
        let mut name = String::from("naive_uniform");
        if self.bonferroni {
            name.push_str("_bonferroni");
        }
        if let IntervalKind::AsymptoticConfidenceSequence { .. } = self.interval {
            name.push_str("_cs");
        }
        name
    }

    /// The per-interval error level actually used for `num_arms` arms.
    pub fn effective_delta(&self, num_arms: usize) -> f64 {
        if self.bonferroni {
            self.delta / num_arms as f64
        } else {
            self.delta
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(Error::new(ErrorDetails::InvalidParameter {
                name: "delta".to_string(),
                message: format!("must be in (0, 1), got {}", self.delta),
            }));
        }
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return Err(Error::new(ErrorDetails::InvalidParameter {
                name: "epsilon".to_string(),
                message: format!("must be a finite non-negative number, got {}", self.epsilon),
            }));
        }
        if let IntervalKind::AsymptoticConfidenceSequence { rho } = self.interval
            && !(rho.is_finite() && rho > 0.0)
        {
            return Err(Error::new(ErrorDetails::InvalidParameter {
                name: "rho".to_string(),
                message: format!("must be a positive finite number, got {rho}"),
            }));
        }
        Ok(())
    }
}

/// Outcome of a stopping check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StoppingDecision {
    pub should_stop: bool,
    /// The empirical leader, or `None` while some arm is still below `min_pulls_per_arm`.
    pub recommended_arm: Option<usize>,
}

impl StoppingDecision {
    fn not_ready() -> Self {
        Self {
            should_stop: false,
            recommended_arm: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct ArmStatistics {
    pulls: u64,
    sum: f64,
    sum_of_squares: f64,
}

impl ArmStatistics {
    fn push(&mut self, reward: f64) {
        self.pulls += 1;
        self.sum += reward;
        self.sum_of_squares += reward * reward;
    }

    fn mean(&self) -> Option<f64> {
        if self.pulls == 0 {
            return None;
        }
        Some(self.sum / self.pulls as f64)
    }

    /// Unbiased sample variance floored at [`VARIANCE_FLOOR`], or [`DEFAULT_VARIANCE`]
    /// with fewer than two pulls.
    fn variance(&self) -> f64 {
        if self.pulls < 2 {
            return DEFAULT_VARIANCE;
        }
        let n = self.pulls as f64;
        let mean = self.sum / n;
        ((self.sum_of_squares - n * mean * mean) / (n - 1.0)).max(VARIANCE_FLOOR)
    }
}

/// Uniform-sampling best-arm identification for a single trial.
#[derive(Debug)]
pub struct SequentialBanditTester {
    config: TesterConfig,
    arms: Vec<ArmStatistics>,
    /// `delta`, or `delta / K` under Bonferroni correction.
    effective_delta: f64,
    z: f64,
    arm_picker: Uniform<usize>,
    rng: StdRng,
}

impl SequentialBanditTester {
    /// Creates a tester for `num_arms` arms that draws its arm choices from `rng`.
    pub fn new(config: &TesterConfig, num_arms: usize, rng: StdRng) -> Result<Self, Error> {
        config.validate()?;
        if num_arms < 1 {
            return Err(Error::new(ErrorDetails::InvalidParameter {
                name: "num_arms".to_string(),
                message: "must be at least 1".to_string(),
            }));
        }
        let effective_delta = config.effective_delta(num_arms);
        let z = two_sided_z(effective_delta)?;
        let arm_picker = Uniform::new(0, num_arms).map_err(|e| {
            Error::new(ErrorDetails::InvalidParameter {
                name: "num_arms".to_string(),
                message: format!("cannot sample uniformly from {num_arms} arms: {e}"),
            })
        })?;
        Ok(Self {
            config: *config,
            arms: vec![ArmStatistics::default(); num_arms],
            effective_delta,
            z,
            arm_picker,
            rng,
        })
    }

    pub fn from_seed(config: &TesterConfig, num_arms: usize, seed: u64) -> Result<Self, Error> {
        Self::new(config, num_arms, StdRng::seed_from_u64(seed))
    }

    pub fn config(&self) -> &TesterConfig {
        &self.config
    }

    pub fn num_arms(&self) -> usize {
        self.arms.len()
    }

    /// Picks an arm uniformly at random. Only the tester's own random stream advances.
    pub fn select_arm(&mut self) -> usize {
        self.arm_picker.sample(&mut self.rng)
    }

    /// Records one observed reward for `arm`. Must be called for every pulled arm.
    pub fn update(&mut self, arm: usize, reward: f64) -> Result<(), Error> {
        let num_arms = self.arms.len();
        let stats = self
            .arms
            .get_mut(arm)
            .ok_or_else(|| Error::new(ErrorDetails::ArmOutOfRange { arm, num_arms }))?;
        if !reward.is_finite() {
            return Err(Error::new(ErrorDetails::Simulation {
                message: format!("refusing to record non-finite reward {reward} for arm {arm}"),
            }));
        }
        stats.push(reward);
        Ok(())
    }

    /// Per-arm empirical means; `None` for arms that have never been pulled.
    pub fn mean_rewards(&self) -> Vec<Option<f64>> {
        self.arms.iter().map(ArmStatistics::mean).collect()
    }

    pub fn variances(&self) -> Vec<f64> {
        self.arms.iter().map(ArmStatistics::variance).collect()
    }

    pub fn pull_counts(&self) -> Vec<u64> {
        self.arms.iter().map(|stats| stats.pulls).collect()
    }

    pub fn total_pulls(&self) -> u64 {
        self.arms.iter().map(|stats| stats.pulls).sum()
    }

    /// Two-sided interval for `arm`'s mean. An unpulled arm gets `(-∞, +∞)`.
    pub fn confidence_interval(&self, arm: usize) -> Result<(f64, f64), Error> {
        let stats = self.arms.get(arm).ok_or_else(|| {
            Error::new(ErrorDetails::ArmOutOfRange {
                arm,
                num_arms: self.arms.len(),
            })
        })?;
        Ok(self.interval_for(stats))
    }

    fn interval_for(&self, stats: &ArmStatistics) -> (f64, f64) {
        let Some(mean) = stats.mean() else {
            return (f64::NEG_INFINITY, f64::INFINITY);
        };
        let variance = stats.variance();
        match self.config.interval {
            IntervalKind::Wald => wald_confint(mean, variance, stats.pulls, self.z)
                .unwrap_or((f64::NEG_INFINITY, f64::INFINITY)),
            IntervalKind::AsymptoticConfidenceSequence { rho } => {
                let margin = asymptotic_cs_margin(variance, stats.pulls, self.effective_delta, rho);
                (mean - margin, mean + margin)
            }
        }
    }

    /// The arm with the highest empirical mean, ties broken by the lowest index.
    pub fn empirical_best_arm(&self) -> Result<usize, Error> {
        argmax_defined(self.mean_rewards())
            .ok_or_else(|| Error::new(ErrorDetails::NoEmpiricalLeader))
    }

    /// Decide whether the empirical leader is certified as the best arm (within `epsilon`).
    pub fn check_stopping(&self) -> StoppingDecision {
        if self
            .arms
            .iter()
            .any(|stats| stats.pulls < self.config.min_pulls_per_arm)
        {
            return StoppingDecision::not_ready();
        }
        let Some(leader) = argmax_defined(self.mean_rewards()) else {
            return StoppingDecision::not_ready();
        };

        let (leader_lower, _) = self.interval_for(&self.arms[leader]);
        let epsilon = self.config.epsilon;
        let challenger_overlaps = self
            .arms
            .iter()
            .enumerate()
            .filter(|(arm, _)| *arm != leader)
            .any(|(_, stats)| {
                let (_, challenger_upper) = self.interval_for(stats);
                leader_lower < challenger_upper - epsilon
            });

        StoppingDecision {
            should_stop: !challenger_overlaps,
            recommended_arm: Some(leader),
        }
    }
}
