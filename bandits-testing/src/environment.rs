//! Simulated reward environments.
//!
//! A [`RewardEnvironment`] owns a fixed ground truth (one true mean per arm) and a private
//! random stream used to draw i.i.d. rewards. The ground truth is generated from a
//! [`Difficulty`] tier: arm 0 is pinned to the tier's best value, arms 1 through 5 sit a
//! tier-specific gap below it, and any further arms keep their raw uniform draw.
//!
//! NOTE: arms beyond index 5 are not separated from the best arm and may exceed it, so for
//! `num_arms > 6` the true best arm is not guaranteed to be arm 0. Always read
//! [`Environment::best_arm`] instead of assuming it.

use std::fmt;
use std::str::FromStr;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Bernoulli, Beta, Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, ErrorDetails};
use crate::statistics_util::argmax;

/// Number of arms (after arm 0) that are pushed a fixed gap below the best arm.
const GAPPED_ARMS: usize = 5;

pub const DEFAULT_BETA_CONCENTRATION: f64 = 10.0;
pub const DEFAULT_GAUSSIAN_STD_DEV: f64 = 1.0;

/// A source of stochastic rewards with a known ground truth.
///
/// The trial loop only talks to environments through this trait. Implementations must
/// report exactly one true mean per arm (`true_means().len() == num_arms()`) and a
/// `best_arm()` below `num_arms()`; [`crate::TrialRunner::new`] rejects environments that don't.
pub trait Environment {
    fn num_arms(&self) -> usize;

    /// Draw one reward for `arm`. Must not affect any other arm.
    fn sample_reward(&mut self, arm: usize) -> Result<f64, Error>;

    fn true_means(&self) -> &[f64];

    /// Argmax of the true means, ties broken by the lowest index.
    fn best_arm(&self) -> usize;

    fn best_mean(&self) -> f64 {
        self.true_means()[self.best_arm()]
    }

    /// Short name of the reward family, used to label trial results.
    fn family_name(&self) -> &str;

    fn difficulty(&self) -> Difficulty;
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(Error::new(ErrorDetails::Config {
                message: format!(
                    "unknown difficulty `{other}`, expected one of `easy`, `medium`, `hard`"
                ),
            })),
        }
    }
}

/// The distribution family rewards are drawn from, with its hyperparameters.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum RewardFamily {
    /// Rewards are 0 or 1; true means are success probabilities.
    Bernoulli,
    /// Rewards lie in (0, 1); `concentration` is α + β.
    Beta {
        #[serde(default = "default_beta_concentration")]
        concentration: f64,
    },
    /// Rewards are normally distributed with a shared standard deviation.
    Gaussian {
        #[serde(default = "default_gaussian_std_dev")]
        std_dev: f64,
    },
}

fn default_beta_concentration() -> f64 {
    DEFAULT_BETA_CONCENTRATION
}

fn default_gaussian_std_dev() -> f64 {
    DEFAULT_GAUSSIAN_STD_DEV
}

/// Optional family hyperparameters for building a [`RewardFamily`] from a tag.
/// Parameters that don't apply to the chosen family are ignored.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FamilyParams {
    #[serde(default)]
    pub concentration: Option<f64>,
    #[serde(default)]
    pub std_dev: Option<f64>,
}

impl RewardFamily {
    pub fn from_tag(tag: &str, params: FamilyParams) -> Result<Self, Error> {
        match tag {
            "bernoulli" => Ok(RewardFamily::Bernoulli),
            "beta" => Ok(RewardFamily::Beta {
                concentration: params
                    .concentration
                    .unwrap_or(DEFAULT_BETA_CONCENTRATION),
            }),
            "gaussian" => Ok(RewardFamily::Gaussian {
                std_dev: params.std_dev.unwrap_or(DEFAULT_GAUSSIAN_STD_DEV),
            }),
            other => Err(Error::new(ErrorDetails::Config {
                message: format!(
                    "unknown reward family `{other}`, expected `bernoulli`, `beta` or `gaussian`"
                ),
            })),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            RewardFamily::Bernoulli => "bernoulli",
            RewardFamily::Beta { .. } => "beta",
            RewardFamily::Gaussian { .. } => "gaussian",
        }
    }

    fn validate(&self) -> Result<(), Error> {
        match *self {
            RewardFamily::Bernoulli => Ok(()),
            RewardFamily::Beta { concentration } => {
                check_positive("concentration", concentration)
            }
            RewardFamily::Gaussian { std_dev } => check_positive("std_dev", std_dev),
        }
    }

    fn tier(&self, difficulty: Difficulty) -> TierParameters {
        match *self {
            RewardFamily::Bernoulli | RewardFamily::Beta { .. } => bounded_tier(difficulty),
            RewardFamily::Gaussian { std_dev } => gaussian_tier(difficulty, std_dev),
        }
    }
}

fn check_positive(name: &str, value: f64) -> Result<(), Error> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::new(ErrorDetails::InvalidParameter {
            name: name.to_string(),
            message: format!("must be a positive finite number, got {value}"),
        }))
    }
}

/// Everything needed to build a [`RewardEnvironment`] except the seed.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    pub family: RewardFamily,
    pub num_arms: usize,
    pub difficulty: Difficulty,
}

/// Ground-truth generation parameters for one (family, difficulty) pair.
#[derive(Clone, Copy, Debug, PartialEq)]
struct TierParameters {
    best: f64,
    /// Arm `i` (for `1 <= i <= 5`) sits `gap_step * i` below `best`.
    gap_step: f64,
    floor: f64,
    base_low: f64,
    base_high: f64,
}

/// Shared by Bernoulli probabilities and Beta means, which both live in (0, 1).
fn bounded_tier(difficulty: Difficulty) -> TierParameters {
    match difficulty {
        Difficulty::Easy => TierParameters {
            best: 0.9,
            gap_step: 0.2,
            floor: 0.1,
            base_low: 0.1,
            base_high: 0.8,
        },
        Difficulty::Medium => TierParameters {
            best: 0.7,
            gap_step: 0.1,
            floor: 0.1,
            base_low: 0.1,
            base_high: 0.75,
        },
        Difficulty::Hard => TierParameters {
            best: 0.55,
            gap_step: 0.05,
            floor: 0.2,
            base_low: 0.3,
            base_high: 0.6,
        },
    }
}

/// Gaps and base ranges are expressed in units of the standard deviation.
fn gaussian_tier(difficulty: Difficulty, std_dev: f64) -> TierParameters {
    let (best, gap_in_std_devs, low_in_std_devs, high_in_std_devs) = match difficulty {
        Difficulty::Easy => (1.0, 1.0, -3.0, -1.0),
        Difficulty::Medium => (0.5, 0.5, -2.0, 0.5),
        Difficulty::Hard => (0.25, 0.2, -1.0, 0.5),
    };
    TierParameters {
        best,
        gap_step: gap_in_std_devs * std_dev,
        floor: f64::NEG_INFINITY,
        base_low: best + low_in_std_devs * std_dev,
        base_high: best + high_in_std_devs * std_dev,
    }
}

/// Draws the base vector, pins arm 0, then gaps arms 1..=5. Consumes exactly
/// `num_arms` uniform draws from `rng`.
fn generate_true_means(
    rng: &mut StdRng,
    num_arms: usize,
    tier: TierParameters,
) -> Result<Vec<f64>, Error> {
    let base = Uniform::new(tier.base_low, tier.base_high).map_err(|e| {
        Error::new(ErrorDetails::Simulation {
            message: format!(
                "invalid base range [{}, {}): {e}",
                tier.base_low, tier.base_high
            ),
        })
    })?;
    let mut means: Vec<f64> = (0..num_arms).map(|_| base.sample(rng)).collect();

    means[0] = tier.best;
    let last_gapped = GAPPED_ARMS.min(num_arms - 1);
    for (i, mean) in means.iter_mut().enumerate().take(last_gapped + 1).skip(1) {
        *mean = (tier.best - tier.gap_step * i as f64).max(tier.floor);
    }
    Ok(means)
}

#[derive(Clone, Debug)]
enum ArmDistribution {
    Bernoulli(Bernoulli),
    Beta(Beta<f64>),
    Gaussian(Normal<f64>),
}

impl ArmDistribution {
    fn new(family: RewardFamily, mean: f64) -> Result<Self, Error> {
        let simulation_error = |message: String| Error::new(ErrorDetails::Simulation { message });
        match family {
            RewardFamily::Bernoulli => Bernoulli::new(mean)
                .map(ArmDistribution::Bernoulli)
                .map_err(|e| {
                    simulation_error(format!("invalid Bernoulli probability {mean}: {e}"))
                }),
            RewardFamily::Beta { concentration } => {
                let alpha = mean * concentration;
                let beta = (1.0 - mean) * concentration;
                Beta::new(alpha, beta).map(ArmDistribution::Beta).map_err(|e| {
                    simulation_error(format!(
                        "invalid Beta shape (alpha={alpha}, beta={beta}) for mean {mean}: {e}"
                    ))
                })
            }
            RewardFamily::Gaussian { std_dev } => Normal::new(mean, std_dev)
                .map(ArmDistribution::Gaussian)
                .map_err(|e| {
                    simulation_error(format!(
                        "invalid Gaussian parameters (mean={mean}, std_dev={std_dev}): {e}"
                    ))
                }),
        }
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        match self {
            ArmDistribution::Bernoulli(dist) => {
                if dist.sample(rng) {
                    1.0
                } else {
                    0.0
                }
            }
            ArmDistribution::Beta(dist) => dist.sample(rng),
            ArmDistribution::Gaussian(dist) => dist.sample(rng),
        }
    }
}

/// A seeded multi-armed bandit with a fixed ground truth.
#[derive(Debug)]
pub struct RewardEnvironment {
    family: RewardFamily,
    difficulty: Difficulty,
    seed: u64,
    true_means: Vec<f64>,
    best_arm: usize,
    arms: Vec<ArmDistribution>,
    rng: StdRng,
}

impl RewardEnvironment {
    pub fn new(config: &EnvironmentConfig, seed: u64) -> Result<Self, Error> {
        let EnvironmentConfig {
            family,
            num_arms,
            difficulty,
        } = *config;
        if num_arms < 1 {
            return Err(Error::new(ErrorDetails::InvalidParameter {
                name: "num_arms".to_string(),
                message: "must be at least 1".to_string(),
            }));
        }
        family.validate()?;

        let mut rng = StdRng::seed_from_u64(seed);
        let true_means = generate_true_means(&mut rng, num_arms, family.tier(difficulty))?;
        let arms = true_means
            .iter()
            .map(|&mean| ArmDistribution::new(family, mean))
            .collect::<Result<Vec<_>, _>>()?;
        let best_arm = argmax(&true_means).ok_or_else(|| {
            Error::new(ErrorDetails::Simulation {
                message: format!("could not determine the best arm of {true_means:?}"),
            })
        })?;

        debug!(
            family = family.tag(),
            difficulty = %difficulty,
            num_arms,
            seed,
            best_arm,
            true_means = ?true_means,
            "Constructed reward environment"
        );

        Ok(Self {
            family,
            difficulty,
            seed,
            true_means,
            best_arm,
            arms,
            rng,
        })
    }

    /// Builds an environment from string tags, e.g. `("beta", 3, "hard", 7, params)`.
    pub fn from_tags(
        family: &str,
        num_arms: usize,
        difficulty: &str,
        seed: u64,
        params: FamilyParams,
    ) -> Result<Self, Error> {
        let config = EnvironmentConfig {
            family: RewardFamily::from_tag(family, params)?,
            num_arms,
            difficulty: difficulty.parse()?,
        };
        Self::new(&config, seed)
    }

    pub fn family(&self) -> RewardFamily {
        self.family
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Environment for RewardEnvironment {
    fn num_arms(&self) -> usize {
        self.arms.len()
    }

    fn sample_reward(&mut self, arm: usize) -> Result<f64, Error> {
        let distribution = self.arms.get(arm).ok_or_else(|| {
            Error::new(ErrorDetails::ArmOutOfRange {
                arm,
                num_arms: self.true_means.len(),
            })
        })?;
        let reward = distribution.sample(&mut self.rng);
        if !reward.is_finite() {
            return Err(Error::new(ErrorDetails::Simulation {
                message: format!("arm {arm} produced a non-finite reward ({reward})"),
            }));
        }
        Ok(reward)
    }

    fn true_means(&self) -> &[f64] {
        &self.true_means
    }

    fn best_arm(&self) -> usize {
        self.best_arm
    }

    fn family_name(&self) -> &str {
        self.family.tag()
    }

    fn difficulty(&self) -> Difficulty {
        self.difficulty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_families() -> [RewardFamily; 3] {
        [
            RewardFamily::Bernoulli,
            RewardFamily::Beta {
                concentration: DEFAULT_BETA_CONCENTRATION,
            },
            RewardFamily::Gaussian {
                std_dev: DEFAULT_GAUSSIAN_STD_DEV,
            },
        ]
    }

    fn make_env(
        family: RewardFamily,
        num_arms: usize,
        difficulty: Difficulty,
        seed: u64,
    ) -> RewardEnvironment {
        RewardEnvironment::new(
            &EnvironmentConfig {
                family,
                num_arms,
                difficulty,
            },
            seed,
        )
        .unwrap()
    }

    #[test]
    fn test_best_arm_is_zero_for_up_to_six_arms() {
        for family in all_families() {
            for difficulty in Difficulty::ALL {
                for num_arms in 1..=6 {
                    for seed in 0..20 {
                        let env = make_env(family, num_arms, difficulty, seed);
                        assert_eq!(
                            env.best_arm(),
                            0,
                            "{family:?} {difficulty} num_arms={num_arms} seed={seed} means={:?}",
                            env.true_means()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_best_mean_decreases_with_difficulty() {
        for family in all_families() {
            let best: Vec<f64> = Difficulty::ALL
                .iter()
                .map(|&difficulty| make_env(family, 4, difficulty, 1).best_mean())
                .collect();
            assert!(
                best[0] > best[1] && best[1] > best[2],
                "family={family:?} best={best:?}"
            );
        }
    }

    #[test]
    fn test_bernoulli_easy_gap_sequence() {
        let env = make_env(RewardFamily::Bernoulli, 6, Difficulty::Easy, 3);
        let expected = [0.9, 0.7, 0.5, 0.3, 0.1, 0.1];
        for (actual, expected) in env.true_means().iter().zip(expected) {
            assert!((actual - expected).abs() < 1e-12, "means={:?}", env.true_means());
        }
    }

    #[test]
    fn test_gap_to_best_shrinks_with_difficulty() {
        for family in all_families() {
            for arm in 1..=5 {
                let gaps: Vec<f64> = Difficulty::ALL
                    .iter()
                    .map(|&difficulty| {
                        let env = make_env(family, 6, difficulty, 11);
                        env.best_mean() - env.true_means()[arm]
                    })
                    .collect();
                assert!(
                    gaps[0] > gaps[1] && gaps[1] > gaps[2] && gaps[2] > 0.0,
                    "family={family:?} arm={arm} gaps={gaps:?}"
                );
            }
        }
    }

    #[test]
    fn test_gaussian_gaps_scale_with_std_dev() {
        let narrow = make_env(RewardFamily::Gaussian { std_dev: 1.0 }, 3, Difficulty::Medium, 5);
        let wide = make_env(RewardFamily::Gaussian { std_dev: 2.0 }, 3, Difficulty::Medium, 5);
        let narrow_gap = narrow.best_mean() - narrow.true_means()[1];
        let wide_gap = wide.best_mean() - wide.true_means()[1];
        assert!((wide_gap - 2.0 * narrow_gap).abs() < 1e-12);
    }

    #[test]
    fn test_arms_beyond_sixth_keep_raw_draws() {
        // Arms past index 5 come straight from the base range and are not gapped.
        let tier = bounded_tier(Difficulty::Hard);
        let mut exceeded_best = false;
        for seed in 0..200 {
            let env = make_env(RewardFamily::Bernoulli, 10, Difficulty::Hard, seed);
            for &mean in &env.true_means()[6..] {
                assert!(mean >= tier.base_low && mean <= tier.base_high);
                if mean > tier.best {
                    exceeded_best = true;
                    assert_ne!(env.best_arm(), 0);
                }
            }
        }
        assert!(exceeded_best, "expected at least one raw arm above the pinned best arm");
    }

    #[test]
    fn test_same_seed_same_rewards() {
        for family in all_families() {
            let mut first = make_env(family, 4, Difficulty::Medium, 42);
            let mut second = make_env(family, 4, Difficulty::Medium, 42);
            assert_eq!(first.true_means(), second.true_means());
            for step in 0..200 {
                let arm = step % 4;
                assert_eq!(
                    first.sample_reward(arm).unwrap(),
                    second.sample_reward(arm).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let mut first = make_env(RewardFamily::Gaussian { std_dev: 1.0 }, 2, Difficulty::Easy, 1);
        let mut second = make_env(RewardFamily::Gaussian { std_dev: 1.0 }, 2, Difficulty::Easy, 2);
        let a: Vec<f64> = (0..10).map(|_| first.sample_reward(0).unwrap()).collect();
        let b: Vec<f64> = (0..10).map(|_| second.sample_reward(0).unwrap()).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn test_reward_supports() {
        let mut bernoulli = make_env(RewardFamily::Bernoulli, 3, Difficulty::Hard, 9);
        let mut beta = make_env(
            RewardFamily::Beta { concentration: 4.0 },
            3,
            Difficulty::Hard,
            9,
        );
        for _ in 0..500 {
            let r = bernoulli.sample_reward(1).unwrap();
            assert!(r == 0.0 || r == 1.0);
            let r = beta.sample_reward(2).unwrap();
            assert!((0.0..=1.0).contains(&r));
        }
    }

    #[test]
    fn test_empirical_mean_matches_truth() {
        let mut env = make_env(RewardFamily::Bernoulli, 2, Difficulty::Easy, 17);
        let n = 20_000;
        let total: f64 = (0..n).map(|_| env.sample_reward(0).unwrap()).sum();
        assert!((total / n as f64 - 0.9).abs() < 0.01);
    }

    #[test]
    fn test_sample_out_of_range_arm() {
        let mut env = make_env(RewardFamily::Bernoulli, 2, Difficulty::Easy, 0);
        let err = env.sample_reward(2).unwrap_err();
        assert_eq!(
            err.get_details(),
            &ErrorDetails::ArmOutOfRange {
                arm: 2,
                num_arms: 2
            }
        );
    }

    #[test]
    fn test_zero_arms_is_rejected() {
        let err = RewardEnvironment::new(
            &EnvironmentConfig {
                family: RewardFamily::Bernoulli,
                num_arms: 0,
                difficulty: Difficulty::Easy,
            },
            0,
        )
        .unwrap_err();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::InvalidParameter { name, .. } if name == "num_arms"
        ));
    }

    #[test]
    fn test_invalid_hyperparameters_are_rejected() {
        let err = RewardEnvironment::new(
            &EnvironmentConfig {
                family: RewardFamily::Gaussian { std_dev: 0.0 },
                num_arms: 2,
                difficulty: Difficulty::Easy,
            },
            0,
        )
        .unwrap_err();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::InvalidParameter { name, .. } if name == "std_dev"
        ));

        let err = RewardEnvironment::new(
            &EnvironmentConfig {
                family: RewardFamily::Beta {
                    concentration: f64::NAN,
                },
                num_arms: 2,
                difficulty: Difficulty::Easy,
            },
            0,
        )
        .unwrap_err();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::InvalidParameter { name, .. } if name == "concentration"
        ));
    }

    #[test]
    fn test_from_tags() {
        let env = RewardEnvironment::from_tags(
            "beta",
            3,
            "medium",
            7,
            FamilyParams {
                concentration: Some(20.0),
                std_dev: None,
            },
        )
        .unwrap();
        assert_eq!(
            env.family(),
            RewardFamily::Beta {
                concentration: 20.0
            }
        );
        assert_eq!(env.difficulty(), Difficulty::Medium);
        assert_eq!(env.num_arms(), 3);
        assert_eq!(env.seed(), 7);
        assert_eq!(env.family_name(), "beta");
    }

    #[test]
    fn test_from_tags_unknown_family() {
        let err = RewardEnvironment::from_tags("poisson", 3, "easy", 0, FamilyParams::default())
            .unwrap_err();
        assert!(matches!(err.get_details(), ErrorDetails::Config { .. }));
    }

    #[test]
    fn test_from_tags_unknown_difficulty() {
        let err = RewardEnvironment::from_tags("bernoulli", 3, "brutal", 0, FamilyParams::default())
            .unwrap_err();
        assert!(matches!(err.get_details(), ErrorDetails::Config { .. }));
    }

    #[test]
    fn test_single_arm_environment() {
        let mut env = make_env(RewardFamily::Bernoulli, 1, Difficulty::Hard, 0);
        assert_eq!(env.true_means(), &[0.55]);
        assert_eq!(env.best_arm(), 0);
        assert!(env.sample_reward(0).is_ok());
    }
}
