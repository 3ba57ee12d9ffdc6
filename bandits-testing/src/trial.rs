//! A single simulated trial: one environment, one tester, one regret trajectory.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::environment::{Difficulty, Environment, EnvironmentConfig, RewardEnvironment};
use crate::error::{Error, ErrorDetails};
use crate::tester::{SequentialBanditTester, TesterConfig};

/// Mixed into a trial seed to derive the tester's random stream, so the tester's arm
/// choices are independent of the environment's reward draws.
pub const TESTER_STREAM_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

pub const DEFAULT_MAX_TIME_STEPS: usize = 10_000;

fn default_max_time_steps() -> usize {
    DEFAULT_MAX_TIME_STEPS
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TrialConfig {
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub tester: TesterConfig,
    /// Horizon of the trial; the regret trajectory always has exactly this many entries.
    #[serde(default = "default_max_time_steps")]
    pub max_time_steps: usize,
}

/// The outcome of one trial.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TrialResult {
    algorithm: String,
    family: String,
    difficulty: Difficulty,
    num_arms: usize,
    cumulative_regret: Vec<f64>,
    stopped: bool,
    stopping_time: Option<usize>,
    recommended_arm: usize,
    best_arm: usize,
    true_means: Vec<f64>,
    seed: u64,
    pull_counts: Vec<u64>,
    total_pulls: u64,
}

impl TrialResult {
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn num_arms(&self) -> usize {
        self.num_arms
    }

    /// Cumulative regret after each time step; entry `t - 1` is the regret through step `t`.
    pub fn cumulative_regret(&self) -> &[f64] {
        &self.cumulative_regret
    }

    pub fn final_regret(&self) -> f64 {
        self.cumulative_regret.last().copied().unwrap_or(0.0)
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// The 1-based step at which the stopping rule fired.
    pub fn stopping_time(&self) -> Option<usize> {
        self.stopping_time
    }

    pub fn recommended_arm(&self) -> usize {
        self.recommended_arm
    }

    pub fn best_arm(&self) -> usize {
        self.best_arm
    }

    pub fn identified_best_arm(&self) -> bool {
        self.recommended_arm == self.best_arm
    }

    pub fn true_means(&self) -> &[f64] {
        &self.true_means
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn pull_counts(&self) -> &[u64] {
        &self.pull_counts
    }

    pub fn total_pulls(&self) -> u64 {
        self.total_pulls
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TrialPhase {
    Running,
    /// The stopping rule fired at `stopping_time`; regret keeps accruing on `arm` with no
    /// further sampling.
    Stopped { arm: usize, stopping_time: usize },
}

/// Drives a tester against an environment until the horizon.
#[derive(Debug)]
pub struct TrialRunner<E: Environment> {
    environment: E,
    tester: SequentialBanditTester,
    max_time_steps: usize,
    seed: u64,
}

impl<E: Environment> TrialRunner<E> {
    /// `seed` is only recorded in the result; both components already own their streams.
    pub fn new(
        environment: E,
        tester: SequentialBanditTester,
        max_time_steps: usize,
        seed: u64,
    ) -> Result<Self, Error> {
        if max_time_steps < 1 {
            return Err(Error::new(ErrorDetails::InvalidParameter {
                name: "max_time_steps".to_string(),
                message: "must be at least 1".to_string(),
            }));
        }
        if tester.num_arms() != environment.num_arms() {
            return Err(Error::new(ErrorDetails::InvalidParameter {
                name: "num_arms".to_string(),
                message: format!(
                    "tester has {} arms but the environment has {}",
                    tester.num_arms(),
                    environment.num_arms()
                ),
            }));
        }
        if environment.true_means().len() != environment.num_arms() {
            return Err(Error::new(ErrorDetails::InvalidParameter {
                name: "true_means".to_string(),
                message: format!(
                    "environment reports {} true means for {} arms",
                    environment.true_means().len(),
                    environment.num_arms()
                ),
            }));
        }
        let best_arm = environment.best_arm();
        if best_arm >= environment.num_arms() {
            return Err(Error::new(ErrorDetails::ArmOutOfRange {
                arm: best_arm,
                num_arms: environment.num_arms(),
            }));
        }
        Ok(Self {
            environment,
            tester,
            max_time_steps,
            seed,
        })
    }

    #[instrument(
        skip_all,
        fields(
            family = self.environment.family_name(),
            difficulty = %self.environment.difficulty(),
            num_arms = self.environment.num_arms(),
            seed = self.seed
        )
    )]
    pub fn run(mut self) -> Result<TrialResult, Error> {
        let best_mean = self.environment.best_mean();
        let mut cumulative_regret = Vec::with_capacity(self.max_time_steps);
        let mut total = 0.0;
        let mut phase = TrialPhase::Running;

        for t in 1..=self.max_time_steps {
            let arm = match phase {
                TrialPhase::Running => {
                    let arm = self.tester.select_arm();
                    let reward = self.environment.sample_reward(arm)?;
                    self.tester.update(arm, reward)?;
                    arm
                }
                TrialPhase::Stopped { arm, .. } => arm,
            };

            total += best_mean - self.environment.true_means()[arm];
            cumulative_regret.push(total);

            if phase == TrialPhase::Running {
                let decision = self.tester.check_stopping();
                if let (true, Some(recommended)) = (decision.should_stop, decision.recommended_arm)
                {
                    debug!(
                        stopping_time = t,
                        recommended_arm = recommended,
                        "Stopping rule fired"
                    );
                    phase = TrialPhase::Stopped {
                        arm: recommended,
                        stopping_time: t,
                    };
                }
            }
        }

        let (stopping_time, recommended_arm) = match phase {
            TrialPhase::Stopped { arm, stopping_time } => (Some(stopping_time), arm),
            TrialPhase::Running => (None, self.tester.empirical_best_arm()?),
        };

        debug!(
            stopped = stopping_time.is_some(),
            recommended_arm,
            best_arm = self.environment.best_arm(),
            final_regret = total,
            "Trial finished"
        );

        Ok(TrialResult {
            algorithm: self.tester.config().algorithm_name(),
            family: self.environment.family_name().to_string(),
            difficulty: self.environment.difficulty(),
            num_arms: self.environment.num_arms(),
            cumulative_regret,
            stopped: stopping_time.is_some(),
            stopping_time,
            recommended_arm,
            best_arm: self.environment.best_arm(),
            true_means: self.environment.true_means().to_vec(),
            seed: self.seed,
            pull_counts: self.tester.pull_counts(),
            total_pulls: self.tester.total_pulls(),
        })
    }
}

/// Runs one trial of `config` with a [`RewardEnvironment`] seeded by `seed` and a tester
/// seeded by `seed ^ TESTER_STREAM_SALT`.
pub fn run_trial(config: &TrialConfig, seed: u64) -> Result<TrialResult, Error> {
    let environment = RewardEnvironment::new(&config.environment, seed)?;
    let tester = SequentialBanditTester::new(
        &config.tester,
        environment.num_arms(),
        StdRng::seed_from_u64(seed ^ TESTER_STREAM_SALT),
    )?;
    TrialRunner::new(environment, tester, config.max_time_steps, seed)?.run()
}
