//! Running many independent trials and summarizing them.
//!
//! Trials share no state, so a batch is embarrassingly parallel: each trial runs on tokio's
//! blocking pool, with a semaphore bounding how many run at once. Results always come back in
//! seed order, so a concurrent batch is indistinguishable from a sequential one.

use std::io::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument};

use crate::error::{Error, ErrorDetails, IMPOSSIBLE_ERROR_MESSAGE};
use crate::statistics_util::mean;
use crate::trial::{TrialConfig, TrialResult, run_trial};

pub const DEFAULT_CONCURRENCY: usize = 4;

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// Which seeds a batch runs. One trial is run per seed.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum SeedPlan {
    List { seeds: Vec<u64> },
    /// `count` consecutive seeds starting at `start`.
    Range { start: u64, count: u64 },
}

impl SeedPlan {
    pub fn seeds(&self) -> Vec<u64> {
        match self {
            SeedPlan::List { seeds } => seeds.clone(),
            SeedPlan::Range { start, count } => {
                (0..*count).map(|offset| start.wrapping_add(offset)).collect()
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    pub trial: TrialConfig,
    pub seeds: SeedPlan,
    /// Maximum number of trials running at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.concurrency < 1 {
            return Err(Error::new(ErrorDetails::InvalidParameter {
                name: "concurrency".to_string(),
                message: "must be at least 1".to_string(),
            }));
        }
        Ok(())
    }
}

/// Runs one trial per seed, in parallel, and returns the results in seed order.
///
/// The first trial to fail aborts the batch; its error is returned.
#[instrument(
    skip_all,
    fields(
        concurrency = config.concurrency,
        algorithm = %config.trial.tester.algorithm_name()
    )
)]
pub async fn run_batch(config: &BatchConfig) -> Result<Vec<TrialResult>, Error> {
    config.validate()?;
    let seeds = config.seeds.seeds();
    info!(num_trials = seeds.len(), "Starting batch");

    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut join_set = JoinSet::new();
    for (index, seed) in seeds.iter().copied().enumerate() {
        let semaphore = semaphore.clone();
        let trial_config = config.trial;
        join_set.spawn(async move {
            // Hold the permit for the whole trial
            let _permit = semaphore.acquire_owned().await.map_err(|e| {
                Error::new(ErrorDetails::TrialTask {
                    message: format!("failed to acquire a permit for seed {seed}: {e}"),
                })
            })?;
            let result = tokio::task::spawn_blocking(move || run_trial(&trial_config, seed))
                .await
                .map_err(|e| {
                    Error::new(ErrorDetails::TrialTask {
                        message: format!("trial for seed {seed} did not complete: {e}"),
                    })
                })??;
            Ok::<_, Error>((index, result))
        });
    }

    let mut slots: Vec<Option<TrialResult>> = vec![None; seeds.len()];
    while let Some(joined) = join_set.join_next().await {
        let (index, result) = match joined {
            Ok(Ok(completed)) => completed,
            Ok(Err(e)) => {
                join_set.abort_all();
                return Err(e);
            }
            Err(e) => {
                join_set.abort_all();
                return Err(Error::new(ErrorDetails::TrialTask {
                    message: e.to_string(),
                }));
            }
        };
        debug!(seed = result.seed(), stopped = result.stopped(), "Trial completed");
        slots[index] = Some(result);
    }

    let results = slots
        .into_iter()
        .map(|slot| {
            slot.ok_or_else(|| {
                Error::new(ErrorDetails::TrialTask {
                    message: format!("a trial produced no result. {IMPOSSIBLE_ERROR_MESSAGE}"),
                })
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    info!(num_trials = results.len(), "Batch finished");
    Ok(results)
}

/// Same contract as [`run_batch`], on the current thread.
#[instrument(skip_all, fields(algorithm = %config.trial.tester.algorithm_name()))]
pub fn run_batch_sequential(config: &BatchConfig) -> Result<Vec<TrialResult>, Error> {
    config.validate()?;
    config
        .seeds
        .seeds()
        .into_iter()
        .map(|seed| run_trial(&config.trial, seed))
        .collect()
}

/// Aggregate statistics over a batch of trials.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct BatchSummary {
    pub num_trials: usize,
    /// Fraction of trials in which the stopping rule fired.
    pub stop_rate: f64,
    /// Among stopped trials, the fraction that recommended a suboptimal arm.
    /// `None` if no trial stopped.
    pub misidentification_rate: Option<f64>,
    /// Fraction of all trials whose final recommendation is the true best arm.
    pub accuracy: f64,
    /// Mean stopping time over stopped trials. `None` if no trial stopped.
    pub mean_stopping_time: Option<f64>,
    pub mean_final_regret: f64,
    /// Element-wise mean of the cumulative-regret trajectories. Position `t` averages over
    /// the trials whose horizon reaches `t`.
    pub mean_regret_trajectory: Vec<f64>,
}

impl BatchSummary {
    /// Returns `None` for an empty batch.
    pub fn from_results(results: &[TrialResult]) -> Option<Self> {
        if results.is_empty() {
            return None;
        }
        let num_trials = results.len();
        let fraction = |count: usize, total: usize| count as f64 / total as f64;

        let stopped: Vec<&TrialResult> = results.iter().filter(|r| r.stopped()).collect();
        let misidentified = stopped.iter().filter(|r| !r.identified_best_arm()).count();
        let identified = results.iter().filter(|r| r.identified_best_arm()).count();
        let stopping_times: Vec<f64> = stopped
            .iter()
            .filter_map(|r| r.stopping_time())
            .map(|t| t as f64)
            .collect();
        let final_regrets: Vec<f64> = results.iter().map(TrialResult::final_regret).collect();

        let horizon = results
            .iter()
            .map(|r| r.cumulative_regret().len())
            .max()
            .unwrap_or(0);
        let mean_regret_trajectory = (0..horizon)
            .filter_map(|t| {
                let values: Vec<f64> = results
                    .iter()
                    .filter_map(|r| r.cumulative_regret().get(t).copied())
                    .collect();
                mean(&values)
            })
            .collect();

        Some(Self {
            num_trials,
            stop_rate: fraction(stopped.len(), num_trials),
            misidentification_rate: (!stopped.is_empty())
                .then(|| fraction(misidentified, stopped.len())),
            accuracy: fraction(identified, num_trials),
            mean_stopping_time: mean(&stopping_times),
            mean_final_regret: mean(&final_regrets).unwrap_or(0.0),
            mean_regret_trajectory,
        })
    }
}

/// Writes one JSON-serialized [`TrialResult`] per line.
pub fn write_jsonl<W: Write>(results: &[TrialResult], mut writer: W) -> Result<(), Error> {
    for result in results {
        serde_json::to_writer(&mut writer, result).map_err(|e| {
            Error::new(ErrorDetails::Serialization {
                message: e.to_string(),
            })
        })?;
        writeln!(writer).map_err(|e| {
            Error::new(ErrorDetails::Serialization {
                message: e.to_string(),
            })
        })?;
    }
    writer.flush().map_err(|e| {
        Error::new(ErrorDetails::Serialization {
            message: e.to_string(),
        })
    })
}
