//! Simulation harness for sequential best-arm identification.
//!
//! A trial pairs a [`RewardEnvironment`] (a seeded multi-armed bandit with known true means)
//! with a [`SequentialBanditTester`] (uniform sampling plus a confidence-interval stopping
//! rule) and records the cumulative regret at every step. [`batch`] runs many trials over a
//! range of seeds and summarizes them.

pub mod batch;
pub mod environment;
pub mod error;
pub mod statistics_util;
pub mod tester;
pub mod trial;

pub use batch::{BatchConfig, BatchSummary, SeedPlan, run_batch, run_batch_sequential, write_jsonl};
pub use environment::{
    Difficulty, Environment, EnvironmentConfig, FamilyParams, RewardEnvironment, RewardFamily,
};
pub use error::{Error, ErrorDetails};
pub use tester::{IntervalKind, SequentialBanditTester, StoppingDecision, TesterConfig};
pub use trial::{TrialConfig, TrialResult, TrialRunner, run_trial};
