//! Hyperparameter search
//!
//! A [`Tuner`] asks an [`Oracle`] for the next configuration, hands it to a
//! [`HyperModel`] to train, and records the outcome. Three oracles are
//! available:
//! - random search
//! - Bayesian optimization with a Gaussian process
//! - Hyperband, which continues promising trials from their checkpoints

pub mod gaussian_process;
pub mod hyperband;
pub mod oracle;
pub mod samplers;
pub mod search_space;
pub mod trial;
pub mod tuner;

pub use gaussian_process::{upper_confidence_bound, GaussianProcess, GpSampler, Matern52};
pub use hyperband::{HyperbandOracle, RoundPlan};
pub use oracle::{create_oracle, BayesianOracle, Oracle, RandomSearchOracle, TunerKind};
pub use samplers::{RandomSampler, Sampler};
pub use search_space::{param_float, param_int, trial_key, Parameter, ParameterType, ParameterValue, SearchSpace, TrialParams};
pub use trial::{BracketTag, TrialRecord, TrialSpec, TrialStatus};
pub use tuner::{HyperModel, TrialBudget, TrialOutcome, Tuner, STATE_FILE};
