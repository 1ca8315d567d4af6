//! Fashion Tuner - hyperparameter search for a Fashion-MNIST CNN
//!
//! Loads Fashion-MNIST, searches the CNN's filter counts, dense width and
//! learning rate with Hyperband, random search or Bayesian optimization,
//! retrains the best configuration and reports on the test split.
//!
//! # Modules
//!
//! - [`data`] - IDX loading, scaling and one-hot labels
//! - [`nn`] - layers, loss, Adam and the sequential model
//! - [`training`] - fit loop, callbacks, history and classification report
//! - [`optimizer`] - search space, oracles and the tuner
//! - [`model`] - the CNN hypermodel
//! - [`plot`] - training curve plot
//! - [`cli`] - command-line interface

pub mod error;
pub mod config;

pub mod data;
pub mod nn;
pub mod training;
pub mod optimizer;
pub mod model;
pub mod plot;

pub mod cli;

pub use config::{Objective, OptimizeDirection, RunConfig, TrainConfig, TunerConfig};
pub use error::{Result, TunerError};
pub use model::{build_model, search_space, CnnHyperModel};
pub use optimizer::{HyperModel, Tuner, TunerKind};
