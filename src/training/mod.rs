//! Model training
//!
//! - [`fit`] runs shuffled mini-batch epochs with per-epoch validation
//! - [`Callback`] hooks, with [`EarlyStopping`] on validation loss
//! - [`History`] of per-epoch metrics
//! - [`ClassificationReport`] for the final evaluation

mod callbacks;
mod history;
mod metrics;
mod trainer;

pub use callbacks::{Callback, CallbackAction, EarlyStopping, ModelCheckpoint};
pub use history::{EpochLogs, History, METRIC_NAMES};
pub use metrics::{ClassMetrics, ClassificationReport};
pub use trainer::{fit, FitConfig};
