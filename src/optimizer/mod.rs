//! Hyperparameter search
//!
//! Provides:
//! - Search spaces over discrete sets and (log-)uniform ranges
//! - Grid, random and TPE-style samplers
//! - A tuner running trials on a bounded worker pool under a budget

mod config;
mod samplers;
mod search_space;
mod tuner;

pub use config::{SearchBudget, TunerConfig};
pub(crate) use config::seconds_to_duration;
pub use samplers::{create_sampler, GridSampler, RandomSampler, Sampler, SamplerType, TpeSampler, MAX_AUTO_GRID};
pub use search_space::{Parameter, ParameterType, ParameterValue, SearchSpace, TrialParams};
pub use tuner::{CancelHandle, SearchSummary, TrialStream, Tuner};
