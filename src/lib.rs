pub mod cli;
pub mod config;
pub mod database_ops;
pub mod error;
pub mod geo;
pub mod model;
pub mod normalization;
pub mod orchestrator;
pub mod telemetry;

pub mod util {
    pub mod env;
}

pub use error::{FetchError, PipelineError};
pub use model::{Provenance, RawRecord, Retailer, StoreRecord};
pub use orchestrator::{AggregationOrchestrator, RunPhase, RunSummary};
