//! Achievement publishing pipeline.
//!
//! - [`filter`]: eligibility and rarest-first ordering
//! - [`rate`]: hourly and per-interval post caps
//! - [`orchestrator`]: the polling loop

pub mod filter;
pub mod orchestrator;
pub mod rate;

pub use orchestrator::{CycleReport, Orchestrator, PipelineStage, Settings};
pub use rate::RateWindow;
