//! Deterministic cell-population simulation engine.
//!
//! A population of discrete cell agents evolves over time under
//! environmental conditions (glucose, oxygen, pH, temperature) and
//! pharmacological treatment. Runs are step-ordered and bit-reproducible:
//! every stochastic decision draws from a generator derived purely from
//! `(seed, step, stream)`, so results are independent of thread count and
//! evaluation order. The engine emits one immutable [`SimulationSnapshot`]
//! per step; aggregation and dose-response fitting consume that stream.

pub mod agents;
pub mod dose_response;
pub mod engine;
pub mod environment;
pub mod rng;
pub mod stats;
pub mod stream;
pub mod treatment;
pub mod warnings;

pub use cellsim_common as common;

// Re-export the run-facing surface
pub use cellsim_common::{ConfigError, RunConfig, SimulationSnapshot};
pub use engine::{EngineError, RunState, RunSummary, StepEngine, StopHandle};
pub use stream::SnapshotSubscription;
