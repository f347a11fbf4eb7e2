pub mod config;
pub mod error;
pub mod params;
pub mod snapshot;

// Re-export key types for easier use by dependent crates
pub use config::{
    EnvironmentDynamics, EnvironmentSection, OutputSection, RunConfig, RunSection,
    TreatmentSection,
};
pub use error::ConfigError;
pub use params::{CellLine, CellLineParams, Drug, DrugParams, SimParams, TreatmentSpec};
pub use snapshot::{EnvironmentState, SimulationSnapshot};
