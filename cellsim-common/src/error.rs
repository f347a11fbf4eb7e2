use thiserror::Error;

/// Errors raised while loading or validating a run configuration.
///
/// Every variant is surfaced before the engine enters `Running`; a run with
/// a rejected configuration never executes a step and never emits a snapshot.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML from '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("initial_population must be positive (got {0})")]
    NonPositivePopulation(i64),
    #[error("initial_population {0} exceeds the supported maximum of {max}", max = u32::MAX)]
    PopulationTooLarge(i64),
    #[error("dt_hours must be a positive finite number (got {0})")]
    InvalidDt(f64),
    #[error("duration_hours must be a positive finite number (got {0})")]
    InvalidDuration(f64),
    #[error("unknown cell line '{0}'")]
    UnknownCellLine(String),
    #[error("unknown drug '{0}'")]
    UnknownDrug(String),
    #[error("treatment dose_uM must be a non-negative finite number (got {0})")]
    InvalidDose(f64),
    #[error("treatment start_hr must be a non-negative finite number (got {0})")]
    InvalidTreatmentStart(f64),
    #[error("treatment redose_interval_hr must be a positive finite number (got {0})")]
    InvalidRedoseInterval(f64),
    #[error("initial environment field {field} out of range (got {value})")]
    EnvironmentOutOfRange { field: &'static str, value: f64 },
    #[error("environment dynamics field {field} must be a non-negative finite number (got {value})")]
    InvalidDynamics { field: &'static str, value: f64 },
    #[error("inheritance_jitter must be within [0, 1] (got {0})")]
    InvalidJitter(f64),
}
