use crate::error::ConfigError;
use crate::params::{CellLine, Drug, SimParams, TreatmentSpec};
use crate::snapshot::EnvironmentState;
use serde::{Deserialize, Serialize};
use std::path::Path;

// Core run parameters, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RunSection {
    pub cell_line: String,
    /// Signed so that a negative value is rejected by validation instead of
    /// failing opaquely at deserialization time.
    pub initial_population: i64,
    pub duration_hours: f64,
    pub dt_hours: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_inheritance_jitter")]
    pub inheritance_jitter: f64,
}

fn default_seed() -> u64 {
    42
}

fn default_inheritance_jitter() -> f64 {
    0.05
}

// Initial environment fields plus the dynamics that drive them per step.
#[allow(non_snake_case)]
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EnvironmentSection {
    #[serde(default = "default_glucose")]
    pub glucose_mM: f64,
    #[serde(default = "default_oxygen")]
    pub oxygen_pct: f64,
    #[serde(default = "default_ph")]
    pub ph: f64,
    #[serde(default = "default_temperature")]
    pub temperature_c: f64,
    #[serde(default)]
    pub dynamics: EnvironmentDynamics,
}

impl Default for EnvironmentSection {
    fn default() -> Self {
        Self {
            glucose_mM: default_glucose(),
            oxygen_pct: default_oxygen(),
            ph: default_ph(),
            temperature_c: default_temperature(),
            dynamics: EnvironmentDynamics::default(),
        }
    }
}

fn default_glucose() -> f64 {
    5.5
}

fn default_oxygen() -> f64 {
    21.0
}

fn default_ph() -> f64 {
    7.4
}

fn default_temperature() -> f64 {
    37.0
}

/// Consumption, perfusion and set-point relaxation rates.
///
/// Defaults model a well-perfused culture: per-cell uptake is small and the
/// medium relaxes toward its targets between steps.
#[allow(non_snake_case)]
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EnvironmentDynamics {
    #[serde(default = "default_glucose_uptake")]
    pub glucose_uptake_mM_per_cell_hr: f64,
    #[serde(default = "default_glucose")]
    pub glucose_target_mM: f64,
    #[serde(default = "default_glucose_replenish")]
    pub glucose_replenish_per_hr: f64,
    #[serde(default = "default_oxygen_uptake")]
    pub oxygen_uptake_pct_per_cell_hr: f64,
    #[serde(default = "default_oxygen")]
    pub oxygen_target_pct: f64,
    #[serde(default = "default_oxygen_replenish")]
    pub oxygen_replenish_per_hr: f64,
    #[serde(default = "default_ph_relax")]
    pub ph_relax_per_hr: f64,
    #[serde(default = "default_ph_sigma")]
    pub ph_sigma: f64,
    #[serde(default = "default_temperature_relax")]
    pub temperature_relax_per_hr: f64,
    #[serde(default = "default_temperature_sigma")]
    pub temperature_sigma: f64,
}

impl Default for EnvironmentDynamics {
    fn default() -> Self {
        Self {
            glucose_uptake_mM_per_cell_hr: default_glucose_uptake(),
            glucose_target_mM: default_glucose(),
            glucose_replenish_per_hr: default_glucose_replenish(),
            oxygen_uptake_pct_per_cell_hr: default_oxygen_uptake(),
            oxygen_target_pct: default_oxygen(),
            oxygen_replenish_per_hr: default_oxygen_replenish(),
            ph_relax_per_hr: default_ph_relax(),
            ph_sigma: default_ph_sigma(),
            temperature_relax_per_hr: default_temperature_relax(),
            temperature_sigma: default_temperature_sigma(),
        }
    }
}

fn default_glucose_uptake() -> f64 {
    5.0e-5
}

fn default_glucose_replenish() -> f64 {
    0.05
}

fn default_oxygen_uptake() -> f64 {
    1.0e-5
}

fn default_oxygen_replenish() -> f64 {
    0.2
}

fn default_ph_relax() -> f64 {
    0.1
}

fn default_ph_sigma() -> f64 {
    0.01
}

fn default_temperature_relax() -> f64 {
    0.5
}

fn default_temperature_sigma() -> f64 {
    0.05
}

// Optional treatment regimen, loaded from config.toml
#[allow(non_snake_case)]
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TreatmentSection {
    pub drug: String,
    pub dose_uM: f64,
    #[serde(default)]
    pub start_hr: f64,
    #[serde(default)]
    pub redose_interval_hr: Option<f64>,
}

// Output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputSection {
    #[serde(default = "default_base_filename")]
    pub base_filename: String,
    /// Snapshot format: "json", "bincode" or "messagepack".
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default = "default_true")]
    pub save_snapshots: bool,
    #[serde(default = "default_true")]
    pub save_growth_curve: bool,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            base_filename: default_base_filename(),
            format: None,
            save_snapshots: true,
            save_growth_curve: true,
        }
    }
}

fn default_base_filename() -> String {
    "cellsim".to_string()
}

fn default_true() -> bool {
    true
}

/// Main run configuration, loaded from config.toml.
///
/// Validation happens once, before a run enters `Running`; nothing here is
/// mutated afterwards.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RunConfig {
    pub run: RunSection,
    #[serde(default)]
    pub environment: EnvironmentSection,
    #[serde(default)]
    pub treatment: Option<TreatmentSection>,
    #[serde(default)]
    pub output: OutputSection,
}

impl RunConfig {
    /// Loads and validates a run configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let config_str = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        let config: RunConfig = toml::from_str(&config_str).map_err(|source| ConfigError::Parse {
            path: path_ref.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every field; called by `load` and again by the engine
    /// before it accepts the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let run = &self.run;
        if run.initial_population <= 0 {
            return Err(ConfigError::NonPositivePopulation(run.initial_population));
        }
        if run.initial_population > u32::MAX as i64 {
            return Err(ConfigError::PopulationTooLarge(run.initial_population));
        }
        if !(run.dt_hours.is_finite() && run.dt_hours > 0.0) {
            return Err(ConfigError::InvalidDt(run.dt_hours));
        }
        if !(run.duration_hours.is_finite() && run.duration_hours > 0.0) {
            return Err(ConfigError::InvalidDuration(run.duration_hours));
        }
        if !(run.inheritance_jitter.is_finite() && (0.0..=1.0).contains(&run.inheritance_jitter)) {
            return Err(ConfigError::InvalidJitter(run.inheritance_jitter));
        }
        CellLine::from_name(&run.cell_line)?;

        let env = &self.environment;
        check_env_range("glucose_mM", env.glucose_mM, 0.0, 1000.0)?;
        check_env_range("oxygen_pct", env.oxygen_pct, 0.0, 100.0)?;
        check_env_range("ph", env.ph, 0.0, 14.0)?;
        check_env_range("temperature_c", env.temperature_c, 0.0, 60.0)?;
        let dynamics = &env.dynamics;
        check_dynamics("glucose_uptake_mM_per_cell_hr", dynamics.glucose_uptake_mM_per_cell_hr)?;
        check_dynamics("glucose_target_mM", dynamics.glucose_target_mM)?;
        check_dynamics("glucose_replenish_per_hr", dynamics.glucose_replenish_per_hr)?;
        check_dynamics("oxygen_uptake_pct_per_cell_hr", dynamics.oxygen_uptake_pct_per_cell_hr)?;
        check_dynamics("oxygen_target_pct", dynamics.oxygen_target_pct)?;
        check_dynamics("oxygen_replenish_per_hr", dynamics.oxygen_replenish_per_hr)?;
        check_dynamics("ph_relax_per_hr", dynamics.ph_relax_per_hr)?;
        check_dynamics("ph_sigma", dynamics.ph_sigma)?;
        check_dynamics("temperature_relax_per_hr", dynamics.temperature_relax_per_hr)?;
        check_dynamics("temperature_sigma", dynamics.temperature_sigma)?;

        if let Some(treatment) = &self.treatment {
            Drug::from_name(&treatment.drug)?;
            if !(treatment.dose_uM.is_finite() && treatment.dose_uM >= 0.0) {
                return Err(ConfigError::InvalidDose(treatment.dose_uM));
            }
            if !(treatment.start_hr.is_finite() && treatment.start_hr >= 0.0) {
                return Err(ConfigError::InvalidTreatmentStart(treatment.start_hr));
            }
            if let Some(interval) = treatment.redose_interval_hr {
                if !(interval.is_finite() && interval > 0.0) {
                    return Err(ConfigError::InvalidRedoseInterval(interval));
                }
            }
        }
        Ok(())
    }

    /// Converts the configuration into the flat parameters used at runtime.
    ///
    /// Assumes `validate` has passed; registry lookups can still fail and
    /// are propagated.
    pub fn sim_params(&self) -> Result<SimParams, ConfigError> {
        let cell_line = CellLine::from_name(&self.run.cell_line)?;
        let dt = self.run.dt_hours;
        let total_steps = (self.run.duration_hours / dt).ceil().max(1.0) as u64;
        let env = &self.environment;
        let dynamics = &env.dynamics;
        Ok(SimParams {
            seed: self.run.seed,
            dt_hours: dt,
            duration_hours: self.run.duration_hours,
            total_steps,
            initial_population: self.run.initial_population as u32,
            cell_line,
            line_params: cell_line.baseline(),
            inherit_jitter_frac: self.run.inheritance_jitter,
            glucose_uptake_mM_per_cell_hr: dynamics.glucose_uptake_mM_per_cell_hr,
            glucose_target_mM: dynamics.glucose_target_mM,
            glucose_replenish_per_hr: dynamics.glucose_replenish_per_hr,
            oxygen_uptake_pct_per_cell_hr: dynamics.oxygen_uptake_pct_per_cell_hr,
            oxygen_target_pct: dynamics.oxygen_target_pct,
            oxygen_replenish_per_hr: dynamics.oxygen_replenish_per_hr,
            ph_set_point: env.ph,
            ph_relax_per_hr: dynamics.ph_relax_per_hr,
            ph_sigma: dynamics.ph_sigma,
            temperature_set_point_c: env.temperature_c,
            temperature_relax_per_hr: dynamics.temperature_relax_per_hr,
            temperature_sigma: dynamics.temperature_sigma,
        })
    }

    /// Resolves the optional treatment section against the drug registry.
    pub fn treatment_spec(&self) -> Result<Option<TreatmentSpec>, ConfigError> {
        match &self.treatment {
            None => Ok(None),
            Some(section) => {
                let drug = Drug::from_name(&section.drug)?;
                Ok(Some(TreatmentSpec {
                    drug,
                    params: drug.params(),
                    dose_uM: section.dose_uM,
                    start_hr: section.start_hr,
                    redose_interval_hr: section.redose_interval_hr,
                }))
            }
        }
    }

    /// The configured initial environment fields.
    pub fn initial_environment(&self) -> EnvironmentState {
        EnvironmentState {
            glucose_mM: self.environment.glucose_mM,
            oxygen_pct: self.environment.oxygen_pct,
            ph: self.environment.ph,
            temperature_c: self.environment.temperature_c,
        }
    }
}

fn check_env_range(field: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= lo && value <= hi {
        Ok(())
    } else {
        Err(ConfigError::EnvironmentOutOfRange { field, value })
    }
}

fn check_dynamics(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidDynamics { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> RunConfig {
        RunConfig {
            run: RunSection {
                cell_line: "hela".to_string(),
                initial_population: 100,
                duration_hours: 72.0,
                dt_hours: 24.0,
                seed: 42,
                inheritance_jitter: 0.05,
            },
            environment: EnvironmentSection::default(),
            treatment: None,
            output: OutputSection::default(),
        }
    }

    #[test]
    fn minimal_config_validates() {
        minimal_config().validate().unwrap();
        let params = minimal_config().sim_params().unwrap();
        assert_eq!(params.total_steps, 3);
        assert_eq!(params.initial_population, 100);
        assert_eq!(params.cell_line, CellLine::Hela);
    }

    #[test]
    fn negative_population_is_rejected() {
        let mut config = minimal_config();
        config.run.initial_population = -5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositivePopulation(-5))
        ));
    }

    #[test]
    fn non_positive_dt_is_rejected() {
        let mut config = minimal_config();
        config.run.dt_hours = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDt(_))));
    }

    #[test]
    fn unknown_cell_line_is_rejected() {
        let mut config = minimal_config();
        config.run.cell_line = "u2os".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownCellLine(_))
        ));
    }

    #[test]
    fn malformed_treatment_is_rejected() {
        let mut config = minimal_config();
        config.treatment = Some(TreatmentSection {
            drug: "cisplatin".to_string(),
            dose_uM: 10.0,
            start_hr: 0.0,
            redose_interval_hr: Some(0.0),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRedoseInterval(_))
        ));
    }

    #[test]
    fn toml_round_trip() {
        let text = r#"
            [run]
            cell_line = "a549"
            initial_population = 250
            duration_hours = 48.0
            dt_hours = 6.0

            [treatment]
            drug = "cisplatin"
            dose_uM = 10.0
        "#;
        let config: RunConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.run.seed, 42, "seed defaults when omitted");
        let spec = config.treatment_spec().unwrap().unwrap();
        assert_eq!(spec.drug, Drug::Cisplatin);
        assert_eq!(spec.start_hr, 0.0);
        let params = config.sim_params().unwrap();
        assert_eq!(params.total_steps, 8);
    }
}
