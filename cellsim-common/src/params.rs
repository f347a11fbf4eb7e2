use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of supported cell lines.
///
/// Each variant resolves to baseline kinetics via [`CellLine::baseline`];
/// unknown names are rejected during configuration validation, never at
/// step time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellLine {
    Hela,
    A549,
    Mcf7,
    Hct116,
}

impl CellLine {
    pub const ALL: [CellLine; 4] = [CellLine::Hela, CellLine::A549, CellLine::Mcf7, CellLine::Hct116];

    /// Resolves a configured name to a cell line, case-insensitively.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_lowercase().as_str() {
            "hela" => Ok(CellLine::Hela),
            "a549" => Ok(CellLine::A549),
            "mcf7" | "mcf-7" => Ok(CellLine::Mcf7),
            "hct116" | "hct-116" => Ok(CellLine::Hct116),
            _ => Err(ConfigError::UnknownCellLine(name.to_string())),
        }
    }

    /// Baseline kinetic parameters for this line.
    pub fn baseline(&self) -> CellLineParams {
        match self {
            CellLine::Hela => CellLineParams {
                division_rate_per_hr: 0.0885,
                death_rate_per_hr: 0.00084,
                phase_duration_hr: 18.0,
            },
            CellLine::A549 => CellLineParams {
                division_rate_per_hr: 0.0630,
                death_rate_per_hr: 0.00070,
                phase_duration_hr: 20.0,
            },
            CellLine::Mcf7 => CellLineParams {
                division_rate_per_hr: 0.0480,
                death_rate_per_hr: 0.00055,
                phase_duration_hr: 22.0,
            },
            CellLine::Hct116 => CellLineParams {
                division_rate_per_hr: 0.0810,
                death_rate_per_hr: 0.00090,
                phase_duration_hr: 17.0,
            },
        }
    }
}

impl fmt::Display for CellLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellLine::Hela => "HeLa",
            CellLine::A549 => "A549",
            CellLine::Mcf7 => "MCF7",
            CellLine::Hct116 => "HCT116",
        };
        f.write_str(name)
    }
}

/// Fixed-shape kinetic record carried by every agent.
///
/// Extensible only by adding named fields; agents never carry dynamic
/// attribute bags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellLineParams {
    /// Baseline division rate (events per hour) once the cycle gate opens.
    pub division_rate_per_hr: f64,
    /// Baseline spontaneous death rate (events per hour).
    pub death_rate_per_hr: f64,
    /// Minimum cycle time before an agent becomes division-eligible (hours).
    pub phase_duration_hr: f64,
}

/// Closed set of supported compounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Drug {
    Cisplatin,
    Doxorubicin,
    Paclitaxel,
    Fluorouracil,
}

impl Drug {
    /// Resolves a configured name to a drug, case-insensitively.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_lowercase().as_str() {
            "cisplatin" => Ok(Drug::Cisplatin),
            "doxorubicin" => Ok(Drug::Doxorubicin),
            "paclitaxel" => Ok(Drug::Paclitaxel),
            "fluorouracil" | "5-fluorouracil" | "5-fu" => Ok(Drug::Fluorouracil),
            _ => Err(ConfigError::UnknownDrug(name.to_string())),
        }
    }

    /// PK/PD parameters for this compound.
    pub fn params(&self) -> DrugParams {
        match self {
            Drug::Cisplatin => DrugParams {
                ec50_uM: 12.3,
                hill_coefficient: 1.1,
                emax: 0.87,
                elimination_rate_per_hr: 0.23,
            },
            Drug::Doxorubicin => DrugParams {
                ec50_uM: 0.85,
                hill_coefficient: 1.4,
                emax: 0.93,
                elimination_rate_per_hr: 0.026,
            },
            Drug::Paclitaxel => DrugParams {
                ec50_uM: 0.44,
                hill_coefficient: 2.0,
                emax: 0.90,
                elimination_rate_per_hr: 0.05,
            },
            Drug::Fluorouracil => DrugParams {
                ec50_uM: 4.8,
                hill_coefficient: 0.9,
                emax: 0.78,
                elimination_rate_per_hr: 0.35,
            },
        }
    }
}

impl fmt::Display for Drug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Drug::Cisplatin => "cisplatin",
            Drug::Doxorubicin => "doxorubicin",
            Drug::Paclitaxel => "paclitaxel",
            Drug::Fluorouracil => "fluorouracil",
        };
        f.write_str(name)
    }
}

/// Pharmacological constants for a compound.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrugParams {
    /// Concentration producing half-maximal effect (uM).
    pub ec50_uM: f64,
    /// Hill slope coefficient.
    pub hill_coefficient: f64,
    /// Maximal effect, as a probability shift in [0, 1].
    pub emax: f64,
    /// First-order elimination rate (per hour).
    pub elimination_rate_per_hr: f64,
}

/// A validated treatment regimen: which drug, how much, and when.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreatmentSpec {
    pub drug: Drug,
    pub params: DrugParams,
    /// Bolus dose (uM) administered at each dosing time.
    pub dose_uM: f64,
    /// Time of the first dose (hours from run start).
    pub start_hr: f64,
    /// Optional fixed re-dosing interval (hours).
    pub redose_interval_hr: Option<f64>,
}

/// Flat simulation parameters derived from the configuration, used
/// frequently during simulation steps.
#[allow(non_snake_case)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimParams {
    // Run
    pub seed: u64,
    pub dt_hours: f64,
    pub duration_hours: f64,
    pub total_steps: u64,
    pub initial_population: u32,
    pub cell_line: CellLine,
    pub line_params: CellLineParams,
    /// Relative sigma of the parameter jitter applied on inheritance.
    pub inherit_jitter_frac: f64,

    // Environment dynamics
    pub glucose_uptake_mM_per_cell_hr: f64,
    pub glucose_target_mM: f64,
    pub glucose_replenish_per_hr: f64,
    pub oxygen_uptake_pct_per_cell_hr: f64,
    pub oxygen_target_pct: f64,
    pub oxygen_replenish_per_hr: f64,
    pub ph_set_point: f64,
    pub ph_relax_per_hr: f64,
    pub ph_sigma: f64,
    pub temperature_set_point_c: f64,
    pub temperature_relax_per_hr: f64,
    pub temperature_sigma: f64,
}
