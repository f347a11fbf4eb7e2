use serde::{Deserialize, Serialize};

/// Scalar culture-environment fields, mutated once per step by the engine.
///
/// Units follow standard culture conventions: glucose in mM, dissolved
/// oxygen as a percentage of atmospheric, pH on the usual 0-14 scale,
/// temperature in degrees Celsius. Physiological set-points are roughly
/// 5.5 mM glucose, 21% oxygen, pH 7.4 and 37 C.
#[allow(non_snake_case)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentState {
    /// Glucose concentration (mM), never negative.
    pub glucose_mM: f64,
    /// Dissolved oxygen (% of atmospheric), within [0, 100].
    pub oxygen_pct: f64,
    /// Medium pH, within [0, 14].
    pub ph: f64,
    /// Medium temperature (C).
    pub temperature_c: f64,
}

/// An immutable record of the population state at the end of one step.
///
/// The ordered sequence of snapshots is the engine's sole externally
/// visible output besides terminal errors. `total_cells` counts every agent
/// ever created (dead cells persist in the pool), so it never decreases.
#[allow(non_snake_case)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    /// Step number this snapshot closes (0 for the initial state).
    pub step_index: u64,
    /// Simulated time (hours) at which the snapshot was taken.
    pub elapsed_hours: f64,
    /// All agents ever created in this run.
    pub total_cells: u64,
    /// Agents currently in the `Alive` state.
    pub viable_cells: u64,
    /// Agents committed to death but not yet dead.
    pub dying_cells: u64,
    /// Agents in the terminal `Dead` state.
    pub dead_cells: u64,
    /// Copy of the environment after this step's update.
    pub environment: EnvironmentState,
    /// Instantaneous drug concentration (uM) at `elapsed_hours`.
    pub treatment_concentration_uM: f64,
}

impl SimulationSnapshot {
    /// Viable fraction of the population as a percentage.
    ///
    /// Defined as 0 for an empty population rather than a division error.
    pub fn viability_pct(&self) -> f64 {
        if self.total_cells == 0 {
            0.0
        } else {
            self.viable_cells as f64 / self.total_cells as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(total: u64, viable: u64) -> SimulationSnapshot {
        SimulationSnapshot {
            step_index: 0,
            elapsed_hours: 0.0,
            total_cells: total,
            viable_cells: viable,
            dying_cells: 0,
            dead_cells: total.saturating_sub(viable),
            environment: EnvironmentState {
                glucose_mM: 5.5,
                oxygen_pct: 21.0,
                ph: 7.4,
                temperature_c: 37.0,
            },
            treatment_concentration_uM: 0.0,
        }
    }

    #[test]
    fn viability_is_bounded() {
        assert_eq!(snapshot(200, 150).viability_pct(), 75.0);
        assert_eq!(snapshot(10, 10).viability_pct(), 100.0);
        assert_eq!(snapshot(10, 0).viability_pct(), 0.0);
    }

    #[test]
    fn empty_population_has_zero_viability() {
        assert_eq!(snapshot(0, 0).viability_pct(), 0.0);
    }
}
