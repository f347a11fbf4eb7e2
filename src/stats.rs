//! Population statistics derived from the snapshot sequence.
//!
//! Pure, read-only consumers: nothing here mutates prior history.

use cellsim_common::SimulationSnapshot;
use serde::Serialize;

/// Instantaneous growth rate (per hour) between two snapshots, estimated
/// as the finite difference of ln(total cells).
///
/// `None` when undefined: empty populations or a non-positive time delta.
pub fn growth_rate_per_hr(prev: &SimulationSnapshot, cur: &SimulationSnapshot) -> Option<f64> {
    let dt = cur.elapsed_hours - prev.elapsed_hours;
    if dt <= 0.0 || prev.total_cells == 0 || cur.total_cells == 0 {
        return None;
    }
    Some(((cur.total_cells as f64).ln() - (prev.total_cells as f64).ln()) / dt)
}

/// Doubling time (hours) for a given growth rate.
///
/// Undefined (`None`) for a non-growing population; this is a report, not
/// an error.
pub fn doubling_time_hr(growth_rate_per_hr: f64) -> Option<f64> {
    if growth_rate_per_hr > 0.0 {
        Some(std::f64::consts::LN_2 / growth_rate_per_hr)
    } else {
        None
    }
}

/// One row of the documented growth-curve export format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrowthCurveRow {
    pub time_hr: f64,
    pub total_cells: u64,
    pub viable_cells: u64,
    pub viability_pct: f64,
}

/// Renders the snapshot sequence as growth-curve rows.
pub fn growth_curve(snapshots: &[SimulationSnapshot]) -> Vec<GrowthCurveRow> {
    snapshots
        .iter()
        .map(|snapshot| GrowthCurveRow {
            time_hr: snapshot.elapsed_hours,
            total_cells: snapshot.total_cells,
            viable_cells: snapshot.viable_cells,
            viability_pct: snapshot.viability_pct(),
        })
        .collect()
}

/// Terminal summary of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub terminal_total: u64,
    pub terminal_viable: u64,
    pub terminal_viability_pct: f64,
    /// Growth rate over the two most recent snapshots.
    pub latest_growth_rate_per_hr: Option<f64>,
    pub doubling_time_hr: Option<f64>,
}

impl RunStats {
    pub fn from_snapshots(snapshots: &[SimulationSnapshot]) -> Option<Self> {
        let last = snapshots.last()?;
        let latest_growth_rate_per_hr = match snapshots.len() {
            0 | 1 => None,
            n => growth_rate_per_hr(&snapshots[n - 2], &snapshots[n - 1]),
        };
        Some(RunStats {
            terminal_total: last.total_cells,
            terminal_viable: last.viable_cells,
            terminal_viability_pct: last.viability_pct(),
            latest_growth_rate_per_hr,
            doubling_time_hr: latest_growth_rate_per_hr.and_then(doubling_time_hr),
        })
    }
}
