//! Dose-response studies: drive one engine run per concentration and fit a
//! Hill curve to the observed responses.
//!
//! The fit is a log-spaced grid search over (EC50, slope) with a
//! closed-form Emax per grid cell, refined by damped Gauss-Newton. Fit
//! failures are structured results carrying the raw residuals — they are
//! never silently discarded.

use crate::engine::{EngineError, StepEngine};
use cellsim_common::{RunConfig, TreatmentSection};
use log::{debug, info};
use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;

/// One observed point of a dose-response study.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DosePoint {
    pub concentration_uM: f64,
    /// Response in [0, 1]; by convention growth inhibition relative to an
    /// untreated control.
    pub response: f64,
}

/// A converged Hill fit.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HillFit {
    pub ic50_uM: f64,
    pub hill_slope: f64,
    pub emax: f64,
    pub residual_sum_squares: f64,
    /// Coefficient of determination against the observed responses.
    pub r_squared: f64,
}

/// Structured fit-failure results.
#[derive(Debug, Error)]
pub enum FitError {
    #[error("insufficient data: {distinct} distinct positive concentrations spanning {span_orders:.2} orders of magnitude (need at least 3 spanning more than 1)")]
    InsufficientData { distinct: usize, span_orders: f64 },
    #[error("responses are not monotonic in concentration: worst inversion {worst:.4} exceeds tolerance {tolerance}")]
    NonMonotonic {
        worst: f64,
        tolerance: f64,
        residuals: Vec<f64>,
    },
    #[error("fit did not converge to a coherent optimum")]
    Degenerate { residuals: Vec<f64> },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Largest tolerated pairwise inversion before the data is declared
/// incoherent. Sized to pass sampling noise at realistic population sizes.
pub const MONOTONIC_TOLERANCE: f64 = 0.1;

// Coherence bounds on the fitted parameters.
const EMAX_MAX: f64 = 1.5;
const SLOPE_MIN: f64 = 0.05;
const SLOPE_MAX: f64 = 10.0;

/// Runs the engine to completion once per concentration (plus an untreated
/// control with the same seed) and reports growth inhibition
/// `1 - viable_treated / viable_control` at the terminal snapshot.
pub fn run_dose_series(
    base: &RunConfig,
    drug: &str,
    concentrations: &[f64],
) -> Result<Vec<DosePoint>, EngineError> {
    let mut control = base.clone();
    control.treatment = None;
    let control_viable = terminal_viable(&control)?;
    info!(
        "dose series: untreated control finished with {} viable cells",
        control_viable
    );

    let mut points = Vec::with_capacity(concentrations.len());
    for &concentration in concentrations {
        let mut treated = base.clone();
        treated.treatment = Some(TreatmentSection {
            drug: drug.to_string(),
            dose_uM: concentration,
            start_hr: 0.0,
            redose_interval_hr: None,
        });
        let viable = terminal_viable(&treated)?;
        let response = if control_viable == 0 {
            0.0
        } else {
            (1.0 - viable as f64 / control_viable as f64).clamp(0.0, 1.0)
        };
        debug!(
            "dose series: {} uM -> {} viable (inhibition {:.3})",
            concentration, viable, response
        );
        points.push(DosePoint {
            concentration_uM: concentration,
            response,
        });
    }
    Ok(points)
}

fn terminal_viable(config: &RunConfig) -> Result<u64, EngineError> {
    let mut engine = StepEngine::new(config)?;
    engine.run()?;
    Ok(engine.last_snapshot().map_or(0, |s| s.viable_cells))
}

/// Fits Hill parameters (IC50, slope, Emax) to observed points by
/// nonlinear least squares.
pub fn fit_hill(points: &[DosePoint]) -> Result<HillFit, FitError> {
    let mut data: Vec<DosePoint> = points
        .iter()
        .copied()
        .filter(|p| p.concentration_uM > 0.0 && p.concentration_uM.is_finite() && p.response.is_finite())
        .collect();
    data.sort_by(|a, b| {
        a.concentration_uM
            .partial_cmp(&b.concentration_uM)
            .unwrap_or(Ordering::Equal)
    });

    let mut distinct = 0usize;
    let mut previous = f64::NAN;
    for point in &data {
        if point.concentration_uM != previous {
            distinct += 1;
            previous = point.concentration_uM;
        }
    }
    let span_orders = if data.is_empty() {
        0.0
    } else {
        (data[data.len() - 1].concentration_uM / data[0].concentration_uM).log10()
    };
    if distinct < 3 || span_orders <= 1.0 {
        return Err(FitError::InsufficientData {
            distinct,
            span_orders,
        });
    }

    let c_min = data[0].concentration_uM;
    let c_max = data[data.len() - 1].concentration_uM;

    // Coarse grid: EC50 log-spaced over an order beyond the dosed span,
    // slope log-spaced over its coherent range, Emax closed-form per cell.
    let mut best = (f64::INFINITY, 0.5, (c_min * c_max).sqrt(), 1.0); // (sse, emax, ec50, n)
    for ec50 in log_space(c_min / 10.0, c_max * 10.0, 48) {
        for slope in log_space(0.3, 4.0, 20) {
            let mut hy = 0.0;
            let mut hh = 0.0;
            for point in &data {
                let h = hill_shape(point.concentration_uM, ec50, slope);
                hy += h * point.response;
                hh += h * h;
            }
            if hh <= 0.0 {
                continue;
            }
            let emax = (hy / hh).clamp(0.0, EMAX_MAX);
            let sse = data
                .iter()
                .map(|p| {
                    let r = p.response - emax * hill_shape(p.concentration_uM, ec50, slope);
                    r * r
                })
                .sum::<f64>();
            if sse < best.0 {
                best = (sse, emax, ec50, slope);
            }
        }
    }

    let (emax, ec50, slope) = refine(&data, best.1, best.2, best.3, c_min, c_max);
    let residuals: Vec<f64> = data
        .iter()
        .map(|p| p.response - emax * hill_shape(p.concentration_uM, ec50, slope))
        .collect();
    let rss: f64 = residuals.iter().map(|r| r * r).sum();

    // Non-monotonic incoherence beyond tolerance is a fit failure with the
    // residuals attached, never a silent pass.
    let mut worst = 0.0f64;
    for i in 0..data.len() {
        for j in (i + 1)..data.len() {
            if data[j].concentration_uM > data[i].concentration_uM {
                worst = worst.max(data[i].response - data[j].response);
            }
        }
    }
    if worst > MONOTONIC_TOLERANCE {
        return Err(FitError::NonMonotonic {
            worst,
            tolerance: MONOTONIC_TOLERANCE,
            residuals,
        });
    }

    let mean_response = data.iter().map(|p| p.response).sum::<f64>() / data.len() as f64;
    let tss: f64 = data
        .iter()
        .map(|p| {
            let d = p.response - mean_response;
            d * d
        })
        .sum();
    let coherent = rss.is_finite()
        && emax > 0.0
        && emax <= EMAX_MAX
        && ec50 >= c_min / 100.0
        && ec50 <= c_max * 100.0
        && (SLOPE_MIN..=SLOPE_MAX).contains(&slope)
        && tss > 1e-12;
    if !coherent {
        return Err(FitError::Degenerate { residuals });
    }

    Ok(HillFit {
        ic50_uM: ec50,
        hill_slope: slope,
        emax,
        residual_sum_squares: rss,
        r_squared: 1.0 - rss / tss,
    })
}

/// The unit Hill shape `c^n / (ec50^n + c^n)`.
fn hill_shape(concentration: f64, ec50: f64, slope: f64) -> f64 {
    let u = (concentration / ec50).powf(slope);
    u / (1.0 + u)
}

fn log_space(lo: f64, hi: f64, count: usize) -> Vec<f64> {
    let (ln_lo, ln_hi) = (lo.ln(), hi.ln());
    (0..count)
        .map(|i| (ln_lo + (ln_hi - ln_lo) * i as f64 / (count - 1) as f64).exp())
        .collect()
}

/// Damped Gauss-Newton refinement of (Emax, ln EC50, ln slope).
fn refine(
    data: &[DosePoint],
    mut emax: f64,
    mut ec50: f64,
    mut slope: f64,
    c_min: f64,
    c_max: f64,
) -> (f64, f64, f64) {
    let sse = |emax: f64, ec50: f64, slope: f64| {
        data.iter()
            .map(|p| {
                let r = p.response - emax * hill_shape(p.concentration_uM, ec50, slope);
                r * r
            })
            .sum::<f64>()
    };
    let mut current = sse(emax, ec50, slope);
    let mut lambda = 1e-3;

    for _ in 0..100 {
        let ln_ec50 = ec50.ln();
        // Accumulate normal equations J^T J and J^T r over the points.
        let mut jtj = [[0.0f64; 3]; 3];
        let mut jtr = [0.0f64; 3];
        for point in data {
            let u = (point.concentration_uM / ec50).powf(slope);
            let h = u / (1.0 + u);
            let denom = (1.0 + u) * (1.0 + u);
            let log_ratio = point.concentration_uM.ln() - ln_ec50;
            let j = [
                h,                                        // d model / d emax
                -emax * slope * u / denom,                // d model / d ln(ec50)
                emax * slope * log_ratio * u / denom,     // d model / d ln(slope)
            ];
            let residual = point.response - emax * h;
            for a in 0..3 {
                for b in 0..3 {
                    jtj[a][b] += j[a] * j[b];
                }
                jtr[a] += j[a] * residual;
            }
        }

        let mut damped = jtj;
        for (a, row) in damped.iter_mut().enumerate() {
            row[a] += lambda * jtj[a][a].max(1e-12);
        }
        let Some(delta) = solve3(damped, jtr) else {
            lambda *= 10.0;
            if lambda > 1e10 {
                break;
            }
            continue;
        };

        let trial_emax = (emax + delta[0]).clamp(1e-6, EMAX_MAX);
        let trial_ec50 = (ln_ec50 + delta[1])
            .exp()
            .clamp(c_min / 100.0, c_max * 100.0);
        let trial_slope = (slope.ln() + delta[2]).exp().clamp(SLOPE_MIN, SLOPE_MAX);
        let trial = sse(trial_emax, trial_ec50, trial_slope);

        if trial < current {
            let improvement = (current - trial) / current.max(1e-300);
            emax = trial_emax;
            ec50 = trial_ec50;
            slope = trial_slope;
            current = trial;
            lambda = (lambda / 10.0).max(1e-12);
            if improvement < 1e-12 {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e10 {
                break;
            }
        }
    }
    (emax, ec50, slope)
}

/// Solves a 3x3 linear system by Gaussian elimination with partial
/// pivoting. `None` for a singular matrix.
fn solve3(mut a: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..3 {
            let factor = a[row][col] / a[col][col];
            for k in col..3 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = [0.0f64; 3];
    for row in (0..3).rev() {
        let mut sum = b[row];
        for k in (row + 1)..3 {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}
