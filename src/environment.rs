//! Per-step environment update and the hazard modifiers derived from it.
//!
//! Glucose and oxygen are depleted in proportion to the alive population
//! and relax back toward their perfusion targets; pH and temperature track
//! their set-points with a small seeded Gaussian perturbation. All fields
//! are clamped to their physical domain — an out-of-range value is recorded
//! as a domain warning, never propagated as NaN.

use crate::rng::{stream_rng, ENV_STREAM};
use crate::warnings::WarningLog;
use cellsim_common::{EnvironmentState, SimParams};
use rand::prelude::*;
use rand_distr::Normal;

// Stress thresholds. Factors are exactly 1.0 in the healthy band so that a
// well-perfused culture grows at its baseline rate.
const GLUCOSE_STRESS_MM: f64 = 1.0;
const OXYGEN_STRESS_PCT: f64 = 5.0;
const PH_HEALTHY_MIN: f64 = 6.9;
const PH_HEALTHY_MAX: f64 = 7.7;
const PH_FALLOFF: f64 = 0.5;
const TEMP_HEALTHY_MIN_C: f64 = 35.5;
const TEMP_HEALTHY_MAX_C: f64 = 38.5;
const TEMP_FALLOFF_C: f64 = 3.0;

// Extra death rate (per hour) contributed by each fully stressed field.
const GLUCOSE_DEATH_RATE: f64 = 0.02;
const OXYGEN_DEATH_RATE: f64 = 0.03;
const PH_DEATH_RATE: f64 = 0.04;
const TEMP_DEATH_RATE: f64 = 0.04;

/// Advances the environment by one step of `dt` hours.
pub fn advance(
    prev: &EnvironmentState,
    params: &SimParams,
    alive_count: u64,
    step: u64,
    warnings: &mut WarningLog,
) -> EnvironmentState {
    let dt = params.dt_hours;
    let mut rng = stream_rng(params.seed, step, ENV_STREAM);

    // Consumption saturates at zero; running dry is expected model
    // behavior, not a domain anomaly.
    let cells = alive_count as f64;
    let glucose_consumed = cells * params.glucose_uptake_mM_per_cell_hr * dt;
    let mut glucose = (prev.glucose_mM - glucose_consumed).max(0.0);
    glucose += (params.glucose_target_mM - glucose) * relax_fraction(params.glucose_replenish_per_hr, dt);

    let oxygen_consumed = cells * params.oxygen_uptake_pct_per_cell_hr * dt;
    let mut oxygen = (prev.oxygen_pct - oxygen_consumed).max(0.0);
    oxygen += (params.oxygen_target_pct - oxygen) * relax_fraction(params.oxygen_replenish_per_hr, dt);

    // Set-point tracking with seeded perturbation. Draw order is fixed
    // (pH first, then temperature) so the stream stays reproducible.
    let mut ph = prev.ph + (params.ph_set_point - prev.ph) * relax_fraction(params.ph_relax_per_hr, dt);
    ph += gaussian(&mut rng, params.ph_sigma);
    let mut temperature = prev.temperature_c
        + (params.temperature_set_point_c - prev.temperature_c)
            * relax_fraction(params.temperature_relax_per_hr, dt);
    temperature += gaussian(&mut rng, params.temperature_sigma);

    let glucose = warnings.clamp_low(step, "glucose_mM", glucose, 0.0);
    let oxygen = warnings.clamp(step, "oxygen_pct", oxygen, 0.0, 100.0);
    let ph = warnings.clamp(step, "ph", ph, 0.0, 14.0);
    let temperature = warnings.clamp(step, "temperature_c", temperature, 0.0, 60.0);

    EnvironmentState {
        glucose_mM: glucose,
        oxygen_pct: oxygen,
        ph,
        temperature_c: temperature,
    }
}

/// Multiplicative factor applied to the division probability, in [0, 1].
pub fn growth_factor(env: &EnvironmentState) -> f64 {
    saturation_factor(env.glucose_mM, GLUCOSE_STRESS_MM)
        * saturation_factor(env.oxygen_pct, OXYGEN_STRESS_PCT)
        * band_factor(env.ph, PH_HEALTHY_MIN, PH_HEALTHY_MAX, PH_FALLOFF)
        * band_factor(env.temperature_c, TEMP_HEALTHY_MIN_C, TEMP_HEALTHY_MAX_C, TEMP_FALLOFF_C)
}

/// Extra death rate (per hour) contributed by environmental stress; 0 in
/// the healthy band.
pub fn death_rate_boost(env: &EnvironmentState) -> f64 {
    GLUCOSE_DEATH_RATE * (1.0 - saturation_factor(env.glucose_mM, GLUCOSE_STRESS_MM))
        + OXYGEN_DEATH_RATE * (1.0 - saturation_factor(env.oxygen_pct, OXYGEN_STRESS_PCT))
        + PH_DEATH_RATE * (1.0 - band_factor(env.ph, PH_HEALTHY_MIN, PH_HEALTHY_MAX, PH_FALLOFF))
        + TEMP_DEATH_RATE
            * (1.0 - band_factor(env.temperature_c, TEMP_HEALTHY_MIN_C, TEMP_HEALTHY_MAX_C, TEMP_FALLOFF_C))
}

/// Fraction of the gap closed toward a target over `dt` at the given rate.
fn relax_fraction(rate_per_hr: f64, dt: f64) -> f64 {
    1.0 - (-rate_per_hr * dt).exp()
}

/// Linear falloff from 1 at `threshold` down to 0 at zero supply.
fn saturation_factor(value: f64, threshold: f64) -> f64 {
    if value >= threshold {
        1.0
    } else {
        (value / threshold).clamp(0.0, 1.0)
    }
}

/// 1 inside `[lo, hi]`, dropping linearly to 0 over `falloff` outside.
fn band_factor(value: f64, lo: f64, hi: f64, falloff: f64) -> f64 {
    let excursion = if value < lo {
        lo - value
    } else if value > hi {
        value - hi
    } else {
        return 1.0;
    };
    (1.0 - excursion / falloff).clamp(0.0, 1.0)
}

fn gaussian(rng: &mut StdRng, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    match Normal::new(0.0, sigma) {
        Ok(dist) => rng.sample(dist),
        Err(_) => 0.0,
    }
}
