//! Pharmacokinetics and pharmacodynamics of the configured regimen.
//!
//! PK is single-compartment first-order decay of one or more bolus doses;
//! PD maps concentration to a probability shift through the Hill equation.

use cellsim_common::{Drug, TreatmentSpec};

const ZERO_RATE_EPSILON: f64 = 1e-12;

/// Evaluates drug concentration over time and converts it into a hazard
/// modifier. Concentration is recomputed from the regimen, never mutated in
/// place.
#[derive(Debug, Clone)]
pub struct TreatmentModel {
    spec: TreatmentSpec,
    // ec50^n, cached at construction
    ec50_pow_n: f64,
}

impl TreatmentModel {
    pub fn new(spec: TreatmentSpec) -> Self {
        let ec50_pow_n = spec.params.ec50_uM.powf(spec.params.hill_coefficient);
        Self { spec, ec50_pow_n }
    }

    pub fn drug(&self) -> Drug {
        self.spec.drug
    }

    pub fn spec(&self) -> &TreatmentSpec {
        &self.spec
    }

    /// Instantaneous concentration (uM) at `t_hr`.
    ///
    /// Sum of first-order decays of every dose administered at or before
    /// `t_hr`: `dose * exp(-k * (t - t_i))`.
    pub fn concentration_at(&self, t_hr: f64) -> f64 {
        let k = self.spec.params.elimination_rate_per_hr;
        let mut total = 0.0;
        self.each_dose_time(t_hr, |dose_time| {
            total += self.spec.dose_uM * (-k * (t_hr - dose_time)).exp();
        });
        total
    }

    /// Mean concentration (uM) over the interval `[t0, t1]`.
    ///
    /// The hazard modifier is driven by exposure over the whole step rather
    /// than the end-of-step sample; with coarse step sizes and fast
    /// elimination an endpoint sample would miss nearly all exposure.
    pub fn mean_concentration(&self, t0: f64, t1: f64) -> f64 {
        if t1 <= t0 {
            return self.concentration_at(t1);
        }
        let k = self.spec.params.elimination_rate_per_hr;
        let dose = self.spec.dose_uM;
        let mut integral = 0.0;
        self.each_dose_time(t1, |dose_time| {
            let from = t0.max(dose_time);
            if k.abs() < ZERO_RATE_EPSILON {
                integral += dose * (t1 - from);
            } else {
                integral += dose / k * ((-k * (from - dose_time)).exp() - (-k * (t1 - dose_time)).exp());
            }
        });
        integral / (t1 - t0)
    }

    /// Hill-equation effect of concentration `c`, in [0, emax].
    pub fn effect(&self, concentration: f64) -> f64 {
        if concentration <= 0.0 {
            return 0.0;
        }
        let c_pow_n = concentration.powf(self.spec.params.hill_coefficient);
        self.spec.params.emax * c_pow_n / (self.ec50_pow_n + c_pow_n)
    }

    fn each_dose_time(&self, until: f64, mut f: impl FnMut(f64)) {
        let start = self.spec.start_hr;
        if until < start {
            return;
        }
        match self.spec.redose_interval_hr {
            None => f(start),
            Some(interval) => {
                // interval > 0 is enforced by config validation
                let mut dose_time = start;
                while dose_time <= until {
                    f(dose_time);
                    dose_time += interval;
                }
            }
        }
    }
}

/// Clamps a modified probability into [0, 1]; NaN collapses to 0.
pub fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}
