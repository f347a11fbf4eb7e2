//! The step engine: orchestrates environment, treatment, hazard sampling,
//! event application and snapshot emission for one run.

use crate::agents::{AgentPool, CellFate};
use crate::environment;
use crate::rng::{stream_rng, unit_f64};
use crate::stream::{SnapshotBus, SnapshotSubscription};
use crate::treatment::{clamp_probability, TreatmentModel};
use crate::warnings::WarningLog;
use cellsim_common::{ConfigError, EnvironmentState, RunConfig, SimParams, SimulationSnapshot};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while driving a run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),
    #[error("engine cannot step or run from the {0:?} state")]
    NotReady(RunState),
    #[error("invariant violated at step {step}: {reason}")]
    Fault { step: u64, reason: String },
}

/// Lifecycle of a run: `Ready -> Running -> {Completed, Stopped, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Ready,
    Running,
    Completed,
    Stopped,
    Failed,
}

/// Terminal report of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub state: RunState,
    pub steps_completed: u64,
    pub warning_count: usize,
}

/// Cooperative stop signal, polled by the engine at step boundaries only.
/// An in-flight step always completes before the stop is honored.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Drives one simulation run to completion, stop or failure.
///
/// The engine exclusively owns the environment and treatment transitions;
/// the agent pool's per-step buffers are mutated by the engine only.
pub struct StepEngine {
    params: SimParams,
    treatment: Option<TreatmentModel>,
    pool: AgentPool,
    environment: EnvironmentState,
    snapshots: Vec<SimulationSnapshot>,
    bus: SnapshotBus,
    stop_flag: Arc<AtomicBool>,
    warnings: WarningLog,
    state: RunState,
    steps_completed: u64,
}

impl StepEngine {
    /// Validates the configuration and prepares a run.
    ///
    /// All validation happens here; a rejected configuration never executes
    /// a step and never emits a snapshot.
    pub fn new(config: &RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let params = config.sim_params()?;
        let treatment = config.treatment_spec()?.map(TreatmentModel::new);
        let pool = AgentPool::seed(params.initial_population, params.line_params);
        let environment = config.initial_environment();
        info!(
            "prepared {} run: {} cells, {} steps of {} h (seed {})",
            params.cell_line, params.initial_population, params.total_steps, params.dt_hours, params.seed
        );
        Ok(Self {
            params,
            treatment,
            pool,
            environment,
            snapshots: Vec::new(),
            bus: SnapshotBus::default(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            warnings: WarningLog::default(),
            state: RunState::Ready,
            steps_completed: 0,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// The ordered, append-only snapshot log of this run.
    pub fn snapshots(&self) -> &[SimulationSnapshot] {
        &self.snapshots
    }

    pub fn last_snapshot(&self) -> Option<&SimulationSnapshot> {
        self.snapshots.last()
    }

    /// Domain warnings recorded so far (clamped out-of-range values).
    pub fn warnings(&self) -> &WarningLog {
        &self.warnings
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop_flag),
        }
    }

    /// Subscribes to the snapshot stream through a bounded queue with a
    /// drop-oldest overflow policy.
    pub fn subscribe(&mut self, capacity: usize) -> SnapshotSubscription {
        self.bus.subscribe(capacity)
    }

    /// Advances the simulation by one step of `dt` hours.
    pub fn step(&mut self) -> Result<(), EngineError> {
        match self.state {
            RunState::Ready | RunState::Running => {}
            other => return Err(EngineError::NotReady(other)),
        }
        self.ensure_initial_snapshot();

        let step = self.steps_completed + 1;
        let dt = self.params.dt_hours;
        let t0 = self.steps_completed as f64 * dt;
        let t1 = step as f64 * dt;
        let before = self.pool.counts();

        // --- 1. Environment update (uses the current alive count) ---
        self.environment =
            environment::advance(&self.environment, &self.params, before.viable, step, &mut self.warnings);

        // --- 2. Treatment evaluated at the new elapsed time ---
        let (concentration_now, mean_concentration) = match &self.treatment {
            Some(model) => (model.concentration_at(t1), model.mean_concentration(t0, t1)),
            None => (0.0, 0.0),
        };
        let mean_concentration =
            self.warnings
                .clamp_low(step, "treatment_concentration_uM", mean_concentration, 0.0);
        let effect = self
            .treatment
            .as_ref()
            .map_or(0.0, |model| model.effect(mean_concentration));
        let growth_factor = environment::growth_factor(&self.environment);
        let death_boost = environment::death_rate_boost(&self.environment);
        if !(growth_factor.is_finite() && death_boost.is_finite() && effect.is_finite()) {
            self.state = RunState::Failed;
            return Err(EngineError::Fault {
                step,
                reason: "non-finite hazard modifier".to_string(),
            });
        }

        // --- 3. Hazard sampling (parallel, order-independent by keyed RNG) ---
        let seed = self.params.seed;
        self.pool.mark_fates(|agent| {
            let mut rng = stream_rng(seed, step, agent.id);
            // Fixed draw order per agent: death first, then division.
            let death_draw = unit_f64(&mut rng);
            let division_draw = unit_f64(&mut rng);

            let death_rate = agent.params.death_rate_per_hr + death_boost;
            let p_death = clamp_probability((1.0 - (-death_rate * dt).exp()) + effect);
            if death_draw < p_death {
                // Death takes priority: an agent that dies this step cannot
                // also divide.
                return CellFate::Dies;
            }
            let cycle_ready = agent.cycle_progress_hr + dt >= agent.params.phase_duration_hr;
            let p_divide = clamp_probability(
                (1.0 - (-agent.params.division_rate_per_hr * dt).exp()) * growth_factor - effect,
            );
            if cycle_ready && division_draw < p_divide {
                CellFate::Divides
            } else {
                CellFate::Unchanged
            }
        });

        // --- 4. Apply all sampled transitions atomically at end of step ---
        let delta = self
            .pool
            .apply_fates(seed, step, dt, mean_concentration, self.params.inherit_jitter_frac);
        let after = self.pool.counts();
        if after.total != before.total + delta.divisions
            || after.viable + delta.deaths != before.viable + delta.divisions
        {
            self.state = RunState::Failed;
            return Err(EngineError::Fault {
                step,
                reason: format!(
                    "population conservation violated: total {} -> {}, viable {} -> {}, {} deaths, {} divisions",
                    before.total, after.total, before.viable, after.viable, delta.deaths, delta.divisions
                ),
            });
        }

        // --- 5. Snapshot emission ---
        self.record_snapshot(step, t1, concentration_now);
        self.steps_completed = step;
        debug!(
            "step {} | t = {:.1} h | total {} viable {} | {} deaths {} divisions",
            step, t1, after.total, after.viable, delta.deaths, delta.divisions
        );
        Ok(())
    }

    /// Runs until the configured duration, a stop signal, or a fault.
    ///
    /// The stop flag is polled only at step boundaries; on stop the last
    /// complete snapshot is preserved and the state is `Stopped`.
    pub fn run(&mut self) -> Result<RunSummary, EngineError> {
        match self.state {
            RunState::Ready => {}
            other => return Err(EngineError::NotReady(other)),
        }
        self.state = RunState::Running;
        self.ensure_initial_snapshot();
        info!(
            "running {} steps ({} h at dt = {} h)",
            self.params.total_steps,
            self.params.duration_hours,
            self.params.dt_hours
        );

        while self.steps_completed < self.params.total_steps {
            if self.stop_flag.load(Ordering::Relaxed) {
                info!("stop signal honored at step boundary {}", self.steps_completed);
                self.state = RunState::Stopped;
                return Ok(self.summary());
            }
            self.step()?;
        }
        self.state = RunState::Completed;
        info!(
            "run completed: {} steps, {} cells total, {} domain warnings",
            self.steps_completed,
            self.last_snapshot().map_or(0, |s| s.total_cells),
            self.warnings.len()
        );
        Ok(self.summary())
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            state: self.state,
            steps_completed: self.steps_completed,
            warning_count: self.warnings.len(),
        }
    }

    /// Records the t = 0 snapshot exactly once, before the first step.
    fn ensure_initial_snapshot(&mut self) {
        if self.steps_completed == 0 && self.snapshots.is_empty() {
            let c0 = self
                .treatment
                .as_ref()
                .map_or(0.0, |model| model.concentration_at(0.0));
            self.record_snapshot(0, 0.0, c0);
        }
    }

    fn record_snapshot(&mut self, step_index: u64, elapsed_hours: f64, concentration: f64) {
        let counts = self.pool.counts();
        let snapshot = SimulationSnapshot {
            step_index,
            elapsed_hours,
            total_cells: counts.total,
            viable_cells: counts.viable,
            dying_cells: counts.dying,
            dead_cells: counts.dead,
            environment: self.environment.clone(),
            treatment_concentration_uM: concentration,
        };
        self.bus.publish(&snapshot);
        self.snapshots.push(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsim_common::{EnvironmentSection, OutputSection, RunSection};

    fn config() -> RunConfig {
        RunConfig {
            run: RunSection {
                cell_line: "hela".to_string(),
                initial_population: 50,
                duration_hours: 48.0,
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
    fn manual_stepping_matches_run(){
        let mut stepped = StepEngine::new(&config()).unwrap();
        stepped.step().unwrap();
        stepped.step().unwrap();

        let mut driven = StepEngine::new(&config()).unwrap();
        driven.run().unwrap();
        assert_eq!(stepped.snapshots(), driven.snapshots());
    }

    #[test]
    fn step_is_rejected_after_completion() {
        let mut engine = StepEngine::new(&config()).unwrap();
        engine.run().unwrap();
        assert_eq!(engine.state(), RunState::Completed);
        assert!(matches!(engine.step(), Err(EngineError::NotReady(RunState::Completed))));
        assert!(matches!(engine.run(), Err(EngineError::NotReady(RunState::Completed))));
    }

    #[test]
    fn initial_snapshot_is_emitted_exactly_once() {
        let mut engine = StepEngine::new(&config()).unwrap();
        engine.run().unwrap();
        let snapshots = engine.snapshots();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].step_index, 0);
        assert_eq!(snapshots[0].total_cells, 50);
        assert_eq!(snapshots[0].elapsed_hours, 0.0);
    }

    #[test]
    fn subscription_sees_the_full_stream() {
        let mut engine = StepEngine::new(&config()).unwrap();
        let subscription = engine.subscribe(16);
        engine.run().unwrap();
        let streamed = subscription.drain();
        assert_eq!(streamed.as_slice(), engine.snapshots());
    }
}
