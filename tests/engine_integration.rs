use cellsim_engine::common::{
    ConfigError, EnvironmentSection, OutputSection, RunConfig, RunSection, TreatmentSection,
};
use cellsim_engine::dose_response::{fit_hill, run_dose_series};
use cellsim_engine::{RunState, StepEngine};

fn untreated_config(initial_population: i64, duration_hours: f64, dt_hours: f64) -> RunConfig {
    RunConfig {
        run: RunSection {
            cell_line: "hela".to_string(),
            initial_population,
            duration_hours,
            dt_hours,
            seed: 42,
            inheritance_jitter: 0.05,
        },
        environment: EnvironmentSection::default(),
        treatment: None,
        output: OutputSection::default(),
    }
}

fn cisplatin_config(dose_um: f64) -> RunConfig {
    let mut config = untreated_config(100, 72.0, 24.0);
    config.treatment = Some(TreatmentSection {
        drug: "cisplatin".to_string(),
        dose_uM: dose_um,
        start_hr: 0.0,
        redose_interval_hr: None,
    });
    config
}

#[test]
fn seeded_runs_are_deterministic() {
    let config = cisplatin_config(10.0);

    let mut engine_a = StepEngine::new(&config).expect("engine_a");
    let mut engine_b = StepEngine::new(&config).expect("engine_b");
    engine_a.run().expect("run_a");
    engine_b.run().expect("run_b");

    assert_eq!(engine_a.snapshots(), engine_b.snapshots());
    assert_eq!(engine_a.state(), RunState::Completed);
}

#[test]
fn determinism_is_independent_of_thread_count() {
    let config = cisplatin_config(10.0);
    let run_with = |threads: usize| {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .expect("thread pool");
        pool.install(|| {
            let mut engine = StepEngine::new(&config).expect("engine");
            engine.run().expect("run");
            engine.snapshots().to_vec()
        })
    };

    let single = run_with(1);
    let parallel = run_with(4);
    assert_eq!(single, parallel);
}

#[test]
fn population_accounting_holds_on_every_snapshot() {
    let mut config = untreated_config(100, 96.0, 6.0);
    config.treatment = Some(TreatmentSection {
        drug: "cisplatin".to_string(),
        dose_uM: 15.0,
        start_hr: 0.0,
        redose_interval_hr: Some(24.0),
    });

    let mut engine = StepEngine::new(&config).expect("engine");
    engine.run().expect("run");
    let snapshots = engine.snapshots();
    assert_eq!(snapshots.len(), 17, "initial snapshot plus 16 steps");

    for window in snapshots.windows(2) {
        assert!(
            window[1].total_cells >= window[0].total_cells,
            "totals never decrease: dead cells stay in the pool"
        );
    }
    for snapshot in snapshots {
        assert_eq!(
            snapshot.total_cells,
            snapshot.viable_cells + snapshot.dying_cells + snapshot.dead_cells
        );
        let viability = snapshot.viability_pct();
        assert!((0.0..=100.0).contains(&viability));
        assert!(snapshot.environment.glucose_mM >= 0.0);
        assert!((0.0..=100.0).contains(&snapshot.environment.oxygen_pct));
        assert!((0.0..=14.0).contains(&snapshot.environment.ph));
    }
}

#[test]
fn untreated_baseline_grows_geometrically() {
    let config = untreated_config(100, 72.0, 24.0);
    let mut engine = StepEngine::new(&config).expect("engine");
    let summary = engine.run().expect("run");
    assert_eq!(summary.state, RunState::Completed);

    let snapshots = engine.snapshots();
    assert_eq!(snapshots.len(), 4, "snapshots at 0, 24, 48 and 72 hours");
    assert_eq!(snapshots[0].total_cells, 100);
    assert_eq!(snapshots[0].viability_pct(), 100.0);

    for window in snapshots.windows(2) {
        let ratio = window[1].total_cells as f64 / window[0].total_cells as f64;
        assert!(
            (1.5..=2.2).contains(&ratio),
            "per-day growth ratio {} outside the expected band",
            ratio
        );
    }
    let terminal = snapshots.last().unwrap();
    assert!(
        (430..=900).contains(&terminal.total_cells),
        "terminal population {} outside the expected band",
        terminal.total_cells
    );
    assert!(terminal.viability_pct() > 90.0);
}

#[test]
fn treatment_lowers_viability_against_the_same_seed() {
    let mut control = StepEngine::new(&untreated_config(100, 72.0, 24.0)).expect("control");
    let mut treated = StepEngine::new(&cisplatin_config(10.0)).expect("treated");
    control.run().expect("control run");
    treated.run().expect("treated run");

    let control_terminal = control.snapshots().last().unwrap();
    let treated_terminal = treated.snapshots().last().unwrap();
    assert!(
        treated_terminal.viable_cells < control_terminal.viable_cells,
        "treated {} viable vs control {} viable",
        treated_terminal.viable_cells,
        control_terminal.viable_cells
    );
    assert!(treated_terminal.viability_pct() < control_terminal.viability_pct());
    assert!(treated.snapshots()[1].treatment_concentration_uM >= 0.0);
}

#[test]
fn invalid_config_is_rejected_before_any_step() {
    let config = untreated_config(-5, 72.0, 24.0);
    match StepEngine::new(&config) {
        Err(ConfigError::NonPositivePopulation(-5)) => {}
        other => panic!("expected NonPositivePopulation, got {:?}", other.err()),
    }

    let mut config = untreated_config(100, 72.0, 24.0);
    config.run.dt_hours = 0.0;
    assert!(matches!(
        StepEngine::new(&config),
        Err(ConfigError::InvalidDt(_))
    ));
}

#[test]
fn stop_signal_halts_at_the_next_step_boundary() {
    // Stop raised before the run starts: only the initial snapshot exists.
    let mut engine = StepEngine::new(&untreated_config(100, 72.0, 24.0)).expect("engine");
    engine.stop_handle().stop();
    let summary = engine.run().expect("run");
    assert_eq!(summary.state, RunState::Stopped);
    assert_eq!(engine.state(), RunState::Stopped);
    assert_eq!(engine.snapshots().len(), 1);
    assert_eq!(engine.snapshots()[0].step_index, 0);

    // Stop raised mid-run: the in-flight step completes, nothing partial.
    let mut engine = StepEngine::new(&untreated_config(100, 96.0, 24.0)).expect("engine");
    engine.step().expect("step 1");
    engine.step().expect("step 2");
    engine.stop_handle().stop();
    let summary = engine.run().expect("run");
    assert_eq!(summary.state, RunState::Stopped);
    assert_eq!(summary.steps_completed, 2);

    let last = engine.last_snapshot().expect("last snapshot");
    assert_eq!(last.step_index, 2);
    assert_eq!(
        last.total_cells,
        last.viable_cells + last.dying_cells + last.dead_cells,
        "the last snapshot is complete, never partial"
    );
}

#[test]
fn slow_subscribers_lose_oldest_snapshots_without_blocking_the_run() {
    let mut engine = StepEngine::new(&untreated_config(50, 96.0, 6.0)).expect("engine");
    let subscription = engine.subscribe(2);
    engine.run().expect("run");

    let received = subscription.drain();
    assert_eq!(received.len(), 2, "bounded queue keeps the newest snapshots");
    assert_eq!(received[1].step_index, 16);
    assert_eq!(received[0].step_index, 15);
}

#[test]
fn dose_series_is_monotonic_and_fits_a_hill_curve() {
    let base = untreated_config(200, 72.0, 24.0);
    let concentrations = [0.1, 1.0, 10.0, 100.0];
    let points = run_dose_series(&base, "cisplatin", &concentrations).expect("dose series");
    assert_eq!(points.len(), 4);

    for pair in points.windows(2) {
        assert!(
            pair[1].response >= pair[0].response - 0.08,
            "inhibition should not decrease with dose beyond sampling noise: {:?}",
            points
        );
    }
    assert!(
        points[3].response > points[0].response + 0.2,
        "the dosed span must resolve a real effect gradient: {:?}",
        points
    );

    let fit = fit_hill(&points).expect("hill fit");
    assert!(
        fit.ic50_uM > 1.0 && fit.ic50_uM < 1000.0,
        "ic50 {} outside the plausible span",
        fit.ic50_uM
    );
    assert!(fit.hill_slope > 0.0);
    assert!(fit.emax > 0.0 && fit.emax <= 1.5);
    assert!(fit.r_squared > 0.8, "r^2 = {}", fit.r_squared);
}
