use anyhow::Result;
use cellsim_engine::stats::{growth_curve, RunStats};
use cellsim_engine::{RunConfig, StepEngine};
use log::{error, info, warn};
use std::fs::File;
use std::io::Write;
use std::time::Instant;

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting cellsim engine (CPU parallel)...");

    // --- Load Configuration ---
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = RunConfig::load(&config_path)?;

    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Initialize and Run ---
    let mut engine = StepEngine::new(&config)?;
    let start_time = Instant::now();
    let summary = engine.run()?;
    info!(
        "Run finished in {:.3} s: {:?} after {} steps.",
        start_time.elapsed().as_secs_f64(),
        summary.state,
        summary.steps_completed
    );
    if summary.warning_count > 0 {
        warn!(
            "{} numeric-domain warnings were recorded; see the log above.",
            summary.warning_count
        );
    }

    // --- Report Terminal Statistics ---
    if let Some(stats) = RunStats::from_snapshots(engine.snapshots()) {
        match stats.doubling_time_hr {
            Some(doubling) => info!(
                "Terminal population: {} cells ({:.1}% viable), doubling time {:.1} h.",
                stats.terminal_total, stats.terminal_viability_pct, doubling
            ),
            None => info!(
                "Terminal population: {} cells ({:.1}% viable), not growing.",
                stats.terminal_total, stats.terminal_viability_pct
            ),
        }
    }

    // --- Save Recorded Snapshots ---
    if config.output.save_snapshots {
        let output_format = config.output.format.as_deref().unwrap_or("json");
        let snapshots = engine.snapshots();

        match output_format {
            "bincode" => {
                let filename = format!("{}_snapshots.bin", config.output.base_filename);
                match File::create(&filename) {
                    Ok(file) => match bincode::serialize_into(file, snapshots) {
                        Ok(()) => info!("All snapshots saved to {} (binary format)", filename),
                        Err(e) => error!("Error serializing snapshots to bincode: {}", e),
                    },
                    Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
                }
            }
            "messagepack" => {
                let filename = format!("{}_snapshots.msgpack", config.output.base_filename);
                match &mut File::create(&filename) {
                    Ok(file) => match rmp_serde::encode::write(file, snapshots) {
                        Ok(()) => info!("All snapshots saved to {} (MessagePack format)", filename),
                        Err(e) => error!("Error serializing snapshots to MessagePack: {}", e),
                    },
                    Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
                }
            }
            other => {
                if other != "json" {
                    error!("Unknown output format: {}. Using JSON instead.", other);
                }
                let filename = format!("{}_snapshots.json", config.output.base_filename);
                match File::create(&filename) {
                    Ok(mut file) => match serde_json::to_string(snapshots) {
                        Ok(json_string) => {
                            if let Err(e) = file.write_all(json_string.as_bytes()) {
                                error!("Error writing snapshot JSON to file '{}': {}", filename, e);
                            } else {
                                info!("All snapshots saved to {}", filename);
                            }
                        }
                        Err(e) => error!("Error serializing snapshots to JSON: {}", e),
                    },
                    Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
                }
            }
        }
    } else {
        info!("Skipping snapshot export as per config (save_snapshots is false).");
    }

    // --- Save Growth Curve ---
    if config.output.save_growth_curve {
        let filename = format!("{}_growth_curve.csv", config.output.base_filename);
        match csv::Writer::from_path(&filename) {
            Ok(mut writer) => {
                for row in growth_curve(engine.snapshots()) {
                    writer.serialize(row)?;
                }
                writer.flush()?;
                info!("Growth curve saved to {}", filename);
            }
            Err(e) => error!("Error saving CSV file '{}': {}", filename, e),
        }
    } else {
        info!("Skipping growth-curve export as per config.");
    }

    info!("Simulation complete.");
    Ok(())
}
