use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, trace};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use metastasis_common::{FixedMovement, SimulationConfig};
use metastasis_engine::checkpoint::CONFIG_FILE;
use metastasis_engine::Simulation;

#[derive(Parser, Debug)]
#[command(author, version, about = "Lattice model of tumor growth and metastatic spread", long_about = None)]
struct Args {
    /// Configuration file. Defaults to config.toml, or to the saved one when resuming.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Checkpoint directory to resume from
    #[arg(short, long)]
    resume: Option<PathBuf>,

    /// Output directory, overriding output.directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Random seed, overriding initial_conditions.seed
    #[arg(long)]
    seed: Option<u64>,

    /// Steps to run, overriding timing.max_steps
    #[arg(long)]
    max_steps: Option<u64>,

    /// Fixed probability of moving left each step
    #[arg(long)]
    fixed_left: Option<f64>,

    #[arg(long)]
    fixed_right: Option<f64>,

    #[arg(long)]
    fixed_bottom: Option<f64>,

    #[arg(long)]
    fixed_top: Option<f64>,
}

impl Args {
    fn fixed_movement(&self) -> Option<FixedMovement> {
        if self.fixed_left.is_none()
            && self.fixed_right.is_none()
            && self.fixed_bottom.is_none()
            && self.fixed_top.is_none()
        {
            return None;
        }
        Some(FixedMovement {
            left: self.fixed_left.unwrap_or(0.0),
            right: self.fixed_right.unwrap_or(0.0),
            bottom: self.fixed_bottom.unwrap_or(0.0),
            top: self.fixed_top.unwrap_or(0.0),
        })
    }

    fn load_config(&self) -> Result<SimulationConfig> {
        let path = match (&self.config, &self.resume) {
            (Some(path), _) => path.clone(),
            (None, Some(checkpoint)) => checkpoint.join(CONFIG_FILE),
            (None, None) => PathBuf::from("config.toml"),
        };
        let mut config = SimulationConfig::load(&path)?;

        if let Some(output) = &self.output {
            config.output.directory = output.display().to_string();
        }
        if let Some(seed) = self.seed {
            config.initial_conditions.seed = Some(seed);
        }
        if let Some(max_steps) = self.max_steps {
            config.timing.max_steps = max_steps;
        }
        if let Some(fixed) = self.fixed_movement() {
            config.movement.fixed = Some(fixed);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    info!("Starting Metastasis Engine...");
    let config = args.load_config()?;
    info!("Using {} Rayon threads for the field sweep.", rayon::current_num_threads());

    let mut sim = match &args.resume {
        Some(checkpoint) => {
            info!("Resuming from {}...", checkpoint.display());
            Simulation::from_checkpoint(config, checkpoint)?
        }
        None => {
            info!("Initializing a fresh run...");
            Simulation::new(config)?
        }
    };
    debug!("Model Parameters: {:#?}", sim.params());

    let total_steps = sim.config().timing.max_steps;
    let first_step = sim.current_step();
    info!(
        "Running {} steps from step {}, checkpoint every {} steps, writing to {}.",
        total_steps,
        first_step,
        sim.config().timing.checkpoint_period,
        sim.output_dir().display()
    );

    let start_time = Instant::now();
    let mut previous_print_time = start_time;
    for step in 0..total_steps {
        let step_start_time = Instant::now();
        if let Err(e) = sim.step() {
            error!("Error during simulation step {}: {:#}", first_step + step + 1, e);
            anyhow::bail!("Simulation step failed.");
        }
        let step_duration = step_start_time.elapsed();

        let current_time = Instant::now();
        let print_interval_secs = 5.0;
        if current_time.duration_since(previous_print_time).as_secs_f64() >= print_interval_secs {
            info!(
                "Step [{}/{}] | Cells: {} {:?} | In transit: {} | Step Time: {:6.2} ms | Elapsed: {:.2} s",
                step + 1,
                total_steps,
                sim.total_cells(),
                sim.cells_per_site(),
                sim.vasculature_cells(),
                step_duration.as_secs_f64() * 1000.0,
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = current_time;
        } else {
            trace!(
                "Step [{}/{}] completed in {:.2} ms",
                step + 1,
                total_steps,
                step_duration.as_secs_f64() * 1000.0
            );
        }
    }

    let total_duration = start_time.elapsed();
    info!(
        "Simulation finished at step {} in {:.3} seconds ({:.3} minutes).",
        sim.current_step(),
        total_duration.as_secs_f64(),
        total_duration.as_secs_f64() / 60.0
    );
    info!("First populated per site: {:?}", sim.first_populated());

    // --- Save Recorded Data ---
    if sim.config().output.save_stats {
        save_snapshots(&sim)?;
    } else {
        info!("Skipping saving snapshots as per config (save_stats is false).");
    }

    info!("Simulation Complete.");
    Ok(())
}

fn save_snapshots(sim: &Simulation) -> Result<()> {
    let output = &sim.config().output;
    let output_format = output.format.as_deref().unwrap_or("json");
    let snapshots = sim.get_recorded_snapshots();
    let snapshot_path = |extension: &str| sim.output_dir().join(format!("{}_snapshots.{}", output.base_filename, extension));

    match output_format {
        "bincode" => {
            let filename = snapshot_path("bin");
            let file = File::create(&filename)
                .with_context(|| format!("Error creating snapshot file '{}'", filename.display()))?;
            bincode::serialize_into(file, snapshots).context("Error serializing snapshots to bincode")?;
            info!("{} snapshots saved to {} (binary format)", snapshots.len(), filename.display());
        }
        "messagepack" => {
            let filename = snapshot_path("msgpack");
            let mut file = File::create(&filename)
                .with_context(|| format!("Error creating snapshot file '{}'", filename.display()))?;
            rmp_serde::encode::write(&mut file, snapshots).context("Error serializing snapshots to MessagePack")?;
            info!("{} snapshots saved to {} (MessagePack format)", snapshots.len(), filename.display());
        }
        other => {
            if other != "json" {
                error!("Unknown output format: {}. Using JSON instead.", other);
            }
            let filename = snapshot_path("json");
            let json_string = serde_json::to_string(snapshots).context("Error serializing snapshots to JSON")?;
            let mut file = File::create(&filename)
                .with_context(|| format!("Error creating snapshot file '{}'", filename.display()))?;
            file.write_all(json_string.as_bytes())
                .with_context(|| format!("Error writing snapshot JSON to file '{}'", filename.display()))?;
            info!("{} snapshots saved to {}", snapshots.len(), filename.display());
        }
    }
    Ok(())
}
