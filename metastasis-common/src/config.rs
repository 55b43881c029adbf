use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::ModelParams;
use std::path::Path;

// Lattice dimensions shared by every site, and the per-coordinate capacity
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LatticeConfig {
    pub width: u32,
    pub height: u32,
    /// Number of sites, primary included.
    pub sites: usize,
    pub carrying_capacity: u32,
}

// Configuration for run length and checkpoint cadence
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub max_steps: u64,
    pub checkpoint_period: u64,
}

// Initial tumor seeding on the primary site
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InitialConditions {
    pub initial_cells: u32,
    pub mesenchymal_proportion: f64,
    /// Approximate number of lattice points in the initial tumor disk.
    pub tumor_seed_points: u32,
    /// Approximate number of lattice points in the disk where no vessel may be placed.
    pub vessel_exclusion_points: u32,
    /// Fixed seed for the whole run. A random one is drawn when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

// Reaction-diffusion constants for the protease / matrix pair
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EnvironmentConfig {
    /// Protease diffusion coefficient (D).
    pub diffusion: f64,
    /// Time scale (tau).
    pub tau: f64,
    /// Space scale (h).
    pub h: f64,
    /// Protease decay rate (lambda).
    pub decay: f64,
    /// Protease production per mesenchymal cell (theta).
    pub production: f64,
    /// Matrix degradation by mesenchymal cells.
    pub gamma1: f64,
    /// Matrix degradation by protease.
    pub gamma2: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ProliferationConfig {
    pub doubling_time_mesenchymal: u32,
    pub doubling_time_epithelial: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct VesselConfig {
    pub ruptured_primary: u32,
    pub intact_primary: u32,
    /// Vessel count for each secondary site, in site order.
    pub secondary: Vec<u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct VasculatureConfig {
    /// Relative weight of each secondary site as an extravasation destination.
    pub extravasation_weights: Vec<f64>,
    /// Probability that a cell stays attached to its cluster while in transit.
    pub disaggregation_prob: f64,
    pub single_cell_survival: f64,
    pub cluster_survival: f64,
    /// Steps an intravasated cell spends in transit.
    #[serde(default = "default_transit_steps")]
    pub transit_steps: u64,
}

/// Fixed directional weights. Whatever mass is left below 1.0 is the chance to stay.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct FixedMovement {
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
    pub top: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct MovementConfig {
    #[serde(default)]
    pub fixed: Option<FixedMovement>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub directory: String,
    pub base_filename: String,
    pub save_stats: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

fn default_transit_steps() -> u64 {
    180
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub lattice: LatticeConfig,
    pub timing: TimingConfig,
    pub initial_conditions: InitialConditions,
    pub environment: EnvironmentConfig,
    pub proliferation: ProliferationConfig,
    pub vessels: VesselConfig,
    pub vasculature: VasculatureConfig,
    #[serde(default)]
    pub movement: MovementConfig,
    pub output: OutputConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            lattice: LatticeConfig {
                width: 201,
                height: 201,
                sites: 3,
                carrying_capacity: 4,
            },
            timing: TimingConfig {
                max_steps: 1000,
                checkpoint_period: 100,
            },
            initial_conditions: InitialConditions {
                initial_cells: 388,
                mesenchymal_proportion: 0.6,
                tumor_seed_points: 97,
                vessel_exclusion_points: 200,
                seed: None,
            },
            environment: EnvironmentConfig {
                diffusion: 1e-4,
                tau: 1e-3,
                h: 5e-3,
                decay: 1.0,
                production: 0.195,
                gamma1: 1.0,
                gamma2: 1.0,
            },
            proliferation: ProliferationConfig {
                doubling_time_mesenchymal: 2000,
                doubling_time_epithelial: 3000,
            },
            vessels: VesselConfig {
                ruptured_primary: 8,
                intact_primary: 2,
                secondary: vec![10, 10],
            },
            vasculature: VasculatureConfig {
                extravasation_weights: vec![0.75, 0.25],
                disaggregation_prob: 0.5,
                single_cell_survival: 5e-4,
                cluster_survival: 2.5e-2,
                transit_steps: default_transit_steps(),
            },
            movement: MovementConfig::default(),
            output: OutputConfig {
                directory: "Simulations/run".to_string(),
                base_filename: "metastasis".to_string(),
                save_stats: true,
                format: Some("json".to_string()),
            },
        }
    }
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config: SimulationConfig = toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as TOML, so a checkpoint directory can be resumed later.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
        std::fs::write(path_ref, config_str)
            .map_err(|e| anyhow::anyhow!("Failed to write config file '{}': {}", path_ref.display(), e))?;
        Ok(())
    }

    /// Rejects parameter sets the model cannot run with.
    pub fn validate(&self) -> Result<()> {
        let lattice = &self.lattice;
        if lattice.width < 2 || lattice.height < 2 {
            anyhow::bail!("lattice width and height must both be at least 2.");
        }
        if lattice.sites == 0 {
            anyhow::bail!("at least one site (the primary) is required.");
        }
        if lattice.carrying_capacity == 0 {
            anyhow::bail!("carrying_capacity must be greater than 0.");
        }
        if self.timing.checkpoint_period == 0 {
            anyhow::bail!("checkpoint_period must be greater than 0.");
        }

        let probabilities = [
            ("mesenchymal_proportion", self.initial_conditions.mesenchymal_proportion),
            ("disaggregation_prob", self.vasculature.disaggregation_prob),
            ("single_cell_survival", self.vasculature.single_cell_survival),
            ("cluster_survival", self.vasculature.cluster_survival),
        ];
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must lie in [0, 1], got {}.", name, value);
            }
        }

        if self.proliferation.doubling_time_mesenchymal == 0 || self.proliferation.doubling_time_epithelial == 0 {
            anyhow::bail!("doubling times must be at least 1 step.");
        }
        if self.environment.h <= 0.0 {
            anyhow::bail!("space scale h must be positive.");
        }
        if self.vasculature.transit_steps == 0 {
            anyhow::bail!("transit_steps must be at least 1.");
        }

        let secondary_sites = lattice.sites - 1;
        if self.vessels.secondary.len() < secondary_sites {
            anyhow::bail!(
                "vessels.secondary lists {} sites but {} secondary sites are configured.",
                self.vessels.secondary.len(),
                secondary_sites
            );
        }
        if self.vasculature.extravasation_weights.len() < secondary_sites {
            anyhow::bail!(
                "vasculature.extravasation_weights lists {} sites but {} secondary sites are configured.",
                self.vasculature.extravasation_weights.len(),
                secondary_sites
            );
        }
        let weights = &self.vasculature.extravasation_weights[..secondary_sites];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            anyhow::bail!("extravasation weights must be finite and non-negative.");
        }
        if secondary_sites > 0 && weights.iter().sum::<f64>() <= 0.0 {
            anyhow::bail!("at least one secondary site needs a positive extravasation weight.");
        }
        for (offset, (weight, vessels)) in weights.iter().zip(&self.vessels.secondary).enumerate() {
            if *weight > 0.0 && *vessels == 0 {
                anyhow::bail!("site {} can receive cells but has no vessels.", offset + 1);
            }
        }

        if let Some(fixed) = self.movement.fixed {
            let all = [fixed.left, fixed.right, fixed.bottom, fixed.top];
            if all.iter().any(|p| !(0.0..=1.0).contains(p)) || all.iter().sum::<f64>() > 1.0 + 1e-9 {
                anyhow::bail!("fixed movement probabilities must be in [0, 1] and sum to at most 1.");
            }
        }
        Ok(())
    }

    /// Converts the configuration into the immutable parameters used at runtime.
    pub fn get_model_params(&self) -> ModelParams {
        let env = &self.environment;
        let secondary_sites = self.lattice.sites.saturating_sub(1);

        // Explicit-scheme coefficients
        let diffusion_number = env.diffusion * env.tau / (env.h * env.h);
        let retention = 1.0 - 4.0 * diffusion_number - env.tau * env.decay;

        ModelParams {
            width: self.lattice.width,
            height: self.lattice.height,
            sites: self.lattice.sites,
            carrying_capacity: self.lattice.carrying_capacity,
            tau: env.tau,
            diffusion_number,
            retention,
            production: env.production,
            gamma1: env.gamma1,
            gamma2: env.gamma2,
            mesenchymal_proportion: self.initial_conditions.mesenchymal_proportion,
            tumor_seed_points: self.initial_conditions.tumor_seed_points,
            vessel_exclusion_points: self.initial_conditions.vessel_exclusion_points,
            doubling_time_mesenchymal: self.proliferation.doubling_time_mesenchymal,
            doubling_time_epithelial: self.proliferation.doubling_time_epithelial,
            ruptured_vessels_primary: self.vessels.ruptured_primary,
            intact_vessels_primary: self.vessels.intact_primary,
            secondary_site_vessels: self.vessels.secondary.iter().copied().take(secondary_sites).collect(),
            extravasation_weights: self
                .vasculature
                .extravasation_weights
                .iter()
                .copied()
                .take(secondary_sites)
                .collect(),
            disaggregation_prob: self.vasculature.disaggregation_prob,
            single_cell_survival: self.vasculature.single_cell_survival,
            cluster_survival: self.vasculature.cluster_survival,
            transit_steps: self.vasculature.transit_steps,
        }
    }
}
