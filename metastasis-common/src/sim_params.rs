use serde::{Deserialize, Serialize};

/// Model parameters derived from the configuration, fixed for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    // Lattice
    pub width: u32,
    pub height: u32,
    pub sites: usize,
    pub carrying_capacity: u32,

    // Reaction-diffusion
    pub tau: f64,
    pub diffusion_number: f64, // D * tau / h^2
    pub retention: f64,        // 1 - 4 * D * tau / h^2 - tau * lambda
    pub production: f64,       // theta
    pub gamma1: f64,
    pub gamma2: f64,

    // Initial tumor
    pub mesenchymal_proportion: f64,
    pub tumor_seed_points: u32,
    pub vessel_exclusion_points: u32,

    // Proliferation
    pub doubling_time_mesenchymal: u32,
    pub doubling_time_epithelial: u32,

    // Vessels
    pub ruptured_vessels_primary: u32,
    pub intact_vessels_primary: u32,
    pub secondary_site_vessels: Vec<u32>,

    // Vasculature transport
    pub extravasation_weights: Vec<f64>,
    pub disaggregation_prob: f64,
    pub single_cell_survival: f64,
    pub cluster_survival: f64,
    pub transit_steps: u64,
}
