pub mod config;
pub mod sim_params;
pub mod snapshot;

// Re-export key types for easier use by dependent crates
pub use config::{
    EnvironmentConfig, FixedMovement, InitialConditions, LatticeConfig, MovementConfig, OutputConfig,
    ProliferationConfig, SimulationConfig, TimingConfig, VasculatureConfig, VesselConfig,
};
pub use sim_params::ModelParams;
pub use snapshot::Snapshot;
