//! Lattice-based agent model of primary tumor growth and metastatic spread.
//!
//! A primary site and any number of secondary sites share one vasculature. Cells
//! proliferate on their site, move under a pluggable [`movement::MovementPolicy`],
//! and arrive on secondary sites through the queued transport in [`vasculature`].
//! Each site carries a protease and an extracellular-matrix field advanced by
//! [`field::EnvironmentField`].

pub mod agent;
pub mod checkpoint;
pub mod clock;
pub mod error;
pub mod field;
pub mod geometry;
pub mod grid;
pub mod initializer;
pub mod movement;
pub mod simulation;
pub mod vasculature;

/// Random stream used by every stochastic step. Its position can be saved and restored.
pub type SimRng = rand_chacha::ChaCha8Rng;

pub use agent::{Agent, AgentId, CellAgent, Phenotype, VesselAgent};
pub use error::{ModelError, ModelResult};
pub use field::EnvironmentField;
pub use grid::{Coord, Direction, Grid};
pub use movement::{CellDecision, FixedDirections, LocalView, MovementPolicy, Stationary};
pub use simulation::Simulation;
pub use vasculature::{Cluster, VasculatureQueue};
