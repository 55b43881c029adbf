use std::path::PathBuf;
use thiserror::Error;

use crate::grid::Coord;

/// Fatal model errors. Any of these means the state can no longer be trusted.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("cluster has a negative count: mesenchymal {mesenchymal}, epithelial {epithelial}")]
    NegativeClusterCount { mesenchymal: i64, epithelial: i64 },

    #[error("cluster has no cells")]
    EmptyCluster,

    #[error("unknown phenotype '{0}'")]
    UnknownPhenotype(String),

    #[error("unknown agent type '{0}'")]
    UnknownAgentType(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("site {site} was chosen as a destination but has no vessels")]
    NoVessels { site: usize },

    #[error("position ({x}, {y}) is outside the {width}x{height} lattice of site {site}")]
    OutOfBounds { site: usize, x: i64, y: i64, width: u32, height: u32 },

    #[error("cell {id} asked to move to {target:?} on site {site}, which is full")]
    CapacityViolation { id: u64, site: usize, target: Coord },

    #[error("agent {id} is not registered at {pos:?} on site {site}")]
    MissingOccupant { id: u64, site: usize, pos: Coord },

    #[error("cluster counts mesenchymal {mesenchymal}, epithelial {epithelial} exceed the representable size")]
    ClusterTooLarge { mesenchymal: i64, epithelial: i64 },

    #[error("no eligible point left to seed the initial tumor after {placed} cells")]
    SeedAreaExhausted { placed: u32 },

    #[error("site {site} has {available} free points but {requested} vessels were requested")]
    VesselAreaExhausted { site: usize, available: usize, requested: u32 },

    #[error("checkpoint artifact {0} is missing")]
    MissingArtifact(PathBuf),

    #[error("checkpoint artifact {path} is malformed: {reason}")]
    MalformedArtifact { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ModelError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ModelError::Io { path: path.into(), source }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ModelError::MalformedArtifact { path: path.into(), reason: reason.to_string() }
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
