use std::fmt;
use std::str::FromStr;

use crate::error::{ModelError, ModelResult};
use crate::field::EnvironmentField;
use crate::grid::{Coord, Grid, OccupantKind};
use crate::movement::{CellDecision, LocalView, MovementPolicy};
use crate::SimRng;

pub type AgentId = u64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phenotype {
    Mesenchymal,
    Epithelial,
}

impl Phenotype {
    pub const ALL: [Phenotype; 2] = [Phenotype::Mesenchymal, Phenotype::Epithelial];

    pub fn as_str(self) -> &'static str {
        match self {
            Phenotype::Mesenchymal => "mesenchymal",
            Phenotype::Epithelial => "epithelial",
        }
    }
}

impl fmt::Display for Phenotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phenotype {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mesenchymal" => Ok(Phenotype::Mesenchymal),
            "epithelial" => Ok(Phenotype::Epithelial),
            other => Err(ModelError::UnknownPhenotype(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellAgent {
    pub id: AgentId,
    pub phenotype: Phenotype,
    pub pos: Coord,
    pub site: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VesselAgent {
    pub id: AgentId,
    pub ruptured: bool,
    pub pos: Coord,
    pub site: usize,
}

/// Everything the scheduler activates.
#[derive(Clone, Debug, PartialEq)]
pub enum Agent {
    Cell(CellAgent),
    Vessel(VesselAgent),
}

/// What happened to an agent during its activation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Activation {
    Stayed,
    Moved,
    /// The cell left its grid and must be queued as a singleton cluster.
    Intravasated,
}

/// Mutable world the activating agent may touch.
pub struct ActivationContext<'a> {
    pub grids: &'a mut [Grid],
    pub fields: &'a [EnvironmentField],
    pub policy: &'a mut dyn MovementPolicy,
    pub rng: &'a mut SimRng,
    pub carrying_capacity: u32,
}

impl Agent {
    pub fn id(&self) -> AgentId {
        match self {
            Agent::Cell(cell) => cell.id,
            Agent::Vessel(vessel) => vessel.id,
        }
    }

    pub fn site(&self) -> usize {
        match self {
            Agent::Cell(cell) => cell.site,
            Agent::Vessel(vessel) => vessel.site,
        }
    }

    pub fn pos(&self) -> Coord {
        match self {
            Agent::Cell(cell) => cell.pos,
            Agent::Vessel(vessel) => vessel.pos,
        }
    }

    pub fn as_cell(&self) -> Option<&CellAgent> {
        match self {
            Agent::Cell(cell) => Some(cell),
            Agent::Vessel(_) => None,
        }
    }

    pub fn activate(&mut self, ctx: &mut ActivationContext<'_>) -> ModelResult<Activation> {
        match self {
            Agent::Cell(cell) => cell.activate(ctx),
            Agent::Vessel(vessel) => Ok(vessel.activate()),
        }
    }
}

impl VesselAgent {
    pub fn activate(&self) -> Activation {
        Activation::Stayed
    }
}

impl CellAgent {
    pub fn new(id: AgentId, phenotype: Phenotype, pos: Coord, site: usize) -> Self {
        Self { id, phenotype, pos, site }
    }

    pub fn occupant_kind(&self) -> OccupantKind {
        OccupantKind::Cell(self.phenotype)
    }

    /// Asks the policy for a decision and applies it to the grid.
    ///
    /// A policy that targets an out-of-bounds or full coordinate breaks its contract
    /// and aborts the run.
    pub fn activate(&mut self, ctx: &mut ActivationContext<'_>) -> ModelResult<Activation> {
        let decision = {
            let view = LocalView::new(
                self,
                &ctx.grids[self.site],
                &ctx.fields[self.site],
                ctx.carrying_capacity,
            );
            ctx.policy.decide(&view, ctx.rng)
        };

        let grid = &mut ctx.grids[self.site];
        match decision {
            CellDecision::Stay => Ok(Activation::Stayed),
            CellDecision::Move(dir) => {
                let (dx, dy) = dir.offset();
                let target = grid.checked_coord(self.pos.x as i64 + dx, self.pos.y as i64 + dy)?;
                if !grid.has_room(target, ctx.carrying_capacity) {
                    return Err(ModelError::CapacityViolation { id: self.id, site: self.site, target });
                }
                grid.move_occupant(self.id, self.occupant_kind(), self.pos, target)?;
                self.pos = target;
                Ok(Activation::Moved)
            }
            CellDecision::Intravasate => {
                grid.remove(self.id, self.pos)?;
                Ok(Activation::Intravasated)
            }
        }
    }
}
