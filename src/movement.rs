//! Pluggable per-cell decision making.
//!
//! The scheduler only relies on the contract: a policy returns `Stay`, a move to an
//! axis neighbor that is in bounds and below capacity, or a request to intravasate.
//! `LocalView` exposes exactly what a policy may look at.

use rand::Rng;

use metastasis_common::FixedMovement;

use crate::agent::{AgentId, CellAgent, Phenotype};
use crate::field::EnvironmentField;
use crate::grid::{Coord, Direction, Grid};
use crate::SimRng;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CellDecision {
    Stay,
    Move(Direction),
    /// Leave the site through the vasculature. The configured transit time applies.
    Intravasate,
}

/// Read-only surroundings of one cell.
pub struct LocalView<'a> {
    cell: &'a CellAgent,
    grid: &'a Grid,
    field: &'a EnvironmentField,
    carrying_capacity: u32,
}

impl<'a> LocalView<'a> {
    pub fn new(cell: &'a CellAgent, grid: &'a Grid, field: &'a EnvironmentField, carrying_capacity: u32) -> Self {
        Self { cell, grid, field, carrying_capacity }
    }

    pub fn id(&self) -> AgentId {
        self.cell.id
    }

    pub fn pos(&self) -> Coord {
        self.cell.pos
    }

    pub fn phenotype(&self) -> Phenotype {
        self.cell.phenotype
    }

    pub fn site(&self) -> usize {
        self.cell.site
    }

    pub fn neighbor(&self, dir: Direction) -> Option<Coord> {
        self.grid.neighbor(self.cell.pos, dir)
    }

    /// True when moving in `dir` stays in bounds and respects the carrying capacity.
    pub fn can_move(&self, dir: Direction) -> bool {
        self.neighbor(dir)
            .map(|target| self.grid.has_room(target, self.carrying_capacity))
            .unwrap_or(false)
    }

    pub fn protease(&self, pos: Coord) -> f64 {
        self.field.protease(pos)
    }

    pub fn matrix(&self, pos: Coord) -> f64 {
        self.field.matrix(pos)
    }

    pub fn cells_at(&self, pos: Coord) -> u32 {
        self.grid.cell_count(pos)
    }
}

pub trait MovementPolicy {
    fn decide(&mut self, view: &LocalView<'_>, rng: &mut SimRng) -> CellDecision;
}

/// Never moves. Used when no motility model is plugged in.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stationary;

impl MovementPolicy for Stationary {
    fn decide(&mut self, _view: &LocalView<'_>, _rng: &mut SimRng) -> CellDecision {
        CellDecision::Stay
    }
}

/// Draws a direction from fixed weights; the remaining mass is the chance to stay.
/// A drawn direction that is blocked turns into `Stay`.
#[derive(Debug, Clone, Copy)]
pub struct FixedDirections {
    weights: [(Direction, f64); 4],
}

impl FixedDirections {
    pub fn new(fixed: FixedMovement) -> Self {
        Self {
            weights: [
                (Direction::Left, fixed.left),
                (Direction::Right, fixed.right),
                (Direction::Bottom, fixed.bottom),
                (Direction::Top, fixed.top),
            ],
        }
    }
}

impl MovementPolicy for FixedDirections {
    fn decide(&mut self, view: &LocalView<'_>, rng: &mut SimRng) -> CellDecision {
        let draw: f64 = rng.random();
        let mut cumulative = 0.0;
        for (dir, weight) in self.weights {
            cumulative += weight;
            if draw < cumulative {
                return if view.can_move(dir) { CellDecision::Move(dir) } else { CellDecision::Stay };
            }
        }
        CellDecision::Stay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::OccupantKind;
    use rand::SeedableRng;

    fn only(dir: Direction) -> FixedMovement {
        let mut fixed = FixedMovement { left: 0.0, right: 0.0, bottom: 0.0, top: 0.0 };
        match dir {
            Direction::Left => fixed.left = 1.0,
            Direction::Right => fixed.right = 1.0,
            Direction::Bottom => fixed.bottom = 1.0,
            Direction::Top => fixed.top = 1.0,
        }
        fixed
    }

    #[test]
    fn certain_direction_is_always_taken() {
        let grid = Grid::new(0, 10, 10);
        let field = EnvironmentField::new(10, 10);
        let cell = CellAgent::new(0, Phenotype::Mesenchymal, Coord::new(5, 5), 0);
        let view = LocalView::new(&cell, &grid, &field, 4);
        let mut rng = SimRng::seed_from_u64(9);
        for dir in Direction::ALL {
            let mut policy = FixedDirections::new(only(dir));
            for _ in 0..20 {
                assert_eq!(policy.decide(&view, &mut rng), CellDecision::Move(dir));
            }
        }
    }

    #[test]
    fn blocked_direction_becomes_stay() {
        let mut grid = Grid::new(0, 10, 10);
        grid.place(1, OccupantKind::Cell(Phenotype::Epithelial), Coord::new(6, 5));
        let field = EnvironmentField::new(10, 10);
        let edge = CellAgent::new(0, Phenotype::Mesenchymal, Coord::new(0, 5), 0);
        let crowded = CellAgent::new(2, Phenotype::Mesenchymal, Coord::new(5, 5), 0);
        let mut rng = SimRng::seed_from_u64(9);

        let mut left = FixedDirections::new(only(Direction::Left));
        assert_eq!(left.decide(&LocalView::new(&edge, &grid, &field, 1), &mut rng), CellDecision::Stay);

        let mut right = FixedDirections::new(only(Direction::Right));
        assert_eq!(right.decide(&LocalView::new(&crowded, &grid, &field, 1), &mut rng), CellDecision::Stay);
        assert_eq!(
            right.decide(&LocalView::new(&crowded, &grid, &field, 2), &mut rng),
            CellDecision::Move(Direction::Right)
        );
    }

    #[test]
    fn zero_weights_always_stay() {
        let grid = Grid::new(0, 3, 3);
        let field = EnvironmentField::new(3, 3);
        let cell = CellAgent::new(0, Phenotype::Epithelial, Coord::new(1, 1), 0);
        let view = LocalView::new(&cell, &grid, &field, 4);
        let mut rng = SimRng::seed_from_u64(3);
        let mut policy = FixedDirections::new(FixedMovement { left: 0.0, right: 0.0, bottom: 0.0, top: 0.0 });
        assert!((0..50).all(|_| policy.decide(&view, &mut rng) == CellDecision::Stay));
        assert_eq!(Stationary.decide(&view, &mut rng), CellDecision::Stay);
    }
}
