use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, Phenotype};
use crate::error::{ModelError, ModelResult};

/// A lattice coordinate. `x` runs left to right, `y` bottom to top.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub x: u32,
    pub y: u32,
}

impl Coord {
    #[inline(always)]
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// The four axis directions. The declaration order is the extravasation priority.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
    Bottom,
    Top,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Direction::Left, Direction::Right, Direction::Bottom, Direction::Top];

    #[inline(always)]
    pub fn offset(self) -> (i64, i64) {
        match self {
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
            Direction::Bottom => (0, -1),
            Direction::Top => (0, 1),
        }
    }

    #[inline(always)]
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::Bottom => Direction::Top,
            Direction::Top => Direction::Bottom,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OccupantKind {
    Cell(Phenotype),
    Vessel,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Occupant {
    pub id: AgentId,
    pub kind: OccupantKind,
}

/// Bounded multi-occupancy lattice for one site.
///
/// Occupants are stored per coordinate in placement order. Capacity only counts
/// cells; vessels share coordinates with cells freely.
#[derive(Debug, Clone)]
pub struct Grid {
    site: usize,
    width: u32,
    height: u32,
    slots: Vec<Vec<Occupant>>,
    live_cells: u64,
}

impl Grid {
    pub fn new(site: usize, width: u32, height: u32) -> Self {
        Self {
            site,
            width,
            height,
            slots: vec![Vec::new(); width as usize * height as usize],
            live_cells: 0,
        }
    }

    pub fn site(&self) -> usize {
        self.site
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Flat index of a coordinate. Rasters use the same x-major layout.
    #[inline(always)]
    pub fn index(&self, pos: Coord) -> usize {
        pos.x as usize * self.height as usize + pos.y as usize
    }

    #[inline(always)]
    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64
    }

    /// Neighbor of `pos` in `dir`, or `None` past the lattice edge.
    #[inline(always)]
    pub fn neighbor(&self, pos: Coord, dir: Direction) -> Option<Coord> {
        let (dx, dy) = dir.offset();
        let x = pos.x as i64 + dx;
        let y = pos.y as i64 + dy;
        if self.in_bounds(x, y) {
            Some(Coord::new(x as u32, y as u32))
        } else {
            None
        }
    }

    /// Neighbors in `Direction::ALL` order.
    pub fn axis_neighbors(&self, pos: Coord) -> [Option<Coord>; 4] {
        Direction::ALL.map(|dir| self.neighbor(pos, dir))
    }

    pub fn checked_coord(&self, x: i64, y: i64) -> ModelResult<Coord> {
        if self.in_bounds(x, y) {
            Ok(Coord::new(x as u32, y as u32))
        } else {
            Err(ModelError::OutOfBounds { site: self.site, x, y, width: self.width, height: self.height })
        }
    }

    pub fn occupants(&self, pos: Coord) -> &[Occupant] {
        &self.slots[self.index(pos)]
    }

    /// Live number of cells at `pos`, vessels excluded.
    pub fn cell_count(&self, pos: Coord) -> u32 {
        self.occupants(pos)
            .iter()
            .filter(|o| matches!(o.kind, OccupantKind::Cell(_)))
            .count() as u32
    }

    /// Live (mesenchymal, epithelial) counts at `pos`.
    pub fn phenotype_counts(&self, pos: Coord) -> (u32, u32) {
        count_phenotypes(self.occupants(pos))
    }

    /// Live mesenchymal count for every coordinate, in raster order.
    pub fn mesenchymal_counts(&self) -> Vec<u32> {
        self.slots.iter().map(|slot| count_phenotypes(slot).0).collect()
    }

    pub fn has_room(&self, pos: Coord, carrying_capacity: u32) -> bool {
        self.cell_count(pos) < carrying_capacity
    }

    pub fn live_cells(&self) -> u64 {
        self.live_cells
    }

    /// Highest number of cells found on any single coordinate.
    pub fn max_cell_count(&self) -> u32 {
        self.slots
            .iter()
            .map(|slot| {
                let (m, e) = count_phenotypes(slot);
                m + e
            })
            .max()
            .unwrap_or(0)
    }

    pub fn place(&mut self, id: AgentId, kind: OccupantKind, pos: Coord) {
        let idx = self.index(pos);
        self.slots[idx].push(Occupant { id, kind });
        if matches!(kind, OccupantKind::Cell(_)) {
            self.live_cells += 1;
        }
    }

    /// Removes an occupant. An agent missing from `pos` means the agent list and the
    /// grid disagree, which is fatal.
    pub fn remove(&mut self, id: AgentId, pos: Coord) -> ModelResult<()> {
        let idx = self.index(pos);
        let slot = &mut self.slots[idx];
        let found = slot
            .iter()
            .position(|o| o.id == id)
            .ok_or(ModelError::MissingOccupant { id, site: self.site, pos })?;
        let occupant = slot.remove(found);
        if matches!(occupant.kind, OccupantKind::Cell(_)) {
            self.live_cells -= 1;
        }
        Ok(())
    }

    pub fn move_occupant(&mut self, id: AgentId, kind: OccupantKind, from: Coord, to: Coord) -> ModelResult<()> {
        self.remove(id, from)?;
        self.place(id, kind, to);
        Ok(())
    }
}

fn count_phenotypes(slot: &[Occupant]) -> (u32, u32) {
    slot.iter().fold((0, 0), |(m, e), o| match o.kind {
        OccupantKind::Cell(Phenotype::Mesenchymal) => (m + 1, e),
        OccupantKind::Cell(Phenotype::Epithelial) => (m, e + 1),
        OccupantKind::Vessel => (m, e),
    })
}
