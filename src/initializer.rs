use log::debug;
use rand::prelude::*;

use metastasis_common::ModelParams;

use crate::agent::{Agent, AgentId, CellAgent, Phenotype, VesselAgent};
use crate::error::{ModelError, ModelResult};
use crate::geometry::QuasiCircle;
use crate::grid::{Coord, Grid, OccupantKind};
use crate::SimRng;

// Width of the band along every edge of the primary site kept free of vessels.
const VESSEL_BORDER: u32 = 2;

/// Agents and vessel positions produced by a fresh initialization.
#[derive(Debug, Default)]
pub struct InitialPopulation {
    pub agents: Vec<Agent>,
    pub vessel_positions: Vec<Vec<Coord>>,
}

/// Seeds the primary tumor and every site's vessels. Ids are taken from `next_agent_id`.
pub fn populate(
    params: &ModelParams,
    initial_cells: u32,
    grids: &mut [Grid],
    next_agent_id: &mut AgentId,
    rng: &mut SimRng,
) -> ModelResult<InitialPopulation> {
    let mut population = InitialPopulation {
        agents: Vec::new(),
        vessel_positions: vec![Vec::new(); grids.len()],
    };

    seed_tumor(params, initial_cells, &mut grids[0], next_agent_id, rng, &mut population)?;
    place_primary_vessels(params, &mut grids[0], next_agent_id, rng, &mut population)?;
    for site in 1..grids.len() {
        let count = params.secondary_site_vessels.get(site - 1).copied().unwrap_or(0);
        place_secondary_vessels(count, &mut grids[site], next_agent_id, rng, &mut population);
    }

    debug!(
        "Initialized {} agents; vessels per site: {:?}.",
        population.agents.len(),
        population.vessel_positions.iter().map(Vec::len).collect::<Vec<_>>()
    );
    Ok(population)
}

// Mesenchymal cells first, then epithelial, each on a random point of the tumor disk.
// A point leaves the pool once it holds `carrying_capacity` cells.
fn seed_tumor(
    params: &ModelParams,
    initial_cells: u32,
    grid: &mut Grid,
    next_agent_id: &mut AgentId,
    rng: &mut SimRng,
    population: &mut InitialPopulation,
) -> ModelResult<()> {
    let mesenchymal = (initial_cells as f64 * params.mesenchymal_proportion).round() as u32;
    let mut eligible = QuasiCircle::new(params.tumor_seed_points, grid.width(), grid.height()).into_points();

    for placed in 0..initial_cells {
        if eligible.is_empty() {
            return Err(ModelError::SeedAreaExhausted { placed });
        }
        let phenotype = if placed < mesenchymal { Phenotype::Mesenchymal } else { Phenotype::Epithelial };
        let j = rng.random_range(0..eligible.len());
        let pos = eligible[j].0;

        let cell = CellAgent::new(*next_agent_id, phenotype, pos, grid.site());
        *next_agent_id += 1;
        grid.place(cell.id, cell.occupant_kind(), pos);
        population.agents.push(Agent::Cell(cell));

        eligible[j].1 += 1;
        if eligible[j].1 >= params.carrying_capacity {
            eligible.remove(j);
        }
    }
    Ok(())
}

// Rejection sampling against the exclusion disk, the border band and used points.
// Ruptured vessels go first.
fn place_primary_vessels(
    params: &ModelParams,
    grid: &mut Grid,
    next_agent_id: &mut AgentId,
    rng: &mut SimRng,
    population: &mut InitialPopulation,
) -> ModelResult<()> {
    let (width, height) = (grid.width(), grid.height());
    let mut forbidden = QuasiCircle::new(params.vessel_exclusion_points, width, height).into_mask();
    for x in 0..width {
        for y in 0..height {
            let near_edge = x < VESSEL_BORDER
                || y < VESSEL_BORDER
                || x + VESSEL_BORDER >= width
                || y + VESSEL_BORDER >= height;
            if near_edge {
                forbidden[grid.index(Coord::new(x, y))] = true;
            }
        }
    }

    let available = forbidden.iter().filter(|f| !**f).count();
    let requested = params.ruptured_vessels_primary + params.intact_vessels_primary;
    if (requested as usize) > available {
        return Err(ModelError::VesselAreaExhausted { site: grid.site(), available, requested });
    }

    let batches = [(true, params.ruptured_vessels_primary), (false, params.intact_vessels_primary)];
    for (ruptured, count) in batches {
        let mut remaining = count;
        while remaining > 0 {
            let pos = Coord::new(rng.random_range(0..width), rng.random_range(0..height));
            let idx = grid.index(pos);
            if forbidden[idx] {
                continue;
            }
            forbidden[idx] = true;
            add_vessel(ruptured, pos, grid, next_agent_id, population);
            remaining -= 1;
        }
    }
    Ok(())
}

fn place_secondary_vessels(
    count: u32,
    grid: &mut Grid,
    next_agent_id: &mut AgentId,
    rng: &mut SimRng,
    population: &mut InitialPopulation,
) {
    for _ in 0..count {
        let pos = Coord::new(rng.random_range(0..grid.width()), rng.random_range(0..grid.height()));
        add_vessel(false, pos, grid, next_agent_id, population);
    }
}

fn add_vessel(
    ruptured: bool,
    pos: Coord,
    grid: &mut Grid,
    next_agent_id: &mut AgentId,
    population: &mut InitialPopulation,
) {
    let vessel = VesselAgent { id: *next_agent_id, ruptured, pos, site: grid.site() };
    *next_agent_id += 1;
    grid.place(vessel.id, OccupantKind::Vessel, pos);
    population.vessel_positions[grid.site()].push(pos);
    population.agents.push(Agent::Vessel(vessel));
}
