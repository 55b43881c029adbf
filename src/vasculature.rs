use std::collections::BTreeMap;

use log::debug;
use rand::distr::weighted::WeightedIndex;
use rand::prelude::*;
use rand_distr::Binomial;

use metastasis_common::ModelParams;

use crate::agent::{AgentId, CellAgent, Phenotype};
use crate::error::{ModelError, ModelResult};
use crate::grid::{Coord, Direction, Grid};
use crate::SimRng;

/// A group of cells travelling together through the vasculature.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Cluster {
    mesenchymal: u32,
    epithelial: u32,
}

impl Cluster {
    /// The combined count must fit a `u32`, which keeps `total` exact.
    pub fn new(mesenchymal: u32, epithelial: u32) -> ModelResult<Self> {
        let total = mesenchymal.checked_add(epithelial).ok_or(ModelError::ClusterTooLarge {
            mesenchymal: i64::from(mesenchymal),
            epithelial: i64::from(epithelial),
        })?;
        if total == 0 {
            return Err(ModelError::EmptyCluster);
        }
        Ok(Self { mesenchymal, epithelial })
    }

    /// Validates counts read from outside, where negatives can appear.
    pub fn from_signed(mesenchymal: i64, epithelial: i64) -> ModelResult<Self> {
        if mesenchymal < 0 || epithelial < 0 {
            return Err(ModelError::NegativeClusterCount { mesenchymal, epithelial });
        }
        let too_large = || ModelError::ClusterTooLarge { mesenchymal, epithelial };
        let m = u32::try_from(mesenchymal).map_err(|_| too_large())?;
        let e = u32::try_from(epithelial).map_err(|_| too_large())?;
        Self::new(m, e)
    }

    pub fn single(phenotype: Phenotype) -> Self {
        match phenotype {
            Phenotype::Mesenchymal => Self { mesenchymal: 1, epithelial: 0 },
            Phenotype::Epithelial => Self { mesenchymal: 0, epithelial: 1 },
        }
    }

    pub fn mesenchymal(&self) -> u32 {
        self.mesenchymal
    }

    pub fn epithelial(&self) -> u32 {
        self.epithelial
    }

    pub fn count(&self, phenotype: Phenotype) -> u32 {
        match phenotype {
            Phenotype::Mesenchymal => self.mesenchymal,
            Phenotype::Epithelial => self.epithelial,
        }
    }

    pub fn total(&self) -> u32 {
        self.mesenchymal + self.epithelial
    }

    pub fn as_pair(&self) -> [u32; 2] {
        [self.mesenchymal, self.epithelial]
    }
}

/// Clusters in transit, keyed by the step at which they arrive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VasculatureQueue {
    entries: BTreeMap<u64, Vec<Cluster>>,
}

impl VasculatureQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: BTreeMap<u64, Vec<Cluster>>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, arrival_step: u64, cluster: Cluster) {
        self.entries.entry(arrival_step).or_default().push(cluster);
    }

    pub fn has_arrivals(&self, step: u64) -> bool {
        self.entries.contains_key(&step)
    }

    /// Removes and returns the clusters arriving at `step`.
    pub fn take(&mut self, step: u64) -> Option<Vec<Cluster>> {
        self.entries.remove(&step)
    }

    pub fn entries(&self) -> &BTreeMap<u64, Vec<Cluster>> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cells currently in transit.
    pub fn total_cells(&self) -> u64 {
        self.entries
            .values()
            .flat_map(|clusters| clusters.iter())
            .map(|c| c.total() as u64)
            .sum()
    }
}

/// Splits multi-cell clusters while in transit.
///
/// Every cell of a multi-cell cluster detaches into a singleton with probability
/// `1 - disaggregation_prob`; the rest stay together. Singletons pass through. The
/// number of cells is conserved.
pub fn disaggregate(clusters: &[Cluster], disaggregation_prob: f64, rng: &mut SimRng) -> ModelResult<Vec<Cluster>> {
    let detach_prob = (1.0 - disaggregation_prob).clamp(0.0, 1.0);
    let mut result: Vec<Cluster> = clusters.iter().copied().filter(|c| c.total() == 1).collect();

    for cluster in clusters.iter().filter(|c| c.total() > 1) {
        let mut residual = [0u32; 2];
        for (slot, phenotype) in Phenotype::ALL.into_iter().enumerate() {
            let count = cluster.count(phenotype);
            let detached = sample_detached(count, detach_prob, rng)?;
            result.extend(std::iter::repeat(Cluster::single(phenotype)).take(detached as usize));
            residual[slot] = count - detached;
        }
        if residual[0] + residual[1] > 0 {
            result.push(Cluster::new(residual[0], residual[1])?);
        }
    }
    Ok(result)
}

// Number of independent successes among `count` cells.
fn sample_detached(count: u32, detach_prob: f64, rng: &mut SimRng) -> ModelResult<u32> {
    if count == 0 {
        return Ok(0);
    }
    let binomial = Binomial::new(count as u64, detach_prob)
        .map_err(|e| ModelError::InvalidParameter(format!("disaggregation probability: {}", e)))?;
    Ok(binomial.sample(rng) as u32)
}

/// Independent survival draw: singletons and multi-cell clusters use different odds.
pub fn survives(cluster: &Cluster, params: &ModelParams, rng: &mut SimRng) -> bool {
    let probability = if cluster.total() == 1 {
        params.single_cell_survival
    } else {
        params.cluster_survival
    };
    rng.random::<f64>() < probability
}

/// Result of landing one cluster on a site.
#[derive(Debug, Default)]
pub struct Placement {
    pub placed: Vec<CellAgent>,
    pub dropped: u32,
}

/// Places a cluster's cells around `arrival`, trying left, right, bottom and top in
/// that order for each cell. Occupancy is re-read after every placement. Cells that
/// find all four candidates full or out of bounds are dropped.
pub fn place_cluster(
    grid: &mut Grid,
    arrival: Coord,
    cluster: &Cluster,
    carrying_capacity: u32,
    next_agent_id: &mut AgentId,
) -> Placement {
    let candidates = grid.axis_neighbors(arrival);
    let mut placement = Placement::default();

    for phenotype in Phenotype::ALL {
        for _ in 0..cluster.count(phenotype) {
            let target = candidates
                .iter()
                .flatten()
                .copied()
                .find(|pos| grid.has_room(*pos, carrying_capacity));
            match target {
                Some(pos) => {
                    let cell = CellAgent::new(*next_agent_id, phenotype, pos, grid.site());
                    *next_agent_id += 1;
                    grid.place(cell.id, cell.occupant_kind(), pos);
                    placement.placed.push(cell);
                }
                None => placement.dropped += 1,
            }
        }
    }
    if placement.dropped > 0 {
        debug!(
            "Dropped {} extravasating cells around {:?} on site {}: all of {:?} full or out of bounds.",
            placement.dropped,
            arrival,
            grid.site(),
            Direction::ALL
        );
    }
    placement
}

/// Statistics for one transport pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransportReport {
    pub arrived_clusters: usize,
    pub surviving_clusters: usize,
    pub placed_cells: u64,
    pub dropped_cells: u64,
}

/// Moves the clusters due at `step` from the vasculature onto secondary sites.
pub struct VasculatureTransport<'a> {
    pub params: &'a ModelParams,
    pub vessel_positions: &'a [Vec<Coord>],
}

impl<'a> VasculatureTransport<'a> {
    pub fn run(
        &self,
        step: u64,
        queue: &mut VasculatureQueue,
        grids: &mut [Grid],
        next_agent_id: &mut AgentId,
        rng: &mut SimRng,
    ) -> ModelResult<(Vec<CellAgent>, TransportReport)> {
        let mut report = TransportReport::default();
        let Some(arriving) = queue.take(step) else {
            return Ok((Vec::new(), report));
        };
        report.arrived_clusters = arriving.len();

        let clusters = disaggregate(&arriving, self.params.disaggregation_prob, rng)?;
        let surviving: Vec<Cluster> = clusters.into_iter().filter(|c| survives(c, self.params, rng)).collect();
        report.surviving_clusters = surviving.len();
        if surviving.is_empty() {
            return Ok((Vec::new(), report));
        }

        let destinations = WeightedIndex::new(&self.params.extravasation_weights)
            .map_err(|e| ModelError::InvalidParameter(format!("extravasation weights: {}", e)))?;

        let mut new_cells = Vec::new();
        for cluster in &surviving {
            let site = destinations.sample(rng) + 1;
            let arrival = *self.vessel_positions[site]
                .choose(rng)
                .ok_or(ModelError::NoVessels { site })?;
            let placement = place_cluster(
                &mut grids[site],
                arrival,
                cluster,
                self.params.carrying_capacity,
                next_agent_id,
            );
            report.placed_cells += placement.placed.len() as u64;
            report.dropped_cells += placement.dropped as u64;
            new_cells.extend(placement.placed);
        }

        debug!(
            "Step {}: {} clusters arrived, {} survived, {} cells placed, {} dropped.",
            step, report.arrived_clusters, report.surviving_clusters, report.placed_cells, report.dropped_cells
        );
        Ok((new_cells, report))
    }
}
