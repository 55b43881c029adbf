use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use log::{debug, info, trace};
use rand::prelude::*;

use metastasis_common::{ModelParams, SimulationConfig, Snapshot};

use crate::agent::{Activation, ActivationContext, Agent, CellAgent, Phenotype};
use crate::checkpoint::{self, CheckpointView, AGENT_LOG, CONFIG_FILE};
use crate::clock::{ClockState, RngState};
use crate::error::ModelError;
use crate::field::EnvironmentField;
use crate::grid::{Coord, Grid, OccupantKind};
use crate::initializer;
use crate::movement::{FixedDirections, MovementPolicy, Stationary};
use crate::vasculature::{Cluster, VasculatureQueue, VasculatureTransport};
use crate::SimRng;

/// Drives every site, the vasculature and the checkpoint cadence.
pub struct Simulation {
    /// The configuration this run was started (or resumed) with.
    config: SimulationConfig,
    params: ModelParams,
    /// One grid and one field per site, primary first.
    grids: Vec<Grid>,
    fields: Vec<EnvironmentField>,
    /// All live agents, kept in id order.
    agents: Vec<Agent>,
    /// Vessel coordinates per site in creation order. Arrival points for transport.
    vessel_positions: Vec<Vec<Coord>>,
    queue: VasculatureQueue,
    clock: ClockState,
    rng: SimRng,
    policy: Box<dyn MovementPolicy>,
    output_dir: PathBuf,
    /// Absolute step at which this run started. `max_steps` counts from here.
    start_step: u64,
    dropped_at_extravasation: u64,
    recorded_snapshots: Vec<Snapshot>,
}

fn default_policy(config: &SimulationConfig) -> Box<dyn MovementPolicy> {
    match config.movement.fixed {
        Some(fixed) => Box::new(FixedDirections::new(fixed)),
        None => Box::new(Stationary),
    }
}

fn empty_world(params: &ModelParams) -> (Vec<Grid>, Vec<EnvironmentField>) {
    let grids = (0..params.sites)
        .map(|site| Grid::new(site, params.width, params.height))
        .collect();
    let fields = (0..params.sites)
        .map(|_| EnvironmentField::new(params.width, params.height))
        .collect();
    (grids, fields)
}

impl Simulation {
    /// Seeds a fresh run and prepares its output directory.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let params = config.get_model_params();
        let mut rng = match config.initial_conditions.seed {
            Some(seed) => SimRng::seed_from_u64(seed),
            None => SimRng::from_os_rng(),
        };

        let output_dir = PathBuf::from(&config.output.directory);
        if output_dir.join(AGENT_LOG).exists() {
            bail!(
                "{} already holds a run; resume it or choose another output directory",
                output_dir.display()
            );
        }

        let (mut grids, fields) = empty_world(&params);
        let mut clock = ClockState::new(&params, &rng);
        let population = initializer::populate(
            &params,
            config.initial_conditions.initial_cells,
            &mut grids,
            &mut clock.next_agent_id,
            &mut rng,
        )?;

        checkpoint::prepare_output_dir(&output_dir)?;
        config
            .save(output_dir.join(CONFIG_FILE))
            .context("Failed to save the run configuration")?;

        info!(
            "Initialized {} sites of {}x{} with {} cells and {} vessels.",
            params.sites,
            params.width,
            params.height,
            grids[0].live_cells(),
            population.vessel_positions.iter().map(Vec::len).sum::<usize>()
        );

        Ok(Self {
            policy: default_policy(&config),
            config,
            params,
            grids,
            fields,
            agents: population.agents,
            vessel_positions: population.vessel_positions,
            queue: VasculatureQueue::new(),
            clock,
            rng,
            output_dir,
            start_step: 0,
            dropped_at_extravasation: 0,
            recorded_snapshots: Vec::new(),
        })
    }

    /// Resumes from the latest checkpoint in `checkpoint_dir`.
    ///
    /// The lattice shape and site count come from `config` and must match the
    /// checkpoint. `timing.max_steps` is counted from the loaded step.
    pub fn from_checkpoint(config: SimulationConfig, checkpoint_dir: &Path) -> Result<Self> {
        config.validate()?;
        let params = config.get_model_params();
        let loaded = checkpoint::load_checkpoint(checkpoint_dir, &params)
            .with_context(|| format!("Failed to load checkpoint from {}", checkpoint_dir.display()))?;

        let (mut grids, _) = empty_world(&params);
        let mut vessel_positions = vec![Vec::new(); params.sites];
        for agent in &loaded.agents {
            let grid = &mut grids[agent.site()];
            match agent {
                Agent::Cell(cell) => grid.place(cell.id, cell.occupant_kind(), cell.pos),
                Agent::Vessel(vessel) => {
                    grid.place(vessel.id, OccupantKind::Vessel, vessel.pos);
                    vessel_positions[vessel.site].push(vessel.pos);
                }
            }
        }
        let log_path = checkpoint_dir.join(AGENT_LOG);
        for grid in &grids {
            if grid.max_cell_count() > params.carrying_capacity {
                return Err(ModelError::malformed(
                    &log_path,
                    format!("site {} holds more than {} cells on one coordinate", grid.site(), params.carrying_capacity),
                )
                .into());
            }
        }

        let rng = loaded.clock.rng.restore().ok_or_else(|| {
            ModelError::malformed(checkpoint_dir, "random stream position is not a number")
        })?;

        let output_dir = PathBuf::from(&config.output.directory);
        checkpoint::prepare_output_dir(&output_dir)?;
        checkpoint::carry_over_agent_log(checkpoint_dir, &output_dir)?;
        config
            .save(output_dir.join(CONFIG_FILE))
            .context("Failed to save the run configuration")?;

        info!(
            "Resumed at step {} with {} cells, {} in transit.",
            loaded.step,
            grids.iter().map(Grid::live_cells).sum::<u64>(),
            loaded.queue.total_cells()
        );

        Ok(Self {
            policy: default_policy(&config),
            config,
            params,
            grids,
            fields: loaded.fields,
            agents: loaded.agents,
            vessel_positions,
            queue: loaded.queue,
            clock: loaded.clock,
            rng,
            output_dir,
            start_step: loaded.step,
            dropped_at_extravasation: 0,
            recorded_snapshots: Vec::new(),
        })
    }

    /// Replaces the movement policy chosen from the configuration.
    pub fn with_policy(mut self, policy: impl MovementPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Advances every site by one step.
    pub fn step(&mut self) -> Result<()> {
        let step_start = Instant::now();
        let step = self.clock.current_step;

        // --- 1. Arrivals from the vasculature ---
        if self.queue.has_arrivals(step) {
            self.transport(step)?;
        }

        // --- 2. Protease and matrix (parallel sweep per site) ---
        for (field, grid) in self.fields.iter_mut().zip(&self.grids) {
            field.advance(grid, &self.params);
        }

        // --- 3. Proliferation ---
        self.proliferate();

        // --- 4. Agent activation, freshly shuffled ---
        self.activate_agents()?;

        // --- 5. Clock ---
        self.clock.current_step += 1;
        let completed = self.clock.current_step;
        let live: Vec<u64> = self.grids.iter().map(Grid::live_cells).collect();
        self.clock.mark_populated(live, completed);

        // --- 6. Checkpoint ---
        let period = self.config.timing.checkpoint_period;
        let run_finished = self.steps_this_run() == self.config.timing.max_steps;
        if (period > 0 && completed % period == 0) || run_finished {
            self.write_checkpoint()?;
        }

        trace!(
            "Step {} completed in {:.2} ms",
            completed,
            step_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    /// Executes `timing.max_steps` steps.
    pub fn run(&mut self) -> Result<()> {
        for _ in 0..self.config.timing.max_steps {
            self.step()?;
        }
        Ok(())
    }

    fn transport(&mut self, step: u64) -> Result<()> {
        let transport = VasculatureTransport {
            params: &self.params,
            vessel_positions: &self.vessel_positions,
        };
        let (arrived, report) = transport.run(
            step,
            &mut self.queue,
            &mut self.grids,
            &mut self.clock.next_agent_id,
            &mut self.rng,
        )?;
        self.dropped_at_extravasation += report.dropped_cells;
        self.agents.extend(arrived.into_iter().map(Agent::Cell));
        Ok(())
    }

    // Duplicates cells of every phenotype that is due, in id order, at the parent's
    // own coordinate when it still has room.
    fn proliferate(&mut self) {
        let due = self.clock.proliferation_due(&self.params);
        for phenotype in due {
            let mut born = Vec::new();
            let mut crowded = 0u64;
            for agent in &self.agents {
                let Agent::Cell(parent) = agent else { continue };
                if parent.phenotype != phenotype {
                    continue;
                }
                let grid = &mut self.grids[parent.site];
                if !grid.has_room(parent.pos, self.params.carrying_capacity) {
                    crowded += 1;
                    continue;
                }
                let daughter = CellAgent::new(self.clock.next_agent_id, phenotype, parent.pos, parent.site);
                self.clock.next_agent_id += 1;
                grid.place(daughter.id, daughter.occupant_kind(), daughter.pos);
                born.push(Agent::Cell(daughter));
            }
            debug!(
                "Step {}: {} {} cells divided, {} had no room.",
                self.clock.current_step,
                born.len(),
                phenotype,
                crowded
            );
            self.agents.extend(born);
        }
    }

    fn activate_agents(&mut self) -> Result<()> {
        let step = self.clock.current_step;
        let arrival = step + self.params.transit_steps;
        let mut order: Vec<usize> = (0..self.agents.len()).collect();
        order.shuffle(&mut self.rng);

        let mut ctx = ActivationContext {
            grids: &mut self.grids,
            fields: &self.fields,
            policy: self.policy.as_mut(),
            rng: &mut self.rng,
            carrying_capacity: self.params.carrying_capacity,
        };
        let mut departed = HashSet::new();
        for idx in order {
            let agent = &mut self.agents[idx];
            if let Activation::Intravasated = agent.activate(&mut ctx)? {
                if let Agent::Cell(cell) = agent {
                    self.queue.push(arrival, Cluster::single(cell.phenotype));
                    departed.insert(cell.id);
                }
            }
        }

        if !departed.is_empty() {
            debug!("Step {}: {} cells entered the vasculature.", step, departed.len());
            self.agents.retain(|agent| !departed.contains(&agent.id()));
        }
        Ok(())
    }

    fn steps_this_run(&self) -> u64 {
        self.clock.current_step - self.start_step
    }

    /// Writes a full checkpoint for the current step and records its statistics.
    pub fn write_checkpoint(&mut self) -> Result<()> {
        self.clock.rng = RngState::capture(&self.rng);
        let view = CheckpointView {
            agents: &self.agents,
            fields: &self.fields,
            queue: &self.queue,
            clock: &self.clock,
        };
        checkpoint::write_checkpoint(&self.output_dir, &view)
            .with_context(|| format!("Failed to write checkpoint for step {}", self.clock.current_step))?;
        self.record_snapshot();
        Ok(())
    }

    /// Records population statistics for the current step.
    pub fn record_snapshot(&mut self) {
        let mut mesenchymal_cells = 0;
        let mut epithelial_cells = 0;
        for cell in self.agents.iter().filter_map(Agent::as_cell) {
            match cell.phenotype {
                Phenotype::Mesenchymal => mesenchymal_cells += 1,
                Phenotype::Epithelial => epithelial_cells += 1,
            }
        }
        let snapshot = Snapshot {
            step: self.clock.current_step,
            total_cells: self.total_cells(),
            cells_per_site: self.cells_per_site(),
            mesenchymal_cells,
            epithelial_cells,
            vasculature_cells: self.vasculature_cells(),
            dropped_at_extravasation: self.dropped_at_extravasation,
        };
        info!(
            "Step {} | Cells: {} {:?} | In transit: {} | Dropped: {}",
            snapshot.step,
            snapshot.total_cells,
            snapshot.cells_per_site,
            snapshot.vasculature_cells,
            snapshot.dropped_at_extravasation
        );
        self.recorded_snapshots.push(snapshot);
    }

    pub fn total_cells(&self) -> u64 {
        self.grids.iter().map(Grid::live_cells).sum()
    }

    pub fn cells_per_site(&self) -> Vec<u64> {
        self.grids.iter().map(Grid::live_cells).collect()
    }

    pub fn vasculature_cells(&self) -> u64 {
        self.queue.total_cells()
    }

    pub fn current_step(&self) -> u64 {
        self.clock.current_step
    }

    pub fn next_agent_id(&self) -> u64 {
        self.clock.next_agent_id
    }

    pub fn first_populated(&self) -> &[Option<u64>] {
        &self.clock.first_populated
    }

    pub fn field(&self, site: usize) -> Option<&EnvironmentField> {
        self.fields.get(site)
    }

    pub fn grid(&self, site: usize) -> Option<&Grid> {
        self.grids.get(site)
    }

    pub fn queue(&self) -> &VasculatureQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut VasculatureQueue {
        &mut self.queue
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn dropped_at_extravasation(&self) -> u64 {
        self.dropped_at_extravasation
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn get_recorded_snapshots(&self) -> &Vec<Snapshot> {
        &self.recorded_snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::{CellDecision, LocalView};
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::tempdir;

    fn small_config(dir: &Path) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.lattice.width = 41;
        config.lattice.height = 41;
        config.initial_conditions.initial_cells = 20;
        config.initial_conditions.tumor_seed_points = 25;
        config.initial_conditions.vessel_exclusion_points = 60;
        config.initial_conditions.seed = Some(11);
        config.timing.max_steps = 6;
        config.timing.checkpoint_period = 3;
        config.output.directory = dir.display().to_string();
        config
    }

    struct LeaveAfterOneStep;

    impl MovementPolicy for LeaveAfterOneStep {
        fn decide(&mut self, view: &LocalView<'_>, _rng: &mut SimRng) -> CellDecision {
            if view.site() == 0 {
                CellDecision::Intravasate
            } else {
                CellDecision::Stay
            }
        }
    }

    /// Stays put and records every cell id it is asked about, one list per step.
    struct Recording(Rc<RefCell<Vec<Vec<u64>>>>);

    impl MovementPolicy for Recording {
        fn decide(&mut self, view: &LocalView<'_>, _rng: &mut SimRng) -> CellDecision {
            if let Some(current) = self.0.borrow_mut().last_mut() {
                current.push(view.id());
            }
            CellDecision::Stay
        }
    }

    fn cell_ids(sim: &Simulation) -> Vec<u64> {
        let mut ids: Vec<u64> = sim.agents().iter().filter_map(Agent::as_cell).map(|c| c.id).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn fresh_run_refuses_an_existing_log() {
        let dir = tempdir().unwrap();
        let config = small_config(dir.path());
        let mut sim = Simulation::new(config.clone()).unwrap();
        sim.run().unwrap();
        assert!(Simulation::new(config).is_err());
    }

    #[test]
    fn checkpoints_follow_the_period_and_the_last_step() {
        let dir = tempdir().unwrap();
        let mut config = small_config(dir.path());
        config.timing.max_steps = 7;
        let mut sim = Simulation::new(config).unwrap();
        sim.run().unwrap();
        let steps: Vec<u64> = sim.get_recorded_snapshots().iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![3, 6, 7]);
        assert!(dir.path().join("Clock").join("Clock-7step.json").is_file());
        assert!(dir.path().join(CONFIG_FILE).is_file());
    }

    #[test]
    fn intravasated_cells_travel_as_singletons() {
        let dir = tempdir().unwrap();
        let mut config = small_config(dir.path());
        config.vasculature.transit_steps = 42;
        let mut sim = Simulation::new(config).unwrap().with_policy(LeaveAfterOneStep);

        sim.step().unwrap();
        assert_eq!(sim.cells_per_site()[0], 0);
        assert_eq!(sim.vasculature_cells(), 20);
        assert_eq!(sim.queue().entries().keys().copied().collect::<Vec<_>>(), vec![42]);
        assert!(sim.queue().entries()[&42].iter().all(|c| c.total() == 1));
        assert!(sim.agents().iter().all(|a| a.as_cell().is_none()));
    }

    #[test]
    fn proliferation_doubles_cells_with_room() {
        let dir = tempdir().unwrap();
        let mut config = small_config(dir.path());
        config.proliferation.doubling_time_mesenchymal = 2;
        config.proliferation.doubling_time_epithelial = 1000;
        config.lattice.carrying_capacity = 100;
        let mut sim = Simulation::new(config).unwrap();
        let mesenchymal_before = sim
            .agents()
            .iter()
            .filter_map(Agent::as_cell)
            .filter(|c| c.phenotype == Phenotype::Mesenchymal)
            .count() as u64;

        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.total_cells(), 20);
        sim.step().unwrap();
        assert_eq!(sim.total_cells(), 20 + mesenchymal_before);
        assert_eq!(sim.next_agent_id(), sim.agents().iter().map(Agent::id).max().unwrap() + 1);
    }

    #[test]
    fn every_cell_is_activated_once_in_a_fresh_order() {
        let dir = tempdir().unwrap();
        let mut config = small_config(dir.path());
        config.lattice.carrying_capacity = 50;
        config.proliferation.doubling_time_mesenchymal = 1;
        config.vasculature.single_cell_survival = 1.0;
        config.vasculature.cluster_survival = 1.0;
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut sim = Simulation::new(config).unwrap().with_policy(Recording(Rc::clone(&seen)));
        // Arrivals land during the second step, before activation.
        sim.queue_mut().push(1, Cluster::new(3, 2).unwrap());

        let mut expected = Vec::new();
        for _ in 0..2 {
            seen.borrow_mut().push(Vec::new());
            sim.step().unwrap();
            expected.push(cell_ids(&sim));
        }

        let seen = seen.borrow();
        for (visited, alive) in seen.iter().zip(&expected) {
            let mut sorted = visited.clone();
            sorted.sort_unstable();
            assert_eq!(&sorted, alive);
        }
        // Daughters and arrivals joined the second pass.
        assert!(expected[1].len() > expected[0].len() + 5);

        let first = &seen[0];
        let replayed: Vec<u64> = seen[1].iter().copied().filter(|id| first.contains(id)).collect();
        assert_ne!(&replayed, first);
    }
}
