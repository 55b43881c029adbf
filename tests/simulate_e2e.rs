//! End-to-end behavior of the scheduler on small lattices.

use metastasis_common::{FixedMovement, SimulationConfig};
use metastasis_engine::{Cluster, Coord, Phenotype, Simulation};
use std::path::Path;
use tempfile::tempdir;

fn base_config(dir: &Path) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.initial_conditions.seed = Some(2024);
    config.proliferation.doubling_time_mesenchymal = 100_000;
    config.proliferation.doubling_time_epithelial = 100_000;
    config.timing.checkpoint_period = 10_000;
    config.output.directory = dir.display().to_string();
    config
}

fn only_left() -> FixedMovement {
    FixedMovement { left: 1.0, right: 0.0, bottom: 0.0, top: 0.0 }
}

fn lone_cell_position(sim: &Simulation) -> Coord {
    let cells: Vec<_> = sim.agents().iter().filter_map(|a| a.as_cell()).collect();
    assert_eq!(cells.len(), 1);
    cells[0].pos
}

#[test]
fn certain_left_move_walks_one_column_per_step() {
    let dir = tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.initial_conditions.initial_cells = 1;
    config.initial_conditions.tumor_seed_points = 1;
    config.movement.fixed = Some(only_left());

    let mut sim = Simulation::new(config).unwrap();
    assert_eq!(lone_cell_position(&sim), Coord::new(100, 100));
    for k in 1..=5 {
        sim.step().unwrap();
        assert_eq!(lone_cell_position(&sim), Coord::new(100 - k, 100));
    }
}

#[test]
fn certain_left_move_stops_at_the_boundary() {
    let dir = tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.lattice.width = 11;
    config.lattice.height = 11;
    config.lattice.sites = 1;
    config.initial_conditions.initial_cells = 1;
    config.initial_conditions.tumor_seed_points = 1;
    config.initial_conditions.vessel_exclusion_points = 10;
    config.vessels.ruptured_primary = 2;
    config.vessels.intact_primary = 0;
    config.movement.fixed = Some(only_left());

    let mut sim = Simulation::new(config).unwrap();
    assert_eq!(lone_cell_position(&sim), Coord::new(5, 5));
    for _ in 0..8 {
        sim.step().unwrap();
    }
    assert_eq!(lone_cell_position(&sim), Coord::new(0, 5));
}

#[test]
fn queued_cluster_extravasates_in_full() {
    let dir = tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.lattice.carrying_capacity = 200;
    config.vasculature.single_cell_survival = 1.0;
    config.vasculature.cluster_survival = 1.0;

    let mut sim = Simulation::new(config).unwrap();
    let initial = sim.total_cells();
    sim.queue_mut().push(1, Cluster::new(100, 100).unwrap());

    sim.step().unwrap();
    assert_eq!(sim.total_cells(), initial);
    sim.step().unwrap();

    let per_site = sim.cells_per_site();
    assert_eq!(per_site[1] + per_site[2], 200);
    assert_eq!(sim.total_cells(), initial + 200);
    assert_eq!(sim.dropped_at_extravasation(), 0);
    assert!(sim.queue().is_empty());
    assert_eq!(sim.first_populated()[0], Some(1));
    assert!(sim.first_populated()[1..].iter().flatten().all(|step| *step == 2));
}

#[test]
fn capacity_holds_under_growth_movement_and_arrivals() {
    let dir = tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.lattice.width = 31;
    config.lattice.height = 31;
    config.initial_conditions.initial_cells = 80;
    config.initial_conditions.tumor_seed_points = 25;
    config.initial_conditions.vessel_exclusion_points = 50;
    config.proliferation.doubling_time_mesenchymal = 3;
    config.proliferation.doubling_time_epithelial = 4;
    config.vasculature.single_cell_survival = 1.0;
    config.vasculature.cluster_survival = 1.0;
    config.movement.fixed = Some(FixedMovement { left: 0.2, right: 0.2, bottom: 0.2, top: 0.2 });

    let mut sim = Simulation::new(config).unwrap();
    let capacity = sim.params().carrying_capacity;
    for step in 1..=6 {
        sim.queue_mut().push(step, Cluster::new(15, 15).unwrap());
    }
    for _ in 0..25 {
        sim.step().unwrap();
        for site in 0..3 {
            assert!(sim.grid(site).unwrap().max_cell_count() <= capacity);
        }
    }
    assert!(sim.total_cells() > 80);
}

#[test]
fn sites_without_cells_keep_a_pristine_environment() {
    let dir = tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.lattice.width = 41;
    config.lattice.height = 41;
    config.initial_conditions.initial_cells = 30;
    config.initial_conditions.tumor_seed_points = 20;
    config.initial_conditions.vessel_exclusion_points = 60;

    let mut sim = Simulation::new(config).unwrap();
    for _ in 0..10 {
        sim.step().unwrap();
    }
    for site in 1..3 {
        let field = sim.field(site).unwrap();
        assert!(field.protease_raster().iter().all(|p| *p == 0.0));
        assert!(field.matrix_raster().iter().all(|m| *m == 1.0));
    }
    let primary = sim.field(0).unwrap();
    assert!(primary.protease_raster().iter().any(|p| *p > 0.0));
}

#[test]
fn seeded_runs_are_reproducible() {
    let run = || {
        let dir = tempdir().unwrap();
        let mut config = base_config(dir.path());
        config.lattice.width = 41;
        config.lattice.height = 41;
        config.initial_conditions.initial_cells = 40;
        config.initial_conditions.tumor_seed_points = 20;
        config.initial_conditions.vessel_exclusion_points = 60;
        config.proliferation.doubling_time_mesenchymal = 4;
        config.movement.fixed = Some(FixedMovement { left: 0.1, right: 0.3, bottom: 0.2, top: 0.1 });
        let mut sim = Simulation::new(config).unwrap();
        for _ in 0..12 {
            sim.step().unwrap();
        }
        (sim.agents().to_vec(), sim.field(0).unwrap().matrix_raster().to_vec())
    };
    assert_eq!(run(), run());
}

#[test]
fn statistics_are_recorded_at_checkpoints() {
    let dir = tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.lattice.width = 41;
    config.lattice.height = 41;
    config.initial_conditions.initial_cells = 10;
    config.initial_conditions.mesenchymal_proportion = 0.5;
    config.initial_conditions.tumor_seed_points = 20;
    config.initial_conditions.vessel_exclusion_points = 60;
    config.timing.checkpoint_period = 2;
    config.timing.max_steps = 5;

    let mut sim = Simulation::new(config).unwrap();
    sim.queue_mut().push(50, Cluster::single(Phenotype::Epithelial));
    sim.run().unwrap();

    let snapshots = sim.get_recorded_snapshots();
    assert_eq!(snapshots.iter().map(|s| s.step).collect::<Vec<_>>(), vec![2, 4, 5]);
    let last = snapshots.last().unwrap();
    assert_eq!(last.total_cells, 10);
    assert_eq!(last.cells_per_site, vec![10, 0, 0]);
    assert_eq!((last.mesenchymal_cells, last.epithelial_cells), (5, 5));
    assert_eq!(last.vasculature_cells, 1);
}
