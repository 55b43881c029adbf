//! Resuming from checkpoint directories.

use metastasis_common::{FixedMovement, SimulationConfig};
use metastasis_engine::movement::{CellDecision, FixedDirections, LocalView, MovementPolicy};
use metastasis_engine::{ModelError, SimRng, Simulation};
use rand::Rng;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Wanders like `FixedDirections` and now and then sends a primary cell into the vasculature.
struct Wandering(FixedDirections);

impl Wandering {
    fn new() -> Self {
        Wandering(FixedDirections::new(FixedMovement { left: 0.2, right: 0.2, bottom: 0.2, top: 0.2 }))
    }
}

impl MovementPolicy for Wandering {
    fn decide(&mut self, view: &LocalView<'_>, rng: &mut SimRng) -> CellDecision {
        if view.site() == 0 && rng.random::<f64>() < 0.05 {
            return CellDecision::Intravasate;
        }
        self.0.decide(view, rng)
    }
}

fn config(output: &Path, max_steps: u64) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.lattice.width = 41;
    config.lattice.height = 41;
    config.initial_conditions.initial_cells = 60;
    config.initial_conditions.tumor_seed_points = 30;
    config.initial_conditions.vessel_exclusion_points = 60;
    config.initial_conditions.seed = Some(99);
    config.proliferation.doubling_time_mesenchymal = 3;
    config.proliferation.doubling_time_epithelial = 4;
    config.vasculature.single_cell_survival = 1.0;
    config.vasculature.cluster_survival = 1.0;
    config.vasculature.transit_steps = 3;
    config.timing.max_steps = max_steps;
    config.timing.checkpoint_period = 5;
    config.output.directory = output.display().to_string();
    config
}

fn run_fresh(output: &Path, max_steps: u64) -> Simulation {
    let mut sim = Simulation::new(config(output, max_steps)).unwrap().with_policy(Wandering::new());
    sim.run().unwrap();
    sim
}

fn resume(from: &Path, output: &Path, max_steps: u64) -> anyhow::Result<Simulation> {
    Ok(Simulation::from_checkpoint(config(output, max_steps), from)?.with_policy(Wandering::new()))
}

fn model_error(result: anyhow::Result<Simulation>) -> ModelError {
    let err = result.err().expect("reload should fail");
    match err.downcast::<ModelError>() {
        Ok(model_error) => model_error,
        Err(other) => panic!("expected a model error, got {:#}", other),
    }
}

#[test]
fn reload_restores_the_saved_state() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    let original = run_fresh(first.path(), 7);
    let resumed = resume(first.path(), second.path(), 4).unwrap();

    assert_eq!(resumed.current_step(), 7);
    assert_eq!(resumed.next_agent_id(), original.next_agent_id());
    assert_eq!(resumed.agents(), original.agents());
    assert_eq!(resumed.queue(), original.queue());
    assert_eq!(resumed.cells_per_site(), original.cells_per_site());
    assert_eq!(resumed.vasculature_cells(), original.vasculature_cells());
    assert_eq!(resumed.first_populated(), original.first_populated());
    for site in 0..3 {
        let (a, b) = (resumed.field(site).unwrap(), original.field(site).unwrap());
        for (x, y) in a.protease_raster().iter().zip(b.protease_raster()) {
            assert!((x - y).abs() <= 1e-12);
        }
        for (x, y) in a.matrix_raster().iter().zip(b.matrix_raster()) {
            assert!((x - y).abs() <= 1e-12);
        }
    }
    // The resumed run's log starts with everything the first run wrote.
    let prior = fs::read_to_string(first.path().join("CellsData.csv")).unwrap();
    let carried = fs::read_to_string(second.path().join("CellsData.csv")).unwrap();
    assert_eq!(prior, carried);
}

#[test]
fn resumed_run_matches_an_uninterrupted_one() {
    let straight = tempdir().unwrap();
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();

    let uninterrupted = run_fresh(straight.path(), 12);
    run_fresh(first.path(), 5);
    let mut continued = resume(first.path(), second.path(), 7).unwrap();
    continued.run().unwrap();

    assert_eq!(continued.current_step(), 12);
    assert_eq!(continued.agents(), uninterrupted.agents());
    assert_eq!(continued.queue(), uninterrupted.queue());
    assert_eq!(continued.next_agent_id(), uninterrupted.next_agent_id());
    assert_eq!(
        continued.field(0).unwrap().matrix_raster(),
        uninterrupted.field(0).unwrap().matrix_raster()
    );
    let steps: Vec<u64> = continued.get_recorded_snapshots().iter().map(|s| s.step).collect();
    assert_eq!(steps, vec![10, 12]);
}

#[test]
fn resuming_into_the_same_directory_keeps_appending() {
    let dir = tempdir().unwrap();
    run_fresh(dir.path(), 5);
    let mut resumed = resume(dir.path(), dir.path(), 5).unwrap();
    resumed.run().unwrap();

    let log = fs::read_to_string(dir.path().join("CellsData.csv")).unwrap();
    assert_eq!(log.matches("step,id").count(), 1);
    assert!(dir.path().join("Clock").join("Clock-10step.json").is_file());
}

#[test]
fn missing_raster_is_fatal() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    run_fresh(first.path(), 5);
    fs::remove_file(first.path().join("Matrix").join("Matrix-1site-5step.csv")).unwrap();

    let err = model_error(resume(first.path(), second.path(), 1));
    assert!(matches!(err, ModelError::MissingArtifact(path) if path.ends_with("Matrix-1site-5step.csv")));
}

#[test]
fn corrupt_queue_is_fatal() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    run_fresh(first.path(), 5);
    fs::write(
        first.path().join("Vasculature").join("Vasculature-5step.json"),
        r#"{"9":[[2,-1]]}"#,
    )
    .unwrap();

    let err = model_error(resume(first.path(), second.path(), 1));
    assert!(matches!(err, ModelError::NegativeClusterCount { mesenchymal: 2, epithelial: -1 }));
}

#[test]
fn unknown_phenotype_in_the_log_is_fatal() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    run_fresh(first.path(), 5);
    let log_path = first.path().join("CellsData.csv");
    let log = fs::read_to_string(&log_path).unwrap();
    fs::write(&log_path, log.replace("epithelial", "quiescent")).unwrap();

    let err = model_error(resume(first.path(), second.path(), 1));
    assert!(matches!(err, ModelError::UnknownPhenotype(tag) if tag == "quiescent"));
}

#[test]
fn empty_directory_has_nothing_to_resume() {
    let empty = tempdir().unwrap();
    let output = tempdir().unwrap();
    let err = model_error(resume(empty.path(), output.path(), 1));
    assert!(matches!(err, ModelError::MissingArtifact(_)));
}
