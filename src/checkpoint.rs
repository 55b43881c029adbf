//! Resumable snapshots of the full model state.
//!
//! Layout of an output directory:
//!
//! ```text
//! CellsData.csv                                   cumulative agent log
//! Protease/Protease-{site}site-{step}step.csv    protease raster, one row per x
//! Matrix/Matrix-{site}site-{step}step.csv        matrix raster, one row per x
//! Vasculature/Vasculature-{step}step.json        {"arrival step": [[m, e], ...]}
//! FirstPopulated/FirstPopulated-{step}step.csv   one row, one column per site
//! Clock/Clock-{step}step.json                    step, countdowns, ids, rng
//! config.toml                                    configuration of the run
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use metastasis_common::ModelParams;

use crate::agent::{Agent, CellAgent, Phenotype, VesselAgent};
use crate::clock::ClockState;
use crate::error::{ModelError, ModelResult};
use crate::field::EnvironmentField;
use crate::grid::Coord;
use crate::vasculature::{Cluster, VasculatureQueue};

pub const AGENT_LOG: &str = "CellsData.csv";
pub const CONFIG_FILE: &str = "config.toml";
const PROTEASE_DIR: &str = "Protease";
const MATRIX_DIR: &str = "Matrix";
const VASCULATURE_DIR: &str = "Vasculature";
const FIRST_POPULATED_DIR: &str = "FirstPopulated";
const CLOCK_DIR: &str = "Clock";

const CELL_TAG: &str = "cell";
const VESSEL_TAG: &str = "vessel";

/// One row of the agent log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub step: u64,
    pub id: u64,
    pub x: u32,
    pub y: u32,
    pub agent_type: String,
    pub phenotype: Option<String>,
    pub ruptured: Option<bool>,
    pub site: usize,
}

impl AgentRecord {
    fn from_agent(step: u64, agent: &Agent) -> Self {
        let pos = agent.pos();
        let (agent_type, phenotype, ruptured) = match agent {
            Agent::Cell(cell) => (CELL_TAG, Some(cell.phenotype.as_str().to_string()), None),
            Agent::Vessel(vessel) => (VESSEL_TAG, None, Some(vessel.ruptured)),
        };
        Self {
            step,
            id: agent.id(),
            x: pos.x,
            y: pos.y,
            agent_type: agent_type.to_string(),
            phenotype,
            ruptured,
            site: agent.site(),
        }
    }

    fn into_agent(self, path: &Path, params: &ModelParams) -> ModelResult<Agent> {
        if self.site >= params.sites {
            return Err(ModelError::malformed(
                path,
                format!("agent {} is on site {} but only {} sites exist", self.id, self.site, params.sites),
            ));
        }
        if self.x >= params.width || self.y >= params.height {
            return Err(ModelError::OutOfBounds {
                site: self.site,
                x: self.x as i64,
                y: self.y as i64,
                width: params.width,
                height: params.height,
            });
        }
        let pos = Coord::new(self.x, self.y);
        match self.agent_type.as_str() {
            CELL_TAG => {
                let tag = self
                    .phenotype
                    .ok_or_else(|| ModelError::malformed(path, format!("cell {} has no phenotype", self.id)))?;
                let phenotype: Phenotype = tag.parse()?;
                Ok(Agent::Cell(CellAgent::new(self.id, phenotype, pos, self.site)))
            }
            VESSEL_TAG => {
                let ruptured = self
                    .ruptured
                    .ok_or_else(|| ModelError::malformed(path, format!("vessel {} has no rupture flag", self.id)))?;
                Ok(Agent::Vessel(VesselAgent { id: self.id, ruptured, pos, site: self.site }))
            }
            other => Err(ModelError::UnknownAgentType(other.to_string())),
        }
    }
}

/// Borrowed view of everything a checkpoint persists.
pub struct CheckpointView<'a> {
    pub agents: &'a [Agent],
    pub fields: &'a [EnvironmentField],
    pub queue: &'a VasculatureQueue,
    pub clock: &'a ClockState,
}

/// State rebuilt from a checkpoint directory.
#[derive(Debug)]
pub struct LoadedCheckpoint {
    pub step: u64,
    pub agents: Vec<Agent>,
    pub fields: Vec<EnvironmentField>,
    pub queue: VasculatureQueue,
    pub clock: ClockState,
}

fn protease_path(dir: &Path, site: usize, step: u64) -> PathBuf {
    dir.join(PROTEASE_DIR).join(format!("Protease-{}site-{}step.csv", site, step))
}

fn matrix_path(dir: &Path, site: usize, step: u64) -> PathBuf {
    dir.join(MATRIX_DIR).join(format!("Matrix-{}site-{}step.csv", site, step))
}

fn vasculature_path(dir: &Path, step: u64) -> PathBuf {
    dir.join(VASCULATURE_DIR).join(format!("Vasculature-{}step.json", step))
}

fn first_populated_path(dir: &Path, step: u64) -> PathBuf {
    dir.join(FIRST_POPULATED_DIR).join(format!("FirstPopulated-{}step.csv", step))
}

fn clock_path(dir: &Path, step: u64) -> PathBuf {
    dir.join(CLOCK_DIR).join(format!("Clock-{}step.json", step))
}

fn csv_error(path: &Path, e: csv::Error) -> ModelError {
    ModelError::malformed(path, e)
}

/// Creates the output directory tree.
pub fn prepare_output_dir(dir: &Path) -> ModelResult<()> {
    for sub in [PROTEASE_DIR, MATRIX_DIR, VASCULATURE_DIR, FIRST_POPULATED_DIR, CLOCK_DIR] {
        let path = dir.join(sub);
        fs::create_dir_all(&path).map_err(|e| ModelError::io(&path, e))?;
    }
    Ok(())
}

/// Starts a resumed run's agent log with the rows of the run it resumes.
pub fn carry_over_agent_log(from: &Path, to: &Path) -> ModelResult<()> {
    let source = from.join(AGENT_LOG);
    let target = to.join(AGENT_LOG);
    if source == target {
        return Ok(());
    }
    fs::copy(&source, &target).map_err(|e| ModelError::io(&target, e))?;
    Ok(())
}

/// Writes every artifact for `view.clock.current_step`.
pub fn write_checkpoint(dir: &Path, view: &CheckpointView<'_>) -> ModelResult<()> {
    let step = view.clock.current_step;
    append_agent_log(&dir.join(AGENT_LOG), step, view.agents)?;
    for (site, field) in view.fields.iter().enumerate() {
        write_raster(&protease_path(dir, site, step), field.width(), field.height(), field.protease_raster())?;
        write_raster(&matrix_path(dir, site, step), field.width(), field.height(), field.matrix_raster())?;
    }
    write_vasculature(&vasculature_path(dir, step), view.queue)?;
    write_first_populated(&first_populated_path(dir, step), &view.clock.first_populated)?;
    write_json(&clock_path(dir, step), view.clock)?;
    info!("Checkpoint written for step {} in {}.", step, dir.display());
    Ok(())
}

/// Restores the most recent checkpoint found in `dir`.
pub fn load_checkpoint(dir: &Path, params: &ModelParams) -> ModelResult<LoadedCheckpoint> {
    let step = latest_checkpoint_step(dir)?;

    let clock_file = clock_path(dir, step);
    let mut clock: ClockState = read_json(&clock_file)?;
    if clock.current_step != step {
        return Err(ModelError::malformed(
            &clock_file,
            format!("records step {} but is named for step {}", clock.current_step, step),
        ));
    }
    clock.first_populated = read_first_populated(&first_populated_path(dir, step), params.sites)?;

    let log_path = dir.join(AGENT_LOG);
    let agents = read_agent_log(&log_path, step, params)?;
    if let Some(max_id) = agents.iter().map(Agent::id).max() {
        if max_id >= clock.next_agent_id {
            return Err(ModelError::malformed(
                &clock_file,
                format!("next agent id {} is not above logged id {}", clock.next_agent_id, max_id),
            ));
        }
    }

    let mut fields = Vec::with_capacity(params.sites);
    for site in 0..params.sites {
        let protease_file = protease_path(dir, site, step);
        let protease = read_raster(&protease_file, params.width, params.height)?;
        let matrix = read_raster(&matrix_path(dir, site, step), params.width, params.height)?;
        let field = EnvironmentField::from_rasters(params.width, params.height, protease, matrix)
            .ok_or_else(|| ModelError::malformed(&protease_file, "raster size does not match the lattice"))?;
        fields.push(field);
    }

    let queue = read_vasculature(&vasculature_path(dir, step))?;

    info!("Loaded checkpoint for step {} from {} ({} agents).", step, dir.display(), agents.len());
    Ok(LoadedCheckpoint { step, agents, fields, queue, clock })
}

/// Highest step with a clock artifact.
pub fn latest_checkpoint_step(dir: &Path) -> ModelResult<u64> {
    let clock_dir = dir.join(CLOCK_DIR);
    if !clock_dir.is_dir() {
        return Err(ModelError::MissingArtifact(clock_dir));
    }
    let entries = fs::read_dir(&clock_dir).map_err(|e| ModelError::io(&clock_dir, e))?;
    let mut latest = None;
    for entry in entries {
        let entry = entry.map_err(|e| ModelError::io(&clock_dir, e))?;
        let name = entry.file_name();
        let step = name
            .to_str()
            .and_then(|n| n.strip_prefix("Clock-"))
            .and_then(|n| n.strip_suffix("step.json"))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(step) = step {
            latest = latest.max(Some(step));
        }
    }
    latest.ok_or(ModelError::MissingArtifact(clock_dir))
}

fn append_agent_log(path: &Path, step: u64, agents: &[Agent]) -> ModelResult<()> {
    let write_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ModelError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new().has_headers(write_header).from_writer(file);
    for agent in agents {
        writer
            .serialize(AgentRecord::from_agent(step, agent))
            .map_err(|e| csv_error(path, e))?;
    }
    writer.flush().map_err(|e| ModelError::io(path, e))?;
    Ok(())
}

fn read_agent_log(path: &Path, step: u64, params: &ModelParams) -> ModelResult<Vec<Agent>> {
    if !path.is_file() {
        return Err(ModelError::MissingArtifact(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path).map_err(|e| csv_error(path, e))?;
    let mut agents = Vec::new();
    for record in reader.deserialize::<AgentRecord>() {
        let record = record.map_err(|e| csv_error(path, e))?;
        if record.step == step {
            agents.push(record.into_agent(path, params)?);
        }
    }
    // Activation order and vessel lists depend on creation order.
    agents.sort_by_key(Agent::id);
    Ok(agents)
}

fn write_raster(path: &Path, width: u32, height: u32, data: &[f64]) -> ModelResult<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
    let mut header = Vec::with_capacity(height as usize + 1);
    header.push("x".to_string());
    header.extend((0..height).map(|y| y.to_string()));
    writer.write_record(&header).map_err(|e| csv_error(path, e))?;

    for (x, row) in data.chunks(height as usize).take(width as usize).enumerate() {
        let mut record = Vec::with_capacity(height as usize + 1);
        record.push(x.to_string());
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record).map_err(|e| csv_error(path, e))?;
    }
    writer.flush().map_err(|e| ModelError::io(path, e))?;
    Ok(())
}

fn read_raster(path: &Path, width: u32, height: u32) -> ModelResult<Vec<f64>> {
    if !path.is_file() {
        return Err(ModelError::MissingArtifact(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path).map_err(|e| csv_error(path, e))?;
    let columns = reader.headers().map_err(|e| csv_error(path, e))?.len();
    if columns != height as usize + 1 {
        return Err(ModelError::malformed(path, format!("expected {} columns, found {}", height + 1, columns)));
    }

    let mut data = Vec::with_capacity(width as usize * height as usize);
    let mut rows = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(path, e))?;
        let x: usize = record
            .get(0)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ModelError::malformed(path, format!("row {} has no x index", rows)))?;
        if x != rows {
            return Err(ModelError::malformed(path, format!("row {} is labelled x = {}", rows, x)));
        }
        for value in record.iter().skip(1) {
            let parsed: f64 = value
                .parse()
                .map_err(|_| ModelError::malformed(path, format!("'{}' at x = {} is not a number", value, x)))?;
            data.push(parsed);
        }
        rows += 1;
    }
    if rows != width as usize {
        return Err(ModelError::malformed(path, format!("expected {} rows, found {}", width, rows)));
    }
    Ok(data)
}

fn write_vasculature(path: &Path, queue: &VasculatureQueue) -> ModelResult<()> {
    let encoded: BTreeMap<String, Vec<[u32; 2]>> = queue
        .entries()
        .iter()
        .map(|(step, clusters)| (step.to_string(), clusters.iter().map(Cluster::as_pair).collect()))
        .collect();
    write_json(path, &encoded)
}

fn read_vasculature(path: &Path) -> ModelResult<VasculatureQueue> {
    let encoded: BTreeMap<String, Vec<[i64; 2]>> = read_json(path)?;
    let mut entries = BTreeMap::new();
    for (key, pairs) in encoded {
        let step: u64 = key
            .parse()
            .map_err(|_| ModelError::malformed(path, format!("'{}' is not a step number", key)))?;
        let clusters = pairs
            .into_iter()
            .map(|[m, e]| Cluster::from_signed(m, e))
            .collect::<ModelResult<Vec<_>>>()?;
        entries.insert(step, clusters);
    }
    Ok(VasculatureQueue::from_entries(entries))
}

fn write_first_populated(path: &Path, first_populated: &[Option<u64>]) -> ModelResult<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
    let header: Vec<String> = (0..first_populated.len()).map(|site| format!("site_{}", site)).collect();
    writer.write_record(&header).map_err(|e| csv_error(path, e))?;
    let row: Vec<String> = first_populated
        .iter()
        .map(|step| step.map(|s| s as i64).unwrap_or(-1).to_string())
        .collect();
    writer.write_record(&row).map_err(|e| csv_error(path, e))?;
    writer.flush().map_err(|e| ModelError::io(path, e))?;
    Ok(())
}

fn read_first_populated(path: &Path, sites: usize) -> ModelResult<Vec<Option<u64>>> {
    if !path.is_file() {
        return Err(ModelError::MissingArtifact(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path).map_err(|e| csv_error(path, e))?;
    let mut records = reader.records();
    let record = records
        .next()
        .ok_or_else(|| ModelError::malformed(path, "no data row"))?
        .map_err(|e| csv_error(path, e))?;
    if records.next().is_some() {
        return Err(ModelError::malformed(path, "more than one data row"));
    }
    if record.len() != sites {
        return Err(ModelError::malformed(path, format!("expected {} sites, found {}", sites, record.len())));
    }
    record
        .iter()
        .map(|value| match value.parse::<i64>() {
            Ok(-1) => Ok(None),
            Ok(step) if step >= 0 => Ok(Some(step as u64)),
            _ => Err(ModelError::malformed(path, format!("'{}' is not a step or -1", value))),
        })
        .collect()
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> ModelResult<()> {
    let file = File::create(path).map_err(|e| ModelError::io(path, e))?;
    serde_json::to_writer(file, value).map_err(|e| ModelError::malformed(path, e))?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> ModelResult<T> {
    if !path.is_file() {
        return Err(ModelError::MissingArtifact(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|e| ModelError::io(path, e))?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| ModelError::malformed(path, e))
}
