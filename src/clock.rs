use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use metastasis_common::ModelParams;

use crate::agent::{AgentId, Phenotype};
use crate::SimRng;

/// Position of the run's random stream, enough to rebuild it exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    pub seed: [u8; 32],
    /// ChaCha word position, kept as a string so JSON readers never round it.
    pub word_pos: String,
}

impl RngState {
    pub fn capture(rng: &SimRng) -> Self {
        Self { seed: rng.get_seed(), word_pos: rng.get_word_pos().to_string() }
    }

    pub fn restore(&self) -> Option<SimRng> {
        let word_pos: u128 = self.word_pos.parse().ok()?;
        let mut rng = SimRng::from_seed(self.seed);
        rng.set_word_pos(word_pos);
        Some(rng)
    }
}

/// Everything about time that must survive a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockState {
    /// Completed steps since the very first run.
    pub current_step: u64,
    pub countdown_mesenchymal: u32,
    pub countdown_epithelial: u32,
    pub next_agent_id: AgentId,
    pub rng: RngState,
    /// Step at which each site first held a cell. Persisted as its own table.
    #[serde(skip)]
    pub first_populated: Vec<Option<u64>>,
}

impl ClockState {
    pub fn new(params: &ModelParams, rng: &SimRng) -> Self {
        Self {
            current_step: 0,
            countdown_mesenchymal: params.doubling_time_mesenchymal,
            countdown_epithelial: params.doubling_time_epithelial,
            next_agent_id: 0,
            rng: RngState::capture(rng),
            first_populated: vec![None; params.sites],
        }
    }

    /// Phenotypes due to proliferate this step. Advances both countdowns.
    ///
    /// A countdown fires when it reads zero at a non-zero step and is then reset to
    /// its doubling time; both countdowns are decremented afterwards.
    pub fn proliferation_due(&mut self, params: &ModelParams) -> Vec<Phenotype> {
        let step = self.current_step;
        let mut due = Vec::new();
        if self.countdown_mesenchymal == 0 && step != 0 {
            due.push(Phenotype::Mesenchymal);
            self.countdown_mesenchymal = params.doubling_time_mesenchymal;
        }
        if self.countdown_epithelial == 0 && step != 0 {
            due.push(Phenotype::Epithelial);
            self.countdown_epithelial = params.doubling_time_epithelial;
        }
        self.countdown_mesenchymal = self.countdown_mesenchymal.saturating_sub(1);
        self.countdown_epithelial = self.countdown_epithelial.saturating_sub(1);
        due
    }

    /// Records `step` for every site that holds cells for the first time.
    pub fn mark_populated(&mut self, live_cells: impl IntoIterator<Item = u64>, step: u64) {
        for (slot, cells) in self.first_populated.iter_mut().zip(live_cells) {
            if slot.is_none() && cells > 0 {
                *slot = Some(step);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metastasis_common::SimulationConfig;
    use rand::Rng;

    fn params(mesenchymal: u32, epithelial: u32) -> ModelParams {
        let mut config = SimulationConfig::default();
        config.proliferation.doubling_time_mesenchymal = mesenchymal;
        config.proliferation.doubling_time_epithelial = epithelial;
        config.get_model_params()
    }

    #[test]
    fn fires_at_multiples_of_the_doubling_time() {
        let params = params(3, 5);
        let rng = SimRng::seed_from_u64(0);
        let mut clock = ClockState::new(&params, &rng);
        let mut fired = Vec::new();
        for step in 0..16 {
            clock.current_step = step;
            for phenotype in clock.proliferation_due(&params) {
                fired.push((step, phenotype));
            }
        }
        assert_eq!(
            fired,
            vec![
                (3, Phenotype::Mesenchymal),
                (5, Phenotype::Epithelial),
                (6, Phenotype::Mesenchymal),
                (9, Phenotype::Mesenchymal),
                (10, Phenotype::Epithelial),
                (12, Phenotype::Mesenchymal),
                (15, Phenotype::Mesenchymal),
                (15, Phenotype::Epithelial),
            ]
        );
    }

    #[test]
    fn first_populated_is_recorded_once() {
        let params = params(3, 5);
        let rng = SimRng::seed_from_u64(0);
        let mut clock = ClockState::new(&params, &rng);
        clock.mark_populated([10, 0, 0], 1);
        clock.mark_populated([10, 4, 0], 7);
        clock.mark_populated([10, 4, 0], 9);
        assert_eq!(clock.first_populated, vec![Some(1), Some(7), None]);
    }

    #[test]
    fn rng_state_resumes_the_stream() {
        let mut rng = SimRng::seed_from_u64(1234);
        for _ in 0..37 {
            let _: u64 = rng.random();
        }
        let state = RngState::capture(&rng);
        let json = serde_json::to_string(&state).unwrap();
        let mut resumed = serde_json::from_str::<RngState>(&json).unwrap().restore().unwrap();
        for _ in 0..10 {
            assert_eq!(rng.random::<u64>(), resumed.random::<u64>());
        }
    }
}
