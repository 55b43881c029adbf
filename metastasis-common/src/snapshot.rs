use serde::{Serialize, Deserialize};

/// Aggregate population figures recorded at every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Absolute simulation step at which the snapshot was taken.
    pub step: u64,
    /// Cells on every site combined, excluding the vasculature.
    pub total_cells: u64,
    /// Live cells per site, primary first.
    pub cells_per_site: Vec<u64>,
    pub mesenchymal_cells: u64,
    pub epithelial_cells: u64,
    /// Cells currently in transit.
    pub vasculature_cells: u64,
    /// Extravasating cells dropped so far because every landing spot was full.
    pub dropped_at_extravasation: u64,
}
