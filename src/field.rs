use log::warn;
use rayon::prelude::*;

use metastasis_common::ModelParams;

use crate::grid::{Coord, Grid};

const MAX_RANGE_WARNINGS: usize = 8;

/// Protease and matrix rasters for one site, with ping-pong buffers.
///
/// Rasters are x-major: `index = x * height + y`.
#[derive(Debug, Clone)]
pub struct EnvironmentField {
    width: u32,
    height: u32,

    // Current step's values
    protease: Vec<f64>,
    matrix: Vec<f64>,

    // Next step's values, written by the sweep and swapped in afterwards
    protease_next: Vec<f64>,
    matrix_next: Vec<f64>,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldReport {
    pub matrix_out_of_range: usize,
}

impl EnvironmentField {
    /// A pristine site: no protease, intact matrix.
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            protease: vec![0.0; len],
            matrix: vec![1.0; len],
            protease_next: vec![0.0; len],
            matrix_next: vec![1.0; len],
        }
    }

    /// Builds a field from restored rasters. Lengths must match the lattice.
    pub fn from_rasters(width: u32, height: u32, protease: Vec<f64>, matrix: Vec<f64>) -> Option<Self> {
        let len = width as usize * height as usize;
        if protease.len() != len || matrix.len() != len {
            return None;
        }
        Some(Self {
            width,
            height,
            protease_next: protease.clone(),
            matrix_next: matrix.clone(),
            protease,
            matrix,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline(always)]
    fn index(&self, pos: Coord) -> usize {
        pos.x as usize * self.height as usize + pos.y as usize
    }

    pub fn protease(&self, pos: Coord) -> f64 {
        self.protease[self.index(pos)]
    }

    pub fn matrix(&self, pos: Coord) -> f64 {
        self.matrix[self.index(pos)]
    }

    pub fn protease_raster(&self) -> &[f64] {
        &self.protease
    }

    pub fn matrix_raster(&self) -> &[f64] {
        &self.matrix
    }

    /// Swaps the current and next buffers.
    pub fn swap_buffers(&mut self) {
        std::mem::swap(&mut self.protease, &mut self.protease_next);
        std::mem::swap(&mut self.matrix, &mut self.matrix_next);
    }

    /// Advances both rasters by one step.
    ///
    /// Every coordinate reads only the previous buffers, so the sweep is synchronous
    /// regardless of the order rows are processed in. Neighbors past the edge are
    /// reflected onto the opposite neighbor (zero flux).
    pub fn advance(&mut self, grid: &Grid, params: &ModelParams) -> FieldReport {
        let height = self.height as usize;
        let width = self.width as usize;
        let mesenchymal = grid.mesenchymal_counts();

        let protease_cur = &self.protease;
        let matrix_cur = &self.matrix;
        let mesenchymal_slice = &mesenchymal;

        self.protease_next
            .par_chunks_mut(height)
            .zip(self.matrix_next.par_chunks_mut(height))
            .enumerate()
            .for_each(|(x, (protease_row, matrix_row))| {
                let left_x = if x > 0 { x - 1 } else { x + 1 };
                let right_x = if x + 1 < width { x + 1 } else { x - 1 };
                for y in 0..height {
                    let bottom_y = if y > 0 { y - 1 } else { y + 1 };
                    let top_y = if y + 1 < height { y + 1 } else { y - 1 };

                    let idx = x * height + y;
                    let neighbor_sum = protease_cur[left_x * height + y]
                        + protease_cur[right_x * height + y]
                        + protease_cur[x * height + bottom_y]
                        + protease_cur[x * height + top_y];
                    let m_count = mesenchymal_slice[idx] as f64;

                    let protease = params.diffusion_number * neighbor_sum
                        + protease_cur[idx] * params.retention
                        + params.tau * params.production * m_count;
                    let matrix = matrix_cur[idx]
                        * (1.0 - params.tau * (params.gamma1 * m_count + params.gamma2 * protease));

                    protease_row[y] = protease;
                    matrix_row[y] = matrix;
                }
            });

        let report = self.check_matrix_range(grid.site());
        self.swap_buffers();
        report
    }

    // Scans the freshly computed matrix raster. Values are kept as computed.
    fn check_matrix_range(&self, site: usize) -> FieldReport {
        let mut out_of_range = 0;
        for (idx, value) in self.matrix_next.iter().enumerate() {
            if !(0.0..=1.0).contains(value) {
                out_of_range += 1;
                if out_of_range <= MAX_RANGE_WARNINGS {
                    let height = self.height as usize;
                    warn!(
                        "Matrix value {:.6} outside [0, 1] at ({}, {}) on site {}.",
                        value,
                        idx / height,
                        idx % height,
                        site
                    );
                }
            }
        }
        if out_of_range > MAX_RANGE_WARNINGS {
            warn!(
                "{} matrix values outside [0, 1] on site {} this step; the protease diffusion rate is probably too high.",
                out_of_range, site
            );
        }
        FieldReport { matrix_out_of_range: out_of_range }
    }
}
