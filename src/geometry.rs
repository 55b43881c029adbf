use crate::grid::Coord;

/// Lattice points of a disk centred on the lattice, holding roughly `target_points`.
#[derive(Debug, Clone)]
pub struct QuasiCircle {
    width: u32,
    height: u32,
    /// Membership mask, x-major like the rasters.
    mask: Vec<bool>,
    /// Points inside the disk with a per-point occupancy counter.
    points: Vec<(Coord, u32)>,
}

impl QuasiCircle {
    pub fn new(target_points: u32, width: u32, height: u32) -> Self {
        let cx = (width as f64 - 1.0) / 2.0;
        let cy = (height as f64 - 1.0) / 2.0;
        let radius_sq = target_points as f64 / std::f64::consts::PI;

        let mut mask = vec![false; width as usize * height as usize];
        let mut points = Vec::new();
        if target_points > 0 {
            for x in 0..width {
                for y in 0..height {
                    let dx = x as f64 - cx;
                    let dy = y as f64 - cy;
                    if dx * dx + dy * dy <= radius_sq {
                        mask[x as usize * height as usize + y as usize] = true;
                        points.push((Coord::new(x, y), 0));
                    }
                }
            }
            // A tiny disk between lattice points still gets its centre.
            if points.is_empty() {
                let centre = Coord::new(width / 2, height / 2);
                mask[centre.x as usize * height as usize + centre.y as usize] = true;
                points.push((centre, 0));
            }
        }
        Self { width, height, mask, points }
    }

    pub fn contains(&self, pos: Coord) -> bool {
        pos.x < self.width && pos.y < self.height && self.mask[pos.x as usize * self.height as usize + pos.y as usize]
    }

    pub fn points(&self) -> &[(Coord, u32)] {
        &self.points
    }

    pub fn into_points(self) -> Vec<(Coord, u32)> {
        self.points
    }

    pub fn into_mask(self) -> Vec<bool> {
        self.mask
    }
}
