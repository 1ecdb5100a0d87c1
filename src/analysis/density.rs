use crate::state::BoxState;
use crate::EPS;
use nalgebra::Vector2;

/// Oriented frame of a box: points are expressed along the box axes relative to its center.
///
/// Quads use their axis-aligned bounds.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxFrame {
    pub center: Vector2<f32>,
    pub axis_x: Vector2<f32>,
    pub axis_y: Vector2<f32>,
    pub size: Vector2<f32>,
}

impl BoxFrame {
    pub fn from_state(state: &BoxState) -> Self {
        let rotation = if state.quad.is_some() { 0.0 } else { state.rotation };
        Self::new(state.center(), state.scaled_size(), rotation)
    }

    pub fn new(center: Vector2<f32>, size: Vector2<f32>, rotation: f32) -> Self {
        let (s, c) = rotation.sin_cos();
        Self {
            center,
            axis_x: Vector2::new(c, s),
            axis_y: Vector2::new(-s, c),
            size: Vector2::new(size.x.abs().max(EPS), size.y.abs().max(EPS)),
        }
    }

    /// Offset from the center along the box axes
    ///
    pub fn local(&self, p: &Vector2<f32>) -> Vector2<f32> {
        let d = p - self.center;
        Vector2::new(d.dot(&self.axis_x), d.dot(&self.axis_y))
    }

    /// Position in unit box coordinates, `(0, 0)` is the top-left corner
    ///
    pub fn unit(&self, p: &Vector2<f32>) -> Vector2<f32> {
        let l = self.local(p);
        Vector2::new(l.x / self.size.x + 0.5, l.y / self.size.y + 0.5)
    }
}

/// `N x N` grid of accumulated weight over a box
///
#[derive(Debug, Clone, PartialEq)]
pub struct DensityGrid {
    size: usize,
    frame: BoxFrame,
    cells: Vec<f32>,
}

impl DensityGrid {
    pub fn new(size: usize, frame: BoxFrame) -> Self {
        let size = size.max(1);
        Self {
            size,
            frame,
            cells: vec![0.0; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cells(&self) -> &[f32] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<f32> {
        self.cells
    }

    /// Continuous grid coordinates (cell centers at integers), clamped to the grid
    ///
    fn grid_position(&self, p: &Vector2<f32>) -> Option<Vector2<f32>> {
        let u = self.frame.unit(p);
        if !u.x.is_finite() || !u.y.is_finite() {
            return None;
        }
        let max = (self.size - 1) as f32;
        let n = self.size as f32;
        Some(Vector2::new(
            (u.x * n - 0.5).clamp(0.0, max),
            (u.y * n - 0.5).clamp(0.0, max),
        ))
    }

    /// The four cells around `g` with their bilinear weights
    ///
    fn bilinear_cells(&self, g: &Vector2<f32>) -> [(usize, f32); 4] {
        let x0 = g.x.floor() as usize;
        let y0 = g.y.floor() as usize;
        let x1 = (x0 + 1).min(self.size - 1);
        let y1 = (y0 + 1).min(self.size - 1);
        let fx = g.x - x0 as f32;
        let fy = g.y - y0 as f32;
        [
            (y0 * self.size + x0, (1.0 - fx) * (1.0 - fy)),
            (y0 * self.size + x1, fx * (1.0 - fy)),
            (y1 * self.size + x0, (1.0 - fx) * fy),
            (y1 * self.size + x1, fx * fy),
        ]
    }

    pub fn add_bilinear(&mut self, p: &Vector2<f32>, weight: f32) {
        if let Some(g) = self.grid_position(p) {
            for (idx, w) in self.bilinear_cells(&g) {
                self.cells[idx] += w * weight;
            }
        }
    }

    pub fn add_nearest(&mut self, p: &Vector2<f32>, weight: f32) {
        if let Some(g) = self.grid_position(p) {
            let idx = (g.y.round() as usize) * self.size + g.x.round() as usize;
            self.cells[idx] += weight;
        }
    }

    /// Bilinearly interpolated value at `p`
    ///
    pub fn sample(&self, p: &Vector2<f32>) -> f32 {
        match self.grid_position(p) {
            Some(g) => self
                .bilinear_cells(&g)
                .iter()
                .map(|(idx, w)| self.cells[*idx] * w)
                .sum(),
            None => 0.0,
        }
    }

    /// Scales the cells so that the maximum is `1`
    ///
    pub fn normalize_max(&mut self) {
        let max = self.cells.iter().cloned().fold(0.0_f32, f32::max);
        if max > EPS {
            self.cells.iter_mut().for_each(|c| *c /= max);
        }
    }

    pub fn total(&self) -> f32 {
        self.cells.iter().sum()
    }
}

/// Density normalization weights: points in crowded cells count less
///
pub fn density_weights(grid: &DensityGrid, points: &[Vector2<f32>]) -> Vec<f32> {
    points
        .iter()
        .map(|p| 1.0 / (1.0 + grid.sample(p)))
        .collect()
}
