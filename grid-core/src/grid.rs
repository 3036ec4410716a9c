use crate::config::GridConfig;
use crate::constants::CELL_SATURATION;
use crate::error::TickError;
use crate::transform::PolarCell;

/// Dense `A × R × C` grid, flattened in `[angle][radius][channel]` order.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    config: GridConfig,
    cells: Vec<f32>,
}

impl Grid {
    pub fn new(config: GridConfig) -> Self {
        Self {
            cells: vec![0.0; config.cell_count()],
            config,
        }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn cells(&self) -> &[f32] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [f32] {
        &mut self.cells
    }

    pub fn into_cells(self) -> Vec<f32> {
        self.cells
    }

    pub fn get(&self, cell: PolarCell, channel: usize) -> f32 {
        self.cells[self.config.index(cell.angle, cell.radius, channel)]
    }

    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(|cell| *cell = 0.0);
    }

    /// Reallocate to zero when the configuration changes shape; otherwise
    /// just adopt the new geometry.
    pub fn reshape(&mut self, config: GridConfig) {
        if !self.config.same_shape(&config) || self.cells.len() != config.cell_count() {
            self.cells = vec![0.0; config.cell_count()];
        }
        self.config = config;
    }

    /// Saturating add of a non-negative weight. Returns the new cell value.
    #[inline]
    pub fn splat(&mut self, cell: PolarCell, channel: usize, weight: f64) -> f32 {
        let index = self.config.index(cell.angle, cell.radius, channel);
        let slot = &mut self.cells[index];
        *slot = (*slot + weight.max(0.0) as f32).min(CELL_SATURATION);
        *slot
    }

    pub(crate) fn check_shape(&self) -> Result<(), TickError> {
        let expected = self.config.cell_count();
        if self.cells.len() != expected {
            return Err(TickError::GridShapeMismatch {
                expected,
                actual: self.cells.len(),
            });
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn truncate_for_test(&mut self, len: usize) {
        self.cells.truncate(len);
    }
}
