use crate::config::{CollectionConfig, GridConfig};
use crate::constants::CELL_SATURATION;
use crate::error::TickError;
use crate::grid::Grid;

/// Per-cell running average of raw intensity, one slot per grid cell.
#[derive(Clone, Debug, PartialEq)]
pub struct EmaState {
    values: Vec<f32>,
}

impl EmaState {
    pub fn new(grid: &GridConfig) -> Self {
        Self {
            values: vec![0.0; grid.cell_count()],
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Zero the state, reallocating when the grid layout changed size.
    pub fn reset(&mut self, grid: &GridConfig) {
        let cells = grid.cell_count();
        if self.values.len() == cells {
            self.values.iter_mut().for_each(|v| *v = 0.0);
        } else {
            self.values = vec![0.0; cells];
        }
    }

    #[cfg(test)]
    pub(crate) fn truncate_for_test(&mut self, len: usize) {
        self.values.truncate(len);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdaptiveNormalizer {
    pub beta: f32,
    pub saturation_factor: f32,
}

impl From<&CollectionConfig> for AdaptiveNormalizer {
    fn from(config: &CollectionConfig) -> Self {
        Self {
            beta: config.ema_beta,
            saturation_factor: config.saturation_factor,
        }
    }
}

impl AdaptiveNormalizer {
    /// Fold `grid` into `ema`, then rescale `grid` in place against it.
    ///
    /// Cells whose average is still zero keep their raw value, which is
    /// already bounded by the splat saturation.
    pub fn normalize(&self, grid: &mut Grid, ema: &mut EmaState) -> Result<(), TickError> {
        grid.check_shape()?;
        let cells = grid.cells_mut();
        if ema.values.len() != cells.len() {
            return Err(TickError::EmaShapeMismatch {
                expected: cells.len(),
                actual: ema.values.len(),
            });
        }
        if let Some(index) = cells.iter().position(|v| !v.is_finite()) {
            return Err(TickError::NonFiniteCell { index });
        }

        let keep = self.beta;
        let blend = 1.0 - self.beta;
        for (cell, avg) in cells.iter_mut().zip(ema.values.iter_mut()) {
            *avg = keep * *avg + blend * *cell;
            if *avg > 0.0 {
                *cell = (*cell / (self.saturation_factor * *avg)).min(CELL_SATURATION);
            }
        }
        Ok(())
    }
}
