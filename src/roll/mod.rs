//! Binary time-step x pitch grids, the array a model trains on and produces.

use crate::error::{CodecError, Result};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, s};
use std::ops::Range;

pub mod decoder;
pub mod encoder;

pub const NUM_PITCHES: usize = 128;

/// A `[steps][128]` grid of `{0,1}` cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PianoRoll {
    cells: Array2<u8>,
}

impl PianoRoll {
    pub fn zeros(steps: usize) -> Self {
        Self {
            cells: Array2::zeros((steps, NUM_PITCHES)),
        }
    }

    /// Any non-zero cell counts as on.
    pub fn from_array(cells: Array2<u8>) -> Result<Self> {
        check_width(cells.ncols())?;
        Ok(Self {
            cells: cells.mapv(|v| (v != 0) as u8),
        })
    }

    /// Turns raw model activations into a grid, cells strictly above `threshold` are on.
    pub fn binarize(activations: ArrayView2<f32>, threshold: f32) -> Result<Self> {
        check_width(activations.ncols())?;
        Ok(Self {
            cells: activations.mapv(|v| (v > threshold) as u8),
        })
    }

    pub fn steps(&self) -> usize {
        self.cells.nrows()
    }

    pub fn is_active(&self, step: usize, pitch: usize) -> bool {
        self.cells.get((step, pitch)).is_some_and(|&v| v != 0)
    }

    pub fn column(&self, pitch: usize) -> ArrayView1<'_, u8> {
        self.cells.column(pitch)
    }

    pub fn active_cells(&self) -> usize {
        self.cells.iter().filter(|&&v| v != 0).count()
    }

    pub fn view(&self) -> ArrayView2<'_, u8> {
        self.cells.view()
    }

    pub fn into_array(self) -> Array2<u8> {
        self.cells
    }

    /// Dense float copy for trainers that want `f32` input.
    pub fn to_f32(&self) -> Array2<f32> {
        self.cells.mapv(f32::from)
    }

    /// Keeps only the pitches in `pitches`, e.g. `3..87` for an 84-key window.
    pub fn pitch_window(&self, pitches: Range<usize>) -> Result<Array2<u8>> {
        if pitches.start > pitches.end || pitches.end > NUM_PITCHES {
            return Err(CodecError::InvalidConfig(format!(
                "pitch window {}..{} is outside 0..{}",
                pitches.start, pitches.end, NUM_PITCHES
            )));
        }
        Ok(self.cells.slice(s![.., pitches]).to_owned())
    }

    /// Rows as plain vectors, the layout written to JSON.
    pub fn rows(&self) -> Vec<Vec<u8>> {
        self.cells
            .axis_iter(Axis(0))
            .map(|row| row.to_vec())
            .collect()
    }

    pub(crate) fn fill(&mut self, pitch: usize, steps: Range<usize>) {
        self.cells.slice_mut(s![steps, pitch]).fill(1);
    }
}

fn check_width(width: usize) -> Result<()> {
    if width != NUM_PITCHES {
        return Err(CodecError::GridWidth(width));
    }
    Ok(())
}
