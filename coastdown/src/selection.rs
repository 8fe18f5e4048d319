//! Two-marker sub-range picker over an index axis, driven by pointer events
//! and independent of any rendering.

use serde::{Deserialize, Serialize};

use crate::fit::ordered_bounds;
use crate::CdError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DragState {
    NoSelection,
    DraggingMarkerA,
    DraggingMarkerB,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RangeSelector {
    marker_a: f64,
    marker_b: f64,
    state: DragState,
}

impl Default for RangeSelector {
    fn default() -> Self {
        Self::new(100.0, 200.0)
    }
}

impl RangeSelector {
    pub fn new(marker_a: f64, marker_b: f64) -> Self {
        Self {
            marker_a,
            marker_b,
            state: DragState::NoSelection,
        }
    }

    pub fn state(&self) -> DragState {
        self.state
    }

    pub fn markers(&self) -> (f64, f64) {
        (self.marker_a, self.marker_b)
    }

    /// Pointer pressed at axis position `x` (`None` when outside the axes).
    /// Grabs whichever marker is nearer; B wins a tie.
    pub fn pointer_down(&mut self, x: Option<f64>) -> DragState {
        if let Some(x) = x {
            self.state = if (x - self.marker_a).abs() < (x - self.marker_b).abs() {
                DragState::DraggingMarkerA
            } else {
                DragState::DraggingMarkerB
            };
        }
        self.state
    }

    /// Moves the grabbed marker. Returns whether a marker moved.
    pub fn pointer_move(&mut self, x: Option<f64>) -> bool {
        let Some(x) = x else {
            return false;
        };
        match self.state {
            DragState::DraggingMarkerA => self.marker_a = x,
            DragState::DraggingMarkerB => self.marker_b = x,
            DragState::NoSelection => return false,
        }
        true
    }

    pub fn pointer_up(&mut self) -> DragState {
        self.state = DragState::NoSelection;
        self.state
    }

    /// Marker positions truncated to row indices, clamped into a series of
    /// `len` rows and sorted.
    pub fn bounds(&self, len: usize) -> Result<(usize, usize), CdError> {
        ordered_bounds(to_index(self.marker_a), to_index(self.marker_b), len)
    }

    /// Values of `series` under both markers, in marker order.
    pub fn readout(&self, series: &[f64]) -> Result<(f64, f64), CdError> {
        let (lo, hi) = self.bounds(series.len())?;
        Ok((series[lo], series[hi]))
    }
}

fn to_index(x: f64) -> usize {
    if x.is_nan() || x <= 0.0 {
        0
    } else {
        x.trunc() as usize
    }
}
