//! Loop configuration for buffered resources.
//!
//! Loop points travel as fractions of the total length in `[0.0, 1.0]`.
//! [`LOOP_FROM_START`] coincides with the normal minimum. [`LOOP_THROUGH_END`] is the
//! out-of-range sentinel meaning "through the natural end", so it can never be mistaken
//! for a real fraction.

use crate::clip::{LoopCount, LoopRegion};
use crate::error::{EngineError, Result};

pub const LOOP_FROM_START: f64 = 0.0;
pub const LOOP_THROUGH_END: f64 = -1.0;
pub const LOOP_CONTINUOUSLY: i32 = -1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopSettings {
    start: f64,
    end: f64,
    count: i32,
    enabled: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            start: LOOP_FROM_START,
            end: LOOP_THROUGH_END,
            count: 0,
            enabled: false,
        }
    }
}

impl LoopSettings {
    /// Set both loop points and enable looping. Leaves the settings untouched on error.
    pub fn set_points(&mut self, start: f64, end: f64) -> Result<()> {
        if !start.is_finite() || !(0.0..=1.0).contains(&start) {
            return Err(EngineError::InvalidArgument(format!(
                "loop start {start} outside [0, 1]"
            )));
        }
        let end_is_sentinel = end == LOOP_THROUGH_END;
        if !end_is_sentinel && (!end.is_finite() || !(0.0..=1.0).contains(&end)) {
            return Err(EngineError::InvalidArgument(format!(
                "loop end {end} outside [0, 1] and not the loop-through-end sentinel"
            )));
        }
        let start_is_sentinel = start == LOOP_FROM_START;
        if !start_is_sentinel && !end_is_sentinel && start > end {
            return Err(EngineError::InvalidArgument(format!(
                "loop start {start} is after loop end {end}"
            )));
        }
        self.start = start;
        self.end = end;
        self.enabled = true;
        Ok(())
    }

    /// `0` disables looping, [`LOOP_CONTINUOUSLY`] loops forever, any positive count enables it.
    pub fn set_count(&mut self, count: i32) -> Result<()> {
        if count < LOOP_CONTINUOUSLY {
            return Err(EngineError::InvalidArgument(format!(
                "loop count {count} is below {LOOP_CONTINUOUSLY}"
            )));
        }
        self.count = count;
        self.enabled = count != 0;
        Ok(())
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn should_loop(&self) -> bool {
        self.enabled
    }

    pub fn points(&self) -> (f64, f64) {
        (self.start, self.end)
    }

    pub fn count(&self) -> i32 {
        self.count
    }

    /// Loop region in frames for a buffer of `length` frames.
    pub fn region(&self, length: u64) -> LoopRegion {
        LoopRegion {
            start: denormalize(self.start, length),
            end: (self.end != LOOP_THROUGH_END).then(|| denormalize(self.end, length)),
        }
    }

    /// Extra passes through the region. Only [`LOOP_CONTINUOUSLY`] loops forever; a count of
    /// `0` (points set, count untouched) plays through once.
    pub fn loop_count(&self) -> LoopCount {
        match self.count {
            LOOP_CONTINUOUSLY => LoopCount::Continuously,
            n => LoopCount::Times(u32::try_from(n).unwrap_or(0)),
        }
    }
}

fn denormalize(fraction: f64, length: u64) -> u64 {
    ((fraction * length as f64).round() as u64).min(length)
}
