//! Loop-aware play cursor over a decoded buffer.
//!
//! Both providers drive their decoded buffers with a [`ClipCursor`]: the hardware provider
//! one frame at a time from the output callback, the memory provider in chunks from a clock.

/// Loop region in frames. `end` is exclusive; `None` loops through the natural end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopRegion {
    pub start: u64,
    pub end: Option<u64>,
}

impl LoopRegion {
    pub fn whole() -> Self {
        Self {
            start: 0,
            end: None,
        }
    }
}

/// How many extra passes through a loop region remain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopCount {
    Times(u32),
    Continuously,
}

impl LoopCount {
    fn exhausted(self) -> bool {
        self == LoopCount::Times(0)
    }

    fn decrement(self) -> Self {
        match self {
            LoopCount::Times(n) => LoopCount::Times(n.saturating_sub(1)),
            LoopCount::Continuously => LoopCount::Continuously,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ActiveLoop {
    start: u64,
    end: u64,
    remaining: LoopCount,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClipCursor {
    position: u64,
    length: u64,
    active: Option<ActiveLoop>,
}

impl ClipCursor {
    pub fn new(length: u64) -> Self {
        Self {
            position: 0,
            length,
            active: None,
        }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn set_position(&mut self, frame: u64) {
        self.position = frame.min(self.length);
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.length
    }

    pub fn is_looping(&self) -> bool {
        self.active.is_some()
    }

    /// Arm a loop. Ignored when the region is empty or the cursor is already past its end.
    pub fn set_loop(&mut self, region: LoopRegion, count: LoopCount) {
        let end = region.end.unwrap_or(self.length).min(self.length);
        let start = region.start.min(end);
        self.active = (end > start && self.position <= end && !count.exhausted()).then_some(
            ActiveLoop {
                start,
                end,
                remaining: count,
            },
        );
    }

    pub fn cancel_loop(&mut self) {
        self.active = None;
    }

    /// Frame to output next, or `None` once the end is reached.
    pub fn next_frame(&mut self) -> Option<u64> {
        if self.is_finished() {
            return None;
        }
        let frame = self.position;
        self.position += 1;
        self.wrap_if_needed();
        Some(frame)
    }

    /// Move forward by up to `frames`, following loops. Returns the frames actually played.
    pub fn advance(&mut self, frames: u64) -> u64 {
        let mut left = frames;
        while left > 0 && !self.is_finished() {
            let boundary = match self.active {
                Some(active) if self.position < active.end => active.end,
                _ => self.length,
            };
            let step = left.min(boundary - self.position);
            self.position += step;
            left -= step;
            self.wrap_if_needed();
        }
        frames - left
    }

    fn wrap_if_needed(&mut self) {
        let Some(active) = self.active else {
            return;
        };
        if self.position != active.end {
            return;
        }
        let remaining = active.remaining.decrement();
        self.position = active.start;
        self.active = (!remaining.exhausted()).then_some(ActiveLoop {
            remaining,
            ..active
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plays_linearly_without_a_loop() {
        let mut c = ClipCursor::new(3);
        assert_eq!(c.next_frame(), Some(0));
        assert_eq!(c.next_frame(), Some(1));
        assert_eq!(c.next_frame(), Some(2));
        assert_eq!(c.next_frame(), None);
        assert!(c.is_finished());
    }

    #[test]
    fn loops_the_region_the_requested_number_of_times() {
        let mut c = ClipCursor::new(6);
        c.set_loop(
            LoopRegion {
                start: 1,
                end: Some(3),
            },
            LoopCount::Times(2),
        );
        let frames: Vec<u64> = std::iter::from_fn(|| c.next_frame()).collect();
        assert_eq!(frames, vec![0, 1, 2, 1, 2, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn continuous_loop_never_finishes() {
        let mut c = ClipCursor::new(4);
        c.set_loop(LoopRegion::whole(), LoopCount::Continuously);
        assert_eq!(c.advance(1_000), 1_000);
        assert!(!c.is_finished());
        assert!(c.position() < 4);
    }

    #[test]
    fn advance_matches_frame_by_frame_stepping() {
        let mut a = ClipCursor::new(10);
        let mut b = ClipCursor::new(10);
        let region = LoopRegion {
            start: 2,
            end: Some(7),
        };
        a.set_loop(region, LoopCount::Times(3));
        b.set_loop(region, LoopCount::Times(3));
        let stepped = std::iter::from_fn(|| b.next_frame()).count() as u64;
        assert_eq!(a.advance(u64::MAX), stepped);
        assert_eq!(a.position(), b.position());
    }

    #[test]
    fn loop_is_ignored_when_cursor_is_past_region() {
        let mut c = ClipCursor::new(10);
        c.set_position(8);
        c.set_loop(
            LoopRegion {
                start: 0,
                end: Some(5),
            },
            LoopCount::Continuously,
        );
        assert!(!c.is_looping());
        assert_eq!(c.advance(100), 2);
    }

    #[test]
    fn cancel_lets_the_pass_finish() {
        let mut c = ClipCursor::new(5);
        c.set_loop(LoopRegion::whole(), LoopCount::Continuously);
        c.advance(7);
        c.cancel_loop();
        assert_eq!(c.advance(100), 3);
        assert!(c.is_finished());
    }

    #[test]
    fn set_position_clamps_to_length() {
        let mut c = ClipCursor::new(5);
        c.set_position(50);
        assert_eq!(c.position(), 5);
    }
}
