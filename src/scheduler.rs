/*!
Frame scheduling: clock constants, the fixed-point frame pacer and the
tuning state for the two execution strategies.

The CPU runs at 1,789,773 Hz against a 60 fps presentation clock, which is
29,829 cycles per frame plus a fractional 33/60 cycle. The pacer tracks
the fraction with integer arithmetic: every frame adds 33 to an
accumulator, and when it reaches 60 that frame's budget grows by one
cycle. Over any 60-frame window exactly 33 long frames occur, so no drift
accumulates, ever.

Instruction execution overshoots frame boundaries (instructions are
atomic), so the cycles run past the budget carry into the next frame as a
debt. A debt at least as large as the next budget swallows that frame
whole.

Strategies:
- `Batch` groups instructions and flushes device time when a batch fills,
  its cycle threshold trips, or the frame budget is nearly spent. The
  threshold self-tunes from per-frame overshoot.
- `EventDriven` runs to the nearest device event marker (scanline cadence
  or audio quantum) and services interrupts only at those boundaries.
Both retire the same cycles at the same boundaries, so a program cannot
tell them apart.
*/

use serde::{Deserialize, Serialize};

pub const CPU_CLOCK_HZ: u32 = 1_789_773;
pub const TARGET_FPS: u32 = 60;
pub const BASE_CYCLES_PER_FRAME: u32 = 29_829;
const EXTRA_CYCLE_NUMERATOR: u32 = 33;
const EXTRA_CYCLE_DENOMINATOR: u32 = 60;

/// CPU cycles per scanline; three-entry cadence keeps 341 dots / 3 exact.
pub const SCANLINE_CPU_PATTERN: [u32; 3] = [114, 114, 113];
/// Audio event granularity for the event-driven strategy, in CPU cycles.
pub const APU_EVENT_QUANTUM: u32 = 64;

pub const MAX_INSTRUCTIONS_PER_BATCH: u32 = 32;
pub const BATCH_CYCLE_THRESHOLD: u32 = 24;
pub const MIN_REMAINING_FLUSH_GUARD: u32 = 16;
/// Hard ceiling on instructions run without a flush, either strategy.
pub const BURST_INSTRUCTION_CAP: u32 = 1024;

const THRESHOLD_MIN: u32 = 8;
const THRESHOLD_MAX: u32 = 64;
const THRESHOLD_STEP: u32 = 2;
const OVERSHOOT_TOLERANCE: u32 = 4;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    #[default]
    Batch,
    EventDriven,
}

#[derive(Copy, Clone, Debug)]
pub struct SchedulerConfig {
    pub strategy: Strategy,
    pub max_instructions_per_batch: u32,
    pub batch_cycle_threshold: u32,
    pub min_remaining_flush_guard: u32,
    /// Let per-frame overshoot adjust the flush threshold.
    pub adaptive_batching: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Batch,
            max_instructions_per_batch: MAX_INSTRUCTIONS_PER_BATCH,
            batch_cycle_threshold: BATCH_CYCLE_THRESHOLD,
            min_remaining_flush_guard: MIN_REMAINING_FLUSH_GUARD,
            adaptive_batching: true,
        }
    }
}

/// Fixed-point frame pacer plus the event markers used by the
/// event-driven strategy.
#[derive(Clone, Debug)]
pub struct FrameTiming {
    pub extra_cycle_acc: u32,
    pub overshoot_carry: u32,
    pub global_cycle: u64,
    scanline_slot: usize,
    next_scanline_event: u64,
    next_audio_event: u64,
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTiming {
    pub fn new() -> Self {
        let mut t = Self {
            extra_cycle_acc: 0,
            overshoot_carry: 0,
            global_cycle: 0,
            scanline_slot: 0,
            next_scanline_event: 0,
            next_audio_event: 0,
        };
        t.reseed_markers();
        t
    }

    /// Forget pending markers and schedule fresh ones from the current
    /// global cycle. Called after loads and restores.
    pub fn reseed_markers(&mut self) {
        self.scanline_slot = 0;
        self.next_scanline_event = self.global_cycle + SCANLINE_CPU_PATTERN[0] as u64;
        self.next_audio_event = self.global_cycle + APU_EVENT_QUANTUM as u64;
    }

    /// Compute this frame's cycle budget. `None` means the carried-over
    /// debt covers the whole frame and it is skipped outright.
    pub fn begin_frame(&mut self) -> Option<u32> {
        self.extra_cycle_acc += EXTRA_CYCLE_NUMERATOR;
        let mut target = BASE_CYCLES_PER_FRAME;
        if self.extra_cycle_acc >= EXTRA_CYCLE_DENOMINATOR {
            self.extra_cycle_acc -= EXTRA_CYCLE_DENOMINATOR;
            target += 1;
        }
        if self.overshoot_carry >= target {
            self.overshoot_carry -= target;
            return None;
        }
        target -= self.overshoot_carry;
        self.overshoot_carry = 0;
        Some(target)
    }

    /// Record the cycles actually retired against the budget.
    pub fn end_frame(&mut self, target: u32, executed: u32) {
        self.overshoot_carry = executed.saturating_sub(target);
    }

    /// Nearest upcoming boundary: frame end, scanline marker or audio
    /// quantum.
    pub fn next_event(&self, frame_end: u64) -> u64 {
        frame_end
            .min(self.next_scanline_event)
            .min(self.next_audio_event)
    }

    /// Advance any markers the global cycle has reached or passed.
    pub fn service_markers(&mut self) {
        while self.next_scanline_event <= self.global_cycle {
            self.scanline_slot = (self.scanline_slot + 1) % SCANLINE_CPU_PATTERN.len();
            self.next_scanline_event += SCANLINE_CPU_PATTERN[self.scanline_slot] as u64;
        }
        while self.next_audio_event <= self.global_cycle {
            self.next_audio_event += APU_EVENT_QUANTUM as u64;
        }
    }
}

/// Self-tuning flush threshold for the batch strategy.
#[derive(Copy, Clone, Debug)]
pub struct BatchTuner {
    threshold: u32,
}

impl BatchTuner {
    pub fn new(initial: u32) -> Self {
        Self {
            threshold: initial.clamp(THRESHOLD_MIN, THRESHOLD_MAX),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Feed back one frame's outcome. Overshooting the budget narrows the
    /// threshold (more frequent flushes); undershooting widens it.
    pub fn observe(&mut self, executed: u32, target: u32) {
        if executed > target + OVERSHOOT_TOLERANCE {
            self.threshold = self.threshold.saturating_sub(THRESHOLD_STEP).max(THRESHOLD_MIN);
        } else if executed + OVERSHOOT_TOLERANCE < target {
            self.threshold = (self.threshold + THRESHOLD_STEP).min(THRESHOLD_MAX);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixty_frames_retire_exactly_one_second_of_cycles() {
        let mut t = FrameTiming::new();
        let mut total = 0u64;
        for _ in 0..60 {
            let target = t.begin_frame().expect("no debt, no skips");
            total += target as u64;
            t.end_frame(target, target);
        }
        assert_eq!(total, CPU_CLOCK_HZ as u64);
        assert_eq!(t.extra_cycle_acc, 0);
    }

    #[test]
    fn long_frames_appear_thirty_three_times_per_second() {
        let mut t = FrameTiming::new();
        let long = (0..60)
            .filter(|_| {
                let target = t.begin_frame().unwrap();
                t.end_frame(target, target);
                target == BASE_CYCLES_PER_FRAME + 1
            })
            .count();
        assert_eq!(long, 33);
    }

    #[test]
    fn overshoot_debt_shrinks_the_next_budget() {
        let mut t = FrameTiming::new();
        let target = t.begin_frame().unwrap();
        t.end_frame(target, target + 100);
        let next = t.begin_frame().unwrap();
        assert!(next == BASE_CYCLES_PER_FRAME - 100 || next == BASE_CYCLES_PER_FRAME + 1 - 100);
    }

    #[test]
    fn debt_larger_than_a_frame_skips_it() {
        let mut t = FrameTiming::new();
        let target = t.begin_frame().unwrap();
        t.end_frame(target, target + BASE_CYCLES_PER_FRAME + 500);
        assert_eq!(t.begin_frame(), None);
        // The skipped frame paid down most of the debt.
        let after = t.begin_frame().unwrap();
        assert!(after > BASE_CYCLES_PER_FRAME - 600);
    }

    #[test]
    fn scanline_markers_follow_the_cadence_pattern() {
        let mut t = FrameTiming::new();
        assert_eq!(t.next_event(u64::MAX), 64); // audio quantum comes first
        t.global_cycle = 114;
        t.service_markers();
        assert_eq!(t.next_scanline_event, 228);
        t.global_cycle = 228;
        t.service_markers();
        // Third slot is the short scanline.
        assert_eq!(t.next_scanline_event, 341);
    }

    #[test]
    fn marker_servicing_catches_up_after_a_long_instruction_burst() {
        let mut t = FrameTiming::new();
        t.global_cycle = 1000;
        t.service_markers();
        assert!(t.next_scanline_event > 1000);
        assert!(t.next_audio_event > 1000);
        assert!(t.next_audio_event - 1000 <= APU_EVENT_QUANTUM as u64);
    }

    #[test]
    fn tuner_narrows_on_overshoot_and_widens_on_undershoot() {
        let mut tuner = BatchTuner::new(BATCH_CYCLE_THRESHOLD);
        tuner.observe(30_000, 29_829);
        assert_eq!(tuner.threshold(), BATCH_CYCLE_THRESHOLD - 2);
        for _ in 0..100 {
            tuner.observe(30_000, 29_829);
        }
        assert_eq!(tuner.threshold(), 8);
        for _ in 0..100 {
            tuner.observe(29_000, 29_829);
        }
        assert_eq!(tuner.threshold(), 64);
        // Inside the tolerance band nothing moves.
        let before = tuner.threshold();
        tuner.observe(29_829, 29_829);
        assert_eq!(tuner.threshold(), before);
    }
}
