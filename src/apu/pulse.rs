/*!
`PULSE`: square-channel synthesis at 44.1 kHz.

Waveform phase derives from the absolute cycle counter, so output is a
pure function of register history and elapsed cycles; two cores fed the
same traffic produce the same samples.
*/

use std::collections::VecDeque;

use serde_json::Value;

use crate::cores::{AudioCore, AudioTransfer};
use crate::errors::Result;

use super::state::{ApuState, SAMPLE_RATE};

pub fn new_pulse() -> Box<dyn AudioCore> {
    Box::new(PulseCore {
        s: ApuState::new(),
        queue: VecDeque::new(),
    })
}

struct PulseCore {
    s: ApuState,
    queue: VecDeque<f32>,
}

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 1, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0],
    [1, 0, 0, 1, 1, 1, 1, 1],
];

impl PulseCore {
    /// Synthesize one sample as heard at absolute cycle `at`.
    fn mix_sample(&self, at: u64) -> f32 {
        let mut level = 0u32;
        for channel in 0..2 {
            if !self.s.pulse_active(channel) {
                continue;
            }
            // The 8-step duty sequencer advances every 2*(timer+1) cycles.
            let period = 2 * self.s.pulse_timer(channel) as u64;
            let seq = (at / period) % 8;
            if DUTY_TABLE[self.s.pulse_duty(channel)][seq as usize] != 0 {
                level += self.s.pulse_volume(channel) as u32;
            }
        }
        level as f32 * 0.02
    }
}

impl AudioCore for PulseCore {
    fn id(&self) -> &'static str {
        "PULSE"
    }

    fn display_name(&self) -> &'static str {
        "Pulse mixer"
    }

    fn description(&self) -> &'static str {
        "Square-channel synthesis, 44.1 kHz output"
    }

    fn step(&mut self, cpu_cycles: u32) {
        let start = self.s.cycle;
        let due = self.s.advance(cpu_cycles) as u64;
        let span = cpu_cycles as u64;
        for i in 0..due {
            // Each sample is evaluated at its own emission point inside the
            // stepped span, so phase keeps moving however coarse the step.
            let at = start + (i + 1) * span / due;
            let sample = self.mix_sample(at);
            self.queue.push_back(sample);
        }
    }

    fn write_register(&mut self, addr: u16, value: u8) {
        self.s.write_register(addr, value);
    }

    fn read_register(&mut self, addr: u16) -> u8 {
        self.s.read_register(addr)
    }

    fn pull_samples(&mut self, max: usize) -> Vec<f32> {
        let n = self.queue.len().min(max);
        self.queue.drain(..n).collect()
    }

    fn queued_samples(&self) -> usize {
        self.queue.len()
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn clear_audio_buffers(&mut self) {
        self.queue.clear();
    }

    fn irq_asserted(&self) -> bool {
        self.s.irq_asserted()
    }

    fn reset(&mut self) {
        self.s.reset();
        self.queue.clear();
    }

    fn export_transfer(&self) -> AudioTransfer {
        self.s.export_transfer()
    }

    fn import_transfer(&mut self, t: &AudioTransfer) -> Result<()> {
        self.s.import_transfer(t);
        Ok(())
    }

    fn export_state(&self) -> Value {
        self.s.export_state()
    }

    fn import_state(&mut self, state: &Value) -> Result<()> {
        self.queue.clear();
        self.s.import_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_until_a_channel_is_enabled() {
        let mut core = new_pulse();
        core.step(29_829);
        let samples = core.pull_samples(usize::MAX);
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn enabled_pulse_channel_produces_nonzero_output() {
        let mut core = new_pulse();
        core.write_register(0x4015, 0x01);
        core.write_register(0x4000, 0x3F); // duty 0, halt length, max volume
        core.write_register(0x4002, 0xFD); // timer 0x1FD (~440 Hz)
        core.write_register(0x4003, 0x09);
        core.step(29_829 * 4);
        let samples = core.pull_samples(usize::MAX);
        assert!(samples.iter().any(|&s| s > 0.0));
        assert!(samples.iter().all(|&s| (0.0..=1.0).contains(&s)));
    }

    #[test]
    fn one_large_step_still_sweeps_waveform_phase() {
        let mut core = new_pulse();
        core.write_register(0x4015, 0x01);
        core.write_register(0x4000, 0x3F);
        core.write_register(0x4002, 0xFD);
        core.write_register(0x4003, 0x09);
        // Four frames in a single step: samples must still land on both the
        // high and low parts of the duty cycle.
        core.step(29_829 * 4);
        let samples = core.pull_samples(usize::MAX);
        assert!(samples.iter().any(|&s| s > 0.0));
        assert!(samples.iter().any(|&s| s == 0.0));
    }

    #[test]
    fn pull_respects_the_cap_and_drains_oldest_first() {
        let mut core = new_pulse();
        core.step(29_829);
        let before = core.queued_samples();
        let taken = core.pull_samples(10);
        assert_eq!(taken.len(), 10);
        assert_eq!(core.queued_samples(), before - 10);
    }

    #[test]
    fn clearing_buffers_drops_queued_samples_only() {
        let mut core = new_pulse();
        core.write_register(0x4015, 0x03);
        core.step(29_829);
        core.clear_audio_buffers();
        assert_eq!(core.queued_samples(), 0);
        // Register state survives the clear.
        assert_eq!(core.export_transfer().enabled_mask, 0x03);
    }
}
