/*!
`MUTE`: silence at full register fidelity.

Queues zero-valued samples at exactly the pacing of the mixer core, so
downstream consumers see the same cadence and $4015/frame-IRQ behavior is
unchanged.
*/

use std::collections::VecDeque;

use serde_json::Value;

use crate::cores::{AudioCore, AudioTransfer};
use crate::errors::Result;

use super::state::{ApuState, SAMPLE_RATE};

pub fn new_mute() -> Box<dyn AudioCore> {
    Box::new(MuteCore {
        s: ApuState::new(),
        queue: VecDeque::new(),
    })
}

struct MuteCore {
    s: ApuState,
    queue: VecDeque<f32>,
}

impl AudioCore for MuteCore {
    fn id(&self) -> &'static str {
        "MUTE"
    }

    fn display_name(&self) -> &'static str {
        "Muted output"
    }

    fn description(&self) -> &'static str {
        "Register-complete core emitting silence"
    }

    fn step(&mut self, cpu_cycles: u32) {
        let due = self.s.advance(cpu_cycles);
        for _ in 0..due {
            self.queue.push_back(0.0);
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
    use super::super::new_pulse;

    #[test]
    fn output_is_always_silent() {
        let mut core = new_mute();
        core.write_register(0x4015, 0x03);
        core.write_register(0x4000, 0x3F);
        core.write_register(0x4003, 0x09);
        core.step(29_829 * 2);
        let samples = core.pull_samples(usize::MAX);
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn pacing_matches_the_mixer_core() {
        let mut mute = new_mute();
        let mut pulse = new_pulse();
        for _ in 0..10 {
            mute.step(29_829);
            pulse.step(29_829);
        }
        assert_eq!(mute.queued_samples(), pulse.queued_samples());
    }

    #[test]
    fn status_semantics_are_preserved() {
        let mut core = new_mute();
        core.write_register(0x4015, 0x01);
        core.write_register(0x4003, 0x08);
        assert_eq!(core.read_register(0x4015) & 0x01, 0x01);
    }
}
