/*!
Shared audio-unit state: register file, length counters, frame sequencer
and sample pacing.

The frame sequencer quarter-clocks every 3729 CPU cycles. In four-step
mode the last step of each sequence raises the frame IRQ unless inhibited;
five-step mode never raises it. Length counters half-clock on steps 1 and
3 (and 4 in five-step mode).

Sample pacing uses an integer accumulator against the CPU clock so exactly
`sample_rate` samples come out per `CPU_CLOCK_HZ` cycles, with no drift.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cores::AudioTransfer;
use crate::errors::{EmuError, Result};
use crate::scheduler::CPU_CLOCK_HZ;

pub const SAMPLE_RATE: u32 = 44_100;

const QUARTER_FRAME_CYCLES: u32 = 3729;
const REG_COUNT: usize = 0x18;

const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96, 22,
    192, 24, 72, 26, 16, 28, 32, 30,
];

const STATE_VERSION: u32 = 1;

pub struct ApuState {
    pub regs: [u8; REG_COUNT],
    pub enabled_mask: u8,
    pub five_step_mode: bool,
    pub irq_inhibit: bool,
    frame_irq: bool,
    frame_acc: u32,
    frame_step: u8,
    /// Length counters for pulse 1, pulse 2, triangle, noise.
    lengths: [u8; 4],
    /// Total CPU cycles stepped; waveform phase derives from this.
    pub cycle: u64,
    sample_acc: u64,
}

impl Default for ApuState {
    fn default() -> Self {
        Self::new()
    }
}

impl ApuState {
    pub fn new() -> Self {
        Self {
            regs: [0; REG_COUNT],
            enabled_mask: 0,
            five_step_mode: false,
            irq_inhibit: false,
            frame_irq: false,
            frame_acc: 0,
            frame_step: 0,
            lengths: [0; 4],
            cycle: 0,
            sample_acc: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Advance by CPU cycles; returns how many output samples are due.
    pub fn advance(&mut self, cpu_cycles: u32) -> u32 {
        self.cycle += cpu_cycles as u64;
        self.frame_acc += cpu_cycles;
        while self.frame_acc >= QUARTER_FRAME_CYCLES {
            self.frame_acc -= QUARTER_FRAME_CYCLES;
            self.quarter_clock();
        }

        self.sample_acc += cpu_cycles as u64 * SAMPLE_RATE as u64;
        let due = (self.sample_acc / CPU_CLOCK_HZ as u64) as u32;
        self.sample_acc %= CPU_CLOCK_HZ as u64;
        due
    }

    fn quarter_clock(&mut self) {
        let steps = if self.five_step_mode { 5 } else { 4 };
        let half = matches!(self.frame_step, 1 | 3) || (self.five_step_mode && self.frame_step == 4);
        if half {
            self.half_clock();
        }
        if !self.five_step_mode && self.frame_step == 3 && !self.irq_inhibit {
            self.frame_irq = true;
        }
        self.frame_step = (self.frame_step + 1) % steps;
    }

    fn half_clock(&mut self) {
        // Halt flags: bit 5 of $4000/$4004, bit 7 of $4008, bit 5 of $400C.
        let halts = [
            self.regs[0x00] & 0x20 != 0,
            self.regs[0x04] & 0x20 != 0,
            self.regs[0x08] & 0x80 != 0,
            self.regs[0x0C] & 0x20 != 0,
        ];
        for (i, len) in self.lengths.iter_mut().enumerate() {
            if !halts[i] && *len > 0 {
                *len -= 1;
            }
        }
    }

    // ------------- registers -------------

    pub fn write_register(&mut self, addr: u16, value: u8) {
        let idx = (addr as usize).wrapping_sub(0x4000);
        if idx >= REG_COUNT {
            return;
        }
        self.regs[idx] = value;
        match addr {
            0x4003 | 0x4007 | 0x400B | 0x400F => {
                let channel = (idx - 3) / 4;
                if self.enabled_mask & (1 << channel) != 0 {
                    self.lengths[channel] = LENGTH_TABLE[(value >> 3) as usize];
                }
            }
            0x4015 => {
                self.enabled_mask = value & 0x1F;
                for (channel, len) in self.lengths.iter_mut().enumerate() {
                    if value & (1 << channel) == 0 {
                        *len = 0;
                    }
                }
            }
            0x4017 => {
                self.five_step_mode = value & 0x80 != 0;
                self.irq_inhibit = value & 0x40 != 0;
                if self.irq_inhibit {
                    self.frame_irq = false;
                }
                self.frame_step = 0;
                self.frame_acc = 0;
            }
            _ => {}
        }
    }

    pub fn read_register(&mut self, addr: u16) -> u8 {
        if addr != 0x4015 {
            return 0;
        }
        let mut v = 0u8;
        for (channel, &len) in self.lengths.iter().enumerate() {
            if len > 0 {
                v |= 1 << channel;
            }
        }
        if self.frame_irq {
            v |= 0x40;
        }
        // Reading status acknowledges the frame IRQ.
        self.frame_irq = false;
        v
    }

    pub fn irq_asserted(&self) -> bool {
        self.frame_irq
    }

    /// Length counter state for a pulse channel (0 or 1).
    pub fn pulse_active(&self, channel: usize) -> bool {
        self.enabled_mask & (1 << channel) != 0 && self.lengths[channel] > 0
    }

    /// Pulse timer period from the register pair, in CPU cycles per
    /// sequencer step.
    pub fn pulse_timer(&self, channel: usize) -> u32 {
        let base = channel * 4;
        let lo = self.regs[base + 2] as u32;
        let hi = (self.regs[base + 3] as u32 & 0x07) << 8;
        (hi | lo) + 1
    }

    pub fn pulse_volume(&self, channel: usize) -> u8 {
        self.regs[channel * 4] & 0x0F
    }

    pub fn pulse_duty(&self, channel: usize) -> usize {
        (self.regs[channel * 4] >> 6) as usize
    }

    // ------------- transfer / snapshot -------------

    pub fn export_transfer(&self) -> AudioTransfer {
        AudioTransfer {
            enabled_mask: self.enabled_mask,
            five_step_mode: self.five_step_mode,
            irq_inhibit: self.irq_inhibit,
        }
    }

    pub fn import_transfer(&mut self, t: &AudioTransfer) {
        self.enabled_mask = t.enabled_mask;
        self.five_step_mode = t.five_step_mode;
        self.irq_inhibit = t.irq_inhibit;
        if self.irq_inhibit {
            self.frame_irq = false;
        }
    }

    pub fn export_state(&self) -> Value {
        serde_json::to_value(ApuStateBlob {
            version: STATE_VERSION,
            regs: self.regs.to_vec(),
            enabled_mask: self.enabled_mask,
            five_step_mode: self.five_step_mode,
            irq_inhibit: self.irq_inhibit,
            frame_irq: self.frame_irq,
            frame_acc: self.frame_acc,
            frame_step: self.frame_step,
            lengths: self.lengths.to_vec(),
            cycle: self.cycle,
        })
        .unwrap_or(Value::Null)
    }

    pub fn import_state(&mut self, state: &Value) -> Result<()> {
        let s: ApuStateBlob = serde_json::from_value(state.clone())?;
        if s.version != STATE_VERSION {
            return Err(EmuError::StateRestore(format!(
                "audio state version {} not supported",
                s.version
            )));
        }
        for (dst, src) in self.regs.iter_mut().zip(s.regs.iter()) {
            *dst = *src;
        }
        self.enabled_mask = s.enabled_mask;
        self.five_step_mode = s.five_step_mode;
        self.irq_inhibit = s.irq_inhibit;
        self.frame_irq = s.frame_irq;
        self.frame_acc = s.frame_acc;
        self.frame_step = s.frame_step;
        for (dst, src) in self.lengths.iter_mut().zip(s.lengths.iter()) {
            *dst = *src;
        }
        self.cycle = s.cycle;
        self.sample_acc = 0;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct ApuStateBlob {
    version: u32,
    regs: Vec<u8>,
    enabled_mask: u8,
    five_step_mode: bool,
    irq_inhibit: bool,
    frame_irq: bool,
    frame_acc: u32,
    frame_step: u8,
    lengths: Vec<u8>,
    cycle: u64,
}
