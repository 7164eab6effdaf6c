/*!
Contracts for interchangeable processing-unit implementations ("cores").

Three contracts exist: CPU, pixel unit, audio unit. Each core is identified
by a stable short id string and can be swapped while execution continues.
State moves between heterogeneous implementations two ways:

- A contract-specific plain-data transfer object (`CpuTransfer`,
  `PixelTransfer`, `AudioTransfer`) used during hot-swaps. Imports are
  best-effort; a core keeps its own defaults for fields it does not model.
- An opaque versioned JSON blob (`export_state`/`import_state`) used by the
  savestate protocol. Blobs are decoded defensively; the shape is owned by
  the producing core, never assumed by the consumer.

CPU faults are values, not unwinds: `execute_instruction` returns
`CpuStep::IllegalOpcode(pc)` instead of panicking, and the scheduler decides
what to do under its configured crash policy.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::Bus;
use crate::cartridge::Cartridge;
use crate::errors::Result;

pub const FRAME_WIDTH: usize = 256;
pub const FRAME_HEIGHT: usize = 240;
/// RGBA8, four bytes per dot.
pub const FRAME_BYTES: usize = FRAME_WIDTH * FRAME_HEIGHT * 4;

/// Outcome of executing a single CPU instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CpuStep {
    /// Instruction retired; cycles consumed (including penalties).
    Ok(u32),
    /// Undocumented/illegal opcode fetched at this PC and the core is
    /// configured to report rather than skip it.
    IllegalOpcode(u16),
}

/// Externally observable 6502 register file.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuRegs {
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub sp: u8,
}

/// Plain-data state carried between CPU cores on a hot-swap.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CpuTransfer {
    pub regs: CpuRegs,
    pub pending_nmi: bool,
    pub irq_line: bool,
    pub ignore_illegal: bool,
}

/// Plain-data state carried between pixel cores on a hot-swap. Vectors may
/// be empty or oddly sized when the outgoing core does not model a field;
/// importers take what fits and keep defaults for the rest.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PixelTransfer {
    pub ctrl: u8,
    pub mask: u8,
    pub status: u8,
    pub oam_addr: u8,
    pub scroll_x: u8,
    pub scroll_y: u8,
    pub vram_addr: u16,
    pub write_toggle: bool,
    pub vram: Vec<u8>,
    pub palette: Vec<u8>,
    pub oam: Vec<u8>,
}

/// Plain-data state carried between audio cores on a hot-swap. Channel
/// register contents are not carried here; the bus replays its register
/// latch onto the incoming core after activation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AudioTransfer {
    pub enabled_mask: u8,
    pub five_step_mode: bool,
    pub irq_inhibit: bool,
}

pub trait CpuCore: Send {
    fn id(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// Load PC from the reset vector and re-establish power-on register state.
    fn reset(&mut self, bus: &mut Bus);

    /// Execute exactly one instruction (servicing a pending interrupt first
    /// when inline polling is enabled).
    fn execute_instruction(&mut self, bus: &mut Bus) -> CpuStep;

    /// Service any pending NMI/IRQ now, returning the cycles consumed (0 if
    /// nothing was pending). Used by the event-driven scheduler, which only
    /// services interrupts at event boundaries.
    fn service_pending_interrupts(&mut self, bus: &mut Bus) -> u32;

    /// When disabled, `execute_instruction` never services interrupts on its
    /// own; the scheduler calls `service_pending_interrupts` explicitly.
    fn set_inline_interrupt_polling(&mut self, enabled: bool);

    /// Level-triggered IRQ line.
    fn request_irq(&mut self, asserted: bool);
    /// Edge-triggered NMI.
    fn request_nmi(&mut self);

    fn registers(&self) -> CpuRegs;
    fn set_registers(&mut self, regs: CpuRegs);

    /// Move PC by a signed delta. Used by crash recovery to skip a byte.
    fn add_to_pc(&mut self, delta: i16);

    /// When set, illegal opcodes behave as one-byte NOPs instead of
    /// producing `CpuStep::IllegalOpcode`.
    fn set_ignore_illegal(&mut self, ignore: bool);
    fn ignore_illegal(&self) -> bool;

    fn export_transfer(&self) -> CpuTransfer;
    fn import_transfer(&mut self, t: &CpuTransfer) -> Result<()>;

    fn export_state(&self) -> Value;
    fn import_state(&mut self, state: &Value) -> Result<()>;
}

pub trait PixelCore: Send {
    fn id(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// Advance by pixel-clock dots (3 per CPU cycle).
    fn step(&mut self, dots: u32, cart: &Cartridge);

    /// Packed RGBA8 frame, always `FRAME_BYTES` long. Reallocates lazily if
    /// buffers were released.
    fn frame_buffer(&mut self) -> &[u8];
    /// Compose the presentable frame from current rendering state.
    fn update_frame_buffer(&mut self, cart: &Cartridge);

    /// The 8 registers mirrored through 0x2000-0x3FFF; `addr` is already
    /// folded to 0x2000 + (addr & 7) by the bus.
    fn read_register(&mut self, addr: u16, cart: &Cartridge) -> u8;
    fn write_register(&mut self, addr: u16, value: u8, cart: &Cartridge);

    /// Receive a full 256-byte sprite-memory page. Writing starts at the
    /// current OAM address register and wraps as an 8-bit counter.
    fn write_oam_dma(&mut self, data: &[u8; 256]);

    /// Release large transient buffers (frame buffer, caches). Called on
    /// both sides of a hot-swap to bound peak memory.
    fn clear_buffers(&mut self);

    /// Fill the frame buffer with a deterministic static/noise pattern.
    fn generate_noise_frame(&mut self);

    /// True once per vblank when NMI generation is enabled; reading clears.
    fn take_nmi_request(&mut self) -> bool;

    /// True once per completed frame regardless of NMI settings; reading
    /// clears. Hosts use this to pace presentation.
    fn take_frame_complete(&mut self) -> bool;

    fn export_transfer(&self) -> PixelTransfer;
    fn import_transfer(&mut self, t: &PixelTransfer) -> Result<()>;

    fn export_state(&self) -> Value;
    fn import_state(&mut self, state: &Value) -> Result<()>;
}

pub trait AudioCore: Send {
    fn id(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// Advance by CPU cycles, accumulating output samples.
    fn step(&mut self, cpu_cycles: u32);

    /// Register window 0x4000-0x4017 (0x4014 never arrives here; the bus
    /// intercepts it as the DMA trigger).
    fn write_register(&mut self, addr: u16, value: u8);
    fn read_register(&mut self, addr: u16) -> u8;

    /// Drain up to `max` queued samples, oldest first.
    fn pull_samples(&mut self, max: usize) -> Vec<f32>;
    fn queued_samples(&self) -> usize;
    fn sample_rate(&self) -> u32;
    fn clear_audio_buffers(&mut self);

    /// Frame-sequencer/DMC IRQ line, polled by the bus each flush.
    fn irq_asserted(&self) -> bool;

    fn reset(&mut self);

    fn export_transfer(&self) -> AudioTransfer;
    fn import_transfer(&mut self, t: &AudioTransfer) -> Result<()>;

    fn export_state(&self) -> Value;
    fn import_state(&mut self, state: &Value) -> Result<()>;
}

/// Copy at most `dst.len()` bytes from a transferred vector, leaving the
/// destination untouched where the source is short. Shared by defensive
/// importers.
pub(crate) fn copy_clamped(dst: &mut [u8], src: &[u8]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}
