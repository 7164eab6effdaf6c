/*!
Memory bus: the 64 KiB CPU address space.

Routing is driven by a 256-entry page table indexed by the high address
byte. Pages 0x00-0x1F resolve straight into the 2 KiB work RAM (mirrored
four times, so the page offset is `(page % 8) * 0x100`); every other page
dispatches to the owning device:

  0x2000-0x3FFF  pixel-unit registers, eight bytes mirrored throughout
  0x4000-0x4013  audio-unit registers (latched for swap replay)
  0x4014         sprite DMA trigger
  0x4015         audio status/enable
  0x4016         controller strobe (write), pad 1 serial (read)
  0x4017         audio frame counter (write), pad 2 serial (read)
  0x4020-0xFFFF  cartridge / mapper

The bus owns the pixel and audio core registries so register traffic always
reaches the active implementation; the CPU registry lives on the console so
the CPU can borrow the bus mutably while executing.

Every routed read/write bumps instrumentation counters. `peek`/`poke` skip
both the counters and read side effects, for debugger-style access.
*/

use crate::apu::{AUDIO_CORES, AUDIO_PREFERENCE};
use crate::cartridge::Cartridge;
use crate::controller::Controller;
use crate::cores::{AudioCore, PixelCore};
use crate::errors::Result;
use crate::ppu::{PIXEL_CORES, PIXEL_PREFERENCE};
use crate::registry::CoreRegistry;

mod dma;

pub const RAM_SIZE: usize = 0x800;
const AUDIO_LATCH_SIZE: usize = 0x18;

/// What a page of the address space maps to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PageKind {
    /// Direct window into work RAM at this byte offset.
    Ram { offset: usize },
    /// Needs full address decoding.
    Dispatch,
}

/// Access counters, cheap enough to keep always-on.
#[derive(Copy, Clone, Debug, Default)]
pub struct Instrumentation {
    pub reads: u64,
    pub writes: u64,
    pub audio_steps: u64,
    pub dma_writes: u64,
    pub batch_flushes: u64,
}

pub struct Bus {
    ram: [u8; RAM_SIZE],
    pages: [PageKind; 256],
    cartridge: Cartridge,
    pad1: Controller,
    pad2: Controller,
    pixel_registry: CoreRegistry<dyn PixelCore>,
    audio_registry: CoreRegistry<dyn AudioCore>,
    /// Last value written to each audio register, replayed onto an incoming
    /// audio core so channel configuration survives a swap.
    audio_latch: [u8; AUDIO_LATCH_SIZE],
    audio_latch_written: u32,
    /// DMA stall cycles not yet charged to the schedule.
    pending_stall: u32,
    instrumentation: Instrumentation,
}

impl Bus {
    pub fn new(cartridge: Cartridge) -> Self {
        let mut pages = [PageKind::Dispatch; 256];
        for (page, slot) in pages.iter_mut().enumerate().take(0x20) {
            *slot = PageKind::Ram {
                offset: (page % 8) * 0x100,
            };
        }
        Self {
            ram: [0; RAM_SIZE],
            pages,
            cartridge,
            pad1: Controller::new(),
            pad2: Controller::new(),
            pixel_registry: CoreRegistry::new("pixel", PIXEL_CORES, PIXEL_PREFERENCE),
            audio_registry: CoreRegistry::new("audio", AUDIO_CORES, AUDIO_PREFERENCE),
            audio_latch: [0; AUDIO_LATCH_SIZE],
            audio_latch_written: 0,
            pending_stall: 0,
            instrumentation: Instrumentation::default(),
        }
    }

    // ------------- CPU-visible access -------------

    pub fn read(&mut self, addr: u16) -> u8 {
        self.instrumentation.reads += 1;
        match self.pages[(addr >> 8) as usize] {
            PageKind::Ram { offset } => self.ram[offset + (addr & 0xFF) as usize],
            PageKind::Dispatch => self.dispatch_read(addr),
        }
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        self.instrumentation.writes += 1;
        match self.pages[(addr >> 8) as usize] {
            PageKind::Ram { offset } => self.ram[offset + (addr & 0xFF) as usize] = value,
            PageKind::Dispatch => self.dispatch_write(addr, value),
        }
    }

    fn dispatch_read(&mut self, addr: u16) -> u8 {
        match addr {
            0x2000..=0x3FFF => {
                let reg = 0x2000 | (addr & 7);
                self.pixel_registry
                    .active_mut()
                    .read_register(reg, &self.cartridge)
            }
            0x4015 => self.audio_registry.active_mut().read_register(addr),
            0x4016 => self.pad1.read(),
            0x4017 => self.pad2.read(),
            0x4000..=0x4013 => self.audio_registry.active_mut().read_register(addr),
            0x4014 | 0x4018..=0x401F => 0,
            0x4020..=0xFFFF => self.cartridge.cpu_read(addr),
            // RAM pages never reach the dispatcher.
            _ => 0,
        }
    }

    fn dispatch_write(&mut self, addr: u16, value: u8) {
        match addr {
            0x2000..=0x3FFF => {
                let reg = 0x2000 | (addr & 7);
                self.pixel_registry
                    .active_mut()
                    .write_register(reg, value, &self.cartridge);
            }
            0x4014 => self.oam_dma(value),
            // Controller strobe only; never latched as audio traffic.
            0x4016 => {
                self.pad1.write_strobe(value);
                self.pad2.write_strobe(value);
            }
            0x4000..=0x4013 | 0x4015 | 0x4017 => {
                self.latch_audio_write(addr, value);
                self.audio_registry.active_mut().write_register(addr, value);
            }
            0x4018..=0x401F => {}
            0x4020..=0xFFFF => self.cartridge.cpu_write(addr, value),
            _ => {}
        }
    }

    #[inline]
    fn latch_audio_write(&mut self, addr: u16, value: u8) {
        let idx = (addr - 0x4000) as usize;
        self.audio_latch[idx] = value;
        self.audio_latch_written |= 1 << idx;
    }

    /// Side-effect-free read; skips instrumentation and device registers
    /// whose reads mutate state.
    pub fn peek(&self, addr: u16) -> u8 {
        match self.pages[(addr >> 8) as usize] {
            PageKind::Ram { offset } => self.ram[offset + (addr & 0xFF) as usize],
            PageKind::Dispatch => match addr {
                0x4020..=0xFFFF => self.cartridge.cpu_read(addr),
                _ => 0,
            },
        }
    }

    pub fn poke(&mut self, addr: u16, value: u8) {
        match self.pages[(addr >> 8) as usize] {
            PageKind::Ram { offset } => self.ram[offset + (addr & 0xFF) as usize] = value,
            PageKind::Dispatch => {
                if addr >= 0x4020 {
                    self.cartridge.cpu_write(addr, value);
                }
            }
        }
    }

    // ------------- devices -------------

    pub fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }

    pub fn pixel(&mut self) -> &mut dyn PixelCore {
        self.pixel_registry.active_mut()
    }

    pub fn audio(&mut self) -> &mut dyn AudioCore {
        self.audio_registry.active_mut()
    }

    pub fn pixel_core_id(&self) -> &'static str {
        self.pixel_registry.active_id()
    }

    pub fn audio_core_id(&self) -> &'static str {
        self.audio_registry.active_id()
    }

    pub fn pixel_core_ids(&self) -> Vec<&'static str> {
        self.pixel_registry.ids()
    }

    pub fn audio_core_ids(&self) -> Vec<&'static str> {
        self.audio_registry.ids()
    }

    /// Step the pixel unit by CPU cycles (3 dots each).
    pub fn step_pixel(&mut self, cpu_cycles: u32) {
        self.pixel_registry
            .active_mut()
            .step(cpu_cycles * 3, &self.cartridge);
    }

    /// Step the audio unit by CPU cycles.
    pub fn step_audio(&mut self, cpu_cycles: u32) {
        self.instrumentation.audio_steps += 1;
        self.audio_registry.active_mut().step(cpu_cycles);
    }

    /// Recompose the presentable frame after the last cycle of a frame.
    pub fn update_frame(&mut self) {
        self.pixel_registry
            .active_mut()
            .update_frame_buffer(&self.cartridge);
    }

    pub fn take_pixel_nmi(&mut self) -> bool {
        self.pixel_registry.active_mut().take_nmi_request()
    }

    /// Mapper or audio-unit IRQ line state.
    pub fn irq_line_asserted(&self) -> bool {
        self.cartridge.irq_pending() || self.audio_registry.active().irq_asserted()
    }

    pub fn set_controller_inputs(&mut self, pad1: u8, pad2: u8) {
        self.pad1.set_mask(pad1);
        self.pad2.set_mask(pad2);
    }

    pub fn pad1(&mut self) -> &mut Controller {
        &mut self.pad1
    }

    pub fn pad2(&mut self) -> &mut Controller {
        &mut self.pad2
    }

    // ------------- stall / instrumentation -------------

    /// Take the DMA stall cycles accumulated since the last flush.
    pub fn consume_pending_stall(&mut self) -> u32 {
        std::mem::take(&mut self.pending_stall)
    }

    pub fn count_batch_flush(&mut self) {
        self.instrumentation.batch_flushes += 1;
    }

    pub fn instrumentation(&self) -> Instrumentation {
        self.instrumentation
    }

    pub fn reset_instrumentation(&mut self) {
        self.instrumentation = Instrumentation::default();
    }

    // ------------- hot-swaps -------------

    /// Swap the active pixel core, carrying register and memory state over
    /// and releasing large buffers on both sides.
    pub fn swap_pixel(&mut self, id: &str) -> Result<()> {
        self.pixel_registry.swap_to(id, |outgoing, incoming| {
            let t = outgoing.export_transfer();
            if let Err(e) = incoming.import_transfer(&t) {
                log::warn!("pixel transfer import incomplete: {e}");
            }
            outgoing.clear_buffers();
            incoming.clear_buffers();
        })
    }

    /// Swap the active audio core. Channel registers are not part of the
    /// transfer object; the write latch is replayed instead.
    pub fn swap_audio(&mut self, id: &str) -> Result<()> {
        let latch = self.audio_latch;
        let written = self.audio_latch_written;
        self.audio_registry.swap_to(id, |outgoing, incoming| {
            let t = outgoing.export_transfer();
            if let Err(e) = incoming.import_transfer(&t) {
                log::warn!("audio transfer import incomplete: {e}");
            }
            outgoing.clear_audio_buffers();
            for idx in 0..AUDIO_LATCH_SIZE {
                // 0x4014 is the DMA trigger, never an audio register.
                if idx == 0x14 || written & (1 << idx) == 0 {
                    continue;
                }
                incoming.write_register(0x4000 + idx as u16, latch[idx]);
            }
        })
    }

    /// Select a core without any state carry-over (savestate restore path).
    pub fn select_pixel(&mut self, id: &str) -> Result<()> {
        self.pixel_registry.swap_to(id, |_, _| {})
    }

    pub fn select_audio(&mut self, id: &str) -> Result<()> {
        self.audio_registry.swap_to(id, |_, _| {})
    }

    /// Drop all cached audio core instances and rebuild the active one.
    /// Used on ROM load so no channel state leaks between titles.
    pub fn hard_reset_audio(&mut self, previous: &str) {
        self.audio_registry.hard_reset(previous, AUDIO_PREFERENCE);
        self.audio_latch = [0; AUDIO_LATCH_SIZE];
        self.audio_latch_written = 0;
    }

    pub fn pixel_preference() -> &'static [&'static str] {
        PIXEL_PREFERENCE
    }

    pub fn audio_preference() -> &'static [&'static str] {
        AUDIO_PREFERENCE
    }

    // ------------- snapshot surface -------------

    pub fn ram_snapshot(&self) -> Vec<u8> {
        self.ram.to_vec()
    }

    pub fn load_ram(&mut self, data: &[u8]) {
        let n = self.ram.len().min(data.len());
        self.ram[..n].copy_from_slice(&data[..n]);
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }
}
