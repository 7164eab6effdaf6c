#![doc = r#"
polynes: an 8-bit console core with hot-swappable processing units.

The machine is a classic 6502-style console: 2 KiB of mirrored work RAM, a
page-table bus, a pixel unit on a 341x262 dot grid, a frame-sequenced
audio unit and cartridge mappers (NROM, CNROM, MMC3). What makes it
unusual is that every processing unit is a replaceable core: CPU, pixel
and audio implementations register in explicit tables and can be swapped
mid-run with state carried across.

Frames are paced by a fixed-point scheduler (29829 + 33/60 cycles per
frame) under one of two observationally equivalent strategies, batched or
event-driven. Illegal opcodes route through a configurable crash policy
instead of tearing the machine down, and the savestate protocol restores
snapshots field by field, degrading gracefully when a snapshot came from
a different build.

```no_run
use polynes::{Console, Strategy};

let rom = std::fs::read("game.nes").unwrap();
let mut console = Console::new(&rom, "game").unwrap();
console.set_strategy(Strategy::EventDriven);
console.run_frame();
let frame = console.frame_buffer(); // 256x240 RGBA
```
"#]

pub mod apu;
pub mod benchmark;
pub mod bus;
pub mod cadence;
pub mod cartridge;
pub mod console;
pub mod controller;
pub mod cores;
pub mod cpu;
pub mod diagnostics;
pub mod errors;
pub mod mapper;
pub mod mappers;
pub mod ppu;
pub mod registry;
pub mod savestate;
pub mod scheduler;

#[cfg(test)]
pub mod test_utils;

pub use benchmark::BenchReport;
pub use bus::Bus;
pub use cadence::{CadenceDriver, CallbackCadence, FrameSink, ThreadCadence};
pub use cartridge::Cartridge;
pub use console::{Console, CrashPolicy};
pub use controller::{Button, Controller};
pub use cores::{AudioCore, CpuCore, CpuRegs, CpuStep, PixelCore};
pub use cores::{FRAME_BYTES, FRAME_HEIGHT, FRAME_WIDTH};
pub use errors::{EmuError, Result};
pub use savestate::saved_rom_name;
pub use scheduler::{SchedulerConfig, Strategy};
