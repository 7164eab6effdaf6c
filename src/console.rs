/*!
The console: owns the CPU registry and the bus, and runs frames.

A frame starts by asking the pacer for a cycle budget, then executes CPU
instructions under the configured strategy, flushing device time (pixel
dots, audio cycles, DMA stalls) in batches. Whatever the budget, the last
instruction may run past it; the pacer carries that debt forward.

Illegal opcodes route through the crash policy:
- `Halt` freezes the machine and presents a diagnostic frame,
- `SkipOneByte` advances PC past the offending byte and keeps going,
- `ExternalRepair` invokes a caller-supplied hook with the faulting PC,
  optionally retrying the same address (`persistent_retry`).
*/

use crate::bus::Bus;
use crate::cartridge::Cartridge;
use crate::cores::{CpuCore, CpuStep, CpuRegs, FRAME_BYTES};
use crate::cpu::{CPU_CORES, CPU_PREFERENCE};
use crate::diagnostics::render_crash_screen;
use crate::errors::{EmuError, Result};
use crate::registry::CoreRegistry;
use crate::scheduler::{
    BATCH_CYCLE_THRESHOLD, BURST_INSTRUCTION_CAP, BatchTuner, FrameTiming, SchedulerConfig,
    Strategy,
};

/// What to do when the CPU fetches an opcode it cannot execute.
#[derive(Default)]
pub enum CrashPolicy {
    #[default]
    Halt,
    SkipOneByte,
    ExternalRepair {
        hook: Box<dyn FnMut(u16) + Send>,
        /// Retry the same PC instead of advancing past the bad byte.
        persistent_retry: bool,
    },
}

/// Cycles charged per skipped/repaired illegal byte, so recovery always
/// makes forward progress against the frame budget.
const ILLEGAL_SKIP_CYCLES: u32 = 2;

const AUDIO_QUEUE_SOFT_CAP: usize = 6144;
const AUDIO_PULL_CHUNK: usize = 2048;

pub struct Console {
    pub(crate) cpu_registry: CoreRegistry<dyn CpuCore>,
    pub(crate) bus: Bus,
    pub(crate) timing: FrameTiming,
    pub(crate) config: SchedulerConfig,
    tuner: BatchTuner,
    crash_policy: CrashPolicy,
    pub(crate) crashed: bool,
    pub(crate) crash_info: Option<String>,
    crash_frame: Vec<u8>,
    pub(crate) rom_name: String,
    frames_total: u64,
}

impl Console {
    pub fn new(rom: &[u8], rom_name: &str) -> Result<Self> {
        let cartridge = Cartridge::new(rom)?;
        let mut bus = Bus::new(cartridge);
        let mut cpu_registry = CoreRegistry::new("cpu", CPU_CORES, CPU_PREFERENCE);
        cpu_registry.active_mut().reset(&mut bus);
        log::info!("loaded rom '{rom_name}' ({} bytes)", rom.len());
        Ok(Self {
            cpu_registry,
            bus,
            timing: FrameTiming::new(),
            config: SchedulerConfig::default(),
            tuner: BatchTuner::new(BATCH_CYCLE_THRESHOLD),
            crash_policy: CrashPolicy::Halt,
            crashed: false,
            crash_info: None,
            crash_frame: Vec::new(),
            rom_name: rom_name.to_string(),
            frames_total: 0,
        })
    }

    /// Replace the running game. The machine is rebuilt from scratch except
    /// for the audio core selection, which is preserved by id so a muted
    /// console stays muted across loads.
    pub fn load_rom(&mut self, rom: &[u8], rom_name: &str) -> Result<()> {
        let previous_audio = self.bus.audio_core_id();
        let cartridge = match Cartridge::new(rom) {
            Ok(c) => c,
            Err(EmuError::UnsupportedMapper { id }) => {
                self.crashed = true;
                self.crash_info = Some(format!("MAPPER {id}"));
                self.render_unsupported_frame(id);
                log::warn!("rom '{rom_name}' needs unsupported mapper {id}");
                return Err(EmuError::UnsupportedMapper { id });
            }
            Err(e) => return Err(e),
        };
        self.bus = Bus::new(cartridge);
        self.bus.hard_reset_audio(previous_audio);
        self.cpu_registry.active_mut().reset(&mut self.bus);
        self.timing = FrameTiming::new();
        self.frames_total = 0;
        self.crashed = false;
        self.crash_info = None;
        self.rom_name = rom_name.to_string();
        log::info!("loaded rom '{rom_name}' ({} bytes)", rom.len());
        Ok(())
    }

    // ------------- frame execution -------------

    pub fn run_frame(&mut self) {
        if self.crashed {
            return;
        }
        let Some(target) = self.timing.begin_frame() else {
            // Debt swallowed the whole frame; the previous buffer stands.
            self.frames_total += 1;
            return;
        };
        let executed = match self.config.strategy {
            Strategy::Batch => self.run_frame_batch(target),
            Strategy::EventDriven => self.run_frame_events(target),
        };
        self.timing.end_frame(target, executed);
        if self.config.adaptive_batching {
            self.tuner.observe(executed, target);
        }
        if !self.crashed {
            self.bus.update_frame();
        }
        self.frames_total += 1;
    }

    pub fn run_frames(&mut self, n: u32) {
        for _ in 0..n {
            self.run_frame();
        }
    }

    fn run_frame_batch(&mut self, target: u32) -> u32 {
        self.cpu_registry
            .active_mut()
            .set_inline_interrupt_polling(true);
        let threshold = if self.config.adaptive_batching {
            self.tuner.threshold()
        } else {
            self.config.batch_cycle_threshold
        };

        let mut executed = 0u32;
        let mut batch_cycles = 0u32;
        let mut batch_len = 0u32;
        while executed + batch_cycles < target && !self.crashed {
            match self.cpu_registry.active_mut().execute_instruction(&mut self.bus) {
                CpuStep::Ok(c) => {
                    batch_cycles += c;
                    batch_len += 1;
                }
                CpuStep::IllegalOpcode(pc) => {
                    batch_cycles += self.handle_illegal(pc);
                }
            }
            let near_budget =
                executed + batch_cycles + self.config.min_remaining_flush_guard >= target;
            if batch_len >= self.config.max_instructions_per_batch
                || batch_cycles >= threshold
                || batch_len >= BURST_INSTRUCTION_CAP
                || near_budget
            {
                executed += self.flush_batch(batch_cycles);
                batch_cycles = 0;
                batch_len = 0;
                self.forward_interrupts();
            }
        }
        if batch_cycles > 0 {
            executed += self.flush_batch(batch_cycles);
            self.forward_interrupts();
        }
        executed
    }

    fn run_frame_events(&mut self, target: u32) -> u32 {
        self.cpu_registry
            .active_mut()
            .set_inline_interrupt_polling(false);
        let frame_end = self.timing.global_cycle + target as u64;
        let mut executed = 0u32;

        while self.timing.global_cycle < frame_end && !self.crashed {
            let boundary = self.timing.next_event(frame_end);
            let remaining = (boundary - self.timing.global_cycle) as u32;

            let mut batch_cycles = 0u32;
            let mut burst = 0u32;
            while batch_cycles < remaining && burst < BURST_INSTRUCTION_CAP && !self.crashed {
                match self.cpu_registry.active_mut().execute_instruction(&mut self.bus) {
                    CpuStep::Ok(c) => batch_cycles += c,
                    CpuStep::IllegalOpcode(pc) => batch_cycles += self.handle_illegal(pc),
                }
                burst += 1;
            }
            batch_cycles += self
                .cpu_registry
                .active_mut()
                .service_pending_interrupts(&mut self.bus);

            executed += self.flush_batch(batch_cycles);
            self.timing.service_markers();
            self.forward_interrupts();
        }
        executed
    }

    /// Advance devices by a retired CPU batch plus any DMA stall, and move
    /// the global clock. Returns the total cycles charged.
    pub(crate) fn flush_batch(&mut self, cpu_cycles: u32) -> u32 {
        let total = cpu_cycles + self.bus.consume_pending_stall();
        if total == 0 {
            return 0;
        }
        self.bus.step_pixel(total);
        self.bus.step_audio(total);
        self.bus.count_batch_flush();
        self.timing.global_cycle += total as u64;
        total
    }

    fn forward_interrupts(&mut self) {
        if self.bus.take_pixel_nmi() {
            self.cpu_registry.active_mut().request_nmi();
        }
        let irq = self.bus.irq_line_asserted();
        self.cpu_registry.active_mut().request_irq(irq);
    }

    fn handle_illegal(&mut self, pc: u16) -> u32 {
        // Detach the policy so a repair hook can run while the machine is
        // borrowed mutably.
        let mut policy = std::mem::take(&mut self.crash_policy);
        let cycles = match &mut policy {
            CrashPolicy::Halt => {
                self.crashed = true;
                self.crash_info = Some(format!("PC={pc:04X}"));
                log::error!("illegal opcode at {pc:04X}, halting");
                self.render_crash_frame();
                0
            }
            CrashPolicy::SkipOneByte => {
                self.cpu_registry.active_mut().add_to_pc(1);
                ILLEGAL_SKIP_CYCLES
            }
            CrashPolicy::ExternalRepair {
                hook,
                persistent_retry,
            } => {
                hook(pc);
                if !*persistent_retry {
                    self.cpu_registry.active_mut().add_to_pc(1);
                }
                ILLEGAL_SKIP_CYCLES
            }
        };
        self.crash_policy = policy;
        cycles
    }

    // ------------- diagnostic frames -------------

    fn render_crash_frame(&mut self) {
        let info = self.crash_info.clone().unwrap_or_default();
        render_crash_screen(
            &mut self.crash_frame,
            &[
                ("CRASHED", 8, 8),
                (info.as_str(), 8, 20),
                ("EXECUTION HALTED", 8, 32),
            ],
        );
    }

    fn render_unsupported_frame(&mut self, id: u8) {
        let info = format!("MAPPER {id}");
        render_crash_screen(
            &mut self.crash_frame,
            &[
                ("UNSUPPORTED MAPPER", 8, 8),
                (info.as_str(), 8, 20),
                ("CANNOT RUN THIS ROM", 8, 32),
            ],
        );
    }

    // ------------- presentation -------------

    /// Current presentable frame; the diagnostic frame while crashed.
    pub fn frame_buffer(&mut self) -> &[u8] {
        if self.crashed {
            if self.crash_frame.len() != FRAME_BYTES {
                self.render_crash_frame();
            }
            &self.crash_frame
        } else {
            self.bus.pixel().frame_buffer()
        }
    }

    /// Drain one playback chunk. A backlog past the soft cap drops the
    /// oldest samples first; stale audio is worse than a gap.
    pub fn audio_buffer(&mut self) -> Vec<f32> {
        let queued = self.bus.audio().queued_samples();
        if queued > AUDIO_QUEUE_SOFT_CAP {
            let dropped = queued - AUDIO_QUEUE_SOFT_CAP;
            let _ = self.bus.audio().pull_samples(dropped);
            log::debug!("audio backlog: dropped {dropped} samples");
        }
        self.bus.audio().pull_samples(AUDIO_PULL_CHUNK)
    }

    // ------------- inputs / configuration -------------

    pub fn set_inputs(&mut self, pad1: u8, pad2: u8) {
        self.bus.set_controller_inputs(pad1, pad2);
    }

    pub fn set_strategy(&mut self, strategy: Strategy) {
        self.config.strategy = strategy;
    }

    pub fn config_mut(&mut self) -> &mut SchedulerConfig {
        &mut self.config
    }

    pub fn set_crash_policy(&mut self, policy: CrashPolicy) {
        self.crash_policy = policy;
    }

    // ------------- core management -------------

    pub fn swap_cpu(&mut self, id: &str) -> Result<()> {
        self.cpu_registry.swap_to(id, |outgoing, incoming| {
            let t = outgoing.export_transfer();
            if let Err(e) = incoming.import_transfer(&t) {
                log::warn!("cpu transfer import incomplete: {e}");
            }
        })
    }

    pub fn swap_pixel(&mut self, id: &str) -> Result<()> {
        self.bus.swap_pixel(id)
    }

    pub fn swap_audio(&mut self, id: &str) -> Result<()> {
        self.bus.swap_audio(id)
    }

    pub fn cpu_core_id(&self) -> &'static str {
        self.cpu_registry.active_id()
    }

    pub fn pixel_core_id(&self) -> &'static str {
        self.bus.pixel_core_id()
    }

    pub fn audio_core_id(&self) -> &'static str {
        self.bus.audio_core_id()
    }

    pub fn cpu_core_ids(&self) -> Vec<&'static str> {
        self.cpu_registry.ids()
    }

    // ------------- observation -------------

    pub fn registers(&self) -> CpuRegs {
        self.cpu_registry.active().registers()
    }

    pub fn crashed(&self) -> bool {
        self.crashed
    }

    pub fn crash_info(&self) -> Option<&str> {
        self.crash_info.as_deref()
    }

    pub fn rom_name(&self) -> &str {
        &self.rom_name
    }

    pub fn frames_total(&self) -> u64 {
        self.frames_total
    }

    pub fn global_cycle(&self) -> u64 {
        self.timing.global_cycle
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    /// One-line fingerprint of machine state: registers plus checksums of
    /// the first and last 64 bytes of work RAM.
    pub fn state_digest(&self) -> String {
        let r = self.cpu_registry.active().registers();
        let ram = self.bus.ram();
        let sum_start: u16 = ram[..64].iter().map(|&b| b as u16).sum();
        let sum_end: u16 = ram[ram.len() - 64..].iter().map(|&b| b as u16).sum();
        format!(
            "PC={:04X} A={:02X} X={:02X} Y={:02X} P={:02X} SP={:04X} RS={:04X}/{:04X}",
            r.pc, r.a, r.x, r.y, r.p, r.sp as u16, sum_start, sum_end
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::BASE_CYCLES_PER_FRAME;
    use crate::test_utils::{build_ines, program_rom};
    use std::sync::{Arc, Mutex};

    /// LDA #$10; ADC #$05; STA $0200; INX; JMP $8000
    const TIGHT_LOOP: &[u8] = &[0xA9, 0x10, 0x69, 0x05, 0x8D, 0x00, 0x02, 0xE8, 0x4C, 0x00, 0x80];

    fn console(code: &[u8]) -> Console {
        Console::new(&program_rom(code), "test").unwrap()
    }

    #[test]
    fn sixty_frames_retire_one_second_of_cycles() {
        let mut c = console(TIGHT_LOOP);
        c.run_frames(60);
        assert_eq!(c.frames_total(), 60);
        // Budget for 60 frames is exactly the CPU clock; instruction
        // atomicity can only overshoot by a handful of cycles.
        let cycles = c.global_cycle();
        assert!(cycles >= 1_789_773, "{cycles}");
        assert!(cycles < 1_789_773 + 64, "{cycles}");
        let frame = c.frame_buffer();
        assert_eq!(frame.len(), FRAME_BYTES);
    }

    #[test]
    fn strategies_are_observationally_equivalent() {
        let mut batch = console(TIGHT_LOOP);
        let mut events = console(TIGHT_LOOP);
        events.set_strategy(Strategy::EventDriven);

        batch.run_frames(30);
        events.run_frames(30);
        assert_eq!(batch.state_digest(), events.state_digest());
        assert_eq!(batch.global_cycle(), events.global_cycle());
    }

    #[test]
    fn halt_policy_freezes_and_presents_diagnostics() {
        // NOP; JAM
        let mut c = console(&[0xEA, 0x02]);
        c.run_frame();
        assert!(c.crashed());
        assert_eq!(c.crash_info(), Some("PC=8001"));
        let cycles = c.global_cycle();
        let digest = c.state_digest();

        // Further frames are inert.
        c.run_frames(5);
        assert_eq!(c.global_cycle(), cycles);
        assert_eq!(c.state_digest(), digest);

        // Red diagnostic frame.
        let frame = c.frame_buffer();
        assert_eq!(&frame[0..4], &[200, 0, 0, 255]);
    }

    #[test]
    fn skip_policy_steps_over_bad_bytes() {
        // NOP; JAM; LDA #$77; JMP $8000
        let mut c = console(&[0xEA, 0x02, 0xA9, 0x77, 0x4C, 0x00, 0x80]);
        c.set_crash_policy(CrashPolicy::SkipOneByte);
        c.run_frame();
        assert!(!c.crashed());
        assert_eq!(c.registers().a, 0x77);
    }

    #[test]
    fn repair_hook_receives_the_faulting_pc() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut c = console(&[0xEA, 0x02, 0x4C, 0x00, 0x80]);
        c.set_crash_policy(CrashPolicy::ExternalRepair {
            hook: Box::new(move |pc| sink.lock().unwrap().push(pc)),
            persistent_retry: false,
        });
        c.run_frame();
        assert!(!c.crashed());
        let pcs = seen.lock().unwrap();
        assert!(!pcs.is_empty());
        assert!(pcs.iter().all(|&pc| pc == 0x8001));
    }

    #[test]
    fn cpu_swap_preserves_machine_state() {
        let mut c = console(TIGHT_LOOP);
        c.run_frames(3);
        let digest = c.state_digest();

        c.swap_cpu("TOL").unwrap();
        assert_eq!(c.cpu_core_id(), "TOL");
        assert_eq!(c.state_digest(), digest);

        c.run_frames(3);
        c.swap_cpu("REF").unwrap();
        let after = c.state_digest();
        c.run_frames(1);
        // Still advancing normally on the original core.
        assert_ne!(c.state_digest(), after);
    }

    #[test]
    fn audio_backlog_is_bounded() {
        let mut c = console(TIGHT_LOOP);
        // Run long enough to exceed the soft cap (44.1k samples/s).
        c.run_frames(20);
        let chunk = c.audio_buffer();
        assert!(chunk.len() <= 2048);
        assert!(c.bus_mut().audio().queued_samples() <= 6144);
    }

    #[test]
    fn loading_a_new_rom_preserves_audio_core_choice() {
        let mut c = console(TIGHT_LOOP);
        c.swap_audio("MUTE").unwrap();
        c.load_rom(&program_rom(&[0xEA, 0x4C, 0x00, 0x80]), "next").unwrap();
        assert_eq!(c.audio_core_id(), "MUTE");
        assert_eq!(c.rom_name(), "next");
        assert_eq!(c.frames_total(), 0);
    }

    #[test]
    fn unsupported_mapper_load_enters_the_terminal_state() {
        let mut c = console(TIGHT_LOOP);
        c.run_frames(2);
        // Mapper 77: low nibble 0xD in flags6, high nibble 0x40 in flags7.
        let rom = build_ines(1, 1, 0xD0, 0x40);
        let err = c.load_rom(&rom, "exotic").err().unwrap();
        assert!(matches!(err, EmuError::UnsupportedMapper { id: 77 }));
        assert!(c.crashed());
        assert_eq!(c.crash_info(), Some("MAPPER 77"));

        // Red diagnostic frame, and further frames are inert.
        let frame = c.frame_buffer();
        assert_eq!(&frame[0..4], &[200, 0, 0, 255]);
        let cycles = c.global_cycle();
        c.run_frames(3);
        assert_eq!(c.global_cycle(), cycles);
    }

    #[test]
    fn frame_budget_tracks_the_long_frame_cadence() {
        let mut c = console(TIGHT_LOOP);
        c.run_frame();
        // First frame never carries debt above a frame, so it ran at least
        // the base budget.
        assert!(c.global_cycle() >= BASE_CYCLES_PER_FRAME as u64);
    }
}
