/*!
Savestate protocol.

A snapshot is one JSON document embedding the full ROM image, machine
memory, timing accumulators, the id of every active core and each core's
opaque state blob. Restoring is resilient per field: a stage that fails
(unknown core id, malformed blob, short buffer) logs and moves on, so one
bad field degrades that subsystem instead of rejecting the whole snapshot.

Restore order matters: the cartridge is rebuilt first when the embedded
ROM differs from the loaded one, then timing, RAM and mapper state (banks
must be mapped before PRG/CHR RAM contents mean anything), then the cores,
controllers last.

Core selection carries both the string id and a legacy numeric slot; when
the id is unknown the slot indexes the preference order, so snapshots
written by builds with different core rosters still land on something
runnable.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::Bus;
use crate::cartridge::Cartridge;
use crate::console::Console;
use crate::cpu::CPU_PREFERENCE;
use crate::errors::{EmuError, Result};

const SNAPSHOT_MAGIC: &str = "POLYNES";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    magic: String,
    version: u32,
    rom_name: String,
    rom_hash: String,
    rom: Vec<u8>,
    ram: Vec<u8>,
    extra_cycle_acc: u32,
    overshoot_carry: u32,
    global_cycle: u64,
    cpu_core_id: String,
    pixel_core_id: String,
    audio_core_id: String,
    /// Legacy slot numbers; index the preference order when the id above
    /// is not registered.
    cpu_core_slot: u32,
    audio_core_slot: u32,
    cpu: Value,
    pixel: Value,
    audio: Value,
    mapper: Value,
    prg_ram: Vec<u8>,
    chr_ram: Vec<u8>,
    pad1: (u8, u8, bool),
    pad2: (u8, u8, bool),
}

impl Console {
    pub fn save_state(&mut self) -> Result<String> {
        let cpu_id = self.cpu_registry.active_id();
        let audio_id = self.bus.audio_core_id();
        let snap = Snapshot {
            magic: SNAPSHOT_MAGIC.to_string(),
            version: SNAPSHOT_VERSION,
            rom_name: self.rom_name.clone(),
            rom_hash: self.bus.cartridge().rom_hash(),
            rom: self.bus.cartridge().rom().to_vec(),
            ram: self.bus.ram_snapshot(),
            extra_cycle_acc: self.timing.extra_cycle_acc,
            overshoot_carry: self.timing.overshoot_carry,
            global_cycle: self.timing.global_cycle,
            cpu_core_id: cpu_id.to_string(),
            pixel_core_id: self.bus.pixel_core_id().to_string(),
            audio_core_id: audio_id.to_string(),
            cpu_core_slot: slot_of(CPU_PREFERENCE, cpu_id),
            audio_core_slot: slot_of(Bus::audio_preference(), audio_id),
            cpu: self.cpu_registry.active().export_state(),
            pixel: self.bus.pixel().export_state(),
            audio: self.bus.audio().export_state(),
            mapper: self.bus.cartridge().mapper_state(),
            prg_ram: self.bus.cartridge().prg_ram_snapshot(),
            chr_ram: self.bus.cartridge().chr_ram_snapshot(),
            pad1: self.bus.pad1().raw_state(),
            pad2: self.bus.pad2().raw_state(),
        };
        Ok(serde_json::to_string(&snap)?)
    }

    pub fn load_state(&mut self, json: &str) -> Result<()> {
        let snap: Snapshot = serde_json::from_str(json)?;
        if snap.magic != SNAPSHOT_MAGIC {
            return Err(EmuError::StateRestore("not a snapshot document".into()));
        }
        if snap.version != SNAPSHOT_VERSION {
            return Err(EmuError::StateRestore(format!(
                "snapshot version {} not supported",
                snap.version
            )));
        }

        // Stage 1: make sure the right game is in the machine.
        let same_rom = self.bus.cartridge().rom().len() == snap.rom.len()
            && self.bus.cartridge().rom_hash() == snap.rom_hash;
        if !same_rom {
            let cartridge = Cartridge::new(&snap.rom)?;
            self.bus = Bus::new(cartridge);
            log::info!("snapshot carries a different rom, cartridge rebuilt");
        }

        // Stage 2: timing.
        self.timing.extra_cycle_acc = snap.extra_cycle_acc;
        self.timing.overshoot_carry = snap.overshoot_carry;
        self.timing.global_cycle = snap.global_cycle;
        self.timing.reseed_markers();

        // Stage 3: memory, mapper before its RAM banks.
        self.bus.load_ram(&snap.ram);
        self.bus.cartridge().load_mapper_state(&snap.mapper);
        self.bus.cartridge().load_prg_ram(&snap.prg_ram);
        self.bus.cartridge().load_chr_ram(&snap.chr_ram);

        // Stage 4: cores, each individually resilient.
        let cpu_id = resolve_core_id(
            &snap.cpu_core_id,
            snap.cpu_core_slot,
            CPU_PREFERENCE,
            |id| self.cpu_registry.contains(id),
        );
        if let Err(e) = self.cpu_registry.swap_to(&cpu_id, |_, _| {}) {
            log::warn!("cpu core selection failed: {e}");
        }
        if let Err(e) = self.cpu_registry.active_mut().import_state(&snap.cpu) {
            log::warn!("cpu state not restored: {e}");
        }

        if self.bus.select_pixel(&snap.pixel_core_id).is_err() {
            log::warn!(
                "pixel core '{}' unknown, keeping '{}'",
                snap.pixel_core_id,
                self.bus.pixel_core_id()
            );
        }
        if let Err(e) = self.bus.pixel().import_state(&snap.pixel) {
            log::warn!("pixel state not restored: {e}");
        }
        self.bus.pixel().clear_buffers();

        let audio_id = resolve_core_id(
            &snap.audio_core_id,
            snap.audio_core_slot,
            Bus::audio_preference(),
            |id| self.bus.audio_core_ids().iter().any(|c| *c == id),
        );
        if let Err(e) = self.bus.select_audio(&audio_id) {
            log::warn!("audio core selection failed: {e}");
        }
        if let Err(e) = self.bus.audio().import_state(&snap.audio) {
            log::warn!("audio state not restored: {e}");
        }
        self.bus.audio().clear_audio_buffers();

        // Stage 5: controllers.
        let (l, s, st) = snap.pad1;
        self.bus.pad1().restore_raw_state(l, s, st);
        let (l, s, st) = snap.pad2;
        self.bus.pad2().restore_raw_state(l, s, st);

        self.rom_name = snap.rom_name;
        self.crashed = false;
        self.crash_info = None;
        Ok(())
    }
}

/// Which game a snapshot holds, without restoring it.
pub fn saved_rom_name(json: &str) -> Option<String> {
    let v: Value = serde_json::from_str(json).ok()?;
    if v.get("magic")?.as_str()? != SNAPSHOT_MAGIC {
        return None;
    }
    Some(v.get("rom_name")?.as_str()?.to_string())
}

fn slot_of(preference: &[&str], id: &str) -> u32 {
    preference.iter().position(|p| *p == id).unwrap_or(0) as u32
}

fn resolve_core_id(
    id: &str,
    slot: u32,
    preference: &[&str],
    known: impl Fn(&str) -> bool,
) -> String {
    if known(id) {
        return id.to_string();
    }
    let fallback = preference
        .get(slot as usize)
        .copied()
        .unwrap_or(preference[0]);
    log::warn!("core id '{id}' unknown, falling back to '{fallback}'");
    fallback.to_string()
}
