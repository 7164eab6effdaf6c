/*!
Cartridge: iNES v1 parsing and mapper construction.

Layout of an iNES v1 image:
  - 16-byte header: "NES\x1A", PRG size (16 KiB units), CHR size (8 KiB
    units), flags6 (mirroring/battery/trainer/low mapper nibble), flags7
    (high mapper nibble), PRG RAM size (8 KiB units).
  - optional 512-byte trainer, then PRG ROM, then CHR ROM.

A cartridge keeps the full ROM image (snapshots embed it so a restore can
rebuild the cartridge when the loaded game differs) and owns the concrete
mapper behind `RefCell` so pixel cores can reach CHR through a shared
reference during rendering.

Unsupported mapper ids fail with a typed error at construction; the console
turns that into the diagnostic screen instead of letting it escape.
*/

use std::cell::RefCell;

use serde_json::Value;

use crate::errors::{EmuError, Result};
use crate::mapper::{Mapper, Mirroring, Nrom};
use crate::mappers::{Cnrom, Mmc3};

pub struct Cartridge {
    rom: Vec<u8>,
    mapper_id: u8,
    header_mirroring: Mirroring,
    mapper: RefCell<Box<dyn Mapper>>,
}

impl Cartridge {
    pub fn new(rom: &[u8]) -> Result<Self> {
        if rom.len() < 16 || &rom[0..4] != b"NES\x1A" {
            return Err(EmuError::InvalidRom("missing iNES magic".into()));
        }
        let prg_units = rom[4] as usize;
        let chr_units = rom[5] as usize;
        let flags6 = rom[6];
        let flags7 = rom[7];
        let prg_ram_units = rom[8] as usize;
        let mapper_id = (flags6 >> 4) | (flags7 & 0xF0);

        let trainer = if flags6 & 0x04 != 0 { 512 } else { 0 };
        let prg_len = prg_units * 16 * 1024;
        let chr_len = chr_units * 8 * 1024;
        let body = 16 + trainer;
        if rom.len() < body + prg_len + chr_len {
            return Err(EmuError::InvalidRom(format!(
                "image truncated: need {} bytes, have {}",
                body + prg_len + chr_len,
                rom.len()
            )));
        }
        if prg_len == 0 {
            return Err(EmuError::InvalidRom("no PRG ROM banks".into()));
        }

        let prg = rom[body..body + prg_len].to_vec();
        let chr_rom = rom[body + prg_len..body + prg_len + chr_len].to_vec();
        // CHR size 0 means the board carries 8 KiB of CHR RAM instead.
        let chr_is_ram = chr_rom.is_empty();
        let chr = if chr_is_ram {
            vec![0u8; 8 * 1024]
        } else {
            chr_rom
        };
        let work_ram = prg_ram_units.max(1) * 8 * 1024;

        let mapper: Box<dyn Mapper> = match mapper_id {
            0 => Box::new(Nrom::new(prg, chr, chr_is_ram, work_ram)),
            3 => Box::new(Cnrom::new(prg, chr)),
            4 => Box::new(Mmc3::new(prg, chr, chr_is_ram)),
            id => return Err(EmuError::UnsupportedMapper { id }),
        };

        let header_mirroring = if flags6 & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };

        Ok(Self {
            rom: rom.to_vec(),
            mapper_id,
            header_mirroring,
            mapper: RefCell::new(mapper),
        })
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    /// FNV-1a over the full image; used only to decide whether a snapshot's
    /// embedded ROM matches the loaded one.
    pub fn rom_hash(&self) -> String {
        fnv1a_hex(&self.rom)
    }

    pub fn mapper_id(&self) -> u8 {
        self.mapper_id
    }

    /// Header mirroring, overridden by the mapper when it has dynamic control.
    pub fn mirroring(&self) -> Mirroring {
        self.mapper
            .borrow()
            .current_mirroring()
            .unwrap_or(self.header_mirroring)
    }

    // ------------- mapper forwarding -------------

    #[inline]
    pub fn cpu_read(&self, addr: u16) -> u8 {
        self.mapper.borrow_mut().cpu_read(addr)
    }

    #[inline]
    pub fn cpu_write(&self, addr: u16, value: u8) {
        self.mapper.borrow_mut().cpu_write(addr, value);
    }

    #[inline]
    pub fn chr_read(&self, addr: u16) -> u8 {
        self.mapper.borrow().ppu_read(addr)
    }

    #[inline]
    pub fn chr_write(&self, addr: u16, value: u8) {
        self.mapper.borrow_mut().ppu_write(addr, value);
    }

    pub fn notify_scanline(&self) {
        self.mapper.borrow_mut().notify_scanline();
    }

    pub fn irq_pending(&self) -> bool {
        self.mapper.borrow().irq_pending()
    }

    pub fn acknowledge_irq(&self) {
        self.mapper.borrow_mut().acknowledge_irq();
    }

    pub fn bank_signature(&self) -> u32 {
        self.mapper.borrow().bank_signature()
    }

    pub fn reset_mapper(&self) {
        self.mapper.borrow_mut().reset();
    }

    // ------------- snapshot surface -------------

    pub fn prg_ram_snapshot(&self) -> Vec<u8> {
        self.mapper.borrow().prg_ram().to_vec()
    }

    pub fn load_prg_ram(&self, data: &[u8]) {
        self.mapper.borrow_mut().load_prg_ram(data);
    }

    pub fn chr_ram_snapshot(&self) -> Vec<u8> {
        self.mapper.borrow().chr_ram().to_vec()
    }

    pub fn load_chr_ram(&self, data: &[u8]) {
        self.mapper.borrow_mut().load_chr_ram(data);
    }

    pub fn mapper_state(&self) -> Value {
        self.mapper.borrow().export_state()
    }

    pub fn load_mapper_state(&self, state: &Value) {
        self.mapper.borrow_mut().import_state(state);
    }
}

/// 64-bit FNV-1a as a lowercase hex string.
pub fn fnv1a_hex(bytes: &[u8]) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::build_ines;

    #[test]
    fn parses_nrom_header() {
        let rom = build_ines(2, 1, 0x01, 0x00);
        let cart = Cartridge::new(&rom).unwrap();
        assert_eq!(cart.mapper_id(), 0);
        assert_eq!(cart.mirroring(), Mirroring::Vertical);
        assert_eq!(cart.rom().len(), rom.len());
    }

    #[test]
    fn rejects_bad_magic() {
        let err = Cartridge::new(&[0u8; 32]).err().unwrap();
        assert!(matches!(err, EmuError::InvalidRom(_)));
    }

    #[test]
    fn rejects_truncated_image() {
        let mut rom = build_ines(2, 1, 0x00, 0x00);
        rom.truncate(rom.len() - 100);
        let err = Cartridge::new(&rom).err().unwrap();
        assert!(matches!(err, EmuError::InvalidRom(_)));
    }

    #[test]
    fn unsupported_mapper_is_typed() {
        // Mapper 77: low nibble 0xD in flags6, high nibble 0x40 in flags7.
        let rom = build_ines(1, 1, 0xD0, 0x40);
        match Cartridge::new(&rom).err().unwrap() {
            EmuError::UnsupportedMapper { id } => assert_eq!(id, 77),
            other => panic!("expected UnsupportedMapper, got {other}"),
        }
    }

    #[test]
    fn chr_ram_boards_accept_pattern_writes() {
        let rom = build_ines(1, 0, 0x00, 0x00);
        let cart = Cartridge::new(&rom).unwrap();
        cart.chr_write(0x0042, 0xAB);
        assert_eq!(cart.chr_read(0x0042), 0xAB);
        assert_eq!(cart.chr_ram_snapshot()[0x42], 0xAB);
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let a = build_ines(1, 1, 0x00, 0x00);
        let mut b = a.clone();
        assert_eq!(fnv1a_hex(&a), fnv1a_hex(&b));
        let last = b.len() - 1;
        b[last] ^= 0xFF;
        assert_ne!(fnv1a_hex(&a), fnv1a_hex(&b));
    }
}
