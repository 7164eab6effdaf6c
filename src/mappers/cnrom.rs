/*!
CNROM (mapper 3): fixed PRG like NROM, 8 KiB CHR ROM banks selected by any
write to $8000..=$FFFF.
*/

use serde_json::{Value, json};

use crate::mapper::Mapper;

pub struct Cnrom {
    prg: Vec<u8>,
    prg_mask: usize,
    chr: Vec<u8>,
    chr_bank: u8,
    chr_bank_count: u8,
}

impl Cnrom {
    pub fn new(prg: Vec<u8>, chr: Vec<u8>) -> Self {
        let prg_mask = prg.len().max(1) - 1;
        let chr_bank_count = (chr.len() / 0x2000).max(1) as u8;
        Self {
            prg,
            prg_mask,
            chr,
            chr_bank: 0,
            chr_bank_count,
        }
    }

    #[inline]
    fn chr_base(&self) -> usize {
        (self.chr_bank % self.chr_bank_count) as usize * 0x2000
    }
}

impl Mapper for Cnrom {
    #[inline]
    fn mapper_id(&self) -> u8 {
        3
    }

    fn cpu_read(&mut self, addr: u16) -> u8 {
        match addr {
            0x8000..=0xFFFF if !self.prg.is_empty() => {
                self.prg[(addr as usize - 0x8000) & self.prg_mask]
            }
            _ => 0,
        }
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        if addr >= 0x8000 {
            self.chr_bank = value & 0x03;
        }
    }

    fn ppu_read(&self, addr: u16) -> u8 {
        if self.chr.is_empty() {
            return 0;
        }
        let idx = self.chr_base() + ((addr as usize) & 0x1FFF);
        self.chr[idx % self.chr.len()]
    }

    fn ppu_write(&mut self, _addr: u16, _value: u8) {
        // CHR ROM board; pattern writes are dropped.
    }

    fn reset(&mut self) {
        self.chr_bank = 0;
    }

    fn bank_signature(&self) -> u32 {
        self.chr_bank as u32
    }

    fn export_state(&self) -> Value {
        json!({ "chr_bank": self.chr_bank })
    }

    fn import_state(&mut self, state: &Value) {
        if let Some(b) = state.get("chr_bank").and_then(Value::as_u64) {
            self.chr_bank = b as u8;
        }
    }
}
