/*!
MMC3 (mapper 4): 8 KiB PRG banking, 1/2 KiB CHR banking, mirroring control,
and the scanline-counter IRQ.

The counter is clocked by `notify_scanline` (the pixel core calls it once
per visible scanline while rendering is enabled) rather than by A12 edges;
that is coarse but stable across heterogeneous pixel cores.
*/

use serde_json::{Value, json};

use crate::mapper::{Mapper, Mirroring};

pub struct Mmc3 {
    prg: Vec<u8>,
    chr: Vec<u8>,
    chr_writable: bool,
    work_ram: Vec<u8>,

    // $8000 bank select
    bank_regs: [u8; 8],
    reg_select: u8,
    prg_mode: bool,
    chr_mode: bool,

    mirroring: Mirroring,

    irq_latch: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,
    irq_flag: bool,
}

impl Mmc3 {
    pub fn new(prg: Vec<u8>, chr: Vec<u8>, chr_writable: bool) -> Self {
        Self {
            prg,
            chr,
            chr_writable,
            work_ram: vec![0; 8 * 1024],
            bank_regs: [0; 8],
            reg_select: 0,
            prg_mode: false,
            chr_mode: false,
            mirroring: Mirroring::Vertical,
            irq_latch: 0,
            irq_counter: 0,
            irq_reload: false,
            irq_enabled: false,
            irq_flag: false,
        }
    }

    #[inline]
    fn prg_bank_count(&self) -> usize {
        (self.prg.len() / 0x2000).max(1)
    }

    /// Resolve an 8 KiB PRG slot (0..4 covering $8000/$A000/$C000/$E000).
    fn prg_slot_base(&self, slot: usize) -> usize {
        let count = self.prg_bank_count();
        let last = count - 1;
        let second_last = count.saturating_sub(2);
        let r6 = self.bank_regs[6] as usize % count;
        let r7 = self.bank_regs[7] as usize % count;
        let bank = match (self.prg_mode, slot) {
            (false, 0) => r6,
            (false, 2) => second_last,
            (true, 0) => second_last,
            (true, 2) => r6,
            (_, 1) => r7,
            _ => last,
        };
        bank * 0x2000
    }

    /// Resolve a pattern address to a CHR byte offset.
    fn chr_offset(&self, addr: u16) -> usize {
        let a = (addr as usize) & 0x1FFF;
        // chr_mode flips which half carries the two 2 KiB banks.
        let a = if self.chr_mode { a ^ 0x1000 } else { a };
        let off = match a {
            0x0000..=0x07FF => ((self.bank_regs[0] & 0xFE) as usize) * 0x400 + (a & 0x7FF),
            0x0800..=0x0FFF => ((self.bank_regs[1] & 0xFE) as usize) * 0x400 + (a & 0x7FF),
            0x1000..=0x13FF => (self.bank_regs[2] as usize) * 0x400 + (a & 0x3FF),
            0x1400..=0x17FF => (self.bank_regs[3] as usize) * 0x400 + (a & 0x3FF),
            0x1800..=0x1BFF => (self.bank_regs[4] as usize) * 0x400 + (a & 0x3FF),
            _ => (self.bank_regs[5] as usize) * 0x400 + (a & 0x3FF),
        };
        off % self.chr.len().max(1)
    }
}

impl Mapper for Mmc3 {
    #[inline]
    fn mapper_id(&self) -> u8 {
        4
    }

    fn cpu_read(&mut self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => self.work_ram[(addr as usize - 0x6000) & 0x1FFF],
            0x8000..=0xFFFF if !self.prg.is_empty() => {
                let slot = ((addr as usize - 0x8000) / 0x2000) & 3;
                self.prg[self.prg_slot_base(slot) + ((addr as usize) & 0x1FFF)]
            }
            _ => 0,
        }
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        match (addr, addr & 1) {
            (0x6000..=0x7FFF, _) => {
                self.work_ram[(addr as usize - 0x6000) & 0x1FFF] = value;
            }
            (0x8000..=0x9FFF, 0) => {
                self.reg_select = value & 0x07;
                self.prg_mode = value & 0x40 != 0;
                self.chr_mode = value & 0x80 != 0;
            }
            (0x8000..=0x9FFF, _) => {
                self.bank_regs[self.reg_select as usize] = value;
            }
            (0xA000..=0xBFFF, 0) => {
                self.mirroring = if value & 1 != 0 {
                    Mirroring::Horizontal
                } else {
                    Mirroring::Vertical
                };
            }
            (0xA000..=0xBFFF, _) => {
                // PRG RAM protect register, not modeled.
            }
            (0xC000..=0xDFFF, 0) => self.irq_latch = value,
            (0xC000..=0xDFFF, _) => {
                self.irq_counter = 0;
                self.irq_reload = true;
            }
            (0xE000..=0xFFFF, 0) => {
                self.irq_enabled = false;
                self.irq_flag = false;
            }
            (0xE000..=0xFFFF, _) => self.irq_enabled = true,
            _ => {}
        }
    }

    fn ppu_read(&self, addr: u16) -> u8 {
        if self.chr.is_empty() {
            return 0;
        }
        self.chr[self.chr_offset(addr)]
    }

    fn ppu_write(&mut self, addr: u16, value: u8) {
        if self.chr_writable && !self.chr.is_empty() {
            let off = self.chr_offset(addr);
            self.chr[off] = value;
        }
    }

    fn reset(&mut self) {
        self.bank_regs = [0; 8];
        self.reg_select = 0;
        self.prg_mode = false;
        self.chr_mode = false;
        self.irq_latch = 0;
        self.irq_counter = 0;
        self.irq_reload = false;
        self.irq_enabled = false;
        self.irq_flag = false;
    }

    fn notify_scanline(&mut self) {
        if self.irq_counter == 0 || self.irq_reload {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
        } else {
            self.irq_counter -= 1;
        }
        if self.irq_counter == 0 && self.irq_enabled {
            self.irq_flag = true;
        }
    }

    fn irq_pending(&self) -> bool {
        self.irq_flag
    }

    fn acknowledge_irq(&mut self) {
        self.irq_flag = false;
    }

    fn bank_signature(&self) -> u32 {
        let mut sig = (self.prg_mode as u32) | ((self.chr_mode as u32) << 1);
        for (i, r) in self.bank_regs.iter().enumerate() {
            sig ^= (*r as u32) << ((i * 4) & 24);
            sig = sig.rotate_left(5);
        }
        sig
    }

    fn current_mirroring(&self) -> Option<Mirroring> {
        Some(self.mirroring)
    }

    fn prg_ram(&self) -> &[u8] {
        &self.work_ram
    }

    fn load_prg_ram(&mut self, data: &[u8]) {
        let n = self.work_ram.len().min(data.len());
        self.work_ram[..n].copy_from_slice(&data[..n]);
    }

    fn chr_ram(&self) -> &[u8] {
        if self.chr_writable { &self.chr } else { &[] }
    }

    fn load_chr_ram(&mut self, data: &[u8]) {
        if self.chr_writable {
            let n = self.chr.len().min(data.len());
            self.chr[..n].copy_from_slice(&data[..n]);
        }
    }

    fn export_state(&self) -> Value {
        json!({
            "bank_regs": self.bank_regs.to_vec(),
            "reg_select": self.reg_select,
            "prg_mode": self.prg_mode,
            "chr_mode": self.chr_mode,
            "mirroring_horizontal": self.mirroring == Mirroring::Horizontal,
            "irq_latch": self.irq_latch,
            "irq_counter": self.irq_counter,
            "irq_reload": self.irq_reload,
            "irq_enabled": self.irq_enabled,
            "irq_flag": self.irq_flag,
        })
    }

    fn import_state(&mut self, state: &Value) {
        if let Some(regs) = state.get("bank_regs").and_then(Value::as_array) {
            for (i, v) in regs.iter().take(8).enumerate() {
                if let Some(b) = v.as_u64() {
                    self.bank_regs[i] = b as u8;
                }
            }
        }
        if let Some(v) = state.get("reg_select").and_then(Value::as_u64) {
            self.reg_select = (v & 7) as u8;
        }
        if let Some(v) = state.get("prg_mode").and_then(Value::as_bool) {
            self.prg_mode = v;
        }
        if let Some(v) = state.get("chr_mode").and_then(Value::as_bool) {
            self.chr_mode = v;
        }
        if let Some(v) = state.get("mirroring_horizontal").and_then(Value::as_bool) {
            self.mirroring = if v {
                Mirroring::Horizontal
            } else {
                Mirroring::Vertical
            };
        }
        if let Some(v) = state.get("irq_latch").and_then(Value::as_u64) {
            self.irq_latch = v as u8;
        }
        if let Some(v) = state.get("irq_counter").and_then(Value::as_u64) {
            self.irq_counter = v as u8;
        }
        if let Some(v) = state.get("irq_reload").and_then(Value::as_bool) {
            self.irq_reload = v;
        }
        if let Some(v) = state.get("irq_enabled").and_then(Value::as_bool) {
            self.irq_enabled = v;
        }
        if let Some(v) = state.get("irq_flag").and_then(Value::as_bool) {
            self.irq_flag = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mmc3_64k() -> Mmc3 {
        // Eight 8 KiB PRG banks, each filled with its own index.
        let mut prg = vec![0u8; 64 * 1024];
        for (i, chunk) in prg.chunks_mut(0x2000).enumerate() {
            chunk.fill(i as u8);
        }
        Mmc3::new(prg, vec![0; 8 * 1024], true)
    }

    #[test]
    fn prg_mode_0_maps_r6_and_fixed_banks() {
        let mut m = mmc3_64k();
        m.cpu_write(0x8000, 6); // select R6
        m.cpu_write(0x8001, 2); // R6 = bank 2
        assert_eq!(m.cpu_read(0x8000), 2);
        assert_eq!(m.cpu_read(0xC000), 6); // second-to-last fixed
        assert_eq!(m.cpu_read(0xE000), 7); // last fixed
    }

    #[test]
    fn prg_mode_1_swaps_8000_and_c000() {
        let mut m = mmc3_64k();
        m.cpu_write(0x8000, 0x46); // R6 select + prg mode 1
        m.cpu_write(0x8001, 2);
        assert_eq!(m.cpu_read(0x8000), 6);
        assert_eq!(m.cpu_read(0xC000), 2);
    }

    #[test]
    fn scanline_counter_raises_irq_after_latch_expires() {
        let mut m = mmc3_64k();
        m.cpu_write(0xC000, 3); // latch
        m.cpu_write(0xC001, 0); // reload
        m.cpu_write(0xE001, 0); // enable
        for _ in 0..3 {
            m.notify_scanline();
            assert!(!m.irq_pending());
        }
        m.notify_scanline(); // counter hits zero
        assert!(m.irq_pending());
        m.acknowledge_irq();
        assert!(!m.irq_pending());
    }

    #[test]
    fn irq_disable_write_clears_pending_flag() {
        let mut m = mmc3_64k();
        m.cpu_write(0xC000, 0);
        m.cpu_write(0xC001, 0);
        m.cpu_write(0xE001, 0);
        m.notify_scanline();
        assert!(m.irq_pending());
        m.cpu_write(0xE000, 0);
        assert!(!m.irq_pending());
    }

    #[test]
    fn bank_signature_tracks_register_changes() {
        let mut m = mmc3_64k();
        let before = m.bank_signature();
        m.cpu_write(0x8000, 0);
        m.cpu_write(0x8001, 5);
        assert_ne!(m.bank_signature(), before);
    }

    #[test]
    fn state_round_trip_preserves_banks_and_irq() {
        let mut m = mmc3_64k();
        m.cpu_write(0x8000, 6);
        m.cpu_write(0x8001, 3);
        m.cpu_write(0xC000, 9);
        m.cpu_write(0xE001, 0);
        let st = m.export_state();

        let mut fresh = mmc3_64k();
        fresh.import_state(&st);
        assert_eq!(fresh.cpu_read(0x8000), 3);
        assert_eq!(fresh.export_state()["irq_latch"], 9);
        assert_eq!(fresh.export_state()["irq_enabled"], true);
    }
}
