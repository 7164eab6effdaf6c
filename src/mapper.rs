/*!
Mapper trait and NROM (mapper 0).

The bus forwards CPU $4020..=$FFFF and pixel-space $0000..=$1FFF into the
active mapper. Beyond plain address translation the trait carries the hook
surface the rest of the core needs:

- `notify_scanline` / `irq_pending` / `acknowledge_irq`: scanline-counter
  IRQ sources (MMC3 family). The pixel core notifies once per visible
  scanline while rendering is enabled; the bus aggregates the IRQ line.
- `bank_signature`: a cheap value that changes whenever banking changes, so
  pixel cores can invalidate tile caches without hashing CHR.
- PRG/CHR RAM accessors and an opaque state blob for the savestate
  protocol. Mapper state restores before CPU/pixel state because bank
  selection changes what their memory reads mean.
*/

use serde_json::Value;

/// Nametable arrangement currently in effect. Mappers with mirroring
/// control return `Some` from `current_mirroring` to override the header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    SingleScreenLower,
    SingleScreenUpper,
}

pub trait Mapper: Send {
    fn mapper_id(&self) -> u8;

    /// CPU read/write, full unmasked address ($4020..=$FFFF forwarded).
    fn cpu_read(&mut self, addr: u16) -> u8;
    fn cpu_write(&mut self, addr: u16, value: u8);

    /// Pattern-table read/write ($0000..=$1FFF).
    fn ppu_read(&self, addr: u16) -> u8;
    fn ppu_write(&mut self, addr: u16, value: u8);

    fn reset(&mut self) {}

    /// Called once per visible scanline while rendering is enabled.
    fn notify_scanline(&mut self) {}
    fn irq_pending(&self) -> bool {
        false
    }
    fn acknowledge_irq(&mut self) {}

    /// Changes whenever bank registers change; never affects behavior.
    fn bank_signature(&self) -> u32 {
        0
    }

    fn current_mirroring(&self) -> Option<Mirroring> {
        None
    }

    /// Battery/work RAM contents for snapshots (empty slice when absent).
    fn prg_ram(&self) -> &[u8] {
        &[]
    }
    fn load_prg_ram(&mut self, _data: &[u8]) {}
    /// CHR RAM contents for snapshots (empty slice for CHR ROM boards).
    fn chr_ram(&self) -> &[u8] {
        &[]
    }
    fn load_chr_ram(&mut self, _data: &[u8]) {}

    /// Opaque bank-register state. Decoded defensively on import; unknown
    /// or missing fields leave defaults in place.
    fn export_state(&self) -> Value {
        Value::Null
    }
    fn import_state(&mut self, _state: &Value) {}
}

/// NROM: fixed 16 or 32 KiB PRG at $8000, optional 8 KiB work RAM at
/// $6000, unbanked CHR (ROM or RAM).
pub struct Nrom {
    prg: Vec<u8>,
    prg_mask: usize,
    work_ram: Vec<u8>,
    chr: Vec<u8>,
    chr_writable: bool,
}

impl Nrom {
    pub fn new(prg: Vec<u8>, chr: Vec<u8>, chr_writable: bool, work_ram_size: usize) -> Self {
        // PRG arrives in 16 KiB units, so len is a power of two.
        let prg_mask = prg.len().max(1) - 1;
        Self {
            prg,
            prg_mask,
            work_ram: vec![0; work_ram_size],
            chr,
            chr_writable,
        }
    }
}

impl Mapper for Nrom {
    #[inline]
    fn mapper_id(&self) -> u8 {
        0
    }

    fn cpu_read(&mut self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF if !self.work_ram.is_empty() => {
                self.work_ram[(addr as usize - 0x6000) % self.work_ram.len()]
            }
            0x8000..=0xFFFF if !self.prg.is_empty() => {
                self.prg[(addr as usize - 0x8000) & self.prg_mask]
            }
            _ => 0,
        }
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        if let 0x6000..=0x7FFF = addr {
            if !self.work_ram.is_empty() {
                let len = self.work_ram.len();
                self.work_ram[(addr as usize - 0x6000) % len] = value;
            }
        }
        // No bank registers on NROM.
    }

    fn ppu_read(&self, addr: u16) -> u8 {
        if self.chr.is_empty() {
            return 0;
        }
        self.chr[(addr as usize) & 0x1FFF]
    }

    fn ppu_write(&mut self, addr: u16, value: u8) {
        if self.chr_writable && !self.chr.is_empty() {
            self.chr[(addr as usize) & 0x1FFF] = value;
        }
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prg_16k_mirrors_into_upper_half() {
        let mut prg = vec![0u8; 16 * 1024];
        prg[0] = 0x12;
        prg[0x3FFF] = 0x34;
        let mut m = Nrom::new(prg, vec![0; 8 * 1024], true, 0);

        assert_eq!(m.cpu_read(0x8000), 0x12);
        assert_eq!(m.cpu_read(0xBFFF), 0x34);
        assert_eq!(m.cpu_read(0xC000), 0x12);
        assert_eq!(m.cpu_read(0xFFFF), 0x34);
    }

    #[test]
    fn work_ram_reads_back() {
        let mut m = Nrom::new(vec![0; 32 * 1024], vec![0; 8 * 1024], false, 8 * 1024);
        m.cpu_write(0x6123, 0x77);
        assert_eq!(m.cpu_read(0x6123), 0x77);
        assert_eq!(m.prg_ram()[0x123], 0x77);
    }

    #[test]
    fn chr_rom_ignores_writes_chr_ram_accepts() {
        let mut rom = Nrom::new(vec![0; 32 * 1024], vec![0xCC; 8 * 1024], false, 0);
        rom.ppu_write(0x0000, 0x11);
        assert_eq!(rom.ppu_read(0x0000), 0xCC);

        let mut ram = Nrom::new(vec![0; 32 * 1024], vec![0; 8 * 1024], true, 0);
        ram.ppu_write(0x0000, 0x11);
        assert_eq!(ram.ppu_read(0x0000), 0x11);
        assert_eq!(ram.chr_ram()[0], 0x11);
    }
}
