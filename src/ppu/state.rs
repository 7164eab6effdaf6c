/*!
Register, memory and timing state shared by the pixel cores.

The dot grid is 341 dots per scanline and 262 scanlines per frame.
Scanlines 0-239 are visible, 241-260 are vblank (the flag and the NMI
latch are raised on entry to 241), and 261 is the pre-render line where
the status flags clear. Mappers with scanline counters get one
`notify_scanline` per visible line while rendering is enabled.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cartridge::Cartridge;
use crate::cores::{FRAME_BYTES, PixelTransfer, copy_clamped};
use crate::errors::{EmuError, Result};
use crate::mapper::Mirroring;

pub const DOTS_PER_SCANLINE: u32 = 341;
pub const SCANLINES_PER_FRAME: u32 = 262;
pub const VBLANK_SCANLINE: u32 = 241;
pub const PRERENDER_SCANLINE: u32 = 261;

const VRAM_SIZE: usize = 0x800;
const PALETTE_SIZE: usize = 32;
const OAM_SIZE: usize = 256;

const CTRL_NMI_ENABLE: u8 = 0x80;
const CTRL_INCREMENT_32: u8 = 0x04;
const STATUS_VBLANK: u8 = 0x80;
const MASK_RENDERING: u8 = 0x18;

pub struct PixelState {
    pub ctrl: u8,
    pub mask: u8,
    pub status: u8,
    pub oam_addr: u8,
    pub scroll_x: u8,
    pub scroll_y: u8,
    pub vram_addr: u16,
    pub write_toggle: bool,
    read_buffer: u8,
    pub vram: [u8; VRAM_SIZE],
    pub palette: [u8; PALETTE_SIZE],
    pub oam: [u8; OAM_SIZE],
    dot: u32,
    scanline: u32,
    nmi_latch: bool,
    frame_complete: bool,
    /// Released by `clear_buffers`, reallocated on demand.
    frame: Option<Vec<u8>>,
    noise_seed: u32,
}

impl Default for PixelState {
    fn default() -> Self {
        Self::new()
    }
}

impl PixelState {
    pub fn new() -> Self {
        Self {
            ctrl: 0,
            mask: 0,
            status: 0,
            oam_addr: 0,
            scroll_x: 0,
            scroll_y: 0,
            vram_addr: 0,
            write_toggle: false,
            read_buffer: 0,
            vram: [0; VRAM_SIZE],
            palette: [0; PALETTE_SIZE],
            oam: [0; OAM_SIZE],
            dot: 0,
            scanline: 0,
            nmi_latch: false,
            frame_complete: false,
            frame: None,
            noise_seed: 0x2C02_2C02,
        }
    }

    // ------------- timing -------------

    pub fn step(&mut self, dots: u32, cart: &Cartridge) {
        self.dot += dots;
        while self.dot >= DOTS_PER_SCANLINE {
            self.dot -= DOTS_PER_SCANLINE;
            self.advance_scanline(cart);
        }
    }

    fn advance_scanline(&mut self, cart: &Cartridge) {
        if self.scanline < 240 && self.mask & MASK_RENDERING != 0 {
            cart.notify_scanline();
        }
        self.scanline += 1;
        match self.scanline {
            VBLANK_SCANLINE => {
                self.status |= STATUS_VBLANK;
                if self.ctrl & CTRL_NMI_ENABLE != 0 {
                    self.nmi_latch = true;
                }
            }
            PRERENDER_SCANLINE => {
                self.status &= !0xE0;
            }
            SCANLINES_PER_FRAME => {
                self.scanline = 0;
                self.frame_complete = true;
            }
            _ => {}
        }
    }

    pub fn take_nmi_request(&mut self) -> bool {
        std::mem::take(&mut self.nmi_latch)
    }

    pub fn take_frame_complete(&mut self) -> bool {
        std::mem::take(&mut self.frame_complete)
    }

    // ------------- register file -------------

    pub fn read_register(&mut self, addr: u16, cart: &Cartridge) -> u8 {
        match addr & 7 {
            2 => {
                let v = self.status;
                self.status &= !STATUS_VBLANK;
                self.write_toggle = false;
                v
            }
            4 => self.oam[self.oam_addr as usize],
            7 => self.read_data(cart),
            _ => 0,
        }
    }

    pub fn write_register(&mut self, addr: u16, value: u8, cart: &Cartridge) {
        match addr & 7 {
            0 => self.ctrl = value,
            1 => self.mask = value,
            3 => self.oam_addr = value,
            4 => {
                self.oam[self.oam_addr as usize] = value;
                self.oam_addr = self.oam_addr.wrapping_add(1);
            }
            5 => {
                if self.write_toggle {
                    self.scroll_y = value;
                } else {
                    self.scroll_x = value;
                }
                self.write_toggle = !self.write_toggle;
            }
            6 => {
                if self.write_toggle {
                    self.vram_addr = (self.vram_addr & 0xFF00) | value as u16;
                } else {
                    self.vram_addr = ((value as u16 & 0x3F) << 8) | (self.vram_addr & 0x00FF);
                }
                self.write_toggle = !self.write_toggle;
            }
            7 => {
                self.mem_write(self.vram_addr & 0x3FFF, value, cart);
                self.advance_vram_addr();
            }
            _ => {}
        }
    }

    fn read_data(&mut self, cart: &Cartridge) -> u8 {
        let addr = self.vram_addr & 0x3FFF;
        let result = if addr >= 0x3F00 {
            // Palette reads bypass the buffer; the buffer still picks up the
            // nametable byte underneath.
            self.read_buffer = self.vram[Self::mirror_index(addr & 0x2FFF, cart.mirroring())];
            self.palette[Self::palette_index(addr)]
        } else {
            let buffered = self.read_buffer;
            self.read_buffer = self.mem_read(addr, cart);
            buffered
        };
        self.advance_vram_addr();
        result
    }

    #[inline]
    fn advance_vram_addr(&mut self) {
        let inc = if self.ctrl & CTRL_INCREMENT_32 != 0 {
            32
        } else {
            1
        };
        self.vram_addr = self.vram_addr.wrapping_add(inc);
    }

    // ------------- memory map -------------

    pub fn mem_read(&self, addr: u16, cart: &Cartridge) -> u8 {
        match addr {
            0x0000..=0x1FFF => cart.chr_read(addr),
            0x2000..=0x3EFF => self.vram[Self::mirror_index(addr, cart.mirroring())],
            _ => self.palette[Self::palette_index(addr)],
        }
    }

    fn mem_write(&mut self, addr: u16, value: u8, cart: &Cartridge) {
        match addr {
            0x0000..=0x1FFF => cart.chr_write(addr, value),
            0x2000..=0x3EFF => self.vram[Self::mirror_index(addr, cart.mirroring())] = value,
            _ => self.palette[Self::palette_index(addr)] = value,
        }
    }

    fn mirror_index(addr: u16, mirroring: Mirroring) -> usize {
        let nt = (addr as usize - 0x2000) & 0xFFF;
        let table = nt / 0x400;
        let offset = nt & 0x3FF;
        let physical = match mirroring {
            Mirroring::Horizontal => [0, 0, 1, 1][table],
            Mirroring::Vertical => [0, 1, 0, 1][table],
            Mirroring::SingleScreenLower => 0,
            Mirroring::SingleScreenUpper => 1,
        };
        physical * 0x400 + offset
    }

    fn palette_index(addr: u16) -> usize {
        let mut p = (addr as usize - 0x3F00) & 0x1F;
        // Sprite backdrop entries mirror the background ones.
        if p >= 0x10 && p % 4 == 0 {
            p -= 0x10;
        }
        p
    }

    // ------------- sprite memory -------------

    pub fn write_oam_dma(&mut self, data: &[u8; 256]) {
        let start = self.oam_addr as usize;
        for (i, &b) in data.iter().enumerate() {
            self.oam[(start + i) & 0xFF] = b;
        }
    }

    // ------------- frame buffer -------------

    pub fn frame_mut(&mut self) -> &mut Vec<u8> {
        self.frame.get_or_insert_with(|| vec![0; FRAME_BYTES])
    }

    pub fn frame_slice(&mut self) -> &[u8] {
        self.frame_mut().as_slice()
    }

    pub fn clear_buffers(&mut self) {
        self.frame = None;
    }

    /// Deterministic static; xorshift over a per-instance seed.
    pub fn generate_noise_frame(&mut self) {
        let mut seed = self.noise_seed;
        let frame = self.frame.get_or_insert_with(|| vec![0; FRAME_BYTES]);
        for px in frame.chunks_exact_mut(4) {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let v = (seed & 0xFF) as u8;
            px[0] = v;
            px[1] = v;
            px[2] = v;
            px[3] = 0xFF;
        }
        self.noise_seed = seed;
    }

    // ------------- transfer / snapshot -------------

    pub fn export_transfer(&self) -> PixelTransfer {
        PixelTransfer {
            ctrl: self.ctrl,
            mask: self.mask,
            status: self.status,
            oam_addr: self.oam_addr,
            scroll_x: self.scroll_x,
            scroll_y: self.scroll_y,
            vram_addr: self.vram_addr,
            write_toggle: self.write_toggle,
            vram: self.vram.to_vec(),
            palette: self.palette.to_vec(),
            oam: self.oam.to_vec(),
        }
    }

    pub fn import_transfer(&mut self, t: &PixelTransfer) {
        self.ctrl = t.ctrl;
        self.mask = t.mask;
        self.status = t.status;
        self.oam_addr = t.oam_addr;
        self.scroll_x = t.scroll_x;
        self.scroll_y = t.scroll_y;
        self.vram_addr = t.vram_addr;
        self.write_toggle = t.write_toggle;
        copy_clamped(&mut self.vram, &t.vram);
        copy_clamped(&mut self.palette, &t.palette);
        copy_clamped(&mut self.oam, &t.oam);
    }

    pub fn export_state(&self) -> Value {
        serde_json::to_value(PixelStateBlob {
            version: STATE_VERSION,
            ctrl: self.ctrl,
            mask: self.mask,
            status: self.status,
            oam_addr: self.oam_addr,
            scroll_x: self.scroll_x,
            scroll_y: self.scroll_y,
            vram_addr: self.vram_addr,
            write_toggle: self.write_toggle,
            read_buffer: self.read_buffer,
            dot: self.dot,
            scanline: self.scanline,
            nmi_latch: self.nmi_latch,
            vram: self.vram.to_vec(),
            palette: self.palette.to_vec(),
            oam: self.oam.to_vec(),
        })
        .unwrap_or(Value::Null)
    }

    pub fn import_state(&mut self, state: &Value) -> Result<()> {
        let s: PixelStateBlob = serde_json::from_value(state.clone())?;
        if s.version != STATE_VERSION {
            return Err(EmuError::StateRestore(format!(
                "pixel state version {} not supported",
                s.version
            )));
        }
        self.ctrl = s.ctrl;
        self.mask = s.mask;
        self.status = s.status;
        self.oam_addr = s.oam_addr;
        self.scroll_x = s.scroll_x;
        self.scroll_y = s.scroll_y;
        self.vram_addr = s.vram_addr;
        self.write_toggle = s.write_toggle;
        self.read_buffer = s.read_buffer;
        self.dot = s.dot.min(DOTS_PER_SCANLINE - 1);
        self.scanline = s.scanline.min(SCANLINES_PER_FRAME - 1);
        self.nmi_latch = s.nmi_latch;
        copy_clamped(&mut self.vram, &s.vram);
        copy_clamped(&mut self.palette, &s.palette);
        copy_clamped(&mut self.oam, &s.oam);
        Ok(())
    }
}

const STATE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PixelStateBlob {
    version: u32,
    ctrl: u8,
    mask: u8,
    status: u8,
    oam_addr: u8,
    scroll_x: u8,
    scroll_y: u8,
    vram_addr: u16,
    write_toggle: bool,
    read_buffer: u8,
    dot: u32,
    scanline: u32,
    nmi_latch: bool,
    vram: Vec<u8>,
    palette: Vec<u8>,
    oam: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::program_rom;

    fn cart() -> Cartridge {
        Cartridge::new(&program_rom(&[0xEA])).unwrap()
    }

    fn run_scanlines(s: &mut PixelState, cart: &Cartridge, n: u32) {
        s.step(n * DOTS_PER_SCANLINE, cart);
    }

    #[test]
    fn vblank_flag_sets_and_clears_on_schedule() {
        let c = cart();
        let mut s = PixelState::new();
        run_scanlines(&mut s, &c, VBLANK_SCANLINE);
        assert_ne!(s.status & STATUS_VBLANK, 0);
        run_scanlines(&mut s, &c, PRERENDER_SCANLINE - VBLANK_SCANLINE);
        assert_eq!(s.status & STATUS_VBLANK, 0);
    }

    #[test]
    fn nmi_latches_only_when_enabled() {
        let c = cart();
        let mut s = PixelState::new();
        run_scanlines(&mut s, &c, SCANLINES_PER_FRAME);
        assert!(!s.take_nmi_request());
        assert!(s.take_frame_complete());
        assert!(!s.take_frame_complete());

        s.write_register(0x2000, 0x80, &c);
        run_scanlines(&mut s, &c, SCANLINES_PER_FRAME);
        assert!(s.take_nmi_request());
        // Latch is edge-like: reading consumes it.
        assert!(!s.take_nmi_request());
    }

    #[test]
    fn status_read_clears_vblank_and_address_toggle() {
        let c = cart();
        let mut s = PixelState::new();
        run_scanlines(&mut s, &c, VBLANK_SCANLINE);
        s.write_register(0x2006, 0x21, &c); // toggle now high
        let v = s.read_register(0x2002, &c);
        assert_ne!(v & STATUS_VBLANK, 0);
        assert_eq!(s.read_register(0x2002, &c) & STATUS_VBLANK, 0);
        // Toggle reset: next $2006 write is the high byte again.
        s.write_register(0x2006, 0x3F, &c);
        s.write_register(0x2006, 0x00, &c);
        assert_eq!(s.vram_addr, 0x3F00);
    }

    #[test]
    fn data_port_reads_are_buffered() {
        let c = cart();
        let mut s = PixelState::new();
        s.write_register(0x2006, 0x20, &c);
        s.write_register(0x2006, 0x00, &c);
        s.write_register(0x2007, 0x55, &c);
        s.write_register(0x2007, 0x66, &c);

        s.write_register(0x2006, 0x20, &c);
        s.write_register(0x2006, 0x00, &c);
        let _ = s.read_register(0x2007, &c); // stale buffer
        assert_eq!(s.read_register(0x2007, &c), 0x55);
        assert_eq!(s.read_register(0x2007, &c), 0x66);
    }

    #[test]
    fn nametable_mirroring_pairs_tables() {
        let c = cart(); // header says horizontal
        let mut s = PixelState::new();
        s.write_register(0x2006, 0x20, &c);
        s.write_register(0x2006, 0x05, &c);
        s.write_register(0x2007, 0x99, &c);
        // $2405 shares physical storage with $2005 under horizontal mirroring.
        assert_eq!(s.mem_read(0x2405, &c), 0x99);
        assert_ne!(s.mem_read(0x2805, &c), 0x99);
    }

    #[test]
    fn palette_entries_mirror_sprite_backdrops() {
        let c = cart();
        let mut s = PixelState::new();
        s.write_register(0x2006, 0x3F, &c);
        s.write_register(0x2006, 0x10, &c);
        s.write_register(0x2007, 0x21, &c);
        assert_eq!(s.palette[0], 0x21);
    }

    #[test]
    fn noise_frames_differ_between_calls() {
        let mut s = PixelState::new();
        s.generate_noise_frame();
        let first = s.frame_slice().to_vec();
        s.generate_noise_frame();
        assert_ne!(first, s.frame_slice());
        assert_eq!(first.len(), FRAME_BYTES);
    }

    #[test]
    fn clear_buffers_releases_and_reallocates() {
        let mut s = PixelState::new();
        s.frame_mut()[0] = 7;
        s.clear_buffers();
        assert_eq!(s.frame_slice()[0], 0);
    }

    #[test]
    fn state_blob_round_trips() {
        let c = cart();
        let mut s = PixelState::new();
        s.write_register(0x2000, 0x90, &c);
        s.write_register(0x2005, 3, &c);
        s.write_register(0x2005, 5, &c);
        run_scanlines(&mut s, &c, 10);

        let blob = s.export_state();
        let mut fresh = PixelState::new();
        fresh.import_state(&blob).unwrap();
        assert_eq!(fresh.ctrl, 0x90);
        assert_eq!(fresh.scroll_x, 3);
        assert_eq!(fresh.scroll_y, 5);
        assert_eq!(fresh.export_state(), blob);
    }
}
