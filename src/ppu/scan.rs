/*!
`SCAN`: scanline-timed pixel core with background composition.

Timing and register behavior come from [`PixelState`]; composition walks
the selected nametable once per frame and resolves each tile through the
pattern table and attribute grid. Sprites are not composed; ROMs that only
need vblank/NMI/scanline timing and a readable background run fine.
*/

use serde_json::Value;

use crate::cartridge::Cartridge;
use crate::cores::{FRAME_BYTES, FRAME_WIDTH, PixelCore, PixelTransfer};
use crate::errors::Result;

use super::palette::SYSTEM_PALETTE;
use super::state::PixelState;

pub fn new_scanline() -> Box<dyn PixelCore> {
    Box::new(ScanlineCore {
        s: PixelState::new(),
    })
}

struct ScanlineCore {
    s: PixelState,
}

const MASK_SHOW_BACKGROUND: u8 = 0x08;
const CTRL_NAMETABLE: u8 = 0x03;
const CTRL_BG_PATTERN: u8 = 0x10;

impl ScanlineCore {
    fn compose(&mut self, cart: &Cartridge) {
        let s = &mut self.s;
        // Detach the frame so composition can read state while writing pixels.
        let mut frame = std::mem::take(s.frame_mut());
        if frame.len() != FRAME_BYTES {
            frame.resize(FRAME_BYTES, 0);
        }

        let backdrop = SYSTEM_PALETTE[(s.palette[0] & 0x3F) as usize];
        if s.mask & MASK_SHOW_BACKGROUND == 0 {
            for px in frame.chunks_exact_mut(4) {
                px.copy_from_slice(&[backdrop.0, backdrop.1, backdrop.2, 0xFF]);
            }
            *s.frame_mut() = frame;
            return;
        }

        let nt_base = 0x2000 + (s.ctrl & CTRL_NAMETABLE) as u16 * 0x400;
        let pattern_base: u16 = if s.ctrl & CTRL_BG_PATTERN != 0 {
            0x1000
        } else {
            0x0000
        };

        for tile_y in 0..30u16 {
            for tile_x in 0..32u16 {
                let tile = s.mem_read(nt_base + tile_y * 32 + tile_x, cart) as u16;
                let attr = s.mem_read(nt_base + 0x3C0 + (tile_y / 4) * 8 + tile_x / 4, cart);
                let shift = ((tile_y & 2) << 1) | (tile_x & 2);
                let group = ((attr >> shift) & 3) as usize;

                for row in 0..8u16 {
                    let lo = s.mem_read(pattern_base + tile * 16 + row, cart);
                    let hi = s.mem_read(pattern_base + tile * 16 + row + 8, cart);
                    let y = (tile_y * 8 + row) as usize;
                    for col in 0..8usize {
                        let bit = 7 - col;
                        let p = (((hi >> bit) & 1) << 1) | ((lo >> bit) & 1);
                        let (r, g, b) = if p == 0 {
                            backdrop
                        } else {
                            let entry = s.palette[group * 4 + p as usize] & 0x3F;
                            SYSTEM_PALETTE[entry as usize]
                        };
                        let x = tile_x as usize * 8 + col;
                        let o = (y * FRAME_WIDTH + x) * 4;
                        frame[o] = r;
                        frame[o + 1] = g;
                        frame[o + 2] = b;
                        frame[o + 3] = 0xFF;
                    }
                }
            }
        }
        *s.frame_mut() = frame;
    }
}

impl PixelCore for ScanlineCore {
    fn id(&self) -> &'static str {
        "SCAN"
    }

    fn display_name(&self) -> &'static str {
        "Scanline renderer"
    }

    fn description(&self) -> &'static str {
        "Scanline-accurate timing with per-frame background composition"
    }

    fn step(&mut self, dots: u32, cart: &Cartridge) {
        self.s.step(dots, cart);
    }

    fn frame_buffer(&mut self) -> &[u8] {
        self.s.frame_slice()
    }

    fn update_frame_buffer(&mut self, cart: &Cartridge) {
        self.compose(cart);
    }

    fn read_register(&mut self, addr: u16, cart: &Cartridge) -> u8 {
        self.s.read_register(addr, cart)
    }

    fn write_register(&mut self, addr: u16, value: u8, cart: &Cartridge) {
        self.s.write_register(addr, value, cart);
    }

    fn write_oam_dma(&mut self, data: &[u8; 256]) {
        self.s.write_oam_dma(data);
    }

    fn clear_buffers(&mut self) {
        self.s.clear_buffers();
    }

    fn generate_noise_frame(&mut self) {
        self.s.generate_noise_frame();
    }

    fn take_nmi_request(&mut self) -> bool {
        self.s.take_nmi_request()
    }

    fn take_frame_complete(&mut self) -> bool {
        self.s.take_frame_complete()
    }

    fn export_transfer(&self) -> PixelTransfer {
        self.s.export_transfer()
    }

    fn import_transfer(&mut self, t: &PixelTransfer) -> Result<()> {
        self.s.import_transfer(t);
        Ok(())
    }

    fn export_state(&self) -> Value {
        self.s.export_state()
    }

    fn import_state(&mut self, state: &Value) -> Result<()> {
        self.s.import_state(state)
    }
}
