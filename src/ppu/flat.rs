/*!
`FLAT`: full register and timing behavior, test-card output.

Shares [`PixelState`] with the scanline core, so vblank, NMI and the data
port behave identically; only composition differs. The frame is a fixed
set of vertical color bars, which makes it obvious at a glance that the
machine is running even though nothing is fetched from CHR.
*/

use serde_json::Value;

use crate::cartridge::Cartridge;
use crate::cores::{FRAME_BYTES, FRAME_WIDTH, PixelCore, PixelTransfer};
use crate::errors::Result;

use super::palette::SYSTEM_PALETTE;
use super::state::PixelState;

pub fn new_flat() -> Box<dyn PixelCore> {
    Box::new(FlatCore {
        s: PixelState::new(),
    })
}

struct FlatCore {
    s: PixelState,
}

/// One system-palette entry per 32-dot bar.
const BAR_COLORS: [u8; 8] = [0x30, 0x16, 0x28, 0x1A, 0x2C, 0x12, 0x24, 0x0F];

impl PixelCore for FlatCore {
    fn id(&self) -> &'static str {
        "FLAT"
    }

    fn display_name(&self) -> &'static str {
        "Flat test card"
    }

    fn description(&self) -> &'static str {
        "Register-complete core rendering fixed color bars"
    }

    fn step(&mut self, dots: u32, cart: &Cartridge) {
        self.s.step(dots, cart);
    }

    fn frame_buffer(&mut self) -> &[u8] {
        self.s.frame_slice()
    }

    fn update_frame_buffer(&mut self, _cart: &Cartridge) {
        let frame = self.s.frame_mut();
        if frame.len() != FRAME_BYTES {
            frame.resize(FRAME_BYTES, 0);
        }
        for (i, px) in frame.chunks_exact_mut(4).enumerate() {
            let x = i % FRAME_WIDTH;
            let (r, g, b) = SYSTEM_PALETTE[BAR_COLORS[x / 32] as usize];
            px.copy_from_slice(&[r, g, b, 0xFF]);
        }
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
