/*!
Pixel-unit cores.

- `SCAN` runs the 341x262 dot grid and composes the background layer from
  nametable and pattern data, which is enough for timing-sensitive ROMs
  that wait on vblank and scanline counters.
- `FLAT` keeps full register and timing behavior but renders a fixed test
  card instead of fetching tiles. Cheap, and handy when diagnosing whether
  a glitch lives in rendering or in the machine underneath.

Register, memory and timing behavior is shared through [`state::PixelState`]
so the two cores stay observationally interchangeable everywhere except the
composed frame.
*/

use crate::cores::PixelCore;
use crate::registry::Factory;

mod flat;
mod palette;
mod scan;
mod state;

pub use flat::new_flat;
pub use palette::SYSTEM_PALETTE;
pub use scan::new_scanline;

pub const PIXEL_CORES: &[(&str, Factory<dyn PixelCore>)] =
    &[("SCAN", new_scanline), ("FLAT", new_flat)];

pub const PIXEL_PREFERENCE: &[&str] = &["SCAN", "FLAT"];
