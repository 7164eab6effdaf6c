/*!
Concrete mapper implementations beyond NROM.

- `cnrom`: mapper 3, CHR bank switching only.
- `mmc3`: mapper 4, PRG/CHR banking plus the scanline-counter IRQ that
  exercises the bus's mapper-interrupt path.
*/

pub mod cnrom;
pub mod mmc3;

pub use cnrom::Cnrom;
pub use mmc3::Mmc3;
