/*!
ROM image builders shared by the unit tests.
*/

const HEADER_LEN: usize = 16;
const PRG_UNIT: usize = 16 * 1024;
const CHR_UNIT: usize = 8 * 1024;

/// Raw iNES v1 image with deterministic filler in the data sections.
pub fn build_ines(prg_units: u8, chr_units: u8, flags6: u8, flags7: u8) -> Vec<u8> {
    let prg_len = prg_units as usize * PRG_UNIT;
    let chr_len = chr_units as usize * CHR_UNIT;
    let mut rom = vec![0u8; HEADER_LEN + prg_len + chr_len];
    rom[0..4].copy_from_slice(b"NES\x1A");
    rom[4] = prg_units;
    rom[5] = chr_units;
    rom[6] = flags6;
    rom[7] = flags7;
    for (i, b) in rom[HEADER_LEN..].iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    rom
}

/// Runnable NROM image: one 16 KiB PRG bank holding `code` at $8000 with
/// the reset vector pointing there, plus 8 KiB of CHR.
pub fn program_rom(code: &[u8]) -> Vec<u8> {
    program_rom_with_vectors(code, 0x8000, 0x8000)
}

/// Like [`program_rom`] but with explicit NMI and IRQ vectors.
pub fn program_rom_with_vectors(code: &[u8], nmi: u16, irq: u16) -> Vec<u8> {
    build_program(code, nmi, irq, &[0u8; CHR_UNIT])
}

/// Like [`program_rom`] but with caller-supplied CHR contents.
pub fn program_rom_with_chr(code: &[u8], chr: &[u8]) -> Vec<u8> {
    build_program(code, 0x8000, 0x8000, chr)
}

fn build_program(code: &[u8], nmi: u16, irq: u16, chr: &[u8]) -> Vec<u8> {
    assert!(code.len() <= PRG_UNIT - 6, "code overruns the vector table");
    let mut rom = vec![0u8; HEADER_LEN + PRG_UNIT + CHR_UNIT];
    rom[0..4].copy_from_slice(b"NES\x1A");
    rom[4] = 1;
    rom[5] = 1;

    let prg = &mut rom[HEADER_LEN..HEADER_LEN + PRG_UNIT];
    prg[..code.len()].copy_from_slice(code);
    // A 16 KiB bank mirrors, so $FFFA..$FFFF land at the end of the bank.
    prg[PRG_UNIT - 6] = nmi as u8;
    prg[PRG_UNIT - 5] = (nmi >> 8) as u8;
    prg[PRG_UNIT - 4] = 0x00;
    prg[PRG_UNIT - 3] = 0x80; // reset -> $8000
    prg[PRG_UNIT - 2] = irq as u8;
    prg[PRG_UNIT - 1] = (irq >> 8) as u8;

    let chr_dst = &mut rom[HEADER_LEN + PRG_UNIT..];
    let n = chr_dst.len().min(chr.len());
    chr_dst[..n].copy_from_slice(&chr[..n]);
    rom
}
