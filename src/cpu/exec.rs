/*!
6502 interpreter shared by the CPU cores.

Covers the documented opcode set with standard cycle timing: base cycles
per opcode plus +1 for page-crossing indexed reads, +1 for taken branches
and +1 more when the branch crosses a page. Read-modify-write instructions
perform the write-back explicitly.

Interrupts are serviced between instructions only. `step` polls them first
when inline polling is on (batch scheduler); the event-driven scheduler
turns that off and calls `service_interrupts` at its own boundaries.

Illegal opcodes either behave as one-byte two-cycle NOPs (lenient mode) or
rewind PC to the opcode byte and report it, so crash policies see the
faulting address itself.
*/

use crate::bus::Bus;
use crate::cores::{CpuRegs, CpuStep};

pub const FLAG_CARRY: u8 = 0x01;
pub const FLAG_ZERO: u8 = 0x02;
pub const FLAG_IRQ_DISABLE: u8 = 0x04;
pub const FLAG_DECIMAL: u8 = 0x08;
pub const FLAG_BREAK: u8 = 0x10;
pub const FLAG_UNUSED: u8 = 0x20;
pub const FLAG_OVERFLOW: u8 = 0x40;
pub const FLAG_NEGATIVE: u8 = 0x80;

const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

#[derive(Clone, Debug)]
pub struct Mos6502 {
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub sp: u8,
    pub pending_nmi: bool,
    pub irq_line: bool,
    pub ignore_illegal: bool,
    pub inline_interrupts: bool,
}

impl Default for Mos6502 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mos6502 {
    pub fn new() -> Self {
        Self {
            pc: 0,
            a: 0,
            x: 0,
            y: 0,
            p: FLAG_IRQ_DISABLE | FLAG_UNUSED,
            sp: 0xFD,
            pending_nmi: false,
            irq_line: false,
            ignore_illegal: false,
            inline_interrupts: true,
        }
    }

    pub fn reset(&mut self, bus: &mut Bus) {
        self.pc = self.read16(bus, RESET_VECTOR);
        self.sp = 0xFD;
        self.p = FLAG_IRQ_DISABLE | FLAG_UNUSED;
        self.pending_nmi = false;
        self.irq_line = false;
    }

    pub fn regs(&self) -> CpuRegs {
        CpuRegs {
            pc: self.pc,
            a: self.a,
            x: self.x,
            y: self.y,
            p: self.p,
            sp: self.sp,
        }
    }

    pub fn set_regs(&mut self, r: CpuRegs) {
        self.pc = r.pc;
        self.a = r.a;
        self.x = r.x;
        self.y = r.y;
        self.p = r.p | FLAG_UNUSED;
        self.sp = r.sp;
    }

    /// Service a pending NMI (or IRQ when not masked). Returns the 7 cycles
    /// the interrupt sequence costs, or 0 when nothing fires.
    pub fn service_interrupts(&mut self, bus: &mut Bus) -> u32 {
        if self.pending_nmi {
            self.pending_nmi = false;
            self.enter_interrupt(bus, NMI_VECTOR);
            return 7;
        }
        if self.irq_line && self.p & FLAG_IRQ_DISABLE == 0 {
            self.enter_interrupt(bus, IRQ_VECTOR);
            return 7;
        }
        0
    }

    fn enter_interrupt(&mut self, bus: &mut Bus, vector: u16) {
        self.push16(bus, self.pc);
        self.push8(bus, (self.p | FLAG_UNUSED) & !FLAG_BREAK);
        self.p |= FLAG_IRQ_DISABLE;
        self.pc = self.read16(bus, vector);
    }

    /// Execute one instruction (after servicing interrupts when inline
    /// polling is on).
    pub fn step(&mut self, bus: &mut Bus) -> CpuStep {
        if self.inline_interrupts {
            let c = self.service_interrupts(bus);
            if c > 0 {
                return CpuStep::Ok(c);
            }
        }
        let op_addr = self.pc;
        let op = self.fetch8(bus);
        let cycles = match op {
            // ----------------------------------------------------------
            // Loads
            // ----------------------------------------------------------
            0xA9 => {
                let v = self.fetch8(bus);
                self.lda(v);
                2
            }
            0xA5 => {
                let a = self.zp(bus);
                let v = bus.read(a);
                self.lda(v);
                3
            }
            0xB5 => {
                let a = self.zpx(bus);
                let v = bus.read(a);
                self.lda(v);
                4
            }
            0xAD => {
                let a = self.abs(bus);
                let v = bus.read(a);
                self.lda(v);
                4
            }
            0xBD => {
                let (a, xp) = self.absx(bus);
                let v = bus.read(a);
                self.lda(v);
                4 + xp as u32
            }
            0xB9 => {
                let (a, xp) = self.absy(bus);
                let v = bus.read(a);
                self.lda(v);
                4 + xp as u32
            }
            0xA1 => {
                let a = self.indx(bus);
                let v = bus.read(a);
                self.lda(v);
                6
            }
            0xB1 => {
                let (a, xp) = self.indy(bus);
                let v = bus.read(a);
                self.lda(v);
                5 + xp as u32
            }
            0xA2 => {
                let v = self.fetch8(bus);
                self.ldx(v);
                2
            }
            0xA6 => {
                let a = self.zp(bus);
                let v = bus.read(a);
                self.ldx(v);
                3
            }
            0xB6 => {
                let a = self.zpy(bus);
                let v = bus.read(a);
                self.ldx(v);
                4
            }
            0xAE => {
                let a = self.abs(bus);
                let v = bus.read(a);
                self.ldx(v);
                4
            }
            0xBE => {
                let (a, xp) = self.absy(bus);
                let v = bus.read(a);
                self.ldx(v);
                4 + xp as u32
            }
            0xA0 => {
                let v = self.fetch8(bus);
                self.ldy(v);
                2
            }
            0xA4 => {
                let a = self.zp(bus);
                let v = bus.read(a);
                self.ldy(v);
                3
            }
            0xB4 => {
                let a = self.zpx(bus);
                let v = bus.read(a);
                self.ldy(v);
                4
            }
            0xAC => {
                let a = self.abs(bus);
                let v = bus.read(a);
                self.ldy(v);
                4
            }
            0xBC => {
                let (a, xp) = self.absx(bus);
                let v = bus.read(a);
                self.ldy(v);
                4 + xp as u32
            }

            // ----------------------------------------------------------
            // Stores
            // ----------------------------------------------------------
            0x85 => {
                let a = self.zp(bus);
                bus.write(a, self.a);
                3
            }
            0x95 => {
                let a = self.zpx(bus);
                bus.write(a, self.a);
                4
            }
            0x8D => {
                let a = self.abs(bus);
                bus.write(a, self.a);
                4
            }
            0x9D => {
                let (a, _) = self.absx(bus);
                bus.write(a, self.a);
                5
            }
            0x99 => {
                let (a, _) = self.absy(bus);
                bus.write(a, self.a);
                5
            }
            0x81 => {
                let a = self.indx(bus);
                bus.write(a, self.a);
                6
            }
            0x91 => {
                let (a, _) = self.indy(bus);
                bus.write(a, self.a);
                6
            }
            0x86 => {
                let a = self.zp(bus);
                bus.write(a, self.x);
                3
            }
            0x96 => {
                let a = self.zpy(bus);
                bus.write(a, self.x);
                4
            }
            0x8E => {
                let a = self.abs(bus);
                bus.write(a, self.x);
                4
            }
            0x84 => {
                let a = self.zp(bus);
                bus.write(a, self.y);
                3
            }
            0x94 => {
                let a = self.zpx(bus);
                bus.write(a, self.y);
                4
            }
            0x8C => {
                let a = self.abs(bus);
                bus.write(a, self.y);
                4
            }

            // ----------------------------------------------------------
            // Transfers / stack
            // ----------------------------------------------------------
            0xAA => {
                self.x = self.a;
                self.zn(self.x);
                2
            }
            0xA8 => {
                self.y = self.a;
                self.zn(self.y);
                2
            }
            0x8A => {
                self.a = self.x;
                self.zn(self.a);
                2
            }
            0x98 => {
                self.a = self.y;
                self.zn(self.a);
                2
            }
            0xBA => {
                self.x = self.sp;
                self.zn(self.x);
                2
            }
            0x9A => {
                self.sp = self.x;
                2
            }
            0x48 => {
                self.push8(bus, self.a);
                3
            }
            0x68 => {
                self.a = self.pop8(bus);
                self.zn(self.a);
                4
            }
            0x08 => {
                self.push8(bus, self.p | FLAG_BREAK | FLAG_UNUSED);
                3
            }
            0x28 => {
                let v = self.pop8(bus);
                self.p = (v & !FLAG_BREAK) | FLAG_UNUSED;
                4
            }

            // ----------------------------------------------------------
            // Increments / decrements
            // ----------------------------------------------------------
            0xE8 => {
                self.x = self.x.wrapping_add(1);
                self.zn(self.x);
                2
            }
            0xC8 => {
                self.y = self.y.wrapping_add(1);
                self.zn(self.y);
                2
            }
            0xCA => {
                self.x = self.x.wrapping_sub(1);
                self.zn(self.x);
                2
            }
            0x88 => {
                self.y = self.y.wrapping_sub(1);
                self.zn(self.y);
                2
            }
            0xE6 => {
                let a = self.zp(bus);
                self.rmw(bus, a, |_, v| v.wrapping_add(1));
                5
            }
            0xF6 => {
                let a = self.zpx(bus);
                self.rmw(bus, a, |_, v| v.wrapping_add(1));
                6
            }
            0xEE => {
                let a = self.abs(bus);
                self.rmw(bus, a, |_, v| v.wrapping_add(1));
                6
            }
            0xFE => {
                let (a, _) = self.absx(bus);
                self.rmw(bus, a, |_, v| v.wrapping_add(1));
                7
            }
            0xC6 => {
                let a = self.zp(bus);
                self.rmw(bus, a, |_, v| v.wrapping_sub(1));
                5
            }
            0xD6 => {
                let a = self.zpx(bus);
                self.rmw(bus, a, |_, v| v.wrapping_sub(1));
                6
            }
            0xCE => {
                let a = self.abs(bus);
                self.rmw(bus, a, |_, v| v.wrapping_sub(1));
                6
            }
            0xDE => {
                let (a, _) = self.absx(bus);
                self.rmw(bus, a, |_, v| v.wrapping_sub(1));
                7
            }

            // ----------------------------------------------------------
            // Logical
            // ----------------------------------------------------------
            0x29 => {
                let v = self.fetch8(bus);
                self.and(v);
                2
            }
            0x25 => {
                let a = self.zp(bus);
                let v = bus.read(a);
                self.and(v);
                3
            }
            0x35 => {
                let a = self.zpx(bus);
                let v = bus.read(a);
                self.and(v);
                4
            }
            0x2D => {
                let a = self.abs(bus);
                let v = bus.read(a);
                self.and(v);
                4
            }
            0x3D => {
                let (a, xp) = self.absx(bus);
                let v = bus.read(a);
                self.and(v);
                4 + xp as u32
            }
            0x39 => {
                let (a, xp) = self.absy(bus);
                let v = bus.read(a);
                self.and(v);
                4 + xp as u32
            }
            0x21 => {
                let a = self.indx(bus);
                let v = bus.read(a);
                self.and(v);
                6
            }
            0x31 => {
                let (a, xp) = self.indy(bus);
                let v = bus.read(a);
                self.and(v);
                5 + xp as u32
            }
            0x09 => {
                let v = self.fetch8(bus);
                self.ora(v);
                2
            }
            0x05 => {
                let a = self.zp(bus);
                let v = bus.read(a);
                self.ora(v);
                3
            }
            0x15 => {
                let a = self.zpx(bus);
                let v = bus.read(a);
                self.ora(v);
                4
            }
            0x0D => {
                let a = self.abs(bus);
                let v = bus.read(a);
                self.ora(v);
                4
            }
            0x1D => {
                let (a, xp) = self.absx(bus);
                let v = bus.read(a);
                self.ora(v);
                4 + xp as u32
            }
            0x19 => {
                let (a, xp) = self.absy(bus);
                let v = bus.read(a);
                self.ora(v);
                4 + xp as u32
            }
            0x01 => {
                let a = self.indx(bus);
                let v = bus.read(a);
                self.ora(v);
                6
            }
            0x11 => {
                let (a, xp) = self.indy(bus);
                let v = bus.read(a);
                self.ora(v);
                5 + xp as u32
            }
            0x49 => {
                let v = self.fetch8(bus);
                self.eor(v);
                2
            }
            0x45 => {
                let a = self.zp(bus);
                let v = bus.read(a);
                self.eor(v);
                3
            }
            0x55 => {
                let a = self.zpx(bus);
                let v = bus.read(a);
                self.eor(v);
                4
            }
            0x4D => {
                let a = self.abs(bus);
                let v = bus.read(a);
                self.eor(v);
                4
            }
            0x5D => {
                let (a, xp) = self.absx(bus);
                let v = bus.read(a);
                self.eor(v);
                4 + xp as u32
            }
            0x59 => {
                let (a, xp) = self.absy(bus);
                let v = bus.read(a);
                self.eor(v);
                4 + xp as u32
            }
            0x41 => {
                let a = self.indx(bus);
                let v = bus.read(a);
                self.eor(v);
                6
            }
            0x51 => {
                let (a, xp) = self.indy(bus);
                let v = bus.read(a);
                self.eor(v);
                5 + xp as u32
            }
            0x24 => {
                let a = self.zp(bus);
                let v = bus.read(a);
                self.bit(v);
                3
            }
            0x2C => {
                let a = self.abs(bus);
                let v = bus.read(a);
                self.bit(v);
                4
            }

            // ----------------------------------------------------------
            // Shifts / rotates
            // ----------------------------------------------------------
            0x0A => {
                self.a = self.asl(self.a);
                2
            }
            0x06 => {
                let a = self.zp(bus);
                self.rmw(bus, a, Self::asl);
                5
            }
            0x16 => {
                let a = self.zpx(bus);
                self.rmw(bus, a, Self::asl);
                6
            }
            0x0E => {
                let a = self.abs(bus);
                self.rmw(bus, a, Self::asl);
                6
            }
            0x1E => {
                let (a, _) = self.absx(bus);
                self.rmw(bus, a, Self::asl);
                7
            }
            0x4A => {
                self.a = self.lsr(self.a);
                2
            }
            0x46 => {
                let a = self.zp(bus);
                self.rmw(bus, a, Self::lsr);
                5
            }
            0x56 => {
                let a = self.zpx(bus);
                self.rmw(bus, a, Self::lsr);
                6
            }
            0x4E => {
                let a = self.abs(bus);
                self.rmw(bus, a, Self::lsr);
                6
            }
            0x5E => {
                let (a, _) = self.absx(bus);
                self.rmw(bus, a, Self::lsr);
                7
            }
            0x2A => {
                self.a = self.rol(self.a);
                2
            }
            0x26 => {
                let a = self.zp(bus);
                self.rmw(bus, a, Self::rol);
                5
            }
            0x36 => {
                let a = self.zpx(bus);
                self.rmw(bus, a, Self::rol);
                6
            }
            0x2E => {
                let a = self.abs(bus);
                self.rmw(bus, a, Self::rol);
                6
            }
            0x3E => {
                let (a, _) = self.absx(bus);
                self.rmw(bus, a, Self::rol);
                7
            }
            0x6A => {
                self.a = self.ror(self.a);
                2
            }
            0x66 => {
                let a = self.zp(bus);
                self.rmw(bus, a, Self::ror);
                5
            }
            0x76 => {
                let a = self.zpx(bus);
                self.rmw(bus, a, Self::ror);
                6
            }
            0x6E => {
                let a = self.abs(bus);
                self.rmw(bus, a, Self::ror);
                6
            }
            0x7E => {
                let (a, _) = self.absx(bus);
                self.rmw(bus, a, Self::ror);
                7
            }

            // ----------------------------------------------------------
            // Flag operations
            // ----------------------------------------------------------
            0x18 => {
                self.p &= !FLAG_CARRY;
                2
            }
            0x38 => {
                self.p |= FLAG_CARRY;
                2
            }
            0x58 => {
                self.p &= !FLAG_IRQ_DISABLE;
                2
            }
            0x78 => {
                self.p |= FLAG_IRQ_DISABLE;
                2
            }
            0xB8 => {
                self.p &= !FLAG_OVERFLOW;
                2
            }
            0xD8 => {
                self.p &= !FLAG_DECIMAL;
                2
            }
            0xF8 => {
                self.p |= FLAG_DECIMAL;
                2
            }

            // ----------------------------------------------------------
            // Compares
            // ----------------------------------------------------------
            0xC9 => {
                let v = self.fetch8(bus);
                self.compare(self.a, v);
                2
            }
            0xC5 => {
                let a = self.zp(bus);
                let v = bus.read(a);
                self.compare(self.a, v);
                3
            }
            0xD5 => {
                let a = self.zpx(bus);
                let v = bus.read(a);
                self.compare(self.a, v);
                4
            }
            0xCD => {
                let a = self.abs(bus);
                let v = bus.read(a);
                self.compare(self.a, v);
                4
            }
            0xDD => {
                let (a, xp) = self.absx(bus);
                let v = bus.read(a);
                self.compare(self.a, v);
                4 + xp as u32
            }
            0xD9 => {
                let (a, xp) = self.absy(bus);
                let v = bus.read(a);
                self.compare(self.a, v);
                4 + xp as u32
            }
            0xC1 => {
                let a = self.indx(bus);
                let v = bus.read(a);
                self.compare(self.a, v);
                6
            }
            0xD1 => {
                let (a, xp) = self.indy(bus);
                let v = bus.read(a);
                self.compare(self.a, v);
                5 + xp as u32
            }
            0xE0 => {
                let v = self.fetch8(bus);
                self.compare(self.x, v);
                2
            }
            0xE4 => {
                let a = self.zp(bus);
                let v = bus.read(a);
                self.compare(self.x, v);
                3
            }
            0xEC => {
                let a = self.abs(bus);
                let v = bus.read(a);
                self.compare(self.x, v);
                4
            }
            0xC0 => {
                let v = self.fetch8(bus);
                self.compare(self.y, v);
                2
            }
            0xC4 => {
                let a = self.zp(bus);
                let v = bus.read(a);
                self.compare(self.y, v);
                3
            }
            0xCC => {
                let a = self.abs(bus);
                let v = bus.read(a);
                self.compare(self.y, v);
                4
            }

            // ----------------------------------------------------------
            // Branches
            // ----------------------------------------------------------
            0x10 => self.branch(bus, self.p & FLAG_NEGATIVE == 0),
            0x30 => self.branch(bus, self.p & FLAG_NEGATIVE != 0),
            0x50 => self.branch(bus, self.p & FLAG_OVERFLOW == 0),
            0x70 => self.branch(bus, self.p & FLAG_OVERFLOW != 0),
            0x90 => self.branch(bus, self.p & FLAG_CARRY == 0),
            0xB0 => self.branch(bus, self.p & FLAG_CARRY != 0),
            0xD0 => self.branch(bus, self.p & FLAG_ZERO == 0),
            0xF0 => self.branch(bus, self.p & FLAG_ZERO != 0),

            // ----------------------------------------------------------
            // Jumps / returns
            // ----------------------------------------------------------
            0x4C => {
                self.pc = self.fetch16(bus);
                3
            }
            0x6C => {
                let ptr = self.fetch16(bus);
                self.pc = self.read16_wrapped(bus, ptr);
                5
            }
            0x20 => {
                let target = self.fetch16(bus);
                self.push16(bus, self.pc.wrapping_sub(1));
                self.pc = target;
                6
            }
            0x60 => {
                self.pc = self.pop16(bus).wrapping_add(1);
                6
            }
            0x40 => {
                let v = self.pop8(bus);
                self.p = (v & !FLAG_BREAK) | FLAG_UNUSED;
                self.pc = self.pop16(bus);
                6
            }

            // ----------------------------------------------------------
            // Arithmetic
            // ----------------------------------------------------------
            0x69 => {
                let v = self.fetch8(bus);
                self.adc(v);
                2
            }
            0x65 => {
                let a = self.zp(bus);
                let v = bus.read(a);
                self.adc(v);
                3
            }
            0x75 => {
                let a = self.zpx(bus);
                let v = bus.read(a);
                self.adc(v);
                4
            }
            0x6D => {
                let a = self.abs(bus);
                let v = bus.read(a);
                self.adc(v);
                4
            }
            0x7D => {
                let (a, xp) = self.absx(bus);
                let v = bus.read(a);
                self.adc(v);
                4 + xp as u32
            }
            0x79 => {
                let (a, xp) = self.absy(bus);
                let v = bus.read(a);
                self.adc(v);
                4 + xp as u32
            }
            0x61 => {
                let a = self.indx(bus);
                let v = bus.read(a);
                self.adc(v);
                6
            }
            0x71 => {
                let (a, xp) = self.indy(bus);
                let v = bus.read(a);
                self.adc(v);
                5 + xp as u32
            }
            0xE9 => {
                let v = self.fetch8(bus);
                self.adc(v ^ 0xFF);
                2
            }
            0xE5 => {
                let a = self.zp(bus);
                let v = bus.read(a);
                self.adc(v ^ 0xFF);
                3
            }
            0xF5 => {
                let a = self.zpx(bus);
                let v = bus.read(a);
                self.adc(v ^ 0xFF);
                4
            }
            0xED => {
                let a = self.abs(bus);
                let v = bus.read(a);
                self.adc(v ^ 0xFF);
                4
            }
            0xFD => {
                let (a, xp) = self.absx(bus);
                let v = bus.read(a);
                self.adc(v ^ 0xFF);
                4 + xp as u32
            }
            0xF9 => {
                let (a, xp) = self.absy(bus);
                let v = bus.read(a);
                self.adc(v ^ 0xFF);
                4 + xp as u32
            }
            0xE1 => {
                let a = self.indx(bus);
                let v = bus.read(a);
                self.adc(v ^ 0xFF);
                6
            }
            0xF1 => {
                let (a, xp) = self.indy(bus);
                let v = bus.read(a);
                self.adc(v ^ 0xFF);
                5 + xp as u32
            }

            // ----------------------------------------------------------
            // BRK / NOP
            // ----------------------------------------------------------
            0x00 => {
                self.pc = self.pc.wrapping_add(1);
                self.push16(bus, self.pc);
                self.push8(bus, self.p | FLAG_BREAK | FLAG_UNUSED);
                self.p |= FLAG_IRQ_DISABLE;
                self.pc = self.read16(bus, IRQ_VECTOR);
                7
            }
            0xEA => 2,

            _ => {
                if self.ignore_illegal {
                    2
                } else {
                    self.pc = op_addr;
                    return CpuStep::IllegalOpcode(op_addr);
                }
            }
        };
        CpuStep::Ok(cycles)
    }

    // ------------- addressing -------------

    #[inline]
    fn fetch8(&mut self, bus: &mut Bus) -> u8 {
        let v = bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        v
    }

    #[inline]
    fn fetch16(&mut self, bus: &mut Bus) -> u16 {
        let lo = self.fetch8(bus) as u16;
        let hi = self.fetch8(bus) as u16;
        (hi << 8) | lo
    }

    #[inline]
    fn read16(&self, bus: &mut Bus, addr: u16) -> u16 {
        let lo = bus.read(addr) as u16;
        let hi = bus.read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// JMP ($xxFF) wraps within the page, as on real hardware.
    #[inline]
    fn read16_wrapped(&self, bus: &mut Bus, addr: u16) -> u16 {
        let lo = bus.read(addr) as u16;
        let hi_addr = (addr & 0xFF00) | ((addr.wrapping_add(1)) & 0x00FF);
        let hi = bus.read(hi_addr) as u16;
        (hi << 8) | lo
    }

    #[inline]
    fn zp(&mut self, bus: &mut Bus) -> u16 {
        self.fetch8(bus) as u16
    }

    #[inline]
    fn zpx(&mut self, bus: &mut Bus) -> u16 {
        self.fetch8(bus).wrapping_add(self.x) as u16
    }

    #[inline]
    fn zpy(&mut self, bus: &mut Bus) -> u16 {
        self.fetch8(bus).wrapping_add(self.y) as u16
    }

    #[inline]
    fn abs(&mut self, bus: &mut Bus) -> u16 {
        self.fetch16(bus)
    }

    #[inline]
    fn absx(&mut self, bus: &mut Bus) -> (u16, bool) {
        let base = self.fetch16(bus);
        let addr = base.wrapping_add(self.x as u16);
        (addr, base & 0xFF00 != addr & 0xFF00)
    }

    #[inline]
    fn absy(&mut self, bus: &mut Bus) -> (u16, bool) {
        let base = self.fetch16(bus);
        let addr = base.wrapping_add(self.y as u16);
        (addr, base & 0xFF00 != addr & 0xFF00)
    }

    #[inline]
    fn indx(&mut self, bus: &mut Bus) -> u16 {
        let ptr = self.fetch8(bus).wrapping_add(self.x);
        let lo = bus.read(ptr as u16) as u16;
        let hi = bus.read(ptr.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    }

    #[inline]
    fn indy(&mut self, bus: &mut Bus) -> (u16, bool) {
        let ptr = self.fetch8(bus);
        let lo = bus.read(ptr as u16) as u16;
        let hi = bus.read(ptr.wrapping_add(1) as u16) as u16;
        let base = (hi << 8) | lo;
        let addr = base.wrapping_add(self.y as u16);
        (addr, base & 0xFF00 != addr & 0xFF00)
    }

    // ------------- stack -------------

    #[inline]
    fn push8(&mut self, bus: &mut Bus, v: u8) {
        bus.write(0x0100 | self.sp as u16, v);
        self.sp = self.sp.wrapping_sub(1);
    }

    #[inline]
    fn pop8(&mut self, bus: &mut Bus) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        bus.read(0x0100 | self.sp as u16)
    }

    #[inline]
    fn push16(&mut self, bus: &mut Bus, v: u16) {
        self.push8(bus, (v >> 8) as u8);
        self.push8(bus, v as u8);
    }

    #[inline]
    fn pop16(&mut self, bus: &mut Bus) -> u16 {
        let lo = self.pop8(bus) as u16;
        let hi = self.pop8(bus) as u16;
        (hi << 8) | lo
    }

    // ------------- operations -------------

    #[inline]
    fn zn(&mut self, v: u8) {
        self.p &= !(FLAG_ZERO | FLAG_NEGATIVE);
        if v == 0 {
            self.p |= FLAG_ZERO;
        }
        if v & 0x80 != 0 {
            self.p |= FLAG_NEGATIVE;
        }
    }

    #[inline]
    fn lda(&mut self, v: u8) {
        self.a = v;
        self.zn(v);
    }

    #[inline]
    fn ldx(&mut self, v: u8) {
        self.x = v;
        self.zn(v);
    }

    #[inline]
    fn ldy(&mut self, v: u8) {
        self.y = v;
        self.zn(v);
    }

    #[inline]
    fn and(&mut self, v: u8) {
        self.a &= v;
        self.zn(self.a);
    }

    #[inline]
    fn ora(&mut self, v: u8) {
        self.a |= v;
        self.zn(self.a);
    }

    #[inline]
    fn eor(&mut self, v: u8) {
        self.a ^= v;
        self.zn(self.a);
    }

    fn bit(&mut self, v: u8) {
        self.p &= !(FLAG_ZERO | FLAG_OVERFLOW | FLAG_NEGATIVE);
        if self.a & v == 0 {
            self.p |= FLAG_ZERO;
        }
        self.p |= v & (FLAG_OVERFLOW | FLAG_NEGATIVE);
    }

    fn adc(&mut self, v: u8) {
        let carry = (self.p & FLAG_CARRY) as u16;
        let sum = self.a as u16 + v as u16 + carry;
        let result = sum as u8;
        self.p &= !(FLAG_CARRY | FLAG_OVERFLOW);
        if sum > 0xFF {
            self.p |= FLAG_CARRY;
        }
        if (self.a ^ result) & (v ^ result) & 0x80 != 0 {
            self.p |= FLAG_OVERFLOW;
        }
        self.a = result;
        self.zn(result);
    }

    fn compare(&mut self, reg: u8, v: u8) {
        let diff = reg.wrapping_sub(v);
        self.p &= !FLAG_CARRY;
        if reg >= v {
            self.p |= FLAG_CARRY;
        }
        self.zn(diff);
    }

    fn asl(&mut self, v: u8) -> u8 {
        self.p &= !FLAG_CARRY;
        if v & 0x80 != 0 {
            self.p |= FLAG_CARRY;
        }
        let r = v << 1;
        self.zn(r);
        r
    }

    fn lsr(&mut self, v: u8) -> u8 {
        self.p &= !FLAG_CARRY;
        if v & 0x01 != 0 {
            self.p |= FLAG_CARRY;
        }
        let r = v >> 1;
        self.zn(r);
        r
    }

    fn rol(&mut self, v: u8) -> u8 {
        let carry_in = self.p & FLAG_CARRY;
        self.p &= !FLAG_CARRY;
        if v & 0x80 != 0 {
            self.p |= FLAG_CARRY;
        }
        let r = (v << 1) | carry_in;
        self.zn(r);
        r
    }

    fn ror(&mut self, v: u8) -> u8 {
        let carry_in = (self.p & FLAG_CARRY) << 7;
        self.p &= !FLAG_CARRY;
        if v & 0x01 != 0 {
            self.p |= FLAG_CARRY;
        }
        let r = (v >> 1) | carry_in;
        self.zn(r);
        r
    }

    /// Read-modify-write helper. Z/N always reflect the written value, so
    /// setting them here is correct for both the shift helpers (which set
    /// carry themselves) and plain INC/DEC closures.
    fn rmw(&mut self, bus: &mut Bus, addr: u16, f: impl Fn(&mut Self, u8) -> u8) {
        let v = bus.read(addr);
        let r = f(self, v);
        self.zn(r);
        bus.write(addr, r);
    }

    fn branch(&mut self, bus: &mut Bus, cond: bool) -> u32 {
        let offset = self.fetch8(bus) as i8;
        if !cond {
            return 2;
        }
        let old = self.pc;
        self.pc = self.pc.wrapping_add(offset as u16);
        if old & 0xFF00 != self.pc & 0xFF00 { 4 } else { 3 }
    }
}
