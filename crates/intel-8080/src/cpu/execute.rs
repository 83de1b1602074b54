//! Instruction decode and execute.
//!
//! One match over the full opcode byte. Register-indexed families (MOV,
//! the ALU block, INR/DCR, MVI) decode their operand field from the
//! opcode bits; everything else is listed explicitly. Conditional CALL
//! and RET add their six extra states when the branch is taken.

#![allow(clippy::cast_possible_truncation)] // Intentional truncation for low byte extraction.

use sv_core::Bus;

use crate::alu;
use crate::flags::{CF, PF, SF, ZF};
use crate::ops;

use super::{Cpu8080, CpuFault};

/// Extra states consumed by a taken conditional CALL or RET.
const BRANCH_TAKEN_EXTRA: u32 = 6;

impl Cpu8080 {
    pub(super) fn execute<B: Bus>(&mut self, bus: &mut B, opcode: u8) -> Result<u32, CpuFault> {
        let mut cycles = u32::from(ops::CYCLES[usize::from(opcode)]);

        match opcode {
            0x00 => {} // NOP

            // Reserved encodings execute as NOP unless strict decoding is on.
            0x08 | 0x10 | 0x18 | 0x20 | 0x28 | 0x30 | 0x38 | 0xCB | 0xD9 | 0xDD | 0xFD => {
                if self.strict_opcodes {
                    return Err(CpuFault::InvalidOpcode {
                        opcode,
                        pc: self.regs.pc.wrapping_sub(1),
                    });
                }
            }

            // --- 16-bit loads and register-pair arithmetic ---
            0x01 | 0x11 | 0x21 | 0x31 => {
                let value = self.fetch16(bus);
                self.set_pair(opcode, value);
            }
            0x03 | 0x13 | 0x23 | 0x33 => {
                let value = self.pair(opcode).wrapping_add(1);
                self.set_pair(opcode, value);
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let value = self.pair(opcode).wrapping_sub(1);
                self.set_pair(opcode, value);
            }
            0x09 | 0x19 | 0x29 | 0x39 => {
                let (value, flags) = alu::dad(self.regs.hl(), self.pair(opcode), self.regs.f);
                self.regs.set_hl(value);
                self.regs.f = flags;
            }

            // --- accumulator loads and stores ---
            0x02 => bus.write(self.regs.bc(), self.regs.a),
            0x12 => bus.write(self.regs.de(), self.regs.a),
            0x0A => self.regs.a = bus.read(self.regs.bc()),
            0x1A => self.regs.a = bus.read(self.regs.de()),
            0x32 => {
                let addr = self.fetch16(bus);
                bus.write(addr, self.regs.a);
            }
            0x3A => {
                let addr = self.fetch16(bus);
                self.regs.a = bus.read(addr);
            }
            0x22 => {
                let addr = self.fetch16(bus);
                bus.write16(addr, self.regs.hl());
            }
            0x2A => {
                let addr = self.fetch16(bus);
                let value = bus.read16(addr);
                self.regs.set_hl(value);
            }

            // --- increment, decrement, immediate moves ---
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                let idx = (opcode >> 3) & 0x07;
                let result = alu::inr(self.read_reg(bus, idx), self.regs.f);
                self.write_reg(bus, idx, result.value);
                self.regs.f = result.flags;
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                let idx = (opcode >> 3) & 0x07;
                let result = alu::dcr(self.read_reg(bus, idx), self.regs.f);
                self.write_reg(bus, idx, result.value);
                self.regs.f = result.flags;
            }
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
                let value = self.fetch8(bus);
                self.write_reg(bus, (opcode >> 3) & 0x07, value);
            }

            // --- rotates and accumulator specials ---
            0x07 => self.apply(alu::rlc(self.regs.a, self.regs.f)),
            0x0F => self.apply(alu::rrc(self.regs.a, self.regs.f)),
            0x17 => self.apply(alu::ral(self.regs.a, self.regs.f)),
            0x1F => self.apply(alu::rar(self.regs.a, self.regs.f)),
            0x27 => self.apply(alu::daa(self.regs.a, self.regs.f)),
            0x2F => self.regs.a = !self.regs.a,
            0x37 => self.regs.set_flag(CF, true),
            0x3F => {
                let carry = self.regs.flag(CF);
                self.regs.set_flag(CF, !carry);
            }

            0x76 => self.halted = true, // HLT

            // --- register-to-register moves ---
            0x40..=0x7F => {
                let value = self.read_reg(bus, opcode);
                self.write_reg(bus, opcode >> 3, value);
            }

            // --- eight-bit arithmetic and logic ---
            0x80..=0xBF => {
                let operand = self.read_reg(bus, opcode);
                self.alu_op(opcode >> 3, operand);
            }
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let operand = self.fetch8(bus);
                self.alu_op(opcode >> 3, operand);
            }

            // --- jumps ---
            0xC3 => self.regs.pc = self.fetch16(bus),
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let target = self.fetch16(bus);
                if self.condition(opcode >> 3) {
                    self.regs.pc = target;
                }
            }
            0xE9 => self.regs.pc = self.regs.hl(), // PCHL

            // --- calls and returns ---
            0xCD => {
                let target = self.fetch16(bus);
                self.push16(bus, self.regs.pc)?;
                self.regs.pc = target;
            }
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let target = self.fetch16(bus);
                if self.condition(opcode >> 3) {
                    self.push16(bus, self.regs.pc)?;
                    self.regs.pc = target;
                    cycles += BRANCH_TAKEN_EXTRA;
                }
            }
            0xC9 => self.regs.pc = self.pop16(bus),
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                if self.condition(opcode >> 3) {
                    self.regs.pc = self.pop16(bus);
                    cycles += BRANCH_TAKEN_EXTRA;
                }
            }
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                self.push16(bus, self.regs.pc)?;
                self.regs.pc = u16::from(opcode & 0x38);
            }

            // --- stack ---
            0xC5 | 0xD5 | 0xE5 => {
                let value = self.pair(opcode);
                self.push16(bus, value)?;
            }
            0xF5 => {
                let value = self.regs.psw();
                self.push16(bus, value)?;
            }
            0xC1 | 0xD1 | 0xE1 => {
                let value = self.pop16(bus);
                self.set_pair(opcode, value);
            }
            0xF1 => {
                let value = self.pop16(bus);
                self.regs.set_psw(value);
            }
            0xE3 => {
                // XTHL: swap HL with the word at (SP).
                let sp = self.regs.sp;
                let lo = bus.read(sp);
                let hi = bus.read(sp.wrapping_add(1));
                bus.write(sp, self.regs.l);
                bus.write(sp.wrapping_add(1), self.regs.h);
                self.regs.l = lo;
                self.regs.h = hi;
            }
            0xF9 => self.regs.sp = self.regs.hl(), // SPHL

            // --- exchange, I/O, interrupt control ---
            0xEB => {
                let de = self.regs.de();
                let hl = self.regs.hl();
                self.regs.set_de(hl);
                self.regs.set_hl(de);
            }
            0xD3 => {
                let port = self.fetch8(bus);
                bus.io_write(port, self.regs.a);
            }
            0xDB => {
                let port = self.fetch8(bus);
                self.regs.a = bus.io_read(port);
            }
            0xF3 => self.gate.disable(),        // DI
            0xFB => self.gate.request_enable(), // EI

            // Supervisor trap: latch the system-call flag for the host.
            0xED => self.syscall = true,
        }

        Ok(cycles)
    }

    /// Read the register selected by the low three bits of `idx`
    /// (B, C, D, E, H, L, memory at HL, A).
    fn read_reg<B: Bus>(&mut self, bus: &mut B, idx: u8) -> u8 {
        match idx & 0x07 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            6 => bus.read(self.regs.hl()),
            _ => self.regs.a,
        }
    }

    /// Write the register selected by the low three bits of `idx`.
    fn write_reg<B: Bus>(&mut self, bus: &mut B, idx: u8, value: u8) {
        match idx & 0x07 {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            6 => bus.write(self.regs.hl(), value),
            _ => self.regs.a = value,
        }
    }

    /// Register pair selected by opcode bits 5-4 (BC, DE, HL, SP).
    fn pair(&self, opcode: u8) -> u16 {
        match (opcode >> 4) & 0x03 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    fn set_pair(&mut self, opcode: u8, value: u16) {
        match (opcode >> 4) & 0x03 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            _ => self.regs.sp = value,
        }
    }

    /// Branch condition selected by opcode bits 5-3
    /// (NZ, Z, NC, C, PO, PE, P, M).
    fn condition(&self, idx: u8) -> bool {
        match idx & 0x07 {
            0 => !self.regs.flag(ZF),
            1 => self.regs.flag(ZF),
            2 => !self.regs.flag(CF),
            3 => self.regs.flag(CF),
            4 => !self.regs.flag(PF),
            5 => self.regs.flag(PF),
            6 => !self.regs.flag(SF),
            _ => self.regs.flag(SF),
        }
    }

    /// ALU operation selected by opcode bits 5-3
    /// (ADD, ADC, SUB, SBB, ANA, XRA, ORA, CMP).
    fn alu_op(&mut self, idx: u8, operand: u8) {
        let a = self.regs.a;
        let carry = self.regs.flag(CF);
        let result = match idx & 0x07 {
            0 => alu::add8(a, operand, false),
            1 => alu::add8(a, operand, carry),
            2 => alu::sub8(a, operand, false),
            3 => alu::sub8(a, operand, carry),
            4 => alu::and8(a, operand),
            5 => alu::xor8(a, operand),
            6 => alu::or8(a, operand),
            _ => {
                // CMP: flags only, accumulator unchanged.
                self.regs.f = alu::sub8(a, operand, false).flags;
                return;
            }
        };
        self.regs.a = result.value;
        self.regs.f = result.flags;
    }

    fn apply(&mut self, result: alu::AluResult) {
        self.regs.a = result.value;
        self.regs.f = result.flags;
    }
}
