//! Instruction tracing.
//!
//! A bounded ring buffer of per-step records, plus the live debug output.
//! Levels 1-3 print to stderr so guest output on stdout stays clean;
//! levels 4 and 5 are `tracing` events emitted by the interrupt and pager
//! paths, not here.

use std::collections::VecDeque;
use std::io::{self, Write};

use intel_8080::{flags, ops, Registers};

/// Retained trace records.
const DEFAULT_CAPACITY: usize = 1000;

/// One executed instruction.
#[derive(Debug, Clone, Copy)]
pub struct TraceEntry {
    pub pc: u16,
    pub opcode: u8,
    pub regs: Registers,
    pub cycle: u64,
}

/// Bounded instruction-trace ring buffer.
pub struct Tracer {
    entries: VecDeque<TraceEntry>,
    capacity: usize,
    debug_level: u8,
}

impl Tracer {
    #[must_use]
    pub fn new(debug_level: u8) -> Self {
        Self {
            entries: VecDeque::with_capacity(DEFAULT_CAPACITY),
            capacity: DEFAULT_CAPACITY,
            debug_level,
        }
    }

    /// Record one executed instruction; prints per the debug level.
    pub fn record(&mut self, pc: u16, opcode: u8, regs: Registers, cycle: u64) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(TraceEntry { pc, opcode, regs, cycle });

        match self.debug_level {
            0 => {}
            1 => eprintln!("{pc:04X}  {:02X}  {}", opcode, ops::MNEMONICS[usize::from(opcode)]),
            2 => eprintln!(
                "{pc:04X}  {:02X}  {:<10}  A={:02X} BC={:04X} DE={:04X} HL={:04X} SP={:04X}",
                opcode,
                ops::MNEMONICS[usize::from(opcode)],
                regs.a,
                regs.bc(),
                regs.de(),
                regs.hl(),
                regs.sp,
            ),
            _ => eprintln!(
                "{pc:04X}  {:02X}  {:<10}  A={:02X} BC={:04X} DE={:04X} HL={:04X} SP={:04X}  {}  cyc={cycle}",
                opcode,
                ops::MNEMONICS[usize::from(opcode)],
                regs.a,
                regs.bc(),
                regs.de(),
                regs.hl(),
                regs.sp,
                flags_display(regs.f),
            ),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    /// Write the retained trace as a table.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "PC    | Op | A  B  C  D  E  H  L  | Flags | Cycle")?;
        writeln!(out, "------+----+----------------------+-------+------")?;
        for entry in &self.entries {
            let r = entry.regs;
            writeln!(
                out,
                "{:04X}  | {:02X} | {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} {:02X} | {} | {}",
                entry.pc,
                entry.opcode,
                r.a,
                r.b,
                r.c,
                r.d,
                r.e,
                r.h,
                r.l,
                flags_display(r.f),
                entry.cycle,
            )?;
        }
        Ok(())
    }
}

fn flags_display(f: u8) -> String {
    let bit = |mask, ch| if f & mask != 0 { ch } else { '.' };
    [
        bit(flags::ZF, 'Z'),
        bit(flags::SF, 'S'),
        bit(flags::PF, 'P'),
        bit(flags::CF, 'C'),
        bit(flags::AF, 'A'),
    ]
    .iter()
    .collect()
}
