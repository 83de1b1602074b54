//! 8080 CPU core with per-instruction execution.

#![allow(clippy::cast_possible_truncation)] // Intentional truncation for low byte extraction.

use sv_core::Bus;
use thiserror::Error;

use crate::interrupt::InterruptGate;
use crate::registers::Registers;

mod execute;

/// Cycles consumed by delivering an interrupt (same as RST n).
const INTERRUPT_CYCLES: u32 = 11;

/// Faults surfaced by [`Cpu8080::step`].
///
/// The CPU never aborts the host: a fault leaves the CPU in a defined
/// state and the caller decides whether to continue, terminate the guest
/// process, or stop the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CpuFault {
    /// A reserved encoding was decoded in strict mode.
    #[error("invalid opcode {opcode:#04x} at {pc:#06x}")]
    InvalidOpcode { opcode: u8, pc: u16 },

    /// A push would wrap SP or enter the reserved low-memory region.
    #[error("stack overflow: push with SP at {sp:#06x}")]
    StackOverflow { sp: u16 },
}

/// The Intel 8080.
///
/// One [`step`](Cpu8080::step) executes a single instruction against the
/// bus and returns its documented cycle count. The CPU does not own the
/// bus; the machine passes it in per step, so memory can be shared with
/// the pager and supervisor between instructions.
#[derive(Debug)]
pub struct Cpu8080 {
    /// Register file, public for observation and context switching.
    pub regs: Registers,

    /// Interrupt and trap gate.
    gate: InterruptGate,

    /// HLT latch. Cleared when an enabled interrupt is delivered.
    halted: bool,

    /// The trap opcode retired this step.
    syscall: bool,

    /// Interrupt code delivered this step, for the host to consume.
    delivered: Option<u8>,

    /// Fault on reserved opcodes instead of executing them as NOP.
    strict_opcodes: bool,

    /// Pushes below this address fault with `StackOverflow`.
    stack_floor: u16,

    /// Total cycles since reset.
    total_cycles: u64,
}

impl Default for Cpu8080 {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu8080 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::default(),
            gate: InterruptGate::new(),
            halted: false,
            syscall: false,
            delivered: None,
            strict_opcodes: false,
            stack_floor: 0,
            total_cycles: 0,
        }
    }

    /// Execute one instruction.
    ///
    /// At the step boundary, a pending interrupt with IE set is delivered
    /// instead: IE is cleared, the current PC is pushed, and PC jumps to
    /// 8 x code. The displaced instruction runs after the handler's RET.
    /// While halted with nothing deliverable, returns 0 cycles and leaves
    /// PC alone.
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> Result<u32, CpuFault> {
        self.syscall = false;
        self.delivered = None;

        if let Some(code) = self.gate.take_deliverable() {
            self.halted = false;
            self.push16(bus, self.regs.pc)?;
            self.regs.pc = u16::from(code) * 8;
            self.delivered = Some(code);
            self.total_cycles += u64::from(INTERRUPT_CYCLES);
            return Ok(INTERRUPT_CYCLES);
        }

        if self.halted {
            return Ok(0);
        }

        // EI takes effect only after the *next* instruction retires, so an
        // interrupt raised right after EI waits one extra boundary.
        let commit_ei = self.gate.has_deferred_enable();
        let opcode = self.fetch8(bus);
        let cycles = self.execute(bus, opcode)?;
        if commit_ei {
            self.gate.commit_enable();
        }
        self.total_cycles += u64::from(cycles);
        Ok(cycles)
    }

    /// True after HLT until an enabled interrupt arrives.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// True if the trap opcode retired during the last step.
    #[must_use]
    pub fn is_system_call(&self) -> bool {
        self.syscall
    }

    /// Interrupt code delivered during the last step, if any.
    #[must_use]
    pub fn delivered_interrupt(&self) -> Option<u8> {
        self.delivered
    }

    /// Latch an interrupt (code 0..=7; others are dropped with a warning).
    pub fn raise_interrupt(&mut self, code: u8) -> bool {
        self.gate.raise(code)
    }

    /// Advance the scheduler clock by one tick.
    pub fn dispatch_scheduler(&mut self) {
        self.gate.dispatch_scheduler();
    }

    /// Reset the scheduler-elapsed counter (after a context switch).
    pub fn reset_scheduler_elapsed(&mut self) {
        self.gate.reset_elapsed();
    }

    /// Ticks since the last scheduler interrupt or context switch.
    #[must_use]
    pub fn scheduler_elapsed(&self) -> u8 {
        self.gate.elapsed()
    }

    /// Force the scheduler-elapsed counter (snapshot restore).
    pub fn set_scheduler_elapsed(&mut self, elapsed: u8) {
        self.gate.set_elapsed(elapsed);
    }

    #[must_use]
    pub fn quantum(&self) -> u8 {
        self.gate.quantum()
    }

    /// Set the scheduler quantum, clamped to 1..=255.
    pub fn set_quantum(&mut self, quantum: u8) {
        self.gate.set_quantum(quantum);
    }

    #[must_use]
    pub fn interrupts_enabled(&self) -> bool {
        self.gate.interrupts_enabled()
    }

    /// Force the interrupt-enable flag (context switch, snapshot restore,
    /// tests). Cancels any deferred EI.
    pub fn set_interrupts_enabled(&mut self, enabled: bool) {
        self.gate.set_interrupts_enabled(enabled);
    }

    /// Latched but undelivered interrupt code, if any.
    #[must_use]
    pub fn pending_interrupt(&self) -> Option<u8> {
        self.gate.pending()
    }

    #[must_use]
    pub fn interrupt_buffer_base(&self) -> u16 {
        self.gate.buffer_base()
    }

    pub fn set_interrupt_buffer_base(&mut self, address: u16) {
        self.gate.set_buffer_base(address);
    }

    /// Fault on reserved opcodes instead of executing them as NOP.
    pub fn set_strict_opcodes(&mut self, strict: bool) {
        self.strict_opcodes = strict;
    }

    /// Pushes below this address raise `StackOverflow`. The machine sets
    /// this to the end of the supervisor's reserved low-memory region.
    pub fn set_stack_floor(&mut self, floor: u16) {
        self.stack_floor = floor;
    }

    /// Force the HLT latch (snapshot restore).
    pub fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    /// Total cycles since reset.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Reset to power-on state. Configuration (quantum, buffer base,
    /// strict decoding, stack floor) survives; execution state does not.
    pub fn reset(&mut self) {
        self.regs = Registers::default();
        self.halted = false;
        self.syscall = false;
        self.delivered = None;
        self.total_cycles = 0;
        let quantum = self.gate.quantum();
        let buffer = self.gate.buffer_base();
        self.gate = InterruptGate::new();
        self.gate.set_quantum(quantum);
        self.gate.set_buffer_base(buffer);
    }

    // --- fetch and stack helpers -------------------------------------

    fn fetch8<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let value = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    fn fetch16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.fetch8(bus);
        let hi = self.fetch8(bus);
        u16::from(lo) | u16::from(hi) << 8
    }

    fn push8<B: Bus>(&mut self, bus: &mut B, value: u8) -> Result<(), CpuFault> {
        let new_sp = self.regs.sp.wrapping_sub(1);
        if new_sp >= self.regs.sp || new_sp < self.stack_floor {
            return Err(CpuFault::StackOverflow { sp: self.regs.sp });
        }
        self.regs.sp = new_sp;
        bus.write(new_sp, value);
        Ok(())
    }

    fn push16<B: Bus>(&mut self, bus: &mut B, value: u16) -> Result<(), CpuFault> {
        self.push8(bus, (value >> 8) as u8)?;
        self.push8(bus, value as u8)
    }

    fn pop8<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let value = bus.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        value
    }

    fn pop16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.pop8(bus);
        let hi = self.pop8(bus);
        u16::from(lo) | u16::from(hi) << 8
    }
}

impl<B: Bus> sv_core::Cpu<B> for Cpu8080 {
    type Fault = CpuFault;

    fn step(&mut self, bus: &mut B) -> Result<u32, CpuFault> {
        Cpu8080::step(self, bus)
    }

    fn pc(&self) -> u16 {
        self.regs.pc
    }

    fn is_halted(&self) -> bool {
        self.halted
    }

    fn reset(&mut self) {
        Cpu8080::reset(self);
    }
}
