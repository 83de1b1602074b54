//! Host driver: owns the CPU, memory, and supervisor, and runs the loop.
//!
//! The loop steps the CPU one instruction at a time. Between instructions
//! it routes delivered interrupts and system calls to the supervisor,
//! surfaces faults, ticks the scheduler clock, and applies the watchdog.
//! Guest suspension happens only at these boundaries.

use std::fs;
use std::io;

use intel_8080::{Cpu8080, SCHEDULER_CODE};
use thiserror::Error;

use crate::config::MachineConfig;
use crate::memory::{Memory, MemoryError};
use crate::process::{Pcb, ProcessState};
use crate::snapshot::SnapshotError;
use crate::supervisor::{Console, Flow, StdConsole, Supervisor, RESERVED_TOP};
use crate::trace::Tracer;

/// Why the host loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The guest halted with interrupts disabled.
    Halted,
    /// Every process terminated.
    ProcessesExited,
}

/// Final accounting from [`Machine::run`].
#[derive(Debug, Clone, Copy)]
pub struct ExitSummary {
    pub reason: ExitReason,
    pub instructions: u64,
    pub cycles: u64,
}

/// Host-level failures. Per the propagation policy, only infrastructure
/// errors land here; guest-level faults terminate the offending process
/// and the loop keeps running.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("watchdog: instruction ceiling of {0} reached")]
    Watchdog(u64),

    #[error("failed to load image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("process table full")]
    ProcessTableFull,

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// The machine: one CPU, paged memory, and the supervisor.
pub struct Machine {
    cpu: Cpu8080,
    memory: Memory,
    supervisor: Supervisor,
    tracer: Tracer,
    config: MachineConfig,
    instructions: u64,
    cycles: u64,
}

impl Machine {
    /// Create a machine wired to the process stdio streams.
    #[must_use]
    pub fn new(config: MachineConfig) -> Self {
        Self::with_console(config, Box::new(StdConsole))
    }

    /// Create a machine with a custom console (tests capture guest I/O).
    #[must_use]
    pub fn with_console(config: MachineConfig, console: Box<dyn Console>) -> Self {
        let mut cpu = Cpu8080::new();
        cpu.set_quantum(config.quantum);
        cpu.set_interrupt_buffer_base(config.interrupt_buffer_base);
        cpu.set_strict_opcodes(config.strict_opcodes);
        cpu.set_stack_floor(RESERVED_TOP);
        Self {
            cpu,
            memory: Memory::new(config.phys_size),
            supervisor: Supervisor::new(console),
            tracer: Tracer::new(config.debug_level),
            config,
            instructions: 0,
            cycles: 0,
        }
    }

    /// Load a raw image file at guest address 0 and make it process 0.
    pub fn boot_image(&mut self, path: &str) -> Result<(), MachineError> {
        let image = fs::read(path).map_err(|source| MachineError::Image {
            path: path.to_string(),
            source,
        })?;
        self.boot_bytes(path, &image)
    }

    /// Boot from in-memory image bytes.
    pub fn boot_bytes(&mut self, name: &str, image: &[u8]) -> Result<(), MachineError> {
        self.memory.load_into(0, 0x0000, image)?;
        Supervisor::install_low_memory(&mut self.memory, 0)?;
        let mut pcb = Pcb::new(name, 0);
        pcb.state = ProcessState::Running;
        let slot = self
            .supervisor
            .table_mut()
            .spawn(pcb)
            .ok_or(MachineError::ProcessTableFull)?;
        self.supervisor.table_mut().set_current(slot);
        self.cpu.set_interrupts_enabled(true);
        Ok(())
    }

    /// Create an additional READY process from image bytes.
    pub fn spawn_bytes(&mut self, name: &str, image: &[u8]) -> Result<usize, MachineError> {
        self.supervisor
            .spawn(&mut self.memory, name, image)?
            .ok_or(MachineError::ProcessTableFull)
    }

    /// Drive the machine until a guest-visible stop or a host error.
    pub fn run(&mut self) -> Result<ExitSummary, MachineError> {
        loop {
            if let Some(reason) = self.step()? {
                tracing::info!(
                    ?reason,
                    instructions = self.instructions,
                    cycles = self.cycles,
                    "machine stopped"
                );
                return Ok(ExitSummary {
                    reason,
                    instructions: self.instructions,
                    cycles: self.cycles,
                });
            }
        }
    }

    /// One host-loop iteration: a CPU step plus boundary work. Returns
    /// `Some(reason)` when the machine is done.
    pub fn step(&mut self) -> Result<Option<ExitReason>, MachineError> {
        if let Some(limit) = self.config.watchdog {
            if self.instructions >= limit {
                return Err(MachineError::Watchdog(limit));
            }
        }

        let pc = self.cpu.regs.pc;
        let opcode = self.memory.peek(pc);
        match self.cpu.step(&mut self.memory) {
            Ok(cycles) => {
                self.instructions += 1;
                self.cycles += u64::from(cycles);
                if cycles > 0 && self.cpu.delivered_interrupt().is_none() {
                    self.tracer.record(pc, opcode, self.cpu.regs, self.cycles);
                }
            }
            Err(fault) => {
                self.instructions += 1;
                let flow =
                    self.supervisor
                        .fault_current(&mut self.cpu, &mut self.memory, &fault.to_string());
                if flow == Flow::Stop {
                    return Ok(Some(ExitReason::ProcessesExited));
                }
                return Ok(None);
            }
        }

        if let Some(fault) = self.memory.take_fault() {
            match fault {
                MemoryError::NoBackingStore { .. } => {
                    let flow = self.supervisor.fault_current(
                        &mut self.cpu,
                        &mut self.memory,
                        &fault.to_string(),
                    );
                    if flow == Flow::Stop {
                        return Ok(Some(ExitReason::ProcessesExited));
                    }
                    return Ok(None);
                }
                MemoryError::AddressOutOfRange { .. } => return Err(fault.into()),
            }
        }

        if let Some(code) = self.cpu.delivered_interrupt() {
            tracing::debug!(code, pc = self.cpu.regs.pc, "interrupt delivered");
            if code == SCHEDULER_CODE
                && self.supervisor.preempt(&mut self.cpu, &mut self.memory) == Flow::Stop
            {
                return Ok(Some(ExitReason::ProcessesExited));
            }
        }

        if self.cpu.is_system_call()
            && self.supervisor.handle_call(&mut self.cpu, &mut self.memory) == Flow::Stop
        {
            return Ok(Some(ExitReason::ProcessesExited));
        }

        // A delivery step is bookkeeping, not guest progress: ticking here
        // would shave one instruction off the incoming process's quantum.
        if self.cpu.delivered_interrupt().is_none() {
            self.cpu.dispatch_scheduler();
        }

        if self.cpu.is_halted() && !self.cpu.interrupts_enabled() {
            return Ok(Some(ExitReason::Halted));
        }
        Ok(None)
    }

    #[must_use]
    pub fn cpu(&self) -> &Cpu8080 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu8080 {
        &mut self.cpu
    }

    #[must_use]
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.supervisor
    }

    #[must_use]
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Instructions retired since boot.
    #[must_use]
    pub fn instructions(&self) -> u64 {
        self.instructions
    }
}
