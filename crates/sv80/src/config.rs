//! Machine configuration.

use intel_8080::{DEFAULT_INT_BUFFER, DEFAULT_QUANTUM};

/// Default physical backing store: 1 MiB (1024 frames).
pub const DEFAULT_PHYS_SIZE: usize = 0x10_0000;

/// Configuration for creating a [`Machine`](crate::Machine).
///
/// Debug levels: 0 silent, 1 PC+opcode trace, 2 adds registers, 3 adds
/// flags and the cycle counter, 4 adds interrupt events, 5 adds
/// page-fault analysis. Levels 4 and 5 are emitted through `tracing`,
/// so the binary maps them to the subscriber's max level.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Trace verbosity, 0..=5.
    pub debug_level: u8,
    /// Scheduler quantum in ticks (1..=255).
    pub quantum: u8,
    /// Interrupt buffer base address (supervisor scratch area).
    pub interrupt_buffer_base: u16,
    /// Physical backing store size in bytes; must be a multiple of the
    /// page size.
    pub phys_size: usize,
    /// Fault on reserved opcodes instead of executing them as NOP.
    pub strict_opcodes: bool,
    /// Instruction ceiling; `None` disables the watchdog.
    pub watchdog: Option<u64>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            debug_level: 0,
            quantum: DEFAULT_QUANTUM,
            interrupt_buffer_base: DEFAULT_INT_BUFFER,
            phys_size: DEFAULT_PHYS_SIZE,
            strict_opcodes: false,
            watchdog: None,
        }
    }
}
