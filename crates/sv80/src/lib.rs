//! SV80: a supervised Intel 8080 runtime.
//!
//! Guest programs are raw machine-code images running on an emulated 8080
//! behind a demand-paged 64 KiB address space. A supervisor interposes at
//! a trap gate in low guest memory for console I/O, process creation, and
//! scheduling; preemption rides a quantum-driven interrupt serviced
//! between instructions.

pub mod config;
pub mod machine;
pub mod memory;
pub mod pager;
pub mod process;
pub mod snapshot;
pub mod supervisor;
pub mod trace;

pub use config::MachineConfig;
pub use machine::{ExitReason, ExitSummary, Machine, MachineError};
pub use memory::{Memory, MemoryError};
pub use supervisor::{Console, StdConsole, Supervisor, GATE_ADDR, RESERVED_TOP};
