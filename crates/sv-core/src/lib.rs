//! Core traits shared by the SV80 CPU and machine crates.
//!
//! The CPU crate knows nothing about paging or the supervisor; it talks to
//! guest memory through [`Bus`]. The machine crate implements `Bus` on top
//! of its paged memory substrate. [`FlatBus`] is a translation-free 64 KiB
//! RAM used by CPU-level tests.

mod bus;
mod cpu;

pub use bus::{Bus, FlatBus};
pub use cpu::Cpu;
