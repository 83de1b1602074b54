//! The supervisor: trap dispatch, process lifecycle, context switching.
//!
//! Guest code traps by loading a call code into A and calling the gate at
//! [`GATE_ADDR`]. The gate preserves DE, HL, and the PSW around the trap
//! opcode, so calls that return a value do so in B. The host loop invokes
//! [`Supervisor::handle_call`] when the CPU reports the trap, and
//! [`Supervisor::preempt`] when the scheduler interrupt is delivered.

use std::fs;
use std::io::{self, BufRead, Write};

use intel_8080::Cpu8080;
use sv_core::Bus;

use crate::memory::Memory;
use crate::process::{Pcb, ProcessState, ProcessTable};

/// Call-gate entry point guests CALL with the code in A.
pub const GATE_ADDR: u16 = 0x0040;

/// End of the reserved low-memory region (vectors + gate). The CPU's
/// stack floor: pushes below this fault.
pub const RESERVED_TOP: u16 = 0x0050;

/// The call gate: PUSH D; PUSH H; PUSH PSW; SYS; POP PSW; POP H; POP D; RET.
const GATE_CODE: [u8; 8] = [0xD5, 0xE5, 0xF5, 0xED, 0xF1, 0xE1, 0xD1, 0xC9];

/// Interrupt vector stub: EI; RET. A rescheduled process resumes here and
/// pops its own interrupted PC.
const VECTOR_STUB: [u8; 2] = [0xFB, 0xC9];

/// String terminator accepted alongside NUL ('$', CP/M style).
const STRING_SENTINEL: u8 = 0x24;

/// Longest guest string the supervisor will read or write.
const MAX_STRING: usize = 255;

/// System-call codes (guest places the code in A, pointers in BC).
pub mod calls {
    /// Print bytes at (BC) until '$' or NUL.
    pub const PRINT_STR: u8 = 1;
    /// Read an integer from host input; store at (BC) as two bytes.
    pub const READ_MEM: u8 = 2;
    /// Print the integer formed from two bytes at (BC).
    pub const PRINT_MEM: u8 = 3;
    /// Print B as an unsigned integer.
    pub const PRINT_B: u8 = 4;
    /// Load the image named by the string at (BC); create a READY process.
    pub const LOAD_EXEC: u8 = 5;
    /// Set the scheduler quantum from B (clamped to 1..=255).
    pub const SET_QUANTUM: u8 = 6;
    /// Read one byte of input into B.
    pub const READ_B: u8 = 7;
    /// Read a line (max 255 chars) into the buffer at (BC); NUL-terminate.
    pub const READ_STR: u8 = 8;
    /// Terminate the current process and yield.
    pub const PROCESS_EXIT: u8 = 9;
}

/// Whether the host loop should keep driving the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// No runnable process remains.
    Stop,
}

/// Host console used by the supervisor for guest I/O. Production uses
/// [`StdConsole`]; tests substitute a capture implementation.
pub trait Console {
    fn print(&mut self, text: &str);
    fn read_line(&mut self) -> String;
}

/// Console over the process stdio streams.
pub struct StdConsole;

impl Console for StdConsole {
    fn print(&mut self, text: &str) {
        print!("{text}");
        let _ = io::stdout().flush();
    }

    fn read_line(&mut self) -> String {
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
        line
    }
}

/// The supervisor.
pub struct Supervisor {
    table: ProcessTable,
    console: Box<dyn Console>,
}

impl Supervisor {
    #[must_use]
    pub fn new(console: Box<dyn Console>) -> Self {
        Self {
            table: ProcessTable::new(),
            console,
        }
    }

    #[must_use]
    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut ProcessTable {
        &mut self.table
    }

    /// Install the interrupt vector stubs and the call gate into an
    /// address space's low memory. Images must leave 0x0008..0x0050 free.
    pub fn install_low_memory(mem: &mut Memory, asid: usize) -> Result<(), crate::MemoryError> {
        for vector in 1..=7u16 {
            mem.load_into(asid, vector * 8, &VECTOR_STUB)?;
        }
        mem.load_into(asid, GATE_ADDR, &GATE_CODE)
    }

    /// Create a READY process from a raw image.
    pub fn spawn(
        &mut self,
        mem: &mut Memory,
        name: &str,
        image: &[u8],
    ) -> Result<Option<usize>, crate::MemoryError> {
        let asid = mem.create_space();
        mem.load_into(asid, 0x0000, image)?;
        Self::install_low_memory(mem, asid)?;
        let slot = self.table.spawn(Pcb::new(name, asid));
        match slot {
            Some(pid) => tracing::info!(pid, name, asid, "process created"),
            None => {
                tracing::warn!(name, "process table full, dropping image");
                mem.release_space(asid);
            }
        }
        Ok(slot)
    }

    /// Dispatch a trap by the call code in A.
    pub fn handle_call(&mut self, cpu: &mut Cpu8080, mem: &mut Memory) -> Flow {
        let code = cpu.regs.a;
        let arg = cpu.regs.bc();
        match code {
            calls::PRINT_STR => {
                let text = read_guest_string(mem, arg);
                self.console.print(&String::from_utf8_lossy(&text));
            }
            calls::READ_MEM => {
                let value = self.read_integer();
                mem.write16(arg, value);
            }
            calls::PRINT_MEM => {
                let value = mem.read16(arg);
                self.console.print(&value.to_string());
            }
            calls::PRINT_B => {
                self.console.print(&cpu.regs.b.to_string());
            }
            calls::LOAD_EXEC => {
                let name_bytes = read_guest_string(mem, arg);
                let name = String::from_utf8_lossy(&name_bytes).into_owned();
                match fs::read(&name) {
                    Ok(image) => {
                        if let Err(err) = self.spawn(mem, &name, &image) {
                            tracing::warn!(%name, %err, "image load failed");
                        }
                    }
                    Err(err) => tracing::warn!(%name, %err, "cannot read image"),
                }
            }
            calls::SET_QUANTUM => {
                cpu.set_quantum(cpu.regs.b);
                tracing::debug!(quantum = cpu.quantum(), "quantum updated");
            }
            calls::READ_B => {
                cpu.regs.b = self.read_integer() as u8;
            }
            calls::READ_STR => {
                let line = self.console.read_line();
                let bytes = line.trim_end_matches(['\r', '\n']).as_bytes();
                let len = bytes.len().min(MAX_STRING);
                for (i, &byte) in bytes[..len].iter().enumerate() {
                    mem.write(arg.wrapping_add(i as u16), byte);
                }
                mem.write(arg.wrapping_add(len as u16), 0);
            }
            calls::PROCESS_EXIT => return self.exit_current(cpu, mem),
            _ => tracing::warn!(code, "unknown system call ignored"),
        }
        Flow::Continue
    }

    /// Scheduler interrupt delivered: save the running process and hand
    /// the CPU to the next READY one in round-robin order.
    pub fn preempt(&mut self, cpu: &mut Cpu8080, mem: &mut Memory) -> Flow {
        if let Some(pcb) = self.table.current_mut() {
            if pcb.state == ProcessState::Running {
                pcb.regs = cpu.regs;
                pcb.interrupts_enabled = cpu.interrupts_enabled();
                pcb.state = ProcessState::Ready;
            }
        }
        self.schedule_next(cpu, mem)
    }

    /// Terminate the current process, free its frames, and yield.
    pub fn exit_current(&mut self, cpu: &mut Cpu8080, mem: &mut Memory) -> Flow {
        let pid = self.table.current_index();
        if let Some(pcb) = self.table.current_mut() {
            pcb.state = ProcessState::Terminated;
            let asid = pcb.asid;
            tracing::info!(pid, name = %pcb.name, "process exit");
            mem.release_space(asid);
        }
        self.schedule_next(cpu, mem)
    }

    /// Terminate the current process after a fault.
    pub fn fault_current(&mut self, cpu: &mut Cpu8080, mem: &mut Memory, reason: &str) -> Flow {
        let pid = self.table.current_index();
        tracing::warn!(pid, reason, "terminating faulted process");
        self.exit_current(cpu, mem)
    }

    fn schedule_next(&mut self, cpu: &mut Cpu8080, mem: &mut Memory) -> Flow {
        let Some(next) = self.table.next_ready() else {
            return Flow::Stop;
        };
        let previous = self.table.current_index();
        self.table.set_current(next);
        let pcb = self.table.current_mut().expect("next_ready returned a live slot");
        pcb.state = ProcessState::Running;
        cpu.regs = pcb.regs;
        cpu.set_interrupts_enabled(pcb.interrupts_enabled);
        cpu.set_halted(false);
        mem.activate(pcb.asid);
        cpu.reset_scheduler_elapsed();
        if next != previous {
            tracing::debug!(from = previous, to = next, "context switch");
        }
        Flow::Continue
    }

    fn read_integer(&mut self) -> u16 {
        let line = self.console.read_line();
        match line.trim().parse::<i32>() {
            Ok(value) => value as u16,
            Err(_) => {
                tracing::warn!(input = line.trim(), "unparsable integer, storing 0");
                0
            }
        }
    }
}

/// Read guest bytes at `addr` until '$', NUL, or the length cap.
fn read_guest_string(mem: &mut Memory, addr: u16) -> Vec<u8> {
    let mut bytes = Vec::new();
    for i in 0..MAX_STRING as u16 {
        let byte = mem.read(addr.wrapping_add(i));
        if byte == 0 || byte == STRING_SENTINEL {
            break;
        }
        bytes.push(byte);
    }
    bytes
}
