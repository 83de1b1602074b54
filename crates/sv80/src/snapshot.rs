//! Machine state snapshots.
//!
//! Fixed-layout binary: the register record in canonical order
//! (A, B, C, D, E, H, L, then SP and PC little-endian, then the PSW byte),
//! the mode bytes (IE, HALTED, QUANTUM, scheduler ELAPSED, PENDING
//! interrupt code or 0xFF), followed by a dense 64 KiB dump of the guest
//! address space taken with fault-free reads. Round-trippable: save then
//! restore yields bitwise-identical subsequent execution, including the
//! instant the next scheduler interrupt fires.

use sv_core::Bus;
use thiserror::Error;

use crate::process::{Pcb, ProcessState};
use crate::Machine;

/// Register record plus mode bytes.
pub const HEADER_LEN: usize = 17;

/// Total snapshot size.
pub const SNAPSHOT_LEN: usize = HEADER_LEN + 0x1_0000;

/// Mode-byte value for "no pending interrupt".
const NO_PENDING: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot truncated: {len} bytes, need {SNAPSHOT_LEN}")]
    Truncated { len: usize },
}

/// Serialize the current process's CPU state and full address space.
#[must_use]
pub fn save(machine: &Machine) -> Vec<u8> {
    let cpu = machine.cpu();
    let regs = cpu.regs;
    let mut out = Vec::with_capacity(SNAPSHOT_LEN);
    out.extend_from_slice(&[regs.a, regs.b, regs.c, regs.d, regs.e, regs.h, regs.l]);
    out.extend_from_slice(&regs.sp.to_le_bytes());
    out.extend_from_slice(&regs.pc.to_le_bytes());
    out.push(regs.f);
    out.push(u8::from(cpu.interrupts_enabled()));
    out.push(u8::from(cpu.is_halted()));
    out.push(cpu.quantum());
    out.push(cpu.scheduler_elapsed());
    out.push(cpu.pending_interrupt().unwrap_or(NO_PENDING));
    for addr in 0..=0xFFFFu16 {
        out.push(machine.memory().peek(addr));
    }
    out
}

/// Restore a snapshot into the active address space and make the resumed
/// guest the machine's current process.
pub fn restore(machine: &mut Machine, data: &[u8]) -> Result<(), SnapshotError> {
    if data.len() < SNAPSHOT_LEN {
        return Err(SnapshotError::Truncated { len: data.len() });
    }

    {
        let cpu = machine.cpu_mut();
        cpu.regs.a = data[0];
        cpu.regs.b = data[1];
        cpu.regs.c = data[2];
        cpu.regs.d = data[3];
        cpu.regs.e = data[4];
        cpu.regs.h = data[5];
        cpu.regs.l = data[6];
        cpu.regs.sp = u16::from_le_bytes([data[7], data[8]]);
        cpu.regs.pc = u16::from_le_bytes([data[9], data[10]]);
        let a = cpu.regs.a;
        cpu.regs.set_psw(u16::from(a) << 8 | u16::from(data[11]));
        cpu.set_interrupts_enabled(data[12] != 0);
        cpu.set_halted(data[13] != 0);
        cpu.set_quantum(data[14]);
        cpu.set_scheduler_elapsed(data[15]);
        if data[16] != NO_PENDING {
            cpu.raise_interrupt(data[16]);
        }
    }

    let memory = machine.memory_mut();
    for addr in 0..=0xFFFFu16 {
        memory.write(addr, data[HEADER_LEN + usize::from(addr)]);
    }

    // The resumed guest must own a process-table slot, or the next
    // preemption or exit would find nothing runnable and stop the machine.
    let asid = machine.memory().active_space();
    let regs = machine.cpu().regs;
    let interrupts_enabled = machine.cpu().interrupts_enabled();
    let table = machine.supervisor_mut().table_mut();
    if let Some(pcb) = table.current_mut() {
        pcb.regs = regs;
        pcb.interrupts_enabled = interrupts_enabled;
        pcb.state = ProcessState::Running;
    } else {
        let mut pcb = Pcb::new("snapshot", asid);
        pcb.regs = regs;
        pcb.interrupts_enabled = interrupts_enabled;
        pcb.state = ProcessState::Running;
        if let Some(slot) = table.spawn(pcb) {
            table.set_current(slot);
        }
    }
    Ok(())
}
