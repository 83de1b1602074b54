//! Process control blocks and the process table.

use intel_8080::{Registers, DEFAULT_QUANTUM};

/// Maximum resident processes.
pub const MAX_PROCESSES: usize = 16;

/// Process lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// Saved execution state plus scheduling metadata for one guest process.
#[derive(Debug, Clone)]
pub struct Pcb {
    /// Image name, for logs.
    pub name: String,
    /// Saved register file (PC, SP, PSW, and the seven GP registers).
    pub regs: Registers,
    /// Saved interrupt-enable flag.
    pub interrupts_enabled: bool,
    /// Memory-protection base address.
    pub base: u16,
    /// Memory-protection limit address.
    pub limit: u16,
    /// Scheduler quantum in ticks.
    pub quantum: u8,
    /// Scheduling priority (kept in the PCB; round-robin ignores it).
    pub priority: u8,
    pub state: ProcessState,
    /// Address space backing this process.
    pub asid: usize,
}

impl Pcb {
    /// A fresh READY process entering at address 0 with interrupts on.
    #[must_use]
    pub fn new(name: &str, asid: usize) -> Self {
        Self {
            name: name.to_string(),
            regs: Registers::default(),
            interrupts_enabled: true,
            base: 0x0000,
            limit: 0xFFFF,
            quantum: DEFAULT_QUANTUM,
            priority: 0,
            state: ProcessState::Ready,
            asid,
        }
    }
}

/// Fixed-size process table with strict round-robin selection.
#[derive(Debug)]
pub struct ProcessTable {
    slots: [Option<Pcb>; MAX_PROCESSES],
    current: usize,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            current: 0,
        }
    }

    /// Place a PCB in the first free slot. Returns `None` when full.
    pub fn spawn(&mut self, pcb: Pcb) -> Option<usize> {
        let slot = self.slots.iter().position(Option::is_none)?;
        self.slots[slot] = Some(pcb);
        Some(slot)
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn set_current(&mut self, index: usize) {
        self.current = index;
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Pcb> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Pcb> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    #[must_use]
    pub fn current(&self) -> Option<&Pcb> {
        self.get(self.current)
    }

    pub fn current_mut(&mut self) -> Option<&mut Pcb> {
        self.get_mut(self.current)
    }

    /// Next READY process in strict round-robin order: scan forward from
    /// the slot after the current one, wrapping, the current slot last.
    #[must_use]
    pub fn next_ready(&self) -> Option<usize> {
        (1..=MAX_PROCESSES)
            .map(|offset| (self.current + offset) % MAX_PROCESSES)
            .find(|&idx| {
                self.slots[idx]
                    .as_ref()
                    .is_some_and(|pcb| pcb.state == ProcessState::Ready)
            })
    }

    /// Count of processes that have not terminated.
    #[must_use]
    pub fn alive(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|pcb| pcb.state != ProcessState::Terminated)
            .count()
    }
}
