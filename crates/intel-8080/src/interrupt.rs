//! Interrupt and trap gate.
//!
//! Holds the pending-interrupt latch, the interrupt-enable flag with its
//! one-instruction EI deferral, and the scheduler quantum counter. The CPU
//! consults the gate at every step boundary; delivery side effects (push
//! PC, jump to the vector) live in the CPU itself.

/// Interrupt code raised when the scheduler quantum expires (vector 0x38).
pub const SCHEDULER_CODE: u8 = 7;

/// Default scheduler quantum in ticks.
pub const DEFAULT_QUANTUM: u8 = 80;

/// Default interrupt buffer base address (supervisor scratch area).
pub const DEFAULT_INT_BUFFER: u16 = 0x0100;

/// Interrupt state machine:
///
/// - none -> pending on [`raise`](InterruptGate::raise);
/// - pending -> delivered at the next step boundary with interrupts
///   enabled (the CPU clears IE, pushes PC, and jumps to 8 x code);
/// - pending is latched, not lost, while interrupts are disabled.
#[derive(Debug, Clone)]
pub struct InterruptGate {
    /// Latched interrupt code (0..=7), if any.
    pending: Option<u8>,
    /// Interrupt-enable flag.
    ie: bool,
    /// EI has retired but its effect is deferred one instruction.
    ei_deferred: bool,
    /// Scheduler quantum in ticks.
    quantum: u8,
    /// Ticks since the last scheduler interrupt or context switch.
    elapsed: u8,
    /// Interrupt buffer base address for supervisor scratch.
    buffer_base: u16,
}

impl Default for InterruptGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptGate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: None,
            ie: false,
            ei_deferred: false,
            quantum: DEFAULT_QUANTUM,
            elapsed: 0,
            buffer_base: DEFAULT_INT_BUFFER,
        }
    }

    /// Latch an interrupt. Codes outside 0..=7 are dropped with a warning.
    /// Returns true if the code was accepted.
    pub fn raise(&mut self, code: u8) -> bool {
        if code > 7 {
            tracing::warn!(code, "invalid interrupt code dropped");
            return false;
        }
        self.pending = Some(code);
        true
    }

    /// Advance the scheduler clock by one tick. When the quantum expires,
    /// raises [`SCHEDULER_CODE`] and resets the counter.
    pub fn dispatch_scheduler(&mut self) {
        self.elapsed = self.elapsed.wrapping_add(1);
        if self.elapsed >= self.quantum {
            self.elapsed = 0;
            self.raise(SCHEDULER_CODE);
        }
    }

    /// Take the pending code if interrupts are enabled, clearing IE.
    /// Called by the CPU at each step boundary; at most one interrupt is
    /// delivered per boundary.
    pub(crate) fn take_deliverable(&mut self) -> Option<u8> {
        if !self.ie {
            return None;
        }
        let code = self.pending.take()?;
        // Delivery clears the enable flag outright; a deferred EI from the
        // instruction before the boundary does not survive it.
        self.ie = false;
        self.ei_deferred = false;
        Some(code)
    }

    /// EI retired: enable interrupts after one further instruction.
    pub(crate) fn request_enable(&mut self) {
        self.ei_deferred = true;
    }

    /// DI retired: disable immediately and cancel any deferred enable.
    pub(crate) fn disable(&mut self) {
        self.ie = false;
        self.ei_deferred = false;
    }

    /// True if an EI is waiting to take effect.
    pub(crate) fn has_deferred_enable(&self) -> bool {
        self.ei_deferred
    }

    /// Commit a deferred EI. A DI retired in between cancels it.
    pub(crate) fn commit_enable(&mut self) {
        if self.ei_deferred {
            self.ie = true;
            self.ei_deferred = false;
        }
    }

    #[must_use]
    pub fn interrupts_enabled(&self) -> bool {
        self.ie
    }

    /// Force the interrupt-enable flag (context switch and snapshot restore).
    pub fn set_interrupts_enabled(&mut self, enabled: bool) {
        self.ie = enabled;
        self.ei_deferred = false;
    }

    #[must_use]
    pub fn pending(&self) -> Option<u8> {
        self.pending
    }

    #[must_use]
    pub fn quantum(&self) -> u8 {
        self.quantum
    }

    /// Set the scheduler quantum, clamped to 1..=255.
    pub fn set_quantum(&mut self, quantum: u8) {
        self.quantum = quantum.max(1);
    }

    /// Reset the scheduler-elapsed counter (after a context switch).
    pub fn reset_elapsed(&mut self) {
        self.elapsed = 0;
    }

    /// Ticks since the last scheduler interrupt or context switch.
    #[must_use]
    pub fn elapsed(&self) -> u8 {
        self.elapsed
    }

    /// Force the scheduler-elapsed counter (snapshot restore).
    pub fn set_elapsed(&mut self, elapsed: u8) {
        self.elapsed = elapsed;
    }

    #[must_use]
    pub fn buffer_base(&self) -> u16 {
        self.buffer_base
    }

    pub fn set_buffer_base(&mut self, address: u16) {
        self.buffer_base = address;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_codes_are_dropped() {
        let mut gate = InterruptGate::new();
        assert!(!gate.raise(8));
        assert_eq!(gate.pending(), None);
        assert!(gate.raise(7));
        assert_eq!(gate.pending(), Some(7));
    }

    #[test]
    fn pending_is_latched_while_disabled() {
        let mut gate = InterruptGate::new();
        gate.raise(3);
        assert_eq!(gate.take_deliverable(), None, "IE clear: latched, not delivered");
        gate.set_interrupts_enabled(true);
        assert_eq!(gate.take_deliverable(), Some(3));
        assert!(!gate.interrupts_enabled(), "delivery clears IE");
        assert_eq!(gate.take_deliverable(), None, "one delivery per code");
    }

    #[test]
    fn scheduler_fires_at_quantum() {
        let mut gate = InterruptGate::new();
        gate.set_quantum(3);
        gate.dispatch_scheduler();
        gate.dispatch_scheduler();
        assert_eq!(gate.pending(), None);
        gate.dispatch_scheduler();
        assert_eq!(gate.pending(), Some(SCHEDULER_CODE));
    }

    #[test]
    fn quantum_clamps_to_at_least_one() {
        let mut gate = InterruptGate::new();
        gate.set_quantum(0);
        assert_eq!(gate.quantum(), 1);
    }

    #[test]
    fn di_cancels_deferred_ei() {
        let mut gate = InterruptGate::new();
        gate.request_enable();
        gate.disable();
        gate.commit_enable();
        assert!(!gate.interrupts_enabled());
    }
}
