//! Paged guest memory substrate.
//!
//! `Memory` owns the physical backing array and the [`Pager`]; the CPU
//! borrows it per step through [`sv_core::Bus`]. Translated accesses fault
//! pages in transparently. Translation failures never reach guest code:
//! the bus records them and the host loop routes them to the supervisor
//! between instructions.

use sv_core::Bus;
use thiserror::Error;

use crate::pager::{Pager, PAGE_SIZE};

/// Errors from the memory substrate and pager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// A raw physical access beyond the backing store. Fatal to the host.
    #[error("physical address {addr:#x} out of range (backing store is {size:#x} bytes)")]
    AddressOutOfRange { addr: usize, size: usize },

    /// A page that must be reloaded has no swap slot. Terminates the
    /// owning process.
    #[error("page {vpn} of address space {asid} has no backing store")]
    NoBackingStore { asid: usize, vpn: usize },
}

/// Byte-addressable store: a physical backing array plus the
/// virtual-to-physical mapper.
#[derive(Debug)]
pub struct Memory {
    phys: Vec<u8>,
    pager: Pager,
    /// Fault recorded during a bus access, consumed by the host loop.
    last_fault: Option<MemoryError>,
}

impl Memory {
    /// Create a store with `phys_size` bytes of physical memory and one
    /// initial address space (id 0), active.
    ///
    /// # Panics
    ///
    /// Panics if `phys_size` is zero or not a multiple of the page size.
    #[must_use]
    pub fn new(phys_size: usize) -> Self {
        assert!(
            phys_size >= PAGE_SIZE && phys_size % PAGE_SIZE == 0,
            "physical size must be a positive multiple of {PAGE_SIZE} bytes, got {phys_size}"
        );
        let mut pager = Pager::new(phys_size / PAGE_SIZE);
        pager.create_space();
        Self {
            phys: vec![0; phys_size],
            pager,
            last_fault: None,
        }
    }

    /// Create a new address space and return its id.
    pub fn create_space(&mut self) -> usize {
        self.pager.create_space()
    }

    /// Select the address space for translated accesses.
    pub fn activate(&mut self, asid: usize) {
        self.pager.activate(asid);
    }

    #[must_use]
    pub fn active_space(&self) -> usize {
        self.pager.active_space()
    }

    /// Release an address space, returning its frames to the pool.
    pub fn release_space(&mut self, asid: usize) {
        self.pager.release(asid);
    }

    /// Raw read from the physical backing array, no translation.
    pub fn physical_read(&self, index: usize) -> Result<u8, MemoryError> {
        self.phys.get(index).copied().ok_or(MemoryError::AddressOutOfRange {
            addr: index,
            size: self.phys.len(),
        })
    }

    /// Raw write to the physical backing array, no translation.
    pub fn physical_write(&mut self, index: usize, value: u8) -> Result<(), MemoryError> {
        let size = self.phys.len();
        match self.phys.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(MemoryError::AddressOutOfRange { addr: index, size }),
        }
    }

    /// Read a guest address without faulting or page-flag updates.
    #[must_use]
    pub fn peek(&self, addr: u16) -> u8 {
        self.pager.peek(&self.phys, self.pager.active_space(), addr)
    }

    /// [`peek`](Self::peek) in an explicit address space.
    #[must_use]
    pub fn peek_in(&self, asid: usize, addr: u16) -> u8 {
        self.pager.peek(&self.phys, asid, addr)
    }

    /// Copy `bytes` into an address space at `offset`, faulting pages in
    /// as needed. Used by the image loader.
    pub fn load_into(&mut self, asid: usize, offset: u16, bytes: &[u8]) -> Result<(), MemoryError> {
        for (i, &byte) in bytes.iter().enumerate() {
            let addr = offset.wrapping_add(i as u16);
            let idx = self.pager.translate_in(&mut self.phys, asid, addr, true)?;
            self.phys[idx] = byte;
        }
        Ok(())
    }

    /// Take the fault recorded during the last bus access, if any.
    pub fn take_fault(&mut self) -> Option<MemoryError> {
        self.last_fault.take()
    }

    #[must_use]
    pub fn pager(&self) -> &Pager {
        &self.pager
    }
}

impl Bus for Memory {
    fn read(&mut self, addr: u16) -> u8 {
        match self.pager.translate(&mut self.phys, addr, false) {
            Ok(idx) => self.phys[idx],
            Err(err) => {
                self.last_fault = Some(err);
                0
            }
        }
    }

    fn write(&mut self, addr: u16, value: u8) {
        match self.pager.translate(&mut self.phys, addr, true) {
            Ok(idx) => self.phys[idx] = value,
            Err(err) => self.last_fault = Some(err),
        }
    }
}
