//! Demand pager: per-process page tables, FIFO replacement, swap slots.
//!
//! Guest addresses split into a 6-bit virtual page number and a 10-bit
//! offset. Each address space has 64 entries; all spaces share one pool of
//! physical frames. When no frame is free, the oldest mapping in strict
//! insertion order is evicted, writing its page back to a per-page swap
//! slot first if it is dirty. A page with no swap slot is zero-filled on
//! load, so anything a guest ever wrote is either in a frame or in swap.

use std::collections::VecDeque;

use crate::memory::MemoryError;

/// Bytes per page (and per physical frame).
pub const PAGE_SIZE: usize = 1024;

/// Virtual pages per 64 KiB guest address space.
pub const PAGES_PER_SPACE: usize = 64;

/// Mapping is backed by a physical frame.
pub const PRESENT: u8 = 0b0000_0001;
/// Page may be written.
pub const WRITABLE: u8 = 0b0000_0010;
/// Page belongs to guest (non-supervisor) code.
pub const USER: u8 = 0b0000_0100;
/// Frame holds data not yet written back to swap. Sticky until write-back.
pub const DIRTY: u8 = 0b0000_1000;
/// Page was touched since it was loaded.
pub const ACCESSED: u8 = 0b0001_0000;

/// One page-table entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageEntry {
    /// Physical frame number while present.
    pub frame: u16,
    pub flags: u8,
    /// FIFO insertion index of the current mapping.
    pub stamp: u64,
}

impl PageEntry {
    #[must_use]
    pub const fn present(&self) -> bool {
        self.flags & PRESENT != 0
    }

    #[must_use]
    pub const fn dirty(&self) -> bool {
        self.flags & DIRTY != 0
    }
}

#[derive(Debug)]
struct AddressSpace {
    table: [PageEntry; PAGES_PER_SPACE],
    /// Write-back slots, one per virtual page.
    swap: Vec<Option<Box<[u8]>>>,
    live: bool,
}

impl AddressSpace {
    fn new() -> Self {
        Self {
            table: [PageEntry::default(); PAGES_PER_SPACE],
            swap: (0..PAGES_PER_SPACE).map(|_| None).collect(),
            live: true,
        }
    }
}

/// The pager. Owned by [`Memory`](crate::Memory); never touched by guest
/// code except as a nested, synchronous effect of a memory access.
#[derive(Debug)]
pub struct Pager {
    spaces: Vec<AddressSpace>,
    free_frames: Vec<u16>,
    /// Present mappings in insertion order; front is the eviction victim.
    fifo: VecDeque<(usize, usize)>,
    active: usize,
    frames: usize,
    next_stamp: u64,
    fault_count: u64,
}

impl Pager {
    #[must_use]
    pub fn new(frames: usize) -> Self {
        Self {
            spaces: Vec::new(),
            // Reversed so pop() hands out frame 0 first.
            free_frames: (0..frames as u16).rev().collect(),
            fifo: VecDeque::new(),
            active: 0,
            frames,
            next_stamp: 1,
            fault_count: 0,
        }
    }

    /// Create a new, empty address space and return its id.
    pub fn create_space(&mut self) -> usize {
        self.spaces.push(AddressSpace::new());
        self.spaces.len() - 1
    }

    /// Select the address space used for translated accesses.
    pub fn activate(&mut self, asid: usize) {
        debug_assert!(self.spaces[asid].live, "activating a released space");
        self.active = asid;
    }

    #[must_use]
    pub fn active_space(&self) -> usize {
        self.active
    }

    /// Translate a guest address in the active space, faulting the page in
    /// if needed. Marks the page ACCESSED, and DIRTY on writes.
    pub fn translate(
        &mut self,
        phys: &mut [u8],
        addr: u16,
        write: bool,
    ) -> Result<usize, MemoryError> {
        self.translate_in(phys, self.active, addr, write)
    }

    /// Translate within an explicit address space (image loading into a
    /// space that is not active).
    pub fn translate_in(
        &mut self,
        phys: &mut [u8],
        asid: usize,
        addr: u16,
        write: bool,
    ) -> Result<usize, MemoryError> {
        let vpn = usize::from(addr >> 10);
        let offset = usize::from(addr & 0x3FF);
        if !self.spaces[asid].table[vpn].present() {
            self.fault_in(phys, asid, vpn)?;
        }
        let entry = &mut self.spaces[asid].table[vpn];
        entry.flags |= ACCESSED;
        if write {
            entry.flags |= DIRTY;
        }
        Ok(usize::from(entry.frame) * PAGE_SIZE + offset)
    }

    /// Read without faulting or flag updates: the present frame, else the
    /// swap copy, else zero. Used by the snapshot writer.
    #[must_use]
    pub fn peek(&self, phys: &[u8], asid: usize, addr: u16) -> u8 {
        let vpn = usize::from(addr >> 10);
        let offset = usize::from(addr & 0x3FF);
        let entry = &self.spaces[asid].table[vpn];
        if entry.present() {
            return phys[usize::from(entry.frame) * PAGE_SIZE + offset];
        }
        match &self.spaces[asid].swap[vpn] {
            Some(saved) => saved[offset],
            None => 0,
        }
    }

    fn fault_in(&mut self, phys: &mut [u8], asid: usize, vpn: usize) -> Result<(), MemoryError> {
        self.fault_count += 1;
        let frame = match self.free_frames.pop() {
            Some(frame) => frame,
            None => self.evict(phys),
        };
        tracing::trace!(asid, vpn, frame, "page fault serviced");

        let base = usize::from(frame) * PAGE_SIZE;
        match &self.spaces[asid].swap[vpn] {
            Some(saved) => phys[base..base + PAGE_SIZE].copy_from_slice(saved),
            None => {
                if self.spaces[asid].table[vpn].dirty() {
                    // The entry claims unwritten-back data but the slot is
                    // gone; the supervisor terminates the process.
                    self.free_frames.push(frame);
                    return Err(MemoryError::NoBackingStore { asid, vpn });
                }
                phys[base..base + PAGE_SIZE].fill(0);
            }
        }

        let stamp = self.next_stamp;
        self.next_stamp += 1;
        let entry = &mut self.spaces[asid].table[vpn];
        entry.frame = frame;
        entry.flags = PRESENT | WRITABLE | USER;
        entry.stamp = stamp;
        self.fifo.push_back((asid, vpn));
        Ok(())
    }

    /// Evict the oldest mapping and return its frame.
    fn evict(&mut self, phys: &mut [u8]) -> u16 {
        let (asid, vpn) = self
            .fifo
            .pop_front()
            .expect("no free frames and nothing to evict");
        let entry = self.spaces[asid].table[vpn];
        let base = usize::from(entry.frame) * PAGE_SIZE;
        if entry.dirty() {
            tracing::trace!(asid, vpn, frame = entry.frame, "writing back dirty page");
            let mut saved = vec![0u8; PAGE_SIZE].into_boxed_slice();
            saved.copy_from_slice(&phys[base..base + PAGE_SIZE]);
            self.spaces[asid].swap[vpn] = Some(saved);
        }
        let slot = &mut self.spaces[asid].table[vpn];
        slot.flags &= !(PRESENT | DIRTY | ACCESSED);
        entry.frame
    }

    /// Release an address space: free its frames, drop its swap slots, and
    /// purge its FIFO entries.
    pub fn release(&mut self, asid: usize) {
        for vpn in 0..PAGES_PER_SPACE {
            if self.spaces[asid].table[vpn].present() {
                self.free_frames.push(self.spaces[asid].table[vpn].frame);
            }
        }
        self.spaces[asid].table = [PageEntry::default(); PAGES_PER_SPACE];
        for slot in &mut self.spaces[asid].swap {
            *slot = None;
        }
        self.spaces[asid].live = false;
        self.fifo.retain(|&(a, _)| a != asid);
    }

    /// Page-table entry for inspection.
    #[must_use]
    pub fn entry(&self, asid: usize, vpn: usize) -> PageEntry {
        self.spaces[asid].table[vpn]
    }

    /// Total physical frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Present mappings across all address spaces.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.spaces
            .iter()
            .map(|space| space.table.iter().filter(|e| e.present()).count())
            .sum()
    }

    /// Page faults serviced since creation.
    #[must_use]
    pub fn fault_count(&self) -> u64 {
        self.fault_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pager_with_space(frames: usize) -> (Pager, Vec<u8>) {
        let mut pager = Pager::new(frames);
        pager.create_space();
        (pager, vec![0u8; frames * PAGE_SIZE])
    }

    fn write(pager: &mut Pager, phys: &mut [u8], addr: u16, value: u8) {
        let idx = pager.translate(phys, addr, true).expect("translate");
        phys[idx] = value;
    }

    fn read(pager: &mut Pager, phys: &mut [u8], addr: u16) -> u8 {
        let idx = pager.translate(phys, addr, false).expect("translate");
        phys[idx]
    }

    #[test]
    fn translation_splits_vpn_and_offset() {
        let (mut pager, mut phys) = pager_with_space(4);
        let idx = pager.translate(&mut phys, 0x0403, false).unwrap();
        // Page 1 lands in the first free frame handed out for it.
        let entry = pager.entry(0, 1);
        assert!(entry.present());
        assert_eq!(idx, usize::from(entry.frame) * PAGE_SIZE + 3);
    }

    #[test]
    fn writes_mark_dirty_reads_do_not() {
        let (mut pager, mut phys) = pager_with_space(4);
        read(&mut pager, &mut phys, 0x0000);
        assert!(!pager.entry(0, 0).dirty());
        assert!(pager.entry(0, 0).flags & ACCESSED != 0);
        write(&mut pager, &mut phys, 0x0000, 1);
        assert!(pager.entry(0, 0).dirty());
    }

    #[test]
    fn fifo_eviction_in_insertion_order() {
        // Two frames; touching pages 0, 1, 2 in order must evict page 0.
        let (mut pager, mut phys) = pager_with_space(2);
        write(&mut pager, &mut phys, 0x0000, 0xA0); // page 0
        write(&mut pager, &mut phys, 0x0400, 0xA1); // page 1
        write(&mut pager, &mut phys, 0x0800, 0xA2); // page 2 evicts page 0

        assert!(!pager.entry(0, 0).present(), "page 0 evicted first (FIFO)");
        assert!(pager.entry(0, 1).present());
        assert!(pager.entry(0, 2).present());
        assert_eq!(
            pager.entry(0, 2).frame,
            0,
            "page 2 reuses the frame page 0 held"
        );
    }

    #[test]
    fn refault_restores_written_back_contents() {
        let (mut pager, mut phys) = pager_with_space(2);
        write(&mut pager, &mut phys, 0x0000, 0x55);
        write(&mut pager, &mut phys, 0x0400, 0x66);
        write(&mut pager, &mut phys, 0x0800, 0x77); // evicts dirty page 0

        assert_eq!(read(&mut pager, &mut phys, 0x0000), 0x55, "page 0 refaulted from swap");
        // The refault evicted page 1 in turn; it comes back too.
        assert_eq!(read(&mut pager, &mut phys, 0x0400), 0x66);
    }

    #[test]
    fn eviction_uses_insertion_order_not_recency() {
        let (mut pager, mut phys) = pager_with_space(2);
        write(&mut pager, &mut phys, 0x0000, 1); // page 0
        write(&mut pager, &mut phys, 0x0400, 2); // page 1
        // Touch page 0 again; FIFO must still evict it first.
        read(&mut pager, &mut phys, 0x0000);
        write(&mut pager, &mut phys, 0x0800, 3);
        assert!(!pager.entry(0, 0).present());
        assert!(pager.entry(0, 1).present());
    }

    #[test]
    fn present_never_exceeds_frames() {
        let (mut pager, mut phys) = pager_with_space(3);
        for page in 0..PAGES_PER_SPACE {
            write(&mut pager, &mut phys, (page * PAGE_SIZE) as u16, page as u8);
            assert!(pager.present_count() <= pager.frame_count());
        }
        assert_eq!(pager.present_count(), 3);
    }

    #[test]
    fn fresh_pages_are_zero_filled() {
        let (mut pager, mut phys) = pager_with_space(2);
        phys.fill(0xEE); // dirty physical memory from a previous tenant
        assert_eq!(read(&mut pager, &mut phys, 0x0123), 0);
    }

    #[test]
    fn stamps_are_strictly_increasing() {
        let (mut pager, mut phys) = pager_with_space(4);
        let mut last = 0;
        for page in 0..4u16 {
            write(&mut pager, &mut phys, page * PAGE_SIZE as u16, 0);
            let stamp = pager.entry(0, usize::from(page)).stamp;
            assert!(stamp > last, "insertion order is recorded");
            last = stamp;
        }
    }

    #[test]
    fn spaces_share_the_frame_pool() {
        let mut pager = Pager::new(2);
        let a = pager.create_space();
        let b = pager.create_space();
        let mut phys = vec![0u8; 2 * PAGE_SIZE];

        let idx = pager.translate_in(&mut phys, a, 0x0000, true).unwrap();
        phys[idx] = 0xAA;
        let idx = pager.translate_in(&mut phys, b, 0x0000, true).unwrap();
        phys[idx] = 0xBB;
        // Third mapping evicts space A's page.
        pager.translate_in(&mut phys, b, 0x0400, true).unwrap();

        assert!(!pager.entry(a, 0).present());
        assert!(pager.entry(b, 0).present());
        let idx = pager.translate_in(&mut phys, a, 0x0000, false).unwrap();
        assert_eq!(phys[idx], 0xAA, "space A's page restored from swap");
    }

    #[test]
    fn release_returns_frames_and_purges_fifo() {
        let mut pager = Pager::new(2);
        let a = pager.create_space();
        let b = pager.create_space();
        let mut phys = vec![0u8; 2 * PAGE_SIZE];

        pager.translate_in(&mut phys, a, 0x0000, true).unwrap();
        pager.translate_in(&mut phys, a, 0x0400, true).unwrap();
        pager.release(a);
        assert_eq!(pager.present_count(), 0);

        // Both frames are reusable without evicting anything.
        pager.translate_in(&mut phys, b, 0x0000, true).unwrap();
        pager.translate_in(&mut phys, b, 0x0400, true).unwrap();
        assert_eq!(pager.present_count(), 2);
        assert!(pager.fifo.iter().all(|&(asid, _)| asid == b));
    }

    #[test]
    fn missing_swap_for_dirty_entry_is_reported() {
        let (mut pager, mut phys) = pager_with_space(2);
        // Corrupt state: a non-present entry claiming unwritten-back data.
        pager.spaces[0].table[5].flags = DIRTY;
        let err = pager.translate(&mut phys, 5 * PAGE_SIZE as u16, false).unwrap_err();
        assert!(matches!(err, MemoryError::NoBackingStore { asid: 0, vpn: 5 }));
    }

    #[test]
    fn peek_reads_swap_without_faulting() {
        let (mut pager, mut phys) = pager_with_space(2);
        write(&mut pager, &mut phys, 0x0000, 0x42);
        write(&mut pager, &mut phys, 0x0400, 0x43);
        write(&mut pager, &mut phys, 0x0800, 0x44); // evicts page 0
        let faults = pager.fault_count();
        assert_eq!(pager.peek(&phys, 0, 0x0000), 0x42, "read from swap");
        assert_eq!(pager.peek(&phys, 0, 0x0400), 0x43, "read from frame");
        assert_eq!(pager.peek(&phys, 0, 0x3C00), 0, "untouched page reads zero");
        assert_eq!(pager.fault_count(), faults, "peek never faults");
    }
}
