/*
 * This file is part of a small educational kernel core.
 *
 * This program is free software: you can redistribute it and/or modify it
 * under the terms of the GNU General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
 *
 * This program is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General
 * Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along
 * with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! The global physical frame table: one entry per frame currently backing a user page,
//! reclaimed by a clock (second-chance) hand when the physical allocator runs dry.
//!
//! The table never decides *how* to write a page back; that decision belongs to whoever
//! owns the page (a supplemental page table entry), reached through [`FrameOwner`]. This
//! keeps frame reclamation independent of the page-type bookkeeping in `vm::spt`.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::memory::page_table::{PageDirectory, PhysAddr, PhysicalAllocator, VirtAddr};
use crate::sync::IntMutex;

/// The owner of a page currently resident in a physical frame.
///
/// Implemented by a supplemental page table entry. The frame table calls back into this
/// trait only when it has already decided, via the clock hand, that this particular
/// frame is the one being reclaimed.
pub trait FrameOwner: Send + Sync {
    /// The virtual address this owner's page is mapped at, and the address space it is
    /// mapped in.
    fn mapping(&self) -> (VirtAddr, Arc<dyn PageDirectory>);

    /// Called once the frame table has decided to reclaim this owner's frame.
    ///
    /// `dirty` reflects the hardware dirty bit observed at eviction time. The owner is
    /// responsible for writing the page back (to swap, or to its backing file) as its
    /// page type requires, and for updating its own bookkeeping so the next fault loads
    /// the page back in. The frame table has already cleared the hardware mapping and
    /// will free the physical page immediately after this call returns.
    fn evict(&self, phys: PhysAddr, dirty: bool);
}

/// A single resident physical frame and the owner it is lent to.
pub struct Frame {
    phys: PhysAddr,
    owner: Arc<dyn FrameOwner>,
    /// Pinned frames (held during I/O so eviction cannot select them) are skipped by
    /// the clock hand entirely.
    pinned: bool,
}

impl Frame {
    /// The physical address this frame occupies.
    pub fn phys_addr(&self) -> PhysAddr {
        self.phys
    }
}

struct Slot {
    frame: Frame,
}

/// The global frame table.
///
/// Every method that inspects or mutates the table takes the `frame_lock` (the
/// outermost lock in this crate's locking hierarchy) for its own duration; callers must
/// not already hold it.
pub struct FrameTable {
    state: IntMutex<State>,
}

struct State {
    slots: Vec<Option<Slot>>,
    /// Index of the clock hand, pointing at the next candidate to examine.
    hand: usize,
}

impl FrameTable {
    /// Creates an empty frame table.
    pub const fn new() -> Self {
        Self {
            state: IntMutex::new(State {
                slots: Vec::new(),
                hand: 0,
            }),
        }
    }

    /// Allocates a physical frame for `owner`, evicting another frame if the physical
    /// allocator is exhausted.
    ///
    /// Mirrors the original `frame_allocate`: request a page, and if none is free, run
    /// the clock algorithm until one is freed, then retry. The loop always terminates as
    /// long as at least one unpinned frame exists somewhere in the table.
    pub fn alloc(
        &self,
        allocator: &dyn PhysicalAllocator,
        owner: Arc<dyn FrameOwner>,
    ) -> PhysAddr {
        loop {
            if let Some(phys) = allocator.alloc_page() {
                let mut state = self.state.lock();
                state.insert(Frame {
                    phys,
                    owner,
                    pinned: false,
                });
                return phys;
            }
            self.evict_one(allocator);
        }
    }

    /// Releases the frame at `phys`, without running its owner's eviction path.
    ///
    /// Used when a page is torn down deliberately (process exit, munmap) rather than
    /// reclaimed under memory pressure.
    pub fn free(&self, allocator: &dyn PhysicalAllocator, phys: PhysAddr) {
        let mut state = self.state.lock();
        state.remove(phys);
        drop(state);
        allocator.free_page(phys);
    }

    /// Pins the frame at `phys` so the clock hand skips it, for the duration of an I/O
    /// operation that reads or writes through it.
    pub fn pin(&self, phys: PhysAddr) {
        self.state.lock().set_pinned(phys, true);
    }

    /// Reverses [`pin`](Self::pin).
    pub fn unpin(&self, phys: PhysAddr) {
        self.state.lock().set_pinned(phys, false);
    }

    /// Runs one full pass of the clock algorithm, reclaiming exactly one frame.
    ///
    /// Grounded in the original `evict`: the hand advances giving every accessed frame a
    /// second chance (clearing the accessed bit as it passes), and stops at the first
    /// unpinned, unaccessed frame it finds, wrapping around the table as many times as
    /// necessary.
    fn evict_one(&self, allocator: &dyn PhysicalAllocator) {
        let (phys, owner, dirty) = {
            let mut state = self.state.lock();
            let index = state.select_victim();
            let slot = state.slots[index].take().expect("victim index must be occupied");
            let (va, dir) = slot.frame.owner.mapping();
            let dirty = dir.is_dirty(va);
            dir.set_accessed(va, false);
            dir.unmap(va);
            (slot.frame.phys, slot.frame.owner, dirty)
        };
        log::trace!("evicting frame {:?} (dirty={dirty})", phys);
        owner.evict(phys, dirty);
        allocator.free_page(phys);
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn insert(&mut self, frame: Frame) {
        for slot in self.slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(Slot { frame });
                return;
            }
        }
        self.slots.push(Some(Slot { frame }));
    }

    fn remove(&mut self, phys: PhysAddr) {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|s| s.frame.phys == phys))
        {
            *slot = None;
        }
    }

    fn set_pinned(&mut self, phys: PhysAddr, pinned: bool) {
        if let Some(Some(slot)) = self
            .slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|s| s.frame.phys == phys))
        {
            slot.frame.pinned = pinned;
        }
    }

    /// Advances the clock hand until it finds an unpinned frame whose accessed bit was
    /// already clear, clearing the accessed bit of everything it passes over along the
    /// way. Returns that frame's slot index.
    ///
    /// Panics if the table holds no unpinned frame at all: the caller has nowhere left
    /// to turn, matching the original implementation's assumption that eviction is only
    /// invoked when the table is non-empty.
    fn select_victim(&mut self) -> usize {
        if self.slots.is_empty() || self.slots.iter().all(|s| s.is_none()) {
            panic!("frame table eviction requested with no resident frames");
        }
        loop {
            if self.hand >= self.slots.len() {
                self.hand = 0;
            }
            let index = self.hand;
            self.hand += 1;

            let Some(slot) = &self.slots[index] else {
                continue;
            };
            if slot.frame.pinned {
                continue;
            }

            let (va, dir) = slot.frame.owner.mapping();
            if dir.is_accessed(va) {
                dir.set_accessed(va, false);
                continue;
            }
            return index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::page_table::tests::FakeDirectory;
    use crate::memory::page_table::PteFlags;
    use alloc::boxed::Box;
    use alloc::collections::BTreeSet;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use spin::Mutex;

    struct FakeAllocator {
        free_list: Mutex<Vec<PhysAddr>>,
    }

    impl FakeAllocator {
        fn new(pages: usize) -> Self {
            Self {
                free_list: Mutex::new((0..pages).map(|i| PhysAddr(i * 4096)).collect()),
            }
        }
    }

    impl PhysicalAllocator for FakeAllocator {
        fn alloc_page(&self) -> Option<PhysAddr> {
            self.free_list.lock().pop()
        }

        fn free_page(&self, addr: PhysAddr) {
            self.free_list.lock().push(addr);
        }
    }

    struct TestOwner {
        va: VirtAddr,
        dir: Arc<FakeDirectory>,
        evicted: AtomicUsize,
    }

    impl FrameOwner for TestOwner {
        fn mapping(&self) -> (VirtAddr, Arc<dyn PageDirectory>) {
            (self.va, self.dir.clone())
        }

        fn evict(&self, _phys: PhysAddr, _dirty: bool) {
            self.evicted.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn owner(dir: &Arc<FakeDirectory>, va: VirtAddr, phys: PhysAddr) -> Arc<TestOwner> {
        dir.map(va, phys, true).unwrap();
        Arc::new(TestOwner {
            va,
            dir: dir.clone(),
            evicted: AtomicUsize::new(0),
        })
    }

    #[test]
    fn allocates_without_eviction_while_frames_are_free() {
        let table = FrameTable::new();
        let alloc = FakeAllocator::new(2);
        let dir = Arc::new(FakeDirectory::new());

        let o1 = owner(&dir, VirtAddr(0x1000), PhysAddr(4096));
        let phys = table.alloc(&alloc, o1.clone());
        assert_eq!(o1.evicted.load(Ordering::SeqCst), 0);
        let _ = phys;
    }

    #[test]
    fn evicts_unaccessed_frame_first() {
        let table = FrameTable::new();
        let alloc = FakeAllocator::new(1);
        let dir = Arc::new(FakeDirectory::new());

        let o1 = owner(&dir, VirtAddr(0x1000), PhysAddr(0));
        table.alloc(&alloc, o1.clone());

        // Allocator is now exhausted (1 page, already handed out); the next alloc
        // must evict `o1` since it was never marked accessed.
        let o2 = owner(&dir, VirtAddr(0x2000), PhysAddr(0));
        table.alloc(&alloc, o2.clone());

        assert_eq!(o1.evicted.load(Ordering::SeqCst), 1);
        assert_eq!(o2.evicted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn accessed_frame_gets_a_second_chance() {
        let table = FrameTable::new();
        let alloc = FakeAllocator::new(2);
        let dir = Arc::new(FakeDirectory::new());

        let o1 = owner(&dir, VirtAddr(0x1000), PhysAddr(0));
        table.alloc(&alloc, o1.clone());
        let o2 = owner(&dir, VirtAddr(0x2000), PhysAddr(4096));
        table.alloc(&alloc, o2.clone());

        // Mark o1 as accessed so the clock hand must skip it once before reclaiming o2.
        dir.set_accessed(VirtAddr(0x1000), true);

        let o3 = owner(&dir, VirtAddr(0x3000), PhysAddr(0));
        table.alloc(&alloc, o3.clone());

        assert_eq!(o1.evicted.load(Ordering::SeqCst), 0);
        assert_eq!(o2.evicted.load(Ordering::SeqCst), 1);
        assert!(!dir.is_accessed(VirtAddr(0x1000)), "accessed bit must be cleared on second chance");
    }

    #[test]
    fn pinned_frame_is_never_selected() {
        let table = FrameTable::new();
        let alloc = FakeAllocator::new(1);
        let dir = Arc::new(FakeDirectory::new());

        let o1 = owner(&dir, VirtAddr(0x1000), PhysAddr(0));
        let phys = table.alloc(&alloc, o1.clone());
        table.pin(phys);

        let o2 = owner(&dir, VirtAddr(0x2000), PhysAddr(0));
        // There is exactly one frame and it is pinned: eviction has nowhere to go.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            table.alloc(&alloc, o2.clone());
        }));
        assert!(result.is_err());
    }

    #[test]
    fn free_releases_without_invoking_eviction() {
        let table = FrameTable::new();
        let alloc = FakeAllocator::new(1);
        let dir = Arc::new(FakeDirectory::new());

        let o1 = owner(&dir, VirtAddr(0x1000), PhysAddr(0));
        let phys = table.alloc(&alloc, o1.clone());
        table.free(&alloc, phys);

        assert_eq!(o1.evicted.load(Ordering::SeqCst), 0);
        let reused: BTreeSet<_> = [phys].into_iter().collect();
        assert!(reused.contains(&alloc.alloc_page().unwrap()));
    }

    // Silence unused-import warnings in targets that don't exercise Box-based owners.
    #[allow(dead_code)]
    fn _use_box(_b: Box<dyn FrameOwner>) {}
}
