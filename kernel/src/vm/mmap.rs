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

//! Memory-mapped files: a process-local registry of file-to-virtual-range mappings,
//! built entirely out of `File`-typed supplemental page table entries.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use alloc::collections::BTreeMap;

use crate::file::FileHandle;
use crate::memory::frame::FrameTable;
use crate::memory::page_table::{PhysicalAllocator, VirtAddr};
use crate::memory::PAGE_SIZE;
use crate::sync::IntMutex;
use crate::vm::spt::{PageKind, SupplementalPageTable, KERNEL_BASE};

/// Process-local identifier for one `mmap` call, monotonically increasing.
pub type MmapId = u32;

/// Why an `mmap` request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmapError {
    /// `addr` was null, not page-aligned, or in kernel space.
    InvalidAddress,
    /// The file being mapped has zero length.
    EmptyFile,
    /// Some page in the requested range already has a supplemental page table entry.
    Overlap,
}

/// One `mmap` call's bookkeeping: which file, where, and which SPT entries it created.
pub struct MmapFile {
    id: MmapId,
    file: Arc<dyn FileHandle>,
    pages: Vec<VirtAddr>,
}

impl MmapFile {
    /// The mapping id this record was assigned.
    pub fn id(&self) -> MmapId {
        self.id
    }

    /// The virtual pages this mapping owns, in file order.
    pub fn pages(&self) -> &[VirtAddr] {
        &self.pages
    }

    /// The reopened file handle backing this mapping.
    pub fn file(&self) -> &Arc<dyn FileHandle> {
        &self.file
    }
}

/// A process's table of active `mmap` regions.
pub struct MmapRegistry {
    next_id: AtomicU32,
    maps: IntMutex<BTreeMap<MmapId, MmapFile>>,
}

impl MmapRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            maps: IntMutex::new(BTreeMap::new()),
        }
    }

    /// Maps `file` into the address space at `addr`.
    ///
    /// Walks the file page-by-page, refusing the whole request if any target page
    /// already has an entry; on success every page becomes a `File`-typed SPT entry with
    /// the appropriate read/zero byte split for a short final page.
    pub fn mmap(
        &self,
        spt: &SupplementalPageTable,
        file: Arc<dyn FileHandle>,
        addr: VirtAddr,
    ) -> Result<MmapId, MmapError> {
        if addr.0 == 0 || addr.0 >= KERNEL_BASE || !addr.is_page_aligned(PAGE_SIZE) {
            return Err(MmapError::InvalidAddress);
        }
        let len = file.len();
        if len == 0 {
            return Err(MmapError::EmptyFile);
        }

        let page_count = ((len as usize) + PAGE_SIZE - 1) / PAGE_SIZE;
        for i in 0..page_count {
            let va = VirtAddr(addr.0 + i * PAGE_SIZE);
            if va.0 >= KERNEL_BASE || spt.find(va).is_some() {
                return Err(MmapError::Overlap);
            }
        }

        let mut pages = Vec::with_capacity(page_count);
        for i in 0..page_count {
            let va = VirtAddr(addr.0 + i * PAGE_SIZE);
            let offset = (i * PAGE_SIZE) as u64;
            let remaining = len - offset;
            let read_bytes = core::cmp::min(PAGE_SIZE as u64, remaining) as usize;
            let zero_bytes = PAGE_SIZE - read_bytes;
            spt.allocate(PageKind::File, va, true, offset, read_bytes, zero_bytes, Some(file.clone()));
            pages.push(va);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.maps.lock().insert(id, MmapFile { id, file, pages });
        Ok(id)
    }

    /// Unmaps `id`, writing back every dirty `File` page before tearing its entry down.
    /// A no-op if `id` is not a currently-mapped region.
    pub fn munmap(
        &self,
        spt: &SupplementalPageTable,
        frame_table: &FrameTable,
        allocator: &dyn PhysicalAllocator,
        id: MmapId,
    ) {
        let Some(record) = self.maps.lock().remove(&id) else {
            return;
        };
        for va in record.pages {
            if let Some(entry) = spt.find(va) {
                entry.flush_if_dirty();
            }
            spt.deallocate(frame_table, allocator, va);
        }
    }

    /// Unmaps every remaining region, used on process exit.
    pub fn munmap_all(
        &self,
        spt: &SupplementalPageTable,
        frame_table: &FrameTable,
        allocator: &dyn PhysicalAllocator,
    ) {
        let ids: Vec<MmapId> = self.maps.lock().keys().copied().collect();
        for id in ids {
            self.munmap(spt, frame_table, allocator, id);
        }
    }
}

impl Default for MmapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::tests::MemoryBlockDevice;
    use crate::block::SECTORS_PER_PAGE;
    use crate::file::tests::MemoryFile;
    use crate::memory::page_table::tests::{FakeDirectory, FakeMemory};
    use crate::memory::page_table::PhysicalMemory;
    use crate::swap::SwapTable;

    struct CountingAllocator {
        next: core::sync::atomic::AtomicUsize,
    }

    impl CountingAllocator {
        fn new() -> Self {
            Self {
                next: core::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    impl PhysicalAllocator for CountingAllocator {
        fn alloc_page(&self) -> Option<crate::memory::page_table::PhysAddr> {
            let i = self.next.fetch_add(1, core::sync::atomic::Ordering::SeqCst);
            Some(crate::memory::page_table::PhysAddr(i * PAGE_SIZE))
        }

        fn free_page(&self, _addr: crate::memory::page_table::PhysAddr) {}
    }

    fn harness() -> (SupplementalPageTable, FrameTable, CountingAllocator, Arc<FakeDirectory>, Arc<FakeMemory>) {
        let dir = Arc::new(FakeDirectory::new());
        let mem = Arc::new(FakeMemory::new(64 * PAGE_SIZE));
        let device = Arc::new(MemoryBlockDevice::new(8 * SECTORS_PER_PAGE));
        let swap = Arc::new(SwapTable::new(&*device));
        let file_lock = Arc::new(IntMutex::new(()));
        let spt = SupplementalPageTable::new(dir.clone(), mem.clone(), swap, device, file_lock);
        (spt, FrameTable::new(), CountingAllocator::new(), dir, mem)
    }

    #[test]
    fn mmap_creates_one_entry_per_page_with_short_last_page() {
        let (spt, _frame_table, _alloc, _dir, _mem) = harness();
        let registry = MmapRegistry::new();
        let file: Arc<dyn FileHandle> = Arc::new(MemoryFile::new(alloc::vec![1u8; PAGE_SIZE + 100]));

        let id = registry.mmap(&spt, file, VirtAddr(0x1000)).unwrap();
        let maps = registry.maps.lock();
        let record = maps.get(&id).unwrap();
        assert_eq!(record.pages.len(), 2);
        assert!(spt.find(VirtAddr(0x1000)).is_some());
        assert!(spt.find(VirtAddr(0x1000 + PAGE_SIZE)).is_some());
    }

    #[test]
    fn mmap_rejects_unaligned_address() {
        let (spt, _frame_table, _alloc, _dir, _mem) = harness();
        let registry = MmapRegistry::new();
        let file: Arc<dyn FileHandle> = Arc::new(MemoryFile::new(alloc::vec![1u8; 10]));
        assert_eq!(
            registry.mmap(&spt, file, VirtAddr(0x1001)),
            Err(MmapError::InvalidAddress)
        );
    }

    #[test]
    fn mmap_rejects_empty_file() {
        let (spt, _frame_table, _alloc, _dir, _mem) = harness();
        let registry = MmapRegistry::new();
        let file: Arc<dyn FileHandle> = Arc::new(MemoryFile::new(Vec::new()));
        assert_eq!(registry.mmap(&spt, file, VirtAddr(0x1000)), Err(MmapError::EmptyFile));
    }

    #[test]
    fn mmap_rejects_overlap_with_existing_entry() {
        let (spt, _frame_table, _alloc, _dir, _mem) = harness();
        let registry = MmapRegistry::new();
        spt.allocate(PageKind::Anonymous, VirtAddr(0x1000), true, 0, 0, 0, None);

        let file: Arc<dyn FileHandle> = Arc::new(MemoryFile::new(alloc::vec![1u8; 10]));
        assert_eq!(registry.mmap(&spt, file, VirtAddr(0x1000)), Err(MmapError::Overlap));
    }

    #[test]
    fn munmap_writes_back_dirty_page_and_removes_entries() {
        let (spt, frame_table, alloc_, dir, mem) = harness();
        let registry = MmapRegistry::new();
        let file: Arc<dyn FileHandle> = Arc::new(MemoryFile::new(alloc::vec![0u8; 10]));

        let id = registry.mmap(&spt, file.clone(), VirtAddr(0x2000)).unwrap();
        let entry = spt.find(VirtAddr(0x2000)).unwrap();
        spt.load_entry(&entry, &frame_table, &alloc_).unwrap();

        // Simulate a write through the mapping: put distinct bytes in the resident
        // frame and mark the hardware dirty bit, since the supplemental page table
        // never inspects page contents directly.
        let phys = dir.translate(VirtAddr(0x2000)).unwrap();
        let mut page = alloc::vec![0u8; PAGE_SIZE];
        page[..10].copy_from_slice(&[0xBBu8; 10]);
        mem.write(phys, &page);
        dir.set_dirty(VirtAddr(0x2000), true);

        registry.munmap(&spt, &frame_table, &alloc_, id);
        assert!(spt.find(VirtAddr(0x2000)).is_none());

        let mut readback = [0u8; 10];
        file.read_at(&mut readback, 0);
        assert_eq!(readback, [0xBBu8; 10], "munmap must write the dirty page back to its file");
    }
}
