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

//! The supplemental page table: per-process, keyed by page-aligned user virtual
//! address, it records how to materialize a page that is not currently resident and
//! drives the page-fault handler.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::block::BlockDevice;
use crate::errno::{EResult, Errno};
use crate::file::FileHandle;
use crate::memory::frame::{FrameOwner, FrameTable};
use crate::memory::page_table::{PageDirectory, PhysAddr, PhysicalAllocator, PhysicalMemory, VirtAddr};
use crate::memory::PAGE_SIZE;
use crate::swap::{SwapSlot, SwapTable};
use crate::sync::IntMutex;

/// How a page not currently resident should be materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Read-only (or copy-never-written) executable content, reloadable from `file` on
    /// any fault as long as it was never dirtied.
    Binary,
    /// A memory-mapped file page, written back to `file` on eviction or unmap if dirty.
    File,
    /// A page with no file backing: a freshly grown stack page, or a binary page that
    /// was written to and had to be swapped rather than discarded.
    Anonymous,
}

/// A user address above or equal to this lies in kernel space.
pub const KERNEL_BASE: usize = 0xc000_0000;

/// Maximum size the user stack is allowed to grow to: 8 MiB downward from
/// [`KERNEL_BASE`].
pub const MAX_STACK_SIZE: usize = 8 * 1024 * 1024;

/// How far below the current stack pointer a fault may still legitimately be a stack
/// access: the `PUSHA` instruction writes up to 32 bytes below `esp` before it is
/// itself retired.
const STACK_FAULT_SLACK: usize = 32;

struct EntryState {
    kind: PageKind,
    loaded: bool,
    swap_slot: Option<SwapSlot>,
}

/// One page-aligned virtual page's worth of supplemental metadata.
pub struct SptEntry {
    addr: VirtAddr,
    writable: bool,
    file: Option<Arc<dyn FileHandle>>,
    offset: u64,
    read_bytes: usize,
    zero_bytes: usize,
    dir: Arc<dyn PageDirectory>,
    mem: Arc<dyn PhysicalMemory>,
    swap: Arc<SwapTable>,
    swap_device: Arc<dyn BlockDevice>,
    file_lock: Arc<IntMutex<()>>,
    state: IntMutex<EntryState>,
}

impl SptEntry {
    /// The page-aligned virtual address this entry covers.
    pub fn addr(&self) -> VirtAddr {
        self.addr
    }

    /// Whether the page is currently resident in a physical frame.
    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    /// The current page type, which can change from `Binary` to `Anonymous` the first
    /// time a binary page is dirtied and evicted.
    pub fn kind(&self) -> PageKind {
        self.state.lock().kind
    }

    /// Writes this page back to its backing file if it is a loaded, dirty `File` page.
    ///
    /// Used by `munmap` and process exit rather than full eviction: the frame is left
    /// mapped and resident, only its dirty bit's consequence is flushed.
    pub fn flush_if_dirty(&self) {
        let state = self.state.lock();
        if state.kind != PageKind::File || !state.loaded {
            return;
        }
        if !self.dir.is_dirty(self.addr) {
            return;
        }
        let Some(phys) = self.dir.translate(self.addr) else {
            return;
        };
        let mut buf = vec![0u8; self.read_bytes];
        self.mem.read(phys, &mut buf);
        let _guard = self.file_lock.lock();
        if let Some(file) = &self.file {
            file.write_at(&buf, self.offset);
        }
        drop(_guard);
        self.dir.set_dirty(self.addr, false);
    }
}

impl FrameOwner for SptEntry {
    fn mapping(&self) -> (VirtAddr, Arc<dyn PageDirectory>) {
        (self.addr, self.dir.clone())
    }

    /// Disposes of this entry's frame according to its page kind, then marks the entry
    /// unloaded so the next fault reconstructs it.
    fn evict(&self, phys: PhysAddr, dirty: bool) {
        let mut state = self.state.lock();
        match state.kind {
            PageKind::Binary => {
                if dirty {
                    let mut buf = vec![0u8; PAGE_SIZE];
                    self.mem.read(phys, &mut buf);
                    state.swap_slot = Some(self.swap.swap_out(&*self.swap_device, &buf));
                    state.kind = PageKind::Anonymous;
                    self.dir.set_dirty(self.addr, false);
                }
                // Clean binary pages are simply discarded; they reload from the
                // executable on the next fault.
            }
            PageKind::File => {
                if dirty {
                    let mut buf = vec![0u8; self.read_bytes];
                    self.mem.read(phys, &mut buf);
                    let _guard = self.file_lock.lock();
                    if let Some(file) = &self.file {
                        file.write_at(&buf, self.offset);
                    }
                    drop(_guard);
                    self.dir.set_dirty(self.addr, false);
                }
            }
            PageKind::Anonymous => {
                let mut buf = vec![0u8; PAGE_SIZE];
                self.mem.read(phys, &mut buf);
                state.swap_slot = Some(self.swap.swap_out(&*self.swap_device, &buf));
            }
        }
        state.loaded = false;
    }
}

/// The outcome of handling a page fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The page was loaded (or was already loaded); the faulting instruction may retry.
    Handled,
    /// No entry existed and the address does not qualify as stack growth, or loading
    /// failed (e.g. a short file read): the process must be terminated with status -1.
    Terminate,
}

/// Per-process table of supplemental page metadata, keyed by page-aligned address.
pub struct SupplementalPageTable {
    entries: IntMutex<BTreeMap<VirtAddr, Arc<SptEntry>>>,
    dir: Arc<dyn PageDirectory>,
    mem: Arc<dyn PhysicalMemory>,
    swap: Arc<SwapTable>,
    swap_device: Arc<dyn BlockDevice>,
    file_lock: Arc<IntMutex<()>>,
}

impl SupplementalPageTable {
    /// Creates an empty table for a process with address space `dir`.
    pub fn new(
        dir: Arc<dyn PageDirectory>,
        mem: Arc<dyn PhysicalMemory>,
        swap: Arc<SwapTable>,
        swap_device: Arc<dyn BlockDevice>,
        file_lock: Arc<IntMutex<()>>,
    ) -> Self {
        Self {
            entries: IntMutex::new(BTreeMap::new()),
            dir,
            mem,
            swap,
            swap_device,
            file_lock,
        }
    }

    /// Finds the entry covering `addr`, rounding down to the containing page.
    pub fn find(&self, addr: VirtAddr) -> Option<Arc<SptEntry>> {
        let rounded = addr.page_round_down(PAGE_SIZE);
        self.entries.lock().get(&rounded).cloned()
    }

    /// Creates and inserts a new, unloaded entry for `addr`.
    #[allow(clippy::too_many_arguments)]
    pub fn allocate(
        &self,
        kind: PageKind,
        addr: VirtAddr,
        writable: bool,
        offset: u64,
        read_bytes: usize,
        zero_bytes: usize,
        file: Option<Arc<dyn FileHandle>>,
    ) -> Arc<SptEntry> {
        let rounded = addr.page_round_down(PAGE_SIZE);
        let entry = Arc::new(SptEntry {
            addr: rounded,
            writable,
            file,
            offset,
            read_bytes,
            zero_bytes,
            dir: self.dir.clone(),
            mem: self.mem.clone(),
            swap: self.swap.clone(),
            swap_device: self.swap_device.clone(),
            file_lock: self.file_lock.clone(),
            state: IntMutex::new(EntryState {
                kind,
                loaded: false,
                swap_slot: None,
            }),
        });
        self.entries.lock().insert(rounded, entry.clone());
        entry
    }

    /// Removes and tears down the entry for `addr`, if any: frees its frame (if loaded)
    /// and its swap slot (if any).
    pub fn deallocate(&self, frame_table: &FrameTable, allocator: &dyn PhysicalAllocator, addr: VirtAddr) {
        let rounded = addr.page_round_down(PAGE_SIZE);
        let Some(entry) = self.entries.lock().remove(&rounded) else {
            return;
        };
        let mut state = entry.state.lock();
        if state.loaded {
            if let Some(phys) = entry.dir.translate(rounded) {
                entry.dir.unmap(rounded);
                frame_table.free(allocator, phys);
            }
            state.loaded = false;
        }
        if let Some(slot) = state.swap_slot.take() {
            self.swap.discard(slot);
        }
    }

    /// Tears down every remaining entry, freeing its frame and/or swap slot.
    ///
    /// Used on process exit once every mmap has already been unmapped; any entry still
    /// present here is a binary segment or a stack/anonymous page the process never
    /// explicitly released.
    pub fn clear(&self, frame_table: &FrameTable, allocator: &dyn PhysicalAllocator) {
        let addrs: Vec<VirtAddr> = self.entries.lock().keys().copied().collect();
        for addr in addrs {
            self.deallocate(frame_table, allocator, addr);
        }
    }

    /// Loads `entry` into a fresh physical frame if it is not already resident.
    ///
    /// Fails with [`Errno::Efault`] if a Binary/File read came back short: a truncated
    /// executable or backing file makes the mapping unusable, not just this one page.
    pub fn load_entry(
        &self,
        entry: &Arc<SptEntry>,
        frame_table: &FrameTable,
        allocator: &dyn PhysicalAllocator,
    ) -> EResult<()> {
        if entry.is_loaded() {
            return Ok(());
        }

        let owner: Arc<dyn FrameOwner> = entry.clone();
        let phys = frame_table.alloc(allocator, owner);
        frame_table.pin(phys);

        let kind = entry.state.lock().kind;
        let ok = match kind {
            PageKind::Binary | PageKind::File => {
                let mut buf = vec![0u8; PAGE_SIZE];
                let read = if let Some(file) = &entry.file {
                    let _guard = self.file_lock.lock();
                    file.read_at(&mut buf[..entry.read_bytes], entry.offset)
                } else {
                    0
                };
                for b in &mut buf[entry.read_bytes..entry.read_bytes + entry.zero_bytes] {
                    *b = 0;
                }
                self.mem.write(phys, &buf);
                read == entry.read_bytes
            }
            PageKind::Anonymous => {
                let slot = entry.state.lock().swap_slot;
                let mut buf = vec![0u8; PAGE_SIZE];
                let ok = match slot {
                    Some(slot) => self.swap.swap_in(&*self.swap_device, slot, &mut buf),
                    None => true,
                };
                self.mem.write(phys, &buf);
                ok
            }
        };

        let result = ok && self.dir.map(entry.addr, phys, entry.writable).is_ok();
        frame_table.unpin(phys);

        if result {
            let mut state = entry.state.lock();
            state.loaded = true;
            state.swap_slot = None;
            Ok(())
        } else {
            frame_table.free(allocator, phys);
            Err(Errno::Efault)
        }
    }

    /// Handles a page fault at `fault_addr`, with `esp` the user stack pointer recorded
    /// at fault time.
    pub fn handle_fault(
        &self,
        frame_table: &FrameTable,
        allocator: &dyn PhysicalAllocator,
        fault_addr: VirtAddr,
        esp: VirtAddr,
    ) -> FaultOutcome {
        if let Some(entry) = self.find(fault_addr) {
            return if self.load_entry(&entry, frame_table, allocator).is_ok() {
                FaultOutcome::Handled
            } else {
                FaultOutcome::Terminate
            };
        }

        if self.is_stack_growth(fault_addr, esp) {
            let entry = self.allocate(PageKind::Anonymous, fault_addr, true, 0, 0, 0, None);
            return if self.load_entry(&entry, frame_table, allocator).is_ok() {
                FaultOutcome::Handled
            } else {
                FaultOutcome::Terminate
            };
        }

        FaultOutcome::Terminate
    }

    fn is_stack_growth(&self, fault_addr: VirtAddr, esp: VirtAddr) -> bool {
        if fault_addr.0 >= KERNEL_BASE {
            return false;
        }
        if fault_addr.0 + STACK_FAULT_SLACK < esp.0 {
            return false;
        }
        fault_addr.0 >= KERNEL_BASE.saturating_sub(MAX_STACK_SIZE)
    }
}
