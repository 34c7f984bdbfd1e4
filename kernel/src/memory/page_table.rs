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

//! The hardware page table is an external collaborator: this crate never walks page
//! directory entries itself, it only asks a [`PageDirectory`] implementation to do so.
//! This keeps the frame table and supplemental page table portable across
//! architectures, and host-testable via [`page_table::tests::FakeDirectory`].

use bitflags::bitflags;

use crate::errno::AllocResult;

/// A physical address, page-aligned when naming a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub usize);

/// A user virtual address, page-aligned when naming a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    /// Rounds down to the containing page boundary.
    pub const fn page_round_down(self, page_size: usize) -> VirtAddr {
        VirtAddr(self.0 - (self.0 % page_size))
    }

    /// Whether this address is already page-aligned.
    pub const fn is_page_aligned(self, page_size: usize) -> bool {
        self.0 % page_size == 0
    }
}

bitflags! {
    /// Hardware page table entry flags relevant to the core: the "accessed"/"dirty"
    /// bits drive clock eviction and write-back decisions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        const ACCESSED = 1 << 3;
        const DIRTY    = 1 << 4;
    }
}

/// A process's page directory, as seen by the virtual memory core.
///
/// Every method takes `&self` because, on real hardware, a page directory is a
/// per-process singleton shared by every subsystem touching that process's address
/// space; implementations are expected to guard their own internal mutability.
pub trait PageDirectory: Send + Sync {
    /// Installs a mapping from `va` to `pa`, creating intermediate page-table levels as
    /// needed.
    fn map(&self, va: VirtAddr, pa: PhysAddr, writable: bool) -> AllocResult<()>;

    /// Removes the mapping for `va`, if any. A no-op if unmapped.
    fn unmap(&self, va: VirtAddr);

    /// Returns the physical address `va` is mapped to, if present.
    fn translate(&self, va: VirtAddr) -> Option<PhysAddr>;

    /// Whether `va` currently has a present mapping.
    fn is_present(&self, va: VirtAddr) -> bool {
        self.translate(va).is_some()
    }

    /// Reads the hardware accessed bit for `va`'s mapping.
    fn is_accessed(&self, va: VirtAddr) -> bool;

    /// Sets (or clears) the hardware accessed bit for `va`'s mapping.
    fn set_accessed(&self, va: VirtAddr, value: bool);

    /// Reads the hardware dirty bit for `va`'s mapping.
    fn is_dirty(&self, va: VirtAddr) -> bool;

    /// Sets (or clears) the hardware dirty bit for `va`'s mapping.
    fn set_dirty(&self, va: VirtAddr, value: bool);

    /// Activates this address space on the current CPU (used on context switch).
    fn activate(&self);
}

/// The physical page allocator backing frame allocation.
///
/// This is the kernel's general-purpose physical memory allocator (e.g. a buddy
/// allocator); it is out of scope for this crate beyond this narrow interface.
pub trait PhysicalAllocator: Send + Sync {
    /// Returns a fresh, zeroed physical page, or `None` if the pool is exhausted.
    fn alloc_page(&self) -> Option<PhysAddr>;

    /// Returns a page previously handed out by [`alloc_page`](Self::alloc_page).
    fn free_page(&self, addr: PhysAddr);
}

/// A window onto physical memory, used to read or write a frame's contents directly
/// (eviction write-back, lazy load, swap in/out) without going through any virtual
/// mapping.
///
/// On real hardware the kernel maps all of physical memory at a fixed offset; this trait
/// is that direct map, narrowed to the byte-copy operations the core actually needs.
pub trait PhysicalMemory: Send + Sync {
    /// Copies exactly `buf.len()` bytes starting at `addr` into `buf`.
    fn read(&self, addr: PhysAddr, buf: &mut [u8]);

    /// Copies exactly `buf.len()` bytes from `buf` to physical memory starting at `addr`.
    fn write(&self, addr: PhysAddr, buf: &[u8]);
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use spin::Mutex;

    /// A page directory entirely in memory, for unit tests.
    #[derive(Default)]
    pub struct FakeDirectory {
        entries: Mutex<BTreeMap<usize, (PhysAddr, PteFlags)>>,
    }

    impl FakeDirectory {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl PageDirectory for FakeDirectory {
        fn map(&self, va: VirtAddr, pa: PhysAddr, writable: bool) -> AllocResult<()> {
            let mut flags = PteFlags::PRESENT | PteFlags::USER;
            if writable {
                flags |= PteFlags::WRITABLE;
            }
            self.entries.lock().insert(va.0, (pa, flags));
            Ok(())
        }

        fn unmap(&self, va: VirtAddr) {
            self.entries.lock().remove(&va.0);
        }

        fn translate(&self, va: VirtAddr) -> Option<PhysAddr> {
            self.entries.lock().get(&va.0).map(|(pa, _)| *pa)
        }

        fn is_accessed(&self, va: VirtAddr) -> bool {
            self.entries
                .lock()
                .get(&va.0)
                .is_some_and(|(_, f)| f.contains(PteFlags::ACCESSED))
        }

        fn set_accessed(&self, va: VirtAddr, value: bool) {
            if let Some((_, f)) = self.entries.lock().get_mut(&va.0) {
                f.set(PteFlags::ACCESSED, value);
            }
        }

        fn is_dirty(&self, va: VirtAddr) -> bool {
            self.entries
                .lock()
                .get(&va.0)
                .is_some_and(|(_, f)| f.contains(PteFlags::DIRTY))
        }

        fn set_dirty(&self, va: VirtAddr, value: bool) {
            if let Some((_, f)) = self.entries.lock().get_mut(&va.0) {
                f.set(PteFlags::DIRTY, value);
            }
        }

        fn activate(&self) {}
    }

    /// Physical memory backed by a plain byte vector, for unit tests.
    pub struct FakeMemory {
        bytes: Mutex<Vec<u8>>,
    }

    impl FakeMemory {
        pub fn new(size: usize) -> Self {
            Self {
                bytes: Mutex::new(alloc::vec![0u8; size]),
            }
        }
    }

    impl super::PhysicalMemory for FakeMemory {
        fn read(&self, addr: PhysAddr, buf: &mut [u8]) {
            let bytes = self.bytes.lock();
            buf.copy_from_slice(&bytes[addr.0..addr.0 + buf.len()]);
        }

        fn write(&self, addr: PhysAddr, buf: &[u8]) {
            let mut bytes = self.bytes.lock();
            bytes[addr.0..addr.0 + buf.len()].copy_from_slice(buf);
        }
    }

    #[test]
    fn map_then_translate() {
        let dir = FakeDirectory::new();
        dir.map(VirtAddr(0x1000), PhysAddr(0x2000), true).unwrap();
        assert_eq!(dir.translate(VirtAddr(0x1000)), Some(PhysAddr(0x2000)));
        assert!(dir.is_present(VirtAddr(0x1000)));
        dir.unmap(VirtAddr(0x1000));
        assert!(!dir.is_present(VirtAddr(0x1000)));
    }

    #[test]
    fn accessed_bit_round_trips() {
        let dir = FakeDirectory::new();
        dir.map(VirtAddr(0x3000), PhysAddr(0x4000), false).unwrap();
        assert!(!dir.is_accessed(VirtAddr(0x3000)));
        dir.set_accessed(VirtAddr(0x3000), true);
        assert!(dir.is_accessed(VirtAddr(0x3000)));
    }
}
