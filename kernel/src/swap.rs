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

//! Swap storage for anonymous and evicted binary pages: a bitmap of free/used slots
//! over a [`BlockDevice`], one slot per page.
//!
//! Grounded directly in the original `swap_in`/`swap_out`: a single `swap_lock` (third
//! in this crate's locking hierarchy) serializes every access, and a slot is freed the
//! instant it is read back in rather than lazily.

use alloc::vec;
use alloc::vec::Vec;

use crate::block::{BlockDevice, SECTORS_PER_PAGE, SECTOR_SIZE};
use crate::memory::PAGE_SIZE;
use crate::sync::IntMutex;

/// Identifies one page-sized slot on the swap device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(usize);

/// Bitmap-backed allocator of page-sized slots on a swap block device.
pub struct SwapTable {
    used: IntMutex<Vec<bool>>,
}

impl SwapTable {
    /// Builds a swap table sized to fit exactly as many page slots as `device` has room
    /// for, rounding down (a trailing partial page's worth of sectors is unusable).
    pub fn new(device: &dyn BlockDevice) -> Self {
        let slot_count = device.sector_count() / SECTORS_PER_PAGE;
        Self {
            used: IntMutex::new(vec![false; slot_count]),
        }
    }

    /// Writes one page of data to a freshly allocated swap slot, returning its identity.
    ///
    /// `page` must be exactly [`PAGE_SIZE`] bytes. Panics if every slot is in use: swap
    /// exhaustion is treated as a fatal kernel condition, matching the original's
    /// `PANIC ("No available swap slots!")`.
    pub fn swap_out(&self, device: &dyn BlockDevice, page: &[u8]) -> SwapSlot {
        assert_eq!(page.len(), PAGE_SIZE);
        let mut used = self.used.lock();
        let Some(index) = used.iter().position(|&taken| !taken) else {
            log::warn!("swap device exhausted, {} slots all in use", used.len());
            panic!("no available swap slots");
        };
        used[index] = true;
        drop(used);

        let start = index * SECTORS_PER_PAGE;
        for i in 0..SECTORS_PER_PAGE {
            let chunk = &page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            device.write_sector(start + i, chunk);
        }
        log::trace!("swap_out: slot {index}");
        SwapSlot(index)
    }

    /// Reads the page stored in `slot` back into `page` and frees the slot.
    ///
    /// `page` must be exactly [`PAGE_SIZE`] bytes. Returns `false` if `slot` was not
    /// actually in use, matching the original's bounds/occupancy check in `swap_in`.
    pub fn swap_in(&self, device: &dyn BlockDevice, slot: SwapSlot, page: &mut [u8]) -> bool {
        assert_eq!(page.len(), PAGE_SIZE);
        let mut used = self.used.lock();
        match used.get(slot.0) {
            Some(true) => {}
            _ => return false,
        };

        let start = slot.0 * SECTORS_PER_PAGE;
        for i in 0..SECTORS_PER_PAGE {
            let chunk = &mut page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            device.read_sector(start + i, chunk);
        }
        used[slot.0] = false;
        true
    }

    /// Frees `slot` without reading it back, used when the owning page is discarded
    /// outright (e.g. process exit) rather than faulted back in.
    pub fn discard(&self, slot: SwapSlot) {
        let mut used = self.used.lock();
        if let Some(taken) = used.get_mut(slot.0) {
            *taken = false;
        }
    }
}
