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

//! Per-process virtual memory: the supplemental page table and the memory-mapped-file
//! registry built on top of it.

pub mod mmap;
pub mod spt;

pub use mmap::{MmapError, MmapFile, MmapId, MmapRegistry};
pub use spt::{FaultOutcome, PageKind, SptEntry, SupplementalPageTable};
