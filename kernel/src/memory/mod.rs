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

//! Physical frame ownership and the hardware page-table interface it is evicted
//! through.

pub mod frame;
pub mod page_table;

pub use frame::{Frame, FrameOwner, FrameTable};
pub use page_table::{PageDirectory, PhysAddr, PhysicalAllocator, PteFlags, VirtAddr};

/// Size in bytes of a single page, on every architecture this core targets.
pub const PAGE_SIZE: usize = 4096;
