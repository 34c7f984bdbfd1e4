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

//! Synchronization primitives.
//!
//! The locking hierarchy is: `frame_lock` > `file_lock` > `swap_lock` > `tid_lock`.
//! Per-thread donation state and the sleep queue are protected by disabling interrupts
//! rather than a lock, modeled here by [`IntMutex`].

pub mod mutex;
pub mod once;

pub use mutex::IntMutex;
pub use once::Once;
