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

//! Thread scheduling, virtual memory and memory-mapped files for a small educational
//! kernel.
//!
//! This crate is the CORE described by the project's design document: a preemptive
//! priority scheduler with donation and an MLFQ mode, a supplemental page table backed
//! by a clock-evicted physical frame table and a swap store, and memory-mapped files
//! built on top of both. The syscall dispatcher, trap/interrupt entry, the on-disk
//! filesystem, device drivers, the bootloader and the ELF loader are external
//! collaborators: this crate only ever reaches them through the traits in
//! [`block`], [`file`] and [`memory::page_table`].
//!
//! Building `#[cfg(test)]` pulls in `std` so every invariant has an ordinary, hosted
//! `#[test]` to exercise it; a real kernel binary enables neither `test` nor `std` and
//! gets the `no_std` build, leaning on `alloc` for its collections.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod block;
pub mod config;
pub mod context;
pub mod errno;
pub mod file;
pub mod fixed_point;
pub mod memory;
pub mod process;
pub mod swap;
pub mod sync;
pub mod thread;
pub mod vm;
