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

//! Error taxonomy for the kernel core.
//!
//! User-fault conditions (bad pointer, misaligned mmap, double munmap, ...) are reported
//! through [`Errno`] so the caller can terminate the offending process with status -1;
//! resource exhaustion that can fail gracefully returns [`AllocError`] instead. Resource
//! exhaustion treated as fatal (a full swap device) panics instead of returning either.

use core::fmt;

/// An allocation failure, returned by any fallible-collection operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("allocation failed")
    }
}

#[cfg(test)]
impl std::error::Error for AllocError {}

/// Result type for operations that may only fail by running out of memory.
pub type AllocResult<T> = Result<T, AllocError>;

/// Kernel-core error codes.
///
/// This purposefully only covers the cases this crate's operations can raise; it is not
/// a general POSIX errno table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    /// Invalid argument (bad fd, misaligned address, double munmap, ...).
    Einval = 22,
    /// Out of memory.
    Enomem = 12,
    /// Bad address (null, kernel-space, or unmapped user pointer).
    Efault = 14,
    /// Bad file descriptor.
    Ebadf = 9,
    /// Interrupted while waiting (lock acquire, wait queue, sleeping mutex).
    Eintr = 4,
    /// No child process matching the requested pid, or already waited on.
    Echild = 10,
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Errno::Einval => "invalid argument",
            Errno::Enomem => "out of memory",
            Errno::Efault => "bad address",
            Errno::Ebadf => "bad file descriptor",
            Errno::Eintr => "interrupted",
            Errno::Echild => "no such child",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
impl std::error::Error for Errno {}

/// Result type for operations that may raise a kernel-core [`Errno`].
pub type EResult<T> = Result<T, Errno>;

impl From<AllocError> for Errno {
    fn from(_: AllocError) -> Self {
        Errno::Enomem
    }
}
