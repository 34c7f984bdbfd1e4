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

//! An object meant to be initialized once at boot, then accessed read-only (or through
//! its own interior-mutable locking) for the rest of the kernel's life.
//!
//! Used for the handful of true singletons: the frame table, the swap table, the
//! scheduler. Wraps `spin::Once` so double-initialization is a checked runtime
//! condition rather than an invariant the caller has to uphold by hand.

pub struct Once<T> {
    inner: spin::Once<T>,
}

impl<T> Once<T> {
    /// Creates a new, uninitialized cell.
    pub const fn new() -> Self {
        Self {
            inner: spin::Once::new(),
        }
    }

    /// Initializes the cell by calling `f`, if it has not been initialized already.
    ///
    /// Returns a reference to the value, whether it was just initialized or already was.
    pub fn get_or_init(&self, f: impl FnOnce() -> T) -> &T {
        self.inner.call_once(f)
    }

    /// Returns a reference to the value, or `None` if it has not been initialized yet.
    pub fn get(&self) -> Option<&T> {
        self.inner.get()
    }
}

impl<T> Default for Once<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializes_exactly_once() {
        let cell: Once<u32> = Once::new();
        assert_eq!(cell.get(), None);
        assert_eq!(*cell.get_or_init(|| 42), 42);
        assert_eq!(*cell.get_or_init(|| 7), 42);
    }
}
