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

//! A mutex that additionally disables interrupts for the duration of the critical
//! section, for state that interrupt handlers touch directly (the ready queue, the
//! sleep queue, donation lists).
//!
//! On real hardware this wraps `cli`/`sti`; since trap entry is an external
//! collaborator, interrupt masking is delegated to an [`InterruptController`] set once
//! at boot. In hosted test builds the default controller is a no-op, which is sound
//! because the test harness is single-threaded and never delivers a real interrupt
//! mid-section.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use spin::{Mutex, MutexGuard};

/// Something capable of globally masking and restoring interrupts.
///
/// Implemented by the embedding kernel on real hardware. Must nest correctly: a
/// `disable` while interrupts are already disabled must not be undone by the matching
/// `restore` of the inner critical section.
pub trait InterruptController: Sync {
    /// Disables interrupts, returning whether they were enabled beforehand.
    fn disable(&self) -> bool;
    /// Restores the interrupt-enable state returned by a previous [`disable`](Self::disable).
    fn restore(&self, was_enabled: bool);
}

/// Interrupt controller that never actually masks anything.
///
/// Used as the default so the crate remains usable (and testable) without an embedding
/// kernel having registered one yet.
struct NullInterruptController;

impl InterruptController for NullInterruptController {
    fn disable(&self) -> bool {
        false
    }

    fn restore(&self, _was_enabled: bool) {}
}

static CONTROLLER: spin::Once<&'static dyn InterruptController> = spin::Once::new();

/// Installs the interrupt controller used by every [`IntMutex`] in the process.
///
/// Must be called at most once, before any `IntMutex` is locked from more than one
/// context. Subsequent calls are ignored.
pub fn set_interrupt_controller(controller: &'static dyn InterruptController) {
    CONTROLLER.call_once(|| controller);
}

fn controller() -> &'static dyn InterruptController {
    *CONTROLLER.call_once(|| &NullInterruptController)
}

/// A lock that disables interrupts for the duration it is held.
///
/// This is the primitive backing the frame table, swap table, ready queue and sleep
/// queue: code holding one of these locks cannot be preempted by the timer tick that
/// would otherwise try to acquire the very same lock.
pub struct IntMutex<T: ?Sized> {
    inner: Mutex<T>,
}

impl<T> IntMutex<T> {
    /// Creates a new lock wrapping `data`.
    pub const fn new(data: T) -> Self {
        Self {
            inner: Mutex::new(data),
        }
    }
}

impl<T: ?Sized> IntMutex<T> {
    /// Disables interrupts and acquires the lock, returning a guard that restores both
    /// on drop.
    pub fn lock(&self) -> IntMutexGuard<'_, T> {
        let was_enabled = controller().disable();
        let guard = self.inner.lock();
        IntMutexGuard {
            guard: ManuallyDrop::new(guard),
            was_enabled,
        }
    }
}

/// RAII guard for [`IntMutex`].
///
/// Drop order matters here: the inner lock must be released *before* interrupts are
/// restored, otherwise a tick delivered between the two steps could see the lock held
/// with no one left to release it.
pub struct IntMutexGuard<'a, T: ?Sized> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    was_enabled: bool,
}

impl<T: ?Sized> Deref for IntMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: ?Sized> DerefMut for IntMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: ?Sized> Drop for IntMutexGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: `guard` is never accessed again after this point.
        unsafe {
            ManuallyDrop::drop(&mut self.guard);
        }
        controller().restore(self.was_enabled);
    }
}
