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

//! Thread records and the priority/donation state attached to them.
//!
//! A [`Thread`] is an arena-allocated record, owned by its identifier rather than
//! placed at a fixed offset inside a kernel stack page; ownership belongs to the
//! kernel page backing it, freed only once the exit handshake completes. The
//! stack-overflow canary is kept anyway as a defense-in-depth invariant, checked by
//! [`Thread::check_magic`].

pub mod lock;
pub mod mlfq;
pub mod scheduler;
pub mod semaphore;

pub use lock::Lock;
pub use scheduler::{ContextSwitch, Scheduler, SchedulerPolicy, ThreadReclaimer};
pub use semaphore::Semaphore;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::fixed_point::Fixed;
use crate::memory::page_table::PageDirectory;
use crate::sync::IntMutex;

/// Lowest legal priority value.
pub const PRI_MIN: i32 = 0;
/// Priority newly created threads start at outside of MLFQ mode.
pub const PRI_DEFAULT: i32 = 31;
/// Highest legal priority value.
pub const PRI_MAX: i32 = 63;
/// Timer ticks given to a thread before it is forced to yield.
pub const TIME_SLICE: u32 = 4;
/// Maximum number of donation hops walked when a lock is acquired.
pub const MAX_DONATION_DEPTH: usize = 8;
/// Sentinel value guarding the bottom of a thread's kernel stack.
pub const THREAD_MAGIC: u32 = 0xcd6a_bf4b;

/// Identifies a thread for its entire lifetime. Never reused while the kernel runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

static NEXT_TID: AtomicU32 = AtomicU32::new(1);

/// Allocates the next thread identifier. A single atomic increment suffices here; no
/// thread ever needs to hold an id lock across anything more than this one step.
pub fn allocate_tid() -> ThreadId {
    ThreadId(NEXT_TID.fetch_add(1, Ordering::SeqCst))
}

/// A thread's position in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Ready,
    Blocked,
    Dying,
}

struct SchedState {
    status: ThreadState,
    base_priority: i32,
    effective_priority: i32,
    donations: Vec<Arc<Thread>>,
    waiting_lock: Option<Arc<Lock>>,
    wake_tick: Option<u64>,
    slice_ticks: u32,
}

/// A kernel or user thread.
pub struct Thread {
    id: ThreadId,
    name: String,
    sched: IntMutex<SchedState>,
    nice: IntMutex<i32>,
    recent_cpu: IntMutex<Fixed>,
    /// The address space to activate when this thread is scheduled; `None` for kernel
    /// threads, matching the original's `pagedir == NULL` convention for non-user
    /// threads.
    address_space: Option<Arc<dyn PageDirectory>>,
    magic: u32,
}

impl Thread {
    /// Creates a new thread record, ready to be handed to a [`Scheduler`].
    ///
    /// `name` is truncated to 15 characters.
    pub fn new(name: &str, priority: i32, address_space: Option<Arc<dyn PageDirectory>>) -> Arc<Thread> {
        let mut truncated = String::new();
        for c in name.chars().take(15) {
            truncated.push(c);
        }
        Arc::new(Thread {
            id: allocate_tid(),
            name: truncated,
            sched: IntMutex::new(SchedState {
                status: ThreadState::Blocked,
                base_priority: priority,
                effective_priority: priority,
                donations: Vec::new(),
                waiting_lock: None,
                wake_tick: None,
                slice_ticks: 0,
            }),
            nice: IntMutex::new(0),
            recent_cpu: IntMutex::new(Fixed::ZERO),
            address_space,
            magic: THREAD_MAGIC,
        })
    }

    /// This thread's identifier.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// This thread's (truncated) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address space to activate when this thread runs, if it is a user thread.
    pub fn address_space(&self) -> Option<&Arc<dyn PageDirectory>> {
        self.address_space.as_ref()
    }

    /// Panics if the stack-overflow canary has been corrupted.
    pub fn check_magic(&self) {
        assert_eq!(self.magic, THREAD_MAGIC, "thread stack overflow detected");
    }

    pub fn state(&self) -> ThreadState {
        self.sched.lock().status
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.sched.lock().status = state;
    }

    /// The thread's current effective priority: its base priority, raised by any
    /// outstanding donations.
    pub fn priority(&self) -> i32 {
        self.sched.lock().effective_priority
    }

    pub fn base_priority(&self) -> i32 {
        self.sched.lock().base_priority
    }

    /// Sets the base priority and recomputes the effective priority from it.
    ///
    /// Restricted to the crate: callers must go through
    /// [`scheduler::set_priority`](crate::thread::scheduler::set_priority), which
    /// guards this behind the MLFQ-vs-priority policy check and follows up with a
    /// preemption check, rather than calling this directly.
    pub(crate) fn set_base_priority(&self, priority: i32) {
        let mut state = self.sched.lock();
        state.base_priority = priority;
        drop(state);
        self.recalc_effective_priority();
    }

    pub fn nice(&self) -> i32 {
        *self.nice.lock()
    }

    pub fn set_nice(&self, nice: i32) {
        *self.nice.lock() = nice.clamp(-20, 20);
    }

    pub fn recent_cpu(&self) -> Fixed {
        *self.recent_cpu.lock()
    }

    pub fn set_recent_cpu(&self, value: Fixed) {
        *self.recent_cpu.lock() = value;
    }

    /// Directly overrides the effective priority, used by MLFQ's periodic recompute,
    /// which does not go through donation bookkeeping at all.
    pub fn set_effective_priority_raw(&self, priority: i32) {
        self.sched.lock().effective_priority = priority.clamp(PRI_MIN, PRI_MAX);
    }

    pub(crate) fn waiting_lock(&self) -> Option<Arc<Lock>> {
        self.sched.lock().waiting_lock.clone()
    }

    pub(crate) fn set_waiting_lock(&self, lock: Option<Arc<Lock>>) {
        self.sched.lock().waiting_lock = lock;
    }

    /// Raises this thread's effective priority to `donor_priority` if it is currently
    /// lower.
    pub(crate) fn donate(&self, donor_priority: i32) {
        let mut state = self.sched.lock();
        if state.effective_priority < donor_priority {
            state.effective_priority = donor_priority;
        }
    }

    pub(crate) fn add_donation(self: &Arc<Self>, donor: Arc<Thread>) {
        self.sched.lock().donations.push(donor);
    }

    /// Removes from this thread's donation list every donor that was waiting on
    /// `lock`, called when `lock` is released.
    pub(crate) fn clear_donations_for_lock(&self, lock: &Arc<Lock>) {
        let mut state = self.sched.lock();
        state.donations.retain(|donor| {
            !donor
                .waiting_lock()
                .is_some_and(|waiting| Arc::ptr_eq(&waiting, lock))
        });
    }

    /// Recomputes effective priority as `max(base, highest remaining donor's
    /// priority)`.
    pub(crate) fn recalc_effective_priority(&self) {
        let mut state = self.sched.lock();
        let mut new_priority = state.base_priority;
        for donor in &state.donations {
            let p = donor.priority();
            if p > new_priority {
                new_priority = p;
            }
        }
        state.effective_priority = new_priority;
    }

    pub(crate) fn wake_tick(&self) -> Option<u64> {
        self.sched.lock().wake_tick
    }

    pub(crate) fn set_wake_tick(&self, tick: Option<u64>) {
        self.sched.lock().wake_tick = tick;
    }

    pub(crate) fn tick_slice(&self) -> u32 {
        let mut state = self.sched.lock();
        state.slice_ticks += 1;
        state.slice_ticks
    }

    pub(crate) fn reset_slice(&self) {
        self.sched.lock().slice_ticks = 0;
    }
}

impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Thread {}
