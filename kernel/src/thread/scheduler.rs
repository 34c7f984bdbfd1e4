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

//! The ready queue, sleep queue and context-switch driver.
//!
//! The low-level register/stack switch is an external collaborator: trap entry and the
//! exact mechanics of switching kernel stacks are out of scope here. This module only
//! decides *who* runs next and *when* to ask for a switch, through [`ContextSwitch`].

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::fixed_point::Fixed;
use crate::memory::page_table::PageDirectory;
use crate::sync::IntMutex;
use crate::thread::{Thread, ThreadState, TIME_SLICE};

/// Which discipline governs `priority()`/preemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
    /// Priority scheduling with donation.
    Priority,
    /// Multi-level feedback queue accounting, selected by `-o mlfqs`.
    Mlfq,
}

/// Performs the low-level register/stack switch between two threads.
///
/// Implemented by the embedding kernel; on real hardware this saves/restores
/// callee-saved registers and swaps the active kernel stack.
pub trait ContextSwitch: Send + Sync {
    fn switch(&self, prev: &Arc<Thread>, next: &Arc<Thread>);
}

/// Reclaims a thread's kernel-stack page once it is safe to do so: after the scheduler
/// has switched away from it for the last time, and only once it is no longer the
/// initial boot thread.
pub trait ThreadReclaimer: Send + Sync {
    fn reclaim(&self, thread: Arc<Thread>);
}

/// The ready queue, sleep queue, and scheduling policy for a single CPU.
pub struct Scheduler {
    policy: SchedulerPolicy,
    ready: IntMutex<Vec<Arc<Thread>>>,
    sleeping: IntMutex<Vec<Arc<Thread>>>,
    all_threads: IntMutex<Vec<Arc<Thread>>>,
    current: IntMutex<Arc<Thread>>,
    idle: Arc<Thread>,
    initial_id: crate::thread::ThreadId,
    ticks: AtomicU64,
    in_interrupt: AtomicBool,
    need_yield: AtomicBool,
    load_avg: IntMutex<Fixed>,
    context_switch: Arc<dyn ContextSwitch>,
    reclaimer: IntMutex<Option<Arc<dyn ThreadReclaimer>>>,
}

impl Scheduler {
    /// Builds a scheduler with `initial` already running and `idle` available as the
    /// fallback when the ready queue is empty.
    pub fn new(
        policy: SchedulerPolicy,
        idle: Arc<Thread>,
        initial: Arc<Thread>,
        context_switch: Arc<dyn ContextSwitch>,
    ) -> Scheduler {
        let initial_id = initial.id();
        Scheduler {
            policy,
            ready: IntMutex::new(Vec::new()),
            sleeping: IntMutex::new(Vec::new()),
            all_threads: IntMutex::new(alloc::vec![idle.clone(), initial.clone()]),
            current: IntMutex::new(initial),
            idle,
            initial_id,
            ticks: AtomicU64::new(0),
            in_interrupt: AtomicBool::new(false),
            need_yield: AtomicBool::new(false),
            load_avg: IntMutex::new(Fixed::ZERO),
            context_switch,
            reclaimer: IntMutex::new(None),
        }
    }

    /// Installs the hook used to free a thread's kernel stack page after its final
    /// context switch.
    pub fn set_reclaimer(&self, reclaimer: Arc<dyn ThreadReclaimer>) {
        *self.reclaimer.lock() = Some(reclaimer);
    }

    pub fn policy(&self) -> SchedulerPolicy {
        self.policy
    }

    pub fn current_thread(&self) -> Arc<Thread> {
        self.current.lock().clone()
    }

    /// Sets the current thread's base priority and checks for preemption.
    ///
    /// A no-op under MLFQ, where priority is entirely derived from `recent_cpu` and
    /// `nice` by the periodic recompute in [`crate::thread::mlfq`] rather than settable
    /// directly.
    pub fn set_priority(&self, new_priority: i32) {
        if self.policy == SchedulerPolicy::Mlfq {
            return;
        }
        self.current_thread().set_base_priority(new_priority);
        self.check_preemption();
    }

    pub(crate) fn idle_thread(&self) -> &Arc<Thread> {
        &self.idle
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.lock().len()
    }

    pub(crate) fn all_threads_snapshot(&self) -> Vec<Arc<Thread>> {
        self.all_threads.lock().clone()
    }

    pub(crate) fn load_avg(&self) -> Fixed {
        *self.load_avg.lock()
    }

    pub(crate) fn set_load_avg(&self, value: Fixed) {
        *self.load_avg.lock() = value;
    }

    /// Creates a new thread, inserts it into the ready queue, and checks whether it
    /// should preempt the currently running thread: a higher-priority child runs
    /// immediately, before control ever returns to the thread that spawned it.
    pub fn spawn(
        &self,
        name: &str,
        priority: i32,
        address_space: Option<Arc<dyn PageDirectory>>,
    ) -> Arc<Thread> {
        let thread = Thread::new(name, priority, address_space);
        thread.set_state(ThreadState::Ready);
        self.all_threads.lock().push(thread.clone());
        self.ready_insert(thread.clone());
        self.check_preemption();
        thread
    }

    /// Inserts `thread` into the ready queue, keeping it sorted by strictly decreasing
    /// effective priority.
    pub(crate) fn ready_insert(&self, thread: Arc<Thread>) {
        let mut ready = self.ready.lock();
        let priority = thread.priority();
        let pos = ready
            .iter()
            .position(|t| t.priority() < priority)
            .unwrap_or(ready.len());
        ready.insert(pos, thread);
    }

    /// Re-sorts the ready queue, used after MLFQ recomputes every thread's priority.
    pub(crate) fn resort_ready(&self) {
        let mut ready = self.ready.lock();
        ready.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    fn pop_next(&self) -> Arc<Thread> {
        let mut ready = self.ready.lock();
        if ready.is_empty() {
            self.idle.clone()
        } else {
            ready.remove(0)
        }
    }

    /// Marks `thread` ready and inserts it into the ready queue, then checks for
    /// preemption.
    pub fn unblock(&self, thread: &Arc<Thread>) {
        thread.set_state(ThreadState::Ready);
        self.ready_insert(thread.clone());
        self.check_preemption();
    }

    /// Blocks `thread` (already marked [`ThreadState::Blocked`] by the caller) and
    /// switches to the next runnable thread.
    pub fn block(&self, thread: &Arc<Thread>) {
        debug_assert_eq!(thread.state(), ThreadState::Blocked);
        self.schedule();
    }

    /// Disables interrupts, records `wake_tick`, links onto the sleep queue, and
    /// blocks.
    pub fn sleep(&self, wake_tick: u64) {
        let me = self.current_thread();
        debug_assert!(!Arc::ptr_eq(&me, &self.idle), "the idle thread must never sleep");
        me.set_wake_tick(Some(wake_tick));
        me.set_state(ThreadState::Blocked);
        self.sleeping.lock().push(me.clone());
        self.block(&me);
    }

    fn wake_sleepers(&self, now: u64) {
        let woken: Vec<Arc<Thread>> = {
            let mut sleeping = self.sleeping.lock();
            let mut remaining = Vec::with_capacity(sleeping.len());
            let mut woken = Vec::new();
            for t in sleeping.drain(..) {
                if t.wake_tick().is_some_and(|w| w <= now) {
                    woken.push(t);
                } else {
                    remaining.push(t);
                }
            }
            *sleeping = remaining;
            woken
        };
        for t in woken {
            t.set_wake_tick(None);
            self.unblock(&t);
        }
    }

    /// Yields the CPU voluntarily, re-entering the ready queue at the running thread's
    /// current priority.
    pub fn yield_now(&self) {
        self.schedule();
    }

    /// Marks the current thread Dying and switches away from it for the last time.
    pub fn die(&self) -> ! {
        self.current_thread().set_state(ThreadState::Dying);
        self.schedule();
        unreachable!("a Dying thread must never be rescheduled")
    }

    /// Checks whether the head of the ready queue outranks the running thread, and
    /// either requests a yield on interrupt return or yields immediately.
    pub fn check_preemption(&self) {
        let should_yield = {
            let ready = self.ready.lock();
            ready
                .first()
                .is_some_and(|candidate| candidate.priority() > self.current_thread().priority())
        };
        if !should_yield {
            return;
        }
        if self.in_interrupt.load(Ordering::SeqCst) {
            self.need_yield.store(true, Ordering::SeqCst);
        } else {
            self.yield_now();
        }
    }

    /// Drives one timer tick: sleep-queue wakeups, MLFQ accounting, time-slice
    /// preemption, and a final check for a higher-priority ready thread.
    pub fn tick(&self) {
        self.in_interrupt.store(true, Ordering::SeqCst);
        let now = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;

        self.wake_sleepers(now);

        if self.policy == SchedulerPolicy::Mlfq {
            crate::thread::mlfq::on_tick(self, now);
        }

        let current = self.current_thread();
        if !Arc::ptr_eq(&current, &self.idle) && current.tick_slice() >= TIME_SLICE {
            self.need_yield.store(true, Ordering::SeqCst);
        }

        self.check_preemption();
        self.in_interrupt.store(false, Ordering::SeqCst);

        if self.need_yield.swap(false, Ordering::SeqCst) {
            self.yield_now();
        }
    }

    /// Performs the actual switch: pick the next thread, update state, activate its
    /// address space, and hand off to [`ContextSwitch`].
    fn schedule(&self) {
        let prev = self.current_thread();
        let next = self.pop_next();
        if Arc::ptr_eq(&prev, &next) {
            if prev.state() != ThreadState::Blocked && prev.state() != ThreadState::Dying {
                prev.set_state(ThreadState::Running);
            }
            return;
        }

        if prev.state() == ThreadState::Running {
            prev.set_state(ThreadState::Ready);
            self.ready_insert(prev.clone());
        }

        next.check_magic();
        next.set_state(ThreadState::Running);
        next.reset_slice();
        *self.current.lock() = next.clone();

        if let Some(dir) = next.address_space() {
            dir.activate();
        }
        self.context_switch.switch(&prev, &next);

        if prev.state() == ThreadState::Dying && prev.id() != self.initial_id {
            self.all_threads.lock().retain(|t| t.id() != prev.id());
            if let Some(reclaimer) = self.reclaimer.lock().clone() {
                reclaimer.reclaim(prev);
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::thread::{ThreadState, PRI_DEFAULT, PRI_MIN};

    pub struct NoopContextSwitch;

    impl ContextSwitch for NoopContextSwitch {
        fn switch(&self, _prev: &Arc<Thread>, _next: &Arc<Thread>) {}
    }

    /// Builds a scheduler with a running "main" thread and an idle thread, ready for
    /// unit tests that don't need a real register-level context switch.
    pub fn test_scheduler() -> (Scheduler, Arc<NoopContextSwitch>) {
        let cs = Arc::new(NoopContextSwitch);
        let idle = Thread::new("idle", PRI_MIN, None);
        let initial = Thread::new("main", PRI_DEFAULT, None);
        initial.set_state(ThreadState::Running);
        let scheduler = Scheduler::new(SchedulerPolicy::Priority, idle, initial, cs.clone());
        (scheduler, cs)
    }

    #[test]
    fn spawned_higher_priority_thread_preempts() {
        let (scheduler, _cs) = test_scheduler();
        let child = scheduler.spawn("child", PRI_DEFAULT + 5, None);
        // check_preemption saw a higher-priority ready thread and yielded immediately
        // (not in interrupt context), so the child must now be running.
        assert_eq!(scheduler.current_thread().id(), child.id());
    }

    #[test]
    fn ready_queue_orders_by_decreasing_priority() {
        let (scheduler, _cs) = test_scheduler();
        scheduler.current_thread().set_state(ThreadState::Ready);
        scheduler.ready_insert(scheduler.current_thread());
        let a = Thread::new("a", 20, None);
        let b = Thread::new("b", 40, None);
        scheduler.ready_insert(a.clone());
        scheduler.ready_insert(b.clone());
        assert_eq!(scheduler.pop_next().id(), b.id());
    }

    #[test]
    fn sleeping_thread_wakes_at_deadline() {
        let (scheduler, _cs) = test_scheduler();
        let main = scheduler.current_thread();
        let worker = scheduler.spawn("worker", PRI_DEFAULT, None);
        // Re-take the CPU back from `worker` so `main` can put itself to sleep.
        worker.set_state(ThreadState::Ready);
        scheduler.ready_insert(worker.clone());
        *scheduler.current.lock() = main.clone();
        main.set_state(ThreadState::Running);

        scheduler.sleep(10);
        assert_eq!(main.state(), ThreadState::Ready);

        for _ in 0..10 {
            scheduler.tick();
        }
        assert_ne!(main.state(), ThreadState::Blocked);
    }
}
