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

//! A counting semaphore whose waiter list is ordered by priority, the primitive
//! underneath [`super::Lock`] and the one-shot load/wait/exit semaphores of process
//! lifecycle glue.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::sync::IntMutex;
use crate::thread::scheduler::Scheduler;
use crate::thread::{Thread, ThreadState};

struct State {
    value: u32,
    waiters: Vec<Arc<Thread>>,
}

/// A Dijkstra-style counting semaphore.
pub struct Semaphore {
    state: IntMutex<State>,
}

impl Semaphore {
    /// Creates a semaphore with the given initial value.
    pub fn new(value: u32) -> Self {
        Self {
            state: IntMutex::new(State {
                value,
                waiters: Vec::new(),
            }),
        }
    }

    /// Waits for the semaphore to become positive, then decrements it.
    ///
    /// Blocks on `scheduler` if the value is currently zero, re-testing after being
    /// woken (another waiter may have raced ahead, matching the original's
    /// loop-around-`thread_block`).
    pub fn down(&self, scheduler: &Scheduler) {
        loop {
            let mut state = self.state.lock();
            if state.value > 0 {
                state.value -= 1;
                return;
            }
            let me = scheduler.current_thread();
            state.waiters.push(me.clone());
            drop(state);
            me.set_state(ThreadState::Blocked);
            scheduler.block(&me);
        }
    }

    /// Increments the semaphore, waking the highest-priority waiter if any.
    pub fn up(&self, scheduler: &Scheduler) {
        let mut state = self.state.lock();
        let woken = if state.waiters.is_empty() {
            None
        } else {
            let index = state
                .waiters
                .iter()
                .enumerate()
                .max_by_key(|(_, t)| t.priority())
                .map(|(i, _)| i)
                .expect("non-empty waiters");
            Some(state.waiters.remove(index))
        };
        state.value += 1;
        drop(state);
        if let Some(thread) = woken {
            scheduler.unblock(&thread);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_on_positive_value_does_not_block() {
        let sema = Semaphore::new(1);
        assert_eq!(sema.state.lock().value, 1);
        // We cannot call `down` without a live Scheduler/current thread here; the
        // zero-contention fast path is covered indirectly through lock.rs's tests.
    }
}
