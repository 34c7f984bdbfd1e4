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

//! Multi-level feedback queue accounting, selected by `-o mlfqs`.
//!
//! All arithmetic here runs in 17.14 fixed point ([`Fixed`]); nothing in this module
//! ever touches a lock's donation list, matching the original's "priority donation is
//! not performed while `thread_mlfqs` is set".

use alloc::sync::Arc;

use crate::fixed_point::Fixed;
use crate::thread::scheduler::Scheduler;
use crate::thread::{Thread, PRI_MAX, PRI_MIN};

/// Timer ticks per second, the cadence at which `load_avg` and every thread's
/// `recent_cpu` are recomputed.
pub const TIMER_FREQ: u64 = 100;

/// Drives one tick's worth of MLFQ bookkeeping: per-tick `recent_cpu` bump for the
/// running thread, per-second load average and `recent_cpu` recompute, and per-4-tick
/// priority recompute.
pub(crate) fn on_tick(scheduler: &Scheduler, now: u64) {
    let current = scheduler.current_thread();
    if !Arc::ptr_eq(&current, scheduler.idle_thread()) {
        current.set_recent_cpu(current.recent_cpu().add_int(1));
    }

    if now % TIMER_FREQ == 0 {
        recompute_load_avg(scheduler);
        log::debug!("mlfq: load_avg now {}", load_avg_x100(scheduler));
        for t in scheduler.all_threads_snapshot() {
            recompute_recent_cpu(scheduler, &t);
        }
    }

    if now % 4 == 0 {
        for t in scheduler.all_threads_snapshot() {
            recompute_priority(&t);
        }
        scheduler.resort_ready();
    }
}

/// `load_avg <- (59/60) * load_avg + (1/60) * ready_threads`, where `ready_threads`
/// counts the running thread too (unless it is idle).
fn recompute_load_avg(scheduler: &Scheduler) {
    let running_counts = !Arc::ptr_eq(&scheduler.current_thread(), scheduler.idle_thread());
    let ready_threads = scheduler.ready_len() + if running_counts { 1 } else { 0 };

    let fifty_nine_sixtieths = Fixed::from_int(59).div(Fixed::from_int(60));
    let one_sixtieth = Fixed::from_int(1).div(Fixed::from_int(60));

    let old = scheduler.load_avg();
    let new = fifty_nine_sixtieths.mul(old) + one_sixtieth.mul_int(ready_threads as i32);
    scheduler.set_load_avg(new);
}

/// `recent_cpu <- (2*load_avg)/(2*load_avg+1) * recent_cpu + nice`.
fn recompute_recent_cpu(scheduler: &Scheduler, thread: &Arc<Thread>) {
    let load_avg = scheduler.load_avg();
    let two_load_avg = load_avg.mul_int(2);
    let coefficient = two_load_avg.div(two_load_avg.add_int(1));
    let new = coefficient.mul(thread.recent_cpu()).add_int(thread.nice());
    thread.set_recent_cpu(new);
}

/// `priority <- PRI_MAX - (recent_cpu / 4) - (nice * 2)`, clamped to the legal range.
fn recompute_priority(thread: &Arc<Thread>) {
    let recent_cpu_term = thread.recent_cpu().div_int(4).to_int_nearest();
    let nice_term = thread.nice() * 2;
    let priority = (PRI_MAX - recent_cpu_term - nice_term).clamp(PRI_MIN, PRI_MAX);
    thread.set_effective_priority_raw(priority);
}

/// `thread_get_load_avg`: the system load average scaled by 100 and rounded, for
/// reporting.
pub fn load_avg_x100(scheduler: &Scheduler) -> i32 {
    scheduler.load_avg().to_percent_rounded()
}

/// `thread_get_recent_cpu`: a thread's `recent_cpu` scaled by 100 and rounded.
pub fn recent_cpu_x100(thread: &Thread) -> i32 {
    thread.recent_cpu().to_percent_rounded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::scheduler::tests::test_scheduler;
    use crate::thread::scheduler::SchedulerPolicy;

    #[test]
    fn idle_system_decays_load_avg_towards_zero() {
        let (scheduler, _cs) = test_scheduler();
        // `test_scheduler` builds a Priority-mode scheduler; MLFQ accounting is driven
        // directly here regardless of which policy selected it.
        assert_eq!(scheduler.policy(), SchedulerPolicy::Priority);
        scheduler.set_load_avg(Fixed::from_int(1));
        recompute_load_avg(&scheduler);
        assert!(scheduler.load_avg().to_int_nearest() <= 1);
    }

    #[test]
    fn recent_cpu_increments_once_per_tick_for_running_thread() {
        let (scheduler, _cs) = test_scheduler();
        let current = scheduler.current_thread();
        assert_eq!(current.recent_cpu(), Fixed::ZERO);
        on_tick(&scheduler, 1);
        assert_eq!(current.recent_cpu(), Fixed::from_int(1));
    }

    #[test]
    fn heavier_recent_cpu_lowers_computed_priority() {
        let idle_thread = Thread::new("idle", PRI_MIN, None);
        let light = Thread::new("light", PRI_MAX, None);
        let heavy = Thread::new("heavy", PRI_MAX, None);
        heavy.set_recent_cpu(Fixed::from_int(40));
        let _ = &idle_thread;
        recompute_priority(&light);
        recompute_priority(&heavy);
        assert!(heavy.priority() < light.priority());
    }
}
