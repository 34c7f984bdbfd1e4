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

//! The kernel-wide singleton: global mutable state collapsed into one "kernel context"
//! struct, constructed at boot and threaded through rather than scattered across
//! independent `static`s.
//!
//! [`KernelContext`] bundles the frame table, swap table and scheduler behind this
//! crate's locking hierarchy so callers reach them through one value. It does not own
//! any per-process state (the supplemental page table, mmap registry and file
//! descriptor table all live on [`crate::process::Process`]): this is strictly the
//! machine-wide half of the picture.

use alloc::sync::Arc;

use crate::block::BlockDevice;
use crate::memory::frame::FrameTable;
use crate::swap::SwapTable;
use crate::sync::{IntMutex, Once};
use crate::thread::scheduler::{ContextSwitch, Scheduler, SchedulerPolicy};
use crate::thread::Thread;

/// Everything this core needs that exists exactly once for the lifetime of the kernel.
pub struct KernelContext {
    pub frame_table: FrameTable,
    pub swap: Arc<SwapTable>,
    pub swap_device: Arc<dyn BlockDevice>,
    pub scheduler: Scheduler,
    /// Guards the filesystem (`file_lock`, second in this crate's locking hierarchy);
    /// the filesystem implementation itself is an external collaborator, but every path
    /// that reaches into it from this core (lazy loading, mmap write-back) serializes
    /// on this lock first.
    pub file_lock: Arc<IntMutex<()>>,
}

impl KernelContext {
    /// Builds a fresh kernel context. `idle` and `initial` are the idle thread and the
    /// thread calling this constructor (conventionally the boot thread), both already
    /// created by the embedding kernel before virtual memory and scheduling come up.
    pub fn new(
        policy: SchedulerPolicy,
        swap_device: Arc<dyn BlockDevice>,
        context_switch: Arc<dyn ContextSwitch>,
        idle: Arc<Thread>,
        initial: Arc<Thread>,
    ) -> KernelContext {
        let swap = Arc::new(SwapTable::new(&*swap_device));
        KernelContext {
            frame_table: FrameTable::new(),
            swap,
            swap_device,
            scheduler: Scheduler::new(policy, idle, initial, context_switch),
            file_lock: Arc::new(IntMutex::new(())),
        }
    }
}

static KERNEL: Once<KernelContext> = Once::new();

/// Installs the process-wide [`KernelContext`]. Must be called exactly once, during
/// boot, before any code calls [`kernel`].
pub fn init(context: KernelContext) {
    KERNEL.get_or_init(|| context);
}

/// Returns the kernel context installed by [`init`].
///
/// Panics if called before `init`, matching the original's assumption that scheduling
/// and paging never run before boot has finished installing the global tables.
pub fn kernel() -> &'static KernelContext {
    KERNEL.get().expect("kernel context accessed before context::init")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::tests::MemoryBlockDevice;
    use crate::block::SECTORS_PER_PAGE;
    use crate::thread::scheduler::tests::NoopContextSwitch;
    use crate::thread::{ThreadState, PRI_DEFAULT, PRI_MIN};

    #[test]
    fn new_context_starts_with_priority_scheduling_by_default() {
        let device = Arc::new(MemoryBlockDevice::new(4 * SECTORS_PER_PAGE));
        let idle = Thread::new("idle", PRI_MIN, None);
        let initial = Thread::new("main", PRI_DEFAULT, None);
        initial.set_state(ThreadState::Running);
        let context = KernelContext::new(
            SchedulerPolicy::Priority,
            device,
            Arc::new(NoopContextSwitch),
            idle,
            initial,
        );
        assert_eq!(context.scheduler.policy(), SchedulerPolicy::Priority);
    }
}
