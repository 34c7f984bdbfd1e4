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

//! Process lifecycle glue: the load/wait/exit handshake between a parent and its
//! children, and the per-process bookkeeping (file descriptors, mmaps, SPT) that `exit`
//! must tear down.
//!
//! A process's identity is its main thread's [`ThreadId`] (the original kernel's `pid`
//! *is* the tid of the thread running the process). Parent/child linkage is an
//! arena-allocated record with non-owning back-references: a process owns strong
//! references to its children, but only a [`Weak`] reference back to its parent, so the
//! two can never keep each other alive past `exit`.

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::file::FileHandle;
use crate::memory::frame::FrameTable;
use crate::memory::page_table::PhysicalAllocator;
use crate::thread::semaphore::Semaphore;
use crate::thread::scheduler::Scheduler;
use crate::thread::{Thread, ThreadId};
use crate::sync::IntMutex;
use crate::vm::mmap::MmapRegistry;
use crate::vm::spt::SupplementalPageTable;

/// A process's identity: its main thread's id.
pub type Pid = ThreadId;

/// The lowest file descriptor a process may be assigned; 0 and 1 are the well-known
/// stdin/stdout descriptors, handled entirely by the syscall layer and never entered
/// into this table.
pub const FIRST_FD: u32 = 2;

/// Reports a process's termination the way the kernel's console driver would (the
/// literal `"<name>: exit(<status>)\n"` message). Console output is an external
/// collaborator, so this is a narrow seam rather than a `println!` call baked into
/// this crate.
pub trait ExitReporter: Send + Sync {
    fn report_exit(&self, name: &str, status: i32);
}

struct LoadState {
    success: bool,
}

/// A process: a user thread plus the lifecycle and memory bookkeeping layered on top of
/// it.
pub struct Process {
    id: Pid,
    thread: Arc<Thread>,
    parent: Option<Weak<Process>>,
    children: IntMutex<Vec<Arc<Process>>>,
    exit_status: IntMutex<i32>,
    load: IntMutex<LoadState>,
    sema_load: Semaphore,
    sema_wait: Semaphore,
    sema_exit: Semaphore,
    next_fd: AtomicU32,
    fds: IntMutex<BTreeMap<u32, Arc<dyn FileHandle>>>,
    spt: Option<SupplementalPageTable>,
    mmaps: MmapRegistry,
}

impl Process {
    /// Creates a process wrapping `thread`, optionally linked to `parent`. `wait` and
    /// `exec` only ever operate on direct parent/child pairs.
    ///
    /// `spt` is `None` for a process without virtual memory (e.g. a kernel thread that
    /// never touches user-space paging); every real user process supplies one.
    pub fn new(
        thread: Arc<Thread>,
        parent: Option<Arc<Process>>,
        spt: Option<SupplementalPageTable>,
    ) -> Arc<Process> {
        let id = thread.id();
        let weak_parent = parent.as_ref().map(Arc::downgrade);
        let process = Arc::new(Process {
            id,
            thread,
            parent: weak_parent,
            children: IntMutex::new(Vec::new()),
            exit_status: IntMutex::new(0),
            load: IntMutex::new(LoadState { success: false }),
            sema_load: Semaphore::new(0),
            sema_wait: Semaphore::new(0),
            sema_exit: Semaphore::new(0),
            next_fd: AtomicU32::new(FIRST_FD),
            fds: IntMutex::new(BTreeMap::new()),
            spt,
            mmaps: MmapRegistry::new(),
        });
        if let Some(parent) = parent {
            parent.children.lock().push(process.clone());
        }
        process
    }

    pub fn id(&self) -> Pid {
        self.id
    }

    pub fn thread(&self) -> &Arc<Thread> {
        &self.thread
    }

    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// The supplemental page table backing this process's address space, if it has one.
    pub fn spt(&self) -> Option<&SupplementalPageTable> {
        self.spt.as_ref()
    }

    /// This process's memory-mapped-file registry.
    pub fn mmaps(&self) -> &MmapRegistry {
        &self.mmaps
    }

    /// Whether `pid` names a still-unreaped direct child.
    pub fn has_child(&self, pid: Pid) -> bool {
        self.children.lock().iter().any(|c| c.id == pid)
    }

    // --- file descriptor table -------------------------------------------------

    /// Installs `file` at a freshly allocated descriptor, returning it.
    pub fn install_fd(&self, file: Arc<dyn FileHandle>) -> u32 {
        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        self.fds.lock().insert(fd, file);
        fd
    }

    /// The file handle installed at `fd`, if any.
    pub fn fd(&self, fd: u32) -> Option<Arc<dyn FileHandle>> {
        self.fds.lock().get(&fd).cloned()
    }

    /// Closes `fd`, returning whether it was actually open.
    pub fn close_fd(&self, fd: u32) -> bool {
        self.fds.lock().remove(&fd).is_some()
    }

    // --- load handshake (the `load` semaphore) ----------------------------------

    /// Posted by the child once `exec`'s load either succeeds or fails.
    pub fn notify_load_result(&self, scheduler: &Scheduler, success: bool) {
        self.load.lock().success = success;
        self.sema_load.up(scheduler);
    }

    /// Waits for the child to post its load result, then reports whether it succeeded.
    /// Called by the parent from `exec`.
    pub fn wait_for_load(&self, scheduler: &Scheduler) -> bool {
        self.sema_load.down(scheduler);
        self.load.lock().success
    }

    // --- wait handshake (`wait(pid)`) ---------------------------------------------

    /// `wait(pid)`: returns -1 if `pid` is not a direct child or was already waited on
    /// (it will have been unlinked from `children` by a previous call), otherwise blocks
    /// until the child exits and returns its exit status.
    pub fn wait(self: &Arc<Self>, scheduler: &Scheduler, pid: Pid) -> i32 {
        let child = {
            let children = self.children.lock();
            children.iter().find(|c| c.id == pid).cloned()
        };
        let Some(child) = child else {
            return -1;
        };

        child.sema_wait.down(scheduler);
        let status = *child.exit_status.lock();
        child.sema_exit.up(scheduler);
        self.children.lock().retain(|c| c.id != pid);
        status
    }

    // --- exit ------------------------------------------------------------------

    /// `exit(status)`: reports the standard termination message, tears down this
    /// process's file descriptors, mmaps and supplemental page table, then runs the
    /// wait/exit semaphore handshake with the parent (and releases any orphaned
    /// children to reap themselves) before handing off to the scheduler for the final
    /// context switch away from this thread.
    ///
    /// Never returns: the underlying thread is marked Dying and its kernel stack is
    /// reclaimed once the scheduler switches away from it for the last time.
    pub fn exit(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        frame_table: &FrameTable,
        allocator: &dyn PhysicalAllocator,
        reporter: &dyn ExitReporter,
        status: i32,
    ) -> ! {
        reporter.report_exit(self.thread.name(), status);
        log::info!("process {} ({:?}) exiting with status {status}", self.thread.name(), self.id);
        *self.exit_status.lock() = status;

        self.fds.lock().clear();

        if let Some(spt) = &self.spt {
            self.mmaps.munmap_all(spt, frame_table, allocator);
            spt.clear(frame_table, allocator);
        }

        self.sema_wait.up(scheduler);

        for child in self.children.lock().iter() {
            child.sema_exit.up(scheduler);
        }

        self.sema_exit.down(scheduler);

        scheduler.die()
    }
}

impl PartialEq for Process {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Process {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::scheduler::tests::test_scheduler;
    use crate::thread::{ThreadState, PRI_DEFAULT};

    fn harness() -> (Scheduler, FrameTable) {
        let (scheduler, _cs) = test_scheduler();
        (scheduler, FrameTable::new())
    }

    #[test]
    fn wait_on_non_child_returns_minus_one() {
        let (scheduler, _frame_table) = harness();
        let main_thread = scheduler.current_thread();
        let parent = Process::new(main_thread, None, None);
        assert_eq!(parent.wait(&scheduler, Pid(9999)), -1);
    }

    #[test]
    fn fd_table_starts_at_two_and_round_trips() {
        let (scheduler, _frame_table) = harness();
        let main_thread = scheduler.current_thread();
        let process = Process::new(main_thread, None, None);
        let file: Arc<dyn FileHandle> = Arc::new(crate::file::tests::MemoryFile::new(alloc::vec![1, 2, 3]));

        let fd = process.install_fd(file);
        assert_eq!(fd, FIRST_FD);
        assert!(process.fd(fd).is_some());
        assert!(process.close_fd(fd));
        assert!(process.fd(fd).is_none());
    }

    #[test]
    fn wait_consumes_posted_status_and_unlinks_child() {
        let (scheduler, _frame_table) = harness();
        let main_thread = scheduler.current_thread();
        let parent = Process::new(main_thread, None, None);

        let child_thread = scheduler.spawn("child", PRI_DEFAULT, None);
        let child = Process::new(child_thread.clone(), Some(parent.clone()), None);
        assert!(parent.has_child(child.id()));

        // Simulate the child's side of `exit` reaching the point where it posts its exit
        // status and blocks on the exit semaphore: a real kernel runs `exit` on the
        // child's own kernel stack and never returns from it, which this harness cannot
        // drive end-to-end without a trap-driven scheduler.
        child_thread.set_state(ThreadState::Dying);
        *child.exit_status.lock() = 7;
        child.sema_wait.up(&scheduler);

        assert_eq!(parent.wait(&scheduler, child.id()), 7);
        assert!(!parent.has_child(child.id()));
        // A second wait on the same (now-unlinked) pid must fail, not re-consume it.
        assert_eq!(parent.wait(&scheduler, child.id()), -1);
    }

    #[test]
    fn load_handshake_reports_failure() {
        let (scheduler, _frame_table) = harness();
        let main_thread = scheduler.current_thread();
        let process = Process::new(main_thread, None, None);
        process.notify_load_result(&scheduler, false);
        assert!(!process.wait_for_load(&scheduler));
    }
}
