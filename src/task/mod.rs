//! Process descriptors and the process table
//!
//! Just enough of a process model for the swap engine: a pid, a run state,
//! the address space, and the resident-set counter the victim scan ranks
//! processes by.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use core::sync::atomic::{AtomicU32, Ordering};

use spin::{Mutex, RwLock};

use crate::mm::page_table::PageDir;

/// Process ID type
pub type Pid = i32;

/// Process run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Table slot not in use
    Unused,
    /// Ready to run
    Runnable,
    /// Sleeping/waiting
    Sleeping,
    /// Exited, not yet reaped
    Zombie,
}

/// Per-process descriptor
pub struct Process {
    pub pid: Pid,
    state: Mutex<ProcState>,
    /// The address space; PTEs are mutated only while this lock is held
    pub pgdir: Mutex<PageDir>,
    /// Resident set size: user pages currently backed by RAM
    ///
    /// Atomic so the victim scan can rank processes without taking their
    /// page-table locks.
    rss: AtomicU32,
}

impl Process {
    pub fn new(pid: Pid) -> Arc<Self> {
        Arc::new(Self {
            pid,
            state: Mutex::new(ProcState::Runnable),
            pgdir: Mutex::new(PageDir::new()),
            rss: AtomicU32::new(0),
        })
    }

    pub fn state(&self) -> ProcState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: ProcState) {
        *self.state.lock() = state;
    }

    pub fn rss(&self) -> u32 {
        self.rss.load(Ordering::Relaxed)
    }

    /// A user page of this process gained a frame
    pub fn inc_rss(&self) {
        self.rss.fetch_add(1, Ordering::Relaxed);
    }

    /// A user page of this process lost its frame
    pub fn dec_rss(&self) {
        self.rss.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The table of live processes
pub struct ProcessTable {
    procs: RwLock<BTreeMap<Pid, Arc<Process>>>,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            procs: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn register(&self, proc: Arc<Process>) {
        self.procs.write().insert(proc.pid, proc);
    }

    pub fn unregister(&self, pid: Pid) -> Option<Arc<Process>> {
        self.procs.write().remove(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.procs.read().get(&pid).cloned()
    }

    /// Pick the eviction victim: the live process with the largest
    /// resident set, ties broken toward the smallest pid
    ///
    /// Returns `None` when no process has a resident page - there is
    /// nothing to swap. The scan holds the table lock only; no I/O happens
    /// under it.
    pub fn select_victim(&self) -> Option<Arc<Process>> {
        let procs = self.procs.read();

        let mut victim: Option<(&Arc<Process>, u32)> = None;
        for proc in procs.values() {
            if proc.pid < 1 || proc.state() == ProcState::Unused {
                continue;
            }
            let rss = proc.rss();
            match victim {
                Some((best, best_rss)) if rss < best_rss || (rss == best_rss && proc.pid >= best.pid) => {}
                _ => victim = Some((proc, rss)),
            }
        }

        match victim {
            Some((proc, rss)) if rss > 0 => Some(proc.clone()),
            _ => None,
        }
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
