//! C9: bringing up the very first process.
//!
//! Grounded on the teacher's `user_init`/`forkret` (`kernel/src/proc.rs`
//! and `kernel/src/main.rs`), which allocate `initproc` before any CPU
//! starts scheduling and defer file-system-dependent setup to the first
//! process's own first return from the scheduler.

use std::sync::Once;

use crate::collab::{self, Inode};
use crate::error::KernelError;
use crate::param::PAGE_SIZE;
use crate::proc::{self, ProcState, PROC_TABLE};

static FIRST_RETURN: Once = Once::new();

/// `user_init`: allocates the first process, per spec.md §4.8. Must run
/// exactly once, before any CPU calls `scheduler`.
///
/// # Panics
/// If called more than once, or if `initproc` is already recorded.
pub fn user_init() -> Result<usize, KernelError> {
    let mut table = PROC_TABLE.lock();
    assert!(table.init_proc.is_none(), "user_init: already initialized");

    let idx = try_log!(proc::alloc_proc(&mut table));
    table.slots[idx].size = PAGE_SIZE;
    table.slots[idx].name = "initcode".to_string();
    table.slots[idx].cwd = Some(Inode::root());
    table.slots[idx].state = ProcState::Runnable;
    table.init_proc = Some(idx);

    Ok(idx)
}

/// `forkret`'s one-time deferred setup, run by whichever thread plays
/// `initproc` the first time it is scheduled. Idempotent beyond its
/// first call, matching the teacher's `first` flag.
pub fn forkret_once() {
    FIRST_RETURN.call_once(|| {
        collab::pgdir_alloc().ok();
        log::info!("forkret: initproc's first return, deferred setup done");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::ProcTableInner;

    #[test]
    fn user_init_allocates_runnable_initproc() {
        {
            let mut table = PROC_TABLE.lock();
            *table = ProcTableInner::new();
        }

        let idx = user_init().unwrap();
        let table = PROC_TABLE.lock();
        assert_eq!(table.slots[idx].state, ProcState::Runnable);
        assert_eq!(table.slots[idx].size, PAGE_SIZE);
        assert_eq!(table.init_proc, Some(idx));
    }
}
