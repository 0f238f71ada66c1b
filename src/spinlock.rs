//! A mutual-exclusion primitive that couples acquisition to the
//! interrupt-disable nesting discipline in `cpu.rs`, grounded on the
//! teacher's `Mutex<T>`/`MutexGuard` (`src/spinlock.rs`). The table lock
//! (`proc::PROC_TABLE`) is the one instance of this type the scheduling
//! core needs; spec.md §4.1 requires holding it across any `state`
//! transition and disabling interrupts while held, which `lock` provides
//! by acquiring an [`InterruptLock`] before spinning.
//!
//! Unlike the teacher, which identifies the holder by a `*mut Cpu`
//! pointer (every lock holder there is a CPU), this core's callers
//! include both simulated CPU threads and simulated process threads
//! (see `DESIGN.md`), so the holder is tracked by `ThreadId` instead.

use std::cell::UnsafeCell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::thread::ThreadId;

use crate::cpu::{self, InterruptLock};

pub struct SpinLock<T> {
    name: &'static str,
    locked: AtomicBool,
    holder: StdMutex<Option<ThreadId>>,
    data: UnsafeCell<T>,
}

// Safety: `data` is only reachable through a `SpinLockGuard`, which is
// only constructed while `locked` is held by exactly one thread, or
// through `get_unchecked`'s documented best-effort escape hatch.
unsafe impl<T> Sync for SpinLock<T> where T: Send {}

impl<T> SpinLock<T> {
    pub const fn new(value: T, name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            holder: StdMutex::new(None),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let intr = cpu::push_off();
        let me = std::thread::current().id();

        assert!(
            *self.holder.lock().unwrap() != Some(me),
            "acquire {}: already held by this thread",
            self.name
        );

        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        *self.holder.lock().unwrap() = Some(me);

        SpinLockGuard {
            lock: self,
            _intr: intr,
        }
    }

    /// Whether the calling thread currently holds this lock. `sched`
    /// asserts this to be true on entry.
    pub fn is_held_by_current(&self) -> bool {
        *self.holder.lock().unwrap() == Some(std::thread::current().id())
    }

    /// Debug-only, lock-free read. Matches `proc_dump`'s deliberate
    /// choice not to take the table lock, so a wedged kernel can still be
    /// dumped.
    ///
    /// # Safety
    /// The caller must not rely on the returned reference for anything
    /// but best-effort diagnostics; concurrent writers are not excluded.
    pub unsafe fn get_unchecked(&self) -> &T {
        unsafe { &*self.data.get() }
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    _intr: InterruptLock,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        *self.lock.holder.lock().unwrap() = None;
        self.lock.locked.store(false, Ordering::Release);
        // `_intr` drops after this, re-enabling interrupts last.
    }
}
