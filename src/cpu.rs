//! Per-CPU bookkeeping and the interrupt-disable nesting discipline the
//! table lock relies on.
//!
//! Grounded on the teacher's `Cpu`/`Cpus`/`InterruptLock`
//! (`kernel/src/proc.rs`): there, a CPU's hart id is read from a register
//! and `push_cli`/`pop_cli` mask real hardware interrupts. Neither exists
//! on a host, so a CPU id here is whatever `bind_current_thread` the
//! calling OS thread last recorded, and "interrupts" are a logical
//! per-kernel-thread nesting counter rather than a hardware flag —
//! spec.md's own design note already frames interrupt masking as a
//! collaborator "referenced only by interface".

use std::cell::Cell;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::param::NCPU;

thread_local! {
    static CURRENT_CPU: Cell<Option<usize>> = const { Cell::new(None) };
    static INTR_NESTING: Cell<isize> = const { Cell::new(0) };
}

/// Binds the calling OS thread to a simulated CPU id for the remainder of
/// its lifetime. Stands in for reading a hart-id register: on real
/// hardware each hart always resolves to the same id, whereas here each
/// simulated CPU is driven by its own dedicated OS thread for the
/// lifetime of that thread.
pub fn bind_current_thread(cpu: usize) {
    assert!(cpu < NCPU, "bind_current_thread: cpu id out of range");
    CURRENT_CPU.with(|c| c.set(Some(cpu)));
}

/// The simulated CPU id bound to the calling thread, if any.
pub fn current_id() -> Option<usize> {
    CURRENT_CPU.with(|c| c.get())
}

/// Per-CPU state read across threads for diagnostics: which slot (if
/// any) this CPU currently has `Running`.
pub struct Cpu {
    current_proc: AtomicI64,
}

impl Cpu {
    const fn new() -> Self {
        Self {
            current_proc: AtomicI64::new(-1),
        }
    }

    pub fn current_proc(&self) -> Option<usize> {
        let v = self.current_proc.load(Ordering::Acquire);
        if v < 0 {
            None
        } else {
            Some(v as usize)
        }
    }

    pub fn set_current_proc(&self, slot: Option<usize>) {
        let v = slot.map(|s| s as i64).unwrap_or(-1);
        self.current_proc.store(v, Ordering::Release);
    }
}

pub struct CpuTable {
    cpus: [Cpu; NCPU],
}

impl CpuTable {
    const fn new() -> Self {
        Self {
            cpus: [const { Cpu::new() }; NCPU],
        }
    }

    pub fn get(&self, id: usize) -> &Cpu {
        &self.cpus[id]
    }
}

pub static CPUS: CpuTable = CpuTable::new();

/// RAII guard returned by [`push_off`]; the nesting counter is
/// decremented when the innermost guard is dropped.
pub struct InterruptLock(());

impl Drop for InterruptLock {
    fn drop(&mut self) {
        pop_off();
    }
}

/// Disables "interrupts" for the calling kernel thread: a nesting
/// counter, since there is no hardware interrupt controller to mask on a
/// host. Mirrors the teacher's `Cpu::lock`, which the table lock's
/// `acquire` calls before spinning.
pub fn push_off() -> InterruptLock {
    INTR_NESTING.with(|n| n.set(n.get() + 1));
    InterruptLock(())
}

fn pop_off() {
    INTR_NESTING.with(|n| {
        let v = n.get();
        assert!(v >= 1, "pop_off: not holding cli");
        n.set(v - 1);
    });
}

/// Whether the calling kernel thread currently holds at least one
/// interrupt-disable nesting level.
pub fn interrupts_disabled() -> bool {
    INTR_NESTING.with(|n| n.get() > 0)
}

/// The calling kernel thread's interrupt-disable nesting depth. `sched`'s
/// precondition requires this to be exactly 1 (the table lock, and
/// nothing else, held).
pub fn nesting_depth() -> isize {
    INTR_NESTING.with(|n| n.get())
}
