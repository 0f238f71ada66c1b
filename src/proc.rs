//! The process table, the table lock, slot allocation, and the
//! fork/exit/wait/kill life-cycle, plus the sleep/wakeup rendezvous.
//!
//! Grounded on the teacher's `Proc`/`ProcInner`/`ProcData`/`ProcTable`
//! (`kernel/src/proc.rs`), generalized from per-process locks back to the
//! single table-wide lock spec.md §4.1 requires (confirmed against
//! `original_source/xv6-public/proc.c`'s one `ptable.lock`), and with
//! `parent` carried as a field on the slot itself rather than a separate
//! side table, per spec.md §3's data model.

use std::array;
use std::thread::Thread;

use crate::collab::{self, AddressSpace, Inode, KernelStack, OpenFile};
use crate::error::KernelError;
use crate::param::{self, NOFILE, NPROC, PRIO_LEVELS};
use crate::spinlock::{SpinLock, SpinLockGuard};
use crate::trap;

/// A process id. Zero means "no process"; nonzero ids are assigned
/// monotonically from `ProcTableInner::next_pid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

/// An opaque wait-channel identifier. Equality-compared, never
/// dereferenced, per the glossary. Namespaced by high bits so the three
/// channel families this core uses can never alias each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel(u64);

impl Channel {
    /// The channel a process's own slot index sleeps/wakes on (used by
    /// `wait` and `exit`'s wakeup of the parent).
    pub fn proc(slot: usize) -> Self {
        Channel(0x1_0000_0000_0000_0000 | slot as u64)
    }

    /// The channel `tick_update` wakes every tick, giving timed sleeps a
    /// rendezvous point.
    pub fn ticks() -> Self {
        Channel(0x2_0000_0000_0000_0000)
    }

    /// An arbitrary rendezvous point for scenarios that need one (e.g. a
    /// semaphore in an end-to-end test).
    pub fn custom(id: u64) -> Self {
        Channel(0x3_0000_0000_0000_0000 | id)
    }
}

/// The life-cycle state of a process slot. A tagged sum rather than an
/// integer constant, per the design note, so an unreachable transition is
/// a compile-time error at every `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    Embryo,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

/// One process-table slot. Every field a different CPU might read is
/// guarded by `PROC_TABLE`'s lock; see `DESIGN.md` for why this core
/// folds the collaborator-owned fields (`kernel_stack`, `address_space`,
/// `open_files`, `cwd`) behind the same lock rather than leaving them
/// lock-free as a real kernel would.
pub struct ProcSlot {
    pub pid: Pid,
    pub state: ProcState,
    /// Non-owning back-reference to the creating slot; `None` only for
    /// `initproc`.
    pub parent: Option<usize>,
    pub size: usize,
    pub address_space: Option<AddressSpace>,
    pub kernel_stack: Option<KernelStack>,
    pub channel: Option<Channel>,
    pub killed: bool,
    pub name: String,
    pub open_files: [Option<OpenFile>; NOFILE],
    pub cwd: Option<Inode>,

    /// `0..PRIO_LEVELS`; not a tagged enum because `set_priority` must be
    /// able to record and retain out-of-range requested values (see
    /// `DESIGN.md`, Open Question #2).
    pub priority: i32,
    pub timeslice: i32,

    pub ctime: u64,
    pub retime: u64,
    pub rutime: u64,
    pub stime: u64,
    pub elapsed: u64,

    /// The OS thread standing in for this slot's suspended kernel thread
    /// while `state == Sleeping`. `wakeup`/`kill` call `unpark` on it.
    waiting_thread: Option<Thread>,
}

impl ProcSlot {
    fn unused() -> Self {
        Self {
            pid: Pid(0),
            state: ProcState::Unused,
            parent: None,
            size: 0,
            address_space: None,
            kernel_stack: None,
            channel: None,
            killed: false,
            name: String::new(),
            open_files: array::from_fn(|_| None),
            cwd: None,
            priority: param::DEFAULT_PRIORITY,
            timeslice: param::DEFAULT_TIMESLICE,
            ctime: 0,
            retime: 0,
            rutime: 0,
            stime: 0,
            elapsed: 0,
            waiting_thread: None,
        }
    }

    /// `const` twin of [`ProcSlot::unused`], needed to seed the fixed
    /// array in a `const fn`. Unlike the teacher's array-init (which
    /// reaches for `MaybeUninit`+`transmute` only because `#![no_std]`
    /// has no const heap path), `String`/`Option<T>`/`[T; N]` are all
    /// const-constructible as empty here, so no `unsafe` is needed.
    const fn unused_const() -> Self {
        Self {
            pid: Pid(0),
            state: ProcState::Unused,
            parent: None,
            size: 0,
            address_space: None,
            kernel_stack: None,
            channel: None,
            killed: false,
            name: String::new(),
            open_files: [const { None }; NOFILE],
            cwd: None,
            priority: param::DEFAULT_PRIORITY,
            timeslice: param::DEFAULT_TIMESLICE,
            ctime: 0,
            retime: 0,
            rutime: 0,
            stime: 0,
            elapsed: 0,
            waiting_thread: None,
        }
    }
}

/// The table's lock-protected contents: the fixed slot array, the
/// monotonic pid counter, the per-priority round-robin cursors the
/// dispatch policy advances, and the `initproc` back-reference.
pub struct ProcTableInner {
    pub slots: [ProcSlot; NPROC],
    pub next_pid: u64,
    pub cursors: [usize; PRIO_LEVELS as usize],
    pub init_proc: Option<usize>,
}

impl ProcTableInner {
    /// A freshly emptied table. Public mainly so integration tests can
    /// reset the shared [`PROC_TABLE`] between scenarios.
    pub const fn new() -> Self {
        Self {
            slots: [const { ProcSlot::unused_const() }; NPROC],
            next_pid: 0,
            cursors: [0; PRIO_LEVELS as usize],
            init_proc: None,
        }
    }
}

pub static PROC_TABLE: SpinLock<ProcTableInner> =
    SpinLock::new(ProcTableInner::new(), "proc_table");

/// Exit-time accounting `wait_ext` copies out before the slot is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitAccounting {
    pub retime: u64,
    pub rutime: u64,
    pub stime: u64,
    pub elapsed: u64,
}

/// `alloc_proc`: claims an `Unused` slot and stamps identity and initial
/// accounting. See `DESIGN.md` for why stack/address-space allocation
/// happens inside the same critical section as slot selection here,
/// unlike the real kernel.
pub fn alloc_proc(table: &mut ProcTableInner) -> Result<usize, KernelError> {
    let idx = match table.slots.iter().position(|p| p.state == ProcState::Unused) {
        Some(idx) => idx,
        None => err!(KernelError::OutOfSlots),
    };

    let stack = try_log!(collab::kalloc_stack());
    let space = match collab::pgdir_alloc() {
        Ok(space) => space,
        Err(e) => {
            collab::kfree_stack(stack);
            err!(e)
        }
    };

    table.next_pid += 1;
    let pid = table.next_pid;

    let slot = &mut table.slots[idx];
    *slot = ProcSlot::unused();
    slot.pid = Pid(pid);
    slot.state = ProcState::Embryo;
    slot.ctime = trap::current_tick();
    slot.kernel_stack = Some(stack);
    slot.address_space = Some(space);

    Ok(idx)
}

/// Undoes `alloc_proc`/a half-built `fork` child: frees the collaborator
/// handles and returns the slot to `Unused`.
fn free_slot(table: &mut ProcTableInner, idx: usize) {
    let slot = &mut table.slots[idx];
    if let Some(stack) = slot.kernel_stack.take() {
        collab::kfree_stack(stack);
    }
    if let Some(space) = slot.address_space.take() {
        collab::pgdir_free(space);
    }
    *slot = ProcSlot::unused();
}

/// `fork`: duplicates the caller into a fresh child, returning the
/// child's pid. Rolls the child back to `Unused` on any allocation
/// failure.
pub fn fork(current: usize) -> Result<u64, KernelError> {
    let mut table = PROC_TABLE.lock();

    let child = try_log!(alloc_proc(&mut table));

    let parent_space = table.slots[current]
        .address_space
        .as_ref()
        .expect("fork: parent has no address space");
    let space_copy = match log_err!(collab::pgdir_copy(parent_space)) {
        Ok(s) => s,
        Err(e) => {
            free_slot(&mut table, child);
            err!(e)
        }
    };

    let size = table.slots[current].size;
    let name = table.slots[current].name.clone();
    let open_files: [Option<OpenFile>; NOFILE] = array::from_fn(|i| {
        table.slots[current].open_files[i]
            .as_ref()
            .map(OpenFile::duplicate)
    });
    let cwd = table.slots[current].cwd.as_ref().map(Inode::duplicate);

    let child_slot = &mut table.slots[child];
    child_slot.address_space = Some(space_copy);
    child_slot.size = size;
    child_slot.name = name;
    child_slot.open_files = open_files;
    child_slot.cwd = cwd;
    child_slot.parent = Some(current);
    child_slot.state = ProcState::Runnable;

    Ok(table.slots[child].pid.0)
}

/// `grow_proc`: resizes the caller's user memory by a signed delta.
/// Spec.md calls this lock-free since it touches only the current
/// process; this core still takes the table lock because collaborator
/// fields live behind it here (see `DESIGN.md`).
pub fn grow_proc(current: usize, delta: isize) -> Result<usize, KernelError> {
    let mut table = PROC_TABLE.lock();
    let slot = &mut table.slots[current];
    let space = slot
        .address_space
        .as_mut()
        .expect("grow_proc: no address space");
    let new_size = try_log!(collab::resize_user_vm(space, delta));
    slot.size = new_size;
    Ok(new_size)
}

/// `exit`: terminal for the caller. Closes open files, wakes the parent,
/// reparents live children to `initproc`, marks the caller `Zombie`, and
/// never returns — the calling kernel thread (one OS thread per process
/// in this core's host model, see `DESIGN.md`) simply has no further
/// instructions to execute as this process.
///
/// # Panics
/// If `current` is `initproc`: calling `exit` on `initproc` is fatal to
/// the kernel, per spec.md §4.3.
pub fn exit(current: usize) -> ! {
    let mut table = PROC_TABLE.lock();

    assert_ne!(table.init_proc, Some(current), "exit: initproc exiting");
    log::debug!("exit: pid {} (slot {current})", table.slots[current].pid.0);

    {
        let slot = &mut table.slots[current];
        for file in slot.open_files.iter_mut() {
            if let Some(f) = file.take() {
                f.close();
            }
        }
        if let Some(cwd) = slot.cwd.take() {
            cwd.put();
        }
    }

    if let Some(parent) = table.slots[current].parent {
        wakeup_locked(&mut table, Channel::proc(parent));
    }

    let init = table.init_proc.expect("exit: no initproc to reparent to");
    for i in 0..NPROC {
        if table.slots[i].parent == Some(current) {
            table.slots[i].parent = Some(init);
            if table.slots[i].state == ProcState::Zombie {
                wakeup_locked(&mut table, Channel::proc(init));
            }
        }
    }

    table.slots[current].state = ProcState::Zombie;
    crate::scheduler::assert_sched_preconditions(table.slots[current].state);
    drop(table);

    // "Never returns": this OS thread's job, as the process `current`,
    // is over. A real kernel would swtch into the scheduler and never
    // resume this context; here there is simply nothing further to
    // execute for it.
    loop {
        std::thread::park();
    }
}

fn wait_impl(current: usize, want_ext: bool) -> Option<(u64, Option<ExitAccounting>)> {
    loop {
        let mut table = PROC_TABLE.lock();

        let mut have_children = false;
        for i in 0..NPROC {
            if table.slots[i].parent != Some(current) {
                continue;
            }
            have_children = true;
            if table.slots[i].state == ProcState::Zombie {
                let pid = table.slots[i].pid.0;
                let acc = want_ext.then(|| ExitAccounting {
                    retime: table.slots[i].retime,
                    rutime: table.slots[i].rutime,
                    stime: table.slots[i].stime,
                    elapsed: table.slots[i].elapsed,
                });
                free_slot(&mut table, i);
                return Some((pid, acc));
            }
        }

        if !have_children || table.slots[current].killed {
            return None;
        }

        table = sleep(table, current, Channel::proc(current));
        drop(table);
    }
}

/// `wait`: reaps one `Zombie` child, returning its pid. `None` if the
/// caller has no children, or is itself killed while waiting.
pub fn wait(current: usize) -> Option<u64> {
    wait_impl(current, false).map(|(pid, _)| pid)
}

/// `wait_ext`: identical to `wait`, additionally returning the reaped
/// child's final accounting.
pub fn wait_ext(current: usize) -> Option<(u64, ExitAccounting)> {
    wait_impl(current, true)
        .map(|(pid, acc)| (pid, acc.expect("wait_ext always requests accounting")))
}

/// `kill(pid)`: sets `killed` on the target and, if it is `Sleeping`,
/// forces it `Runnable` so it observes the flag on its next user-space
/// return. Idempotent: killing an already-killed pid has the same effect
/// as once. `false` if `pid` is not found.
pub fn kill(pid: u64) -> bool {
    let mut table = PROC_TABLE.lock();
    let Some(idx) = table
        .slots
        .iter()
        .position(|p| p.pid.0 == pid && p.state != ProcState::Unused)
    else {
        log::debug!("kill: pid {pid} not found");
        return false;
    };

    table.slots[idx].killed = true;
    if table.slots[idx].state == ProcState::Sleeping {
        table.slots[idx].state = ProcState::Runnable;
        table.slots[idx].channel = None;
        if let Some(t) = table.slots[idx].waiting_thread.take() {
            t.unpark();
        }
    }
    true
}

/// `sleep`: blocks the caller on `chan`, atomically releasing the table
/// lock (the "external lock" in spec.md's general protocol is always the
/// table lock for every caller in this core's scope; see `DESIGN.md`).
/// Returns a freshly reacquired guard once woken — spuriously, by
/// `wakeup`, or by `kill`.
pub fn sleep(
    mut table: SpinLockGuard<'static, ProcTableInner>,
    current: usize,
    chan: Channel,
) -> SpinLockGuard<'static, ProcTableInner> {
    table.slots[current].channel = Some(chan);
    table.slots[current].state = ProcState::Sleeping;
    table.slots[current].waiting_thread = Some(std::thread::current());
    crate::scheduler::assert_sched_preconditions(table.slots[current].state);
    drop(table);

    std::thread::park();

    let mut table = PROC_TABLE.lock();
    table.slots[current].channel = None;
    table
}

/// `wakeup(chan)`: flips every `Sleeping` slot whose channel is `chan` to
/// `Runnable`. Edge-triggered broadcast; spurious wakeups are permitted,
/// callers re-check their condition.
pub fn wakeup(chan: Channel) {
    let mut table = PROC_TABLE.lock();
    wakeup_locked(&mut table, chan);
}

pub(crate) fn wakeup_locked(table: &mut ProcTableInner, chan: Channel) {
    for slot in table.slots.iter_mut() {
        if slot.state == ProcState::Sleeping && slot.channel == Some(chan) {
            slot.state = ProcState::Runnable;
            slot.channel = None;
            if let Some(t) = slot.waiting_thread.take() {
                t.unpark();
            }
        }
    }
}

/// `set_priority(prio)`: resets the caller's time-slice budget. Returns
/// success uniformly, including for unrecognized `prio` values, matching
/// `original_source`'s uniform `return 0` across every switch arm — see
/// `DESIGN.md`, Open Question #2.
pub fn set_priority(current: usize, prio: i32) {
    let mut table = PROC_TABLE.lock();
    let slot = &mut table.slots[current];
    slot.priority = prio;
    slot.timeslice = match prio {
        1 => 32,
        2 => 16,
        3 => 8,
        _ => -1,
    };
}

fn state_label(s: ProcState) -> &'static str {
    match s {
        ProcState::Unused => "unused",
        ProcState::Embryo => "embryo",
        ProcState::Sleeping => "sleep",
        ProcState::Runnable => "runble",
        ProcState::Running => "run",
        ProcState::Zombie => "zombie",
    }
}

/// `proc_dump`: writes one line per non-`Unused` slot. Deliberately
/// lock-free (see [`SpinLock::get_unchecked`]) so a wedged kernel can
/// still be dumped; omits the backtrace spec.md mentions for `Sleeping`
/// processes, since stack unwinding is out of scope here.
pub fn proc_dump() {
    let table = unsafe { PROC_TABLE.get_unchecked() };
    for slot in table.slots.iter() {
        if slot.state == ProcState::Unused {
            continue;
        }
        println!(
            "{}\t{}\t{}\t{}",
            slot.pid.0,
            slot.priority,
            state_label(slot.state),
            slot.name
        );
    }
}

/// Checks invariants 1, 2, 4, 5 from spec.md §8 against the table's
/// current state. Empty result means no violation found. Invariant 3 (at
/// most one `Running` slot per CPU) is cross-cutting with `cpu.rs` and
/// checked separately by callers that also hold a `CpuTable` reference;
/// invariant 6 is a postcondition of `wait` itself; invariant 7
/// (`next_pid` monotonic) is a property of the counter, not a per-call
/// snapshot.
pub fn audit(table: &ProcTableInner) -> Vec<String> {
    let mut violations = Vec::new();

    for (i, slot) in table.slots.iter().enumerate() {
        if (slot.state == ProcState::Unused) != (slot.pid.0 == 0) {
            violations.push(format!("slot {i}: state/pid invariant violated"));
        }
        if slot.state != ProcState::Unused
            && (slot.kernel_stack.is_none() || slot.address_space.is_none())
        {
            violations.push(format!("slot {i}: allocated without stack/address space"));
        }
        if let Some(p) = slot.parent {
            if table.slots[p].state == ProcState::Unused {
                violations.push(format!("slot {i}: parent {p} is unused"));
            }
        }
        if slot.retime + slot.rutime + slot.stime > slot.elapsed + 3 {
            violations.push(format!(
                "slot {i}: accounting exceeds elapsed by more than slack"
            ));
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset_table() {
        let mut table = PROC_TABLE.lock();
        *table = ProcTableInner::new();
    }

    #[test]
    fn alloc_assigns_embryo_with_defaults() {
        reset_table();
        let mut table = PROC_TABLE.lock();
        let idx = alloc_proc(&mut table).unwrap();
        let slot = &table.slots[idx];
        assert_eq!(slot.state, ProcState::Embryo);
        assert_eq!(slot.priority, param::DEFAULT_PRIORITY);
        assert_eq!(slot.timeslice, param::DEFAULT_TIMESLICE);
        assert_ne!(slot.pid.0, 0);
    }

    #[test]
    fn fork_duplicates_open_files() {
        reset_table();
        let parent = {
            let mut table = PROC_TABLE.lock();
            let idx = alloc_proc(&mut table).unwrap();
            table.slots[idx].open_files[0] = Some(OpenFile::new());
            table.slots[idx].state = ProcState::Runnable;
            table.init_proc = Some(idx);
            idx
        };

        let child_pid = fork(parent).unwrap();

        let table = PROC_TABLE.lock();
        let file = table.slots[parent].open_files[0].as_ref().unwrap();
        assert_eq!(file.ref_count(), 2);
        let child = table
            .slots
            .iter()
            .position(|p| p.pid.0 == child_pid)
            .unwrap();
        assert_eq!(table.slots[child].parent, Some(parent));
        assert_eq!(table.slots[child].state, ProcState::Runnable);
    }

    #[test]
    fn set_priority_seeds_budget() {
        reset_table();
        let idx = {
            let mut table = PROC_TABLE.lock();
            alloc_proc(&mut table).unwrap()
        };

        set_priority(idx, 3);
        assert_eq!(PROC_TABLE.lock().slots[idx].timeslice, 8);

        set_priority(idx, 99);
        assert_eq!(PROC_TABLE.lock().slots[idx].timeslice, -1);
    }

    #[test]
    fn kill_is_idempotent() {
        reset_table();
        let pid = {
            let mut table = PROC_TABLE.lock();
            let idx = alloc_proc(&mut table).unwrap();
            table.slots[idx].state = ProcState::Runnable;
            table.slots[idx].pid.0
        };

        assert!(kill(pid));
        assert!(kill(pid));
        assert!(PROC_TABLE.lock().slots.iter().any(|p| p.pid.0 == pid && p.killed));
    }

    #[test]
    fn kill_unknown_pid_fails() {
        reset_table();
        assert!(!kill(0xDEAD));
    }
}
