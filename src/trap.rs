//! Tick accounting: the global clock and the per-tick bookkeeping pass
//! spec.md §4.7 requires over every allocated slot.
//!
//! Grounded on the teacher's `trap.rs` clock-interrupt handler, which
//! increments a tick counter and wakes `Channel::Ticks` sleepers; this
//! core has no timer hardware to field an interrupt from, so
//! `tick_update` is simply called directly by whatever drives the clock
//! in a given test or demo (see `DESIGN.md`).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::proc::{self, Channel, ProcState, ProcTableInner};

static TICKS: AtomicU64 = AtomicU64::new(0);

/// The current tick count. `alloc_proc` stamps `ctime` from this.
pub fn current_tick() -> u64 {
    TICKS.load(Ordering::Acquire)
}

/// Advances the clock by one tick and updates every allocated slot's
/// accounting, per spec.md §4.7:
///
/// - `elapsed` increments for every slot whose state is not `Zombie`
///   (frozen at the moment of exit, per the data model) nor `Unused`.
/// - `retime` increments for every `Runnable` slot; `stime` increments
///   for every `Sleeping` slot.
/// - `rutime` is charged by the scheduler at dispatch time (§4.4 step
///   6), not here — see `scheduler::schedule_once`, and `DESIGN.md`'s
///   note on Open Question #3 for why that over/under-counts on
///   purpose.
///
/// Wakes `Channel::ticks()` sleepers directly via `wakeup_locked` rather
/// than the public `wakeup`, since this function already holds
/// `PROC_TABLE` and the public entry point would re-acquire it.
pub fn tick_update() {
    let mut table = proc::PROC_TABLE.lock();
    TICKS.fetch_add(1, Ordering::AcqRel);
    update_accounting(&mut table);
    proc::wakeup_locked(&mut table, Channel::ticks());
}

fn update_accounting(table: &mut ProcTableInner) {
    for slot in table.slots.iter_mut() {
        if matches!(slot.state, ProcState::Unused | ProcState::Zombie) {
            continue;
        }
        slot.elapsed += 1;
        match slot.state {
            ProcState::Runnable => slot.retime += 1,
            ProcState::Sleeping => slot.stime += 1,
            ProcState::Running | ProcState::Embryo => {}
            ProcState::Unused | ProcState::Zombie => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::PROC_TABLE;

    #[test]
    fn tick_update_advances_clock_and_accounting() {
        {
            let mut table = PROC_TABLE.lock();
            *table = ProcTableInner::new();
            let idx = proc::alloc_proc(&mut table).unwrap();
            table.slots[idx].state = ProcState::Runnable;
        }

        let before = current_tick();
        tick_update();
        assert_eq!(current_tick(), before + 1);

        let table = PROC_TABLE.lock();
        let slot = table
            .slots
            .iter()
            .find(|p| p.state == ProcState::Runnable)
            .unwrap();
        assert_eq!(slot.retime, 1);
        assert_eq!(slot.elapsed, 1);
    }
}
