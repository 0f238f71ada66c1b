//! Preemptive multi-level priority scheduler core for a teaching
//! operating system kernel.
//!
//! This crate isolates the scheduling subsystem — the process table, the
//! table lock, the fork/exit/wait/kill life-cycle, the sleep/wakeup
//! rendezvous, and the four-level priority dispatch policy — from the
//! surrounding kernel (virtual memory, the file system, device drivers),
//! which are represented only by the narrow stand-ins in [`collab`] this
//! core calls through. See `SPEC_FULL.md` for the full specification and
//! `DESIGN.md` for how each module is grounded.

pub mod bootstrap;
pub mod collab;
pub mod cpu;
#[macro_use]
pub mod error;
pub mod param;
pub mod proc;
pub mod scheduler;
pub mod spinlock;
pub mod trap;
