//! Error kinds this crate's scheduling core can produce, and the
//! call-site-logging macros used throughout in place of a bare `?`.
//!
//! Resource exhaustion surfaces a [`KernelError`] to the nearest syscall
//! boundary; it never panics. Invariant violations (a kernel bug, not a
//! user error) still panic via `assert!`, matching the teacher's own
//! `sched` preconditions.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// `alloc_proc` found no `Unused` slot.
    OutOfSlots,
    /// A collaborator (kernel stack, address space) could not be
    /// allocated.
    OutOfMemory,
    /// A syscall argument was out of range for the operation.
    InvalidArgument,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfSlots => write!(f, "out of process slots"),
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

impl std::error::Error for KernelError {}

/// Returns `Err($e)` from the caller, logging the call site first. Use in
/// place of a bare `return Err(...)`.
#[macro_export]
macro_rules! err {
    ($e:expr) => {{
        log::debug!("{}:{}: {}", file!(), line!(), $e);
        return Err($e.into());
    }};
}

/// Passes an `Ok` through unchanged; logs the call site and passes an
/// `Err` through, without returning. Use to annotate an intermediate
/// result before matching on it further.
#[macro_export]
macro_rules! log_err {
    ($e:expr) => {
        match $e {
            Ok(v) => Ok(v),
            Err(e) => {
                log::debug!("{}:{}: {}", file!(), line!(), e);
                Err(e)
            }
        }
    };
}

/// Unwraps an `Ok`, or logs the call site and returns the `Err` from the
/// caller. Use in place of a bare `?` when the call site is worth noting.
#[macro_export]
macro_rules! try_log {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => {
                log::debug!("{}:{}: {}", file!(), line!(), e);
                return Err(e.into());
            }
        }
    };
}
