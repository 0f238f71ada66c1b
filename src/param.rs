/// Maximum number of simulated CPUs.
pub const NCPU: usize = 8;
/// Fixed size of the process table.
pub const NPROC: usize = 64;
/// Open file handles per process.
pub const NOFILE: usize = 16;
/// Number of priority levels, numbered 0..PRIO_LEVELS; level 3 is highest.
pub const PRIO_LEVELS: i32 = 4;
/// Default priority assigned by `alloc_proc`.
pub const DEFAULT_PRIORITY: i32 = 2;
/// Default time-slice budget assigned by `alloc_proc`, in ticks.
pub const DEFAULT_TIMESLICE: i32 = 16;
/// Size in bytes of the mapping `user_init` hands the first process.
pub const PAGE_SIZE: usize = 4096;
