//! Stand-ins for the collaborators spec.md places out of scope and
//! "referenced only by interface": virtual memory, kernel-stack
//! allocation, and file/inode handles. Real kernels back these with page
//! tables and an on-disk file system; these stand-ins exist only to give
//! `fork`/`exit`/`grow_proc` something to call at exactly the points
//! spec.md names, and to preserve the reference-counting shape those
//! calls depend on so tests can observe it (e.g. that `fork` duplicates
//! every open file, and `exit` closes them all).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::KernelError;

/// Opaque per-process virtual address space (`pgdir_alloc`'s result).
#[derive(Debug, Default)]
pub struct AddressSpace {
    size: usize,
}

impl AddressSpace {
    pub fn size(&self) -> usize {
        self.size
    }
}

/// `pgdir_alloc`: allocates a fresh, empty address space.
pub fn pgdir_alloc() -> Result<AddressSpace, KernelError> {
    Ok(AddressSpace { size: 0 })
}

/// `pgdir_copy`: duplicates `parent`'s address space for `fork`.
pub fn pgdir_copy(parent: &AddressSpace) -> Result<AddressSpace, KernelError> {
    Ok(AddressSpace { size: parent.size })
}

/// `pgdir_free`: releases an address space.
pub fn pgdir_free(_space: AddressSpace) {}

/// `alloc_user_vm`/`dealloc_user_vm`: grows or shrinks user memory by a
/// signed delta.
pub fn resize_user_vm(space: &mut AddressSpace, delta: isize) -> Result<usize, KernelError> {
    if delta < 0 && space.size < (-delta) as usize {
        return Err(KernelError::InvalidArgument);
    }
    space.size = (space.size as isize + delta) as usize;
    Ok(space.size)
}

/// Opaque per-process kernel stack handle (`kalloc`'s result).
#[derive(Debug)]
pub struct KernelStack;

/// `kalloc`: allocates a kernel stack.
pub fn kalloc_stack() -> Result<KernelStack, KernelError> {
    Ok(KernelStack)
}

/// `kfree`: releases a kernel stack.
pub fn kfree_stack(_stack: KernelStack) {}

/// A single open file description, reference-counted the way the real
/// file table's `file_dup`/`file_close` are.
#[derive(Debug, Clone)]
pub struct OpenFile {
    refs: Arc<AtomicUsize>,
}

impl OpenFile {
    pub fn new() -> Self {
        Self {
            refs: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// `file_dup`
    pub fn duplicate(&self) -> Self {
        self.refs.fetch_add(1, Ordering::Relaxed);
        Self {
            refs: Arc::clone(&self.refs),
        }
    }

    /// `file_close`
    pub fn close(self) {
        self.refs.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

impl Default for OpenFile {
    fn default() -> Self {
        Self::new()
    }
}

/// A directory inode reference (`inode_dup`/`inode_put`).
#[derive(Debug, Clone, Default)]
pub struct Inode {
    refs: Arc<AtomicUsize>,
}

impl Inode {
    pub fn root() -> Self {
        Self {
            refs: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// `inode_dup`
    pub fn duplicate(&self) -> Self {
        self.refs.fetch_add(1, Ordering::Relaxed);
        Self {
            refs: Arc::clone(&self.refs),
        }
    }

    /// `inode_put`
    pub fn put(self) {
        self.refs.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}
