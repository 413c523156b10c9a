//! Write barrier over pages that hold compiled code.
//!
//! The barrier is consulted on every guest store into RAM. A portable
//! software barrier is used instead of host page protection and signal
//! handling: the protected-page set is small and the membership test is
//! a single hash probe on the store path.

use std::collections::HashSet;

use crate::memory::translate::{PAGE_SIZE, page_of};

pub trait WriteBarrier {
    fn page_size(&self) -> u32;

    /// Marks the page containing `paddr` as holding compiled code.
    fn protect(&mut self, paddr: u32);

    fn unprotect(&mut self, paddr: u32);

    /// Drops every protection, used when the whole cache is flushed.
    fn unprotect_all(&mut self);

    fn is_protected(&self, paddr: u32) -> bool;
}

#[derive(Debug, Default)]
pub struct SoftBarrier {
    protected: HashSet<u32>,
}

impl WriteBarrier for SoftBarrier {
    fn page_size(&self) -> u32 {
        PAGE_SIZE
    }

    fn protect(&mut self, paddr: u32) {
        self.protected.insert(page_of(paddr));
    }

    fn unprotect(&mut self, paddr: u32) {
        self.protected.remove(&page_of(paddr));
    }

    fn unprotect_all(&mut self) {
        self.protected.clear();
    }

    fn is_protected(&self, paddr: u32) -> bool {
        self.protected.contains(&page_of(paddr))
    }
}
