//! Basic-block cache, keyed page-then-address.
//!
//! The two-level map makes self-modifying-code invalidation a single
//! page lookup: a guest store into a protected page flushes every chunk
//! on that page at once. Page tables are allocated lazily, the first
//! time code on that page is cached.

use std::collections::HashMap;
use std::rc::Rc;

use crate::jit::chunk::Chunk;
use crate::memory::translate::page_of;

#[derive(Default)]
pub struct BlockCache {
    pages: HashMap<u32, HashMap<u32, Rc<Chunk>>>,
}

impl BlockCache {
    /// Chunk starting exactly at `paddr`, if cached.
    #[must_use]
    pub fn get(&self, paddr: u32) -> Option<Rc<Chunk>> {
        self.pages.get(&page_of(paddr))?.get(&paddr).cloned()
    }

    pub fn insert(&mut self, chunk: Rc<Chunk>) {
        self.pages
            .entry(page_of(chunk.start()))
            .or_default()
            .insert(chunk.start(), chunk);
    }

    #[must_use]
    pub fn has_chunks_on(&self, page: u32) -> bool {
        self.pages.get(&page_of(page)).is_some_and(|t| !t.is_empty())
    }

    /// Drops every chunk on a page, marking each invalidated so any
    /// executor still holding one abandons it. Returns how many were
    /// evicted.
    pub fn flush_page(&mut self, page: u32) -> usize {
        let Some(table) = self.pages.remove(&page_of(page)) else {
            return 0;
        };
        let evicted = table.len();
        for chunk in table.values() {
            chunk.invalidate();
        }
        tracing::debug!("flushed {evicted} chunk(s) on page 0x{:08X}", page_of(page));
        evicted
    }

    pub fn flush_all(&mut self) {
        let pages: Vec<u32> = self.pages.keys().copied().collect();
        for page in pages {
            self.flush_page(page);
        }
    }
}
