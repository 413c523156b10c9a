//! Cached basic blocks and their promotion state.

use std::cell::{Cell, RefCell};

use crate::cpu::instruction::Opcode;
use crate::jit::native::DtBuffer;
use crate::jit::threaded::ThreadedCode;

/// Executions of a chunk before it is compiled to threaded code.
pub const GENERATE_THREADED_CODE_THRESHOLD: u64 = 16;

/// Executions of a chunk before threaded code is promoted to a
/// dynamically translated buffer.
pub const GENERATE_DT_BUFFER_THRESHOLD: u64 = 256;

/// Execution tier a chunk currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Uncompiled,
    Threaded,
    Native,
}

pub enum ChunkCode {
    Uncompiled,
    Threaded(ThreadedCode),
    Native(DtBuffer),
}

/// A decoded basic block, keyed by the physical address of its first
/// instruction. Never crosses a page boundary.
///
/// Chunks are shared as `Rc` between the cache and the scheduler, so an
/// executing chunk stays alive even after a self-modifying write evicts
/// it from the cache mid-run; the `invalidated` flag is what tells the
/// executor to abandon it.
pub struct Chunk {
    start: u32,
    opcodes: Vec<Opcode>,
    hits: Cell<u64>,
    invalidated: Cell<bool>,
    code: RefCell<ChunkCode>,
}

impl Chunk {
    #[must_use]
    pub fn new(start: u32, opcodes: Vec<Opcode>) -> Self {
        debug_assert!(!opcodes.is_empty());
        Self {
            start,
            opcodes,
            hits: Cell::new(0),
            invalidated: Cell::new(false),
            code: RefCell::new(ChunkCode::Uncompiled),
        }
    }

    #[must_use]
    pub const fn start(&self) -> u32 {
        self.start
    }

    /// Exclusive end address.
    #[must_use]
    pub fn end(&self) -> u32 {
        self.start + 4 * self.opcodes.len() as u32
    }

    #[must_use]
    pub fn opcodes(&self) -> &[Opcode] {
        &self.opcodes
    }

    #[must_use]
    pub fn contains(&self, paddr: u32) -> bool {
        (self.start..self.end()).contains(&paddr)
    }

    /// Slot index of an address inside the chunk, if word-aligned to one.
    #[must_use]
    pub fn index_of(&self, paddr: u32) -> Option<usize> {
        if self.contains(paddr) && (paddr - self.start) % 4 == 0 {
            Some(((paddr - self.start) / 4) as usize)
        } else {
            None
        }
    }

    /// Counts one execution and returns the new total.
    pub fn record_hit(&self) -> u64 {
        let hits = self.hits.get() + 1;
        self.hits.set(hits);
        hits
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.get()
    }

    pub fn invalidate(&self) {
        self.invalidated.set(true);
    }

    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.get()
    }

    #[must_use]
    pub fn status(&self) -> ChunkStatus {
        match *self.code.borrow() {
            ChunkCode::Uncompiled => ChunkStatus::Uncompiled,
            ChunkCode::Threaded(_) => ChunkStatus::Threaded,
            ChunkCode::Native(_) => ChunkStatus::Native,
        }
    }

    #[must_use]
    pub fn code(&self) -> &RefCell<ChunkCode> {
        &self.code
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("start", &format_args!("0x{:08X}", self.start))
            .field("len", &self.opcodes.len())
            .field("hits", &self.hits.get())
            .field("status", &self.status())
            .field("invalidated", &self.invalidated.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk_of(start: u32, words: &[u32]) -> Chunk {
        Chunk::new(start, words.iter().copied().map(Opcode::from).collect())
    }

    #[test]
    fn extent_and_indexing() {
        // SUB, CMP, BNE
        let chunk = chunk_of(0xC000_0100, &[0xE241_1001, 0xE351_0000, 0x1AFF_FFFC]);
        assert_eq!(chunk.end(), 0xC000_010C);
        assert!(chunk.contains(0xC000_0108));
        assert!(!chunk.contains(0xC000_010C));
        assert_eq!(chunk.index_of(0xC000_0104), Some(1));
        assert_eq!(chunk.index_of(0xC000_0106), None);
        assert_eq!(chunk.index_of(0xC000_010C), None);
    }

    #[test]
    fn hits_are_monotonic() {
        let chunk = chunk_of(0xC000_0000, &[0xE1A0_0000]);
        assert_eq!(chunk.hits(), 0);
        assert_eq!(chunk.record_hit(), 1);
        assert_eq!(chunk.record_hit(), 2);
        assert_eq!(chunk.hits(), 2);
    }

    #[test]
    fn starts_uncompiled_and_not_invalidated() {
        let chunk = chunk_of(0xC000_0000, &[0xE1A0_0000]);
        assert_eq!(chunk.status(), ChunkStatus::Uncompiled);
        assert!(!chunk.is_invalidated());
        chunk.invalidate();
        assert!(chunk.is_invalidated());
    }
}
