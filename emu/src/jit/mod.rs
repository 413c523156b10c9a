//! Adaptive execution: block cache, threaded code, dynamic translation
//! and the write barrier that keeps them honest against self-modifying
//! code.

pub mod barrier;
pub mod cache;
pub mod chunk;
pub mod native;
pub mod threaded;

use crate::cpu::exception::Exception;

/// Outcome of executing a chunk (or one interpreted instruction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecResult {
    /// Fell off the end of the chunk; PC already points at the next
    /// instruction.
    Normal,

    /// A branch landed back inside the same chunk. Consumed internally
    /// by the executors; the scheduler never observes it.
    ContinueInChunk,

    /// A branch left the chunk; PC holds the new target.
    ModifyPc,

    /// The instruction raised an exception that is still undelivered.
    Exception(Exception),

    /// The chunk was invalidated while executing (self-modifying code).
    ChunkDisappear,

    /// A deliverable IRQ line was observed between instructions.
    IoIrq,

    /// A deliverable FIQ line was observed between instructions.
    IoFiq,
}
