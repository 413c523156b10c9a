//! Threaded-code tier: the decode loop paid once, at compile time.
//!
//! Each slot pairs the decoded opcode with the handler the interpreter
//! would have dispatched to, so the executor loop is a condition check
//! and an indirect call per instruction. Handlers are shared with the
//! interpreter, which keeps the tiers behaviorally identical.

use crate::cpu::instruction::Opcode;
use crate::cpu::operations::{self, OpHandler};

pub struct ThreadedOp {
    pub opcode: Opcode,
    pub handler: OpHandler,
}

pub struct ThreadedCode {
    pub ops: Vec<ThreadedOp>,
}

impl ThreadedCode {
    #[must_use]
    pub fn generate(opcodes: &[Opcode]) -> Self {
        Self {
            ops: opcodes
                .iter()
                .map(|&opcode| ThreadedOp {
                    opcode,
                    handler: operations::handler_for(opcode),
                })
                .collect(),
        }
    }
}
