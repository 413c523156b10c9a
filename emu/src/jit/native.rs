//! Dynamic-translation tier.
//!
//! A [`DtBuffer`] is the translated form of a chunk: one specialized slot
//! per instruction with branch targets that stay inside the chunk
//! resolved to slot indices at translation time, so the hot loop never
//! recomputes them. How a buffer is invoked is behind
//! [`NativeCodeInvoker`]; the bundled [`PortableInvoker`] runs buffers
//! on the host through the shared handler table, and a machine-code
//! backend can slot in without touching the rest of the engine.

use crate::bitwise::Bits;
use crate::cpu::core::Core;
use crate::cpu::instruction::{ArmInstruction, Opcode};
use crate::cpu::operations::{self, OpHandler};
use crate::jit::ExecResult;
use crate::jit::chunk::Chunk;

pub struct DtOp {
    pub opcode: Opcode,
    pub handler: OpHandler,
    /// Slot index of a static branch target that lands inside this
    /// chunk, resolved at translation time.
    pub local_target: Option<usize>,
}

pub struct DtBuffer {
    pub ops: Vec<DtOp>,
}

impl DtBuffer {
    #[must_use]
    pub fn generate(start: u32, opcodes: &[Opcode]) -> Self {
        let end = start + 4 * opcodes.len() as u32;
        let ops = opcodes
            .iter()
            .enumerate()
            .map(|(index, &opcode)| DtOp {
                opcode,
                handler: operations::handler_for(opcode),
                local_target: static_branch_target(start, index, opcode)
                    .filter(|target| (start..end).contains(target))
                    .map(|target| ((target - start) / 4) as usize),
            })
            .collect();
        Self { ops }
    }
}

/// Destination of a B/BL at slot `index`, if the branch is static.
fn static_branch_target(start: u32, index: usize, opcode: Opcode) -> Option<u32> {
    if opcode.instruction != ArmInstruction::Branch {
        return None;
    }
    let pc = start + 4 * index as u32;
    let offset = (opcode.raw.get_bits(0..=23) << 2).sign_extended(26);
    Some(pc.wrapping_add(8).wrapping_add(offset))
}

/// Executes translated buffers. Held by the core as a trait object so a
/// real code generator can replace the portable fallback.
pub trait NativeCodeInvoker {
    fn invoke(&self, core: &mut Core, chunk: &Chunk, buffer: &DtBuffer) -> ExecResult;
}

pub struct PortableInvoker;

impl NativeCodeInvoker for PortableInvoker {
    fn invoke(&self, core: &mut Core, chunk: &Chunk, buffer: &DtBuffer) -> ExecResult {
        core.run_dt_buffer(chunk, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn opcodes(raws: &[u32]) -> Vec<Opcode> {
        raws.iter().map(|&raw| Opcode::from(raw)).collect()
    }

    #[test]
    fn backward_branch_resolves_to_slot_zero() {
        // SUBS R1, R1, #1 ; CMP R1, #0 ; BNE -16 (back to slot 0)
        let buffer = DtBuffer::generate(
            0xC000_0100,
            &opcodes(&[0xE251_1001, 0xE351_0000, 0x1AFF_FFFC]),
        );
        assert_eq!(buffer.ops[0].local_target, None);
        assert_eq!(buffer.ops[1].local_target, None);
        assert_eq!(buffer.ops[2].local_target, Some(0));
    }

    #[test]
    fn branch_leaving_the_chunk_stays_unresolved() {
        // B +64: target far past the chunk end
        let buffer = DtBuffer::generate(0xC000_0100, &opcodes(&[0xEA00_0010]));
        assert_eq!(buffer.ops[0].local_target, None);
    }

    #[test]
    fn non_branches_have_no_target() {
        let buffer = DtBuffer::generate(0xC000_0100, &opcodes(&[0xE1A0_0000]));
        assert_eq!(buffer.ops[0].local_target, None);
    }
}
