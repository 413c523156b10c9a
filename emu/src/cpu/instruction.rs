//! Instruction classification.
//!
//! An [`Opcode`] is an immutable 32-bit word decoded exactly once into its
//! condition and instruction class; operand fields are extracted on demand
//! by the handlers through [`Bits`](crate::bitwise::Bits), never mutated or
//! reinterpreted in place.
//!
//! Decode priority matters because some patterns overlap: BX, SWP and the
//! multiplies all live inside the data-processing space, and the halfword
//! transfers share bits 27-25 = 000 with them.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::condition::Condition;
use crate::cpu::flags::LoadStoreKind;

/// Instruction class of a 32-bit ARM word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmInstruction {
    DataProcessing,
    PsrTransferMrs,
    PsrTransferMsr,
    Multiply,
    MultiplyLong,
    SingleDataSwap,
    BranchAndExchange,
    HalfwordDataTransfer,
    SingleDataTransfer,
    BlockDataTransfer,
    Branch,
    CoprocessorDataTransfer,
    CoprocessorDataOperation,
    CoprocessorRegisterTransfer,
    SoftwareInterrupt,
    Undefined,
}

impl From<u32> for ArmInstruction {
    fn from(raw: u32) -> Self {
        if raw & 0x0FFF_FFF0 == 0x012F_FF10 {
            Self::BranchAndExchange
        } else if raw & 0x0FB0_0FF0 == 0x0100_0090 {
            Self::SingleDataSwap
        } else if raw & 0x0F80_00F0 == 0x0080_0090 {
            Self::MultiplyLong
        } else if raw & 0x0FC0_00F0 == 0x0000_0090 {
            Self::Multiply
        } else if raw & 0x0E00_0090 == 0x0000_0090 && raw.get_bits(5..=6) != 0 {
            Self::HalfwordDataTransfer
        } else if raw & 0x0FBF_0FFF == 0x010F_0000 {
            Self::PsrTransferMrs
        } else if raw & 0x0DB0_F000 == 0x0120_F000 {
            Self::PsrTransferMsr
        } else {
            match raw.get_bits(25..=27) {
                0b000 | 0b001 => Self::DataProcessing,
                0b010 => Self::SingleDataTransfer,
                0b011 => {
                    if raw.get_bit(4) {
                        Self::Undefined
                    } else {
                        Self::SingleDataTransfer
                    }
                }
                0b100 => Self::BlockDataTransfer,
                0b101 => Self::Branch,
                0b110 => Self::CoprocessorDataTransfer,
                0b111 => {
                    if raw.get_bit(24) {
                        Self::SoftwareInterrupt
                    } else if raw.get_bit(4) {
                        Self::CoprocessorRegisterTransfer
                    } else {
                        Self::CoprocessorDataOperation
                    }
                }
                _ => unreachable!(),
            }
        }
    }
}

/// A decoded instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opcode {
    pub raw: u32,
    pub condition: Condition,
    pub instruction: ArmInstruction,
}

impl From<u32> for Opcode {
    fn from(raw: u32) -> Self {
        Self {
            raw,
            condition: Condition::from(raw.get_bits(28..=31) as u8),
            instruction: ArmInstruction::from(raw),
        }
    }
}

impl Opcode {
    /// Whether this instruction may redirect or stop straight-line
    /// execution, ending the basic block it appears in. Conservative:
    /// conditional forms still terminate the block at compile time.
    #[must_use]
    pub fn ends_basic_block(self) -> bool {
        match self.instruction {
            ArmInstruction::Branch
            | ArmInstruction::BranchAndExchange
            | ArmInstruction::SoftwareInterrupt
            | ArmInstruction::Undefined
            | ArmInstruction::CoprocessorDataTransfer
            | ArmInstruction::CoprocessorDataOperation
            | ArmInstruction::CoprocessorRegisterTransfer => true,
            ArmInstruction::DataProcessing => self.raw.get_bits(12..=15) == 15,
            ArmInstruction::SingleDataTransfer | ArmInstruction::HalfwordDataTransfer => {
                LoadStoreKind::from(self.raw.get_bit(20)) == LoadStoreKind::Load
                    && self.raw.get_bits(12..=15) == 15
            }
            ArmInstruction::BlockDataTransfer => {
                LoadStoreKind::from(self.raw.get_bit(20)) == LoadStoreKind::Load
                    && self.raw.get_bit(15)
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}{} 0x{:08X}",
            self.instruction, self.condition, self.raw
        )
    }
}
