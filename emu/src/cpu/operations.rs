//! Instruction handlers.
//!
//! One function per instruction class, shared by every execution tier:
//! the interpreter calls through [`handler_for`] on each step and the
//! compiled tiers bake the same function pointers into their slots, so a
//! chunk can never diverge from what the interpreter would have done.
//!
//! Handlers assume the condition has already passed and R15 holds the
//! address of the executing instruction. Operand reads of R15 observe
//! PC+8, or PC+12 where a register-specified shift or a store of R15 is
//! involved.

use crate::bitwise::Bits;
use crate::cpu::alu::{self, AluInstruction, AluInstructionKind, ArithmeticOpResult};
use crate::cpu::core::Core;
use crate::cpu::cp15::Cp15Effect;
use crate::cpu::exception::Exception;
use crate::cpu::flags::{
    HalfwordTransferKind, Indexing, LoadStoreKind, Offsetting, OperandKind, ShiftKind,
};
use crate::cpu::instruction::{ArmInstruction, Opcode};
use crate::cpu::modes::Mode;
use crate::cpu::registers::{REG_LR, REG_PROGRAM_COUNTER};
use crate::memory::translate::AccessWidth;

/// What a single executed instruction did to control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// Straight-line: PC moves to the next instruction.
    Advance,

    /// The handler wrote a new PC.
    Branch,

    /// The instruction raised an exception; PC is untouched.
    Trap(Exception),
}

pub type OpHandler = fn(&mut Core, Opcode) -> StepEvent;

/// Dispatch table entry for an instruction class.
#[must_use]
pub fn handler_for(opcode: Opcode) -> OpHandler {
    match opcode.instruction {
        ArmInstruction::DataProcessing => data_processing,
        ArmInstruction::PsrTransferMrs => psr_transfer_mrs,
        ArmInstruction::PsrTransferMsr => psr_transfer_msr,
        ArmInstruction::Multiply => multiply,
        ArmInstruction::MultiplyLong => multiply_long,
        ArmInstruction::SingleDataSwap => single_data_swap,
        ArmInstruction::BranchAndExchange => branch_and_exchange,
        ArmInstruction::HalfwordDataTransfer => halfword_data_transfer,
        ArmInstruction::SingleDataTransfer => single_data_transfer,
        ArmInstruction::BlockDataTransfer => block_data_transfer,
        ArmInstruction::Branch => branch,
        ArmInstruction::CoprocessorDataTransfer | ArmInstruction::CoprocessorDataOperation => {
            coprocessor_unsupported
        }
        ArmInstruction::CoprocessorRegisterTransfer => coprocessor_register_transfer,
        ArmInstruction::SoftwareInterrupt => software_interrupt,
        ArmInstruction::Undefined => undefined,
    }
}

/// Register read with the R15 pipeline offset applied.
fn operand_register(core: &Core, reg: u32, r15_adjust: u32) -> u32 {
    if reg == REG_PROGRAM_COUNTER {
        core.registers
            .program_counter()
            .wrapping_add(8 + r15_adjust)
    } else {
        core.registers.register_at(reg)
    }
}

fn data_processing(core: &mut Core, op: Opcode) -> StepEvent {
    let raw = op.raw;
    let alu_op = AluInstruction::from(raw.get_bits(21..=24));
    let set_flags = raw.get_bit(20);
    let rn = raw.get_bits(16..=19);
    let rd = raw.get_bits(12..=15);

    let mut shifter_carry = core.cpsr.carry_flag();
    let (op2, r15_adjust) = match OperandKind::from(raw.get_bit(25)) {
        OperandKind::Immediate => {
            let rotate = 2 * raw.get_bits(8..=11);
            let value = raw.get_bits(0..=7).rotate_right(rotate);
            if rotate != 0 {
                shifter_carry = value.get_bit(31);
            }
            (value, 0)
        }
        OperandKind::Register => {
            let rm = raw.get_bits(0..=3);
            let kind = ShiftKind::from(raw.get_bits(5..=6));
            if raw.get_bit(4) {
                let amount = core.registers.register_at(raw.get_bits(8..=11)) & 0xFF;
                let shifted =
                    alu::shift_register(kind, amount, operand_register(core, rm, 4), shifter_carry);
                shifter_carry = shifted.carry;
                (shifted.result, 4)
            } else {
                let amount = raw.get_bits(7..=11);
                let shifted =
                    alu::shift_immediate(kind, amount, operand_register(core, rm, 0), shifter_carry);
                shifter_carry = shifted.carry;
                (shifted.result, 0)
            }
        }
    };

    let op1 = operand_register(core, rn, r15_adjust);
    let carry_in = core.cpsr.carry_flag();
    let logical = |result| ArithmeticOpResult {
        result,
        carry: shifter_carry,
        overflow: false,
    };
    let outcome = match alu_op {
        AluInstruction::And | AluInstruction::Tst => logical(op1 & op2),
        AluInstruction::Eor | AluInstruction::Teq => logical(op1 ^ op2),
        AluInstruction::Sub | AluInstruction::Cmp => alu::sub(op1, op2),
        AluInstruction::Rsb => alu::sub(op2, op1),
        AluInstruction::Add | AluInstruction::Cmn => alu::add(op1, op2),
        AluInstruction::Adc => alu::adc(op1, op2, carry_in),
        AluInstruction::Sbc => alu::sbc(op1, op2, carry_in),
        AluInstruction::Rsc => alu::sbc(op2, op1, carry_in),
        AluInstruction::Orr => logical(op1 | op2),
        AluInstruction::Mov => logical(op2),
        AluInstruction::Bic => logical(op1 & !op2),
        AluInstruction::Mvn => logical(!op2),
    };

    if set_flags && !(rd == REG_PROGRAM_COUNTER && !alu_op.is_test()) {
        core.cpsr.set_sign_flag(outcome.sign());
        core.cpsr.set_zero_flag(outcome.zero());
        match alu_op.kind() {
            AluInstructionKind::Logical => core.cpsr.set_carry_flag(outcome.carry),
            AluInstructionKind::Arithmetic => {
                core.cpsr.set_carry_flag(outcome.carry);
                core.cpsr.set_overflow_flag(outcome.overflow);
            }
        }
    }

    if alu_op.is_test() {
        return StepEvent::Advance;
    }

    if rd == REG_PROGRAM_COUNTER {
        // exception return idiom: MOVS PC / SUBS PC pull the SPSR back
        if set_flags {
            core.restore_cpsr();
        }
        core.registers.set_program_counter(outcome.result & !0b11);
        return StepEvent::Branch;
    }

    core.registers.set_register_at(rd, outcome.result);
    StepEvent::Advance
}

fn psr_transfer_mrs(core: &mut Core, op: Opcode) -> StepEvent {
    let rd = op.raw.get_bits(12..=15);
    let use_spsr = op.raw.get_bit(22);
    let mode = core.cpsr.mode();
    let value = if use_spsr && mode.has_spsr() {
        core.register_bank.spsr(mode)
    } else {
        if use_spsr {
            tracing::debug!("MRS SPSR in {mode:?}, reading CPSR instead");
        }
        core.cpsr
    };
    core.registers.set_register_at(rd, value.into());
    StepEvent::Advance
}

fn psr_transfer_msr(core: &mut Core, op: Opcode) -> StepEvent {
    let raw = op.raw;
    let operand = match OperandKind::from(raw.get_bit(25)) {
        OperandKind::Immediate => {
            let rotate = 2 * raw.get_bits(8..=11);
            raw.get_bits(0..=7).rotate_right(rotate)
        }
        OperandKind::Register => core.registers.register_at(raw.get_bits(0..=3)),
    };

    let mut mask = 0u32;
    if raw.get_bit(16) {
        mask |= 0x0000_00FF;
    }
    if raw.get_bit(17) {
        mask |= 0x0000_FF00;
    }
    if raw.get_bit(18) {
        mask |= 0x00FF_0000;
    }
    if raw.get_bit(19) {
        mask |= 0xFF00_0000;
    }

    let mode = core.cpsr.mode();
    if raw.get_bit(22) {
        // SPSR destination
        if mode.has_spsr() {
            let spsr = core.register_bank.spsr_mut(mode);
            *spsr = ((u32::from(*spsr) & !mask) | (operand & mask)).into();
        } else {
            tracing::debug!("MSR SPSR in {mode:?}, ignored");
        }
        return StepEvent::Advance;
    }

    // User mode cannot touch the control byte
    let mask = if mode == Mode::User {
        mask & 0xFF00_0000
    } else {
        mask
    };
    let new = (u32::from(core.cpsr) & !mask) | (operand & mask);
    core.set_cpsr(new.into());
    StepEvent::Advance
}

fn multiply(core: &mut Core, op: Opcode) -> StepEvent {
    let raw = op.raw;
    let rd = raw.get_bits(16..=19);
    let rn = raw.get_bits(12..=15);
    let rs = raw.get_bits(8..=11);
    let rm = raw.get_bits(0..=3);

    let mut result = core
        .registers
        .register_at(rm)
        .wrapping_mul(core.registers.register_at(rs));
    if raw.get_bit(21) {
        result = result.wrapping_add(core.registers.register_at(rn));
    }
    core.registers.set_register_at(rd, result);

    if raw.get_bit(20) {
        core.cpsr.set_sign_flag(result.get_bit(31));
        core.cpsr.set_zero_flag(result == 0);
    }
    StepEvent::Advance
}

fn multiply_long(core: &mut Core, op: Opcode) -> StepEvent {
    let raw = op.raw;
    let signed = raw.get_bit(22);
    let accumulate = raw.get_bit(21);
    let rd_hi = raw.get_bits(16..=19);
    let rd_lo = raw.get_bits(12..=15);
    let rs = core.registers.register_at(raw.get_bits(8..=11));
    let rm = core.registers.register_at(raw.get_bits(0..=3));

    let mut result = if signed {
        (i64::from(rm as i32) * i64::from(rs as i32)) as u64
    } else {
        u64::from(rm) * u64::from(rs)
    };
    if accumulate {
        let acc = (u64::from(core.registers.register_at(rd_hi)) << 32)
            | u64::from(core.registers.register_at(rd_lo));
        result = result.wrapping_add(acc);
    }

    core.registers.set_register_at(rd_lo, result as u32);
    core.registers.set_register_at(rd_hi, (result >> 32) as u32);

    if raw.get_bit(20) {
        core.cpsr.set_sign_flag(result.get_bit(63));
        core.cpsr.set_zero_flag(result == 0);
    }
    StepEvent::Advance
}

fn single_data_swap(core: &mut Core, op: Opcode) -> StepEvent {
    let raw = op.raw;
    let byte = raw.get_bit(22);
    let address = core.registers.register_at(raw.get_bits(16..=19));
    let rd = raw.get_bits(12..=15);
    let source = core.registers.register_at(raw.get_bits(0..=3));

    let width = if byte {
        AccessWidth::Byte
    } else {
        AccessWidth::Word
    };
    let old = match core.read_data(address, width) {
        Ok(value) if byte => value,
        Ok(value) => value.rotate_right(8 * (address & 0b11)),
        Err(exception) => return StepEvent::Trap(exception),
    };
    if let Err(exception) = core.write_data(address, width, source) {
        return StepEvent::Trap(exception);
    }
    core.registers.set_register_at(rd, old);
    StepEvent::Advance
}

fn branch_and_exchange(core: &mut Core, op: Opcode) -> StepEvent {
    let target = core.registers.register_at(op.raw.get_bits(0..=3));
    if target.get_bit(0) {
        tracing::warn!("BX to Thumb target 0x{target:08X}; staying in ARM state");
    }
    core.registers.set_program_counter(target & !0b11);
    StepEvent::Branch
}

fn halfword_data_transfer(core: &mut Core, op: Opcode) -> StepEvent {
    let raw = op.raw;
    let indexing = Indexing::from(raw.get_bit(24));
    let offsetting = Offsetting::from(raw.get_bit(23));
    let write_back = raw.get_bit(21);
    let load_store = LoadStoreKind::from(raw.get_bit(20));
    let rn = raw.get_bits(16..=19);
    let rd = raw.get_bits(12..=15);
    let kind = HalfwordTransferKind::from(raw.get_bits(5..=6));

    let offset = if raw.get_bit(22) {
        (raw.get_bits(8..=11) << 4) | raw.get_bits(0..=3)
    } else {
        core.registers.register_at(raw.get_bits(0..=3))
    };

    let base = operand_register(core, rn, 0);
    let offset_base = match offsetting {
        Offsetting::Up => base.wrapping_add(offset),
        Offsetting::Down => base.wrapping_sub(offset),
    };
    let address = match indexing {
        Indexing::Pre => offset_base,
        Indexing::Post => base,
    };

    let width = match kind {
        HalfwordTransferKind::SignedByte => AccessWidth::Byte,
        _ => AccessWidth::Half,
    };

    match load_store {
        LoadStoreKind::Load => {
            let value = match core.read_data(address, width) {
                Ok(raw_value) => match kind {
                    HalfwordTransferKind::UnsignedHalfword => raw_value,
                    HalfwordTransferKind::SignedByte => raw_value.sign_extended(8),
                    HalfwordTransferKind::SignedHalfword => raw_value.sign_extended(16),
                },
                Err(exception) => return StepEvent::Trap(exception),
            };
            if indexing == Indexing::Post || write_back {
                core.registers.set_register_at(rn, offset_base);
            }
            if rd == REG_PROGRAM_COUNTER {
                core.registers.set_program_counter(value & !0b11);
                return StepEvent::Branch;
            }
            core.registers.set_register_at(rd, value);
        }
        LoadStoreKind::Store => {
            let value = operand_register(core, rd, 4);
            if let Err(exception) = core.write_data(address, width, value) {
                return StepEvent::Trap(exception);
            }
            if indexing == Indexing::Post || write_back {
                core.registers.set_register_at(rn, offset_base);
            }
        }
    }
    StepEvent::Advance
}

fn single_data_transfer(core: &mut Core, op: Opcode) -> StepEvent {
    let raw = op.raw;
    let indexing = Indexing::from(raw.get_bit(24));
    let offsetting = Offsetting::from(raw.get_bit(23));
    let byte = raw.get_bit(22);
    let write_back = raw.get_bit(21);
    let load_store = LoadStoreKind::from(raw.get_bit(20));
    let rn = raw.get_bits(16..=19);
    let rd = raw.get_bits(12..=15);

    // bit 25 is inverted relative to data processing: 0 selects immediate
    let offset = if raw.get_bit(25) {
        let amount = raw.get_bits(7..=11);
        let kind = ShiftKind::from(raw.get_bits(5..=6));
        let rm = core.registers.register_at(raw.get_bits(0..=3));
        alu::shift_immediate(kind, amount, rm, core.cpsr.carry_flag()).result
    } else {
        raw.get_bits(0..=11)
    };

    let base = operand_register(core, rn, 0);
    let offset_base = match offsetting {
        Offsetting::Up => base.wrapping_add(offset),
        Offsetting::Down => base.wrapping_sub(offset),
    };
    let address = match indexing {
        Indexing::Pre => offset_base,
        Indexing::Post => base,
    };

    let width = if byte {
        AccessWidth::Byte
    } else {
        AccessWidth::Word
    };

    match load_store {
        LoadStoreKind::Load => {
            let value = match core.read_data(address, width) {
                Ok(value) if byte => value,
                // misaligned word loads rotate the addressed byte into lane 0
                Ok(value) => value.rotate_right(8 * (address & 0b11)),
                Err(exception) => return StepEvent::Trap(exception),
            };
            if indexing == Indexing::Post || write_back {
                core.registers.set_register_at(rn, offset_base);
            }
            if rd == REG_PROGRAM_COUNTER {
                core.registers.set_program_counter(value & !0b11);
                return StepEvent::Branch;
            }
            core.registers.set_register_at(rd, value);
        }
        LoadStoreKind::Store => {
            let value = operand_register(core, rd, 4);
            if let Err(exception) = core.write_data(address, width, value) {
                return StepEvent::Trap(exception);
            }
            if indexing == Indexing::Post || write_back {
                core.registers.set_register_at(rn, offset_base);
            }
        }
    }
    StepEvent::Advance
}

fn block_data_transfer(core: &mut Core, op: Opcode) -> StepEvent {
    let raw = op.raw;
    let pre = raw.get_bit(24);
    let up = raw.get_bit(23);
    let s_bit = raw.get_bit(22);
    let write_back = raw.get_bit(21);
    let load_store = LoadStoreKind::from(raw.get_bit(20));
    let rn = raw.get_bits(16..=19);
    let list = raw.get_bits(0..=15);

    let count = list.count_ones();
    if count == 0 {
        tracing::warn!("block transfer with empty register list, ignored");
        return StepEvent::Advance;
    }

    let base = operand_register(core, rn, 0);
    let (mut address, final_base) = if up {
        (
            if pre { base.wrapping_add(4) } else { base },
            base.wrapping_add(4 * count),
        )
    } else {
        (
            if pre {
                base.wrapping_sub(4 * count)
            } else {
                base.wrapping_sub(4 * count).wrapping_add(4)
            },
            base.wrapping_sub(4 * count),
        )
    };

    let loads_pc = list.get_bit(15);
    let mode = core.cpsr.mode();
    // S without R15 in a load (or any store) targets the User bank
    let user_bank = s_bit && !(load_store == LoadStoreKind::Load && loads_pc);

    match load_store {
        LoadStoreKind::Load => {
            let mut loaded = Vec::with_capacity(count as usize);
            for reg in 0..16u32 {
                if !list.get_bit(reg as u8) {
                    continue;
                }
                match core.read_data(address, AccessWidth::Word) {
                    Ok(value) => loaded.push((reg, value)),
                    Err(exception) => return StepEvent::Trap(exception),
                }
                address = address.wrapping_add(4);
            }

            if write_back {
                core.registers.set_register_at(rn, final_base);
            }
            let mut event = StepEvent::Advance;
            for (reg, value) in loaded {
                if reg == REG_PROGRAM_COUNTER {
                    if s_bit {
                        core.restore_cpsr();
                    }
                    core.registers.set_program_counter(value & !0b11);
                    event = StepEvent::Branch;
                } else if user_bank {
                    let Core {
                        register_bank,
                        registers,
                        ..
                    } = core;
                    register_bank.set_user_register(mode, reg, value, registers);
                } else {
                    core.registers.set_register_at(reg, value);
                }
            }
            event
        }
        LoadStoreKind::Store => {
            for reg in 0..16u32 {
                if !list.get_bit(reg as u8) {
                    continue;
                }
                let value = if reg == REG_PROGRAM_COUNTER {
                    operand_register(core, reg, 4)
                } else if user_bank {
                    core.register_bank.user_register(mode, reg, &core.registers)
                } else {
                    core.registers.register_at(reg)
                };
                if let Err(exception) = core.write_data(address, AccessWidth::Word, value) {
                    return StepEvent::Trap(exception);
                }
                address = address.wrapping_add(4);
            }
            if write_back {
                core.registers.set_register_at(rn, final_base);
            }
            StepEvent::Advance
        }
    }
}

fn branch(core: &mut Core, op: Opcode) -> StepEvent {
    let pc = core.registers.program_counter();
    if op.raw.get_bit(24) {
        core.registers.set_register_at(REG_LR, pc.wrapping_add(4));
    }
    let offset = (op.raw.get_bits(0..=23) << 2).sign_extended(26);
    core.registers
        .set_program_counter(pc.wrapping_add(8).wrapping_add(offset));
    StepEvent::Branch
}

fn coprocessor_register_transfer(core: &mut Core, op: Opcode) -> StepEvent {
    let raw = op.raw;
    let cp_num = raw.get_bits(8..=11);
    if cp_num != 15 {
        tracing::debug!("register transfer to absent coprocessor p{cp_num}");
        return StepEvent::Trap(Exception::Undefined);
    }

    let crn = raw.get_bits(16..=19);
    let rd = raw.get_bits(12..=15);
    let opcode2 = raw.get_bits(5..=7);
    let crm = raw.get_bits(0..=3);

    if LoadStoreKind::from(raw.get_bit(20)) == LoadStoreKind::Load {
        // MRC
        let value = core.cp15.read_register(crn, crm, opcode2);
        if rd == REG_PROGRAM_COUNTER {
            // MRC to R15 moves the top nibble into the flags
            core.cpsr.set_sign_flag(value.get_bit(31));
            core.cpsr.set_zero_flag(value.get_bit(30));
            core.cpsr.set_carry_flag(value.get_bit(29));
            core.cpsr.set_overflow_flag(value.get_bit(28));
        } else {
            core.registers.set_register_at(rd, value);
        }
    } else {
        // MCR
        let value = operand_register(core, rd, 4);
        if core.cp15.write_register(crn, crm, opcode2, value) == Cp15Effect::WaitForInterrupt {
            core.enter_idle();
        }
    }
    StepEvent::Advance
}

fn coprocessor_unsupported(_core: &mut Core, op: Opcode) -> StepEvent {
    tracing::debug!("unsupported coprocessor instruction {op}");
    StepEvent::Trap(Exception::Undefined)
}

fn software_interrupt(_core: &mut Core, _op: Opcode) -> StepEvent {
    StepEvent::Trap(Exception::SoftwareInterrupt)
}

fn undefined(_core: &mut Core, op: Opcode) -> StepEvent {
    tracing::debug!("undefined instruction {op}");
    StepEvent::Trap(Exception::Undefined)
}
