//! Barrel shifter and ALU flag math.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::flags::ShiftKind;

/// Data-processing operation, instruction bits 24-21.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum AluInstruction {
    And = 0x0,
    Eor = 0x1,
    Sub = 0x2,
    Rsb = 0x3,
    Add = 0x4,
    Adc = 0x5,
    Sbc = 0x6,
    Rsc = 0x7,
    Tst = 0x8,
    Teq = 0x9,
    Cmp = 0xA,
    Cmn = 0xB,
    Orr = 0xC,
    Mov = 0xD,
    Bic = 0xE,
    Mvn = 0xF,
}

#[derive(Debug, Eq, PartialEq)]
pub enum AluInstructionKind {
    Logical,
    Arithmetic,
}

impl AluInstruction {
    /// Logical ops set C from the shifter; arithmetic ops set C and V from
    /// the operation itself.
    #[must_use]
    pub fn kind(self) -> AluInstructionKind {
        use AluInstruction::{
            Adc, Add, And, Bic, Cmn, Cmp, Eor, Mov, Mvn, Orr, Rsb, Rsc, Sbc, Sub, Teq, Tst,
        };
        match self {
            And | Eor | Tst | Teq | Orr | Mov | Bic | Mvn => AluInstructionKind::Logical,
            Sub | Rsb | Add | Adc | Sbc | Rsc | Cmp | Cmn => AluInstructionKind::Arithmetic,
        }
    }

    /// Test/compare ops write flags only, never a destination register.
    #[must_use]
    pub fn is_test(self) -> bool {
        matches!(self, Self::Tst | Self::Teq | Self::Cmp | Self::Cmn)
    }
}

impl From<u32> for AluInstruction {
    fn from(alu_op_code: u32) -> Self {
        use AluInstruction::{
            Adc, Add, And, Bic, Cmn, Cmp, Eor, Mov, Mvn, Orr, Rsb, Rsc, Sbc, Sub, Teq, Tst,
        };
        match alu_op_code {
            0x0 => And,
            0x1 => Eor,
            0x2 => Sub,
            0x3 => Rsb,
            0x4 => Add,
            0x5 => Adc,
            0x6 => Sbc,
            0x7 => Rsc,
            0x8 => Tst,
            0x9 => Teq,
            0xA => Cmp,
            0xB => Cmn,
            0xC => Orr,
            0xD => Mov,
            0xE => Bic,
            0xF => Mvn,
            _ => unreachable!(),
        }
    }
}

impl Display for AluInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::And => "AND",
            Self::Eor => "EOR",
            Self::Sub => "SUB",
            Self::Rsb => "RSB",
            Self::Add => "ADD",
            Self::Adc => "ADC",
            Self::Sbc => "SBC",
            Self::Rsc => "RSC",
            Self::Tst => "TST",
            Self::Teq => "TEQ",
            Self::Cmp => "CMP",
            Self::Cmn => "CMN",
            Self::Orr => "ORR",
            Self::Mov => "MOV",
            Self::Bic => "BIC",
            Self::Mvn => "MVN",
        };
        f.write_str(s)
    }
}

/// Result of a shifter or arithmetic step, with the flags it produces.
#[derive(Debug, Default)]
pub struct ArithmeticOpResult {
    pub result: u32,
    pub carry: bool,
    pub overflow: bool,
}

impl ArithmeticOpResult {
    #[must_use]
    pub fn sign(&self) -> bool {
        self.result.get_bit(31)
    }

    #[must_use]
    pub const fn zero(&self) -> bool {
        self.result == 0
    }
}

/// Shift with an immediate amount, honoring the #0 special encodings:
/// LSL#0 is a plain pass-through, LSR#0/ASR#0 encode a 32-bit shift and
/// ROR#0 encodes RRX.
#[must_use]
pub fn shift_immediate(kind: ShiftKind, amount: u32, rm: u32, carry: bool) -> ArithmeticOpResult {
    match (kind, amount) {
        (ShiftKind::Lsl, 0) => ArithmeticOpResult {
            result: rm,
            carry,
            ..Default::default()
        },
        (ShiftKind::Lsr, 0) => ArithmeticOpResult {
            result: 0,
            carry: rm.get_bit(31),
            ..Default::default()
        },
        (ShiftKind::Asr, 0) => ArithmeticOpResult {
            result: if rm.get_bit(31) { u32::MAX } else { 0 },
            carry: rm.get_bit(31),
            ..Default::default()
        },
        (ShiftKind::Ror, 0) => ArithmeticOpResult {
            result: (rm >> 1) | (u32::from(carry) << 31),
            carry: rm.get_bit(0),
            ..Default::default()
        },
        _ => shift_register(kind, amount, rm, carry),
    }
}

/// Shift with a register-specified amount (low byte of Rs); amount 0
/// leaves both value and carry untouched.
#[must_use]
pub fn shift_register(kind: ShiftKind, amount: u32, rm: u32, carry: bool) -> ArithmeticOpResult {
    if amount == 0 {
        return ArithmeticOpResult {
            result: rm,
            carry,
            ..Default::default()
        };
    }

    match kind {
        ShiftKind::Lsl => match amount {
            1..=31 => ArithmeticOpResult {
                result: rm << amount,
                carry: rm.get_bit((32 - amount) as u8),
                ..Default::default()
            },
            32 => ArithmeticOpResult {
                result: 0,
                carry: rm.get_bit(0),
                ..Default::default()
            },
            _ => ArithmeticOpResult::default(),
        },
        ShiftKind::Lsr => match amount {
            1..=31 => ArithmeticOpResult {
                result: rm >> amount,
                carry: rm.get_bit((amount - 1) as u8),
                ..Default::default()
            },
            32 => ArithmeticOpResult {
                result: 0,
                carry: rm.get_bit(31),
                ..Default::default()
            },
            _ => ArithmeticOpResult::default(),
        },
        ShiftKind::Asr => match amount {
            1..=31 => ArithmeticOpResult {
                result: ((rm as i32) >> amount) as u32,
                carry: rm.get_bit((amount - 1) as u8),
                ..Default::default()
            },
            _ => ArithmeticOpResult {
                result: if rm.get_bit(31) { u32::MAX } else { 0 },
                carry: rm.get_bit(31),
                ..Default::default()
            },
        },
        ShiftKind::Ror => {
            let amount = amount % 32;
            if amount == 0 {
                ArithmeticOpResult {
                    result: rm,
                    carry: rm.get_bit(31),
                    ..Default::default()
                }
            } else {
                ArithmeticOpResult {
                    result: rm.rotate_right(amount),
                    carry: rm.get_bit((amount - 1) as u8),
                    ..Default::default()
                }
            }
        }
    }
}

#[must_use]
pub fn add(op1: u32, op2: u32) -> ArithmeticOpResult {
    adc(op1, op2, false)
}

#[must_use]
pub fn adc(op1: u32, op2: u32, carry_in: bool) -> ArithmeticOpResult {
    let wide = u64::from(op1) + u64::from(op2) + u64::from(carry_in);
    let result = wide as u32;
    ArithmeticOpResult {
        result,
        carry: wide > u64::from(u32::MAX),
        // Signed overflow: both operands share a sign the result lacks.
        overflow: !(op1 ^ op2).get_bit(31) && (op1 ^ result).get_bit(31),
    }
}

/// Subtraction; carry means "no borrow", the ARM convention.
#[must_use]
pub fn sub(op1: u32, op2: u32) -> ArithmeticOpResult {
    adc(op1, !op2, true)
}

#[must_use]
pub fn sbc(op1: u32, op2: u32, carry_in: bool) -> ArithmeticOpResult {
    adc(op1, !op2, carry_in)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_sets_carry_and_overflow() {
        let r = add(u32::MAX, 1);
        assert_eq!(r.result, 0);
        assert!(r.carry);
        assert!(!r.overflow);
        assert!(r.zero());

        let r = add(0x7FFF_FFFF, 1);
        assert_eq!(r.result, 0x8000_0000);
        assert!(!r.carry);
        assert!(r.overflow);
        assert!(r.sign());
    }

    #[test]
    fn sub_carry_means_no_borrow() {
        let r = sub(5, 3);
        assert_eq!(r.result, 2);
        assert!(r.carry);

        let r = sub(3, 5);
        assert_eq!(r.result, 3u32.wrapping_sub(5));
        assert!(!r.carry);
        assert!(r.sign());
    }

    #[test]
    fn sbc_borrows_through_carry() {
        // carry clear: an extra borrow is pending
        let r = sbc(10, 4, false);
        assert_eq!(r.result, 5);

        let r = sbc(10, 4, true);
        assert_eq!(r.result, 6);
    }

    #[test]
    fn immediate_shift_special_encodings() {
        // LSR#0 encodes LSR#32
        let r = shift_immediate(ShiftKind::Lsr, 0, 0x8000_0001, false);
        assert_eq!(r.result, 0);
        assert!(r.carry);

        // ASR#0 encodes ASR#32
        let r = shift_immediate(ShiftKind::Asr, 0, 0x8000_0000, false);
        assert_eq!(r.result, u32::MAX);
        assert!(r.carry);

        // ROR#0 encodes RRX
        let r = shift_immediate(ShiftKind::Ror, 0, 0b11, true);
        assert_eq!(r.result, 0x8000_0001);
        assert!(r.carry);

        // LSL#0 passes through, carry untouched
        let r = shift_immediate(ShiftKind::Lsl, 0, 0x1234, true);
        assert_eq!(r.result, 0x1234);
        assert!(r.carry);
    }

    #[test]
    fn register_shift_large_amounts() {
        let r = shift_register(ShiftKind::Lsl, 32, 1, false);
        assert_eq!(r.result, 0);
        assert!(r.carry);

        let r = shift_register(ShiftKind::Lsl, 33, u32::MAX, true);
        assert_eq!(r.result, 0);
        assert!(!r.carry);

        let r = shift_register(ShiftKind::Ror, 36, 0xF0, false);
        assert_eq!(r.result, 0xF);
        assert!(!r.carry);
    }

    #[test]
    fn alu_op_kinds() {
        assert_eq!(AluInstruction::Add.kind(), AluInstructionKind::Arithmetic);
        assert_eq!(AluInstruction::Orr.kind(), AluInstructionKind::Logical);
        assert!(AluInstruction::Cmp.is_test());
        assert!(!AluInstruction::Mov.is_test());
    }
}
