//! The 16 general-purpose registers visible at any time.
//!
//! R13 is the stack pointer by convention, R14 the link register and R15
//! the program counter. R15 here holds the address of the instruction being
//! executed; reads through operands see it ahead by the prefetch distance
//! (see `operations`).

use serde::{Deserialize, Serialize};

/// Link Register index (return address for subroutines and exceptions).
pub const REG_LR: u32 = 0xE;

/// Program Counter register index.
pub const REG_PROGRAM_COUNTER: u32 = 0xF;

/// The currently-visible register values.
///
/// Banked registers are swapped in and out of this view by
/// [`RegisterBank`](super::register_bank::RegisterBank) on mode changes.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Registers([u32; 16]);

impl Registers {
    #[must_use]
    pub const fn program_counter(&self) -> u32 {
        self.0[15]
    }

    pub const fn set_program_counter(&mut self, new_value: u32) {
        self.0[15] = new_value;
    }

    pub const fn advance_program_counter(&mut self, bytes: u32) {
        self.0[15] = self.0[15].wrapping_add(bytes);
    }

    pub fn set_register_at(&mut self, reg: u32, new_value: u32) {
        assert!(reg <= 15, "Invalid register index: {reg} (0x{reg:X})");
        self.0[reg as usize] = new_value;
    }

    #[must_use]
    pub fn register_at(&self, reg: u32) -> u32 {
        assert!(reg <= 15, "Invalid register index: {reg} (0x{reg:X})");
        self.0[reg as usize]
    }
}
