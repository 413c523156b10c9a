//! System control coprocessor (CP15).
//!
//! Only the registers the engine observes are modeled: the ID register,
//! the control register (alignment checking, vector base, MMU enable bit),
//! the fault status/address pair written on data aborts, and the
//! wait-for-interrupt operation. Cache and TLB maintenance writes are
//! accepted and ignored.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::memory::translate::Fault;

/// SA-1100 main ID register value.
const ID_REGISTER: u32 = 0x4401_A119;

/// Fault status code for an alignment fault.
const FSR_ALIGNMENT: u32 = 0b0001;

/// Side effect of a CP15 register write that the core must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cp15Effect {
    None,
    /// The guest requested idle until the next interrupt.
    WaitForInterrupt,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cp15 {
    control: u32,
    fsr: u32,
    far: u32,
}

impl Cp15 {
    /// A bit (control register bit 1): alignment fault checking enabled.
    #[must_use]
    pub fn alignment_check(&self) -> bool {
        self.control.get_bit(1)
    }

    /// V bit (control register bit 13): exception vectors at 0xFFFF0000.
    #[must_use]
    pub fn high_vectors(&self) -> bool {
        self.control.get_bit(13)
    }

    /// Records a data abort into the fault status/address registers.
    pub fn record_data_fault(&mut self, fault: Fault) {
        self.fsr = FSR_ALIGNMENT;
        self.far = fault.address;
    }

    /// MRC: read a CP15 register.
    #[must_use]
    pub fn read_register(&self, crn: u32, crm: u32, opcode2: u32) -> u32 {
        match (crn, crm, opcode2) {
            (0, _, _) => ID_REGISTER,
            (1, _, _) => self.control,
            (5, _, _) => self.fsr,
            (6, _, _) => self.far,
            _ => {
                tracing::debug!("unmodeled CP15 read c{crn}, c{crm}, {opcode2}");
                0
            }
        }
    }

    /// MCR: write a CP15 register.
    pub fn write_register(&mut self, crn: u32, crm: u32, opcode2: u32, value: u32) -> Cp15Effect {
        match (crn, crm, opcode2) {
            (1, _, _) => {
                if value.get_bit(0) {
                    // The MMU enable bit is accepted but translation stays
                    // flat; guests running identity-mapped are unaffected.
                    tracing::debug!("CP15 MMU enable requested; translation remains flat");
                }
                self.control = value;
                Cp15Effect::None
            }
            (5, _, _) => {
                self.fsr = value;
                Cp15Effect::None
            }
            (6, _, _) => {
                self.far = value;
                Cp15Effect::None
            }
            (7, 0, 4) | (15, 8, 2) => Cp15Effect::WaitForInterrupt,
            // Cache/TLB maintenance: accepted, nothing to maintain.
            (7 | 8, _, _) => Cp15Effect::None,
            _ => {
                tracing::debug!("unmodeled CP15 write c{crn}, c{crm}, {opcode2} = 0x{value:08X}");
                Cp15Effect::None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::translate::{AccessWidth, Fault};
    use pretty_assertions::assert_eq;

    #[test]
    fn control_bits() {
        let mut cp15 = Cp15::default();
        assert!(!cp15.alignment_check());
        assert!(!cp15.high_vectors());

        cp15.write_register(1, 0, 0, 1 << 1);
        assert!(cp15.alignment_check());

        cp15.write_register(1, 0, 0, 1 << 13);
        assert!(cp15.high_vectors());
        assert!(!cp15.alignment_check());
    }

    #[test]
    fn id_register_is_read_only() {
        let cp15 = Cp15::default();
        assert_eq!(cp15.read_register(0, 0, 0), ID_REGISTER);
    }

    #[test]
    fn data_fault_recording() {
        let mut cp15 = Cp15::default();
        cp15.record_data_fault(Fault {
            address: 0xC000_0002,
            width: AccessWidth::Word,
        });
        assert_eq!(cp15.read_register(5, 0, 0), FSR_ALIGNMENT);
        assert_eq!(cp15.read_register(6, 0, 0), 0xC000_0002);
    }

    #[test]
    fn wait_for_interrupt_ops() {
        let mut cp15 = Cp15::default();
        assert_eq!(
            cp15.write_register(15, 8, 2, 0),
            Cp15Effect::WaitForInterrupt
        );
        assert_eq!(
            cp15.write_register(7, 0, 4, 0),
            Cp15Effect::WaitForInterrupt
        );
        assert_eq!(cp15.write_register(7, 6, 0, 0), Cp15Effect::None);
    }
}
