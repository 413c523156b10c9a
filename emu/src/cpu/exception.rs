//! Exception kinds and their vector-dispatch parameters.

use serde::{Deserialize, Serialize};

use crate::cpu::modes::Mode;

/// High vector table base, selected by the CP15 V bit.
pub const VECTOR_BASE_HIGH: u32 = 0xFFFF_0000;

/// Low vector table base (power-on default).
pub const VECTOR_BASE_LOW: u32 = 0x0000_0000;

/// The six exceptions this core delivers (reset is handled by
/// `Core::reset` directly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exception {
    Undefined,
    SoftwareInterrupt,
    PrefetchAbort,
    DataAbort,
    Irq,
    Fiq,
}

impl Exception {
    /// Mode entered when the exception is taken.
    #[must_use]
    pub const fn target_mode(self) -> Mode {
        match self {
            Self::Undefined => Mode::Undefined,
            Self::SoftwareInterrupt => Mode::Supervisor,
            Self::PrefetchAbort | Self::DataAbort => Mode::Abort,
            Self::Irq => Mode::Irq,
            Self::Fiq => Mode::Fiq,
        }
    }

    /// Offset of the handler from the vector table base.
    #[must_use]
    pub const fn vector_offset(self) -> u32 {
        match self {
            Self::Undefined => 0x04,
            Self::SoftwareInterrupt => 0x08,
            Self::PrefetchAbort => 0x0C,
            Self::DataAbort => 0x10,
            Self::Irq => 0x18,
            Self::Fiq => 0x1C,
        }
    }

    /// Distance from the faulting PC to the value saved in the banked LR,
    /// chosen so the architectural return idioms work unchanged.
    #[must_use]
    pub const fn return_offset(self) -> u32 {
        match self {
            Self::DataAbort => 8,
            _ => 4,
        }
    }

    /// FIQ entry masks FIQs as well as IRQs.
    #[must_use]
    pub const fn disables_fiq(self) -> bool {
        matches!(self, Self::Fiq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn vector_layout() {
        // The table is contiguous; 0x14 is the reserved slot.
        assert_eq!(Exception::Undefined.vector_offset(), 0x04);
        assert_eq!(Exception::SoftwareInterrupt.vector_offset(), 0x08);
        assert_eq!(Exception::PrefetchAbort.vector_offset(), 0x0C);
        assert_eq!(Exception::DataAbort.vector_offset(), 0x10);
        assert_eq!(Exception::Irq.vector_offset(), 0x18);
        assert_eq!(Exception::Fiq.vector_offset(), 0x1C);
    }

    #[test]
    fn return_offsets() {
        assert_eq!(Exception::SoftwareInterrupt.return_offset(), 4);
        assert_eq!(Exception::Irq.return_offset(), 4);
        assert_eq!(Exception::DataAbort.return_offset(), 8);
    }

    #[test]
    fn only_fiq_masks_fiq() {
        assert!(Exception::Fiq.disables_fiq());
        assert!(!Exception::Irq.disables_fiq());
        assert!(!Exception::DataAbort.disables_fiq());
    }
}
