use serde::{Deserialize, Serialize};

/// CPU operating modes, as encoded in PSR bits 4-0.
///
/// User and System share one register bank; FIQ, IRQ, Supervisor, Abort and
/// Undefined each own a private SP/LR (plus R8-R12 for FIQ) and a SPSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// The normal program execution state.
    User = 0b10000,

    /// Fast interrupt, with its own R8-R14 for low-latency handlers.
    Fiq = 0b10001,

    /// General-purpose interrupt handling.
    Irq = 0b10010,

    /// Protected mode for the operating system. Entered on reset and SWI.
    Supervisor = 0b10011,

    /// Entered after a data or instruction prefetch abort.
    Abort = 0b10111,

    /// Entered when an undefined instruction is executed.
    Undefined = 0b11011,

    /// A privileged mode sharing the User register bank.
    System = 0b11111,
}

impl Mode {
    /// Whether this mode has a private SPSR. User and System do not.
    #[must_use]
    pub const fn has_spsr(self) -> bool {
        !matches!(self, Self::User | Self::System)
    }
}

impl From<Mode> for u32 {
    fn from(m: Mode) -> Self {
        m as Self
    }
}

impl TryFrom<u32> for Mode {
    type Error = InvalidModeBits;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        match n {
            0b10000 => Ok(Self::User),
            0b10001 => Ok(Self::Fiq),
            0b10010 => Ok(Self::Irq),
            0b10011 => Ok(Self::Supervisor),
            0b10111 => Ok(Self::Abort),
            0b11011 => Ok(Self::Undefined),
            0b11111 => Ok(Self::System),
            _ => Err(InvalidModeBits(n)),
        }
    }
}

/// Mode bit pattern with no architectural meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidModeBits(pub u32);
