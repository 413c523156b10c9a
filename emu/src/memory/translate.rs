//! Address translation and alignment enforcement.
//!
//! Translation is flat: every virtual address maps to the identical
//! physical address. What this layer actually arbitrates is alignment.
//! With checking disabled (the power-on state) misaligned word and
//! halfword addresses are silently forced down to the natural boundary;
//! with the CP15 A bit set they fault instead, and the fault is produced
//! here before any register or memory state has changed.

use serde::{Deserialize, Serialize};

/// Code pages are tracked at this granularity by the block cache and the
/// write barrier.
pub const PAGE_SIZE: u32 = 4096;

/// Page base of a physical address.
#[must_use]
pub const fn page_of(address: u32) -> u32 {
    address & !(PAGE_SIZE - 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessWidth {
    Byte,
    Half,
    Word,
}

impl AccessWidth {
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Half => 2,
            Self::Word => 4,
        }
    }

    /// Low address bits that must be clear for a natural access.
    const fn alignment_mask(self) -> u32 {
        self.bytes() - 1
    }
}

/// Why the address is being touched; decides which abort a fault raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Fetch,
    Load,
    Store,
}

/// A rejected access. Carries what CP15 needs for its fault registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub address: u32,
    pub width: AccessWidth,
}

/// Maps a virtual address to physical and applies the alignment policy.
///
/// # Errors
///
/// Returns the [`Fault`] when the address is misaligned for `width` and
/// alignment checking is enabled.
pub fn translate_and_check(
    vaddr: u32,
    width: AccessWidth,
    kind: AccessKind,
    alignment_check: bool,
) -> Result<u32, Fault> {
    let mask = width.alignment_mask();
    if vaddr & mask == 0 {
        return Ok(vaddr);
    }

    if alignment_check {
        tracing::debug!("alignment fault: {kind:?} {width:?} at 0x{vaddr:08X}");
        return Err(Fault {
            address: vaddr,
            width,
        });
    }

    Ok(vaddr & !mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn aligned_addresses_pass_through() {
        assert_eq!(
            translate_and_check(0xC000_0004, AccessWidth::Word, AccessKind::Load, true),
            Ok(0xC000_0004)
        );
        assert_eq!(
            translate_and_check(0xC000_0002, AccessWidth::Half, AccessKind::Store, true),
            Ok(0xC000_0002)
        );
    }

    #[test]
    fn byte_accesses_never_fault() {
        assert_eq!(
            translate_and_check(0xC000_0003, AccessWidth::Byte, AccessKind::Load, true),
            Ok(0xC000_0003)
        );
    }

    #[test]
    fn misaligned_masks_down_when_unchecked() {
        assert_eq!(
            translate_and_check(0xC000_0006, AccessWidth::Word, AccessKind::Load, false),
            Ok(0xC000_0004)
        );
        assert_eq!(
            translate_and_check(0xC000_0003, AccessWidth::Half, AccessKind::Load, false),
            Ok(0xC000_0002)
        );
    }

    #[test]
    fn misaligned_faults_when_checked() {
        let fault = translate_and_check(0xC000_0006, AccessWidth::Word, AccessKind::Store, true)
            .unwrap_err();
        assert_eq!(fault.address, 0xC000_0006);
        assert_eq!(fault.width, AccessWidth::Word);
    }

    #[test]
    fn page_arithmetic() {
        assert_eq!(page_of(0xC000_0FFF), 0xC000_0000);
        assert_eq!(page_of(0xC000_1000), 0xC000_1000);
    }
}
