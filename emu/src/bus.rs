//! Physical memory map and peripheral registry.
//!
//! The map mirrors a small StrongARM development board: boot ROM at the
//! bottom of the address space, a peripheral window in the upper half and
//! DRAM at 0xC0000000. Only DRAM-resident code is eligible for the block
//! cache, so the bus is also the authority on "is this address RAM".

use crate::memory::ram::Ram;
use crate::memory::translate::AccessWidth;

pub const ROM_BASE: u32 = 0x0000_0000;
pub const ROM_SIZE: u32 = 8 * 1024 * 1024;

pub const PERIPHERAL_BASE: u32 = 0x8000_0000;
pub const PERIPHERAL_SIZE: u32 = 0x1000_0000;

pub const RAM_BASE: u32 = 0xC000_0000;
pub const DEFAULT_RAM_SIZE: u32 = 16 * 1024 * 1024;

/// A memory-mapped device.
///
/// `tick` is called once per scheduler iteration with the number of
/// instructions retired since the previous call, after those instructions
/// have fully executed. Interrupt lines are level-sensitive: a pending
/// line stays asserted until the device deasserts it.
pub trait Peripheral {
    fn get_data(&mut self, address: u32, width: AccessWidth) -> u32;
    fn put_data(&mut self, address: u32, width: AccessWidth, value: u32);
    fn tick(&mut self, instructions: u64);
    fn has_pending_irq(&self) -> bool;
    fn has_pending_fiq(&self) -> bool;
}

struct MappedPeripheral {
    start: u32,
    end: u32,
    device: Box<dyn Peripheral>,
}

pub struct Bus {
    rom: Ram,
    ram: Ram,
    peripherals: Vec<MappedPeripheral>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_RAM_SIZE as usize)
    }
}

impl Bus {
    #[must_use]
    pub fn new(ram_size: usize) -> Self {
        Self {
            rom: Ram::new(ROM_SIZE as usize),
            ram: Ram::new(ram_size),
            peripherals: Vec::new(),
        }
    }

    /// Maps `device` over `[start, start + size)` inside the peripheral
    /// window. Later registrations win on overlap.
    pub fn map_peripheral(&mut self, start: u32, size: u32, device: Box<dyn Peripheral>) {
        self.peripherals.insert(
            0,
            MappedPeripheral {
                start,
                end: start + size,
                device,
            },
        );
    }

    pub fn load_rom(&mut self, image: &[u8]) {
        self.rom.load(0, image);
    }

    pub fn load_ram(&mut self, offset: usize, image: &[u8]) {
        self.ram.load(offset, image);
    }

    /// Whether `paddr` falls in DRAM, i.e. may hold cacheable code.
    #[must_use]
    pub fn is_ram(&self, paddr: u32) -> bool {
        paddr >= RAM_BASE && (paddr - RAM_BASE) < self.ram.len() as u32
    }

    #[must_use]
    fn is_rom(&self, paddr: u32) -> bool {
        (ROM_BASE..ROM_BASE + ROM_SIZE).contains(&paddr)
    }

    pub fn read(&mut self, paddr: u32, width: AccessWidth) -> u32 {
        if self.is_ram(paddr) {
            let offset = (paddr - RAM_BASE) as usize;
            return match width {
                AccessWidth::Byte => u32::from(self.ram.read_byte(offset)),
                AccessWidth::Half => u32::from(self.ram.read_half(offset)),
                AccessWidth::Word => self.ram.read_word(offset),
            };
        }
        if self.is_rom(paddr) {
            let offset = (paddr - ROM_BASE) as usize;
            return match width {
                AccessWidth::Byte => u32::from(self.rom.read_byte(offset)),
                AccessWidth::Half => u32::from(self.rom.read_half(offset)),
                AccessWidth::Word => self.rom.read_word(offset),
            };
        }
        if let Some(mapped) = self
            .peripherals
            .iter_mut()
            .find(|m| (m.start..m.end).contains(&paddr))
        {
            return mapped.device.get_data(paddr, width);
        }

        tracing::warn!("read on unused memory 0x{paddr:08X}");
        0
    }

    pub fn write(&mut self, paddr: u32, width: AccessWidth, value: u32) {
        if self.is_ram(paddr) {
            let offset = (paddr - RAM_BASE) as usize;
            match width {
                AccessWidth::Byte => self.ram.write_byte(offset, value as u8),
                AccessWidth::Half => self.ram.write_half(offset, value as u16),
                AccessWidth::Word => self.ram.write_word(offset, value),
            }
            return;
        }
        if self.is_rom(paddr) {
            tracing::warn!("write on ROM 0x{paddr:08X}, ignored");
            return;
        }
        if let Some(mapped) = self
            .peripherals
            .iter_mut()
            .find(|m| (m.start..m.end).contains(&paddr))
        {
            mapped.device.put_data(paddr, width, value);
            return;
        }

        tracing::warn!("write on unused memory 0x{paddr:08X}");
    }

    /// Advances device time by `instructions` retired guest instructions.
    pub fn tick(&mut self, instructions: u64) {
        if instructions == 0 {
            return;
        }
        for mapped in &mut self.peripherals {
            mapped.device.tick(instructions);
        }
    }

    #[must_use]
    pub fn pending_irq(&self) -> bool {
        self.peripherals.iter().any(|m| m.device.has_pending_irq())
    }

    #[must_use]
    pub fn pending_fiq(&self) -> bool {
        self.peripherals.iter().any(|m| m.device.has_pending_fiq())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct CountdownTimer {
        remaining: u64,
        irq: bool,
    }

    impl Peripheral for CountdownTimer {
        fn get_data(&mut self, _address: u32, _width: AccessWidth) -> u32 {
            self.remaining as u32
        }

        fn put_data(&mut self, _address: u32, _width: AccessWidth, value: u32) {
            self.remaining = u64::from(value);
            self.irq = false;
        }

        fn tick(&mut self, instructions: u64) {
            if self.remaining > 0 {
                self.remaining = self.remaining.saturating_sub(instructions);
                if self.remaining == 0 {
                    self.irq = true;
                }
            }
        }

        fn has_pending_irq(&self) -> bool {
            self.irq
        }

        fn has_pending_fiq(&self) -> bool {
            false
        }
    }

    #[test]
    fn ram_read_write_widths() {
        let mut bus = Bus::new(4096);
        bus.write(RAM_BASE, AccessWidth::Word, 0xAABB_CCDD);
        assert_eq!(bus.read(RAM_BASE, AccessWidth::Word), 0xAABB_CCDD);
        assert_eq!(bus.read(RAM_BASE, AccessWidth::Half), 0xCCDD);
        assert_eq!(bus.read(RAM_BASE + 3, AccessWidth::Byte), 0xAA);
    }

    #[test]
    fn rom_is_read_only() {
        let mut bus = Bus::new(4096);
        bus.load_rom(&[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(bus.read(0, AccessWidth::Word), 0xDEAD_BEEF);
        bus.write(0, AccessWidth::Word, 0);
        assert_eq!(bus.read(0, AccessWidth::Word), 0xDEAD_BEEF);
    }

    #[test]
    fn unmapped_reads_as_zero() {
        let mut bus = Bus::new(4096);
        assert_eq!(bus.read(0x4000_0000, AccessWidth::Word), 0);
    }

    #[test]
    fn only_dram_is_ram() {
        let bus = Bus::new(4096);
        assert!(bus.is_ram(RAM_BASE));
        assert!(bus.is_ram(RAM_BASE + 4095));
        assert!(!bus.is_ram(RAM_BASE + 4096));
        assert!(!bus.is_ram(0));
        assert!(!bus.is_ram(PERIPHERAL_BASE));
    }

    #[test]
    fn timer_raises_irq_after_ticks() {
        let mut bus = Bus::new(4096);
        bus.map_peripheral(
            PERIPHERAL_BASE,
            16,
            Box::new(CountdownTimer {
                remaining: 10,
                irq: false,
            }),
        );
        assert!(!bus.pending_irq());
        bus.tick(4);
        assert!(!bus.pending_irq());
        bus.tick(6);
        assert!(bus.pending_irq());
        // acknowledging by reprogramming clears the line
        bus.write(PERIPHERAL_BASE, AccessWidth::Word, 100);
        assert!(!bus.pending_irq());
    }
}
