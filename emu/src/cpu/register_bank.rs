//! Banked register storage for the CPU modes.
//!
//! Each exception mode owns a private R13 (SP) and R14 (LR) plus a SPSR;
//! FIQ additionally banks R8-R12. User and System share one bank and have
//! no SPSR. The bank is pure storage: the swap itself is driven by
//! `Core::change_reg_bank`.

use serde::{Deserialize, Serialize};

use crate::cpu::modes::Mode;
use crate::cpu::psr::Psr;
use crate::cpu::registers::Registers;

/// Storage for registers swapped out of the current view on mode changes.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RegisterBank {
    // Shared (User/System) bank. R8-R12 live here whenever FIQ has its own
    // copies swapped in.
    r8_usr: u32,
    r9_usr: u32,
    r10_usr: u32,
    r11_usr: u32,
    r12_usr: u32,
    r13_usr: u32,
    r14_usr: u32,

    r8_fiq: u32,
    r9_fiq: u32,
    r10_fiq: u32,
    r11_fiq: u32,
    r12_fiq: u32,
    r13_fiq: u32,
    r14_fiq: u32,

    r13_svc: u32,
    r14_svc: u32,

    r13_abt: u32,
    r14_abt: u32,

    r13_irq: u32,
    r14_irq: u32,

    r13_und: u32,
    r14_und: u32,

    spsr_fiq: Psr,
    spsr_svc: Psr,
    spsr_abt: Psr,
    spsr_irq: Psr,
    spsr_und: Psr,
}

impl RegisterBank {
    /// Saves the banked portion of the current view into `mode`'s slots.
    pub fn save_current(&mut self, mode: Mode, regs: &Registers) {
        if mode == Mode::Fiq {
            self.r8_fiq = regs.register_at(8);
            self.r9_fiq = regs.register_at(9);
            self.r10_fiq = regs.register_at(10);
            self.r11_fiq = regs.register_at(11);
            self.r12_fiq = regs.register_at(12);
        } else {
            self.r8_usr = regs.register_at(8);
            self.r9_usr = regs.register_at(9);
            self.r10_usr = regs.register_at(10);
            self.r11_usr = regs.register_at(11);
            self.r12_usr = regs.register_at(12);
        }

        let (r13, r14) = self.sp_lr_slots_mut(mode);
        *r13 = regs.register_at(13);
        *r14 = regs.register_at(14);
    }

    /// Loads `mode`'s slots into the current view.
    pub fn load_into(&self, mode: Mode, regs: &mut Registers) {
        if mode == Mode::Fiq {
            regs.set_register_at(8, self.r8_fiq);
            regs.set_register_at(9, self.r9_fiq);
            regs.set_register_at(10, self.r10_fiq);
            regs.set_register_at(11, self.r11_fiq);
            regs.set_register_at(12, self.r12_fiq);
        } else {
            regs.set_register_at(8, self.r8_usr);
            regs.set_register_at(9, self.r9_usr);
            regs.set_register_at(10, self.r10_usr);
            regs.set_register_at(11, self.r11_usr);
            regs.set_register_at(12, self.r12_usr);
        }

        let (r13, r14) = self.sp_lr_slots(mode);
        regs.set_register_at(13, r13);
        regs.set_register_at(14, r14);
    }

    /// The User-bank value of a register while a privileged bank is live.
    /// Used by LDM/STM with the S bit and R15 not in the list.
    #[must_use]
    pub fn user_register(&self, current_mode: Mode, reg: u32, regs: &Registers) -> u32 {
        match (reg, current_mode) {
            (8, Mode::Fiq) => self.r8_usr,
            (9, Mode::Fiq) => self.r9_usr,
            (10, Mode::Fiq) => self.r10_usr,
            (11, Mode::Fiq) => self.r11_usr,
            (12, Mode::Fiq) => self.r12_usr,
            (13, m) if m != Mode::User && m != Mode::System => self.r13_usr,
            (14, m) if m != Mode::User && m != Mode::System => self.r14_usr,
            _ => regs.register_at(reg),
        }
    }

    /// Writes the User-bank value of a register while a privileged bank is
    /// live. Counterpart of [`Self::user_register`].
    pub fn set_user_register(
        &mut self,
        current_mode: Mode,
        reg: u32,
        value: u32,
        regs: &mut Registers,
    ) {
        match (reg, current_mode) {
            (8, Mode::Fiq) => self.r8_usr = value,
            (9, Mode::Fiq) => self.r9_usr = value,
            (10, Mode::Fiq) => self.r10_usr = value,
            (11, Mode::Fiq) => self.r11_usr = value,
            (12, Mode::Fiq) => self.r12_usr = value,
            (13, m) if m != Mode::User && m != Mode::System => self.r13_usr = value,
            (14, m) if m != Mode::User && m != Mode::System => self.r14_usr = value,
            _ => regs.set_register_at(reg, value),
        }
    }

    #[must_use]
    pub fn spsr(&self, mode: Mode) -> Psr {
        match mode {
            Mode::User | Mode::System => {
                panic!("User and System mode have no SPSR")
            }
            Mode::Fiq => self.spsr_fiq,
            Mode::Irq => self.spsr_irq,
            Mode::Abort => self.spsr_abt,
            Mode::Supervisor => self.spsr_svc,
            Mode::Undefined => self.spsr_und,
        }
    }

    pub fn spsr_mut(&mut self, mode: Mode) -> &mut Psr {
        match mode {
            Mode::User | Mode::System => {
                panic!("User and System mode have no SPSR")
            }
            Mode::Fiq => &mut self.spsr_fiq,
            Mode::Irq => &mut self.spsr_irq,
            Mode::Abort => &mut self.spsr_abt,
            Mode::Supervisor => &mut self.spsr_svc,
            Mode::Undefined => &mut self.spsr_und,
        }
    }

    fn sp_lr_slots(&self, mode: Mode) -> (u32, u32) {
        match mode {
            Mode::User | Mode::System => (self.r13_usr, self.r14_usr),
            Mode::Fiq => (self.r13_fiq, self.r14_fiq),
            Mode::Irq => (self.r13_irq, self.r14_irq),
            Mode::Supervisor => (self.r13_svc, self.r14_svc),
            Mode::Abort => (self.r13_abt, self.r14_abt),
            Mode::Undefined => (self.r13_und, self.r14_und),
        }
    }

    fn sp_lr_slots_mut(&mut self, mode: Mode) -> (&mut u32, &mut u32) {
        match mode {
            Mode::User | Mode::System => (&mut self.r13_usr, &mut self.r14_usr),
            Mode::Fiq => (&mut self.r13_fiq, &mut self.r14_fiq),
            Mode::Irq => (&mut self.r13_irq, &mut self.r14_irq),
            Mode::Supervisor => (&mut self.r13_svc, &mut self.r14_svc),
            Mode::Abort => (&mut self.r13_abt, &mut self.r14_abt),
            Mode::Undefined => (&mut self.r13_und, &mut self.r14_und),
        }
    }
}
