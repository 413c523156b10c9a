//! The CPU core and its adaptive scheduler.
//!
//! [`Core::step`] is the outer loop: translate the PC, execute through
//! whichever tier the chunk at that address has earned, advance device
//! time by the instructions actually retired, then sample interrupt
//! lines. R15 always holds the address of the instruction being
//! executed; the pipeline offsets guests observe are applied at operand
//! read time by the handlers.

use std::rc::Rc;

use crate::bus::Bus;
use crate::cpu::cp15::Cp15;
use crate::cpu::exception::{Exception, VECTOR_BASE_HIGH, VECTOR_BASE_LOW};
use crate::cpu::instruction::Opcode;
use crate::cpu::modes::Mode;
use crate::cpu::operations::{self, StepEvent};
use crate::cpu::psr::Psr;
use crate::cpu::register_bank::RegisterBank;
use crate::cpu::registers::{REG_LR, Registers};
use crate::jit::ExecResult;
use crate::jit::barrier::{SoftBarrier, WriteBarrier};
use crate::jit::cache::BlockCache;
use crate::jit::chunk::{
    Chunk, ChunkCode, ChunkStatus, GENERATE_DT_BUFFER_THRESHOLD, GENERATE_THREADED_CODE_THRESHOLD,
};
use crate::jit::native::{DtBuffer, NativeCodeInvoker, PortableInvoker};
use crate::jit::threaded::ThreadedCode;
use crate::memory::translate::{AccessKind, AccessWidth, page_of, translate_and_check};

/// Upper bound on instructions retired by a single chunk invocation.
/// A chunk spinning on internal branches is forced back to the
/// scheduler here so peripherals keep ticking.
pub const RETIRE_CAP: u64 = 4096;

pub struct Core {
    pub registers: Registers,
    pub cpsr: Psr,
    pub register_bank: RegisterBank,
    pub cp15: Cp15,
    pub bus: Bus,

    idle: bool,
    cache: BlockCache,
    barrier: Box<dyn WriteBarrier>,
    invoker: Rc<dyn NativeCodeInvoker>,

    /// Instructions retired by the current `step`.
    retired: u64,
}

impl Core {
    #[must_use]
    pub fn new(bus: Bus) -> Self {
        let mut cpsr = Psr::from(Mode::Supervisor);
        cpsr.set_irq_disable(true);
        cpsr.set_fiq_disable(true);
        Self {
            registers: Registers::default(),
            cpsr,
            register_bank: RegisterBank::default(),
            cp15: Cp15::default(),
            bus,
            idle: false,
            cache: BlockCache::default(),
            barrier: Box::new(SoftBarrier::default()),
            invoker: Rc::new(PortableInvoker),
            retired: 0,
        }
    }

    /// Replaces the executor for dynamically translated chunks.
    pub fn set_native_invoker(&mut self, invoker: Rc<dyn NativeCodeInvoker>) {
        self.invoker = invoker;
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn enter_idle(&mut self) {
        self.idle = true;
    }

    /// One scheduler iteration: execute at the current PC (a single
    /// instruction or a whole chunk), tick the bus by what retired, then
    /// sample interrupt lines.
    pub fn step(&mut self) {
        if self.idle {
            self.bus.tick(1);
            self.sample_interrupts();
            return;
        }

        self.retired = 0;
        let pc = self.registers.program_counter() & !0b11;
        let result = match translate_and_check(
            pc,
            AccessWidth::Word,
            AccessKind::Fetch,
            self.cp15.alignment_check(),
        ) {
            Ok(paddr) if self.bus.is_ram(paddr) => self.run_cached(paddr),
            Ok(paddr) => self.interpret_at(paddr),
            Err(_) => ExecResult::Exception(Exception::PrefetchAbort),
        };

        self.bus.tick(self.retired);

        match result {
            ExecResult::Exception(exception) => self.raise_exception(exception),
            ExecResult::IoFiq => self.raise_exception(Exception::Fiq),
            ExecResult::IoIrq => self.raise_exception(Exception::Irq),
            ExecResult::Normal | ExecResult::ModifyPc | ExecResult::ChunkDisappear => {
                self.sample_interrupts();
            }
            // never escapes the executors
            ExecResult::ContinueInChunk => unreachable!("ContinueInChunk leaked to the scheduler"),
        }
    }

    pub fn run(&mut self, steps: u64) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Drives the scheduler until the process exits.
    pub fn run_forever(&mut self) -> ! {
        loop {
            self.step();
        }
    }

    /// Back to power-on state: Supervisor mode, IRQ/FIQ masked, empty
    /// block cache. The PC lands on the reset vector selected by the
    /// CP15 V bit, which survives the reset.
    pub fn reset(&mut self) {
        self.registers = Registers::default();
        self.register_bank = RegisterBank::default();
        self.cpsr = Psr::from(Mode::Supervisor);
        self.cpsr.set_irq_disable(true);
        self.cpsr.set_fiq_disable(true);
        self.idle = false;
        self.cache.flush_all();
        self.barrier.unprotect_all();
        let base = if self.cp15.high_vectors() {
            VECTOR_BASE_HIGH
        } else {
            VECTOR_BASE_LOW
        };
        self.registers.set_program_counter(base);
    }

    /// FIQ wins over IRQ; at most one exception per sample.
    fn sample_interrupts(&mut self) {
        if self.bus.pending_fiq() {
            self.idle = false;
            if !self.cpsr.fiq_disable() {
                self.raise_exception(Exception::Fiq);
                return;
            }
        }
        if self.bus.pending_irq() {
            self.idle = false;
            if !self.cpsr.irq_disable() {
                self.raise_exception(Exception::Irq);
            }
        }
    }

    // ------------------------------------------------------------------
    // Tiered execution
    // ------------------------------------------------------------------

    fn run_cached(&mut self, paddr: u32) -> ExecResult {
        let chunk = match self.cache.get(paddr) {
            Some(chunk) => chunk,
            None => {
                let chunk = self.build_chunk(paddr);
                self.cache.insert(Rc::clone(&chunk));
                self.barrier.protect(paddr);
                chunk
            }
        };

        let hits = chunk.record_hit();
        match chunk.status() {
            ChunkStatus::Uncompiled if hits >= GENERATE_THREADED_CODE_THRESHOLD => {
                tracing::debug!("promoting chunk 0x{:08X} to threaded code", chunk.start());
                *chunk.code().borrow_mut() =
                    ChunkCode::Threaded(ThreadedCode::generate(chunk.opcodes()));
                self.execute_chunk(&chunk)
            }
            ChunkStatus::Uncompiled => self.run_uncompiled(&chunk),
            ChunkStatus::Threaded => {
                if hits >= GENERATE_DT_BUFFER_THRESHOLD {
                    tracing::debug!("promoting chunk 0x{:08X} to translated code", chunk.start());
                    *chunk.code().borrow_mut() =
                        ChunkCode::Native(DtBuffer::generate(chunk.start(), chunk.opcodes()));
                }
                self.execute_chunk(&chunk)
            }
            ChunkStatus::Native => self.execute_chunk(&chunk),
        }
    }

    /// Decodes a basic block starting at `start`. Stops at the first
    /// control-flow instruction or the page boundary, whichever comes
    /// first, so a chunk never spans two pages.
    fn build_chunk(&mut self, start: u32) -> Rc<Chunk> {
        let page_size = self.barrier.page_size();
        let page_end = (start & !(page_size - 1)) + page_size;
        let mut opcodes = Vec::new();
        let mut address = start;
        loop {
            let opcode = Opcode::from(self.bus.read(address, AccessWidth::Word));
            opcodes.push(opcode);
            address += 4;
            if opcode.ends_basic_block() || address >= page_end {
                break;
            }
        }
        Rc::new(Chunk::new(start, opcodes))
    }

    fn execute_chunk(&mut self, chunk: &Rc<Chunk>) -> ExecResult {
        // The Rc clone in our caller keeps an invalidated chunk alive
        // until this frame unwinds, so eviction during execution is safe.
        let code = chunk.code().borrow();
        match &*code {
            ChunkCode::Uncompiled => unreachable!("executing a chunk with no compiled code"),
            ChunkCode::Threaded(threaded) => self.run_threaded(chunk, threaded),
            ChunkCode::Native(buffer) => {
                let invoker = Rc::clone(&self.invoker);
                invoker.invoke(self, chunk, buffer)
            }
        }
    }

    /// Executes a single instruction at `paddr` through the shared
    /// handler table.
    fn interpret_at(&mut self, paddr: u32) -> ExecResult {
        let opcode = Opcode::from(self.bus.read(paddr, AccessWidth::Word));
        self.retired += 1;
        if !self.cpsr.can_execute(opcode.condition) {
            self.registers.advance_program_counter(4);
            return ExecResult::Normal;
        }
        match operations::handler_for(opcode)(self, opcode) {
            StepEvent::Advance => {
                self.registers.advance_program_counter(4);
                ExecResult::Normal
            }
            StepEvent::Branch => ExecResult::ModifyPc,
            StepEvent::Trap(exception) => ExecResult::Exception(exception),
        }
    }

    /// Interprets a chunk below the threaded threshold, whole. Running
    /// the block to its exit keeps the PC on block entry points between
    /// scheduler steps, so the cache only ever sees block starts and
    /// never builds a chunk for every address the PC walks through.
    fn run_uncompiled(&mut self, chunk: &Chunk) -> ExecResult {
        let Some(mut index) = chunk.index_of(self.registers.program_counter()) else {
            return ExecResult::ModifyPc;
        };
        loop {
            if index >= chunk.opcodes().len() {
                return ExecResult::Normal;
            }
            let opcode = chunk.opcodes()[index];
            let event = if self.cpsr.can_execute(opcode.condition) {
                operations::handler_for(opcode)(self, opcode)
            } else {
                StepEvent::Advance
            };
            match self.chunk_epilogue(chunk, event, None) {
                ExecResult::ContinueInChunk => {
                    match chunk.index_of(self.registers.program_counter()) {
                        Some(target) => index = target,
                        None => return ExecResult::ModifyPc,
                    }
                }
                ExecResult::Normal if index + 1 < chunk.opcodes().len() => index += 1,
                other => return other,
            }
        }
    }

    fn run_threaded(&mut self, chunk: &Chunk, code: &ThreadedCode) -> ExecResult {
        let Some(mut index) = chunk.index_of(self.registers.program_counter()) else {
            return ExecResult::ModifyPc;
        };
        loop {
            if index >= code.ops.len() {
                return ExecResult::Normal;
            }
            let slot = &code.ops[index];
            let event = if self.cpsr.can_execute(slot.opcode.condition) {
                (slot.handler)(self, slot.opcode)
            } else {
                StepEvent::Advance
            };
            match self.chunk_epilogue(chunk, event, None) {
                ExecResult::ContinueInChunk => {
                    match chunk.index_of(self.registers.program_counter()) {
                        Some(target) => index = target,
                        None => return ExecResult::ModifyPc,
                    }
                }
                ExecResult::Normal if index + 1 < code.ops.len() => index += 1,
                other => return other,
            }
        }
    }

    pub(crate) fn run_dt_buffer(&mut self, chunk: &Chunk, buffer: &DtBuffer) -> ExecResult {
        let Some(mut index) = chunk.index_of(self.registers.program_counter()) else {
            return ExecResult::ModifyPc;
        };
        loop {
            if index >= buffer.ops.len() {
                return ExecResult::Normal;
            }
            let slot = &buffer.ops[index];
            let event = if self.cpsr.can_execute(slot.opcode.condition) {
                (slot.handler)(self, slot.opcode)
            } else {
                StepEvent::Advance
            };
            match self.chunk_epilogue(chunk, event, slot.local_target) {
                ExecResult::ContinueInChunk => {
                    // target pre-resolved at translation time where static
                    match slot
                        .local_target
                        .or_else(|| chunk.index_of(self.registers.program_counter()))
                    {
                        Some(target) => index = target,
                        None => return ExecResult::ModifyPc,
                    }
                }
                ExecResult::Normal if index + 1 < buffer.ops.len() => index += 1,
                other => return other,
            }
        }
    }

    /// Common bookkeeping after one in-chunk instruction: retire
    /// accounting, invalidation, the retire cap and interrupt lines.
    fn chunk_epilogue(
        &mut self,
        chunk: &Chunk,
        event: StepEvent,
        local_target: Option<usize>,
    ) -> ExecResult {
        self.retired += 1;

        let result = match event {
            StepEvent::Trap(exception) => return ExecResult::Exception(exception),
            StepEvent::Advance => {
                self.registers.advance_program_counter(4);
                ExecResult::Normal
            }
            StepEvent::Branch => {
                let inside = local_target.is_some()
                    || chunk
                        .index_of(self.registers.program_counter())
                        .is_some();
                if inside {
                    ExecResult::ContinueInChunk
                } else {
                    ExecResult::ModifyPc
                }
            }
        };

        if chunk.is_invalidated() {
            return ExecResult::ChunkDisappear;
        }
        if self.retired >= RETIRE_CAP {
            return ExecResult::ModifyPc;
        }
        if self.bus.pending_fiq() && !self.cpsr.fiq_disable() {
            return ExecResult::IoFiq;
        }
        if self.bus.pending_irq() && !self.cpsr.irq_disable() {
            return ExecResult::IoIrq;
        }
        result
    }

    // ------------------------------------------------------------------
    // Memory access
    // ------------------------------------------------------------------

    fn translate_data(
        &mut self,
        vaddr: u32,
        width: AccessWidth,
        kind: AccessKind,
    ) -> Result<u32, Exception> {
        translate_and_check(vaddr, width, kind, self.cp15.alignment_check()).map_err(|fault| {
            self.cp15.record_data_fault(fault);
            Exception::DataAbort
        })
    }

    /// Data-side read.
    ///
    /// # Errors
    ///
    /// Returns the data abort for a rejected access; no state other than
    /// the CP15 fault registers has changed when it does.
    pub fn read_data(&mut self, vaddr: u32, width: AccessWidth) -> Result<u32, Exception> {
        let paddr = self.translate_data(vaddr, width, AccessKind::Load)?;
        Ok(self.bus.read(paddr, width))
    }

    /// Data-side write, gated by the write barrier: a store into a page
    /// holding cached code flushes that page's chunks before the byte
    /// lands, so stale translations can never execute.
    ///
    /// # Errors
    ///
    /// Returns the data abort for a rejected access.
    pub fn write_data(
        &mut self,
        vaddr: u32,
        width: AccessWidth,
        value: u32,
    ) -> Result<(), Exception> {
        let paddr = self.translate_data(vaddr, width, AccessKind::Store)?;
        if self.barrier.is_protected(paddr) {
            tracing::debug!("code page 0x{:08X} written, flushing", page_of(paddr));
            self.cache.flush_page(paddr);
            self.barrier.unprotect(paddr);
        }
        self.bus.write(paddr, width, value);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Exceptions and mode changes
    // ------------------------------------------------------------------

    /// Takes `exception` now: banks the return state, masks interrupts
    /// and redirects the PC into the vector table.
    pub fn raise_exception(&mut self, exception: Exception) {
        let old_cpsr = self.cpsr;
        let target = exception.target_mode();
        let return_address = self
            .registers
            .program_counter()
            .wrapping_add(exception.return_offset());

        self.change_reg_bank(old_cpsr.mode(), target);
        self.cpsr.set_mode(target);
        self.registers.set_register_at(REG_LR, return_address);
        *self.register_bank.spsr_mut(target) = old_cpsr;

        self.cpsr.set_irq_disable(true);
        if exception.disables_fiq() {
            self.cpsr.set_fiq_disable(true);
        }
        self.cpsr.set_thumb_state(false);

        let base = if self.cp15.high_vectors() {
            VECTOR_BASE_HIGH
        } else {
            VECTOR_BASE_LOW
        };
        self.registers
            .set_program_counter(base + exception.vector_offset());
        self.idle = false;
    }

    /// Installs a whole new CPSR, swapping register banks if the mode
    /// field changed. This core never leaves ARM state.
    pub fn set_cpsr(&mut self, mut new: Psr) {
        if new.thumb_state() {
            tracing::warn!("T bit set in new CPSR; staying in ARM state");
            new.set_thumb_state(false);
        }
        let old_mode = self.cpsr.mode();
        let new_mode = new.mode();
        if old_mode != new_mode {
            self.change_reg_bank(old_mode, new_mode);
        }
        self.cpsr = new;
    }

    /// CPSR = SPSR of the current mode, the tail of every exception
    /// return idiom.
    pub fn restore_cpsr(&mut self) {
        let mode = self.cpsr.mode();
        if mode.has_spsr() {
            let spsr = self.register_bank.spsr(mode);
            self.set_cpsr(spsr);
        } else {
            tracing::warn!("CPSR restore in {mode:?}, which has no SPSR; ignored");
        }
    }

    fn change_reg_bank(&mut self, old: Mode, new: Mode) {
        self.register_bank.save_current(old, &self.registers);
        self.register_bank.load_into(new, &mut self.registers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{PERIPHERAL_BASE, Peripheral, RAM_BASE};
    use crate::memory::translate::PAGE_SIZE;
    use pretty_assertions::assert_eq;

    fn core_with_ram_program(words: &[u32]) -> Core {
        let mut image = Vec::new();
        for word in words {
            image.extend_from_slice(&word.to_le_bytes());
        }
        let mut bus = Bus::new(64 * 1024);
        bus.load_ram(0, &image);
        let mut core = Core::new(bus);
        core.registers.set_program_counter(RAM_BASE);
        core
    }

    fn run_until_pc(core: &mut Core, pc: u32, max_steps: u64) {
        for _ in 0..max_steps {
            if core.registers.program_counter() == pc {
                return;
            }
            core.step();
        }
        panic!(
            "PC 0x{:08X} not reached within {max_steps} steps (at 0x{:08X})",
            pc,
            core.registers.program_counter()
        );
    }

    #[test]
    fn rom_code_is_interpreted_without_caching() {
        let mut bus = Bus::new(4096);
        // MOV R0, #5 ; B .
        bus.load_rom(
            &[0xE3A0_0005u32, 0xEAFF_FFFEu32]
                .iter()
                .flat_map(|w| w.to_le_bytes())
                .collect::<Vec<u8>>(),
        );
        let mut core = Core::new(bus);
        core.step();
        assert_eq!(core.registers.register_at(0), 5);
        assert!(core.cache.get(0).is_none());
    }

    #[test]
    fn countdown_loop_reaches_native_tier() {
        // 0x00 SUBS R1, R1, #1
        // 0x04 BEQ 0x14
        // 0x08 B 0x00
        // 0x14 B 0x14
        let mut core = core_with_ram_program(&[
            0xE251_1001,
            0x0A00_0002,
            0xEAFF_FFFC,
            0xE1A0_0000,
            0xE1A0_0000,
            0xEAFF_FFFE,
        ]);
        core.registers.set_register_at(1, 600);

        run_until_pc(&mut core, RAM_BASE + 0x14, 20_000);
        assert_eq!(core.registers.register_at(1), 0);

        let chunk = core.cache.get(RAM_BASE).unwrap();
        assert_eq!(chunk.status(), ChunkStatus::Native);
        assert!(chunk.hits() >= GENERATE_DT_BUFFER_THRESHOLD);
    }

    #[test]
    fn tight_loop_is_capped_per_invocation() {
        // 0x00 SUBS R1, R1, #1
        // 0x04 BNE 0x00 (branch target inside the chunk)
        let mut core = core_with_ram_program(&[0xE251_1001, 0x1AFF_FFFD, 0xEAFF_FFFE]);
        core.registers.set_register_at(1, 1_000_000);

        // drive the chunk hot
        for _ in 0..100 {
            core.step();
        }
        // align to a chunk entry, then measure one invocation
        while core.registers.program_counter() != RAM_BASE {
            core.step();
        }
        let before = core.registers.register_at(1);
        core.step();
        let decrements = u64::from(before - core.registers.register_at(1));
        assert!(decrements >= RETIRE_CAP / 2 - 1);
        assert!(decrements <= RETIRE_CAP / 2 + 1);
    }

    #[test]
    fn straight_line_code_builds_one_chunk_per_block() {
        // eight ADDs falling into B ., all one basic block
        let mut words = vec![0xE280_0001u32; 8];
        words.push(0xEAFF_FFFE);
        let mut core = core_with_ram_program(&words);

        for _ in 0..8 {
            core.step();
        }
        assert!(core.cache.get(RAM_BASE).is_some());
        // no suffix chunks at the interior addresses the PC passed
        for offset in (4..=0x1C).step_by(4) {
            assert!(core.cache.get(RAM_BASE + offset).is_none());
        }
    }

    #[test]
    fn promotion_happens_exactly_at_threshold() {
        // straight-line chunk exits every invocation, so hits track steps
        // 0x00 ADD R0, R0, #1
        // 0x04 B 0x10
        // 0x10 B 0x00
        let mut core = core_with_ram_program(&[
            0xE280_0001,
            0xEA00_0001,
            0xE1A0_0000,
            0xE1A0_0000,
            0xEAFF_FFFA,
        ]);

        // each loop iteration hits the chunk at 0x00 exactly once
        for _ in 0..1000 {
            core.step();
            let chunk = core.cache.get(RAM_BASE).unwrap();
            if chunk.hits() == GENERATE_THREADED_CODE_THRESHOLD - 1 {
                assert_eq!(chunk.status(), ChunkStatus::Uncompiled);
            }
            if chunk.hits() == GENERATE_THREADED_CODE_THRESHOLD {
                assert_eq!(chunk.status(), ChunkStatus::Threaded);
                return;
            }
        }
        panic!("chunk never reached the promotion threshold");
    }

    #[test]
    fn self_modifying_store_invalidates_page() {
        // 0x00 SUBS R1, R1, #1 ; 0x04 BNE 0x00
        let mut core = core_with_ram_program(&[0xE251_1001, 0x1AFF_FFFD, 0xEAFF_FFFE]);
        core.registers.set_register_at(1, u32::MAX);
        for _ in 0..GENERATE_THREADED_CODE_THRESHOLD * 2 {
            core.step();
        }
        let chunk = core.cache.get(RAM_BASE).unwrap();
        assert_eq!(chunk.status(), ChunkStatus::Threaded);

        // overwrite the BNE with a NOP through the data side
        core.write_data(RAM_BASE + 4, AccessWidth::Word, 0xE1A0_0000)
            .unwrap();
        assert!(chunk.is_invalidated());
        assert!(core.cache.get(RAM_BASE).is_none());

        // a rebuilt chunk starts cold and sees the new code
        core.registers.set_program_counter(RAM_BASE);
        core.step();
        let rebuilt = core.cache.get(RAM_BASE).unwrap();
        assert_eq!(rebuilt.hits(), 1);
        assert_eq!(rebuilt.status(), ChunkStatus::Uncompiled);
        assert_eq!(rebuilt.opcodes()[1].raw, 0xE1A0_0000);
    }

    #[test]
    fn chunks_stop_at_page_boundaries() {
        // fill the tail of page 0 with NOPs so decode would happily run on
        let mut bus = Bus::new(16 * 1024);
        let nops: Vec<u8> = std::iter::repeat_n(0xE1A0_0000u32, 64)
            .flat_map(|w| w.to_le_bytes())
            .collect();
        bus.load_ram((PAGE_SIZE - 32) as usize, &nops);
        let mut core = Core::new(bus);

        let start = RAM_BASE + PAGE_SIZE - 32;
        core.registers.set_program_counter(start);
        core.step();
        let chunk = core.cache.get(start).unwrap();
        assert_eq!(chunk.end(), RAM_BASE + PAGE_SIZE);
    }

    #[test]
    fn exception_entry_banks_and_vectors() {
        let mut core = Core::new(Bus::new(4096));
        core.registers.set_program_counter(RAM_BASE + 0x100);
        core.cpsr.set_zero_flag(true);
        let old_cpsr = core.cpsr;

        core.raise_exception(Exception::Irq);
        assert_eq!(core.cpsr.mode(), Mode::Irq);
        assert!(core.cpsr.irq_disable());
        assert!(!core.cpsr.thumb_state());
        assert_eq!(core.registers.register_at(14), RAM_BASE + 0x104);
        assert_eq!(core.registers.program_counter(), 0x18);
        assert_eq!(core.register_bank.spsr(Mode::Irq), old_cpsr);
    }

    #[test]
    fn fiq_entry_masks_fiq_too() {
        let mut core = Core::new(Bus::new(4096));
        core.cpsr.set_fiq_disable(false);
        core.raise_exception(Exception::Fiq);
        assert_eq!(core.cpsr.mode(), Mode::Fiq);
        assert!(core.cpsr.fiq_disable());
        assert!(core.cpsr.irq_disable());
        assert_eq!(core.registers.program_counter(), 0x1C);
    }

    #[test]
    fn high_vectors_follow_cp15() {
        let mut core = Core::new(Bus::new(4096));
        core.cp15.write_register(1, 0, 0, 1 << 13);
        core.raise_exception(Exception::SoftwareInterrupt);
        assert_eq!(core.registers.program_counter(), 0xFFFF_0008);
        assert_eq!(core.cpsr.mode(), Mode::Supervisor);
    }

    #[test]
    fn data_abort_return_offset() {
        let mut core = Core::new(Bus::new(4096));
        core.registers.set_program_counter(RAM_BASE + 0x40);
        core.raise_exception(Exception::DataAbort);
        // SUBS PC, LR, #8 must re-execute the faulting instruction
        assert_eq!(core.registers.register_at(14), RAM_BASE + 0x48);
    }

    #[test]
    fn reset_returns_to_power_on_state() {
        let mut core = Core::new(Bus::new(4096));
        core.cpsr.set_irq_disable(false);
        core.raise_exception(Exception::Irq);
        core.enter_idle();

        core.reset();
        assert_eq!(core.cpsr.mode(), Mode::Supervisor);
        assert!(core.cpsr.irq_disable());
        assert!(core.cpsr.fiq_disable());
        assert!(!core.is_idle());
        assert_eq!(core.registers.program_counter(), 0);

        // the V bit survives reset and selects the high reset vector
        core.cp15.write_register(1, 0, 0, 1 << 13);
        core.reset();
        assert_eq!(core.registers.program_counter(), VECTOR_BASE_HIGH);
    }

    #[test]
    fn reset_unprotects_code_pages() {
        // ADD R0, R0, #1 ; B .
        let mut core = core_with_ram_program(&[0xE280_0001, 0xEAFF_FFFE]);
        core.step();
        assert!(core.barrier.is_protected(RAM_BASE));

        // an empty cache must leave no page protected
        core.reset();
        assert!(!core.barrier.is_protected(RAM_BASE));
    }

    #[test]
    fn alignment_fault_aborts_and_records() {
        let mut core = Core::new(Bus::new(4096));
        core.cp15.write_register(1, 0, 0, 1 << 1);
        let r0_before = core.registers.register_at(0);

        let err = core.read_data(RAM_BASE + 2, AccessWidth::Word).unwrap_err();
        assert_eq!(err, Exception::DataAbort);
        assert_eq!(core.cp15.read_register(6, 0, 0), RAM_BASE + 2);
        assert_eq!(core.registers.register_at(0), r0_before);
    }

    #[test]
    fn misaligned_reads_mask_when_unchecked() {
        let mut core = Core::new(Bus::new(4096));
        core.bus.write(RAM_BASE, AccessWidth::Word, 0xCAFE_F00D);
        assert_eq!(
            core.read_data(RAM_BASE + 2, AccessWidth::Word).unwrap(),
            0xCAFE_F00D
        );
    }

    #[test]
    fn bank_round_trip_preserves_registers() {
        let mut core = Core::new(Bus::new(4096));
        core.registers.set_register_at(13, 0x1111);
        core.registers.set_register_at(14, 0x2222);
        core.registers.set_register_at(8, 0x3333);

        let mut to_fiq = core.cpsr;
        to_fiq.set_mode(Mode::Fiq);
        core.set_cpsr(to_fiq);
        core.registers.set_register_at(13, 0xAAAA);
        core.registers.set_register_at(8, 0xBBBB);

        let mut back = core.cpsr;
        back.set_mode(Mode::Supervisor);
        core.set_cpsr(back);
        assert_eq!(core.registers.register_at(13), 0x1111);
        assert_eq!(core.registers.register_at(14), 0x2222);
        assert_eq!(core.registers.register_at(8), 0x3333);
    }

    struct IrqAfter {
        countdown: u64,
        line: bool,
    }

    impl Peripheral for IrqAfter {
        fn get_data(&mut self, _address: u32, _width: AccessWidth) -> u32 {
            0
        }
        fn put_data(&mut self, _address: u32, _width: AccessWidth, _value: u32) {
            self.line = false;
        }
        fn tick(&mut self, instructions: u64) {
            if !self.line {
                self.countdown = self.countdown.saturating_sub(instructions);
                self.line = self.countdown == 0;
            }
        }
        fn has_pending_irq(&self) -> bool {
            self.line
        }
        fn has_pending_fiq(&self) -> bool {
            false
        }
    }

    #[test]
    fn idle_waits_for_interrupt() {
        let mut bus = Bus::new(4096);
        bus.map_peripheral(
            PERIPHERAL_BASE,
            16,
            Box::new(IrqAfter {
                countdown: 5,
                line: false,
            }),
        );
        let mut core = Core::new(bus);
        core.cpsr.set_irq_disable(false);
        core.registers.set_program_counter(RAM_BASE + 0x200);
        core.enter_idle();

        // idle steps only tick the bus
        core.step();
        assert!(core.is_idle());
        assert_eq!(core.registers.program_counter(), RAM_BASE + 0x200);

        core.run(5);
        assert!(!core.is_idle());
        assert_eq!(core.cpsr.mode(), Mode::Irq);
        assert_eq!(core.registers.program_counter(), 0x18);
    }

    #[test]
    fn masked_interrupt_is_not_taken() {
        let mut bus = Bus::new(4096);
        bus.map_peripheral(
            PERIPHERAL_BASE,
            16,
            Box::new(IrqAfter {
                countdown: 1,
                line: false,
            }),
        );
        let mut core = Core::new(bus);
        // I bit still set from reset
        core.registers.set_program_counter(RAM_BASE);
        core.run(10);
        assert_eq!(core.cpsr.mode(), Mode::Supervisor);
    }

    #[test]
    fn compiled_loop_is_interrupted_mid_chunk() {
        // endless SUBS/BNE loop; the IRQ must break out of the chunk
        let mut core = {
            let mut image = Vec::new();
            for word in [0xE251_1001u32, 0x1AFF_FFFD, 0xEAFF_FFFE] {
                image.extend_from_slice(&word.to_le_bytes());
            }
            let mut bus = Bus::new(64 * 1024);
            bus.load_ram(0, &image);
            bus.map_peripheral(
                PERIPHERAL_BASE,
                16,
                Box::new(IrqAfter {
                    countdown: 200,
                    line: false,
                }),
            );
            let mut core = Core::new(bus);
            core.registers.set_program_counter(RAM_BASE);
            core
        };
        core.cpsr.set_irq_disable(false);
        core.registers.set_register_at(1, u32::MAX);

        for _ in 0..10_000 {
            core.step();
            if core.cpsr.mode() == Mode::Irq {
                break;
            }
        }
        assert_eq!(core.cpsr.mode(), Mode::Irq);
        assert_eq!(core.registers.program_counter(), 0x18);
    }

    #[test]
    fn interpreter_and_compiled_tiers_agree() {
        // 0x00 MOV R2, #0        seed accumulator
        // 0x04 ADD R2, R2, R1    accumulate counter
        // 0x08 SUBS R1, R1, #1
        // 0x0C BNE 0x04
        // 0x10 B 0x10
        let program = [
            0xE3A0_2000u32,
            0xE082_2001,
            0xE251_1001,
            0x1AFF_FFFC,
            0xEAFF_FFFE,
        ];

        let run = |n: u32| {
            let mut core = core_with_ram_program(&program);
            core.registers.set_register_at(1, n);
            run_until_pc(&mut core, RAM_BASE + 0x10, 100_000);
            core.registers.register_at(2)
        };

        // n = 10 stays interpreted; n = 5000 crosses both promotion
        // thresholds. Same program, same closed form.
        assert_eq!(run(10), (10 * 11) / 2);
        assert_eq!(run(5000), (5000 * 5001) / 2);
    }
}
