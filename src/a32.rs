//! The ARMv7-A front door.

use crate::backend::x64::address_space::AddressSpace;
use crate::backend::x64::emit::{EmitConfig, GuestArch};
use crate::backend::x64::prelude::PreludeHooks;
use crate::callbacks::{shims, A32Callbacks, A32Context, CallbackContext};
use crate::config::{A32Config, JitError, OptimizationFlag, MIN_CODE_CACHE_SIZE};
use crate::frontend::a32::{self, ITState, LocationDescriptor, TranslationOptions};
use crate::halt::{HaltHandle, HaltReason};
use crate::ir::Block;
use crate::monitor::ExclusiveMonitor;
use crate::opt;
use crate::state::{A32JitState, StateLayout};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct LookupCell {
    core: *mut Core,
}

struct Core {
    config: A32Config,
    state: Box<A32JitState>,
    ctx: Box<A32Context>,
    halt: Arc<AtomicU32>,
    space: AddressSpace,
    lookup_cell: Box<LookupCell>,
}

/// One emulated ARMv7-A core.
pub struct Jit {
    core: Box<Core>,
}

fn s0r(f: unsafe extern "C" fn(*mut A32Context) -> u64) -> usize {
    f as usize
}
fn s0(f: unsafe extern "C" fn(*mut A32Context)) -> usize {
    f as usize
}
fn s1r(f: unsafe extern "C" fn(*mut A32Context, u64) -> u64) -> usize {
    f as usize
}
fn s1(f: unsafe extern "C" fn(*mut A32Context, u64)) -> usize {
    f as usize
}
fn s2(f: unsafe extern "C" fn(*mut A32Context, u64, u64)) -> usize {
    f as usize
}
fn s2r(f: unsafe extern "C" fn(*mut A32Context, u64, u64) -> u64) -> usize {
    f as usize
}

unsafe extern "C" fn lookup_block(cell: *mut LookupCell, state: *mut A32JitState) -> usize {
    let core = &mut *(*cell).core;
    let descriptor = LocationDescriptor::from_ir((*state).location_descriptor());
    core.get_or_emit(descriptor)
}

impl Jit {
    pub fn new(config: A32Config, callbacks: Box<dyn A32Callbacks>) -> Result<Jit, JitError> {
        let processors = config.base.processor_id + 1;
        Self::with_monitor(config, callbacks, Arc::new(ExclusiveMonitor::new(processors)))
    }

    pub fn with_monitor(
        config: A32Config,
        callbacks: Box<dyn A32Callbacks>,
        monitor: Arc<ExclusiveMonitor>,
    ) -> Result<Jit, JitError> {
        let processors = monitor.processor_count();
        if config.base.processor_id >= processors {
            return Err(JitError::ProcessorIdOutOfRange {
                processor_id: config.base.processor_id,
                processors,
            });
        }
        if config.base.code_cache_size < MIN_CODE_CACHE_SIZE {
            return Err(JitError::CodeCacheTooSmall {
                requested: config.base.code_cache_size,
            });
        }
        let mut ctx = Box::new(CallbackContext {
            callbacks,
            monitor,
            processor_id: config.base.processor_id,
        });
        let mut lookup_cell = Box::new(LookupCell {
            core: std::ptr::null_mut(),
        });

        let hooks = PreludeHooks {
            context: &mut *ctx as *mut A32Context as usize,
            read_memory_8: s1r(shims::a32_read_8),
            read_memory_16: s1r(shims::a32_read_16),
            read_memory_32: s1r(shims::a32_read_32),
            read_memory_64: s1r(shims::a32_read_64),
            read_memory_128: 0,
            write_memory_8: s2(shims::a32_write_8),
            write_memory_16: s2(shims::a32_write_16),
            write_memory_32: s2(shims::a32_write_32),
            write_memory_64: s2(shims::a32_write_64),
            write_memory_128: 0,
            exclusive_read_8: s1r(shims::a32_exclusive_read_8),
            exclusive_read_16: s1r(shims::a32_exclusive_read_16),
            exclusive_read_32: s1r(shims::a32_exclusive_read_32),
            exclusive_read_64: s1r(shims::a32_exclusive_read_64),
            exclusive_read_128: 0,
            exclusive_write_8: s2r(shims::a32_exclusive_write_8),
            exclusive_write_16: s2r(shims::a32_exclusive_write_16),
            exclusive_write_32: s2r(shims::a32_exclusive_write_32),
            exclusive_write_64: s2r(shims::a32_exclusive_write_64),
            exclusive_write_128: 0,
            clear_exclusive: s0(shims::a32_clear_exclusive),
            call_svc: s1(shims::a32_call_svc),
            exception_raised: s2(shims::a32_exception_raised),
            isb_raised: s1(shims::a32_isb_raised),
            add_ticks: s1(shims::a32_add_ticks),
            get_ticks_remaining: s0r(shims::a32_get_ticks_remaining),
            get_cntpct: 0,
            lookup_context: &mut *lookup_cell as *mut LookupCell as usize,
            lookup_block: lookup_block
                as unsafe extern "C" fn(*mut LookupCell, *mut A32JitState) -> usize
                as usize,
        };

        let emit_conf = EmitConfig {
            arch: GuestArch::A32,
            layout: StateLayout::a32(),
            trampolines: Default::default(),
            enable_cycle_counting: config.base.enable_cycle_counting,
            cntfrq_el0: 0,
            ctr_el0: 0,
            dczid_el0: 0,
        };
        let space = AddressSpace::new(
            config.base.code_cache_size,
            &hooks,
            emit_conf,
            config.base.enable_cycle_counting,
        );

        let mut core = Box::new(Core {
            config,
            state: Box::new(A32JitState::default()),
            ctx,
            halt: Arc::new(AtomicU32::new(0)),
            space,
            lookup_cell,
        });
        core.lookup_cell.core = &mut *core;
        Ok(Jit { core })
    }

    pub fn run(&mut self) -> HaltReason {
        let descriptor = self.current_location();
        let entry = self.core.get_or_emit(descriptor);
        let run = self.core.space.run_code_ptr();
        let state = &mut *self.core.state as *mut A32JitState as *mut u8;
        let halt = self.core.halt.as_ptr() as *const u32;
        let reasons = unsafe { run(state, halt, entry as *const u8) };
        HaltReason::from_bits_retain(reasons)
    }

    pub fn step(&mut self) -> HaltReason {
        let descriptor = self.current_location().set_single_stepping(true);
        let entry = self.core.get_or_emit(descriptor);
        let step = self.core.space.step_code_ptr();
        let state = &mut *self.core.state as *mut A32JitState as *mut u8;
        let halt = self.core.halt.as_ptr() as *const u32;
        let reasons = unsafe { step(state, halt, entry as *const u8) };
        HaltReason::from_bits_retain(reasons)
    }

    fn current_location(&self) -> LocationDescriptor {
        LocationDescriptor::from_ir(self.core.state.location_descriptor())
    }

    pub fn halt_handle(&self) -> HaltHandle {
        HaltHandle::new(self.core.halt.clone())
    }

    pub fn halt_execution(&self, reason: HaltReason) {
        self.core.halt.fetch_or(reason.bits(), Ordering::AcqRel);
    }

    pub fn invalidate_cache_ranges(&mut self, ranges: &[std::ops::RangeInclusive<u32>]) {
        let widened: Vec<std::ops::RangeInclusive<u64>> = ranges
            .iter()
            .map(|r| u64::from(*r.start())..=u64::from(*r.end()))
            .collect();
        self.core.space.invalidate_ranges(&widened);
    }

    pub fn clear_cache(&mut self) {
        self.core.space.clear_cache();
    }

    // Guest state access.

    pub fn regs(&self) -> &[u32; 16] {
        &self.core.state.regs
    }

    pub fn regs_mut(&mut self) -> &mut [u32; 16] {
        &mut self.core.state.regs
    }

    pub fn ext_regs(&self) -> &[u32; 64] {
        &self.core.state.ext_regs
    }

    pub fn ext_regs_mut(&mut self) -> &mut [u32; 64] {
        &mut self.core.state.ext_regs
    }

    /// CPSR as MRS observes it.
    pub fn cpsr(&self) -> u32 {
        self.core.state.cpsr()
    }

    /// Installs the flag nibble and the decode-relevant mode bits.
    pub fn set_cpsr(&mut self, value: u32) {
        let state = &mut self.core.state;
        state.cpsr_nzcv = value & 0xf000_0000;
        let thumb = value >> 5 & 1;
        let big_endian = value >> 9 & 1;
        state.upper_location_descriptor =
            (state.upper_location_descriptor & !0b11) | thumb | big_endian << 1;
    }

    pub fn set_it_state(&mut self, it: ITState) {
        let state = &mut self.core.state;
        state.upper_location_descriptor =
            (state.upper_location_descriptor & !0xff00) | u32::from(it.value()) << 8;
    }

    pub fn fpscr(&self) -> u32 {
        self.core.state.fpscr
    }

    pub fn set_fpscr(&mut self, value: u32) {
        self.core.state.fpscr = value;
    }
}

impl Core {
    fn get_or_emit(&mut self, descriptor: LocationDescriptor) -> usize {
        if let Some(entry) = self.space.get(descriptor.to_ir()) {
            return entry;
        }
        let block = self.generate_ir(descriptor);
        let start = u64::from(LocationDescriptor::from_ir(block.location()).pc());
        let end = u64::from(LocationDescriptor::from_ir(block.end_location()).pc());
        let range = start..=end.wrapping_sub(1).max(start);
        self.space.insert_block(&block, range)
    }

    fn generate_ir(&mut self, descriptor: LocationDescriptor) -> Block {
        let options = TranslationOptions {
            arch_version: self.config.arch_version,
            define_unpredictable_behaviour: self.config.base.define_unpredictable_behaviour,
            hook_hint_instructions: self.config.base.hook_hint_instructions,
        };
        let callbacks = &mut self.ctx.callbacks;
        let mut read_code = |vaddr: u32| callbacks.memory_read_code(vaddr);
        let mut block = a32::translate(descriptor, &mut read_code, options);

        opt::polyfill_pass(&mut block, opt::PolyfillOptions { strip_rsb: true });
        opt::naming_pass(&mut block);
        if self
            .config
            .base
            .has_optimization(OptimizationFlag::GET_SET_ELIMINATION)
        {
            opt::a32_get_set_elimination(&mut block, opt::A32GetSetOptions::default());
            opt::dead_code_elimination(&mut block);
        }
        if self.config.base.has_optimization(OptimizationFlag::CONST_PROP) {
            let mut const_mem = ConstMemoryAdapter(&mut *self.ctx.callbacks);
            opt::constant_memory_reads(&mut block, &mut const_mem);
            opt::constant_propagation(&mut block);
            opt::dead_code_elimination(&mut block);
        }
        opt::identity_removal(&mut block);
        opt::verification_pass(&block);
        block
    }
}

struct ConstMemoryAdapter<'a>(&'a mut dyn A32Callbacks);

impl opt::ConstantMemoryReads for ConstMemoryAdapter<'_> {
    fn is_read_only_memory(&mut self, vaddr: u64) -> bool {
        self.0.is_read_only_memory(vaddr as u32)
    }
    fn read_8(&mut self, vaddr: u64) -> u8 {
        self.0.memory_read_8(vaddr as u32)
    }
    fn read_16(&mut self, vaddr: u64) -> u16 {
        self.0.memory_read_16(vaddr as u32)
    }
    fn read_32(&mut self, vaddr: u64) -> u32 {
        self.0.memory_read_32(vaddr as u32)
    }
    fn read_64(&mut self, vaddr: u64) -> u64 {
        self.0.memory_read_64(vaddr as u32)
    }
}
