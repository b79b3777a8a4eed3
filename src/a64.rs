//! The AArch64 front door: construct a [`Jit`], point it at guest memory
//! through your callbacks, and run.

use crate::backend::x64::address_space::AddressSpace;
use crate::backend::x64::emit::{EmitConfig, GuestArch};
use crate::backend::x64::prelude::PreludeHooks;
use crate::callbacks::{shims, A64Callbacks, A64Context, CallbackContext, U64Pair};
use crate::config::{A64Config, JitError, OptimizationFlag, MIN_CODE_CACHE_SIZE};
use crate::frontend::a64::{self, LocationDescriptor, TranslationOptions};
use crate::fp;
use crate::halt::{HaltHandle, HaltReason};
use crate::ir::Block;
use crate::monitor::ExclusiveMonitor;
use crate::opt;
use crate::state::{A64JitState, StateLayout};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Heap cell giving the dispatcher a stable pointer to the core before the
/// core itself exists.
struct LookupCell {
    core: *mut Core,
}

struct Core {
    config: A64Config,
    state: Box<A64JitState>,
    ctx: Box<A64Context>,
    halt: Arc<AtomicU32>,
    space: AddressSpace,
    lookup_cell: Box<LookupCell>,
}

/// One emulated AArch64 core.
pub struct Jit {
    core: Box<Core>,
}

// Helper casts: a function item only converts to usize through its precise
// function-pointer type.
fn s0r(f: unsafe extern "C" fn(*mut A64Context) -> u64) -> usize {
    f as usize
}
fn s0(f: unsafe extern "C" fn(*mut A64Context)) -> usize {
    f as usize
}
fn s1r(f: unsafe extern "C" fn(*mut A64Context, u64) -> u64) -> usize {
    f as usize
}
fn s1(f: unsafe extern "C" fn(*mut A64Context, u64)) -> usize {
    f as usize
}
fn s1p(f: unsafe extern "C" fn(*mut A64Context, u64) -> U64Pair) -> usize {
    f as usize
}
fn s2(f: unsafe extern "C" fn(*mut A64Context, u64, u64)) -> usize {
    f as usize
}
fn s2r(f: unsafe extern "C" fn(*mut A64Context, u64, u64) -> u64) -> usize {
    f as usize
}
fn s3(f: unsafe extern "C" fn(*mut A64Context, u64, u64, u64)) -> usize {
    f as usize
}
fn s3r(f: unsafe extern "C" fn(*mut A64Context, u64, u64, u64) -> u64) -> usize {
    f as usize
}

unsafe extern "C" fn lookup_block(cell: *mut LookupCell, state: *mut A64JitState) -> usize {
    let core = &mut *(*cell).core;
    let descriptor = (*state).location_descriptor();
    core.get_or_emit(descriptor)
}

impl Jit {
    /// Builds a core with a private exclusive monitor.
    pub fn new(config: A64Config, callbacks: Box<dyn A64Callbacks>) -> Result<Jit, JitError> {
        let processors = config.base.processor_id + 1;
        Self::with_monitor(config, callbacks, Arc::new(ExclusiveMonitor::new(processors)))
    }

    /// Builds a core sharing `monitor` with other cores of the cluster.
    pub fn with_monitor(
        config: A64Config,
        callbacks: Box<dyn A64Callbacks>,
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
            context: &mut *ctx as *mut A64Context as usize,
            read_memory_8: s1r(shims::a64_read_8),
            read_memory_16: s1r(shims::a64_read_16),
            read_memory_32: s1r(shims::a64_read_32),
            read_memory_64: s1r(shims::a64_read_64),
            read_memory_128: s1p(shims::a64_read_128),
            write_memory_8: s2(shims::a64_write_8),
            write_memory_16: s2(shims::a64_write_16),
            write_memory_32: s2(shims::a64_write_32),
            write_memory_64: s2(shims::a64_write_64),
            write_memory_128: s3(shims::a64_write_128),
            exclusive_read_8: s1r(shims::a64_exclusive_read_8),
            exclusive_read_16: s1r(shims::a64_exclusive_read_16),
            exclusive_read_32: s1r(shims::a64_exclusive_read_32),
            exclusive_read_64: s1r(shims::a64_exclusive_read_64),
            exclusive_read_128: s1p(shims::a64_exclusive_read_128),
            exclusive_write_8: s2r(shims::a64_exclusive_write_8),
            exclusive_write_16: s2r(shims::a64_exclusive_write_16),
            exclusive_write_32: s2r(shims::a64_exclusive_write_32),
            exclusive_write_64: s2r(shims::a64_exclusive_write_64),
            exclusive_write_128: s3r(shims::a64_exclusive_write_128),
            clear_exclusive: s0(shims::a64_clear_exclusive),
            call_svc: s1(shims::a64_call_svc),
            exception_raised: s2(shims::a64_exception_raised),
            isb_raised: s1(shims::a64_isb_raised),
            add_ticks: s1(shims::a64_add_ticks),
            get_ticks_remaining: s0r(shims::a64_get_ticks_remaining),
            get_cntpct: s0r(shims::a64_get_cntpct),
            lookup_context: &mut *lookup_cell as *mut LookupCell as usize,
            lookup_block: lookup_block
                as unsafe extern "C" fn(*mut LookupCell, *mut A64JitState) -> usize
                as usize,
        };

        let emit_conf = EmitConfig {
            arch: GuestArch::A64,
            layout: StateLayout::a64(),
            trampolines: Default::default(),
            enable_cycle_counting: config.base.enable_cycle_counting,
            cntfrq_el0: config.cntfrq_el0,
            ctr_el0: config.ctr_el0,
            dczid_el0: config.dczid_el0,
        };
        let space = AddressSpace::new(
            config.base.code_cache_size,
            &hooks,
            emit_conf,
            config.base.enable_cycle_counting,
        );

        let mut core = Box::new(Core {
            config,
            state: Box::new(A64JitState::default()),
            ctx,
            halt: Arc::new(AtomicU32::new(0)),
            space,
            lookup_cell,
        });
        core.lookup_cell.core = &mut *core;
        Ok(Jit { core })
    }

    /// Runs guest code until the halt word becomes non-zero or the tick
    /// budget runs out; returns the accumulated halt reasons.
    pub fn run(&mut self) -> HaltReason {
        let descriptor = self.core.state.location_descriptor();
        let entry = self.core.get_or_emit(descriptor);
        let run = self.core.space.run_code_ptr();
        let state = &mut *self.core.state as *mut A64JitState as *mut u8;
        let halt = self.core.halt.as_ptr() as *const u32;
        let reasons = unsafe { run(state, halt, entry as *const u8) };
        HaltReason::from_bits_retain(reasons)
    }

    /// Executes exactly one guest instruction.
    pub fn step(&mut self) -> HaltReason {
        let descriptor = self
            .core
            .state
            .location_descriptor()
            .set_single_stepping(true);
        let entry = self.core.get_or_emit(descriptor);
        let step = self.core.space.step_code_ptr();
        let state = &mut *self.core.state as *mut A64JitState as *mut u8;
        let halt = self.core.halt.as_ptr() as *const u32;
        let reasons = unsafe { step(state, halt, entry as *const u8) };
        HaltReason::from_bits_retain(reasons)
    }

    /// A cloneable handle other threads can use to stop this core.
    pub fn halt_handle(&self) -> HaltHandle {
        HaltHandle::new(self.core.halt.clone())
    }

    pub fn halt_execution(&self, reason: HaltReason) {
        self.core.halt.fetch_or(reason.bits(), Ordering::AcqRel);
    }

    /// Drops every cached translation overlapping the given guest PC
    /// ranges; the next dispatch to them re-translates.
    pub fn invalidate_cache_ranges(&mut self, ranges: &[std::ops::RangeInclusive<u64>]) {
        self.core.space.invalidate_ranges(ranges);
    }

    pub fn clear_cache(&mut self) {
        self.core.space.clear_cache();
    }

    // Guest state access.

    pub fn regs(&self) -> &[u64; 31] {
        &self.core.state.regs
    }

    pub fn regs_mut(&mut self) -> &mut [u64; 31] {
        &mut self.core.state.regs
    }

    pub fn sp(&self) -> u64 {
        self.core.state.sp
    }

    pub fn set_sp(&mut self, value: u64) {
        self.core.state.sp = value;
    }

    pub fn pc(&self) -> u64 {
        self.core.state.pc
    }

    pub fn set_pc(&mut self, value: u64) {
        self.core.state.pc = value;
    }

    pub fn vectors(&self) -> &[u64; 64] {
        &self.core.state.vec
    }

    pub fn vectors_mut(&mut self) -> &mut [u64; 64] {
        &mut self.core.state.vec
    }

    pub fn nzcv(&self) -> u32 {
        self.core.state.cpsr_nzcv
    }

    pub fn set_nzcv(&mut self, value: u32) {
        self.core.state.cpsr_nzcv = value & 0xf000_0000;
    }

    pub fn fpcr(&self) -> u32 {
        self.core.state.fpcr
    }

    pub fn set_fpcr(&mut self, value: u32) {
        let state = &mut self.core.state;
        state.fpcr = value;
        state.guest_mxcsr = fp::mxcsr_from_fpcr(value) | (state.guest_mxcsr & 0x3f);
    }

    pub fn fpsr(&self) -> u32 {
        self.core.state.fpsr | fp::fpsr_from_mxcsr(self.core.state.guest_mxcsr)
    }

    pub fn tpidr_el0(&self) -> u64 {
        self.core.state.tpidr_el0
    }

    pub fn set_tpidr_el0(&mut self, value: u64) {
        self.core.state.tpidr_el0 = value;
    }

    pub fn set_tpidrro_el0(&mut self, value: u64) {
        self.core.state.tpidrro_el0 = value;
    }
}

impl Core {
    fn get_or_emit(&mut self, descriptor: LocationDescriptor) -> usize {
        if let Some(entry) = self.space.get(descriptor.to_ir()) {
            return entry;
        }
        let block = self.generate_ir(descriptor);
        let start = LocationDescriptor::from_ir(block.location()).pc();
        let end = LocationDescriptor::from_ir(block.end_location()).pc();
        let range = start..=end.wrapping_sub(1).max(start);
        self.space.insert_block(&block, range)
    }

    /// Translate + optimize, the pipeline in its fixed order.
    fn generate_ir(&mut self, descriptor: LocationDescriptor) -> Block {
        let options = TranslationOptions {
            define_unpredictable_behaviour: self.config.base.define_unpredictable_behaviour,
            hook_hint_instructions: self.config.base.hook_hint_instructions,
            wall_clock_cntpct: self.config.wall_clock_cntpct,
        };
        let callbacks = &mut self.ctx.callbacks;
        let mut read_code = |vaddr: u64| callbacks.memory_read_code(vaddr);
        let mut block = a64::translate(descriptor, &mut read_code, options);

        // The backend keeps no live return stack buffer (its hints fall
        // back to the dispatcher), so the bookkeeping is always stripped.
        opt::polyfill_pass(&mut block, opt::PolyfillOptions { strip_rsb: true });
        opt::naming_pass(&mut block);
        if self
            .config
            .base
            .has_optimization(OptimizationFlag::GET_SET_ELIMINATION)
        {
            opt::a64_get_set_elimination(&mut block);
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

/// Adapts the callback object to the constant-memory-reads pass.
struct ConstMemoryAdapter<'a>(&'a mut dyn A64Callbacks);

impl opt::ConstantMemoryReads for ConstMemoryAdapter<'_> {
    fn is_read_only_memory(&mut self, vaddr: u64) -> bool {
        self.0.is_read_only_memory(vaddr)
    }
    fn read_8(&mut self, vaddr: u64) -> u8 {
        self.0.memory_read_8(vaddr)
    }
    fn read_16(&mut self, vaddr: u64) -> u16 {
        self.0.memory_read_16(vaddr)
    }
    fn read_32(&mut self, vaddr: u64) -> u32 {
        self.0.memory_read_32(vaddr)
    }
    fn read_64(&mut self, vaddr: u64) -> u64 {
        self.0.memory_read_64(vaddr)
    }
}
