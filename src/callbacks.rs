//! Embedder callbacks and their C-ABI shims.
//!
//! The emitted code reaches the embedder through pre-built trampolines:
//! each trampoline loads a context pointer and a function pointer from
//! literal words beside it and jumps. The function pointers are the
//! `extern "C"` shims in this module, which re-derive the trait object and
//! forward; the context is a [`CallbackContext`] owned by the Jit.

use crate::ir::Exception;
use crate::monitor::ExclusiveMonitor;
use std::sync::Arc;

/// Host services one emulated AArch64 core requires.
///
/// Callbacks run on the core's dispatcher thread, in the middle of guest
/// execution; they must not re-enter the Jit that invoked them. Memory
/// callbacks must not modify guest registers.
pub trait A64Callbacks {
    fn memory_read_8(&mut self, vaddr: u64) -> u8;
    fn memory_read_16(&mut self, vaddr: u64) -> u16;
    fn memory_read_32(&mut self, vaddr: u64) -> u32;
    fn memory_read_64(&mut self, vaddr: u64) -> u64;
    fn memory_read_128(&mut self, vaddr: u64) -> u128 {
        u128::from(self.memory_read_64(vaddr))
            | u128::from(self.memory_read_64(vaddr.wrapping_add(8))) << 64
    }

    fn memory_write_8(&mut self, vaddr: u64, value: u8);
    fn memory_write_16(&mut self, vaddr: u64, value: u16);
    fn memory_write_32(&mut self, vaddr: u64, value: u32);
    fn memory_write_64(&mut self, vaddr: u64, value: u64);
    fn memory_write_128(&mut self, vaddr: u64, value: u128) {
        self.memory_write_64(vaddr, value as u64);
        self.memory_write_64(vaddr.wrapping_add(8), (value >> 64) as u64);
    }

    /// Conditional stores backing the exclusive monitor. Returns whether
    /// the store was performed (the memory still held `expected`).
    fn memory_write_exclusive_8(&mut self, vaddr: u64, value: u8, expected: u8) -> bool;
    fn memory_write_exclusive_16(&mut self, vaddr: u64, value: u16, expected: u16) -> bool;
    fn memory_write_exclusive_32(&mut self, vaddr: u64, value: u32, expected: u32) -> bool;
    fn memory_write_exclusive_64(&mut self, vaddr: u64, value: u64, expected: u64) -> bool;
    fn memory_write_exclusive_128(&mut self, vaddr: u64, value: u128, expected: u128) -> bool {
        let _ = expected;
        self.memory_write_128(vaddr, value);
        true
    }

    /// Instruction fetch; `None` stops translation with a decode error.
    fn memory_read_code(&mut self, vaddr: u64) -> Option<u32> {
        Some(self.memory_read_32(vaddr))
    }

    /// Whether reads of `vaddr` may be folded at translation time. Memory
    /// reported read-only must stay read-only and mapped for the lifetime
    /// of the Jit.
    fn is_read_only_memory(&mut self, vaddr: u64) -> bool {
        let _ = vaddr;
        false
    }

    fn call_svc(&mut self, swi: u32);
    fn exception_raised(&mut self, pc: u64, exception: Exception);
    fn instruction_synchronization_barrier_raised(&mut self, pc: u64) {
        let _ = pc;
    }

    fn add_ticks(&mut self, ticks: u64);
    fn get_ticks_remaining(&mut self) -> u64;

    /// CNTPCT_EL0 when `wall_clock_cntpct` is configured.
    fn get_cntpct(&mut self) -> u64 {
        0
    }
}

/// Host services one emulated ARMv7 core requires; the contracts mirror
/// [`A64Callbacks`] over the 32-bit address space.
pub trait A32Callbacks {
    fn memory_read_8(&mut self, vaddr: u32) -> u8;
    fn memory_read_16(&mut self, vaddr: u32) -> u16;
    fn memory_read_32(&mut self, vaddr: u32) -> u32;
    fn memory_read_64(&mut self, vaddr: u32) -> u64;

    fn memory_write_8(&mut self, vaddr: u32, value: u8);
    fn memory_write_16(&mut self, vaddr: u32, value: u16);
    fn memory_write_32(&mut self, vaddr: u32, value: u32);
    fn memory_write_64(&mut self, vaddr: u32, value: u64);

    fn memory_write_exclusive_8(&mut self, vaddr: u32, value: u8, expected: u8) -> bool;
    fn memory_write_exclusive_16(&mut self, vaddr: u32, value: u16, expected: u16) -> bool;
    fn memory_write_exclusive_32(&mut self, vaddr: u32, value: u32, expected: u32) -> bool;
    fn memory_write_exclusive_64(&mut self, vaddr: u32, value: u64, expected: u64) -> bool;

    fn memory_read_code(&mut self, vaddr: u32) -> Option<u32> {
        Some(self.memory_read_32(vaddr))
    }

    fn is_read_only_memory(&mut self, vaddr: u32) -> bool {
        let _ = vaddr;
        false
    }

    fn call_svc(&mut self, swi: u32);
    fn exception_raised(&mut self, pc: u32, exception: Exception);
    fn instruction_synchronization_barrier_raised(&mut self, pc: u32) {
        let _ = pc;
    }

    fn add_ticks(&mut self, ticks: u64);
    fn get_ticks_remaining(&mut self) -> u64;
}

/// Two-word return for 128-bit reads: the SysV ABI hands it back in
/// rax:rdx, which the emitted callsite repacks into a vector register.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct U64Pair {
    pub lo: u64,
    pub hi: u64,
}

/// The `this` object behind every trampoline of one core.
pub struct CallbackContext<CB: ?Sized> {
    pub callbacks: Box<CB>,
    pub monitor: Arc<ExclusiveMonitor>,
    pub processor_id: usize,
}

pub type A64Context = CallbackContext<dyn A64Callbacks>;
pub type A32Context = CallbackContext<dyn A32Callbacks>;

macro_rules! read_shims {
    ($($name:ident, $method:ident;)*) => {
        $(pub unsafe extern "C" fn $name(ctx: *mut A64Context, vaddr: u64) -> u64 {
            u64::from((*ctx).callbacks.$method(vaddr))
        })*
    };
}

macro_rules! a32_read_shims {
    ($($name:ident, $method:ident;)*) => {
        $(pub unsafe extern "C" fn $name(ctx: *mut A32Context, vaddr: u64) -> u64 {
            u64::from((*ctx).callbacks.$method(vaddr as u32))
        })*
    };
}

pub mod shims {
    use super::*;

    // A64 plain accesses.

    read_shims! {
        a64_read_8, memory_read_8;
        a64_read_16, memory_read_16;
        a64_read_32, memory_read_32;
        a64_read_64, memory_read_64;
    }

    pub unsafe extern "C" fn a64_read_128(ctx: *mut A64Context, vaddr: u64) -> U64Pair {
        let value = (*ctx).callbacks.memory_read_128(vaddr);
        U64Pair {
            lo: value as u64,
            hi: (value >> 64) as u64,
        }
    }

    pub unsafe extern "C" fn a64_write_8(ctx: *mut A64Context, vaddr: u64, value: u64) {
        (*ctx).callbacks.memory_write_8(vaddr, value as u8);
    }

    pub unsafe extern "C" fn a64_write_16(ctx: *mut A64Context, vaddr: u64, value: u64) {
        (*ctx).callbacks.memory_write_16(vaddr, value as u16);
    }

    pub unsafe extern "C" fn a64_write_32(ctx: *mut A64Context, vaddr: u64, value: u64) {
        (*ctx).callbacks.memory_write_32(vaddr, value as u32);
    }

    pub unsafe extern "C" fn a64_write_64(ctx: *mut A64Context, vaddr: u64, value: u64) {
        (*ctx).callbacks.memory_write_64(vaddr, value);
    }

    pub unsafe extern "C" fn a64_write_128(ctx: *mut A64Context, vaddr: u64, lo: u64, hi: u64) {
        (*ctx)
            .callbacks
            .memory_write_128(vaddr, u128::from(lo) | u128::from(hi) << 64);
    }

    // A64 exclusive accesses, mediated by the shared monitor.

    macro_rules! a64_exclusive {
        ($read:ident, $write:ident, $read_cb:ident, $write_cb:ident, $ty:ty) => {
            pub unsafe extern "C" fn $read(ctx: *mut A64Context, vaddr: u64) -> u64 {
                let ctx = &mut *ctx;
                let pid = ctx.processor_id;
                let callbacks = &mut ctx.callbacks;
                let value =
                    ctx.monitor
                        .read_and_mark(pid, vaddr, || [u64::from(callbacks.$read_cb(vaddr)), 0]);
                value[0]
            }

            pub unsafe extern "C" fn $write(ctx: *mut A64Context, vaddr: u64, value: u64) -> u64 {
                let ctx = &mut *ctx;
                let pid = ctx.processor_id;
                let callbacks = &mut ctx.callbacks;
                let ok = ctx.monitor.do_exclusive_operation(pid, vaddr, |expected| {
                    callbacks.$write_cb(vaddr, value as $ty, expected[0] as $ty)
                });
                u64::from(!ok)
            }
        };
    }

    a64_exclusive!(
        a64_exclusive_read_8,
        a64_exclusive_write_8,
        memory_read_8,
        memory_write_exclusive_8,
        u8
    );
    a64_exclusive!(
        a64_exclusive_read_16,
        a64_exclusive_write_16,
        memory_read_16,
        memory_write_exclusive_16,
        u16
    );
    a64_exclusive!(
        a64_exclusive_read_32,
        a64_exclusive_write_32,
        memory_read_32,
        memory_write_exclusive_32,
        u32
    );
    a64_exclusive!(
        a64_exclusive_read_64,
        a64_exclusive_write_64,
        memory_read_64,
        memory_write_exclusive_64,
        u64
    );

    pub unsafe extern "C" fn a64_exclusive_read_128(ctx: *mut A64Context, vaddr: u64) -> U64Pair {
        let ctx = &mut *ctx;
        let pid = ctx.processor_id;
        let callbacks = &mut ctx.callbacks;
        let value = ctx.monitor.read_and_mark(pid, vaddr, || {
            let v = callbacks.memory_read_128(vaddr);
            [v as u64, (v >> 64) as u64]
        });
        U64Pair {
            lo: value[0],
            hi: value[1],
        }
    }

    pub unsafe extern "C" fn a64_exclusive_write_128(
        ctx: *mut A64Context,
        vaddr: u64,
        lo: u64,
        hi: u64,
    ) -> u64 {
        let ctx = &mut *ctx;
        let pid = ctx.processor_id;
        let callbacks = &mut ctx.callbacks;
        let value = u128::from(lo) | u128::from(hi) << 64;
        let ok = ctx.monitor.do_exclusive_operation(pid, vaddr, |expected| {
            let expected = u128::from(expected[0]) | u128::from(expected[1]) << 64;
            callbacks.memory_write_exclusive_128(vaddr, value, expected)
        });
        u64::from(!ok)
    }

    pub unsafe extern "C" fn a64_clear_exclusive(ctx: *mut A64Context) {
        let ctx = &mut *ctx;
        ctx.monitor.clear_processor(ctx.processor_id);
    }

    // A64 services.

    pub unsafe extern "C" fn a64_call_svc(ctx: *mut A64Context, swi: u64) {
        (*ctx).callbacks.call_svc(swi as u32);
    }

    pub unsafe extern "C" fn a64_exception_raised(ctx: *mut A64Context, pc: u64, exception: u64) {
        let exception = Exception::from_u64(exception).expect("invalid exception payload");
        (*ctx).callbacks.exception_raised(pc, exception);
    }

    pub unsafe extern "C" fn a64_isb_raised(ctx: *mut A64Context, pc: u64) {
        (*ctx)
            .callbacks
            .instruction_synchronization_barrier_raised(pc);
    }

    pub unsafe extern "C" fn a64_add_ticks(ctx: *mut A64Context, ticks: u64) {
        (*ctx).callbacks.add_ticks(ticks);
    }

    pub unsafe extern "C" fn a64_get_ticks_remaining(ctx: *mut A64Context) -> u64 {
        (*ctx).callbacks.get_ticks_remaining()
    }

    pub unsafe extern "C" fn a64_get_cntpct(ctx: *mut A64Context) -> u64 {
        (*ctx).callbacks.get_cntpct()
    }

    // A32 equivalents.

    a32_read_shims! {
        a32_read_8, memory_read_8;
        a32_read_16, memory_read_16;
        a32_read_32, memory_read_32;
        a32_read_64, memory_read_64;
    }

    pub unsafe extern "C" fn a32_write_8(ctx: *mut A32Context, vaddr: u64, value: u64) {
        (*ctx).callbacks.memory_write_8(vaddr as u32, value as u8);
    }

    pub unsafe extern "C" fn a32_write_16(ctx: *mut A32Context, vaddr: u64, value: u64) {
        (*ctx).callbacks.memory_write_16(vaddr as u32, value as u16);
    }

    pub unsafe extern "C" fn a32_write_32(ctx: *mut A32Context, vaddr: u64, value: u64) {
        (*ctx).callbacks.memory_write_32(vaddr as u32, value as u32);
    }

    pub unsafe extern "C" fn a32_write_64(ctx: *mut A32Context, vaddr: u64, value: u64) {
        (*ctx).callbacks.memory_write_64(vaddr as u32, value);
    }

    macro_rules! a32_exclusive {
        ($read:ident, $write:ident, $read_cb:ident, $write_cb:ident, $ty:ty) => {
            pub unsafe extern "C" fn $read(ctx: *mut A32Context, vaddr: u64) -> u64 {
                let ctx = &mut *ctx;
                let pid = ctx.processor_id;
                let callbacks = &mut ctx.callbacks;
                let value = ctx.monitor.read_and_mark(pid, vaddr, || {
                    [u64::from(callbacks.$read_cb(vaddr as u32)), 0]
                });
                value[0]
            }

            pub unsafe extern "C" fn $write(ctx: *mut A32Context, vaddr: u64, value: u64) -> u64 {
                let ctx = &mut *ctx;
                let pid = ctx.processor_id;
                let callbacks = &mut ctx.callbacks;
                let ok = ctx.monitor.do_exclusive_operation(pid, vaddr, |expected| {
                    callbacks.$write_cb(vaddr as u32, value as $ty, expected[0] as $ty)
                });
                u64::from(!ok)
            }
        };
    }

    a32_exclusive!(
        a32_exclusive_read_8,
        a32_exclusive_write_8,
        memory_read_8,
        memory_write_exclusive_8,
        u8
    );
    a32_exclusive!(
        a32_exclusive_read_16,
        a32_exclusive_write_16,
        memory_read_16,
        memory_write_exclusive_16,
        u16
    );
    a32_exclusive!(
        a32_exclusive_read_32,
        a32_exclusive_write_32,
        memory_read_32,
        memory_write_exclusive_32,
        u32
    );
    a32_exclusive!(
        a32_exclusive_read_64,
        a32_exclusive_write_64,
        memory_read_64,
        memory_write_exclusive_64,
        u64
    );

    pub unsafe extern "C" fn a32_clear_exclusive(ctx: *mut A32Context) {
        let ctx = &mut *ctx;
        ctx.monitor.clear_processor(ctx.processor_id);
    }

    pub unsafe extern "C" fn a32_call_svc(ctx: *mut A32Context, swi: u64) {
        (*ctx).callbacks.call_svc(swi as u32);
    }

    pub unsafe extern "C" fn a32_exception_raised(ctx: *mut A32Context, pc: u64, exception: u64) {
        let exception = Exception::from_u64(exception).expect("invalid exception payload");
        (*ctx).callbacks.exception_raised(pc as u32, exception);
    }

    pub unsafe extern "C" fn a32_isb_raised(ctx: *mut A32Context, pc: u64) {
        (*ctx)
            .callbacks
            .instruction_synchronization_barrier_raised(pc as u32);
    }

    pub unsafe extern "C" fn a32_add_ticks(ctx: *mut A32Context, ticks: u64) {
        (*ctx).callbacks.add_ticks(ticks);
    }

    pub unsafe extern "C" fn a32_get_ticks_remaining(ctx: *mut A32Context) -> u64 {
        (*ctx).callbacks.get_ticks_remaining()
    }
}
