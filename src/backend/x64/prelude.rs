//! The dispatcher prelude.
//!
//! Hand-emitted once at the start of the code buffer: the callback
//! trampolines, the epilogue that returns to the embedder, the dispatcher
//! loop, and the run/step entry points. Each trampoline materializes its
//! context and function pointers as immediates (the x86-64 shape of the
//! literal-word scheme) and tail-jumps to the shim, so emitted callsites
//! are a single direct call.

use super::asm::{Assembler, Cc, Gpr, Size};
use super::emit::Trampolines;
use crate::backend::regalloc::{HALT, STATE};
use crate::state::{StateLayout, RSB_ENTRIES};

/// `fn(state, halt_word, entry) -> halt reasons`.
pub type RunCodeFn = unsafe extern "C" fn(*mut u8, *const u32, *const u8) -> u32;

/// Shim addresses the prelude wires trampolines to. Entries the guest
/// architecture lacks stay zero and must never be reached.
#[derive(Copy, Clone, Default)]
pub struct PreludeHooks {
    pub context: usize,
    pub read_memory_8: usize,
    pub read_memory_16: usize,
    pub read_memory_32: usize,
    pub read_memory_64: usize,
    pub read_memory_128: usize,
    pub write_memory_8: usize,
    pub write_memory_16: usize,
    pub write_memory_32: usize,
    pub write_memory_64: usize,
    pub write_memory_128: usize,
    pub exclusive_read_8: usize,
    pub exclusive_read_16: usize,
    pub exclusive_read_32: usize,
    pub exclusive_read_64: usize,
    pub exclusive_read_128: usize,
    pub exclusive_write_8: usize,
    pub exclusive_write_16: usize,
    pub exclusive_write_32: usize,
    pub exclusive_write_64: usize,
    pub exclusive_write_128: usize,
    pub clear_exclusive: usize,
    pub call_svc: usize,
    pub exception_raised: usize,
    pub isb_raised: usize,
    pub add_ticks: usize,
    pub get_ticks_remaining: usize,
    pub get_cntpct: usize,
    /// `fn(lookup_context, state) -> entry` used by the dispatcher.
    pub lookup_context: usize,
    pub lookup_block: usize,
}

/// Addresses of everything later emission and dispatch needs.
pub struct PreludeInfo {
    pub run_code: usize,
    pub step_code: usize,
    pub return_to_dispatcher: usize,
    pub return_from_run_code: usize,
    pub trampolines: Trampolines,
    /// Buffer offset of the first byte after the prelude; `clear_cache`
    /// rewinds to here.
    pub end_of_prelude: usize,
}

pub fn emit_prelude(
    buf: &mut [u8],
    base_addr: usize,
    layout: &StateLayout,
    hooks: &PreludeHooks,
    enable_cycle_counting: bool,
) -> PreludeInfo {
    let mut asm = Assembler::new(buf, base_addr);

    let emit_trampoline = |asm: &mut Assembler, ctx: usize, f: usize| -> usize {
        let target = asm.current_addr();
        if f == 0 {
            // Unreachable for this architecture; trap if ever called.
            asm.int3();
            return target;
        }
        asm.mov_ri64(Gpr::Rdi, ctx as u64);
        asm.mov_ri64(Gpr::Rax, f as u64);
        asm.jmp_r(Gpr::Rax);
        target
    };

    let ctx = hooks.context;
    let trampolines = Trampolines {
        read_memory_8: emit_trampoline(&mut asm, ctx, hooks.read_memory_8),
        read_memory_16: emit_trampoline(&mut asm, ctx, hooks.read_memory_16),
        read_memory_32: emit_trampoline(&mut asm, ctx, hooks.read_memory_32),
        read_memory_64: emit_trampoline(&mut asm, ctx, hooks.read_memory_64),
        read_memory_128: emit_trampoline(&mut asm, ctx, hooks.read_memory_128),
        write_memory_8: emit_trampoline(&mut asm, ctx, hooks.write_memory_8),
        write_memory_16: emit_trampoline(&mut asm, ctx, hooks.write_memory_16),
        write_memory_32: emit_trampoline(&mut asm, ctx, hooks.write_memory_32),
        write_memory_64: emit_trampoline(&mut asm, ctx, hooks.write_memory_64),
        write_memory_128: emit_trampoline(&mut asm, ctx, hooks.write_memory_128),
        exclusive_read_8: emit_trampoline(&mut asm, ctx, hooks.exclusive_read_8),
        exclusive_read_16: emit_trampoline(&mut asm, ctx, hooks.exclusive_read_16),
        exclusive_read_32: emit_trampoline(&mut asm, ctx, hooks.exclusive_read_32),
        exclusive_read_64: emit_trampoline(&mut asm, ctx, hooks.exclusive_read_64),
        exclusive_read_128: emit_trampoline(&mut asm, ctx, hooks.exclusive_read_128),
        exclusive_write_8: emit_trampoline(&mut asm, ctx, hooks.exclusive_write_8),
        exclusive_write_16: emit_trampoline(&mut asm, ctx, hooks.exclusive_write_16),
        exclusive_write_32: emit_trampoline(&mut asm, ctx, hooks.exclusive_write_32),
        exclusive_write_64: emit_trampoline(&mut asm, ctx, hooks.exclusive_write_64),
        exclusive_write_128: emit_trampoline(&mut asm, ctx, hooks.exclusive_write_128),
        clear_exclusive: emit_trampoline(&mut asm, ctx, hooks.clear_exclusive),
        call_svc: emit_trampoline(&mut asm, ctx, hooks.call_svc),
        exception_raised: emit_trampoline(&mut asm, ctx, hooks.exception_raised),
        isb_raised: emit_trampoline(&mut asm, ctx, hooks.isb_raised),
        add_ticks: emit_trampoline(&mut asm, ctx, hooks.add_ticks),
        get_ticks_remaining: emit_trampoline(&mut asm, ctx, hooks.get_ticks_remaining),
        get_cntpct: emit_trampoline(&mut asm, ctx, hooks.get_cntpct),
    };
    let lookup_trampoline =
        emit_trampoline(&mut asm, hooks.lookup_context, hooks.lookup_block);

    // Epilogue. Entered from guest code with the guest MXCSR installed; the
    // second entry point is for exits taken before FP state was switched.
    let return_from_run_code = asm.current_addr();
    asm.stmxcsr(STATE, layout.guest_mxcsr);
    asm.ldmxcsr(STATE, layout.save_host_mxcsr);
    let exit_no_fp_addr = asm.current_addr();
    if enable_cycle_counting {
        asm.mov_rm(Size::Qword, Gpr::Rsi, STATE, layout.cycles_to_run);
        asm.mov_rm(Size::Qword, Gpr::Rdx, STATE, layout.cycles_remaining);
        asm.sub_rr(Size::Qword, Gpr::Rsi, Gpr::Rdx);
        asm.call_addr(trampolines.add_ticks);
    }
    // Atomically collect and clear the halt reasons.
    asm.xor_rr(Size::Dword, Gpr::Rax, Gpr::Rax);
    asm.xchg_mr32(HALT, 0, Gpr::Rax);
    asm.add_ri(Size::Qword, Gpr::Rsp, 8);
    asm.pop_r(Gpr::R15);
    asm.pop_r(Gpr::R14);
    asm.pop_r(Gpr::R13);
    asm.pop_r(Gpr::R12);
    asm.pop_r(Gpr::Rbp);
    asm.pop_r(Gpr::Rbx);
    asm.ret();

    // Dispatcher loop: poll halt and cycles, then look up the next block.
    let return_to_dispatcher = asm.current_addr();
    let exit_full = asm.new_label();
    asm.mov_rm(Size::Dword, Gpr::Rax, HALT, 0);
    asm.test_rr(Size::Dword, Gpr::Rax, Gpr::Rax);
    asm.jcc(Cc::Ne, exit_full);
    if enable_cycle_counting {
        asm.cmp_mi(Size::Qword, STATE, layout.cycles_remaining, 0);
        asm.jcc(Cc::Le, exit_full);
    }
    asm.mov_rr(Size::Qword, Gpr::Rsi, STATE);
    asm.call_addr(lookup_trampoline);
    asm.jmp_r(Gpr::Rax);
    asm.bind(exit_full);
    asm.jmp_addr(return_from_run_code);

    // Run entry: save host state, pin the state/halt registers, seed the
    // cycle counters and the return stack buffer, install guest FP state,
    // branch to the entry block.
    let run_code = asm.current_addr();
    emit_entry(
        &mut asm,
        layout,
        &trampolines,
        enable_cycle_counting,
        return_to_dispatcher,
        exit_no_fp_addr,
        false,
    );

    let step_code = asm.current_addr();
    emit_entry(
        &mut asm,
        layout,
        &trampolines,
        enable_cycle_counting,
        return_to_dispatcher,
        exit_no_fp_addr,
        true,
    );

    let end_of_prelude = asm.offset();
    PreludeInfo {
        run_code,
        step_code,
        return_to_dispatcher,
        return_from_run_code,
        trampolines,
        end_of_prelude,
    }
}

/// Emits one run/step entry point.
fn emit_entry(
    asm: &mut Assembler,
    layout: &StateLayout,
    trampolines: &Trampolines,
    enable_cycle_counting: bool,
    return_to_dispatcher: usize,
    exit_no_fp: usize,
    is_step: bool,
) {
    // Callee-saved registers plus an alignment slot: emitted code calls
    // with a 16-byte aligned stack.
    asm.push_r(Gpr::Rbx);
    asm.push_r(Gpr::Rbp);
    asm.push_r(Gpr::R12);
    asm.push_r(Gpr::R13);
    asm.push_r(Gpr::R14);
    asm.push_r(Gpr::R15);
    asm.sub_ri(Size::Qword, Gpr::Rsp, 8);

    asm.mov_rr(Size::Qword, STATE, Gpr::Rdi);
    asm.mov_rr(Size::Qword, HALT, Gpr::Rsi);
    asm.mov_rr(Size::Qword, Gpr::Rbx, Gpr::Rdx);

    if enable_cycle_counting {
        if is_step {
            let one = Gpr::Rax;
            asm.mov_ri32(one, 1);
            asm.mov_mr(Size::Qword, STATE, layout.cycles_to_run, one);
            asm.mov_mr(Size::Qword, STATE, layout.cycles_remaining, one);
        } else {
            asm.call_addr(trampolines.get_ticks_remaining);
            asm.mov_mr(Size::Qword, STATE, layout.cycles_to_run, Gpr::Rax);
            asm.mov_mr(Size::Qword, STATE, layout.cycles_remaining, Gpr::Rax);
        }
    }

    // Point every return-stack-buffer entry at the dispatcher.
    asm.mov_ri64(Gpr::Rax, return_to_dispatcher as u64);
    for entry in 0..RSB_ENTRIES {
        asm.mov_mr(
            Size::Qword,
            STATE,
            layout.rsb_codeptrs + (entry * 8) as i32,
            Gpr::Rax,
        );
    }

    // Bail out before touching FP state if a halt is already pending.
    let enter = asm.new_label();
    asm.mov_rm(Size::Dword, Gpr::Rax, HALT, 0);
    asm.test_rr(Size::Dword, Gpr::Rax, Gpr::Rax);
    asm.jcc(Cc::E, enter);
    asm.jmp_addr(exit_no_fp);
    asm.bind(enter);

    if is_step {
        asm.lock_or_mi32(HALT, 0, crate::halt::HaltReason::STEP.bits());
    }

    asm.stmxcsr(STATE, layout.save_host_mxcsr);
    asm.ldmxcsr(STATE, layout.guest_mxcsr);
    asm.jmp_r(Gpr::Rbx);
}
