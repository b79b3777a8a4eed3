//! Memory access and host-service lowering.
//!
//! Every guest memory access is a callout through a prelude trampoline;
//! the register allocator flushes live values first, so the callsites only
//! marshal arguments and collect results.

use super::asm::{Gpr, Size};
use super::emit::BlockEmitter;
use crate::backend::regalloc::STATE;
use crate::ir::{Inst, Opcode};
use crate::state::A64JitState;

impl BlockEmitter<'_, '_> {
    pub(super) fn lower_memory(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        let t = &self.conf.trampolines;
        let (target, is_write, is_128, exclusive) = match opcode {
            A32ReadMemory8 | A64ReadMemory8 => (t.read_memory_8, false, false, false),
            A32ReadMemory16 | A64ReadMemory16 => (t.read_memory_16, false, false, false),
            A32ReadMemory32 | A64ReadMemory32 => (t.read_memory_32, false, false, false),
            A32ReadMemory64 | A64ReadMemory64 => (t.read_memory_64, false, false, false),
            A64ReadMemory128 => (t.read_memory_128, false, true, false),
            A32WriteMemory8 | A64WriteMemory8 => (t.write_memory_8, true, false, false),
            A32WriteMemory16 | A64WriteMemory16 => (t.write_memory_16, true, false, false),
            A32WriteMemory32 | A64WriteMemory32 => (t.write_memory_32, true, false, false),
            A32WriteMemory64 | A64WriteMemory64 => (t.write_memory_64, true, false, false),
            A64WriteMemory128 => (t.write_memory_128, true, true, false),
            A32ExclusiveReadMemory8 | A64ExclusiveReadMemory8 => {
                (t.exclusive_read_8, false, false, true)
            }
            A32ExclusiveReadMemory16 | A64ExclusiveReadMemory16 => {
                (t.exclusive_read_16, false, false, true)
            }
            A32ExclusiveReadMemory32 | A64ExclusiveReadMemory32 => {
                (t.exclusive_read_32, false, false, true)
            }
            A32ExclusiveReadMemory64 | A64ExclusiveReadMemory64 => {
                (t.exclusive_read_64, false, false, true)
            }
            A64ExclusiveReadMemory128 => (t.exclusive_read_128, false, true, true),
            A32ExclusiveWriteMemory8 | A64ExclusiveWriteMemory8 => {
                (t.exclusive_write_8, true, false, true)
            }
            A32ExclusiveWriteMemory16 | A64ExclusiveWriteMemory16 => {
                (t.exclusive_write_16, true, false, true)
            }
            A32ExclusiveWriteMemory32 | A64ExclusiveWriteMemory32 => {
                (t.exclusive_write_32, true, false, true)
            }
            A32ExclusiveWriteMemory64 | A64ExclusiveWriteMemory64 => {
                (t.exclusive_write_64, true, false, true)
            }
            A64ExclusiveWriteMemory128 => (t.exclusive_write_128, true, true, true),
            _ => unreachable!(),
        };

        let vaddr = self.block.arg(inst, 0);
        let layout = self.conf.layout;

        if is_write {
            let value = self.block.arg(inst, 1);
            if is_128 {
                self.ra.prepare_call(&mut self.asm, &[vaddr]);
                self.ra
                    .load_spilled_pair(&mut self.asm, value, Gpr::Rdx, Gpr::Rcx);
            } else {
                self.ra.prepare_call(&mut self.asm, &[vaddr, value]);
            }
            self.asm.call_addr(target);
            if exclusive {
                // The store-exclusive status lands in a register.
                self.ra.call_result(inst);
                self.asm.mov_mi8(STATE, layout.exclusive_state, 0);
            }
        } else {
            self.ra.prepare_call(&mut self.asm, &[vaddr]);
            self.asm.call_addr(target);
            if exclusive {
                self.asm.mov_mi8(STATE, layout.exclusive_state, 1);
            }
            if is_128 {
                self.asm
                    .mov_mr(Size::Qword, STATE, layout.scratch, Gpr::Rax);
                self.asm
                    .mov_mr(Size::Qword, STATE, layout.scratch + 8, Gpr::Rdx);
                let dst = self.ra.write_xmm(&mut self.asm, inst);
                self.asm.movdqu_xm(dst, STATE, layout.scratch);
            } else {
                self.ra.call_result(inst);
            }
        }
    }

    pub(super) fn lower_clear_exclusive(&mut self) {
        self.ra.prepare_call(&mut self.asm, &[]);
        self.asm.call_addr(self.conf.trampolines.clear_exclusive);
        self.asm
            .mov_mi8(STATE, self.conf.layout.exclusive_state, 0);
    }

    /// `AddTicks(cycles_to_run - cycles_remaining)` followed by a
    /// `GetTicksRemaining` refresh; the resynchronization around
    /// supervisor calls and counter reads.
    fn emit_update_ticks(&mut self) {
        let layout = self.conf.layout;
        self.asm
            .mov_rm(Size::Qword, Gpr::Rsi, STATE, layout.cycles_to_run);
        let tmp = Gpr::Rdx;
        self.asm
            .mov_rm(Size::Qword, tmp, STATE, layout.cycles_remaining);
        self.asm.sub_rr(Size::Qword, Gpr::Rsi, tmp);
        self.asm.call_addr(self.conf.trampolines.add_ticks);
        self.asm.call_addr(self.conf.trampolines.get_ticks_remaining);
        self.asm
            .mov_mr(Size::Qword, STATE, layout.cycles_to_run, Gpr::Rax);
        self.asm
            .mov_mr(Size::Qword, STATE, layout.cycles_remaining, Gpr::Rax);
    }

    pub(super) fn lower_call_supervisor(&mut self, inst: Inst) {
        let imm = self.block.arg(inst, 0);
        self.ra.flush_all(&mut self.asm);
        if self.conf.enable_cycle_counting {
            self.emit_update_ticks();
        }
        self.asm.mov_ri32(Gpr::Rsi, imm.immediate_as_u64() as u32);
        self.asm.call_addr(self.conf.trampolines.call_svc);
    }

    pub(super) fn lower_exception_raised(&mut self, inst: Inst) {
        let pc = self.block.arg(inst, 0);
        let exception = self.block.arg(inst, 1);
        self.ra.prepare_call(&mut self.asm, &[pc, exception]);
        self.asm.call_addr(self.conf.trampolines.exception_raised);
    }

    pub(super) fn lower_isb(&mut self) {
        let layout = self.conf.layout;
        self.ra.flush_all(&mut self.asm);
        match self.conf.arch {
            super::emit::GuestArch::A64 => {
                self.asm.mov_rm(Size::Qword, Gpr::Rsi, STATE, layout.pc);
            }
            super::emit::GuestArch::A32 => {
                self.asm.mov_rm(Size::Dword, Gpr::Rsi, STATE, layout.pc);
            }
        }
        self.asm.call_addr(self.conf.trampolines.isb_raised);
    }

    pub(super) fn lower_get_cntpct(&mut self, inst: Inst) {
        self.ra.flush_all(&mut self.asm);
        if self.conf.enable_cycle_counting {
            self.emit_update_ticks();
        }
        self.asm.call_addr(self.conf.trampolines.get_cntpct);
        self.ra.call_result(inst);
    }

    // FPCR/FPSR management goes through helper functions that know the
    // MXCSR mappings; the translated FP state lives in the host control
    // register while guest code runs.

    pub(super) fn lower_set_fpcr(&mut self, inst: Inst) {
        let value = self.block.arg(inst, 0);
        self.ra.prepare_call(&mut self.asm, &[value]);
        self.asm.mov_rr(Size::Qword, Gpr::Rdi, STATE);
        self.call_helper(state_helper2(a64_set_fpcr_helper));
        self.asm
            .ldmxcsr(STATE, self.conf.layout.guest_mxcsr);
    }

    pub(super) fn lower_set_fpsr(&mut self, inst: Inst) {
        let value = self.block.arg(inst, 0);
        self.ra.prepare_call(&mut self.asm, &[value]);
        self.asm.mov_rr(Size::Qword, Gpr::Rdi, STATE);
        self.call_helper(state_helper2(a64_set_fpsr_helper));
        self.asm
            .ldmxcsr(STATE, self.conf.layout.guest_mxcsr);
    }

    pub(super) fn lower_get_fpsr(&mut self, inst: Inst) {
        // Sync accumulated status bits out of the live MXCSR first.
        self.asm.stmxcsr(STATE, self.conf.layout.guest_mxcsr);
        self.ra.prepare_call(&mut self.asm, &[]);
        self.asm.mov_rr(Size::Qword, Gpr::Rdi, STATE);
        self.call_helper(state_helper1(a64_get_fpsr_helper));
        self.ra.call_result(inst);
    }
}

fn state_helper1(f: unsafe extern "C" fn(*mut A64JitState) -> u64) -> usize {
    f as usize
}

fn state_helper2(f: unsafe extern "C" fn(*mut A64JitState, u64)) -> usize {
    f as usize
}

/// Cumulative exception flags of FPSR.
const FPSR_CUMULATIVE: u32 = 0x9f;

unsafe extern "C" fn a64_set_fpcr_helper(state: *mut A64JitState, value: u64) {
    let state = &mut *state;
    state.fpcr = value as u32;
    state.guest_mxcsr =
        crate::fp::mxcsr_from_fpcr(state.fpcr) | (state.guest_mxcsr & 0x3f);
}

unsafe extern "C" fn a64_set_fpsr_helper(state: *mut A64JitState, value: u64) {
    let state = &mut *state;
    let value = value as u32;
    state.fpsr = value & !FPSR_CUMULATIVE;
    state.guest_mxcsr = (state.guest_mxcsr & !0x3f) | crate::fp::mxcsr_status_from_fpsr(value);
}

unsafe extern "C" fn a64_get_fpsr_helper(state: *mut A64JitState) -> u64 {
    let state = &*state;
    u64::from(state.fpsr | crate::fp::fpsr_from_mxcsr(state.guest_mxcsr))
}
