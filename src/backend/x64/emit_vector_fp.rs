//! Vector and scalar floating-point lowering.
//!
//! Scalar FP values travel as bit patterns in general-purpose registers;
//! arithmetic hops through scratch vector registers and runs under the
//! guest MXCSR image installed by the prelude. Conversions with semantics
//! SSE cannot express go through the soft-float helpers.

use super::asm::{Cc, Gpr, Size, Xmm};
use super::emit::BlockEmitter;
use crate::backend::regalloc::STATE;
use crate::fp;
use crate::ir::{Inst, Opcode};

fn addr1(f: extern "C" fn(u64) -> u64) -> usize {
    f as usize
}

fn addr2(f: extern "C" fn(u64, u64) -> u64) -> usize {
    f as usize
}

impl BlockEmitter<'_, '_> {
    pub(super) fn lower_vector_fp(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        match opcode {
            ZeroVector => {
                let dst = self.ra.write_xmm(&mut self.asm, inst);
                self.asm.pxor(dst, dst);
            }
            VectorZeroUpper => {
                let src = self.ra.read_xmm(&mut self.asm, self.block.arg(inst, 0));
                let dst = self.ra.write_xmm(&mut self.asm, inst);
                self.asm.movq_xx(dst, src);
            }
            ZeroExtendLongToQuad => {
                let src = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
                let dst = self.ra.write_xmm(&mut self.asm, inst);
                self.asm.movq_xr(dst, src);
            }
            VectorGetElement8 | VectorGetElement16 | VectorGetElement32 | VectorGetElement64 => {
                self.lower_vector_get_element(inst, opcode)
            }
            VectorSetElement8 | VectorSetElement16 | VectorSetElement32 | VectorSetElement64 => {
                self.lower_vector_set_element(inst, opcode)
            }
            VectorAdd8 | VectorAdd16 | VectorAdd32 | VectorAdd64 | VectorSub8 | VectorSub16
            | VectorSub32 | VectorSub64 | VectorAnd | VectorAndNot | VectorOr | VectorEor => {
                self.lower_vector_alu(inst, opcode)
            }
            VectorNot => {
                let dst = self.ra.rw_xmm(&mut self.asm, inst, self.block.arg(inst, 0));
                let ones = self.ra.scratch_xmm(&mut self.asm);
                self.asm.pcmpeqd(ones, ones);
                self.asm.pxor(dst, ones);
            }

            FPAdd32 | FPAdd64 | FPSub32 | FPSub64 | FPMul32 | FPMul64 | FPDiv32 | FPDiv64 => {
                self.lower_fp_binary(inst, opcode)
            }
            FPAbs32 => {
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.btr_ri(Size::Dword, dst, 31);
            }
            FPAbs64 => {
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.btr_ri(Size::Qword, dst, 63);
            }
            FPNeg32 => {
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.btc_ri(Size::Dword, dst, 31);
            }
            FPNeg64 => {
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.btc_ri(Size::Qword, dst, 63);
            }
            FPSqrt32 | FPSqrt64 => {
                let wide = opcode == FPSqrt64;
                let src = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                let tmp = self.ra.scratch_xmm(&mut self.asm);
                self.move_bits_to_xmm(tmp, src, wide);
                if wide {
                    self.asm.sqrtsd(tmp, tmp);
                } else {
                    self.asm.sqrtss(tmp, tmp);
                }
                self.move_bits_from_xmm(dst, tmp, wide);
            }
            FPCompare32 | FPCompare64 => self.lower_fp_compare(inst, opcode),
            FPSingleToDouble => {
                let src = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                let tmp = self.ra.scratch_xmm(&mut self.asm);
                self.asm.movd_xr(tmp, src);
                self.asm.cvtss2sd(tmp, tmp);
                self.asm.movq_rx(dst, tmp);
            }
            FPDoubleToSingle => {
                let src = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                let tmp = self.ra.scratch_xmm(&mut self.asm);
                self.asm.movq_xr(tmp, src);
                self.asm.cvtsd2ss(tmp, tmp);
                self.asm.movd_rx(dst, tmp);
            }
            FPSingleToFixedS32 => self.lower_fp_helper1(inst, addr1(fp::f32_to_s32)),
            FPSingleToFixedU32 => self.lower_fp_helper1(inst, addr1(fp::f32_to_u32)),
            FPSingleToFixedS64 => self.lower_fp_helper1(inst, addr1(fp::f32_to_s64)),
            FPSingleToFixedU64 => self.lower_fp_helper1(inst, addr1(fp::f32_to_u64)),
            FPDoubleToFixedS32 => self.lower_fp_helper1(inst, addr1(fp::f64_to_s32)),
            FPDoubleToFixedU32 => self.lower_fp_helper1(inst, addr1(fp::f64_to_u32)),
            FPDoubleToFixedS64 => self.lower_fp_helper1(inst, addr1(fp::f64_to_s64)),
            FPDoubleToFixedU64 => self.lower_fp_helper1(inst, addr1(fp::f64_to_u64)),
            FPFixedS32ToSingle => self.lower_fp_helper2(inst, addr2(fp::s32_to_f32)),
            FPFixedU32ToSingle => self.lower_fp_helper2(inst, addr2(fp::u32_to_f32)),
            FPFixedS32ToDouble => self.lower_fp_helper2(inst, addr2(fp::s32_to_f64)),
            FPFixedU32ToDouble => self.lower_fp_helper2(inst, addr2(fp::u32_to_f64)),
            FPFixedS64ToSingle => self.lower_fp_helper2(inst, addr2(fp::s64_to_f32)),
            FPFixedU64ToSingle => self.lower_fp_helper2(inst, addr2(fp::u64_to_f32)),
            FPFixedS64ToDouble => self.lower_fp_helper2(inst, addr2(fp::s64_to_f64)),
            FPFixedU64ToDouble => self.lower_fp_helper2(inst, addr2(fp::u64_to_f64)),

            other => panic!("{} has no x64 lowering", other.name()),
        }
    }

    fn move_bits_to_xmm(&mut self, dst: Xmm, src: Gpr, wide: bool) {
        if wide {
            self.asm.movq_xr(dst, src);
        } else {
            self.asm.movd_xr(dst, src);
        }
    }

    fn move_bits_from_xmm(&mut self, dst: Gpr, src: Xmm, wide: bool) {
        if wide {
            self.asm.movq_rx(dst, src);
        } else {
            self.asm.movd_rx(dst, src);
        }
    }

    fn lower_vector_get_element(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        let layout = self.conf.layout;
        let src = self.ra.read_xmm(&mut self.asm, self.block.arg(inst, 0));
        let index = self.block.arg(inst, 1).as_u8() as i32;
        self.asm.movdqu_mx(STATE, layout.scratch, src);
        let dst = self.ra.write_gpr(&mut self.asm, inst);
        match opcode {
            VectorGetElement8 => self.asm.movzx8_rm(dst, STATE, layout.scratch + index),
            VectorGetElement16 => self.asm.movzx16_rm(dst, STATE, layout.scratch + index * 2),
            VectorGetElement32 => {
                self.asm
                    .mov_rm(Size::Dword, dst, STATE, layout.scratch + index * 4)
            }
            VectorGetElement64 => {
                self.asm
                    .mov_rm(Size::Qword, dst, STATE, layout.scratch + index * 8)
            }
            _ => unreachable!(),
        }
    }

    fn lower_vector_set_element(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        let layout = self.conf.layout;
        let element = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 2));
        let vector = self.ra.read_xmm(&mut self.asm, self.block.arg(inst, 0));
        let index = self.block.arg(inst, 1).as_u8() as i32;
        self.asm.movdqu_mx(STATE, layout.scratch, vector);
        match opcode {
            VectorSetElement8 => self.asm.mov_mr8(STATE, layout.scratch + index, element),
            VectorSetElement16 => self.asm.mov_mr16(STATE, layout.scratch + index * 2, element),
            VectorSetElement32 => {
                self.asm
                    .mov_mr(Size::Dword, STATE, layout.scratch + index * 4, element)
            }
            VectorSetElement64 => {
                self.asm
                    .mov_mr(Size::Qword, STATE, layout.scratch + index * 8, element)
            }
            _ => unreachable!(),
        }
        let dst = self.ra.write_xmm(&mut self.asm, inst);
        self.asm.movdqu_xm(dst, STATE, layout.scratch);
    }

    fn lower_vector_alu(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        let a = self.block.arg(inst, 0);
        let b = self.block.arg(inst, 1);

        if opcode == VectorAndNot {
            // pandn computes !dst & src, so the destination starts as b.
            let a_reg = self.ra.read_xmm(&mut self.asm, a);
            let dst = self.ra.rw_xmm(&mut self.asm, inst, b);
            self.asm.pandn(dst, a_reg);
            return;
        }

        let b_reg = self.ra.read_xmm(&mut self.asm, b);
        let dst = self.ra.rw_xmm(&mut self.asm, inst, a);
        match opcode {
            VectorAdd8 => self.asm.paddb(dst, b_reg),
            VectorAdd16 => self.asm.paddw(dst, b_reg),
            VectorAdd32 => self.asm.paddd(dst, b_reg),
            VectorAdd64 => self.asm.paddq(dst, b_reg),
            VectorSub8 => self.asm.psubb(dst, b_reg),
            VectorSub16 => self.asm.psubw(dst, b_reg),
            VectorSub32 => self.asm.psubd(dst, b_reg),
            VectorSub64 => self.asm.psubq(dst, b_reg),
            VectorAnd => self.asm.pand(dst, b_reg),
            VectorOr => self.asm.por(dst, b_reg),
            VectorEor => self.asm.pxor(dst, b_reg),
            _ => unreachable!(),
        }
    }

    fn lower_fp_binary(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        let wide = matches!(opcode, FPAdd64 | FPSub64 | FPMul64 | FPDiv64);
        let a = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
        let b = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 1));
        let dst = self.ra.write_gpr(&mut self.asm, inst);
        let xa = self.ra.scratch_xmm(&mut self.asm);
        let xb = self.ra.scratch_xmm(&mut self.asm);
        self.move_bits_to_xmm(xa, a, wide);
        self.move_bits_to_xmm(xb, b, wide);
        match opcode {
            FPAdd32 => self.asm.addss(xa, xb),
            FPAdd64 => self.asm.addsd(xa, xb),
            FPSub32 => self.asm.subss(xa, xb),
            FPSub64 => self.asm.subsd(xa, xb),
            FPMul32 => self.asm.mulss(xa, xb),
            FPMul64 => self.asm.mulsd(xa, xb),
            FPDiv32 => self.asm.divss(xa, xb),
            FPDiv64 => self.asm.divsd(xa, xb),
            _ => unreachable!(),
        }
        self.move_bits_from_xmm(dst, xa, wide);
    }

    fn lower_fp_compare(&mut self, inst: Inst, opcode: Opcode) {
        let wide = opcode == Opcode::FPCompare64;
        let a = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
        let b = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 1));
        let dst = self.ra.write_gpr(&mut self.asm, inst);
        let xa = self.ra.scratch_xmm(&mut self.asm);
        let xb = self.ra.scratch_xmm(&mut self.asm);
        self.move_bits_to_xmm(xa, a, wide);
        self.move_bits_to_xmm(xb, b, wide);
        if wide {
            self.asm.ucomisd(xa, xb);
        } else {
            self.asm.ucomiss(xa, xb);
        }

        // Map the host comparison onto the architectural NZCV quartet.
        let unordered = self.asm.new_label();
        let less = self.asm.new_label();
        let equal = self.asm.new_label();
        let done = self.asm.new_label();
        self.asm.jcc(Cc::P, unordered);
        self.asm.jcc(Cc::B, less);
        self.asm.jcc(Cc::E, equal);
        self.asm.mov_ri32(dst, 0x2000_0000); // greater: C
        self.asm.jmp(done);
        self.asm.bind(less);
        self.asm.mov_ri32(dst, 0x8000_0000); // N
        self.asm.jmp(done);
        self.asm.bind(equal);
        self.asm.mov_ri32(dst, 0x6000_0000); // Z|C
        self.asm.jmp(done);
        self.asm.bind(unordered);
        self.asm.mov_ri32(dst, 0x3000_0000); // C|V
        self.asm.bind(done);
    }

    /// Callout to a one-argument soft-float helper (bits -> bits).
    fn lower_fp_helper1(&mut self, inst: Inst, helper: usize) {
        let src = self.block.arg(inst, 0);
        self.ra.prepare_call(&mut self.asm, &[src]);
        self.asm.mov_rr(Size::Qword, Gpr::Rdi, Gpr::Rsi);
        self.call_helper(helper);
        self.ra.call_result(inst);
    }

    /// Callout to a two-argument soft-float helper (bits, rounding).
    fn lower_fp_helper2(&mut self, inst: Inst, helper: usize) {
        let src = self.block.arg(inst, 0);
        let rounding = self.block.arg(inst, 1);
        self.ra.prepare_call(&mut self.asm, &[src, rounding]);
        self.asm.mov_rr(Size::Qword, Gpr::Rdi, Gpr::Rsi);
        self.asm.mov_rr(Size::Qword, Gpr::Rsi, Gpr::Rdx);
        self.call_helper(helper);
        self.ra.call_result(inst);
    }
}
