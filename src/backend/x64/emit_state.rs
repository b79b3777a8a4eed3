//! Guest-state access lowering.

use super::asm::{Gpr, Size};
use super::emit::BlockEmitter;
use crate::backend::regalloc::STATE;
use crate::frontend::a32::ExtReg;
use crate::ir::{Inst, Opcode, Value};

impl BlockEmitter<'_, '_> {
    pub(super) fn lower_state_get(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        let layout = self.conf.layout;
        match opcode {
            A64GetW => {
                let reg = self.block.arg(inst, 0).as_a64_reg().index();
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm.mov_rm(Size::Dword, dst, STATE, layout.a64_reg(reg));
            }
            A64GetX => {
                let reg = self.block.arg(inst, 0).as_a64_reg().index();
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm.mov_rm(Size::Qword, dst, STATE, layout.a64_reg(reg));
            }
            A64GetSP => {
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm.mov_rm(Size::Qword, dst, STATE, layout.a64_reg(31));
            }
            A64GetNZCVRaw => {
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm.mov_rm(Size::Dword, dst, STATE, layout.nzcv);
            }
            A64GetFPCR => {
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm
                    .mov_rm(Size::Dword, dst, STATE, layout.fpcr_or_fpscr);
            }
            A64GetTPIDR => {
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm
                    .mov_rm(Size::Qword, dst, STATE, layout.tpidr.expect("A64 layout"));
            }
            A64GetTPIDRRO => {
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm
                    .mov_rm(Size::Qword, dst, STATE, layout.tpidrro.expect("A64 layout"));
            }
            A64GetCNTFRQ => {
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm.mov_ri32(dst, self.conf.cntfrq_el0);
            }
            A64GetCTR => {
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm.mov_ri32(dst, self.conf.ctr_el0);
            }
            A64GetDCZID => {
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm.mov_ri32(dst, self.conf.dczid_el0);
            }
            A64GetCFlag | A32GetCFlag => {
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm.mov_rm(Size::Dword, dst, STATE, layout.nzcv);
                self.asm.shr_i(Size::Dword, dst, 29);
                self.asm.and_ri(Size::Dword, dst, 1);
            }
            A32GetRegister => {
                let reg = self.block.arg(inst, 0).as_a32_reg().index();
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm.mov_rm(Size::Dword, dst, STATE, layout.a32_reg(reg));
            }
            A32GetExtendedRegister32 => {
                let reg = self.block.arg(inst, 0).as_a32_ext_reg().index();
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm
                    .mov_rm(Size::Dword, dst, STATE, layout.a32_ext_reg32(reg));
            }
            A32GetExtendedRegister64 => {
                let reg = self.block.arg(inst, 0).as_a32_ext_reg().index();
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm
                    .mov_rm(Size::Qword, dst, STATE, layout.a32_ext_reg64(reg));
            }
            _ => unreachable!(),
        }
    }

    pub(super) fn lower_state_set(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        let layout = self.conf.layout;
        match opcode {
            A64SetW => {
                // Writing W zeroes the upper half of X; stored values are
                // already zero-extended in their host register.
                let reg = self.block.arg(inst, 0).as_a64_reg().index();
                self.store_value(Size::Qword, layout.a64_reg(reg), self.block.arg(inst, 1));
            }
            A64SetX => {
                let reg = self.block.arg(inst, 0).as_a64_reg().index();
                self.store_value(Size::Qword, layout.a64_reg(reg), self.block.arg(inst, 1));
            }
            A64SetSP => {
                self.store_value(Size::Qword, layout.a64_reg(31), self.block.arg(inst, 0));
            }
            A64SetPC => {
                self.store_value(Size::Qword, layout.pc, self.block.arg(inst, 0));
            }
            A64SetNZCV => {
                self.store_value(Size::Dword, layout.nzcv, self.block.arg(inst, 0));
            }
            A64SetNZCVRaw | A32SetCpsrNZCVRaw => {
                let src = self.block.arg(inst, 0);
                if src.is_immediate() {
                    let masked = (src.immediate_as_u64() as u32) & 0xf000_0000;
                    self.asm.mov_mi32(STATE, layout.nzcv, masked);
                } else {
                    let reg = self.ra.read_gpr(&mut self.asm, src);
                    let tmp = self.ra.scratch_gpr(&mut self.asm);
                    self.asm.mov_rr(Size::Dword, tmp, reg);
                    self.asm.and_ri(Size::Dword, tmp, 0xf000_0000u32 as i32);
                    self.asm.mov_mr(Size::Dword, STATE, layout.nzcv, tmp);
                }
            }
            A32SetCpsrNZCV => {
                self.store_value(Size::Dword, layout.nzcv, self.block.arg(inst, 0));
            }
            A32SetCpsrNZ => {
                let nz = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
                let tmp = self.ra.scratch_gpr(&mut self.asm);
                let acc = self.ra.scratch_gpr(&mut self.asm);
                self.asm.mov_rm(Size::Dword, acc, STATE, layout.nzcv);
                self.asm.and_ri(Size::Dword, acc, 0x3000_0000);
                self.asm.mov_rr(Size::Dword, tmp, nz);
                self.asm.and_ri(Size::Dword, tmp, 0xc000_0000u32 as i32);
                self.asm.or_rr(Size::Dword, acc, tmp);
                self.asm.mov_mr(Size::Dword, STATE, layout.nzcv, acc);
            }
            A32SetCpsrNZC => {
                let nz = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
                let carry = self.block.arg(inst, 1);
                let tmp = self.ra.scratch_gpr(&mut self.asm);
                let acc = self.ra.scratch_gpr(&mut self.asm);
                self.asm.mov_rm(Size::Dword, acc, STATE, layout.nzcv);
                self.asm.and_ri(Size::Dword, acc, 0x1000_0000);
                self.asm.mov_rr(Size::Dword, tmp, nz);
                self.asm.and_ri(Size::Dword, tmp, 0xc000_0000u32 as i32);
                self.asm.or_rr(Size::Dword, acc, tmp);
                if carry.is_immediate() {
                    if carry.immediate_as_u64() != 0 {
                        self.asm.or_ri(Size::Dword, acc, 0x2000_0000);
                    }
                } else {
                    let c = self.ra.read_gpr(&mut self.asm, carry);
                    self.asm.mov_rr(Size::Dword, tmp, c);
                    self.asm.shl_i(Size::Dword, tmp, 29);
                    self.asm.or_rr(Size::Dword, acc, tmp);
                }
                self.asm.mov_mr(Size::Dword, STATE, layout.nzcv, acc);
            }
            A64SetTPIDR => {
                self.store_value(
                    Size::Qword,
                    layout.tpidr.expect("A64 layout"),
                    self.block.arg(inst, 0),
                );
            }
            A32SetRegister => {
                let reg = self.block.arg(inst, 0).as_a32_reg().index();
                self.store_value(Size::Dword, layout.a32_reg(reg), self.block.arg(inst, 1));
            }
            A32SetExtendedRegister32 => {
                let reg = self.block.arg(inst, 0).as_a32_ext_reg().index();
                self.store_value(
                    Size::Dword,
                    layout.a32_ext_reg32(reg),
                    self.block.arg(inst, 1),
                );
            }
            A32SetExtendedRegister64 => {
                let reg = self.block.arg(inst, 0).as_a32_ext_reg().index();
                self.store_value(
                    Size::Qword,
                    layout.a32_ext_reg64(reg),
                    self.block.arg(inst, 1),
                );
            }
            _ => unreachable!(),
        }
    }

    /// Stores an integer value (immediate or register) into the state.
    fn store_value(&mut self, size: Size, offset: i32, value: Value) {
        if value.is_immediate() {
            let bits = value.immediate_as_u64();
            match size {
                Size::Dword => self.asm.mov_mi32(STATE, offset, bits as u32),
                Size::Qword => {
                    if bits <= u32::MAX as u64 {
                        // A 32-bit store would leave the upper half stale;
                        // go through a register.
                        let tmp = self.ra.scratch_gpr(&mut self.asm);
                        self.asm.mov_ri32(tmp, bits as u32);
                        self.asm.mov_mr(Size::Qword, STATE, offset, tmp);
                    } else {
                        let tmp = self.ra.scratch_gpr(&mut self.asm);
                        self.asm.mov_ri64(tmp, bits);
                        self.asm.mov_mr(Size::Qword, STATE, offset, tmp);
                    }
                }
            }
        } else {
            let reg = self.ra.read_gpr(&mut self.asm, value);
            self.asm.mov_mr(size, STATE, offset, reg);
        }
    }

    pub(super) fn lower_vector_state(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        let layout = self.conf.layout;
        match opcode {
            A64GetS => {
                let reg = self.block.arg(inst, 0).as_a64_vec().index();
                let dst = self.ra.write_xmm(&mut self.asm, inst);
                self.asm.movd_xm(dst, STATE, layout.a64_vec(reg));
            }
            A64GetD => {
                let reg = self.block.arg(inst, 0).as_a64_vec().index();
                let dst = self.ra.write_xmm(&mut self.asm, inst);
                self.asm.movq_xm(dst, STATE, layout.a64_vec(reg));
            }
            A64GetQ => {
                let reg = self.block.arg(inst, 0).as_a64_vec().index();
                let dst = self.ra.write_xmm(&mut self.asm, inst);
                self.asm.movdqu_xm(dst, STATE, layout.a64_vec(reg));
            }
            A64SetS | A64SetD | A64SetQ => {
                // The operand carries a full 128-bit image (upper lanes
                // already zeroed by the translator for the narrow views).
                let reg = self.block.arg(inst, 0).as_a64_vec().index();
                let src = self.ra.read_xmm(&mut self.asm, self.block.arg(inst, 1));
                self.asm.movdqu_mx(STATE, layout.a64_vec(reg), src);
            }
            A32GetVector => {
                let reg = self.block.arg(inst, 0).as_a32_ext_reg();
                let dst = self.ra.write_xmm(&mut self.asm, inst);
                match reg {
                    ExtReg::D(i) => self.asm.movq_xm(dst, STATE, layout.a32_ext_reg64(i as usize)),
                    ExtReg::Q(i) => {
                        self.asm
                            .movdqu_xm(dst, STATE, layout.a32_ext_reg64(2 * i as usize))
                    }
                    ExtReg::S(_) => panic!("A32GetVector over a single register"),
                }
            }
            A32SetVector => {
                let reg = self.block.arg(inst, 0).as_a32_ext_reg();
                let src = self.ra.read_xmm(&mut self.asm, self.block.arg(inst, 1));
                match reg {
                    ExtReg::D(i) => self.asm.movq_mx(STATE, layout.a32_ext_reg64(i as usize), src),
                    ExtReg::Q(i) => {
                        self.asm
                            .movdqu_mx(STATE, layout.a32_ext_reg64(2 * i as usize), src)
                    }
                    ExtReg::S(_) => panic!("A32SetVector over a single register"),
                }
            }
            _ => unreachable!(),
        }
    }

    pub(super) fn lower_a32_get_cpsr(&mut self, inst: Inst) {
        let layout = self.conf.layout;
        let upper = layout.upper_location.expect("A32 layout");
        let dst = self.ra.write_gpr(&mut self.asm, inst);
        let tmp = self.ra.scratch_gpr(&mut self.asm);
        self.asm.mov_rm(Size::Dword, dst, STATE, layout.nzcv);
        self.asm.or_ri(Size::Dword, dst, 0b10000);
        self.asm.mov_rm(Size::Dword, tmp, STATE, upper);
        self.asm.and_ri(Size::Dword, tmp, 1);
        self.asm.shl_i(Size::Dword, tmp, 5);
        self.asm.or_rr(Size::Dword, dst, tmp);
        self.asm.mov_rm(Size::Dword, tmp, STATE, upper);
        self.asm.and_ri(Size::Dword, tmp, 2);
        self.asm.shl_i(Size::Dword, tmp, 8);
        self.asm.or_rr(Size::Dword, dst, tmp);
    }

    pub(super) fn lower_a32_bx_write_pc(&mut self, inst: Inst) {
        let layout = self.conf.layout;
        let upper = layout.upper_location.expect("A32 layout");
        let addr = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
        let t = self.ra.scratch_gpr(&mut self.asm);
        let tmp = self.ra.scratch_gpr(&mut self.asm);

        // T <- addr<0>, into the packed upper descriptor.
        self.asm.mov_rr(Size::Dword, t, addr);
        self.asm.and_ri(Size::Dword, t, 1);
        self.asm.mov_rm(Size::Dword, tmp, STATE, upper);
        self.asm.and_ri(Size::Dword, tmp, -2);
        self.asm.or_rr(Size::Dword, tmp, t);
        self.asm.mov_mr(Size::Dword, STATE, upper, tmp);

        // PC <- addr masked per the target instruction set.
        self.asm.mov_rr(Size::Dword, tmp, t);
        self.asm.shl_i(Size::Dword, tmp, 1);
        self.asm.or_ri(Size::Dword, tmp, -4);
        self.asm.and_rr(Size::Dword, tmp, addr);
        self.asm.mov_mr(Size::Dword, STATE, layout.pc, tmp);
    }

    pub(super) fn lower_set_check_bit(&mut self, inst: Inst) {
        let layout = self.conf.layout;
        let value = self.block.arg(inst, 0);
        if value.is_immediate() {
            self.asm
                .mov_mi8(STATE, layout.check_bit, value.immediate_as_u64() as u8);
        } else {
            let reg = self.ra.read_gpr(&mut self.asm, value);
            self.asm.mov_mr8(STATE, layout.check_bit, reg);
        }
    }
}
