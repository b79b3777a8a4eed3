//! Integer data-processing lowering, including flag capture for the
//! pseudo-operations attached to arithmetic parents.

use super::asm::{Cc, Gpr, Size};
use super::emit::BlockEmitter;
use crate::ir::{Inst, Opcode, Value};

/// How the host carry flag relates to the ARM carry after an operation.
#[derive(Copy, Clone, PartialEq)]
enum CarryKind {
    /// ARM C equals the host CF (additions).
    FromCf,
    /// ARM C equals the inverted host CF (subtractions: no-borrow).
    FromNotCf,
}

impl BlockEmitter<'_, '_> {
    pub(super) fn lower_data(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        match opcode {
            Add32 | Add64 => self.lower_add_sub(inst, opcode, false),
            Sub32 | Sub64 => self.lower_add_sub(inst, opcode, true),
            And32 | And64 | AndNot32 | AndNot64 | Eor32 | Eor64 | Or32 | Or64 => {
                self.lower_bitwise(inst, opcode)
            }
            Not32 | Not64 => {
                let size = self.size_of(Value::Inst(inst));
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.not_r(size, dst);
                self.capture_result_flags(inst, dst, size, None);
            }
            Mul32 | Mul64 => {
                let size = self.size_of(Value::Inst(inst));
                let b = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 1));
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.imul_rr(size, dst, b);
                self.capture_result_flags(inst, dst, size, None);
            }
            SignedMultiplyHigh64 | UnsignedMultiplyHigh64 => self.lower_mul_high(inst, opcode),
            UnsignedDiv32 | UnsignedDiv64 | SignedDiv32 | SignedDiv64 => {
                self.lower_div(inst, opcode)
            }
            LogicalShiftLeft32 | LogicalShiftRight32 | ArithmeticShiftRight32 | RotateRight32 => {
                self.lower_shift32(inst, opcode)
            }
            LogicalShiftLeft64 | LogicalShiftRight64 | ArithmeticShiftRight64 | RotateRight64 => {
                self.lower_shift64(inst, opcode)
            }
            RotateRightExtended => self.lower_rrx(inst),
            Pack2x32To1x64 => {
                let lo = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 1));
                self.asm.shl_i(Size::Qword, dst, 32);
                self.asm.or_rr(Size::Qword, dst, lo);
            }
            LeastSignificantWord => {
                let src = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm.mov_rr(Size::Dword, dst, src);
            }
            LeastSignificantHalf => {
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.and_ri(Size::Dword, dst, 0xffff);
            }
            LeastSignificantByte => {
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.and_ri(Size::Dword, dst, 0xff);
            }
            MostSignificantWord => {
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.shr_i(Size::Qword, dst, 32);
            }
            MostSignificantBit => {
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.shr_i(Size::Dword, dst, 31);
            }
            IsZero32 | IsZero64 => {
                let size = if opcode == IsZero64 {
                    Size::Qword
                } else {
                    Size::Dword
                };
                let src = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                self.asm.test_rr(size, src, src);
                self.asm.setcc(Cc::E, dst);
                self.asm.movzx8_rr(dst, dst);
            }
            TestBit => {
                let src = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
                let bit = self.block.arg(inst, 1);
                let dst = self.ra.write_gpr(&mut self.asm, inst);
                if bit.is_immediate() {
                    self.asm
                        .bt_ri(Size::Qword, src, bit.immediate_as_u64() as u8);
                } else {
                    let bit = self.ra.read_gpr(&mut self.asm, bit);
                    self.asm.bt_rr(Size::Qword, src, bit);
                }
                self.asm.setcc(Cc::B, dst);
                self.asm.movzx8_rr(dst, dst);
            }
            ConditionalSelect32 | ConditionalSelect64 | ConditionalSelectNZCV => {
                self.lower_conditional_select(inst)
            }
            SignExtendByteToWord => self.lower_sign_extend(inst, Size::Dword, 8),
            SignExtendHalfToWord => self.lower_sign_extend(inst, Size::Dword, 16),
            SignExtendByteToLong => self.lower_sign_extend(inst, Size::Qword, 8),
            SignExtendHalfToLong => self.lower_sign_extend(inst, Size::Qword, 16),
            SignExtendWordToLong => self.lower_sign_extend(inst, Size::Qword, 32),
            // Values are stored zero-extended, so widening moves are copies.
            ZeroExtendByteToWord | ZeroExtendHalfToWord | ZeroExtendByteToLong
            | ZeroExtendHalfToLong | ZeroExtendWordToLong => {
                self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
            }
            ByteReverseWord => {
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.bswap(Size::Dword, dst);
            }
            ByteReverseDual => {
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.bswap(Size::Qword, dst);
            }
            ByteReverseHalf => {
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.ror16_i(dst, 8);
            }
            CountLeadingZeros32 => self.lower_clz(inst, Size::Dword),
            CountLeadingZeros64 => self.lower_clz(inst, Size::Qword),
            ReverseBits32 => self.lower_rbit(inst, Size::Dword),
            ReverseBits64 => self.lower_rbit(inst, Size::Qword),
            _ => self.lower_vector_fp(inst, opcode),
        }
    }

    // Flag capture --------------------------------------------------------

    /// Realizes the pseudo-operations of an add/sub parent. Must run while
    /// the host flags still describe the operation; only flag-preserving
    /// instructions (moves, setcc, movzx) may intervene.
    fn capture_arith_flags(&mut self, parent: Inst, result: Gpr, size: Size, carry: CarryKind) {
        let carry_cc = match carry {
            CarryKind::FromCf => Cc::B,
            CarryKind::FromNotCf => Cc::Ae,
        };
        let pseudos: Vec<Inst> = self.pseudos[parent].iter().copied().collect();
        let mut nzcv_parts: Vec<(Inst, Gpr, Gpr)> = Vec::new();

        for pseudo in &pseudos {
            match self.block.opcode(*pseudo) {
                Opcode::GetCarryFromOp => {
                    let dst = self.ra.write_gpr(&mut self.asm, *pseudo);
                    self.asm.setcc(carry_cc, dst);
                    self.asm.movzx8_rr(dst, dst);
                    self.ra.consume_use(parent);
                }
                Opcode::GetOverflowFromOp => {
                    let dst = self.ra.write_gpr(&mut self.asm, *pseudo);
                    self.asm.setcc(Cc::O, dst);
                    self.asm.movzx8_rr(dst, dst);
                    self.ra.consume_use(parent);
                }
                Opcode::GetNZCVFromOp => {
                    // C and V must be latched before the N/Z test below.
                    let dst = self.ra.write_gpr(&mut self.asm, *pseudo);
                    let v_tmp = self.ra.scratch_gpr(&mut self.asm);
                    self.asm.setcc(carry_cc, dst);
                    self.asm.setcc(Cc::O, v_tmp);
                    nzcv_parts.push((*pseudo, dst, v_tmp));
                    self.ra.consume_use(parent);
                }
                Opcode::GetNZFromOp => {
                    let dst = self.ra.write_gpr(&mut self.asm, *pseudo);
                    nzcv_parts.push((*pseudo, dst, dst));
                    self.ra.consume_use(parent);
                }
                _ => unreachable!(),
            }
        }

        if nzcv_parts.is_empty() {
            return;
        }
        self.finish_nzcv_capture(result, size, nzcv_parts);
    }

    /// Realizes NZ-style pseudo-operations of a non-arithmetic parent
    /// (logical and multiply results: C and V read as zero).
    fn capture_result_flags(
        &mut self,
        parent: Inst,
        result: Gpr,
        size: Size,
        _carry: Option<()>,
    ) {
        let pseudos: Vec<Inst> = self.pseudos[parent].iter().copied().collect();
        if pseudos.is_empty() {
            return;
        }
        let mut nzcv_parts = Vec::new();
        for pseudo in &pseudos {
            match self.block.opcode(*pseudo) {
                Opcode::GetNZCVFromOp | Opcode::GetNZFromOp => {
                    let dst = self.ra.write_gpr(&mut self.asm, *pseudo);
                    self.asm.xor_rr(Size::Dword, dst, dst);
                    nzcv_parts.push((*pseudo, dst, dst));
                    self.ra.consume_use(parent);
                }
                other => panic!("{} attached to a non-arithmetic parent", other.name()),
            }
        }
        self.finish_nzcv_capture(result, size, nzcv_parts);
    }

    /// Packs N and Z of `result` into each pending NZCV destination, whose
    /// C/V bytes (if any) were latched into `(dst, v_tmp)` beforehand.
    fn finish_nzcv_capture(&mut self, result: Gpr, size: Size, parts: Vec<(Inst, Gpr, Gpr)>) {
        let n_tmp = self.ra.scratch_gpr(&mut self.asm);
        let z_tmp = self.ra.scratch_gpr(&mut self.asm);
        self.asm.test_rr(size, result, result);
        self.asm.setcc(Cc::S, n_tmp);
        self.asm.setcc(Cc::E, z_tmp);
        self.asm.movzx8_rr(n_tmp, n_tmp);
        self.asm.movzx8_rr(z_tmp, z_tmp);
        self.asm.shl_i(Size::Dword, n_tmp, 31);
        self.asm.shl_i(Size::Dword, z_tmp, 30);
        self.asm.or_rr(Size::Dword, n_tmp, z_tmp);

        for (_inst, dst, v_tmp) in parts {
            if dst == v_tmp {
                // NZ-only destination: it was zeroed (or has no C/V part).
                self.asm.or_rr(Size::Dword, dst, n_tmp);
            } else {
                self.asm.movzx8_rr(dst, dst);
                self.asm.shl_i(Size::Dword, dst, 29);
                self.asm.movzx8_rr(v_tmp, v_tmp);
                self.asm.shl_i(Size::Dword, v_tmp, 28);
                self.asm.or_rr(Size::Dword, dst, v_tmp);
                self.asm.or_rr(Size::Dword, dst, n_tmp);
            }
        }
    }

    // Arithmetic ----------------------------------------------------------

    fn lower_add_sub(&mut self, inst: Inst, _opcode: Opcode, is_sub: bool) {
        let size = self.size_of(Value::Inst(inst));
        let a = self.block.arg(inst, 0);
        let b = self.block.arg(inst, 1);
        let carry = self.block.arg(inst, 2);

        let plain = match (carry, is_sub) {
            (Value::U1(false), false) => true,
            (Value::U1(true), true) => true,
            _ => false,
        };

        // Gather operands first: materialization must not disturb the host
        // flags once the carry is staged.
        let use_imm = plain && b.is_immediate() && Self::fits_imm32(size, b.immediate_as_u64());
        let b_reg = if use_imm {
            None
        } else {
            Some(self.ra.read_gpr(&mut self.asm, b))
        };
        let carry_reg = match carry {
            Value::U1(_) => None,
            dynamic => Some(self.ra.read_gpr(&mut self.asm, dynamic)),
        };
        let dst = self.ra.rw_gpr(&mut self.asm, inst, a);

        if plain {
            match b_reg {
                Some(reg) if is_sub => self.asm.sub_rr(size, dst, reg),
                Some(reg) => self.asm.add_rr(size, dst, reg),
                None if is_sub => self.asm.sub_ri(size, dst, b.immediate_as_u64() as i32),
                None => self.asm.add_ri(size, dst, b.immediate_as_u64() as i32),
            }
        } else {
            // Stage CF: additions want CF = carry-in; subtractions want the
            // borrow, CF = !carry-in.
            match carry_reg {
                Some(c) => {
                    self.asm.bt_ri(Size::Dword, c, 0);
                    if is_sub {
                        self.asm.cmc();
                    }
                }
                None => {
                    // add with carry-in 1 / sub with carry-in 0.
                    self.asm.stc();
                }
            }
            let b_reg = b_reg.expect("carry forms always read the second operand");
            if is_sub {
                self.asm.sbb_rr(size, dst, b_reg);
            } else {
                self.asm.adc_rr(size, dst, b_reg);
            }
        }

        let kind = if is_sub {
            CarryKind::FromNotCf
        } else {
            CarryKind::FromCf
        };
        self.capture_arith_flags(inst, dst, size, kind);
    }

    fn lower_bitwise(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        let size = self.size_of(Value::Inst(inst));
        let a = self.block.arg(inst, 0);
        let b = self.block.arg(inst, 1);

        let dst = match opcode {
            AndNot32 | AndNot64 => {
                // a & !b: invert a copy of b, then and with a.
                let a_reg = self.ra.read_gpr(&mut self.asm, a);
                let dst = self.ra.rw_gpr(&mut self.asm, inst, b);
                self.asm.not_r(size, dst);
                self.asm.and_rr(size, dst, a_reg);
                dst
            }
            _ => {
                let use_imm = b.is_immediate() && Self::fits_imm32(size, b.immediate_as_u64());
                let b_reg = if use_imm {
                    None
                } else {
                    Some(self.ra.read_gpr(&mut self.asm, b))
                };
                let dst = self.ra.rw_gpr(&mut self.asm, inst, a);
                match (opcode, b_reg) {
                    (And32 | And64, Some(reg)) => self.asm.and_rr(size, dst, reg),
                    (And32 | And64, None) => {
                        self.asm.and_ri(size, dst, b.immediate_as_u64() as i32)
                    }
                    (Eor32 | Eor64, Some(reg)) => self.asm.xor_rr(size, dst, reg),
                    (Eor32 | Eor64, None) => {
                        self.asm.xor_ri(size, dst, b.immediate_as_u64() as i32)
                    }
                    (Or32 | Or64, Some(reg)) => self.asm.or_rr(size, dst, reg),
                    (Or32 | Or64, None) => self.asm.or_ri(size, dst, b.immediate_as_u64() as i32),
                    _ => unreachable!(),
                }
                dst
            }
        };

        self.capture_result_flags(inst, dst, size, None);
    }

    fn lower_mul_high(&mut self, inst: Inst, opcode: Opcode) {
        let a = self.block.arg(inst, 0);
        let b = self.block.arg(inst, 1);
        self.ra.get_specific(&mut self.asm, Gpr::Rax);
        self.ra.get_specific(&mut self.asm, Gpr::Rdx);
        let b_reg = self.ra.read_gpr(&mut self.asm, b);
        let a_reg = self.ra.read_gpr(&mut self.asm, a);
        self.asm.mov_rr(Size::Qword, Gpr::Rax, a_reg);
        if opcode == Opcode::SignedMultiplyHigh64 {
            self.asm.imul_r(Size::Qword, b_reg);
        } else {
            self.asm.mul_r(Size::Qword, b_reg);
        }
        self.ra.define_in_gpr(inst, Gpr::Rdx);
    }

    fn lower_div(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        let size = if matches!(opcode, UnsignedDiv64 | SignedDiv64) {
            Size::Qword
        } else {
            Size::Dword
        };
        let signed = matches!(opcode, SignedDiv32 | SignedDiv64);

        self.ra.get_specific(&mut self.asm, Gpr::Rax);
        self.ra.get_specific(&mut self.asm, Gpr::Rdx);
        let divisor = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 1));
        let dividend = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));

        let done = self.asm.new_label();
        let zero = self.asm.new_label();

        self.asm.mov_rr(size, Gpr::Rax, dividend);
        self.asm.test_rr(size, divisor, divisor);
        self.asm.jcc(Cc::E, zero);
        if signed {
            // Dividing by -1 is a negation; this also sidesteps the idiv
            // overflow fault on INT_MIN / -1.
            let do_div = self.asm.new_label();
            self.asm.cmp_ri8(size, divisor, -1);
            self.asm.jcc(Cc::Ne, do_div);
            self.asm.neg_r(size, Gpr::Rax);
            self.asm.jmp(done);
            self.asm.bind(do_div);
            self.asm.cdq(size);
            self.asm.idiv_r(size, divisor);
        } else {
            self.asm.xor_rr(Size::Dword, Gpr::Rdx, Gpr::Rdx);
            self.asm.div_r(size, divisor);
        }
        self.asm.jmp(done);
        self.asm.bind(zero);
        self.asm.xor_rr(Size::Dword, Gpr::Rax, Gpr::Rax);
        self.asm.bind(done);

        self.ra.define_in_gpr(inst, Gpr::Rax);
    }

    // Shifts ---------------------------------------------------------------

    /// The pseudo destinations a 32-bit shift needs: optional carry-out and
    /// optional NZ flags.
    fn shift_pseudo_dsts(&mut self, parent: Inst) -> (Option<Gpr>, Option<Gpr>) {
        let pseudos: Vec<Inst> = self.pseudos[parent].iter().copied().collect();
        let mut carry = None;
        let mut nz = None;
        for pseudo in pseudos {
            match self.block.opcode(pseudo) {
                Opcode::GetCarryFromOp => {
                    carry = Some(self.ra.write_gpr(&mut self.asm, pseudo));
                    self.ra.consume_use(parent);
                }
                Opcode::GetNZFromOp | Opcode::GetNZCVFromOp => {
                    nz = Some(self.ra.write_gpr(&mut self.asm, pseudo));
                    self.ra.consume_use(parent);
                }
                other => panic!("{} attached to a shift", other.name()),
            }
        }
        (carry, nz)
    }

    /// Packs NZ of `result` into `dst` (C and V cleared), without relying
    /// on pre-existing flags.
    fn emit_nz_pack(&mut self, dst: Gpr, result: Gpr, size: Size) {
        let tmp = self.ra.scratch_gpr(&mut self.asm);
        self.asm.test_rr(size, result, result);
        self.asm.setcc(Cc::S, dst);
        self.asm.setcc(Cc::E, tmp);
        self.asm.movzx8_rr(dst, dst);
        self.asm.movzx8_rr(tmp, tmp);
        self.asm.shl_i(Size::Dword, dst, 31);
        self.asm.shl_i(Size::Dword, tmp, 30);
        self.asm.or_rr(Size::Dword, dst, tmp);
    }

    fn lower_shift32(&mut self, inst: Inst, opcode: Opcode) {
        let amount = self.block.arg(inst, 1);
        if let Value::U8(imm) = amount {
            self.lower_shift32_imm(inst, opcode, imm);
        } else {
            self.lower_shift32_dynamic(inst, opcode);
        }
    }

    /// Immediate-amount 32-bit shift with ARM semantics. The translators
    /// only emit immediate amounts in 0..=32.
    fn lower_shift32_imm(&mut self, inst: Inst, opcode: Opcode, imm: u8) {
        use Opcode::*;
        let carry_in = self.block.arg(inst, 2);
        let (carry_dst, nz_dst) = self.shift_pseudo_dsts(inst);

        let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));

        match (opcode, imm) {
            (_, 0) => {
                // Value unchanged; carry-out is the carry-in.
                if let Some(c) = carry_dst {
                    self.load_carry_in(c, carry_in);
                }
            }
            (LogicalShiftLeft32, 1..=31) => {
                self.asm.shl_i(Size::Dword, dst, imm);
                self.latch_cf_into(carry_dst);
            }
            (LogicalShiftLeft32, 32) => {
                if let Some(c) = carry_dst {
                    self.asm.mov_rr(Size::Dword, c, dst);
                    self.asm.and_ri(Size::Dword, c, 1);
                }
                self.asm.xor_rr(Size::Dword, dst, dst);
            }
            (LogicalShiftLeft32, _) => {
                self.asm.xor_rr(Size::Dword, dst, dst);
                if let Some(c) = carry_dst {
                    self.asm.xor_rr(Size::Dword, c, c);
                }
            }
            (LogicalShiftRight32, 1..=31) => {
                self.asm.shr_i(Size::Dword, dst, imm);
                self.latch_cf_into(carry_dst);
            }
            (LogicalShiftRight32, 32) => {
                if let Some(c) = carry_dst {
                    self.asm.mov_rr(Size::Dword, c, dst);
                    self.asm.shr_i(Size::Dword, c, 31);
                }
                self.asm.xor_rr(Size::Dword, dst, dst);
            }
            (LogicalShiftRight32, _) => {
                self.asm.xor_rr(Size::Dword, dst, dst);
                if let Some(c) = carry_dst {
                    self.asm.xor_rr(Size::Dword, c, c);
                }
            }
            (ArithmeticShiftRight32, 1..=31) => {
                self.asm.sar_i(Size::Dword, dst, imm);
                self.latch_cf_into(carry_dst);
            }
            (ArithmeticShiftRight32, _) => {
                self.asm.sar_i(Size::Dword, dst, 31);
                if let Some(c) = carry_dst {
                    self.asm.mov_rr(Size::Dword, c, dst);
                    self.asm.and_ri(Size::Dword, c, 1);
                }
            }
            (RotateRight32, _) => {
                self.asm.ror_i(Size::Dword, dst, imm & 31);
                if let Some(c) = carry_dst {
                    self.asm.mov_rr(Size::Dword, c, dst);
                    self.asm.shr_i(Size::Dword, c, 31);
                }
            }
            _ => unreachable!(),
        }

        if let Some(nz) = nz_dst {
            self.emit_nz_pack(nz, dst, Size::Dword);
        }
    }

    /// Latches the host CF (from the just-emitted shift) into the carry
    /// destination.
    fn latch_cf_into(&mut self, carry_dst: Option<Gpr>) {
        if let Some(c) = carry_dst {
            self.asm.setcc(Cc::B, c);
            self.asm.movzx8_rr(c, c);
        }
    }

    fn load_carry_in(&mut self, dst: Gpr, carry_in: Value) {
        if carry_in.is_immediate() {
            self.asm
                .mov_ri32(dst, carry_in.immediate_as_u64() as u32 & 1);
        } else {
            let c = self.ra.read_gpr(&mut self.asm, carry_in);
            self.asm.mov_rr(Size::Dword, dst, c);
        }
    }

    /// Register-amount 32-bit shift with the full ARM barrel-shifter
    /// semantics over an 8-bit amount.
    fn lower_shift32_dynamic(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        let carry_in = self.block.arg(inst, 2);

        // The shift amount must sit in cl; claim it before anything else
        // can be handed that register.
        self.ra.get_specific(&mut self.asm, Gpr::Rcx);
        let (carry_dst, nz_dst) = self.shift_pseudo_dsts(inst);

        // Materialize the carry-in up front: allocator traffic must not be
        // emitted inside only one arm of the branches below.
        let carry_in_reg = if carry_dst.is_some() && !carry_in.is_immediate() {
            Some(self.ra.read_gpr(&mut self.asm, carry_in))
        } else {
            None
        };

        let amount = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 1));
        self.asm.mov_rr(Size::Dword, Gpr::Rcx, amount);
        let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));

        let done = self.asm.new_label();
        let zero_amt = self.asm.new_label();

        self.asm.test_rr(Size::Dword, Gpr::Rcx, Gpr::Rcx);
        self.asm.jcc(Cc::E, zero_amt);

        match opcode {
            RotateRight32 => {
                // Rotation is mod 32; the carry is the resulting top bit.
                self.asm.ror_cl(Size::Dword, dst);
                if let Some(c) = carry_dst {
                    self.asm.mov_rr(Size::Dword, c, dst);
                    self.asm.shr_i(Size::Dword, c, 31);
                }
                self.asm.jmp(done);
            }
            ArithmeticShiftRight32 => {
                let in_range = self.asm.new_label();
                self.asm.cmp_ri8(Size::Dword, Gpr::Rcx, 32);
                self.asm.jcc(Cc::B, in_range);
                // Amount >= 32: result is the sign fill and the carry
                // equals it.
                self.asm.sar_i(Size::Dword, dst, 31);
                if let Some(c) = carry_dst {
                    self.asm.mov_rr(Size::Dword, c, dst);
                    self.asm.and_ri(Size::Dword, c, 1);
                }
                self.asm.jmp(done);
                self.asm.bind(in_range);
                self.asm.sar_cl(Size::Dword, dst);
                self.latch_cf_into(carry_dst);
                self.asm.jmp(done);
            }
            LogicalShiftLeft32 | LogicalShiftRight32 => {
                let gt32 = self.asm.new_label();
                let eq32 = self.asm.new_label();
                self.asm.cmp_ri8(Size::Dword, Gpr::Rcx, 32);
                self.asm.jcc(Cc::A, gt32);
                self.asm.jcc(Cc::E, eq32);
                if opcode == LogicalShiftLeft32 {
                    self.asm.shl_cl(Size::Dword, dst);
                } else {
                    self.asm.shr_cl(Size::Dword, dst);
                }
                self.latch_cf_into(carry_dst);
                self.asm.jmp(done);

                self.asm.bind(eq32);
                if let Some(c) = carry_dst {
                    self.asm.mov_rr(Size::Dword, c, dst);
                    if opcode == LogicalShiftLeft32 {
                        self.asm.and_ri(Size::Dword, c, 1);
                    } else {
                        self.asm.shr_i(Size::Dword, c, 31);
                    }
                }
                self.asm.xor_rr(Size::Dword, dst, dst);
                self.asm.jmp(done);

                self.asm.bind(gt32);
                self.asm.xor_rr(Size::Dword, dst, dst);
                if let Some(c) = carry_dst {
                    self.asm.xor_rr(Size::Dword, c, c);
                }
                self.asm.jmp(done);
            }
            _ => unreachable!(),
        }

        self.asm.bind(zero_amt);
        if let Some(c) = carry_dst {
            match carry_in_reg {
                Some(reg) => self.asm.mov_rr(Size::Dword, c, reg),
                None => self
                    .asm
                    .mov_ri32(c, carry_in.immediate_as_u64() as u32 & 1),
            }
        }
        self.asm.bind(done);

        if let Some(nz) = nz_dst {
            self.emit_nz_pack(nz, dst, Size::Dword);
        }
    }

    /// 64-bit shifts: amounts are pre-masked below 64 by the translators.
    fn lower_shift64(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        let amount = self.block.arg(inst, 1);
        if let Value::U8(imm) = amount {
            let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
            match opcode {
                LogicalShiftLeft64 => self.asm.shl_i(Size::Qword, dst, imm & 63),
                LogicalShiftRight64 => self.asm.shr_i(Size::Qword, dst, imm & 63),
                ArithmeticShiftRight64 => self.asm.sar_i(Size::Qword, dst, imm & 63),
                RotateRight64 => self.asm.ror_i(Size::Qword, dst, imm & 63),
                _ => unreachable!(),
            }
            return;
        }

        self.ra.get_specific(&mut self.asm, Gpr::Rcx);
        let amount = self.ra.read_gpr(&mut self.asm, amount);
        self.asm.mov_rr(Size::Dword, Gpr::Rcx, amount);
        let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
        match opcode {
            LogicalShiftLeft64 => self.asm.shl_cl(Size::Qword, dst),
            LogicalShiftRight64 => self.asm.shr_cl(Size::Qword, dst),
            ArithmeticShiftRight64 => self.asm.sar_cl(Size::Qword, dst),
            RotateRight64 => self.asm.ror_cl(Size::Qword, dst),
            _ => unreachable!(),
        }
    }

    fn lower_rrx(&mut self, inst: Inst) {
        let carry_in = self.block.arg(inst, 1);
        let (carry_dst, nz_dst) = self.shift_pseudo_dsts(inst);

        let staged = match carry_in {
            Value::U1(set) => {
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                if set {
                    self.asm.stc();
                } else {
                    // A fresh test clears CF.
                    self.asm.test_rr(Size::Dword, dst, dst);
                }
                dst
            }
            dynamic => {
                let c = self.ra.read_gpr(&mut self.asm, dynamic);
                let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
                self.asm.bt_ri(Size::Dword, c, 0);
                dst
            }
        };
        self.asm.rcr1(Size::Dword, staged);
        // rcr leaves the rotated-out bit in CF.
        self.latch_cf_into(carry_dst);

        if let Some(nz) = nz_dst {
            self.emit_nz_pack(nz, staged, Size::Dword);
        }
    }

    fn lower_sign_extend(&mut self, inst: Inst, size: Size, from_bits: u32) {
        let src = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
        let dst = self.ra.write_gpr(&mut self.asm, inst);
        match from_bits {
            8 => self.asm.movsx8(size, dst, src),
            16 => self.asm.movsx16(size, dst, src),
            32 => self.asm.movsxd(dst, src),
            _ => unreachable!(),
        }
    }

    fn lower_clz(&mut self, inst: Inst, size: Size) {
        let bits = if size == Size::Qword { 64 } else { 32 };
        let src = self.ra.read_gpr(&mut self.asm, self.block.arg(inst, 0));
        let dst = self.ra.write_gpr(&mut self.asm, inst);

        let zero = self.asm.new_label();
        let done = self.asm.new_label();
        self.asm.test_rr(size, src, src);
        self.asm.jcc(Cc::E, zero);
        self.asm.bsr_rr(size, dst, src);
        self.asm.xor_ri(Size::Dword, dst, bits - 1);
        self.asm.jmp(done);
        self.asm.bind(zero);
        self.asm.mov_ri32(dst, bits as u32);
        self.asm.bind(done);
    }

    fn lower_rbit(&mut self, inst: Inst, size: Size) {
        let dst = self.ra.rw_gpr(&mut self.asm, inst, self.block.arg(inst, 0));
        let tmp = self.ra.scratch_gpr(&mut self.asm);
        let mask_reg = if size == Size::Qword {
            Some(self.ra.scratch_gpr(&mut self.asm))
        } else {
            None
        };

        // Classic pairwise swaps (1, 2, 4 bits) followed by a byte reverse.
        for (shift, mask) in [
            (1u8, 0x5555_5555_5555_5555u64),
            (2, 0x3333_3333_3333_3333),
            (4, 0x0f0f_0f0f_0f0f_0f0f),
        ] {
            self.asm.mov_rr(size, tmp, dst);
            self.asm.shr_i(size, dst, shift);
            match (size, mask_reg) {
                (Size::Dword, _) => {
                    self.asm.and_ri(Size::Dword, dst, mask as u32 as i32);
                    self.asm.and_ri(Size::Dword, tmp, mask as u32 as i32);
                }
                (Size::Qword, Some(m)) => {
                    self.asm.mov_ri64(m, mask);
                    self.asm.and_rr(Size::Qword, dst, m);
                    self.asm.and_rr(Size::Qword, tmp, m);
                }
                _ => unreachable!(),
            }
            self.asm.shl_i(size, tmp, shift);
            self.asm.or_rr(size, dst, tmp);
        }
        self.asm.bswap(size, dst);
    }

    fn lower_conditional_select(&mut self, inst: Inst) {
        let cond = self.block.arg(inst, 0).as_cond();
        let then_ = self.block.arg(inst, 1);
        let else_ = self.block.arg(inst, 2);

        let nzcv = self.ra.scratch_gpr(&mut self.asm);
        let tmp = self.ra.scratch_gpr(&mut self.asm);
        let else_reg = self.ra.read_gpr(&mut self.asm, else_);
        let dst = self.ra.rw_gpr(&mut self.asm, inst, then_);

        self.asm
            .mov_rm(Size::Dword, nzcv, crate::backend::regalloc::STATE, self.conf.layout.nzcv);
        let keep = self.asm.new_label();
        self.emit_cond_jump(cond, nzcv, tmp, keep);
        self.asm.mov_rr(Size::Qword, dst, else_reg);
        self.asm.bind(keep);
    }
}
