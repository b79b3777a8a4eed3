//! A32 data-processing, move-wide and multiply instructions.

use super::translate::TranslatorVisitor;
use super::Reg;
use crate::frontend::bits::*;
use crate::frontend::decoder::Matcher;
use crate::ir::{Terminal, Value};

pub(super) fn fill_table(table: &mut Vec<Matcher<TranslatorVisitor>>) {
    table.push(Matcher::new(
        "MOVW",
        "xxxx 00110000 xxxx xxxx xxxxxxxxxxxx",
        |v, w| v.movw(w),
    ));
    table.push(Matcher::new(
        "MOVT",
        "xxxx 00110100 xxxx xxxx xxxxxxxxxxxx",
        |v, w| v.movt(w),
    ));
    table.push(Matcher::new(
        "MUL",
        "xxxx 0000000 x xxxx 0000 xxxx 1001 xxxx",
        |v, w| v.mul(w),
    ));
    table.push(Matcher::new(
        "MLA",
        "xxxx 0000001 x xxxx xxxx xxxx 1001 xxxx",
        |v, w| v.mla(w),
    ));
    table.push(Matcher::new(
        "UMULL",
        "xxxx 0000100 x xxxx xxxx xxxx 1001 xxxx",
        |v, w| v.mul_long(w, false),
    ));
    table.push(Matcher::new(
        "SMULL",
        "xxxx 0000110 x xxxx xxxx xxxx 1001 xxxx",
        |v, w| v.mul_long(w, true),
    ));

    // The three data-processing operand forms. These match loosely and sit
    // at the end of the table, after every more specific encoding.
    table.push(Matcher::new(
        "DP_imm",
        "xxxx 001 xxxx x xxxx xxxx xxxxxxxxxxxx",
        |v, w| v.data_processing_imm(w),
    ));
    table.push(Matcher::new(
        "DP_reg",
        "xxxx 000 xxxx x xxxx xxxx xxxxx xx 0 xxxx",
        |v, w| v.data_processing_reg(w),
    ));
    table.push(Matcher::new(
        "DP_rsr",
        "xxxx 000 xxxx x xxxx xxxx xxxx 0 xx 1 xxxx",
        |v, w| v.data_processing_rsr(w),
    ));
}

/// The 4-bit data-processing opcode field.
#[derive(Copy, Clone, PartialEq)]
enum DpOp {
    And,
    Eor,
    Sub,
    Rsb,
    Add,
    Adc,
    Sbc,
    Rsc,
    Tst,
    Teq,
    Cmp,
    Cmn,
    Orr,
    Mov,
    Bic,
    Mvn,
}

impl DpOp {
    fn from_bits(bits: u32) -> DpOp {
        use DpOp::*;
        const TABLE: [DpOp; 16] = [
            And, Eor, Sub, Rsb, Add, Adc, Sbc, Rsc, Tst, Teq, Cmp, Cmn, Orr, Mov, Bic, Mvn,
        ];
        TABLE[(bits & 15) as usize]
    }

    /// Compare/test ops have no destination.
    fn is_compare(self) -> bool {
        matches!(self, DpOp::Tst | DpOp::Teq | DpOp::Cmp | DpOp::Cmn)
    }

    /// Whether the op's flags come from the adder (C/V) rather than the
    /// shifter (C only).
    fn is_arithmetic(self) -> bool {
        matches!(
            self,
            DpOp::Sub | DpOp::Rsb | DpOp::Add | DpOp::Adc | DpOp::Sbc | DpOp::Rsc | DpOp::Cmp | DpOp::Cmn
        )
    }
}

impl TranslatorVisitor {
    fn movw(&mut self, w: u32) -> bool {
        let imm = field(w, 19, 16) << 12 | field(w, 11, 0);
        let rd = Reg::from_bits(field(w, 15, 12));
        if rd == Reg::PC {
            return self.unpredictable_instruction();
        }
        let value = self.ir.imm32(imm);
        self.set_register(rd, value);
        true
    }

    fn movt(&mut self, w: u32) -> bool {
        let imm = (field(w, 19, 16) << 12 | field(w, 11, 0)) << 16;
        let rd = Reg::from_bits(field(w, 15, 12));
        if rd == Reg::PC {
            return self.unpredictable_instruction();
        }
        let old = self.get_register(rd);
        let mask = self.ir.imm32(0x0000_ffff);
        let low = self.ir.and_(old, mask);
        let high = self.ir.imm32(imm);
        let result = self.ir.or_(low, high);
        self.set_register(rd, result);
        true
    }

    fn mul(&mut self, w: u32) -> bool {
        let setflags = bit(w, 20);
        let rd = Reg::from_bits(field(w, 19, 16));
        let rs = Reg::from_bits(field(w, 11, 8));
        let rm = Reg::from_bits(field(w, 3, 0));
        if rd == Reg::PC || rs == Reg::PC || rm == Reg::PC {
            return self.unpredictable_instruction();
        }

        let n = self.get_register(rm);
        let m = self.get_register(rs);
        let result = self.ir.mul(n, m);
        self.set_register(rd, result);
        if setflags {
            let nz = self.ir.nz_from(result);
            self.ir.a32_set_cpsr_nz(nz);
        }
        true
    }

    fn mla(&mut self, w: u32) -> bool {
        let setflags = bit(w, 20);
        let rd = Reg::from_bits(field(w, 19, 16));
        let ra = Reg::from_bits(field(w, 15, 12));
        let rs = Reg::from_bits(field(w, 11, 8));
        let rm = Reg::from_bits(field(w, 3, 0));
        if rd == Reg::PC || ra == Reg::PC || rs == Reg::PC || rm == Reg::PC {
            return self.unpredictable_instruction();
        }

        let n = self.get_register(rm);
        let m = self.get_register(rs);
        let a = self.get_register(ra);
        let product = self.ir.mul(n, m);
        let result = self.ir.add(product, a);
        self.set_register(rd, result);
        if setflags {
            let nz = self.ir.nz_from(result);
            self.ir.a32_set_cpsr_nz(nz);
        }
        true
    }

    fn mul_long(&mut self, w: u32, signed: bool) -> bool {
        let setflags = bit(w, 20);
        let rd_hi = Reg::from_bits(field(w, 19, 16));
        let rd_lo = Reg::from_bits(field(w, 15, 12));
        let rs = Reg::from_bits(field(w, 11, 8));
        let rm = Reg::from_bits(field(w, 3, 0));
        if rd_hi == Reg::PC || rd_lo == Reg::PC || rs == Reg::PC || rm == Reg::PC {
            return self.unpredictable_instruction();
        }
        if rd_hi == rd_lo {
            return self.unpredictable_instruction();
        }

        let n32 = self.get_register(rm);
        let m32 = self.get_register(rs);
        let (n, m) = if signed {
            (
                self.ir.sign_extend_word_to_long(n32),
                self.ir.sign_extend_word_to_long(m32),
            )
        } else {
            (
                self.ir.zero_extend_word_to_long(n32),
                self.ir.zero_extend_word_to_long(m32),
            )
        };
        let product = self.ir.mul(n, m);
        let lo = self.ir.least_significant_word(product);
        let hi = self.ir.most_significant_word(product);
        self.set_register(rd_lo, lo);
        self.set_register(rd_hi, hi);
        if setflags {
            // N and Z reflect the full 64-bit product.
            let nz = self.ir.nz_from(product);
            self.ir.a32_set_cpsr_nz(nz);
        }
        true
    }

    fn data_processing_imm(&mut self, w: u32) -> bool {
        let op = DpOp::from_bits(field(w, 24, 21));
        let setflags = bit(w, 20);
        let rn = Reg::from_bits(field(w, 19, 16));
        let rd = Reg::from_bits(field(w, 15, 12));
        let imm12 = field(w, 11, 0);

        let (imm, carry) = self.expand_imm_c(imm12);
        let operand2 = self.ir.imm32(imm);
        let shifter_carry = match carry {
            Some(bit) => self.ir.imm1(bit),
            None => self.carry_in(),
        };
        self.data_processing(op, setflags, rn, rd, operand2, shifter_carry)
    }

    fn data_processing_reg(&mut self, w: u32) -> bool {
        let op = DpOp::from_bits(field(w, 24, 21));
        let setflags = bit(w, 20);
        let rn = Reg::from_bits(field(w, 19, 16));
        let rd = Reg::from_bits(field(w, 15, 12));
        let imm5 = field(w, 11, 7);
        let shift_type = field(w, 6, 5);
        let rm = Reg::from_bits(field(w, 3, 0));

        let value = self.get_register(rm);
        let carry_in = self.carry_in();
        let (operand2, shifter_carry) = self.emit_imm_shift(value, shift_type, imm5, carry_in);
        self.data_processing(op, setflags, rn, rd, operand2, shifter_carry)
    }

    fn data_processing_rsr(&mut self, w: u32) -> bool {
        let op = DpOp::from_bits(field(w, 24, 21));
        let setflags = bit(w, 20);
        let rn = Reg::from_bits(field(w, 19, 16));
        let rd = Reg::from_bits(field(w, 15, 12));
        let rs = Reg::from_bits(field(w, 11, 8));
        let shift_type = field(w, 6, 5);
        let rm = Reg::from_bits(field(w, 3, 0));

        if rd == Reg::PC || rn == Reg::PC || rs == Reg::PC || rm == Reg::PC {
            return self.unpredictable_instruction();
        }

        let value = self.get_register(rm);
        let shift_full = self.get_register(rs);
        let shift_half = self.ir.least_significant_half(shift_full);
        let shift_word = self.ir.zero_extend_half_to_word(shift_half);
        let amount = self.ir.least_significant_byte(shift_word);
        let carry_in = self.carry_in();
        let (operand2, shifter_carry) = self.emit_reg_shift(value, shift_type, amount, carry_in);
        self.data_processing(op, setflags, rn, rd, operand2, shifter_carry)
    }

    fn data_processing(
        &mut self,
        op: DpOp,
        setflags: bool,
        rn: Reg,
        rd: Reg,
        operand2: Value,
        shifter_carry: Value,
    ) -> bool {
        if op.is_compare() && !setflags {
            return self.unallocated_encoding();
        }

        let operand1 = self.get_register(rn);

        let result = match op {
            DpOp::And | DpOp::Tst => self.ir.and_(operand1, operand2),
            DpOp::Eor | DpOp::Teq => self.ir.eor(operand1, operand2),
            DpOp::Sub | DpOp::Cmp => self.ir.sub(operand1, operand2),
            DpOp::Rsb => self.ir.sub(operand2, operand1),
            DpOp::Add | DpOp::Cmn => self.ir.add(operand1, operand2),
            DpOp::Adc => {
                let carry = self.carry_in();
                self.ir.add_with_carry(operand1, operand2, carry)
            }
            DpOp::Sbc => {
                let carry = self.carry_in();
                self.ir.sub_with_carry(operand1, operand2, carry)
            }
            DpOp::Rsc => {
                let carry = self.carry_in();
                self.ir.sub_with_carry(operand2, operand1, carry)
            }
            DpOp::Orr => self.ir.or_(operand1, operand2),
            DpOp::Mov => operand2,
            DpOp::Bic => self.ir.and_not(operand1, operand2),
            DpOp::Mvn => self.ir.not_(operand2),
        };

        if op.is_compare() {
            if setflags {
                if op.is_arithmetic() {
                    let nzcv = self.ir.nzcv_from(result);
                    self.ir.a32_set_cpsr_nzcv(nzcv);
                } else {
                    let nz = self.ir.nz_from(result);
                    self.ir.a32_set_cpsr_nzc(nz, shifter_carry);
                }
            }
            return true;
        }

        if rd == Reg::PC {
            if setflags {
                // Exception-return form; userspace never takes it.
                return self.unpredictable_instruction();
            }
            self.alu_write_pc(result);
            self.ir.block.set_terminal(Terminal::FastDispatchHint);
            return false;
        }

        self.set_register(rd, result);
        if setflags {
            if op.is_arithmetic() {
                let nzcv = self.ir.nzcv_from(result);
                self.ir.a32_set_cpsr_nzcv(nzcv);
            } else {
                let nz = self.ir.nz_from(result);
                self.ir.a32_set_cpsr_nzc(nz, shifter_carry);
            }
        }
        true
    }
}
