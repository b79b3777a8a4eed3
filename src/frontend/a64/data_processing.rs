//! A64 integer data-processing instructions.

use super::translate::{decode_bit_masks, TranslatorVisitor};
use super::Reg;
use crate::frontend::bits::*;
use crate::frontend::decoder::Matcher;
use crate::ir::{Cond, Value};

pub(super) fn fill_table(table: &mut Vec<Matcher<TranslatorVisitor>>) {
    // PC-relative addressing.
    table.push(Matcher::new("ADR", "0 xx 10000 xxxxxxxxxxxxxxxxxxx xxxxx", |v, w| {
        v.adr(field(w, 30, 29), field(w, 23, 5), Reg::from_bits(field(w, 4, 0)))
    }));
    table.push(Matcher::new("ADRP", "1 xx 10000 xxxxxxxxxxxxxxxxxxx xxxxx", |v, w| {
        v.adrp(field(w, 30, 29), field(w, 23, 5), Reg::from_bits(field(w, 4, 0)))
    }));

    // Add/subtract (immediate).
    table.push(Matcher::new("ADD_imm", "x 0 0 10001 xx xxxxxxxxxxxx xxxxx xxxxx", |v, w| {
        v.add_sub_imm(w, false, false)
    }));
    table.push(Matcher::new("ADDS_imm", "x 0 1 10001 xx xxxxxxxxxxxx xxxxx xxxxx", |v, w| {
        v.add_sub_imm(w, false, true)
    }));
    table.push(Matcher::new("SUB_imm", "x 1 0 10001 xx xxxxxxxxxxxx xxxxx xxxxx", |v, w| {
        v.add_sub_imm(w, true, false)
    }));
    table.push(Matcher::new("SUBS_imm", "x 1 1 10001 xx xxxxxxxxxxxx xxxxx xxxxx", |v, w| {
        v.add_sub_imm(w, true, true)
    }));

    // Add/subtract (shifted register).
    table.push(Matcher::new("ADD_shift", "x 0 0 01011 xx 0 xxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.add_sub_shift(w, false, false)
    }));
    table.push(Matcher::new("ADDS_shift", "x 0 1 01011 xx 0 xxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.add_sub_shift(w, false, true)
    }));
    table.push(Matcher::new("SUB_shift", "x 1 0 01011 xx 0 xxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.add_sub_shift(w, true, false)
    }));
    table.push(Matcher::new("SUBS_shift", "x 1 1 01011 xx 0 xxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.add_sub_shift(w, true, true)
    }));

    // Add/subtract (extended register).
    table.push(Matcher::new("ADD_ext", "x 0 0 01011 00 1 xxxxx xxx xxx xxxxx xxxxx", |v, w| {
        v.add_sub_ext(w, false, false)
    }));
    table.push(Matcher::new("ADDS_ext", "x 0 1 01011 00 1 xxxxx xxx xxx xxxxx xxxxx", |v, w| {
        v.add_sub_ext(w, false, true)
    }));
    table.push(Matcher::new("SUB_ext", "x 1 0 01011 00 1 xxxxx xxx xxx xxxxx xxxxx", |v, w| {
        v.add_sub_ext(w, true, false)
    }));
    table.push(Matcher::new("SUBS_ext", "x 1 1 01011 00 1 xxxxx xxx xxx xxxxx xxxxx", |v, w| {
        v.add_sub_ext(w, true, true)
    }));

    // Add/subtract with carry.
    table.push(Matcher::new("ADC", "x 0 0 11010000 xxxxx 000000 xxxxx xxxxx", |v, w| {
        v.adc_sbc(w, false, false)
    }));
    table.push(Matcher::new("ADCS", "x 0 1 11010000 xxxxx 000000 xxxxx xxxxx", |v, w| {
        v.adc_sbc(w, false, true)
    }));
    table.push(Matcher::new("SBC", "x 1 0 11010000 xxxxx 000000 xxxxx xxxxx", |v, w| {
        v.adc_sbc(w, true, false)
    }));
    table.push(Matcher::new("SBCS", "x 1 1 11010000 xxxxx 000000 xxxxx xxxxx", |v, w| {
        v.adc_sbc(w, true, true)
    }));

    // Logical (immediate).
    table.push(Matcher::new("AND_imm", "x 00 100100 xxxxxxxxxxxxx xxxxx xxxxx", |v, w| {
        v.logical_imm(w, LogicalOp::And, false)
    }));
    table.push(Matcher::new("ORR_imm", "x 01 100100 xxxxxxxxxxxxx xxxxx xxxxx", |v, w| {
        v.logical_imm(w, LogicalOp::Orr, false)
    }));
    table.push(Matcher::new("EOR_imm", "x 10 100100 xxxxxxxxxxxxx xxxxx xxxxx", |v, w| {
        v.logical_imm(w, LogicalOp::Eor, false)
    }));
    table.push(Matcher::new("ANDS_imm", "x 11 100100 xxxxxxxxxxxxx xxxxx xxxxx", |v, w| {
        v.logical_imm(w, LogicalOp::And, true)
    }));

    // Logical (shifted register).
    table.push(Matcher::new("AND_shift", "x 00 01010 xx 0 xxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.logical_shift(w, LogicalOp::And, false, false)
    }));
    table.push(Matcher::new("BIC_shift", "x 00 01010 xx 1 xxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.logical_shift(w, LogicalOp::And, true, false)
    }));
    table.push(Matcher::new("ORR_shift", "x 01 01010 xx 0 xxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.logical_shift(w, LogicalOp::Orr, false, false)
    }));
    table.push(Matcher::new("ORN_shift", "x 01 01010 xx 1 xxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.logical_shift(w, LogicalOp::Orr, true, false)
    }));
    table.push(Matcher::new("EOR_shift", "x 10 01010 xx 0 xxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.logical_shift(w, LogicalOp::Eor, false, false)
    }));
    table.push(Matcher::new("EON_shift", "x 10 01010 xx 1 xxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.logical_shift(w, LogicalOp::Eor, true, false)
    }));
    table.push(Matcher::new("ANDS_shift", "x 11 01010 xx 0 xxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.logical_shift(w, LogicalOp::And, false, true)
    }));
    table.push(Matcher::new("BICS_shift", "x 11 01010 xx 1 xxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.logical_shift(w, LogicalOp::And, true, true)
    }));

    // Move wide.
    table.push(Matcher::new("MOVN", "x 00 100101 xx xxxxxxxxxxxxxxxx xxxxx", |v, w| {
        v.move_wide(w, MoveWideOp::Not)
    }));
    table.push(Matcher::new("MOVZ", "x 10 100101 xx xxxxxxxxxxxxxxxx xxxxx", |v, w| {
        v.move_wide(w, MoveWideOp::Zero)
    }));
    table.push(Matcher::new("MOVK", "x 11 100101 xx xxxxxxxxxxxxxxxx xxxxx", |v, w| {
        v.move_wide(w, MoveWideOp::Keep)
    }));

    // Bitfield.
    table.push(Matcher::new("SBFM", "x 00 100110 x xxxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.sbfm(w)
    }));
    table.push(Matcher::new("BFM", "x 01 100110 x xxxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.bfm(w)
    }));
    table.push(Matcher::new("UBFM", "x 10 100110 x xxxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.ubfm(w)
    }));

    // Extract.
    table.push(Matcher::new("EXTR", "x 00 100111 x 0 xxxxx xxxxxx xxxxx xxxxx", |v, w| {
        v.extr(w)
    }));

    // Conditional compare.
    table.push(Matcher::new("CCMN_reg", "x 0 1 11010010 xxxxx xxxx 0 0 xxxxx 0 xxxx", |v, w| {
        v.cond_compare(w, false, false)
    }));
    table.push(Matcher::new("CCMP_reg", "x 1 1 11010010 xxxxx xxxx 0 0 xxxxx 0 xxxx", |v, w| {
        v.cond_compare(w, true, false)
    }));
    table.push(Matcher::new("CCMN_imm", "x 0 1 11010010 xxxxx xxxx 1 0 xxxxx 0 xxxx", |v, w| {
        v.cond_compare(w, false, true)
    }));
    table.push(Matcher::new("CCMP_imm", "x 1 1 11010010 xxxxx xxxx 1 0 xxxxx 0 xxxx", |v, w| {
        v.cond_compare(w, true, true)
    }));

    // Conditional select.
    table.push(Matcher::new("CSEL", "x 0 0 11010100 xxxxx xxxx 00 xxxxx xxxxx", |v, w| {
        v.cond_select(w, CondSelectOp::Plain)
    }));
    table.push(Matcher::new("CSINC", "x 0 0 11010100 xxxxx xxxx 01 xxxxx xxxxx", |v, w| {
        v.cond_select(w, CondSelectOp::Increment)
    }));
    table.push(Matcher::new("CSINV", "x 1 0 11010100 xxxxx xxxx 00 xxxxx xxxxx", |v, w| {
        v.cond_select(w, CondSelectOp::Invert)
    }));
    table.push(Matcher::new("CSNEG", "x 1 0 11010100 xxxxx xxxx 01 xxxxx xxxxx", |v, w| {
        v.cond_select(w, CondSelectOp::Negate)
    }));

    // Data processing (3 source).
    table.push(Matcher::new("MADD", "x 00 11011 000 xxxxx 0 xxxxx xxxxx xxxxx", |v, w| {
        v.madd_msub(w, false)
    }));
    table.push(Matcher::new("MSUB", "x 00 11011 000 xxxxx 1 xxxxx xxxxx xxxxx", |v, w| {
        v.madd_msub(w, true)
    }));
    table.push(Matcher::new("SMULH", "1 00 11011 010 xxxxx 0 11111 xxxxx xxxxx", |v, w| {
        v.mul_high(w, true)
    }));
    table.push(Matcher::new("UMULH", "1 00 11011 110 xxxxx 0 11111 xxxxx xxxxx", |v, w| {
        v.mul_high(w, false)
    }));

    // Data processing (2 source).
    table.push(Matcher::new("UDIV", "x 0 0 11010110 xxxxx 000010 xxxxx xxxxx", |v, w| {
        v.div(w, false)
    }));
    table.push(Matcher::new("SDIV", "x 0 0 11010110 xxxxx 000011 xxxxx xxxxx", |v, w| {
        v.div(w, true)
    }));
    table.push(Matcher::new("LSLV", "x 0 0 11010110 xxxxx 001000 xxxxx xxxxx", |v, w| {
        v.shift_variable(w, 0b00)
    }));
    table.push(Matcher::new("LSRV", "x 0 0 11010110 xxxxx 001001 xxxxx xxxxx", |v, w| {
        v.shift_variable(w, 0b01)
    }));
    table.push(Matcher::new("ASRV", "x 0 0 11010110 xxxxx 001010 xxxxx xxxxx", |v, w| {
        v.shift_variable(w, 0b10)
    }));
    table.push(Matcher::new("RORV", "x 0 0 11010110 xxxxx 001011 xxxxx xxxxx", |v, w| {
        v.shift_variable(w, 0b11)
    }));

    // Data processing (1 source).
    table.push(Matcher::new("RBIT", "x 1 0 11010110 00000 000000 xxxxx xxxxx", |v, w| {
        v.rbit(w)
    }));
    table.push(Matcher::new("REV16", "x 1 0 11010110 00000 000001 xxxxx xxxxx", |v, w| {
        v.rev16(w)
    }));
    table.push(Matcher::new("REV32", "x 1 0 11010110 00000 000010 xxxxx xxxxx", |v, w| {
        v.rev32(w)
    }));
    table.push(Matcher::new("REV64", "1 1 0 11010110 00000 000011 xxxxx xxxxx", |v, w| {
        v.rev64(w)
    }));
    table.push(Matcher::new("CLZ", "x 1 0 11010110 00000 000100 xxxxx xxxxx", |v, w| {
        v.clz(w)
    }));
}

#[derive(Copy, Clone, PartialEq)]
enum LogicalOp {
    And,
    Orr,
    Eor,
}

#[derive(Copy, Clone)]
enum MoveWideOp {
    Not,
    Zero,
    Keep,
}

#[derive(Copy, Clone)]
enum CondSelectOp {
    Plain,
    Increment,
    Invert,
    Negate,
}

fn operand_regs(w: u32) -> (Reg, Reg, Reg) {
    (
        Reg::from_bits(field(w, 20, 16)),
        Reg::from_bits(field(w, 9, 5)),
        Reg::from_bits(field(w, 4, 0)),
    )
}

fn datasize(w: u32) -> u32 {
    if bit(w, 31) {
        64
    } else {
        32
    }
}

impl TranslatorVisitor {
    fn adr(&mut self, immlo: u32, immhi: u32, rd: Reg) -> bool {
        let imm = sext64(u64::from(immhi) << 2 | u64::from(immlo), 21);
        let value = self.ir.imm64(self.pc().wrapping_add(imm as u64));
        self.set_x(64, rd, value);
        true
    }

    fn adrp(&mut self, immlo: u32, immhi: u32, rd: Reg) -> bool {
        let imm = sext64(u64::from(immhi) << 2 | u64::from(immlo), 21) << 12;
        let base = self.pc() & !0xfff;
        let value = self.ir.imm64(base.wrapping_add(imm as u64));
        self.set_x(64, rd, value);
        true
    }

    fn add_sub_imm(&mut self, w: u32, is_sub: bool, setflags: bool) -> bool {
        let shift = field(w, 23, 22);
        let imm12 = u64::from(field(w, 21, 10));
        let rn = Reg::from_bits(field(w, 9, 5));
        let rd = Reg::from_bits(field(w, 4, 0));

        let imm = match shift {
            0b00 => imm12,
            0b01 => imm12 << 12,
            _ => return self.reserved_value(),
        };

        let ds = datasize(w);
        let operand1 = self.xn_or_sp(ds, rn);
        let operand2 = self.i(ds, imm);

        let result = if is_sub {
            self.ir.sub(operand1, operand2)
        } else {
            self.ir.add(operand1, operand2)
        };

        if setflags {
            let nzcv = self.ir.nzcv_from(result);
            self.ir.a64_set_nzcv(nzcv);
            self.set_x(ds, rd, result);
        } else {
            self.set_xd_or_sp(ds, rd, result);
        }
        true
    }

    fn add_sub_shift(&mut self, w: u32, is_sub: bool, setflags: bool) -> bool {
        let shift = field(w, 23, 22);
        let imm6 = field(w, 15, 10);
        let (rm, rn, rd) = operand_regs(w);

        if shift == 0b11 {
            return self.reserved_value();
        }
        if !bit(w, 31) && imm6 & 0b100000 != 0 {
            return self.reserved_value();
        }

        let ds = datasize(w);
        let operand1 = self.x(ds, rn);
        let operand2 = self.shift_reg(ds, rm, shift, imm6 as u8);

        let result = if is_sub {
            self.ir.sub(operand1, operand2)
        } else {
            self.ir.add(operand1, operand2)
        };

        if setflags {
            let nzcv = self.ir.nzcv_from(result);
            self.ir.a64_set_nzcv(nzcv);
        }
        self.set_x(ds, rd, result);
        true
    }

    fn add_sub_ext(&mut self, w: u32, is_sub: bool, setflags: bool) -> bool {
        let (rm, rn, rd) = operand_regs(w);
        let option = field(w, 15, 13);
        let imm3 = field(w, 12, 10);

        if imm3 > 4 {
            return self.reserved_value();
        }

        let ds = datasize(w);
        let operand1 = self.xn_or_sp(ds, rn);
        let operand2 = self.extend_reg(ds, rm, option, imm3 as u8);

        let result = if is_sub {
            self.ir.sub(operand1, operand2)
        } else {
            self.ir.add(operand1, operand2)
        };

        if setflags {
            let nzcv = self.ir.nzcv_from(result);
            self.ir.a64_set_nzcv(nzcv);
            self.set_x(ds, rd, result);
        } else {
            self.set_xd_or_sp(ds, rd, result);
        }
        true
    }

    fn adc_sbc(&mut self, w: u32, is_sbc: bool, setflags: bool) -> bool {
        let (rm, rn, rd) = operand_regs(w);
        let ds = datasize(w);

        let operand1 = self.x(ds, rn);
        let operand2 = self.x(ds, rm);
        let carry = self.ir.a64_get_c_flag();

        let result = if is_sbc {
            self.ir.sub_with_carry(operand1, operand2, carry)
        } else {
            self.ir.add_with_carry(operand1, operand2, carry)
        };

        if setflags {
            let nzcv = self.ir.nzcv_from(result);
            self.ir.a64_set_nzcv(nzcv);
        }
        self.set_x(ds, rd, result);
        true
    }

    fn logical_imm(&mut self, w: u32, op: LogicalOp, setflags: bool) -> bool {
        let imm_n = bit(w, 22);
        let immr = field(w, 21, 16);
        let imms = field(w, 15, 10);
        let rn = Reg::from_bits(field(w, 9, 5));
        let rd = Reg::from_bits(field(w, 4, 0));

        if !bit(w, 31) && imm_n {
            return self.reserved_value();
        }

        let Some(masks) = decode_bit_masks(imm_n, imms, immr, true) else {
            return self.reserved_value();
        };

        let ds = datasize(w);
        let operand1 = self.x(ds, rn);
        let imm = self.i(ds, masks.wmask);

        let result = match op {
            LogicalOp::And => self.ir.and_(operand1, imm),
            LogicalOp::Orr => self.ir.or_(operand1, imm),
            LogicalOp::Eor => self.ir.eor(operand1, imm),
        };

        if setflags {
            let nzcv = self.ir.nzcv_from(result);
            self.ir.a64_set_nzcv(nzcv);
            self.set_x(ds, rd, result);
        } else {
            self.set_xd_or_sp(ds, rd, result);
        }
        true
    }

    fn logical_shift(&mut self, w: u32, op: LogicalOp, invert: bool, setflags: bool) -> bool {
        let shift = field(w, 23, 22);
        let (rm, rn, rd) = operand_regs(w);
        let imm6 = field(w, 15, 10);

        if !bit(w, 31) && imm6 & 0b100000 != 0 {
            return self.reserved_value();
        }

        let ds = datasize(w);
        let operand1 = self.x(ds, rn);
        let operand2 = self.shift_reg(ds, rm, shift, imm6 as u8);

        let result = match (op, invert) {
            (LogicalOp::And, false) => self.ir.and_(operand1, operand2),
            (LogicalOp::And, true) => self.ir.and_not(operand1, operand2),
            (LogicalOp::Orr, false) => self.ir.or_(operand1, operand2),
            (LogicalOp::Eor, false) => self.ir.eor(operand1, operand2),
            (LogicalOp::Orr, true) => {
                let inverted = self.ir.not_(operand2);
                self.ir.or_(operand1, inverted)
            }
            (LogicalOp::Eor, true) => {
                let inverted = self.ir.not_(operand2);
                self.ir.eor(operand1, inverted)
            }
        };

        if setflags {
            let nzcv = self.ir.nzcv_from(result);
            self.ir.a64_set_nzcv(nzcv);
        }
        self.set_x(ds, rd, result);
        true
    }

    fn move_wide(&mut self, w: u32, op: MoveWideOp) -> bool {
        let hw = field(w, 22, 21);
        let imm16 = u64::from(field(w, 20, 5));
        let rd = Reg::from_bits(field(w, 4, 0));

        if !bit(w, 31) && hw & 0b10 != 0 {
            return self.unallocated_encoding();
        }

        let ds = datasize(w);
        let pos = hw * 16;

        let value = match op {
            MoveWideOp::Zero => self.i(ds, imm16 << pos),
            MoveWideOp::Not => self.i(ds, !(imm16 << pos)),
            MoveWideOp::Keep => {
                let old = self.x(ds, rd);
                let cleared = self.i(ds, !(0xffffu64 << pos));
                let masked = self.ir.and_(old, cleared);
                let insert = self.i(ds, imm16 << pos);
                self.ir.or_(masked, insert)
            }
        };

        self.set_x(ds, rd, value);
        true
    }

    fn bitfield_prelude(&mut self, w: u32) -> Option<(u32, u32, u32, super::translate::BitMasks)> {
        let imm_n = bit(w, 22);
        let immr = field(w, 21, 16);
        let imms = field(w, 15, 10);

        if bit(w, 31) && !imm_n {
            return None;
        }
        if !bit(w, 31) && (imm_n || immr & 0b100000 != 0 || imms & 0b100000 != 0) {
            return None;
        }

        let masks = decode_bit_masks(imm_n, imms, immr, false)?;
        Some((immr, imms, datasize(w), masks))
    }

    fn sbfm(&mut self, w: u32) -> bool {
        let Some((immr, imms, ds, masks)) = self.bitfield_prelude(w) else {
            return self.reserved_value();
        };
        let rn = Reg::from_bits(field(w, 9, 5));
        let rd = Reg::from_bits(field(w, 4, 0));

        let src = self.x(ds, rn);
        let r = self.ir.imm8(immr as u8);
        let rotated = self.ir.ror(src, r);
        let wmask = self.i(ds, masks.wmask);
        let mut bot = self.ir.and_(rotated, wmask);

        // Replicate bit S across the whole register.
        let up = self.ir.imm8((ds - 1 - imms) as u8);
        let down = self.ir.imm8((ds - 1) as u8);
        let shifted = self.ir.lsl(src, up);
        let top = self.ir.asr(shifted, down);

        let not_tmask = self.i(ds, !masks.tmask);
        let tmask = self.i(ds, masks.tmask);
        let top = self.ir.and_(top, not_tmask);
        bot = self.ir.and_(bot, tmask);
        let result = self.ir.or_(top, bot);
        self.set_x(ds, rd, result);
        true
    }

    fn bfm(&mut self, w: u32) -> bool {
        let Some((immr, _, ds, masks)) = self.bitfield_prelude(w) else {
            return self.reserved_value();
        };
        let rn = Reg::from_bits(field(w, 9, 5));
        let rd = Reg::from_bits(field(w, 4, 0));

        let dst = self.x(ds, rd);
        let src = self.x(ds, rn);

        let r = self.ir.imm8(immr as u8);
        let rotated = self.ir.ror(src, r);
        let not_wmask = self.i(ds, !masks.wmask);
        let wmask = self.i(ds, masks.wmask);
        let keep = self.ir.and_(dst, not_wmask);
        let insert = self.ir.and_(rotated, wmask);
        let bot = self.ir.or_(keep, insert);

        let not_tmask = self.i(ds, !masks.tmask);
        let tmask = self.i(ds, masks.tmask);
        let keep_top = self.ir.and_(dst, not_tmask);
        let bot_masked = self.ir.and_(bot, tmask);
        let result = self.ir.or_(keep_top, bot_masked);
        self.set_x(ds, rd, result);
        true
    }

    fn ubfm(&mut self, w: u32) -> bool {
        let Some((immr, _, ds, masks)) = self.bitfield_prelude(w) else {
            return self.reserved_value();
        };
        let rn = Reg::from_bits(field(w, 9, 5));
        let rd = Reg::from_bits(field(w, 4, 0));

        let src = self.x(ds, rn);
        let r = self.ir.imm8(immr as u8);
        let rotated = self.ir.ror(src, r);
        let wmask = self.i(ds, masks.wmask);
        let bot = self.ir.and_(rotated, wmask);
        let tmask = self.i(ds, masks.tmask);
        let result = self.ir.and_(bot, tmask);
        self.set_x(ds, rd, result);
        true
    }

    fn extr(&mut self, w: u32) -> bool {
        let sf = bit(w, 31);
        let imm_n = bit(w, 22);
        let (rm, rn, rd) = operand_regs(w);
        let imms = field(w, 15, 10);

        if imm_n != sf {
            return self.unallocated_encoding();
        }
        if !sf && imms & 0b100000 != 0 {
            return self.reserved_value();
        }

        let ds = datasize(w);
        let m = self.x(ds, rm);
        let n = self.x(ds, rn);
        let lsb = self.ir.imm8(imms as u8);
        let result = self.ir.extract_register(m, n, lsb);
        self.set_x(ds, rd, result);
        true
    }

    fn cond_compare(&mut self, w: u32, is_cmp: bool, is_imm: bool) -> bool {
        let ds = datasize(w);
        let cond = Cond::from_bits(field(w, 15, 12));
        let rn = Reg::from_bits(field(w, 9, 5));
        let flags = field(w, 3, 0) << 28;

        let operand1 = self.x(ds, rn);
        let operand2 = if is_imm {
            self.i(ds, u64::from(field(w, 20, 16)))
        } else {
            let rm = Reg::from_bits(field(w, 20, 16));
            self.x(ds, rm)
        };

        let compared = if is_cmp {
            let carry = self.ir.imm1(true);
            self.ir.sub_with_carry(operand1, operand2, carry)
        } else {
            let carry = self.ir.imm1(false);
            self.ir.add_with_carry(operand1, operand2, carry)
        };
        let then_flags = self.ir.nzcv_from(compared);
        let raw = self.ir.imm32(flags);
        let else_flags = self.ir.nzcv_from_packed_flags(raw);
        let merged = self.ir.conditional_select(cond, then_flags, else_flags);
        self.ir.a64_set_nzcv(merged);
        true
    }

    fn cond_select(&mut self, w: u32, op: CondSelectOp) -> bool {
        let ds = datasize(w);
        let (rm, rn, rd) = operand_regs(w);
        let cond = Cond::from_bits(field(w, 15, 12));

        let operand1 = self.x(ds, rn);
        let operand2 = self.x(ds, rm);

        let else_value = match op {
            CondSelectOp::Plain => operand2,
            CondSelectOp::Increment => {
                let one = self.i(ds, 1);
                self.ir.add(operand2, one)
            }
            CondSelectOp::Invert => self.ir.not_(operand2),
            CondSelectOp::Negate => {
                let inverted = self.ir.not_(operand2);
                let one = self.i(ds, 1);
                self.ir.add(inverted, one)
            }
        };

        let result = self.ir.conditional_select(cond, operand1, else_value);
        self.set_x(ds, rd, result);
        true
    }

    fn madd_msub(&mut self, w: u32, is_sub: bool) -> bool {
        let ds = datasize(w);
        let (rm, rn, rd) = operand_regs(w);
        let ra = Reg::from_bits(field(w, 14, 10));

        let a = self.x(ds, ra);
        let n = self.x(ds, rn);
        let m = self.x(ds, rm);

        let product = self.ir.mul(n, m);
        let result = if is_sub {
            self.ir.sub(a, product)
        } else {
            self.ir.add(a, product)
        };
        self.set_x(ds, rd, result);
        true
    }

    fn mul_high(&mut self, w: u32, signed: bool) -> bool {
        let (rm, rn, rd) = operand_regs(w);

        let n = self.x(64, rn);
        let m = self.x(64, rm);
        let result = if signed {
            self.ir.signed_multiply_high(n, m)
        } else {
            self.ir.unsigned_multiply_high(n, m)
        };
        self.set_x(64, rd, result);
        true
    }

    fn div(&mut self, w: u32, signed: bool) -> bool {
        let ds = datasize(w);
        let (rm, rn, rd) = operand_regs(w);

        let n = self.x(ds, rn);
        let m = self.x(ds, rm);
        let result = if signed {
            self.ir.signed_div(n, m)
        } else {
            self.ir.unsigned_div(n, m)
        };
        self.set_x(ds, rd, result);
        true
    }

    fn shift_variable(&mut self, w: u32, shift: u32) -> bool {
        let ds = datasize(w);
        let (rm, rn, rd) = operand_regs(w);

        let operand = self.x(ds, rn);
        let amount_full = self.x(ds, rm);
        // Shift amount is taken mod the datasize.
        let mask = self.i(ds, u64::from(ds - 1));
        let amount_masked = self.ir.and_(amount_full, mask);
        let amount = match ds {
            32 => {
                let half = self.ir.least_significant_half(amount_masked);
                self.least_byte_of_half(half)
            }
            _ => {
                let word = self.ir.least_significant_word(amount_masked);
                let half = self.ir.least_significant_half(word);
                self.least_byte_of_half(half)
            }
        };

        let result = match shift {
            0b00 => self.ir.lsl(operand, amount),
            0b01 => self.ir.lsr(operand, amount),
            0b10 => self.ir.asr(operand, amount),
            _ => self.ir.ror(operand, amount),
        };
        self.set_x(ds, rd, result);
        true
    }

    fn least_byte_of_half(&mut self, half: Value) -> Value {
        let word = self.ir.zero_extend_half_to_word(half);
        self.ir.least_significant_byte(word)
    }

    fn rbit(&mut self, w: u32) -> bool {
        let ds = datasize(w);
        let rn = Reg::from_bits(field(w, 9, 5));
        let rd = Reg::from_bits(field(w, 4, 0));

        let operand = self.x(ds, rn);
        let result = self.ir.reverse_bits(operand);
        self.set_x(ds, rd, result);
        true
    }

    fn rev16(&mut self, w: u32) -> bool {
        let ds = datasize(w);
        let rn = Reg::from_bits(field(w, 9, 5));
        let rd = Reg::from_bits(field(w, 4, 0));

        let operand = self.x(ds, rn);
        let hi_mask = self.i(ds, 0xff00_ff00_ff00_ff00);
        let lo_mask = self.i(ds, 0x00ff_00ff_00ff_00ff);
        let eight = self.ir.imm8(8);
        let hi = self.ir.and_(operand, hi_mask);
        let hi_shifted = self.ir.lsr(hi, eight);
        let lo = self.ir.and_(operand, lo_mask);
        let lo_shifted = self.ir.lsl(lo, eight);
        let result = self.ir.or_(hi_shifted, lo_shifted);
        self.set_x(ds, rd, result);
        true
    }

    fn rev32(&mut self, w: u32) -> bool {
        let rn = Reg::from_bits(field(w, 9, 5));
        let rd = Reg::from_bits(field(w, 4, 0));

        if !bit(w, 31) {
            // 32-bit REV.
            let operand = self.x(32, rn);
            let result = self.ir.byte_reverse_word(operand);
            self.set_x(32, rd, result);
            return true;
        }

        // Byte-reverse each word of the 64-bit register: full byte reverse
        // followed by a word swap.
        let operand = self.x(64, rn);
        let reversed = self.ir.byte_reverse_dual(operand);
        let thirty_two = self.ir.imm8(32);
        let result = self.ir.ror(reversed, thirty_two);
        self.set_x(64, rd, result);
        true
    }

    fn rev64(&mut self, w: u32) -> bool {
        let rn = Reg::from_bits(field(w, 9, 5));
        let rd = Reg::from_bits(field(w, 4, 0));

        let operand = self.x(64, rn);
        let result = self.ir.byte_reverse_dual(operand);
        self.set_x(64, rd, result);
        true
    }

    fn clz(&mut self, w: u32) -> bool {
        let ds = datasize(w);
        let rn = Reg::from_bits(field(w, 9, 5));
        let rd = Reg::from_bits(field(w, 4, 0));

        let operand = self.x(ds, rn);
        let result = self.ir.count_leading_zeros(operand);
        self.set_x(ds, rd, result);
        true
    }
}
