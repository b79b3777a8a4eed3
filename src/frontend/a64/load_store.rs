//! A64 load/store instructions.

use super::translate::TranslatorVisitor;
use super::{Reg, Vec as VecReg};
use crate::frontend::bits::*;
use crate::frontend::decoder::Matcher;
use crate::ir::{AccType, Value};

pub(super) fn fill_table(table: &mut Vec<Matcher<TranslatorVisitor>>) {
    table.push(Matcher::new(
        "LS_exclusive",
        "xx 001000 x x x xxxxx x xxxxx xxxxx xxxxx",
        |v, w| v.load_store_exclusive(w),
    ));
    table.push(Matcher::new(
        "LS_literal",
        "xx 011 x 00 xxxxxxxxxxxxxxxxxxx xxxxx",
        |v, w| v.load_literal(w),
    ));
    table.push(Matcher::new(
        "LS_pair",
        "xx 101 x 0xx x xxxxxxx xxxxx xxxxx xxxxx",
        |v, w| v.load_store_pair(w),
    ));
    table.push(Matcher::new(
        "LS_reg_unsigned_imm",
        "xx 111 x 01 xx xxxxxxxxxxxx xxxxx xxxxx",
        |v, w| v.load_store_unsigned_imm(w),
    ));
    table.push(Matcher::new(
        "LS_reg_imm9",
        "xx 111 x 00 xx 0 xxxxxxxxx xx xxxxx xxxxx",
        |v, w| v.load_store_imm9(w),
    ));
    table.push(Matcher::new(
        "LS_reg_offset",
        "xx 111 x 00 xx 1 xxxxx xxx x 10 xxxxx xxxxx",
        |v, w| v.load_store_reg_offset(w),
    ));
}

/// What a load/store encoding does with its data register.
enum MemOp {
    Store,
    Load { regsize: u32, signed: bool },
    Prefetch,
}

impl TranslatorVisitor {
    /// Decodes size/opc for the integer register forms.
    fn int_mem_op(&mut self, size: u32, opc: u32) -> Option<(u32, MemOp)> {
        let datasize = 8 << size;
        let op = match opc {
            0b00 => MemOp::Store,
            0b01 => MemOp::Load {
                regsize: if size == 0b11 { 64 } else { 32 },
                signed: false,
            },
            0b10 if size == 0b11 => MemOp::Prefetch,
            0b10 => MemOp::Load {
                regsize: 64,
                signed: true,
            },
            0b11 if size >= 0b10 => return None,
            _ => MemOp::Load {
                regsize: 32,
                signed: true,
            },
        };
        Some((datasize, op))
    }

    fn do_int_load(
        &mut self,
        rt: Reg,
        address: Value,
        datasize: u32,
        regsize: u32,
        signed: bool,
        acc: AccType,
    ) {
        let data = self.mem_read(address, datasize / 8, acc);
        let extended = if signed {
            self.sign_extend(data, regsize)
        } else {
            self.zero_extend(data, regsize)
        };
        self.set_x(regsize, rt, extended);
    }

    fn do_int_store(&mut self, rt: Reg, address: Value, datasize: u32, acc: AccType) {
        let full = self.x(if datasize == 64 { 64 } else { 32 }, rt);
        let data = match datasize {
            8 => self.ir.least_significant_byte(full),
            16 => self.ir.least_significant_half(full),
            _ => full,
        };
        self.mem_write(address, datasize / 8, acc, data);
    }

    fn do_vec_load(&mut self, vt: VecReg, address: Value, datasize: u32) {
        let data = self.mem_read(address, datasize / 8, AccType::Vec);
        self.set_v_scalar(datasize, vt, data);
    }

    fn do_vec_store(&mut self, vt: VecReg, address: Value, datasize: u32) {
        let data = self.v_scalar(datasize, vt);
        self.mem_write(address, datasize / 8, AccType::Vec, data);
    }

    fn load_store_unsigned_imm(&mut self, w: u32) -> bool {
        let size = field(w, 31, 30);
        let is_vector = bit(w, 26);
        let opc = field(w, 23, 22);
        let imm12 = u64::from(field(w, 21, 10));
        let rn = Reg::from_bits(field(w, 9, 5));
        let rt_bits = field(w, 4, 0);

        if is_vector {
            let (datasize, is_load): (u32, bool) = match (opc, size) {
                (0b00, _) => (8 << size, false),
                (0b01, _) => (8 << size, true),
                (0b10, 0b00) => (128, false),
                (0b11, 0b00) => (128, true),
                _ => return self.unallocated_encoding(),
            };
            let offset = imm12 << (datasize / 8).trailing_zeros();
            let base = self.xn_or_sp(64, rn);
            let off = self.ir.imm64(offset);
            let address = self.ir.add(base, off);
            let vt = VecReg::from_bits(rt_bits);
            if is_load {
                self.do_vec_load(vt, address, datasize);
            } else {
                self.do_vec_store(vt, address, datasize);
            }
            return true;
        }

        let Some((datasize, op)) = self.int_mem_op(size, opc) else {
            return self.unallocated_encoding();
        };
        let offset = imm12 << size;
        let base = self.xn_or_sp(64, rn);
        let off = self.ir.imm64(offset);
        let address = self.ir.add(base, off);
        let rt = Reg::from_bits(rt_bits);

        match op {
            MemOp::Store => self.do_int_store(rt, address, datasize, AccType::Normal),
            MemOp::Load { regsize, signed } => {
                self.do_int_load(rt, address, datasize, regsize, signed, AccType::Normal)
            }
            MemOp::Prefetch => {}
        }
        true
    }

    fn load_store_imm9(&mut self, w: u32) -> bool {
        let size = field(w, 31, 30);
        let is_vector = bit(w, 26);
        let opc = field(w, 23, 22);
        let imm9 = sext64(u64::from(field(w, 20, 12)), 9);
        let idx = field(w, 11, 10);
        let rn = Reg::from_bits(field(w, 9, 5));
        let rt_bits = field(w, 4, 0);

        // 00: unscaled (LDUR/STUR), 01: post-index, 10: unprivileged,
        // 11: pre-index.
        let (wback, postindex, acc) = match idx {
            0b00 => (false, false, AccType::Normal),
            0b01 => (true, true, AccType::Normal),
            0b10 => (false, false, AccType::Unpriv),
            _ => (true, false, AccType::Normal),
        };

        if is_vector {
            if acc == AccType::Unpriv {
                return self.unallocated_encoding();
            }
            let (datasize, is_load) = match (opc, size) {
                (0b00, _) => (8 << size, false),
                (0b01, _) => (8 << size, true),
                (0b10, 0b00) => (128, false),
                (0b11, 0b00) => (128, true),
                _ => return self.unallocated_encoding(),
            };
            let vt = VecReg::from_bits(rt_bits);
            let address = self.compute_and_writeback(rn, imm9, wback, postindex);
            if is_load {
                self.do_vec_load(vt, address, datasize);
            } else {
                self.do_vec_store(vt, address, datasize);
            }
            return true;
        }

        let Some((datasize, op)) = self.int_mem_op(size, opc) else {
            return self.unallocated_encoding();
        };
        let rt = Reg::from_bits(rt_bits);

        if wback && rn == rt && !rn.is_31() {
            if !self.options.define_unpredictable_behaviour {
                return self.unpredictable_instruction();
            }
        }

        let address = self.compute_and_writeback(rn, imm9, wback, postindex);
        match op {
            MemOp::Store => self.do_int_store(rt, address, datasize, acc),
            MemOp::Load { regsize, signed } => {
                self.do_int_load(rt, address, datasize, regsize, signed, acc)
            }
            MemOp::Prefetch => {}
        }
        true
    }

    /// Base + offset addressing with optional pre/post writeback.
    fn compute_and_writeback(&mut self, rn: Reg, offset: i64, wback: bool, postindex: bool) -> Value {
        let base = self.xn_or_sp(64, rn);
        let off = self.ir.imm64(offset as u64);
        let indexed = self.ir.add(base, off);
        let address = if postindex { base } else { indexed };
        if wback {
            self.set_xd_or_sp(64, rn, indexed);
        }
        address
    }

    fn load_store_reg_offset(&mut self, w: u32) -> bool {
        let size = field(w, 31, 30);
        let is_vector = bit(w, 26);
        let opc = field(w, 23, 22);
        let rm = Reg::from_bits(field(w, 20, 16));
        let option = field(w, 15, 13);
        let s = bit(w, 12);
        let rn = Reg::from_bits(field(w, 9, 5));
        let rt_bits = field(w, 4, 0);

        if option & 0b010 == 0 {
            // Sub-word index extends are not valid address options.
            return self.unallocated_encoding();
        }

        if is_vector {
            let (datasize, is_load): (u32, bool) = match (opc, size) {
                (0b00, _) => (8 << size, false),
                (0b01, _) => (8 << size, true),
                (0b10, 0b00) => (128, false),
                (0b11, 0b00) => (128, true),
                _ => return self.unallocated_encoding(),
            };
            let shift = if s { (datasize / 8).trailing_zeros() as u8 } else { 0 };
            let offset = self.extend_reg(64, rm, option, shift);
            let base = self.xn_or_sp(64, rn);
            let address = self.ir.add(base, offset);
            let vt = VecReg::from_bits(rt_bits);
            if is_load {
                self.do_vec_load(vt, address, datasize);
            } else {
                self.do_vec_store(vt, address, datasize);
            }
            return true;
        }

        let Some((datasize, op)) = self.int_mem_op(size, opc) else {
            return self.unallocated_encoding();
        };
        let shift = if s { size as u8 } else { 0 };
        let offset = self.extend_reg(64, rm, option, shift);
        let base = self.xn_or_sp(64, rn);
        let address = self.ir.add(base, offset);
        let rt = Reg::from_bits(rt_bits);

        match op {
            MemOp::Store => self.do_int_store(rt, address, datasize, AccType::Normal),
            MemOp::Load { regsize, signed } => {
                self.do_int_load(rt, address, datasize, regsize, signed, AccType::Normal)
            }
            MemOp::Prefetch => {}
        }
        true
    }

    fn load_store_pair(&mut self, w: u32) -> bool {
        let opc = field(w, 31, 30);
        let is_vector = bit(w, 26);
        let mode = field(w, 25, 23);
        let is_load = bit(w, 22);
        let imm7 = sext64(u64::from(field(w, 21, 15)), 7);
        let rt2 = field(w, 14, 10);
        let rn = Reg::from_bits(field(w, 9, 5));
        let rt = field(w, 4, 0);

        let (wback, postindex) = match mode {
            0b001 => (true, true),
            0b010 => (false, false),
            0b011 => (true, false),
            _ => return self.unallocated_encoding(),
        };

        if is_vector {
            let datasize: u32 = match opc {
                0b00 => 32,
                0b01 => 64,
                0b10 => 128,
                _ => return self.unallocated_encoding(),
            };
            let offset = imm7 << (datasize / 8).trailing_zeros();
            let address = self.compute_and_writeback(rn, offset, wback, postindex);
            let step = self.ir.imm64(u64::from(datasize / 8));
            let address2 = self.ir.add(address, step);
            let vt = VecReg::from_bits(rt);
            let vt2 = VecReg::from_bits(rt2);
            if is_load {
                self.do_vec_load(vt, address, datasize);
                self.do_vec_load(vt2, address2, datasize);
            } else {
                self.do_vec_store(vt, address, datasize);
                self.do_vec_store(vt2, address2, datasize);
            }
            return true;
        }

        let (datasize, signed) = match opc {
            0b00 => (32u32, false),
            0b01 if is_load => (32, true),
            0b10 => (64, false),
            _ => return self.unallocated_encoding(),
        };
        let rt = Reg::from_bits(rt);
        let rt2 = Reg::from_bits(rt2);

        if is_load && rt == rt2 && !self.options.define_unpredictable_behaviour {
            return self.unpredictable_instruction();
        }
        if wback && !rn.is_31() && (rn == rt || rn == rt2) {
            if !self.options.define_unpredictable_behaviour {
                return self.unpredictable_instruction();
            }
        }

        let offset = imm7 << (datasize / 8).trailing_zeros();
        let address = self.compute_and_writeback(rn, offset, wback, postindex);
        let step = self.ir.imm64(u64::from(datasize / 8));
        let address2 = self.ir.add(address, step);
        let regsize = if signed { 64 } else { datasize };

        if is_load {
            self.do_int_load(rt, address, datasize, regsize, signed, AccType::Normal);
            self.do_int_load(rt2, address2, datasize, regsize, signed, AccType::Normal);
        } else {
            self.do_int_store(rt, address, datasize, AccType::Normal);
            self.do_int_store(rt2, address2, datasize, AccType::Normal);
        }
        true
    }

    fn load_literal(&mut self, w: u32) -> bool {
        let opc = field(w, 31, 30);
        let is_vector = bit(w, 26);
        let imm19 = sext64(u64::from(field(w, 23, 5)) << 2, 21);
        let rt = field(w, 4, 0);

        let address = self.ir.imm64(self.pc().wrapping_add(imm19 as u64));

        if is_vector {
            let datasize = match opc {
                0b00 => 32,
                0b01 => 64,
                0b10 => 128,
                _ => return self.unallocated_encoding(),
            };
            self.do_vec_load(VecReg::from_bits(rt), address, datasize);
            return true;
        }

        let rt = Reg::from_bits(rt);
        match opc {
            0b00 => self.do_int_load(rt, address, 32, 32, false, AccType::Normal),
            0b01 => self.do_int_load(rt, address, 64, 64, false, AccType::Normal),
            0b10 => self.do_int_load(rt, address, 32, 64, true, AccType::Normal),
            // PRFM (literal).
            _ => {}
        }
        true
    }

    fn load_store_exclusive(&mut self, w: u32) -> bool {
        let size = field(w, 31, 30);
        let o2 = bit(w, 23);
        let is_load = bit(w, 22);
        let o1 = bit(w, 21);
        let rs = Reg::from_bits(field(w, 20, 16));
        let o0 = bit(w, 15);
        let rt2 = field(w, 14, 10);
        let rn = Reg::from_bits(field(w, 9, 5));
        let rt = Reg::from_bits(field(w, 4, 0));

        // Pair forms and the CAS family are not allocated here.
        if o1 || rt2 != 0b11111 {
            return self.unallocated_encoding();
        }

        let datasize = 8u32 << size;
        let acc = if o0 { AccType::Ordered } else { AccType::Atomic };
        let address = self.xn_or_sp(64, rn);

        match (o2, is_load) {
            // STXR / STLXR.
            (false, false) => {
                if !rs.is_31()
                    && (rs == rn || rs == rt)
                    && !self.options.define_unpredictable_behaviour
                {
                    return self.unpredictable_instruction();
                }
                let full = self.x(if datasize == 64 { 64 } else { 32 }, rt);
                let data = match datasize {
                    8 => self.ir.least_significant_byte(full),
                    16 => self.ir.least_significant_half(full),
                    _ => full,
                };
                let status = self
                    .ir
                    .a64_exclusive_write_memory(datasize / 8, address, data, acc);
                self.set_x(32, rs, status);
            }
            // LDXR / LDAXR.
            (false, true) => {
                let data = self
                    .ir
                    .a64_exclusive_read_memory(datasize / 8, address, acc);
                let regsize = if datasize == 64 { 64 } else { 32 };
                let extended = self.zero_extend(data, regsize);
                self.set_x(regsize, rt, extended);
            }
            // STLR.
            (true, false) => {
                if rs != Reg::SP {
                    return self.unallocated_encoding();
                }
                self.do_int_store(rt, address, datasize, AccType::Ordered);
            }
            // LDAR.
            (true, true) => {
                if rs != Reg::SP {
                    return self.unallocated_encoding();
                }
                let regsize = if datasize == 64 { 64 } else { 32 };
                self.do_int_load(rt, address, datasize, regsize, false, AccType::Ordered);
            }
        }
        true
    }
}
