//! A32 load/store instructions.

use super::translate::TranslatorVisitor;
use super::Reg;
use crate::frontend::bits::*;
use crate::frontend::decoder::Matcher;
use crate::ir::{AccType, Terminal, Value};

pub(super) fn fill_table(table: &mut Vec<Matcher<TranslatorVisitor>>) {
    table.push(Matcher::new(
        "LDREX",
        "xxxx 00011001 xxxx xxxx 111110011111",
        |v, w| {
            v.ldrex(
                Reg::from_bits(field(w, 19, 16)),
                Reg::from_bits(field(w, 15, 12)),
            )
        },
    ));
    table.push(Matcher::new(
        "STREX",
        "xxxx 00011000 xxxx xxxx 11111001 xxxx",
        |v, w| {
            v.strex(
                Reg::from_bits(field(w, 19, 16)),
                Reg::from_bits(field(w, 15, 12)),
                Reg::from_bits(field(w, 3, 0)),
            )
        },
    ));
    table.push(Matcher::new(
        "LS_halfword_imm",
        "xxxx 000 xx 1 xx xxxx xxxx xxxx 1011 xxxx",
        |v, w| v.extra_load_store_imm(w, ExtraOp::Half),
    ));
    table.push(Matcher::new(
        "LS_halfword_reg",
        "xxxx 000 xx 0 xx xxxx xxxx 0000 1011 xxxx",
        |v, w| v.extra_load_store_reg(w, ExtraOp::Half),
    ));
    table.push(Matcher::new(
        "LS_signed_byte_imm",
        "xxxx 000 xx 1 x 1 xxxx xxxx xxxx 1101 xxxx",
        |v, w| v.extra_load_store_imm(w, ExtraOp::SignedByte),
    ));
    table.push(Matcher::new(
        "LS_signed_byte_reg",
        "xxxx 000 xx 0 x 1 xxxx xxxx 0000 1101 xxxx",
        |v, w| v.extra_load_store_reg(w, ExtraOp::SignedByte),
    ));
    table.push(Matcher::new(
        "LS_signed_half_imm",
        "xxxx 000 xx 1 x 1 xxxx xxxx xxxx 1111 xxxx",
        |v, w| v.extra_load_store_imm(w, ExtraOp::SignedHalf),
    ));
    table.push(Matcher::new(
        "LS_signed_half_reg",
        "xxxx 000 xx 0 x 1 xxxx xxxx 0000 1111 xxxx",
        |v, w| v.extra_load_store_reg(w, ExtraOp::SignedHalf),
    ));
    table.push(Matcher::new(
        "LS_word_byte_imm",
        "xxxx 010 xxxxx xxxx xxxx xxxxxxxxxxxx",
        |v, w| v.load_store_imm(w),
    ));
    table.push(Matcher::new(
        "LS_word_byte_reg",
        "xxxx 011 xxxxx xxxx xxxx xxxxx xx 0 xxxx",
        |v, w| v.load_store_reg(w),
    ));
    table.push(Matcher::new(
        "LDM_STM",
        "xxxx 100 xxxxx xxxx xxxxxxxxxxxxxxxx",
        |v, w| v.load_store_multiple(w),
    ));
}

/// The "extra" load/store group (halfword and signed forms).
#[derive(Copy, Clone)]
enum ExtraOp {
    Half,
    SignedByte,
    SignedHalf,
}

impl TranslatorVisitor {
    /// Computes the effective address for the P/U/W forms and performs the
    /// base writeback. Returns the access address.
    fn index_address(
        &mut self,
        p: bool,
        u: bool,
        w: bool,
        rn: Reg,
        offset: Value,
    ) -> Option<Value> {
        let wback = !p || w;
        if wback && (rn == Reg::PC) {
            return None;
        }

        let base = self.get_register(rn);
        let indexed = if u {
            self.ir.add(base, offset)
        } else {
            self.ir.sub(base, offset)
        };
        let address = if p { indexed } else { base };
        if wback {
            self.set_register(rn, indexed);
        }
        Some(address)
    }

    fn ldrex(&mut self, rn: Reg, rd: Reg) -> bool {
        if rn == Reg::PC || rd == Reg::PC {
            return self.unpredictable_instruction();
        }
        let address = self.get_register(rn);
        let data = self
            .ir
            .a32_exclusive_read_memory(4, address, AccType::Atomic);
        self.set_register(rd, data);
        true
    }

    fn strex(&mut self, rn: Reg, rd: Reg, rm: Reg) -> bool {
        if rn == Reg::PC || rd == Reg::PC || rm == Reg::PC {
            return self.unpredictable_instruction();
        }
        if rd == rn || rd == rm {
            return self.unpredictable_instruction();
        }
        let address = self.get_register(rn);
        let value = self.get_register(rm);
        let status = self
            .ir
            .a32_exclusive_write_memory(4, address, value, AccType::Atomic);
        self.set_register(rd, status);
        true
    }

    fn load_store_imm(&mut self, w: u32) -> bool {
        let p = bit(w, 24);
        let u = bit(w, 23);
        let is_byte = bit(w, 22);
        let writeback = bit(w, 21);
        let is_load = bit(w, 20);
        let rn = Reg::from_bits(field(w, 19, 16));
        let rt = Reg::from_bits(field(w, 15, 12));
        let imm12 = field(w, 11, 0);

        // P=0 with W=1 is the unprivileged (LDRT/STRT) form.
        let acc = if !p && writeback {
            AccType::Unpriv
        } else {
            AccType::Normal
        };

        let offset = self.ir.imm32(imm12);
        let Some(address) = self.index_address(p, u, writeback, rn, offset) else {
            return self.unpredictable_instruction();
        };

        self.access_word_or_byte(is_load, is_byte, rt, address, acc)
    }

    fn load_store_reg(&mut self, w: u32) -> bool {
        let p = bit(w, 24);
        let u = bit(w, 23);
        let is_byte = bit(w, 22);
        let writeback = bit(w, 21);
        let is_load = bit(w, 20);
        let rn = Reg::from_bits(field(w, 19, 16));
        let rt = Reg::from_bits(field(w, 15, 12));
        let imm5 = field(w, 11, 7);
        let shift_type = field(w, 6, 5);
        let rm = Reg::from_bits(field(w, 3, 0));

        if rm == Reg::PC {
            return self.unpredictable_instruction();
        }

        let acc = if !p && writeback {
            AccType::Unpriv
        } else {
            AccType::Normal
        };

        let index = self.get_register(rm);
        let carry = self.carry_in();
        let (offset, _) = self.emit_imm_shift(index, shift_type, imm5, carry);
        let Some(address) = self.index_address(p, u, writeback, rn, offset) else {
            return self.unpredictable_instruction();
        };

        self.access_word_or_byte(is_load, is_byte, rt, address, acc)
    }

    fn access_word_or_byte(
        &mut self,
        is_load: bool,
        is_byte: bool,
        rt: Reg,
        address: Value,
        acc: AccType,
    ) -> bool {
        match (is_load, is_byte) {
            (true, false) => {
                let data = self.ir.a32_read_memory(4, address, acc);
                if rt == Reg::PC {
                    self.ir.a32_bx_write_pc(data);
                    self.ir.block.set_terminal(Terminal::PopRSBHint);
                    return false;
                }
                self.set_register(rt, data);
            }
            (true, true) => {
                if rt == Reg::PC {
                    return self.unpredictable_instruction();
                }
                let data = self.ir.a32_read_memory(1, address, acc);
                let extended = self.ir.zero_extend_byte_to_word(data);
                self.set_register(rt, extended);
            }
            (false, false) => {
                let data = self.get_register(rt);
                self.ir.a32_write_memory(4, address, data, acc);
            }
            (false, true) => {
                if rt == Reg::PC {
                    return self.unpredictable_instruction();
                }
                let full = self.get_register(rt);
                let data = self.ir.least_significant_byte(full);
                self.ir.a32_write_memory(1, address, data, acc);
            }
        }
        true
    }

    fn extra_load_store_imm(&mut self, w: u32, op: ExtraOp) -> bool {
        let p = bit(w, 24);
        let u = bit(w, 23);
        let writeback = bit(w, 21);
        let is_load = bit(w, 20);
        let rn = Reg::from_bits(field(w, 19, 16));
        let rt = Reg::from_bits(field(w, 15, 12));
        let imm8 = field(w, 11, 8) << 4 | field(w, 3, 0);

        let offset = self.ir.imm32(imm8);
        let Some(address) = self.index_address(p, u, writeback, rn, offset) else {
            return self.unpredictable_instruction();
        };
        self.extra_access(w, op, is_load, rt, address)
    }

    fn extra_load_store_reg(&mut self, w: u32, op: ExtraOp) -> bool {
        let p = bit(w, 24);
        let u = bit(w, 23);
        let writeback = bit(w, 21);
        let is_load = bit(w, 20);
        let rn = Reg::from_bits(field(w, 19, 16));
        let rt = Reg::from_bits(field(w, 15, 12));
        let rm = Reg::from_bits(field(w, 3, 0));

        if rm == Reg::PC {
            return self.unpredictable_instruction();
        }

        let offset = self.get_register(rm);
        let Some(address) = self.index_address(p, u, writeback, rn, offset) else {
            return self.unpredictable_instruction();
        };
        self.extra_access(w, op, is_load, rt, address)
    }

    fn extra_access(&mut self, _w: u32, op: ExtraOp, is_load: bool, rt: Reg, address: Value) -> bool {
        if rt == Reg::PC {
            return self.unpredictable_instruction();
        }
        match (op, is_load) {
            (ExtraOp::Half, true) => {
                let data = self.ir.a32_read_memory(2, address, AccType::Normal);
                let extended = self.ir.zero_extend_half_to_word(data);
                self.set_register(rt, extended);
            }
            (ExtraOp::Half, false) => {
                let full = self.get_register(rt);
                let data = self.ir.least_significant_half(full);
                self.ir
                    .a32_write_memory(2, address, data, AccType::Normal);
            }
            (ExtraOp::SignedByte, true) => {
                let data = self.ir.a32_read_memory(1, address, AccType::Normal);
                let extended = self.ir.sign_extend_byte_to_word(data);
                self.set_register(rt, extended);
            }
            (ExtraOp::SignedHalf, true) => {
                let data = self.ir.a32_read_memory(2, address, AccType::Normal);
                let extended = self.ir.sign_extend_half_to_word(data);
                self.set_register(rt, extended);
            }
            // The store encodings in the signed rows are the doubleword
            // forms, which this port does not carry.
            (ExtraOp::SignedByte, false) | (ExtraOp::SignedHalf, false) => {
                return self.unallocated_encoding();
            }
        }
        true
    }

    fn load_store_multiple(&mut self, w: u32) -> bool {
        let p = bit(w, 24);
        let u = bit(w, 23);
        let user = bit(w, 22);
        let writeback = bit(w, 21);
        let is_load = bit(w, 20);
        let rn = Reg::from_bits(field(w, 19, 16));
        let list = field(w, 15, 0);

        if user {
            return self.unpredictable_instruction();
        }
        if rn == Reg::PC || list == 0 {
            return self.unpredictable_instruction();
        }
        if !is_load && list & (1 << 15) != 0 {
            // Storing the PC in a list is ARMv4 territory.
            return self.unpredictable_instruction();
        }
        if is_load && writeback && list & (1 << rn.index()) != 0 {
            return self.unpredictable_instruction();
        }

        let count = list.count_ones();
        let base = self.get_register(rn);
        let total = self.ir.imm32(4 * count);

        // Lowest-numbered register goes to the lowest address in all modes.
        let start = match (p, u) {
            // IA
            (false, true) => base,
            // IB
            (true, true) => {
                let four = self.ir.imm32(4);
                self.ir.add(base, four)
            }
            // DA
            (false, false) => {
                let offset = self.ir.imm32(4 * count - 4);
                self.ir.sub(base, offset)
            }
            // DB
            (true, false) => self.ir.sub(base, total),
        };

        let new_base = if u {
            self.ir.add(base, total)
        } else {
            self.ir.sub(base, total)
        };

        let mut slot = 0u32;
        let mut pc_data = None;
        for reg in 0..16 {
            if list & (1 << reg) == 0 {
                continue;
            }
            let offset = self.ir.imm32(4 * slot);
            let address = self.ir.add(start, offset);
            slot += 1;
            let reg = Reg::from_bits(reg);
            if is_load {
                let data = self.ir.a32_read_memory(4, address, AccType::Normal);
                if reg == Reg::PC {
                    pc_data = Some(data);
                } else {
                    self.set_register(reg, data);
                }
            } else {
                let data = self.get_register(reg);
                self.ir.a32_write_memory(4, address, data, AccType::Normal);
            }
        }

        if writeback {
            self.set_register(rn, new_base);
        }

        if let Some(data) = pc_data {
            self.ir.a32_bx_write_pc(data);
            self.ir.block.set_terminal(Terminal::PopRSBHint);
            return false;
        }
        true
    }
}
