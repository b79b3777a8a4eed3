//! A64 branch instructions.

use super::translate::TranslatorVisitor;
use super::Reg;
use crate::frontend::bits::*;
use crate::frontend::decoder::Matcher;
use crate::ir::{Cond, Terminal};

pub(super) fn fill_table(table: &mut Vec<Matcher<TranslatorVisitor>>) {
    table.push(Matcher::new(
        "B_cond",
        "01010100 xxxxxxxxxxxxxxxxxxx 0 xxxx",
        |v, w| {
            let imm19 = field(w, 23, 5);
            let cond = Cond::from_bits(field(w, 3, 0));
            v.b_cond(imm19, cond)
        },
    ));
    table.push(Matcher::new(
        "B_uncond",
        "000101 xxxxxxxxxxxxxxxxxxxxxxxxxx",
        |v, w| v.b_uncond(field(w, 25, 0)),
    ));
    table.push(Matcher::new(
        "BL",
        "100101 xxxxxxxxxxxxxxxxxxxxxxxxxx",
        |v, w| v.bl(field(w, 25, 0)),
    ));
    table.push(Matcher::new(
        "BLR",
        "11010110 0011111 1 000000 xxxxx 00000",
        |v, w| v.blr(Reg::from_bits(field(w, 9, 5))),
    ));
    table.push(Matcher::new(
        "BR",
        "11010110 0001111 1 000000 xxxxx 00000",
        |v, w| v.br(Reg::from_bits(field(w, 9, 5))),
    ));
    table.push(Matcher::new(
        "RET",
        "11010110 0101111 1 000000 xxxxx 00000",
        |v, w| v.ret(Reg::from_bits(field(w, 9, 5))),
    ));
    table.push(Matcher::new(
        "CBZ",
        "x 011010 0 xxxxxxxxxxxxxxxxxxx xxxxx",
        |v, w| {
            v.cbz(
                bit(w, 31),
                field(w, 23, 5),
                Reg::from_bits(field(w, 4, 0)),
            )
        },
    ));
    table.push(Matcher::new(
        "CBNZ",
        "x 011010 1 xxxxxxxxxxxxxxxxxxx xxxxx",
        |v, w| {
            v.cbnz(
                bit(w, 31),
                field(w, 23, 5),
                Reg::from_bits(field(w, 4, 0)),
            )
        },
    ));
    table.push(Matcher::new(
        "TBZ",
        "x 011011 0 xxxxx xxxxxxxxxxxxxx xxxxx",
        |v, w| {
            v.tbz(
                bit(w, 31),
                field(w, 23, 19),
                field(w, 18, 5),
                Reg::from_bits(field(w, 4, 0)),
            )
        },
    ));
    table.push(Matcher::new(
        "TBNZ",
        "x 011011 1 xxxxx xxxxxxxxxxxxxx xxxxx",
        |v, w| {
            v.tbnz(
                bit(w, 31),
                field(w, 23, 19),
                field(w, 18, 5),
                Reg::from_bits(field(w, 4, 0)),
            )
        },
    ));
}

impl TranslatorVisitor {
    fn branch_offset_19(imm19: u32) -> i64 {
        sext64(u64::from(imm19) << 2, 21)
    }

    fn branch_offset_26(imm26: u32) -> i64 {
        sext64(u64::from(imm26) << 2, 28)
    }

    fn b_cond(&mut self, imm19: u32, cond: Cond) -> bool {
        let offset = Self::branch_offset_19(imm19);
        let target = self.pc().wrapping_add(offset as u64);

        let cond_pass = Terminal::LinkBlock {
            next: self.location.set_pc(target).to_ir(),
        };
        let cond_fail = Terminal::LinkBlock {
            next: self.location.advance_pc(4).to_ir(),
        };
        self.ir.block.set_terminal(Terminal::If {
            cond,
            then_: Box::new(cond_pass),
            else_: Box::new(cond_fail),
        });
        false
    }

    fn b_uncond(&mut self, imm26: u32) -> bool {
        let offset = Self::branch_offset_26(imm26);
        let target = self.pc().wrapping_add(offset as u64);

        self.ir.block.set_terminal(Terminal::LinkBlock {
            next: self.location.set_pc(target).to_ir(),
        });
        false
    }

    fn bl(&mut self, imm26: u32) -> bool {
        let offset = Self::branch_offset_26(imm26);

        let link = self.ir.imm64(self.pc().wrapping_add(4));
        self.set_x(64, Reg::R30, link);
        self.ir.push_rsb(self.location.advance_pc(4).to_ir());

        let target = self.pc().wrapping_add(offset as u64);
        self.ir.block.set_terminal(Terminal::LinkBlock {
            next: self.location.set_pc(target).to_ir(),
        });
        false
    }

    fn blr(&mut self, rn: Reg) -> bool {
        let target = self.x(64, rn);

        let link = self.ir.imm64(self.pc().wrapping_add(4));
        self.set_x(64, Reg::R30, link);
        self.ir.push_rsb(self.location.advance_pc(4).to_ir());

        self.ir.a64_set_pc(target);
        self.ir.block.set_terminal(Terminal::FastDispatchHint);
        false
    }

    fn br(&mut self, rn: Reg) -> bool {
        let target = self.x(64, rn);
        self.ir.a64_set_pc(target);
        self.ir.block.set_terminal(Terminal::FastDispatchHint);
        false
    }

    fn ret(&mut self, rn: Reg) -> bool {
        let target = self.x(64, rn);
        self.ir.a64_set_pc(target);
        self.ir.block.set_terminal(Terminal::PopRSBHint);
        false
    }

    fn cbz(&mut self, sf: bool, imm19: u32, rt: Reg) -> bool {
        let datasize = if sf { 64 } else { 32 };
        let offset = Self::branch_offset_19(imm19);

        let operand = self.x(datasize, rt);
        let is_zero = self.ir.is_zero(operand);
        self.ir.set_check_bit(is_zero);

        let target = self.pc().wrapping_add(offset as u64);
        let taken = Terminal::LinkBlock {
            next: self.location.set_pc(target).to_ir(),
        };
        let not_taken = Terminal::LinkBlock {
            next: self.location.advance_pc(4).to_ir(),
        };
        self.ir.block.set_terminal(Terminal::CheckBit {
            then_: Box::new(taken),
            else_: Box::new(not_taken),
        });
        false
    }

    fn cbnz(&mut self, sf: bool, imm19: u32, rt: Reg) -> bool {
        let datasize = if sf { 64 } else { 32 };
        let offset = Self::branch_offset_19(imm19);

        let operand = self.x(datasize, rt);
        let is_zero = self.ir.is_zero(operand);
        self.ir.set_check_bit(is_zero);

        let target = self.pc().wrapping_add(offset as u64);
        let taken = Terminal::LinkBlock {
            next: self.location.advance_pc(4).to_ir(),
        };
        let not_taken = Terminal::LinkBlock {
            next: self.location.set_pc(target).to_ir(),
        };
        self.ir.block.set_terminal(Terminal::CheckBit {
            then_: Box::new(taken),
            else_: Box::new(not_taken),
        });
        false
    }

    fn tbz(&mut self, b5: bool, b40: u32, imm14: u32, rt: Reg) -> bool {
        let datasize = if b5 { 64 } else { 32 };
        let bit_pos = (b5 as u32) << 5 | b40;
        let offset = sext64(u64::from(imm14) << 2, 16);

        let operand = self.x(datasize, rt);
        let operand = self.zero_extend(operand, 64);
        let pos = self.ir.imm8(bit_pos as u8);
        let test = self.ir.test_bit(operand, pos);
        self.ir.set_check_bit(test);

        let target = self.pc().wrapping_add(offset as u64);
        let bit_set = Terminal::LinkBlock {
            next: self.location.advance_pc(4).to_ir(),
        };
        let bit_clear = Terminal::LinkBlock {
            next: self.location.set_pc(target).to_ir(),
        };
        self.ir.block.set_terminal(Terminal::CheckBit {
            then_: Box::new(bit_set),
            else_: Box::new(bit_clear),
        });
        false
    }

    fn tbnz(&mut self, b5: bool, b40: u32, imm14: u32, rt: Reg) -> bool {
        let datasize = if b5 { 64 } else { 32 };
        let bit_pos = (b5 as u32) << 5 | b40;
        let offset = sext64(u64::from(imm14) << 2, 16);

        let operand = self.x(datasize, rt);
        let operand = self.zero_extend(operand, 64);
        let pos = self.ir.imm8(bit_pos as u8);
        let test = self.ir.test_bit(operand, pos);
        self.ir.set_check_bit(test);

        let target = self.pc().wrapping_add(offset as u64);
        let bit_set = Terminal::LinkBlock {
            next: self.location.set_pc(target).to_ir(),
        };
        let bit_clear = Terminal::LinkBlock {
            next: self.location.advance_pc(4).to_ir(),
        };
        self.ir.block.set_terminal(Terminal::CheckBit {
            then_: Box::new(bit_set),
            else_: Box::new(bit_clear),
        });
        false
    }
}
