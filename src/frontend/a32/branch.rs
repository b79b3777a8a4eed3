//! A32 branch, supervisor-call and breakpoint instructions.

use super::translate::TranslatorVisitor;
use super::Reg;
use crate::frontend::bits::*;
use crate::frontend::decoder::Matcher;
use crate::ir::{Exception, Terminal};

pub(super) fn fill_table(table: &mut Vec<Matcher<TranslatorVisitor>>) {
    table.push(Matcher::new(
        "BX",
        "xxxx 00010010 1111 1111 1111 0001 xxxx",
        |v, w| v.bx(Reg::from_bits(field(w, 3, 0))),
    ));
    table.push(Matcher::new(
        "BLX_reg",
        "xxxx 00010010 1111 1111 1111 0011 xxxx",
        |v, w| v.blx_reg(Reg::from_bits(field(w, 3, 0))),
    ));
    table.push(Matcher::new(
        "BKPT",
        "xxxx 00010010 xxxxxxxxxxxx 0111 xxxx",
        |v, _| v.raise_exception(Exception::Breakpoint),
    ));
    table.push(Matcher::new(
        "B",
        "xxxx 1010 xxxxxxxxxxxxxxxxxxxxxxxx",
        |v, w| v.b(field(w, 23, 0)),
    ));
    table.push(Matcher::new(
        "BL",
        "xxxx 1011 xxxxxxxxxxxxxxxxxxxxxxxx",
        |v, w| v.bl(field(w, 23, 0)),
    ));
    table.push(Matcher::new(
        "SVC",
        "xxxx 1111 xxxxxxxxxxxxxxxxxxxxxxxx",
        |v, w| v.svc(field(w, 23, 0)),
    ));
}

impl TranslatorVisitor {
    fn branch_target(&self, imm24: u32) -> u32 {
        let offset = sext64(u64::from(imm24) << 2, 26) as i32;
        self.location
            .pc()
            .wrapping_add(8)
            .wrapping_add(offset as u32)
    }

    fn b(&mut self, imm24: u32) -> bool {
        let target = self.branch_target(imm24);
        self.ir.block.set_terminal(Terminal::LinkBlock {
            next: self.location.set_pc(target).to_ir(),
        });
        false
    }

    fn bl(&mut self, imm24: u32) -> bool {
        let link = self.ir.imm32(self.location.pc().wrapping_add(4));
        self.set_register(Reg::LR, link);
        self.ir.push_rsb(self.location.advance_pc(4).to_ir());

        let target = self.branch_target(imm24);
        self.ir.block.set_terminal(Terminal::LinkBlock {
            next: self.location.set_pc(target).to_ir(),
        });
        false
    }

    fn bx(&mut self, rm: Reg) -> bool {
        let target = self.get_register(rm);
        self.ir.a32_bx_write_pc(target);
        // A BX through the link register is a return; hint the RSB.
        if rm == Reg::LR {
            self.ir.block.set_terminal(Terminal::PopRSBHint);
        } else {
            self.ir.block.set_terminal(Terminal::FastDispatchHint);
        }
        false
    }

    fn blx_reg(&mut self, rm: Reg) -> bool {
        if rm == Reg::PC {
            return self.unpredictable_instruction();
        }
        let target = self.get_register(rm);
        let link = self.ir.imm32(self.location.pc().wrapping_add(4));
        self.set_register(Reg::LR, link);
        self.ir.push_rsb(self.location.advance_pc(4).to_ir());
        self.ir.a32_bx_write_pc(target);
        self.ir.block.set_terminal(Terminal::FastDispatchHint);
        false
    }

    fn svc(&mut self, imm24: u32) -> bool {
        self.ir.push_rsb(self.location.advance_pc(4).to_ir());
        let next = self.ir.imm32(self.location.pc().wrapping_add(4));
        self.ir.a32_set_register(Reg::PC, next);
        self.ir.a32_call_supervisor(imm24);
        self.ir.block.set_terminal(Terminal::CheckHalt {
            else_: Box::new(Terminal::PopRSBHint),
        });
        false
    }
}
