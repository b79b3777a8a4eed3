//! A32 status-register moves, CLZ and barriers.

use super::translate::TranslatorVisitor;
use super::Reg;
use crate::frontend::bits::*;
use crate::frontend::decoder::Matcher;
use crate::ir::Terminal;

pub(super) fn fill_table(table: &mut Vec<Matcher<TranslatorVisitor>>) {
    table.push(Matcher::new(
        "MRS",
        "xxxx 00010000 1111 xxxx 000000000000",
        |v, w| v.mrs(Reg::from_bits(field(w, 15, 12))),
    ));
    table.push(Matcher::new(
        "MSR_reg",
        "xxxx 00010010 xxxx 1111 00000000 xxxx",
        |v, w| v.msr_reg(field(w, 19, 16), Reg::from_bits(field(w, 3, 0))),
    ));
    table.push(Matcher::new(
        "MSR_imm",
        "xxxx 00110010 xxxx 1111 xxxxxxxxxxxx",
        |v, w| v.msr_imm(field(w, 19, 16), field(w, 11, 0)),
    ));
    table.push(Matcher::new(
        "CLZ",
        "xxxx 00010110 1111 xxxx 1111 0001 xxxx",
        |v, w| {
            v.clz(
                Reg::from_bits(field(w, 15, 12)),
                Reg::from_bits(field(w, 3, 0)),
            )
        },
    ));
}

pub(super) fn fill_unconditional_table(table: &mut Vec<Matcher<TranslatorVisitor>>) {
    table.push(Matcher::new(
        "DSB",
        "1111 01010111 1111 1111 0000 0100 xxxx",
        |v, _| {
            v.ir.data_synchronization_barrier();
            true
        },
    ));
    table.push(Matcher::new(
        "DMB",
        "1111 01010111 1111 1111 0000 0101 xxxx",
        |v, _| {
            v.ir.data_memory_barrier();
            true
        },
    ));
    table.push(Matcher::new(
        "ISB",
        "1111 01010111 1111 1111 0000 0110 xxxx",
        |v, w| v.isb(w),
    ));
}

impl TranslatorVisitor {
    fn mrs(&mut self, rd: Reg) -> bool {
        if rd == Reg::PC {
            return self.unpredictable_instruction();
        }
        let cpsr = self.ir.a32_get_cpsr();
        self.set_register(rd, cpsr);
        true
    }

    fn msr_reg(&mut self, mask: u32, rm: Reg) -> bool {
        if rm == Reg::PC {
            return self.unpredictable_instruction();
        }
        // Only the flags byte is writable from userspace translations.
        if mask != 0b1000 {
            return self.unpredictable_instruction();
        }
        let value = self.get_register(rm);
        let flag_mask = self.ir.imm32(0xf000_0000);
        let flags = self.ir.and_(value, flag_mask);
        self.ir.a32_set_cpsr_nzcv_raw(flags);
        true
    }

    fn msr_imm(&mut self, mask: u32, imm12: u32) -> bool {
        if mask != 0b1000 {
            return self.unpredictable_instruction();
        }
        let (imm, _) = self.expand_imm_c(imm12);
        let flags = self.ir.imm32(imm & 0xf000_0000);
        self.ir.a32_set_cpsr_nzcv_raw(flags);
        true
    }

    fn clz(&mut self, rd: Reg, rm: Reg) -> bool {
        if rd == Reg::PC || rm == Reg::PC {
            return self.unpredictable_instruction();
        }
        let operand = self.get_register(rm);
        let result = self.ir.count_leading_zeros(operand);
        self.set_register(rd, result);
        true
    }

    fn isb(&mut self, _w: u32) -> bool {
        self.ir.instruction_synchronization_barrier();
        let next = self.ir.imm32(self.location.pc().wrapping_add(4));
        self.ir.a32_set_register(Reg::PC, next);
        self.ir.block.set_terminal(Terminal::ReturnToDispatch);
        false
    }
}
