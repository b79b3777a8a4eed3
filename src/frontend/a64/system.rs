//! A64 exception-generating, hint, barrier and system-register instructions.

use super::translate::TranslatorVisitor;
use super::Reg;
use crate::frontend::bits::*;
use crate::frontend::decoder::Matcher;
use crate::ir::{Exception, Terminal};

pub(super) fn fill_table(table: &mut Vec<Matcher<TranslatorVisitor>>) {
    table.push(Matcher::new(
        "SVC",
        "11010100 000 xxxxxxxxxxxxxxxx 000 01",
        |v, w| v.svc(field(w, 20, 5)),
    ));
    table.push(Matcher::new(
        "BRK",
        "11010100 001 xxxxxxxxxxxxxxxx 000 00",
        |v, _| {
            v.raise_exception(Exception::Breakpoint);
            false
        },
    ));
    table.push(Matcher::new(
        "HINT",
        "11010101 00000011 0010 xxxx xxx 11111",
        |v, w| v.hint(field(w, 7, 5), field(w, 11, 8)),
    ));
    table.push(Matcher::new(
        "CLREX",
        "11010101 00000011 0011 xxxx 010 11111",
        |v, _| {
            v.ir.a64_clear_exclusive();
            true
        },
    ));
    table.push(Matcher::new(
        "DSB",
        "11010101 00000011 0011 xxxx 100 11111",
        |v, _| {
            v.ir.data_synchronization_barrier();
            true
        },
    ));
    table.push(Matcher::new(
        "DMB",
        "11010101 00000011 0011 xxxx 101 11111",
        |v, _| {
            v.ir.data_memory_barrier();
            true
        },
    ));
    table.push(Matcher::new(
        "ISB",
        "11010101 00000011 0011 xxxx 110 11111",
        |v, _| v.isb(),
    ));
    table.push(Matcher::new(
        "MSR_reg",
        "110101010001 x xxx xxxx xxxx xxx xxxxx",
        |v, w| v.msr(w),
    ));
    table.push(Matcher::new(
        "MRS",
        "110101010011 x xxx xxxx xxxx xxx xxxxx",
        |v, w| v.mrs(w),
    ));
}

/// op0(2):op1(3):CRn(4):CRm(4):op2(3) for the registers this port knows.
#[derive(Copy, Clone, PartialEq, Eq)]
struct SysReg(u32);

impl SysReg {
    const CNTFRQ_EL0: SysReg = SysReg::encode(3, 3, 14, 0, 0);
    const CNTPCT_EL0: SysReg = SysReg::encode(3, 3, 14, 0, 1);
    const CTR_EL0: SysReg = SysReg::encode(3, 3, 0, 0, 1);
    const DCZID_EL0: SysReg = SysReg::encode(3, 3, 0, 0, 7);
    const FPCR: SysReg = SysReg::encode(3, 3, 4, 4, 0);
    const FPSR: SysReg = SysReg::encode(3, 3, 4, 4, 1);
    const NZCV: SysReg = SysReg::encode(3, 3, 4, 2, 0);
    const TPIDR_EL0: SysReg = SysReg::encode(3, 3, 13, 0, 2);
    const TPIDRRO_EL0: SysReg = SysReg::encode(3, 3, 13, 0, 3);

    const fn encode(op0: u32, op1: u32, crn: u32, crm: u32, op2: u32) -> SysReg {
        SysReg(op0 << 14 | op1 << 11 | crn << 7 | crm << 3 | op2)
    }

    fn from_word(w: u32) -> SysReg {
        let o0 = field(w, 19, 19);
        SysReg::encode(
            2 + o0,
            field(w, 18, 16),
            field(w, 15, 12),
            field(w, 11, 8),
            field(w, 7, 5),
        )
    }
}

impl TranslatorVisitor {
    fn svc(&mut self, imm16: u32) -> bool {
        self.ir.push_rsb(self.location.advance_pc(4).to_ir());
        let next = self.ir.imm64(self.pc().wrapping_add(4));
        self.ir.a64_set_pc(next);
        self.ir.a64_call_supervisor(imm16);
        self.ir.block.set_terminal(Terminal::CheckHalt {
            else_: Box::new(Terminal::PopRSBHint),
        });
        false
    }

    fn hint(&mut self, op2: u32, crm: u32) -> bool {
        if crm != 0 {
            // Pointer-auth and newer hint space: behave as NOP.
            return true;
        }
        if !self.options.hook_hint_instructions {
            return true;
        }
        let exception = match op2 {
            0b001 => Exception::Yield,
            0b010 => Exception::WaitForEvent,
            0b011 => Exception::WaitForInterrupt,
            0b100 => Exception::SendEvent,
            0b101 => Exception::SendEventLocal,
            _ => return true,
        };
        self.raise_exception(exception);
        false
    }

    fn isb(&mut self) -> bool {
        self.ir.instruction_synchronization_barrier();
        let next = self.ir.imm64(self.pc().wrapping_add(4));
        self.ir.a64_set_pc(next);
        self.ir.block.set_terminal(Terminal::ReturnToDispatch);
        false
    }

    fn msr(&mut self, w: u32) -> bool {
        let rt = Reg::from_bits(field(w, 4, 0));
        match SysReg::from_word(w) {
            SysReg::FPCR => {
                let value = self.x(32, rt);
                self.ir.a64_set_fpcr(value);
                // A FPCR write changes how subsequent instructions translate;
                // the block ends and the dispatcher picks up the new mode.
                let next = self.ir.imm64(self.pc().wrapping_add(4));
                self.ir.a64_set_pc(next);
                self.ir.block.set_terminal(Terminal::FastDispatchHint);
                false
            }
            SysReg::FPSR => {
                let value = self.x(32, rt);
                self.ir.a64_set_fpsr(value);
                true
            }
            SysReg::NZCV => {
                let value = self.x(32, rt);
                self.ir.a64_set_nzcv_raw(value);
                true
            }
            SysReg::TPIDR_EL0 => {
                let value = self.x(64, rt);
                self.ir.a64_set_tpidr(value);
                true
            }
            _ => self.unallocated_encoding(),
        }
    }

    fn mrs(&mut self, w: u32) -> bool {
        let rt = Reg::from_bits(field(w, 4, 0));
        match SysReg::from_word(w) {
            SysReg::CNTFRQ_EL0 => {
                let value = self.ir.a64_get_cntfrq();
                self.set_x(32, rt, value);
                true
            }
            SysReg::CNTPCT_EL0 => {
                // Keep the count as current as possible: force this read to
                // start its own block so the cycle counter has been synced.
                if !self.ir.block.is_empty() && !self.options.wall_clock_cntpct {
                    self.ir.block.set_terminal(Terminal::LinkBlock {
                        next: self.location.to_ir(),
                    });
                    // The driver still advances and charges one cycle for
                    // this instruction; rewind both so the follow-up block
                    // re-translates it.
                    self.location = self.location.advance_pc(-4);
                    self.ir.block.sub_cycles(1);
                    return false;
                }
                let value = self.ir.a64_get_cntpct();
                self.set_x(64, rt, value);
                true
            }
            SysReg::CTR_EL0 => {
                let value = self.ir.a64_get_ctr();
                self.set_x(32, rt, value);
                true
            }
            SysReg::DCZID_EL0 => {
                let value = self.ir.a64_get_dczid();
                self.set_x(32, rt, value);
                true
            }
            SysReg::FPCR => {
                let value = self.ir.a64_get_fpcr();
                self.set_x(32, rt, value);
                true
            }
            SysReg::FPSR => {
                let value = self.ir.a64_get_fpsr();
                self.set_x(32, rt, value);
                true
            }
            SysReg::NZCV => {
                let value = self.ir.a64_get_nzcv_raw();
                self.set_x(32, rt, value);
                true
            }
            SysReg::TPIDR_EL0 => {
                let value = self.ir.a64_get_tpidr();
                self.set_x(64, rt, value);
                true
            }
            SysReg::TPIDRRO_EL0 => {
                let value = self.ir.a64_get_tpidrro();
                self.set_x(64, rt, value);
                true
            }
            _ => self.unallocated_encoding(),
        }
    }
}
