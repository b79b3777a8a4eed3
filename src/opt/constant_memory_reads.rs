//! Constant folding of reads from read-only guest memory.
//!
//! When every operand of a plain memory read is an immediate and the
//! embedder reports the address as read-only, the read is performed once at
//! translation time and its result substituted as a constant. The embedder
//! contract: memory reported read-only stays read-only (and mapped) for the
//! lifetime of the Jit.

use crate::ir::{Block, Opcode, Value};

/// The slice of the embedder callbacks this pass needs.
pub trait ConstantMemoryReads {
    fn is_read_only_memory(&mut self, vaddr: u64) -> bool;
    fn read_8(&mut self, vaddr: u64) -> u8;
    fn read_16(&mut self, vaddr: u64) -> u16;
    fn read_32(&mut self, vaddr: u64) -> u32;
    fn read_64(&mut self, vaddr: u64) -> u64;
}

pub fn constant_memory_reads(block: &mut Block, cb: &mut dyn ConstantMemoryReads) {
    for inst in block.collect_insts() {
        let opcode = block.opcode(inst);
        if !opcode.is_foldable_memory_read() {
            continue;
        }
        if !block.inst(inst).are_all_args_immediates() {
            continue;
        }

        let vaddr = block.arg(inst, 0).immediate_as_u64();
        if !cb.is_read_only_memory(vaddr) {
            continue;
        }

        let value = match opcode {
            Opcode::A32ReadMemory8 | Opcode::A64ReadMemory8 => Value::U8(cb.read_8(vaddr)),
            Opcode::A32ReadMemory16 | Opcode::A64ReadMemory16 => Value::U16(cb.read_16(vaddr)),
            Opcode::A32ReadMemory32 | Opcode::A64ReadMemory32 => Value::U32(cb.read_32(vaddr)),
            Opcode::A32ReadMemory64 | Opcode::A64ReadMemory64 => Value::U64(cb.read_64(vaddr)),
            _ => unreachable!(),
        };
        log::trace!("folding read-only load at {vaddr:#x} to {value}");
        block.replace_with_identity(inst, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::a64::Reg;
    use crate::ir::{AccType, IrEmitter, Terminal};
    use crate::loc::LocationDescriptor;

    struct RomBelow(u64);

    impl ConstantMemoryReads for RomBelow {
        fn is_read_only_memory(&mut self, vaddr: u64) -> bool {
            vaddr < self.0
        }
        fn read_8(&mut self, _: u64) -> u8 {
            0xab
        }
        fn read_16(&mut self, _: u64) -> u16 {
            0xabcd
        }
        fn read_32(&mut self, _: u64) -> u32 {
            0xdead_beef
        }
        fn read_64(&mut self, _: u64) -> u64 {
            0xdead_beef_dead_beef
        }
    }

    #[test]
    fn folds_only_read_only_addresses() {
        let mut ir = IrEmitter::new(Block::new(LocationDescriptor::new(0)));
        let rom_addr = ir.imm64(0x100);
        let rom = ir.a64_read_memory(4, rom_addr, AccType::Normal);
        ir.a64_set_w(Reg::R0, rom);
        let ram_addr = ir.imm64(0x9000);
        let ram = ir.a64_read_memory(4, ram_addr, AccType::Normal);
        ir.a64_set_w(Reg::R1, ram);
        let mut block = ir.block;
        block.set_terminal(Terminal::ReturnToDispatch);

        constant_memory_reads(&mut block, &mut RomBelow(0x1000));
        super::super::identity_removal(&mut block);

        let insts = block.collect_insts();
        assert_eq!(insts.len(), 3);
        assert_eq!(block.arg(insts[0], 1), Value::U32(0xdead_beef));
        assert_eq!(block.opcode(insts[1]), crate::ir::Opcode::A64ReadMemory32);
    }
}
