//! Identity chasing and removal.
//!
//! Rewrites every operand that points at an `Identity` to the identity's
//! source, then deletes all `Identity` and `Void` instructions.

use crate::ir::{Block, Opcode};

pub fn identity_removal(block: &mut Block) {
    for inst in block.collect_insts() {
        let num_args = block.opcode(inst).num_args();
        for slot in 0..num_args {
            loop {
                let arg = block.arg(inst, slot);
                let Some(referenced) = arg.inst() else { break };
                if block.opcode(referenced) != Opcode::Identity {
                    break;
                }
                let source = block.arg(referenced, 0);
                block.set_arg(inst, slot, source);
            }
        }

        if matches!(block.opcode(inst), Opcode::Identity | Opcode::Void) {
            block.remove(inst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::a64::Reg;
    use crate::ir::{IrEmitter, Terminal, Value};
    use crate::loc::LocationDescriptor;

    #[test]
    fn chases_identity_chains() {
        let mut ir = IrEmitter::new(Block::new(LocationDescriptor::new(0)));
        let imm = ir.imm64(42);
        let id1 = ir.identity(imm);
        let id2 = ir.identity(id1);
        ir.a64_set_x(Reg::R0, id2);
        let mut block = ir.block;
        block.set_terminal(Terminal::ReturnToDispatch);

        identity_removal(&mut block);

        assert_eq!(block.len(), 1);
        let set = block.first().unwrap();
        assert_eq!(block.opcode(set), Opcode::A64SetX);
        assert_eq!(block.arg(set, 1), Value::U64(42));
    }
}
