//! Dead code elimination.
//!
//! A backwards sweep removes instructions whose results are unused and which
//! have no side effects. Removing an instruction releases its operand
//! references, which can make earlier instructions dead in the same sweep.

use crate::ir::Block;

pub fn dead_code_elimination(block: &mut Block) {
    let order = block.collect_insts();
    for inst in order.into_iter().rev() {
        if block.use_count(inst) == 0 && !block.opcode(inst).may_have_side_effects() {
            block.remove(inst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::a64::Reg;
    use crate::ir::{IrEmitter, Terminal};
    use crate::loc::LocationDescriptor;

    #[test]
    fn removes_chains_of_dead_values() {
        let mut ir = IrEmitter::new(crate::ir::Block::new(LocationDescriptor::new(0)));
        let x = ir.a64_get_x(Reg::R0);
        let doubled = ir.add(x, x);
        let _unused = ir.add(doubled, ir.imm64(1));
        let kept = ir.a64_get_x(Reg::R1);
        ir.a64_set_x(Reg::R2, kept);
        let mut block = ir.block;
        block.set_terminal(Terminal::ReturnToDispatch);

        dead_code_elimination(&mut block);

        // Both adds and the first get die; the used get/set pair stays.
        assert_eq!(block.len(), 2);
    }
}
