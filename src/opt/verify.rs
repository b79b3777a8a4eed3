//! IR invariant verification.
//!
//! Failure here is a bug in the translator or an optimization pass, not a
//! guest-program condition; the pass asserts and aborts rather than letting
//! a miscompiled block reach the emitter.

use crate::ir::{Block, Cond, Inst, Type};
use std::collections::HashMap;

pub fn verification_pass(block: &Block) {
    let mut seen: Vec<Inst> = Vec::with_capacity(block.len());
    let mut actual_uses: HashMap<Inst, u32> = HashMap::new();

    for inst in block.iter() {
        let data = block.inst(inst);
        let arg_types = data.opcode.arg_types();

        for (slot, (&arg, &declared)) in data.args().iter().zip(arg_types).enumerate() {
            let actual = block.type_of(arg);
            assert!(
                actual.compatible_with(declared),
                "{}: operand {slot} has type {actual}, schema wants {declared}\n{block}",
                data.opcode.name(),
            );
            assert!(
                declared == Type::Void || !arg.is_empty(),
                "{}: operand {slot} is empty\n{block}",
                data.opcode.name(),
            );

            if let Some(referenced) = arg.inst() {
                assert!(
                    seen.contains(&referenced),
                    "{}: operand {slot} does not dominate its use\n{block}",
                    data.opcode.name(),
                );
                *actual_uses.entry(referenced).or_insert(0) += 1;
            }
        }

        seen.push(inst);
    }

    for inst in block.iter() {
        let recorded = block.use_count(inst);
        let actual = actual_uses.get(&inst).copied().unwrap_or(0);
        assert_eq!(
            recorded,
            actual,
            "use count of {} is {recorded}, block has {actual} uses\n{block}",
            block.inst(inst).opcode.name(),
        );
    }

    assert!(block.has_terminal(), "block has no terminal\n{block}");
    assert_eq!(
        block.cond() != Cond::AL,
        block.cond_failed_location().is_some(),
        "condition-failed location must be present exactly when the block is guarded\n{block}",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::a64::Reg;
    use crate::ir::{IrEmitter, Terminal};
    use crate::loc::LocationDescriptor;

    #[test]
    fn accepts_well_formed_blocks() {
        let mut ir = IrEmitter::new(Block::new(LocationDescriptor::new(0)));
        let x = ir.a64_get_x(Reg::R3);
        let y = ir.add(x, ir.imm64(1));
        ir.a64_set_x(Reg::R3, y);
        let mut block = ir.block;
        block.set_terminal(Terminal::ReturnToDispatch);
        verification_pass(&block);
    }

    #[test]
    #[should_panic(expected = "no terminal")]
    fn rejects_missing_terminal() {
        let ir = IrEmitter::new(Block::new(LocationDescriptor::new(0)));
        verification_pass(&ir.block);
    }

    #[test]
    #[should_panic(expected = "condition-failed location")]
    fn rejects_guard_without_fallback() {
        let mut block = Block::new(LocationDescriptor::new(0));
        block.set_cond(Cond::EQ);
        block.set_terminal(Terminal::ReturnToDispatch);
        verification_pass(&block);
    }
}
