//! Opcode polyfilling.
//!
//! Rewrites opcodes the host emitter does not lower into equivalent
//! sequences of opcodes it does. This port's x86-64 emitter has no lowering
//! for `ExtractRegister`, and return-stack-buffer pushes are dropped when
//! the RSB acceleration is disabled.

use crate::ir::{Block, Inst, Opcode, Value};

#[derive(Copy, Clone, Debug)]
pub struct PolyfillOptions {
    /// Strip `PushRSB` bookkeeping (the backend keeps no return stack
    /// buffer when the optimization is off).
    pub strip_rsb: bool,
}

impl Default for PolyfillOptions {
    fn default() -> Self {
        Self { strip_rsb: true }
    }
}

pub fn polyfill_pass(block: &mut Block, options: PolyfillOptions) {
    for inst in block.collect_insts() {
        match block.opcode(inst) {
            Opcode::PushRSB if options.strip_rsb => {
                block.remove(inst);
            }
            Opcode::ExtractRegister32 => expand_extract(block, inst, 32),
            Opcode::ExtractRegister64 => expand_extract(block, inst, 64),
            _ => {}
        }
    }
}

/// `EXTR(lo, hi, lsb)` becomes `(lo >> lsb) | (hi << (size - lsb))`; a zero
/// shift is just `lo`.
fn expand_extract(block: &mut Block, inst: Inst, size: u32) {
    let lo = block.arg(inst, 0);
    let hi = block.arg(inst, 1);
    let lsb = block.arg(inst, 2).as_u8();

    if lsb == 0 {
        block.replace_with_identity(inst, lo);
        return;
    }

    let (lsr, lsl, or_) = if size == 32 {
        (
            Opcode::LogicalShiftRight32,
            Opcode::LogicalShiftLeft32,
            Opcode::Or32,
        )
    } else {
        (
            Opcode::LogicalShiftRight64,
            Opcode::LogicalShiftLeft64,
            Opcode::Or64,
        )
    };

    let low_part = if size == 32 {
        block.insert_before(inst, lsr, &[lo, Value::U8(lsb), Value::U1(false)])
    } else {
        block.insert_before(inst, lsr, &[lo, Value::U8(lsb)])
    };
    let high_part = if size == 32 {
        block.insert_before(
            inst,
            lsl,
            &[hi, Value::U8((size - u32::from(lsb)) as u8), Value::U1(false)],
        )
    } else {
        block.insert_before(inst, lsl, &[hi, Value::U8((size - u32::from(lsb)) as u8)])
    };
    let combined = block.insert_before(
        inst,
        or_,
        &[Value::Inst(low_part), Value::Inst(high_part)],
    );
    debug_assert_eq!(block.type_of(Value::Inst(combined)), block.opcode(inst).result_type());
    block.replace_with_identity(inst, Value::Inst(combined));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrEmitter, Terminal};
    use crate::loc::LocationDescriptor;

    #[test]
    fn extract_register_expands_to_shifts() {
        let mut ir = IrEmitter::new(Block::new(LocationDescriptor::new(0)));
        let lo = ir.imm64(0xaaaa_bbbb_cccc_dddd);
        let hi = ir.imm64(0x1111_2222_3333_4444);
        let lsb = ir.imm8(16);
        let _extracted = ir.extract_register(lo, hi, lsb);
        let mut block = ir.block;
        block.set_terminal(Terminal::ReturnToDispatch);

        polyfill_pass(&mut block, PolyfillOptions::default());

        assert!(!block
            .iter()
            .any(|inst| matches!(block.opcode(inst), Opcode::ExtractRegister64)));
        assert!(block
            .iter()
            .any(|inst| matches!(block.opcode(inst), Opcode::Or64)));
    }

    #[test]
    fn push_rsb_stripped() {
        let mut ir = IrEmitter::new(Block::new(LocationDescriptor::new(0)));
        ir.push_rsb(LocationDescriptor::new(0x1004));
        let mut block = ir.block;
        block.set_terminal(Terminal::ReturnToDispatch);

        polyfill_pass(&mut block, PolyfillOptions { strip_rsb: true });
        assert!(block.is_empty());
    }
}
