//! Guest-register get/set elimination.
//!
//! Within a block, a `Set` followed by a `Get` of the same register forwards
//! the stored value, and a `Set` overwritten by a later `Set` with no
//! intervening observer is a dead store. Host callouts that may observe
//! guest state (supervisor calls, raised exceptions) act as barriers.

use super::is_state_barrier;
use crate::ir::{Block, Inst, Opcode, Value};

#[derive(Copy, Clone, Debug)]
pub struct A32GetSetOptions {
    /// Rewrite `SetCpsrNZC(nz, GetCFlag())` into `SetCpsrNZ(nz)`: writing
    /// the carry it just read back is a no-op.
    pub convert_nzc_to_nz: bool,
}

impl Default for A32GetSetOptions {
    fn default() -> Self {
        Self {
            convert_nzc_to_nz: true,
        }
    }
}

/// Per-register forwarding state.
#[derive(Default, Clone)]
struct Cell {
    /// The value the register currently holds, if known.
    known: Option<Value>,
    /// A pending store instruction that may still turn out to be dead.
    pending_set: Option<Inst>,
}

impl Cell {
    fn barrier(&mut self) {
        self.pending_set = None;
    }

    fn invalidate(&mut self) {
        *self = Cell::default();
    }

    /// Records a store, removing the store it overwrites when allowed.
    fn record_set(&mut self, block: &mut Block, inst: Inst, value: Value) {
        if let Some(dead) = self.pending_set.take() {
            block.remove(dead);
        }
        self.known = Some(value);
        self.pending_set = Some(inst);
    }

    /// Resolves a load: either forwards the known value or begins tracking
    /// the load's own result.
    fn record_get(&mut self, block: &mut Block, inst: Inst) {
        match self.known {
            Some(value) => block.replace_with_identity(inst, value),
            None => {
                self.known = Some(Value::Inst(inst));
                // A read pins any earlier store.
                self.pending_set = None;
            }
        }
    }
}

struct A64State {
    // X0-X30 tracked at 64-bit width only; W accesses invalidate.
    x: [Cell; 31],
    sp: Cell,
    vec: Vec<Cell>,
    nzcv: Cell,
}

pub fn a64_get_set_elimination(block: &mut Block) {
    let mut state = A64State {
        x: Default::default(),
        sp: Cell::default(),
        vec: vec![Cell::default(); 32],
        nzcv: Cell::default(),
    };

    for inst in block.collect_insts() {
        let opcode = block.opcode(inst);
        match opcode {
            Opcode::A64GetX => {
                let reg = block.arg(inst, 0).as_a64_reg().index();
                state.x[reg].record_get(block, inst);
            }
            Opcode::A64SetX => {
                let reg = block.arg(inst, 0).as_a64_reg().index();
                let value = block.arg(inst, 1);
                state.x[reg].record_set(block, inst, value);
            }
            Opcode::A64GetW | Opcode::A64SetW => {
                // Mixed-width access; drop what we know about the X view.
                let reg = block.arg(inst, 0).as_a64_reg().index();
                state.x[reg].invalidate();
            }
            Opcode::A64GetSP => state.sp.record_get(block, inst),
            Opcode::A64SetSP => {
                let value = block.arg(inst, 0);
                state.sp.record_set(block, inst, value);
            }
            Opcode::A64GetQ => {
                let reg = block.arg(inst, 0).as_a64_vec().index();
                state.vec[reg].record_get(block, inst);
            }
            Opcode::A64SetQ => {
                let reg = block.arg(inst, 0).as_a64_vec().index();
                let value = block.arg(inst, 1);
                state.vec[reg].record_set(block, inst, value);
            }
            Opcode::A64GetS | Opcode::A64GetD | Opcode::A64SetS | Opcode::A64SetD => {
                let reg = block.arg(inst, 0).as_a64_vec().index();
                state.vec[reg].invalidate();
            }
            Opcode::A64SetNZCV | Opcode::A64SetNZCVRaw => {
                // Flag stores forward only dead-store information: the two
                // opcodes store different encodings.
                if let Some(dead) = state.nzcv.pending_set.take() {
                    block.remove(dead);
                }
                state.nzcv.pending_set = Some(inst);
            }
            op if op.reads_nzcv() => state.nzcv.barrier(),
            op if is_state_barrier(op) => {
                for cell in state.x.iter_mut() {
                    cell.invalidate();
                }
                for cell in state.vec.iter_mut() {
                    cell.invalidate();
                }
                state.sp.invalidate();
                state.nzcv.invalidate();
            }
            _ => {}
        }
    }
}

struct A32State {
    regs: [Cell; 16],
    nzcv: Cell,
}

pub fn a32_get_set_elimination(block: &mut Block, options: A32GetSetOptions) {
    let mut state = A32State {
        regs: Default::default(),
        nzcv: Cell::default(),
    };

    for inst in block.collect_insts() {
        let opcode = block.opcode(inst);
        match opcode {
            Opcode::A32GetRegister => {
                let reg = block.arg(inst, 0).as_a32_reg().index();
                state.regs[reg].record_get(block, inst);
            }
            Opcode::A32SetRegister => {
                let reg = block.arg(inst, 0).as_a32_reg().index();
                let value = block.arg(inst, 1);
                state.regs[reg].record_set(block, inst, value);
            }
            Opcode::A32SetCpsrNZCV | Opcode::A32SetCpsrNZCVRaw => {
                // A full flags overwrite kills whatever store was pending,
                // partial or not.
                if let Some(dead) = state.nzcv.pending_set.take() {
                    block.remove(dead);
                }
                state.nzcv.pending_set = Some(inst);
            }
            Opcode::A32SetCpsr => {
                if let Some(dead) = state.nzcv.pending_set.take() {
                    block.remove(dead);
                }
                // Writes more than the flag nibble; a later NZCV overwrite
                // does not make it dead.
                state.nzcv.pending_set = None;
            }
            Opcode::A32SetCpsrNZC => {
                let carry = block.arg(inst, 1);
                let rewrites_own_carry = options.convert_nzc_to_nz
                    && carry
                        .inst()
                        .map(|c| block.opcode(c) == Opcode::A32GetCFlag)
                        .unwrap_or(false);
                // Partial store: it cannot kill the pending store (C or V
                // from before may still be observable), but a later full
                // overwrite can kill it.
                let tracked = if rewrites_own_carry {
                    let nz = block.arg(inst, 0);
                    let replacement = block.insert_before(inst, Opcode::A32SetCpsrNZ, &[nz]);
                    block.remove(inst);
                    replacement
                } else {
                    inst
                };
                state.nzcv.pending_set = Some(tracked);
            }
            Opcode::A32SetCpsrNZ => {
                state.nzcv.pending_set = Some(inst);
            }
            op if op.reads_nzcv() => state.nzcv.barrier(),
            op if is_state_barrier(op) => {
                for cell in state.regs.iter_mut() {
                    cell.invalidate();
                }
                state.nzcv.invalidate();
            }
            Opcode::A32BXWritePC => {
                state.regs[crate::frontend::a32::Reg::PC.index()].invalidate();
            }
            _ => {}
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
    fn forwards_set_to_get() {
        let mut ir = IrEmitter::new(Block::new(LocationDescriptor::new(0)));
        let v = ir.imm64(123);
        ir.a64_set_x(Reg::R0, v);
        let read = ir.a64_get_x(Reg::R0);
        ir.a64_set_x(Reg::R1, read);
        let mut block = ir.block;
        block.set_terminal(Terminal::ReturnToDispatch);

        a64_get_set_elimination(&mut block);
        super::super::identity_removal(&mut block);

        // The get is gone and R1's store uses the immediate directly.
        let insts = block.collect_insts();
        assert_eq!(insts.len(), 2);
        assert_eq!(block.arg(insts[1], 1), Value::U64(123));
    }

    #[test]
    fn removes_dead_stores() {
        let mut ir = IrEmitter::new(Block::new(LocationDescriptor::new(0)));
        let a = ir.imm64(1);
        let b = ir.imm64(2);
        ir.a64_set_x(Reg::R0, a);
        ir.a64_set_x(Reg::R0, b);
        let mut block = ir.block;
        block.set_terminal(Terminal::ReturnToDispatch);

        a64_get_set_elimination(&mut block);

        let insts = block.collect_insts();
        assert_eq!(insts.len(), 1);
        assert_eq!(block.arg(insts[0], 1), Value::U64(2));
    }

    #[test]
    fn supervisor_call_pins_stores() {
        let mut ir = IrEmitter::new(Block::new(LocationDescriptor::new(0)));
        let a = ir.imm64(1);
        ir.a64_set_x(Reg::R0, a);
        ir.a64_call_supervisor(0);
        let b = ir.imm64(2);
        ir.a64_set_x(Reg::R0, b);
        let mut block = ir.block;
        block.set_terminal(Terminal::ReturnToDispatch);

        a64_get_set_elimination(&mut block);
        assert_eq!(block.len(), 3);
    }
}
