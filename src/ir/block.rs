//! Basic blocks.
//!
//! A block is an ordered list of microinstructions followed by exactly one
//! terminal. The IR is linear, not tree shaped: instruction order carries
//! meaning (memory accesses, guest-state writes), so the block keeps both an
//! arena that owns every instruction and a doubly linked ordering over the
//! live ones. Removed instructions stay in the arena but leave the ordering;
//! the whole arena is dropped with the block.

use super::inst::MAX_ARGS;
use super::{Cond, Inst, InstData, Opcode, Terminal, Value};
use crate::loc::LocationDescriptor;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{PrimaryMap, SecondaryMap};
use core::fmt;

#[derive(Clone, Copy, Default)]
struct Node {
    prev: PackedOption<Inst>,
    next: PackedOption<Inst>,
    /// Whether the instruction is currently linked into the ordering.
    linked: bool,
}

/// A single translation unit of guest code.
pub struct Block {
    location: LocationDescriptor,
    end_location: LocationDescriptor,
    cond: Cond,
    cond_failed: Option<LocationDescriptor>,
    cond_failed_cycle_count: u64,
    cycle_count: u64,
    terminal: Terminal,

    /// Arena owning every instruction ever created in this block.
    insts: PrimaryMap<Inst, InstData>,
    nodes: SecondaryMap<Inst, Node>,
    head: PackedOption<Inst>,
    tail: PackedOption<Inst>,
    len: usize,
}

impl Block {
    pub fn new(location: LocationDescriptor) -> Self {
        Self {
            location,
            end_location: location,
            cond: Cond::AL,
            cond_failed: None,
            cond_failed_cycle_count: 0,
            cycle_count: 0,
            terminal: Terminal::Invalid,
            insts: PrimaryMap::new(),
            nodes: SecondaryMap::new(),
            head: None.into(),
            tail: None.into(),
            len: 0,
        }
    }

    /// Starting location of this block.
    pub fn location(&self) -> LocationDescriptor {
        self.location
    }

    /// One guest instruction past the last translated instruction.
    pub fn end_location(&self) -> LocationDescriptor {
        self.end_location
    }

    pub fn set_end_location(&mut self, loc: LocationDescriptor) {
        self.end_location = loc;
    }

    /// The condition guarding execution of this block.
    pub fn cond(&self) -> Cond {
        self.cond
    }

    pub fn set_cond(&mut self, cond: Cond) {
        self.cond = cond;
    }

    /// Where execution resumes when the guarding condition fails.
    pub fn cond_failed_location(&self) -> Option<LocationDescriptor> {
        self.cond_failed
    }

    pub fn set_cond_failed_location(&mut self, loc: LocationDescriptor) {
        self.cond_failed = Some(loc);
    }

    pub fn cond_failed_cycle_count(&self) -> u64 {
        self.cond_failed_cycle_count
    }

    pub fn set_cond_failed_cycle_count(&mut self, count: u64) {
        self.cond_failed_cycle_count = count;
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn add_cycles(&mut self, count: u64) {
        self.cycle_count += count;
    }

    pub fn sub_cycles(&mut self, count: u64) {
        self.cycle_count = self.cycle_count.saturating_sub(count);
    }

    pub fn has_terminal(&self) -> bool {
        !self.terminal.is_invalid()
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    /// Sets the terminal. May only be called once; use
    /// [`replace_terminal`](Self::replace_terminal) to overwrite.
    pub fn set_terminal(&mut self, terminal: Terminal) {
        assert!(
            self.terminal.is_invalid(),
            "block already has a terminal"
        );
        self.terminal = terminal;
    }

    pub fn replace_terminal(&mut self, terminal: Terminal) {
        assert!(!self.terminal.is_invalid(), "block has no terminal to replace");
        self.terminal = terminal;
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Appends a new instruction, bumping the use count of every
    /// instruction-reference operand.
    pub fn append(&mut self, opcode: Opcode, args: &[Value]) -> Inst {
        let inst = self.make_inst(opcode, args);
        self.link_after(inst, self.tail.expand());
        inst
    }

    /// Inserts a new instruction immediately before `point`.
    pub fn insert_before(&mut self, point: Inst, opcode: Opcode, args: &[Value]) -> Inst {
        debug_assert!(self.nodes[point].linked);
        let inst = self.make_inst(opcode, args);
        let prev = self.nodes[point].prev.expand();
        self.link_after(inst, prev);
        inst
    }

    fn make_inst(&mut self, opcode: Opcode, args: &[Value]) -> Inst {
        assert_eq!(args.len(), opcode.num_args(), "{}: bad arity", opcode.name());
        let mut slots = [Value::Empty; MAX_ARGS];
        slots[..args.len()].copy_from_slice(args);
        let inst = self.insts.push(InstData::new(opcode, slots));
        for arg in args {
            if let Some(referenced) = arg.inst() {
                self.insts[referenced].use_count += 1;
            }
        }
        inst
    }

    fn link_after(&mut self, inst: Inst, after: Option<Inst>) {
        let next = match after {
            Some(prev) => {
                let next = self.nodes[prev].next;
                self.nodes[prev].next = inst.into();
                next
            }
            None => {
                let next = self.head;
                self.head = inst.into();
                next
            }
        };
        match next.expand() {
            Some(next) => self.nodes[next].prev = inst.into(),
            None => self.tail = inst.into(),
        }
        self.nodes[inst] = Node {
            prev: after.into(),
            next,
            linked: true,
        };
        self.len += 1;
    }

    /// Unlinks `inst` from the ordering and releases its operand references.
    /// The instruction itself stays in the arena.
    pub fn remove(&mut self, inst: Inst) {
        debug_assert!(self.nodes[inst].linked, "removing an unlinked instruction");
        let Node { prev, next, .. } = self.nodes[inst];
        match prev.expand() {
            Some(prev) => self.nodes[prev].next = next,
            None => self.head = next,
        }
        match next.expand() {
            Some(next) => self.nodes[next].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[inst].linked = false;
        self.len -= 1;
        for slot in 0..self.insts[inst].opcode.num_args() {
            let arg = self.insts[inst].args[slot];
            self.insts[inst].args[slot] = Value::Empty;
            if let Some(referenced) = arg.inst() {
                self.insts[referenced].use_count -= 1;
            }
        }
    }

    pub fn contains(&self, inst: Inst) -> bool {
        self.insts.is_valid(inst) && self.nodes[inst].linked
    }

    pub fn inst(&self, inst: Inst) -> &InstData {
        &self.insts[inst]
    }

    pub fn opcode(&self, inst: Inst) -> Opcode {
        self.insts[inst].opcode
    }

    pub fn use_count(&self, inst: Inst) -> u32 {
        self.insts[inst].use_count
    }

    pub fn name(&self, inst: Inst) -> u32 {
        self.insts[inst].name
    }

    pub fn set_name(&mut self, inst: Inst, name: u32) {
        self.insts[inst].name = name;
    }

    pub fn arg(&self, inst: Inst, slot: usize) -> Value {
        debug_assert!(slot < self.insts[inst].opcode.num_args());
        self.insts[inst].args[slot]
    }

    pub fn args(&self, inst: Inst) -> &[Value] {
        self.insts[inst].args()
    }

    /// Rewrites one operand slot, maintaining use counts.
    pub fn set_arg(&mut self, inst: Inst, slot: usize, value: Value) {
        debug_assert!(slot < self.insts[inst].opcode.num_args());
        let old = self.insts[inst].args[slot];
        if old == value {
            return;
        }
        if let Some(referenced) = old.inst() {
            self.insts[referenced].use_count -= 1;
        }
        if let Some(referenced) = value.inst() {
            self.insts[referenced].use_count += 1;
        }
        self.insts[inst].args[slot] = value;
    }

    /// Turns `inst` into `Identity(value)`: all existing uses now resolve to
    /// `value` once the identity-removal pass runs.
    pub fn replace_with_identity(&mut self, inst: Inst, value: Value) {
        for slot in 0..self.insts[inst].opcode.num_args() {
            let old = self.insts[inst].args[slot];
            self.insts[inst].args[slot] = Value::Empty;
            if let Some(referenced) = old.inst() {
                self.insts[referenced].use_count -= 1;
            }
        }
        self.insts[inst].opcode = Opcode::Identity;
        if let Some(referenced) = value.inst() {
            self.insts[referenced].use_count += 1;
        }
        self.insts[inst].args[0] = value;
    }

    /// The precise result type of a value, resolving instruction references
    /// through the arena.
    pub fn type_of(&self, value: Value) -> super::Type {
        match value.inst() {
            Some(inst) => {
                let data = &self.insts[inst];
                if data.opcode == Opcode::Identity {
                    self.type_of(data.args[0])
                } else {
                    data.opcode.result_type()
                }
            }
            None => value.ty(),
        }
    }

    pub fn first(&self) -> Option<Inst> {
        self.head.expand()
    }

    pub fn last(&self) -> Option<Inst> {
        self.tail.expand()
    }

    pub fn next(&self, inst: Inst) -> Option<Inst> {
        self.nodes[inst].next.expand()
    }

    pub fn prev(&self, inst: Inst) -> Option<Inst> {
        self.nodes[inst].prev.expand()
    }

    /// Iterates over live instructions in block order. The block must not be
    /// mutated during iteration; passes that rewrite collect first.
    pub fn iter(&self) -> InstIter<'_> {
        InstIter {
            block: self,
            cursor: self.head.expand(),
        }
    }

    /// Collects the live instruction order into a vector, for passes that
    /// mutate while walking.
    pub fn collect_insts(&self) -> Vec<Inst> {
        self.iter().collect()
    }
}

pub struct InstIter<'a> {
    block: &'a Block,
    cursor: Option<Inst>,
}

impl Iterator for InstIter<'_> {
    type Item = Inst;

    fn next(&mut self) -> Option<Inst> {
        let inst = self.cursor?;
        self.cursor = self.block.next(inst);
        Some(inst)
    }
}

impl fmt::Display for Block {
    /// Renders the block in the `%name = opcode args` text form used by
    /// debug logging.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "block @ {} ({} instructions, {} cycles)",
            self.location,
            self.len,
            self.cycle_count
        )?;
        if self.cond != Cond::AL {
            writeln!(
                f,
                "  guarded by {} (fail -> {:?})",
                self.cond, self.cond_failed
            )?;
        }
        for inst in self.iter() {
            let data = self.inst(inst);
            write!(f, "  ")?;
            if data.opcode.result_type() != super::Type::Void {
                if data.name != 0 {
                    write!(f, "%{:<4} = ", data.name)?;
                } else {
                    write!(f, "%?{:<3} = ", inst.index())?;
                }
            } else {
                write!(f, "{:8} ", "")?;
            }
            write!(f, "{}", data.opcode.name())?;
            for (i, arg) in data.args().iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                match arg.inst() {
                    Some(referenced) if self.insts[referenced].name != 0 => {
                        write!(f, "{sep}%{}", self.insts[referenced].name)?
                    }
                    _ => write!(f, "{sep}{arg}")?,
                }
            }
            writeln!(f, " (uses: {})", data.use_count)?;
        }
        writeln!(f, "  terminal: {:?}", self.terminal)
    }
}

use cranelift_entity::EntityRef;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;

    fn block() -> Block {
        Block::new(LocationDescriptor::new(0x1000))
    }

    #[test]
    fn append_links_in_order() {
        let mut b = block();
        let a = b.append(Opcode::A64GetSP, &[]);
        let c = b.append(Opcode::A64SetSP, &[Value::Inst(a)]);
        assert_eq!(b.collect_insts(), vec![a, c]);
        assert_eq!(b.use_count(a), 1);
        assert_eq!(b.use_count(c), 0);
    }

    #[test]
    fn remove_releases_uses() {
        let mut b = block();
        let a = b.append(Opcode::A64GetSP, &[]);
        let c = b.append(Opcode::A64SetSP, &[Value::Inst(a)]);
        b.remove(c);
        assert_eq!(b.use_count(a), 0);
        assert_eq!(b.collect_insts(), vec![a]);
        b.remove(a);
        assert!(b.is_empty());
    }

    #[test]
    fn insert_before_keeps_order() {
        let mut b = block();
        let a = b.append(Opcode::Void, &[]);
        let c = b.append(Opcode::Void, &[]);
        let mid = b.insert_before(c, Opcode::Breakpoint, &[]);
        assert_eq!(b.collect_insts(), vec![a, mid, c]);
        let front = b.insert_before(a, Opcode::Breakpoint, &[]);
        assert_eq!(b.collect_insts(), vec![front, a, mid, c]);
    }

    #[test]
    fn identity_rewrite_moves_uses() {
        let mut b = block();
        let x = b.append(Opcode::A64GetSP, &[]);
        let y = b.append(
            Opcode::Add64,
            &[Value::Inst(x), Value::U64(4), Value::U1(false)],
        );
        b.replace_with_identity(y, Value::U64(16));
        assert_eq!(b.opcode(y), Opcode::Identity);
        assert_eq!(b.use_count(x), 0);
        assert_eq!(b.type_of(Value::Inst(y)), Type::U64);
    }

    #[test]
    #[should_panic(expected = "already has a terminal")]
    fn terminal_set_once() {
        let mut b = block();
        b.set_terminal(Terminal::ReturnToDispatch);
        b.set_terminal(Terminal::ReturnToDispatch);
    }
}
