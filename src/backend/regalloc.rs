//! Register allocation for the block emitter.
//!
//! Values live in host registers, in 16-byte spill slots inside the jit
//! state, or nowhere yet. Each value's remaining-use count drives freeing:
//! a read consumes one use, and a location is released once its value has
//! no uses left. Within one IR instruction the protocol is: reads, then
//! writes, then the opcode's own host instructions, then
//! [`RegAlloc::end_of_inst`].
//!
//! Host callouts flush every live value to its spill slot first; the callee
//! may clobber anything except the pinned state and halt registers.

use super::x64::asm::{Assembler, Gpr, Xmm};
use crate::ir::{Block, Inst, Value};
use crate::state::{StateLayout, SPILL_SLOTS};
use cranelift_entity::SecondaryMap;

/// The pinned guest-state pointer.
pub const STATE: Gpr = Gpr::R15;
/// The pinned halt-word pointer.
pub const HALT: Gpr = Gpr::R14;

/// GPRs handed out to values, in preference order.
const ALLOCATABLE_GPRS: [Gpr; 13] = [
    Gpr::Rax,
    Gpr::Rcx,
    Gpr::Rdx,
    Gpr::Rbx,
    Gpr::Rsi,
    Gpr::Rdi,
    Gpr::R8,
    Gpr::R9,
    Gpr::R10,
    Gpr::R11,
    Gpr::Rbp,
    Gpr::R12,
    Gpr::R13,
];

/// SysV integer argument registers used for callouts; argument 0 (the
/// context) is installed by the trampoline itself.
pub const CALL_ARGS: [Gpr; 3] = [Gpr::Rsi, Gpr::Rdx, Gpr::Rcx];

#[derive(Copy, Clone, PartialEq, Default, Debug)]
enum ValueLoc {
    #[default]
    None,
    Gpr(Gpr),
    Xmm(Xmm),
    Spill(u16),
}

#[derive(Copy, Clone, Default)]
struct HostReg {
    occupant: Option<Inst>,
    locked: bool,
}

pub struct RegAlloc {
    layout: StateLayout,
    uses: SecondaryMap<Inst, u32>,
    loc: SecondaryMap<Inst, ValueLoc>,
    gprs: [HostReg; 16],
    xmms: [HostReg; 16],
    /// Pure scratch registers handed out for the current instruction.
    scratch_gprs: Vec<Gpr>,
    scratch_xmms: Vec<Xmm>,
    spill_used: [bool; SPILL_SLOTS],
}

impl RegAlloc {
    pub fn new(block: &Block, layout: StateLayout) -> Self {
        let mut uses = SecondaryMap::new();
        for inst in block.iter() {
            uses[inst] = block.use_count(inst);
        }
        Self {
            layout,
            uses,
            loc: SecondaryMap::new(),
            gprs: [HostReg::default(); 16],
            xmms: [HostReg::default(); 16],
            scratch_gprs: Vec::new(),
            scratch_xmms: Vec::new(),
            spill_used: [false; SPILL_SLOTS],
        }
    }

    // Spill bookkeeping.

    fn take_spill_slot(&mut self) -> u16 {
        let slot = self
            .spill_used
            .iter()
            .position(|used| !used)
            .expect("out of spill slots");
        self.spill_used[slot] = true;
        slot as u16
    }

    fn release_loc(&mut self, loc: ValueLoc) {
        match loc {
            ValueLoc::Gpr(reg) => self.gprs[reg.index()] = HostReg::default(),
            ValueLoc::Xmm(reg) => self.xmms[reg.index()] = HostReg::default(),
            ValueLoc::Spill(slot) => self.spill_used[slot as usize] = false,
            ValueLoc::None => {}
        }
    }

    // Register acquisition.

    fn alloc_gpr(&mut self, asm: &mut Assembler) -> Gpr {
        if let Some(reg) = ALLOCATABLE_GPRS
            .iter()
            .find(|r| self.gprs[r.index()].occupant.is_none() && !self.gprs[r.index()].locked)
        {
            return *reg;
        }
        // Evict the first unlocked occupant to its spill slot.
        let victim = *ALLOCATABLE_GPRS
            .iter()
            .find(|r| !self.gprs[r.index()].locked)
            .expect("all registers locked");
        let inst = self.gprs[victim.index()].occupant.unwrap();
        let slot = self.take_spill_slot();
        asm.mov_mr(
            super::x64::asm::Size::Qword,
            STATE,
            self.layout.spill_slot(slot as usize),
            victim,
        );
        self.loc[inst] = ValueLoc::Spill(slot);
        self.gprs[victim.index()] = HostReg::default();
        victim
    }

    fn alloc_xmm(&mut self, asm: &mut Assembler) -> Xmm {
        for index in 0..16 {
            if self.xmms[index].occupant.is_none() && !self.xmms[index].locked {
                return Xmm(index as u8);
            }
        }
        let victim_index = (0..16)
            .find(|&i| !self.xmms[i].locked)
            .expect("all vector registers locked");
        let victim = Xmm(victim_index as u8);
        let inst = self.xmms[victim_index].occupant.unwrap();
        let slot = self.take_spill_slot();
        asm.movdqu_mx(STATE, self.layout.spill_slot(slot as usize), victim);
        self.loc[inst] = ValueLoc::Spill(slot);
        self.xmms[victim_index] = HostReg::default();
        victim
    }

    fn bind_gpr(&mut self, inst: Inst, reg: Gpr) {
        self.gprs[reg.index()] = HostReg {
            occupant: Some(inst),
            locked: true,
        };
        self.loc[inst] = ValueLoc::Gpr(reg);
    }

    fn bind_xmm(&mut self, inst: Inst, reg: Xmm) {
        self.xmms[reg.index()] = HostReg {
            occupant: Some(inst),
            locked: true,
        };
        self.loc[inst] = ValueLoc::Xmm(reg);
    }

    /// Materializes an integer value into a register for reading. Consumes
    /// one use when the value is an instruction result.
    pub fn read_gpr(&mut self, asm: &mut Assembler, value: Value) -> Gpr {
        match value {
            Value::Inst(inst) => {
                let reg = self.ensure_gpr(asm, inst);
                debug_assert!(self.uses[inst] > 0, "value read past its last use");
                self.uses[inst] -= 1;
                self.gprs[reg.index()].locked = true;
                reg
            }
            imm if imm.is_immediate() => {
                let reg = self.alloc_gpr(asm);
                let bits = imm.immediate_as_u64();
                if bits <= u32::MAX as u64 {
                    asm.mov_ri32(reg, bits as u32);
                } else {
                    asm.mov_ri64(reg, bits);
                }
                self.gprs[reg.index()].locked = true;
                self.scratch_gprs.push(reg);
                reg
            }
            other => panic!("cannot materialize {other} into a register"),
        }
    }

    fn ensure_gpr(&mut self, asm: &mut Assembler, inst: Inst) -> Gpr {
        match self.loc[inst] {
            ValueLoc::Gpr(reg) => reg,
            ValueLoc::Spill(slot) => {
                let reg = self.alloc_gpr(asm);
                asm.mov_rm(
                    super::x64::asm::Size::Qword,
                    reg,
                    STATE,
                    self.layout.spill_slot(slot as usize),
                );
                self.spill_used[slot as usize] = false;
                self.gprs[reg.index()] = HostReg {
                    occupant: Some(inst),
                    locked: false,
                };
                self.loc[inst] = ValueLoc::Gpr(reg);
                reg
            }
            ValueLoc::Xmm(_) => panic!("vector value read as integer"),
            ValueLoc::None => panic!("value has no definition"),
        }
    }

    pub fn read_xmm(&mut self, asm: &mut Assembler, value: Value) -> Xmm {
        let inst = value
            .inst()
            .expect("vector operands are always instruction results");
        let reg = match self.loc[inst] {
            ValueLoc::Xmm(reg) => reg,
            ValueLoc::Spill(slot) => {
                let reg = self.alloc_xmm(asm);
                asm.movdqu_xm(reg, STATE, self.layout.spill_slot(slot as usize));
                self.spill_used[slot as usize] = false;
                self.xmms[reg.index()] = HostReg {
                    occupant: Some(inst),
                    locked: false,
                };
                self.loc[inst] = ValueLoc::Xmm(reg);
                reg
            }
            ValueLoc::Gpr(_) => panic!("integer value read as vector"),
            ValueLoc::None => panic!("value has no definition"),
        };
        debug_assert!(self.uses[inst] > 0, "value read past its last use");
        self.uses[inst] -= 1;
        self.xmms[reg.index()].locked = true;
        reg
    }

    /// Allocates the destination register for `inst`.
    pub fn write_gpr(&mut self, asm: &mut Assembler, inst: Inst) -> Gpr {
        let reg = self.alloc_gpr(asm);
        self.bind_gpr(inst, reg);
        reg
    }

    pub fn write_xmm(&mut self, asm: &mut Assembler, inst: Inst) -> Xmm {
        let reg = self.alloc_xmm(asm);
        self.bind_xmm(inst, reg);
        reg
    }

    /// Destination that starts as a copy of `src` (the x86 two-operand
    /// idiom). Steals the source register when this read was its last use.
    pub fn rw_gpr(&mut self, asm: &mut Assembler, inst: Inst, src: Value) -> Gpr {
        if let Some(src_inst) = src.inst() {
            let reg = self.read_gpr(asm, src);
            if self.uses[src_inst] == 0 {
                self.loc[src_inst] = ValueLoc::None;
                self.bind_gpr(inst, reg);
                return reg;
            }
            let dst = self.alloc_gpr(asm);
            asm.mov_rr(super::x64::asm::Size::Qword, dst, reg);
            self.bind_gpr(inst, dst);
            dst
        } else {
            let dst = self.write_gpr(asm, inst);
            let bits = src.immediate_as_u64();
            if bits <= u32::MAX as u64 {
                asm.mov_ri32(dst, bits as u32);
            } else {
                asm.mov_ri64(dst, bits);
            }
            dst
        }
    }

    pub fn rw_xmm(&mut self, asm: &mut Assembler, inst: Inst, src: Value) -> Xmm {
        let src_inst = src
            .inst()
            .expect("vector operands are always instruction results");
        let reg = self.read_xmm(asm, src);
        if self.uses[src_inst] == 0 {
            self.loc[src_inst] = ValueLoc::None;
            self.bind_xmm(inst, reg);
            return reg;
        }
        let dst = self.alloc_xmm(asm);
        asm.movaps_xx(dst, reg);
        self.bind_xmm(inst, dst);
        dst
    }

    /// A locked temporary with no value bound.
    pub fn scratch_gpr(&mut self, asm: &mut Assembler) -> Gpr {
        let reg = self.alloc_gpr(asm);
        self.gprs[reg.index()].locked = true;
        self.scratch_gprs.push(reg);
        reg
    }

    pub fn scratch_xmm(&mut self, asm: &mut Assembler) -> Xmm {
        let reg = self.alloc_xmm(asm);
        self.xmms[reg.index()].locked = true;
        self.scratch_xmms.push(reg);
        reg
    }

    /// Claims one particular register (rax/rdx for divisions), relocating
    /// any live occupant.
    pub fn get_specific(&mut self, asm: &mut Assembler, reg: Gpr) {
        assert!(!self.gprs[reg.index()].locked, "register already locked");
        if let Some(inst) = self.gprs[reg.index()].occupant {
            let replacement = {
                self.gprs[reg.index()].locked = true;
                let replacement = self.alloc_gpr(asm);
                self.gprs[reg.index()].locked = false;
                replacement
            };
            asm.mov_rr(super::x64::asm::Size::Qword, replacement, reg);
            self.gprs[replacement.index()] = HostReg {
                occupant: Some(inst),
                locked: false,
            };
            self.loc[inst] = ValueLoc::Gpr(replacement);
        }
        self.gprs[reg.index()] = HostReg {
            occupant: None,
            locked: true,
        };
        self.scratch_gprs.push(reg);
    }

    /// Binds `inst`'s result to a register claimed with
    /// [`get_specific`](Self::get_specific).
    pub fn define_in_gpr(&mut self, inst: Inst, reg: Gpr) {
        debug_assert!(self.gprs[reg.index()].locked);
        self.scratch_gprs.retain(|&r| r != reg);
        self.bind_gpr(inst, reg);
    }

    /// One pseudo-operation consumed its parent value.
    pub fn consume_use(&mut self, inst: Inst) {
        debug_assert!(self.uses[inst] > 0);
        self.uses[inst] -= 1;
    }

    pub fn uses_remaining(&self, inst: Inst) -> u32 {
        self.uses[inst]
    }

    /// Ends the current IR instruction: unlock everything and release the
    /// locations of values with no remaining uses.
    pub fn end_of_inst(&mut self) {
        for reg in &mut self.gprs {
            reg.locked = false;
        }
        for reg in &mut self.xmms {
            reg.locked = false;
        }
        for index in 0..16 {
            if let Some(inst) = self.gprs[index].occupant {
                if self.uses[inst] == 0 {
                    self.loc[inst] = ValueLoc::None;
                    self.gprs[index] = HostReg::default();
                }
            }
            if let Some(inst) = self.xmms[index].occupant {
                if self.uses[inst] == 0 {
                    self.loc[inst] = ValueLoc::None;
                    self.xmms[index] = HostReg::default();
                }
            }
        }
        self.scratch_gprs.clear();
        self.scratch_xmms.clear();
    }

    /// Moves every live value into its spill slot; after this no host
    /// register holds anything.
    pub fn flush_all(&mut self, asm: &mut Assembler) {
        for index in 0..16 {
            assert!(
                !self.gprs[index].locked && !self.xmms[index].locked,
                "flush with locked registers"
            );
            if let Some(inst) = self.gprs[index].occupant {
                if self.uses[inst] > 0 {
                    let slot = self.take_spill_slot();
                    asm.mov_mr(
                        super::x64::asm::Size::Qword,
                        STATE,
                        self.layout.spill_slot(slot as usize),
                        Gpr::ALL[index],
                    );
                    self.loc[inst] = ValueLoc::Spill(slot);
                } else {
                    self.loc[inst] = ValueLoc::None;
                }
                self.gprs[index] = HostReg::default();
            }
            if let Some(inst) = self.xmms[index].occupant {
                if self.uses[inst] > 0 {
                    let slot = self.take_spill_slot();
                    asm.movdqu_mx(STATE, self.layout.spill_slot(slot as usize), Xmm(index as u8));
                    self.loc[inst] = ValueLoc::Spill(slot);
                } else {
                    self.loc[inst] = ValueLoc::None;
                }
                self.xmms[index] = HostReg::default();
            }
        }
    }

    /// Flushes live state and loads integer arguments into the callout
    /// argument registers.
    pub fn prepare_call(&mut self, asm: &mut Assembler, args: &[Value]) {
        assert!(args.len() <= CALL_ARGS.len());
        self.flush_all(asm);
        for (value, &target) in args.iter().zip(&CALL_ARGS) {
            match value {
                Value::Inst(inst) => {
                    match self.loc[*inst] {
                        ValueLoc::Spill(slot) => {
                            asm.mov_rm(
                                super::x64::asm::Size::Qword,
                                target,
                                STATE,
                                self.layout.spill_slot(slot as usize),
                            );
                        }
                        other => panic!("call argument in unexpected location {other:?}"),
                    }
                    debug_assert!(self.uses[*inst] > 0);
                    self.uses[*inst] -= 1;
                    if self.uses[*inst] == 0 {
                        let loc = self.loc[*inst];
                        self.loc[*inst] = ValueLoc::None;
                        self.release_loc(loc);
                    }
                }
                imm if imm.is_immediate() => {
                    let bits = imm.immediate_as_u64();
                    if bits <= u32::MAX as u64 {
                        asm.mov_ri32(target, bits as u32);
                    } else {
                        asm.mov_ri64(target, bits);
                    }
                }
                other => panic!("cannot pass {other} to a callout"),
            }
        }
    }

    /// Binds a callout's integer result (in rax) to `inst`.
    pub fn call_result(&mut self, inst: Inst) {
        self.bind_gpr(inst, Gpr::Rax);
    }

    /// Loads both halves of a spilled 128-bit value into two specific
    /// registers (used to marshal vector stores into callout arguments).
    /// Only valid after [`flush_all`](Self::flush_all)/
    /// [`prepare_call`](Self::prepare_call).
    pub fn load_spilled_pair(&mut self, asm: &mut Assembler, value: Value, lo: Gpr, hi: Gpr) {
        let inst = value
            .inst()
            .expect("vector operands are always instruction results");
        match self.loc[inst] {
            ValueLoc::Spill(slot) => {
                let base = self.layout.spill_slot(slot as usize);
                asm.mov_rm(super::x64::asm::Size::Qword, lo, STATE, base);
                asm.mov_rm(super::x64::asm::Size::Qword, hi, STATE, base + 8);
            }
            other => panic!("128-bit call argument in unexpected location {other:?}"),
        }
        debug_assert!(self.uses[inst] > 0);
        self.uses[inst] -= 1;
        if self.uses[inst] == 0 {
            let loc = self.loc[inst];
            self.loc[inst] = ValueLoc::None;
            self.release_loc(loc);
        }
    }
}
