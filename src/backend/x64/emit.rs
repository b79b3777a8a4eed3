//! IR block lowering to x86-64.
//!
//! The emitter walks a block in order, dispatching each micro-operation to
//! a lowering routine, then lowers the terminal. Values of width 64 bits or
//! less live zero-extended in general-purpose registers; 128-bit values
//! live in vector registers. Flag-producing pseudo-operations are realized
//! as a side effect of their parent's lowering.

use super::asm::{Assembler, Cc, Gpr, Size};
use crate::backend::regalloc::{RegAlloc, HALT, STATE};
use crate::backend::{EmittedBlockInfo, LinkTarget, Relocation};
use crate::ir::{Block, Cond, Inst, Opcode, Terminal, Type, Value};
use crate::opt::pseudo_op_map;
use crate::state::StateLayout;
use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;

/// Which guest architecture the block comes from; decides location
/// descriptor packing at terminals and register file addressing.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum GuestArch {
    A32,
    A64,
}

/// Absolute addresses of the prelude-resident trampolines.
#[derive(Copy, Clone, Default)]
pub struct Trampolines {
    pub read_memory_8: usize,
    pub read_memory_16: usize,
    pub read_memory_32: usize,
    pub read_memory_64: usize,
    pub read_memory_128: usize,
    pub write_memory_8: usize,
    pub write_memory_16: usize,
    pub write_memory_32: usize,
    pub write_memory_64: usize,
    pub write_memory_128: usize,
    pub exclusive_read_8: usize,
    pub exclusive_read_16: usize,
    pub exclusive_read_32: usize,
    pub exclusive_read_64: usize,
    pub exclusive_read_128: usize,
    pub exclusive_write_8: usize,
    pub exclusive_write_16: usize,
    pub exclusive_write_32: usize,
    pub exclusive_write_64: usize,
    pub exclusive_write_128: usize,
    pub clear_exclusive: usize,
    pub call_svc: usize,
    pub exception_raised: usize,
    pub isb_raised: usize,
    pub add_ticks: usize,
    pub get_ticks_remaining: usize,
    pub get_cntpct: usize,
}

/// Everything the emitter needs besides the block itself.
pub struct EmitConfig {
    pub arch: GuestArch,
    pub layout: StateLayout,
    pub trampolines: Trampolines,
    pub enable_cycle_counting: bool,
    pub cntfrq_el0: u32,
    pub ctr_el0: u32,
    pub dczid_el0: u32,
}

/// Lowers one optimized block into `buf` (mapped at `base_addr`).
pub fn emit_block(
    buf: &mut [u8],
    base_addr: usize,
    block: &Block,
    conf: &EmitConfig,
) -> EmittedBlockInfo {
    let mut emitter = BlockEmitter {
        asm: Assembler::new(buf, base_addr),
        ra: RegAlloc::new(block, conf.layout),
        block,
        conf,
        pseudos: pseudo_op_map(block),
        relocations: SmallVec::new(),
    };
    emitter.emit();
    let size = emitter.asm.offset();
    EmittedBlockInfo {
        entry_point: base_addr,
        size,
        relocations: emitter.relocations,
    }
}

pub(super) struct BlockEmitter<'a, 'b> {
    pub asm: Assembler<'a>,
    pub ra: RegAlloc,
    pub block: &'b Block,
    pub conf: &'b EmitConfig,
    pub pseudos: SecondaryMap<Inst, SmallVec<[Inst; 2]>>,
    pub relocations: SmallVec<[Relocation; 4]>,
}

impl BlockEmitter<'_, '_> {
    fn emit(&mut self) {
        let layout = self.conf.layout;

        if self.conf.enable_cycle_counting {
            self.asm.sub_mi(
                Size::Qword,
                STATE,
                layout.cycles_remaining,
                self.block.cycle_count() as i32,
            );
        }

        // Guarded block: evaluate the condition against the stored flags and
        // divert to the condition-failed tail.
        let cond_failed = if self.block.cond() != Cond::AL {
            let label = self.asm.new_label();
            self.asm.mov_rm(Size::Dword, Gpr::Rax, STATE, layout.nzcv);
            self.emit_cond_jump(self.block.cond().invert(), Gpr::Rax, Gpr::Rcx, label);
            Some(label)
        } else {
            None
        };

        for inst in self.block.iter() {
            let opcode = self.block.opcode(inst);
            if opcode.is_pseudo_operation() {
                continue;
            }
            self.lower(inst, opcode);
            self.ra.end_of_inst();
        }

        self.emit_terminal(self.block.terminal().clone());

        if let Some(label) = cond_failed {
            self.asm.bind(label);
            // The entry charged the full block; the failed path consumes
            // only its own count.
            if self.conf.enable_cycle_counting {
                let refund =
                    (self.block.cycle_count() - self.block.cond_failed_cycle_count()) as i32;
                if refund != 0 {
                    self.asm
                        .add_mi(Size::Qword, STATE, layout.cycles_remaining, refund);
                }
            }
            let next = self
                .block
                .cond_failed_location()
                .expect("guarded block without fallback");
            self.emit_terminal(Terminal::LinkBlock { next });
        }
    }

    /// Records a relocation at the current offset and emits its placeholder
    /// branch.
    pub fn emit_reloc_jump(&mut self, target: LinkTarget) {
        let offset = self.asm.jmp_reloc();
        self.relocations.push(Relocation { offset, target });
    }

    /// Jump to `label` when `cond` passes against the flags in `nzcv`.
    /// `tmp` may be clobbered.
    pub fn emit_cond_jump(&mut self, cond: Cond, nzcv: Gpr, tmp: Gpr, label: super::asm::Label) {
        use Cond::*;
        const N: u8 = 31;
        const Z: u8 = 30;
        const C: u8 = 29;
        const V: u8 = 28;
        match cond {
            EQ => {
                self.asm.bt_ri(Size::Dword, nzcv, Z);
                self.asm.jcc(Cc::B, label);
            }
            NE => {
                self.asm.bt_ri(Size::Dword, nzcv, Z);
                self.asm.jcc(Cc::Ae, label);
            }
            CS => {
                self.asm.bt_ri(Size::Dword, nzcv, C);
                self.asm.jcc(Cc::B, label);
            }
            CC => {
                self.asm.bt_ri(Size::Dword, nzcv, C);
                self.asm.jcc(Cc::Ae, label);
            }
            MI => {
                self.asm.bt_ri(Size::Dword, nzcv, N);
                self.asm.jcc(Cc::B, label);
            }
            PL => {
                self.asm.bt_ri(Size::Dword, nzcv, N);
                self.asm.jcc(Cc::Ae, label);
            }
            VS => {
                self.asm.bt_ri(Size::Dword, nzcv, V);
                self.asm.jcc(Cc::B, label);
            }
            VC => {
                self.asm.bt_ri(Size::Dword, nzcv, V);
                self.asm.jcc(Cc::Ae, label);
            }
            HI | LS => {
                // C set and Z clear.
                self.asm.mov_rr(Size::Dword, tmp, nzcv);
                self.asm.and_ri(Size::Dword, tmp, (1 << Z | 1 << C) as i32);
                self.asm.cmp_ri(Size::Dword, tmp, 1 << C);
                self.asm.jcc(if cond == HI { Cc::E } else { Cc::Ne }, label);
            }
            GE | LT => {
                // N == V, computed by folding N down onto V.
                self.asm.mov_rr(Size::Dword, tmp, nzcv);
                self.asm.shr_i(Size::Dword, tmp, 3);
                self.asm.xor_rr(Size::Dword, tmp, nzcv);
                self.asm.bt_ri(Size::Dword, tmp, V);
                self.asm.jcc(if cond == GE { Cc::Ae } else { Cc::B }, label);
            }
            GT => {
                let fail = self.asm.new_label();
                self.asm.bt_ri(Size::Dword, nzcv, Z);
                self.asm.jcc(Cc::B, fail);
                self.asm.mov_rr(Size::Dword, tmp, nzcv);
                self.asm.shr_i(Size::Dword, tmp, 3);
                self.asm.xor_rr(Size::Dword, tmp, nzcv);
                self.asm.bt_ri(Size::Dword, tmp, V);
                self.asm.jcc(Cc::Ae, label);
                self.asm.bind(fail);
            }
            LE => {
                self.asm.bt_ri(Size::Dword, nzcv, Z);
                self.asm.jcc(Cc::B, label);
                self.asm.mov_rr(Size::Dword, tmp, nzcv);
                self.asm.shr_i(Size::Dword, tmp, 3);
                self.asm.xor_rr(Size::Dword, tmp, nzcv);
                self.asm.bt_ri(Size::Dword, tmp, V);
                self.asm.jcc(Cc::B, label);
            }
            AL | NV => {
                self.asm.jmp(label);
            }
        }
    }

    fn emit_terminal(&mut self, terminal: Terminal) {
        let layout = self.conf.layout;
        match terminal {
            Terminal::ReturnToDispatch => {
                self.emit_reloc_jump(LinkTarget::ReturnToDispatcher);
            }
            Terminal::LinkBlock { next } | Terminal::LinkBlockFast { next } => {
                self.emit_store_location(next);
                self.emit_reloc_jump(LinkTarget::Block(next));
            }
            Terminal::PopRSBHint | Terminal::FastDispatchHint => {
                // The hint caches are not carried by this backend; both
                // collapse into a dispatcher lookup.
                self.emit_reloc_jump(LinkTarget::ReturnToDispatcher);
            }
            Terminal::If { cond, then_, else_ } => {
                let taken = self.asm.new_label();
                self.asm.mov_rm(Size::Dword, Gpr::Rax, STATE, layout.nzcv);
                self.emit_cond_jump(cond, Gpr::Rax, Gpr::Rcx, taken);
                self.emit_terminal(*else_);
                self.asm.bind(taken);
                self.emit_terminal(*then_);
            }
            Terminal::CheckBit { then_, else_ } => {
                let taken = self.asm.new_label();
                self.asm.movzx8_rm(Gpr::Rax, STATE, layout.check_bit);
                self.asm.test_rr(Size::Dword, Gpr::Rax, Gpr::Rax);
                self.asm.jcc(Cc::Ne, taken);
                self.emit_terminal(*else_);
                self.asm.bind(taken);
                self.emit_terminal(*then_);
            }
            Terminal::CheckHalt { else_ } => {
                let no_halt = self.asm.new_label();
                self.asm.mov_rm(Size::Dword, Gpr::Rax, HALT, 0);
                self.asm.test_rr(Size::Dword, Gpr::Rax, Gpr::Rax);
                self.asm.jcc(Cc::E, no_halt);
                self.emit_reloc_jump(LinkTarget::ReturnFromRunCode);
                self.asm.bind(no_halt);
                self.emit_terminal(*else_);
            }
            Terminal::Invalid | Terminal::Interpret { .. } => {
                panic!("terminal {terminal:?} has no lowering");
            }
        }
    }

    /// Writes the location descriptor of the next block into the state so
    /// the dispatcher looks up the right key.
    fn emit_store_location(&mut self, next: crate::loc::LocationDescriptor) {
        let layout = self.conf.layout;
        match self.conf.arch {
            GuestArch::A64 => {
                let pc = crate::frontend::a64::LocationDescriptor::from_ir(next).pc();
                self.asm.mov_ri64(Gpr::Rax, pc);
                self.asm.mov_mr(Size::Qword, STATE, layout.pc, Gpr::Rax);
            }
            GuestArch::A32 => {
                let raw = next.value();
                self.asm.mov_mi32(STATE, layout.pc, raw as u32);
                self.asm.mov_mi32(
                    STATE,
                    layout.upper_location.expect("A32 layout"),
                    (raw >> 32) as u32,
                );
            }
        }
    }

    /// The operand width of an integer-typed value.
    pub fn size_of(&self, value: Value) -> Size {
        match self.block.type_of(value) {
            Type::U64 => Size::Qword,
            _ => Size::Dword,
        }
    }

    /// Whether `imm` can ride in a sign-extended imm32 field at this size.
    pub fn fits_imm32(size: Size, bits: u64) -> bool {
        match size {
            Size::Dword => true,
            Size::Qword => bits as i64 == (bits as i32) as i64,
        }
    }

    /// Direct call to a helper `extern "C" fn`; every live value must have
    /// been flushed already.
    pub fn call_helper(&mut self, addr: usize) {
        self.asm.mov_ri64(Gpr::Rax, addr as u64);
        self.asm.call_r(Gpr::Rax);
    }

    fn lower(&mut self, inst: Inst, opcode: Opcode) {
        use Opcode::*;
        match opcode {
            // Structural opcodes are dissolved by the optimization pipeline;
            // reaching the emitter is a pass bug.
            Void | Identity | PushRSB | ExtractRegister32 | ExtractRegister64 => {
                panic!("{} reached the emitter; missing pass", opcode.name())
            }
            Breakpoint => self.asm.int3(),
            SetCheckBit => self.lower_set_check_bit(inst),
            NZCVFromPackedFlags => {
                // Same register representation as any other NZCV value.
                let src = self.block.arg(inst, 0);
                self.ra.rw_gpr(&mut self.asm, inst, src);
            }

            GetCarryFromOp | GetOverflowFromOp | GetNZCVFromOp | GetNZFromOp => {
                unreachable!("pseudo-operations are realized by their parent")
            }

            // Guest state.
            A64GetW | A64GetX | A64GetSP | A64GetNZCVRaw | A64GetFPCR | A64GetTPIDR
            | A64GetTPIDRRO | A64GetCNTFRQ | A64GetCTR | A64GetDCZID | A64GetCFlag
            | A32GetRegister | A32GetCFlag | A32GetExtendedRegister32
            | A32GetExtendedRegister64 => self.lower_state_get(inst, opcode),
            A64SetW | A64SetX | A64SetSP | A64SetPC | A64SetNZCV | A64SetNZCVRaw | A64SetTPIDR
            | A32SetRegister | A32SetCpsrNZCV | A32SetCpsrNZCVRaw | A32SetCpsrNZ
            | A32SetCpsrNZC | A32SetExtendedRegister32 | A32SetExtendedRegister64 => {
                self.lower_state_set(inst, opcode)
            }
            A64GetS | A64GetD | A64GetQ | A64SetS | A64SetD | A64SetQ | A32GetVector
            | A32SetVector => self.lower_vector_state(inst, opcode),
            A32GetCpsr => self.lower_a32_get_cpsr(inst),
            A32BXWritePC => self.lower_a32_bx_write_pc(inst),

            // Memory and services.
            op if op.is_memory_read() || op.is_memory_write() => self.lower_memory(inst, opcode),
            A32ClearExclusive | A64ClearExclusive => self.lower_clear_exclusive(),
            A32CallSupervisor | A64CallSupervisor => self.lower_call_supervisor(inst),
            A32ExceptionRaised | A64ExceptionRaised => self.lower_exception_raised(inst),
            DataSynchronizationBarrier | DataMemoryBarrier => self.asm.mfence(),
            InstructionSynchronizationBarrier => self.lower_isb(),
            A64GetCNTPCT => self.lower_get_cntpct(inst),
            A64GetFPSR => self.lower_get_fpsr(inst),
            A64SetFPSR => self.lower_set_fpsr(inst),
            A64SetFPCR => self.lower_set_fpcr(inst),

            // Everything else is data processing, vector or floating point.
            _ => self.lower_data(inst, opcode),
        }
    }
}
