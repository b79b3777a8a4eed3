//! A32 translation driver and visitor.

use super::{LocationDescriptor, Reg};
use crate::frontend::bits::*;
use crate::frontend::decoder::{decode, Matcher};
use crate::ir::{Block, Cond, Exception, IrEmitter, Terminal, Value};
use std::sync::OnceLock;

const MAX_BLOCK_LEN: usize = 32;

/// Embedder knobs that change translation.
#[derive(Copy, Clone, Debug)]
pub struct TranslationOptions {
    /// Architecture version (7 or 8); gates v8-only encodings.
    pub arch_version: u32,
    pub define_unpredictable_behaviour: bool,
    pub hook_hint_instructions: bool,
}

impl Default for TranslationOptions {
    fn default() -> Self {
        Self {
            arch_version: 8,
            define_unpredictable_behaviour: false,
            hook_hint_instructions: false,
        }
    }
}

/// Where the block stands with respect to a guarding condition.
#[derive(Copy, Clone, PartialEq)]
enum ConditionalState {
    /// No condition encountered yet.
    None,
    /// Every instruction so far shares the block's guarding condition.
    Translating(Cond),
}

/// Translates the basic block starting at `descriptor` (ARM mode).
///
/// Thumb decoding is not carried by this port: a descriptor with the T bit
/// set translates to an unallocated-encoding exception block.
pub fn translate(
    descriptor: LocationDescriptor,
    read_code: &mut dyn FnMut(u32) -> Option<u32>,
    options: TranslationOptions,
) -> Block {
    let block = Block::new(descriptor.to_ir());
    let mut visitor = TranslatorVisitor {
        ir: IrEmitter::new(block),
        location: descriptor,
        options,
        cond_state: ConditionalState::None,
    };

    if descriptor.thumb() {
        visitor.raise_exception(Exception::UnallocatedEncoding);
        let mut block = visitor.ir.block;
        block.set_end_location(descriptor.advance_pc(2).to_ir());
        block.add_cycles(1);
        return block;
    }

    let single_step = descriptor.single_stepping();
    loop {
        let pc = visitor.location.pc();
        let should_continue = match read_code(pc) {
            Some(word) => translate_instruction(&mut visitor, word),
            None => {
                visitor.raise_exception(Exception::DecodeError);
                InstructionOutcome::End
            }
        };

        match should_continue {
            InstructionOutcome::Continue => {
                visitor.location = visitor.location.advance_pc(4);
                visitor.ir.block.add_cycles(1);
            }
            InstructionOutcome::End => {
                visitor.location = visitor.location.advance_pc(4);
                visitor.ir.block.add_cycles(1);
                break;
            }
            InstructionOutcome::EndBeforeInstruction => break,
        }

        if single_step || visitor.ir.block.len() >= MAX_BLOCK_LEN {
            let next = visitor.location.to_ir();
            visitor.ir.block.set_terminal(Terminal::LinkBlock { next });
            break;
        }
    }

    // A single-stepped block needs no special terminal: every chaining
    // path re-polls the halt word (seeded with the Step bit) before any
    // further guest code can run.
    let mut block = visitor.ir.block;
    block.set_end_location(visitor.location.to_ir());
    debug_assert!(block.has_terminal());
    log::trace!("translated A32 block:\n{block}");
    block
}

/// Appends IR for one pre-fetched instruction; returns whether translation
/// may continue in the same block.
pub fn translate_single_instruction(
    block: Block,
    descriptor: LocationDescriptor,
    word: u32,
    options: TranslationOptions,
) -> (Block, bool) {
    let mut visitor = TranslatorVisitor {
        ir: IrEmitter::new(block),
        location: descriptor,
        options,
        cond_state: ConditionalState::None,
    };
    let should_continue = matches!(
        translate_instruction(&mut visitor, word),
        InstructionOutcome::Continue
    );
    visitor.location = visitor.location.advance_pc(4);
    visitor.ir.block.add_cycles(1);
    let mut block = visitor.ir.block;
    block.set_end_location(visitor.location.to_ir());
    (block, should_continue)
}

enum InstructionOutcome {
    Continue,
    End,
    /// The block closed without consuming the fetched instruction (condition
    /// run boundary).
    EndBeforeInstruction,
}

fn translate_instruction(
    visitor: &mut TranslatorVisitor,
    word: u32,
) -> InstructionOutcome {
    let cond = if field(word, 31, 28) == 0b1111 {
        // The unconditional space carries its own encodings.
        Cond::NV
    } else {
        Cond::from_bits(field(word, 31, 28))
    };

    match (visitor.cond_state, cond) {
        (ConditionalState::None, Cond::AL) | (ConditionalState::None, Cond::NV) => {}
        (ConditionalState::None, cond) => {
            if !visitor.ir.block.is_empty() {
                // Conditional runs start their own block.
                let next = visitor.location.to_ir();
                visitor.ir.block.set_terminal(Terminal::LinkBlock { next });
                return InstructionOutcome::EndBeforeInstruction;
            }
            visitor.cond_state = ConditionalState::Translating(cond);
            visitor.ir.block.set_cond(cond);
            visitor
                .ir
                .block
                .set_cond_failed_location(visitor.location.advance_pc(4).to_ir());
            visitor.ir.block.set_cond_failed_cycle_count(1);
        }
        (ConditionalState::Translating(block_cond), cond) if block_cond == cond => {}
        (ConditionalState::Translating(_), _) => {
            let next = visitor.location.to_ir();
            visitor.ir.block.set_terminal(Terminal::LinkBlock { next });
            return InstructionOutcome::EndBeforeInstruction;
        }
    }

    // The 1111 space carries its own unconditional encodings; keeping it in
    // a separate table stops it falling into the cond-agnostic patterns.
    let active_table = if cond == Cond::NV {
        unconditional_table()
    } else {
        table()
    };
    let should_continue = match decode(active_table, word) {
        Some(matcher) => (matcher.handler)(visitor, word),
        None => visitor.unallocated_encoding(),
    };
    if should_continue {
        InstructionOutcome::Continue
    } else {
        InstructionOutcome::End
    }
}


pub struct TranslatorVisitor {
    pub ir: IrEmitter,
    pub location: LocationDescriptor,
    pub options: TranslationOptions,
    cond_state: ConditionalState,
}

impl TranslatorVisitor {
    pub fn unpredictable_instruction(&mut self) -> bool {
        self.raise_exception(Exception::UnpredictableInstruction);
        false
    }

    pub fn unallocated_encoding(&mut self) -> bool {
        self.raise_exception(Exception::UnallocatedEncoding);
        false
    }

    pub fn raise_exception(&mut self, exception: Exception) -> bool {
        let next = self.ir.imm32(self.location.pc().wrapping_add(4));
        self.ir.a32_set_register(Reg::PC, next);
        self.ir
            .a32_exception_raised(self.location.pc(), exception);
        self.ir.block.set_terminal(Terminal::CheckHalt {
            else_: Box::new(Terminal::ReturnToDispatch),
        });
        false
    }

    /// The value a register read observes; the PC reads as the instruction
    /// address plus 8 in ARM mode.
    pub fn get_register(&mut self, reg: Reg) -> Value {
        if reg == Reg::PC {
            self.ir.imm32(self.location.pc().wrapping_add(8))
        } else {
            self.ir.a32_get_register(reg)
        }
    }

    /// Writes a non-PC register. PC writes go through the branch helpers.
    pub fn set_register(&mut self, reg: Reg, value: Value) {
        debug_assert!(reg != Reg::PC, "PC writes use the branch helpers");
        self.ir.a32_set_register(reg, value);
    }

    /// A data-processing write to the PC: interworking branch on ARMv7+.
    pub fn alu_write_pc(&mut self, value: Value) {
        self.ir.a32_bx_write_pc(value);
    }

    /// The next location after this instruction, with IT state advanced.
    pub fn next_location(&self) -> LocationDescriptor {
        self.location.advance_pc(4).advance_it()
    }

    pub fn branch_terminal(&mut self) {
        self.ir
            .block
            .set_terminal(Terminal::FastDispatchHint);
    }

    /// Expands an ARM modified immediate; returns the value and whether the
    /// rotation produced a fresh carry.
    pub fn expand_imm_c(&mut self, imm12: u32) -> (u32, Option<bool>) {
        let rotate = (imm12 >> 8) * 2;
        let value = (imm12 & 0xff).rotate_right(rotate);
        if rotate == 0 {
            (value, None)
        } else {
            (value, Some(value & 0x8000_0000 != 0))
        }
    }

    /// The shifter carry-in / carry-out chain as an IR value.
    pub fn carry_in(&mut self) -> Value {
        self.ir.a32_get_c_flag()
    }

    /// Applies an immediate-encoded shift, returning `(result, carry_out)`.
    pub fn emit_imm_shift(
        &mut self,
        value: Value,
        shift_type: u32,
        imm5: u32,
        carry_in: Value,
    ) -> (Value, Value) {
        match (shift_type, imm5) {
            (0b00, 0) => (value, carry_in),
            (0b00, amount) => {
                let amount = self.ir.imm8(amount as u8);
                let result = self.ir.lsl_carry(value, amount, carry_in);
                (result, self.ir.carry_from(result))
            }
            (0b01, amount) => {
                let amount = self.ir.imm8(if amount == 0 { 32 } else { amount as u8 });
                let result = self.ir.lsr_carry(value, amount, carry_in);
                (result, self.ir.carry_from(result))
            }
            (0b10, amount) => {
                let amount = self.ir.imm8(if amount == 0 { 32 } else { amount as u8 });
                let result = self.ir.asr_carry(value, amount, carry_in);
                (result, self.ir.carry_from(result))
            }
            (0b11, 0) => {
                let result = self.ir.rrx(value, carry_in);
                (result, self.ir.carry_from(result))
            }
            (0b11, amount) => {
                let amount = self.ir.imm8(amount as u8);
                let result = self.ir.ror_carry(value, amount, carry_in);
                (result, self.ir.carry_from(result))
            }
            _ => unreachable!(),
        }
    }

    /// Applies a register-encoded shift (amount from the low byte of Rs).
    pub fn emit_reg_shift(
        &mut self,
        value: Value,
        shift_type: u32,
        amount: Value,
        carry_in: Value,
    ) -> (Value, Value) {
        let result = match shift_type {
            0b00 => self.ir.lsl_carry(value, amount, carry_in),
            0b01 => self.ir.lsr_carry(value, amount, carry_in),
            0b10 => self.ir.asr_carry(value, amount, carry_in),
            _ => self.ir.ror_carry(value, amount, carry_in),
        };
        (result, self.ir.carry_from(result))
    }
}

fn table() -> &'static [Matcher<TranslatorVisitor>] {
    static TABLE: OnceLock<Vec<Matcher<TranslatorVisitor>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Vec::new();
        super::misc::fill_table(&mut table);
        super::branch::fill_table(&mut table);
        super::load_store::fill_table(&mut table);
        // Data processing last: its patterns are the loosest.
        super::data_processing::fill_table(&mut table);
        table
    })
}

fn unconditional_table() -> &'static [Matcher<TranslatorVisitor>] {
    static TABLE: OnceLock<Vec<Matcher<TranslatorVisitor>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Vec::new();
        super::misc::fill_unconditional_table(&mut table);
        table
    })
}
