//! A64 translation driver and visitor.

use super::{LocationDescriptor, Reg, Vec as VecReg};
use crate::frontend::bits::*;
use crate::frontend::decoder::{decode, Matcher};
use crate::ir::{AccType, Block, Exception, IrEmitter, Terminal, Value};
use std::sync::OnceLock;

/// Hard cap on instructions per block; long straight-line runs split here.
const MAX_BLOCK_LEN: usize = 32;

/// Knobs the embedder exposes that change translation.
#[derive(Copy, Clone, Debug)]
pub struct TranslationOptions {
    /// Give unpredictable encodings a defined behaviour instead of raising
    /// an exception, where one exists.
    pub define_unpredictable_behaviour: bool,
    /// Surface WFE/WFI/SEV/SEVL/YIELD hints to the `ExceptionRaised`
    /// callback instead of treating them as NOPs.
    pub hook_hint_instructions: bool,
    /// Translate CNTPCT_EL0 reads via the wall-clock callback.
    pub wall_clock_cntpct: bool,
}

impl Default for TranslationOptions {
    fn default() -> Self {
        Self {
            define_unpredictable_behaviour: false,
            hook_hint_instructions: false,
            wall_clock_cntpct: false,
        }
    }
}

/// Translates the basic block starting at `descriptor`.
///
/// `read_code` fetches one instruction word; `None` means the location is
/// not executable and translation raises a decode error for it. On return
/// the block always has a terminal, and its end location points one guest
/// instruction past the last one translated.
pub fn translate(
    descriptor: LocationDescriptor,
    read_code: &mut dyn FnMut(u64) -> Option<u32>,
    options: TranslationOptions,
) -> Block {
    let block = Block::new(descriptor.to_ir());
    let mut visitor = TranslatorVisitor {
        ir: IrEmitter::new(block),
        location: descriptor,
        options,
    };

    let single_step = descriptor.single_stepping();
    loop {
        let pc = visitor.location.pc();
        let should_continue = match read_code(pc) {
            Some(word) => translate_instruction(&mut visitor, word),
            None => {
                visitor.raise_exception(Exception::DecodeError);
                false
            }
        };
        visitor.location = visitor.location.advance_pc(4);
        visitor.ir.block.add_cycles(1);

        if !should_continue {
            break;
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
    log::trace!("translated A64 block:\n{block}");
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
    };
    let should_continue = translate_instruction(&mut visitor, word);
    visitor.location = visitor.location.advance_pc(4);
    visitor.ir.block.add_cycles(1);
    let mut block = visitor.ir.block;
    block.set_end_location(visitor.location.to_ir());
    (block, should_continue)
}

fn translate_instruction(visitor: &mut TranslatorVisitor, word: u32) -> bool {
    match decode(table(), word) {
        Some(matcher) => (matcher.handler)(visitor, word),
        None => visitor.unallocated_encoding(),
    }
}


/// The translation visitor: one method per instruction class, dispatched
/// through the decode table.
pub struct TranslatorVisitor {
    pub ir: IrEmitter,
    pub location: LocationDescriptor,
    pub options: TranslationOptions,
}

pub struct BitMasks {
    pub wmask: u64,
    pub tmask: u64,
}

/// The standard A64 logical-immediate expansion. Returns `None` for the
/// reserved encodings.
pub fn decode_bit_masks(imm_n: bool, imms: u32, immr: u32, immediate: bool) -> Option<BitMasks> {
    let n = if imm_n { 1 << 6 } else { 0 };
    let len = highest_set_bit(u64::from(n | (imms ^ 0b111111)))?;
    if len < 1 {
        return None;
    }

    let levels = ones64(len) as u32;
    if immediate && (imms & levels) == levels {
        return None;
    }

    let s = imms & levels;
    let r = immr & levels;
    let d = s.wrapping_sub(r) & levels;

    let esize = 1u32 << len;
    let welem = ones64(s + 1);
    let telem = ones64(d + 1);
    let wmask = rotate_element(replicate64(welem, esize), esize, r);
    let tmask = replicate64(telem, esize);
    Some(BitMasks { wmask, tmask })
}

/// Rotates each `esize`-bit element pattern right by `amount`. Since the
/// pattern is the same element replicated, rotating the whole 64-bit word
/// by `amount` within element boundaries equals rotating one element and
/// re-replicating it.
fn rotate_element(replicated: u64, esize: u32, amount: u32) -> u64 {
    if amount == 0 {
        return replicated;
    }
    let element = replicated & ones64(esize);
    let rotated = (element >> amount | element << (esize - amount)) & ones64(esize);
    replicate64(rotated, esize)
}

impl TranslatorVisitor {
    // Failure modes.

    pub fn unpredictable_instruction(&mut self) -> bool {
        self.raise_exception(Exception::UnpredictableInstruction);
        false
    }

    pub fn unallocated_encoding(&mut self) -> bool {
        self.raise_exception(Exception::UnallocatedEncoding);
        false
    }

    pub fn reserved_value(&mut self) -> bool {
        self.raise_exception(Exception::ReservedValue);
        false
    }

    pub fn raise_exception(&mut self, exception: Exception) {
        let next_pc = self.location.pc().wrapping_add(4);
        let imm = self.ir.imm64(next_pc);
        self.ir.a64_set_pc(imm);
        self.ir.a64_exception_raised(self.location.pc(), exception);
        self.ir.block.set_terminal(Terminal::CheckHalt {
            else_: Box::new(Terminal::ReturnToDispatch),
        });
    }

    // Register access helpers, named after their pseudocode counterparts.

    pub fn pc(&self) -> u64 {
        self.location.pc()
    }

    /// An immediate of the operating datasize.
    pub fn i(&mut self, bitsize: u32, value: u64) -> Value {
        self.ir.imm_of(bitsize, value)
    }

    /// Reads Rn as the zero register convention: encoding 31 is zero.
    pub fn x(&mut self, bitsize: u32, reg: Reg) -> Value {
        if reg.is_31() {
            return self.i(bitsize, 0);
        }
        match bitsize {
            32 => self.ir.a64_get_w(reg),
            64 => self.ir.a64_get_x(reg),
            _ => panic!("X: invalid bitsize {bitsize}"),
        }
    }

    /// Writes Rd under the zero register convention: encoding 31 discards.
    pub fn set_x(&mut self, bitsize: u32, reg: Reg, value: Value) {
        if reg.is_31() {
            return;
        }
        match bitsize {
            32 => self.ir.a64_set_w(reg, value),
            64 => self.ir.a64_set_x(reg, value),
            _ => panic!("X: invalid bitsize {bitsize}"),
        }
    }

    /// Reads the stack pointer at the given width.
    pub fn sp(&mut self, bitsize: u32) -> Value {
        let sp = self.ir.a64_get_sp();
        match bitsize {
            32 => self.ir.least_significant_word(sp),
            64 => sp,
            _ => panic!("SP: invalid bitsize {bitsize}"),
        }
    }

    pub fn set_sp(&mut self, bitsize: u32, value: Value) {
        match bitsize {
            32 => {
                let wide = self.ir.zero_extend_word_to_long(value);
                self.ir.a64_set_sp(wide);
            }
            64 => self.ir.a64_set_sp(value),
            _ => panic!("SP: invalid bitsize {bitsize}"),
        }
    }

    /// Reads Rn where encoding 31 means SP (address-generating forms).
    pub fn xn_or_sp(&mut self, bitsize: u32, reg: Reg) -> Value {
        if reg.is_31() {
            self.sp(bitsize)
        } else {
            self.x(bitsize, reg)
        }
    }

    pub fn set_xd_or_sp(&mut self, bitsize: u32, reg: Reg, value: Value) {
        if reg.is_31() {
            self.set_sp(bitsize, value);
        } else {
            self.set_x(bitsize, reg, value);
        }
    }

    /// Reads a vector register at scalar width `bitsize`.
    pub fn v_scalar(&mut self, bitsize: u32, vec: VecReg) -> Value {
        let q = self.ir.a64_get_q(vec);
        match bitsize {
            8 | 16 | 32 | 64 => self.ir.vector_get_element(bitsize, q, 0),
            128 => q,
            _ => panic!("V: invalid bitsize {bitsize}"),
        }
    }

    /// Writes a vector register from a scalar, zeroing the upper lanes.
    pub fn set_v_scalar(&mut self, bitsize: u32, vec: VecReg, value: Value) {
        match bitsize {
            8 | 16 | 32 | 64 => {
                let quad = self.ir.zero_extend_to_quad(value);
                self.ir.a64_set_q(vec, quad);
            }
            128 => self.ir.a64_set_q(vec, value),
            _ => panic!("V: invalid bitsize {bitsize}"),
        }
    }

    pub fn v(&mut self, vec: VecReg) -> Value {
        self.ir.a64_get_q(vec)
    }

    pub fn set_v(&mut self, vec: VecReg, value: Value) {
        self.ir.a64_set_q(vec, value);
    }

    // Memory helpers.

    pub fn mem_read(&mut self, address: Value, bytesize: u32, acc: AccType) -> Value {
        self.ir.a64_read_memory(bytesize, address, acc)
    }

    pub fn mem_write(&mut self, address: Value, bytesize: u32, acc: AccType, value: Value) {
        self.ir.a64_write_memory(bytesize, address, value, acc);
    }

    pub fn sign_extend(&mut self, value: Value, to_size: u32) -> Value {
        match to_size {
            32 => self.ir.sign_extend_to_word(value),
            64 => self.ir.sign_extend_to_long(value),
            _ => panic!("invalid extension target {to_size}"),
        }
    }

    pub fn zero_extend(&mut self, value: Value, to_size: u32) -> Value {
        match to_size {
            32 => self.ir.zero_extend_to_word(value),
            64 => self.ir.zero_extend_to_long(value),
            _ => panic!("invalid extension target {to_size}"),
        }
    }

    /// The shifted-register operand form.
    pub fn shift_reg(&mut self, bitsize: u32, reg: Reg, shift: u32, amount: u8) -> Value {
        let value = self.x(bitsize, reg);
        let amount = self.ir.imm8(amount);
        match shift {
            0b00 => self.ir.lsl(value, amount),
            0b01 => self.ir.lsr(value, amount),
            0b10 => self.ir.asr(value, amount),
            0b11 => self.ir.ror(value, amount),
            _ => unreachable!(),
        }
    }

    /// The extended-register operand form.
    pub fn extend_reg(&mut self, bitsize: u32, reg: Reg, option: u32, shift: u8) -> Value {
        debug_assert!(shift <= 4);
        let value = self.x(bitsize, reg);
        let signed = option & 0b100 != 0;
        let len = match option & 0b011 {
            0b00 => 8,
            0b01 => 16,
            0b10 => 32,
            _ => 64,
        };

        let narrowed = match (len, bitsize) {
            (8, _) => {
                let v = if bitsize == 64 {
                    self.ir.least_significant_word(value)
                } else {
                    value
                };
                Some(self.ir.least_significant_byte(v))
            }
            (16, _) => {
                let v = if bitsize == 64 {
                    self.ir.least_significant_word(value)
                } else {
                    value
                };
                Some(self.ir.least_significant_half(v))
            }
            (32, 64) => Some(self.ir.least_significant_word(value)),
            _ => None,
        };

        let extended = match narrowed {
            Some(narrow) if signed => self.sign_extend(narrow, bitsize),
            Some(narrow) => self.zero_extend(narrow, bitsize),
            None => value,
        };
        let amount = self.ir.imm8(shift);
        self.ir.lsl(extended, amount)
    }
}

fn table() -> &'static [Matcher<TranslatorVisitor>] {
    static TABLE: OnceLock<Vec<Matcher<TranslatorVisitor>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Vec::new();
        super::branch::fill_table(&mut table);
        super::data_processing::fill_table(&mut table);
        super::load_store::fill_table(&mut table);
        super::system::fill_table(&mut table);
        super::fp_simd::fill_table(&mut table);
        table
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_masks_match_reference() {
        // N=0 immr=000000 imms=000000: one bit per 32-bit element.
        let masks = decode_bit_masks(false, 0, 0, true).unwrap();
        assert_eq!(masks.wmask, 0x0000_0001_0000_0001);
        // 64-bit element, 32 ones: N=1, imms=011111, immr=0.
        let masks = decode_bit_masks(true, 0b011111, 0, true).unwrap();
        assert_eq!(masks.wmask, 0xffff_ffff);
        // Rotation: N=1, imms=000000 (one bit), immr=1 rotates right by one.
        let masks = decode_bit_masks(true, 0, 1, true).unwrap();
        assert_eq!(masks.wmask, 1u64.rotate_right(1));
    }

    #[test]
    fn bit_masks_reject_reserved() {
        // All-ones element with immediate=true is reserved.
        assert!(decode_bit_masks(false, 0b111111, 0, true).is_none());
        // len < 1 (esize 1) is never valid.
        assert!(decode_bit_masks(false, 0b111110, 0, true).is_none());
    }
}
