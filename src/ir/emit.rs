//! The typed IR builder.
//!
//! One method per opcode. Each method checks its operands against the
//! opcode's declared schema (a debug assertion: schema violations are
//! translator bugs, not runtime conditions), appends an instruction to the
//! block, and hands back a [`Value`] referencing it. Width-polymorphic
//! conveniences (`add`, `lsl`, ...) pick the 32- or 64-bit opcode from the
//! operand's type the way the translators want to use them.

use super::{AccType, Block, Cond, Exception, Opcode, Type, Value};
use crate::frontend::a32::{ExtReg as A32ExtReg, Reg as A32Reg};
use crate::frontend::a64::{Reg as A64Reg, Vec as A64Vec};
use crate::loc::LocationDescriptor;

/// Builder appending microinstructions to a [`Block`].
pub struct IrEmitter {
    pub block: Block,
}

impl IrEmitter {
    pub fn new(block: Block) -> Self {
        Self { block }
    }

    fn inst(&mut self, op: Opcode, args: &[Value]) -> Value {
        #[cfg(debug_assertions)]
        for (arg, &ty) in args.iter().zip(op.arg_types()) {
            debug_assert!(
                self.block.type_of(*arg).compatible_with(ty),
                "{}: operand {} has type {}, wanted {}",
                op.name(),
                arg,
                self.block.type_of(*arg),
                ty
            );
        }
        let inst = self.block.append(op, args);
        Value::Inst(inst)
    }

    fn inst_void(&mut self, op: Opcode, args: &[Value]) {
        debug_assert_eq!(op.result_type(), Type::Void);
        let _ = self.inst(op, args);
    }

    fn width_of(&self, value: Value) -> Type {
        self.block.type_of(value)
    }

    // Immediates.

    pub fn imm1(&self, value: bool) -> Value {
        Value::U1(value)
    }

    pub fn imm8(&self, value: u8) -> Value {
        Value::U8(value)
    }

    pub fn imm16(&self, value: u16) -> Value {
        Value::U16(value)
    }

    pub fn imm32(&self, value: u32) -> Value {
        Value::U32(value)
    }

    pub fn imm64(&self, value: u64) -> Value {
        Value::U64(value)
    }

    /// An immediate of the named integer width.
    pub fn imm_of(&self, bitsize: u32, value: u64) -> Value {
        match bitsize {
            8 => self.imm8(value as u8),
            16 => self.imm16(value as u16),
            32 => self.imm32(value as u32),
            64 => self.imm64(value),
            _ => panic!("invalid immediate width {bitsize}"),
        }
    }

    // Structural.

    pub fn void(&mut self) {
        self.inst_void(Opcode::Void, &[]);
    }

    pub fn identity(&mut self, value: Value) -> Value {
        self.inst(Opcode::Identity, &[value])
    }

    pub fn breakpoint(&mut self) {
        self.inst_void(Opcode::Breakpoint, &[]);
    }

    pub fn push_rsb(&mut self, return_location: LocationDescriptor) {
        let loc = self.imm64(return_location.value());
        self.inst_void(Opcode::PushRSB, &[loc]);
    }

    pub fn set_check_bit(&mut self, bit: Value) {
        self.inst_void(Opcode::SetCheckBit, &[bit]);
    }

    // Flag extraction pseudo-operations.

    pub fn carry_from(&mut self, op: Value) -> Value {
        debug_assert!(self
            .block
            .opcode(op.unwrap_inst())
            .supports_carry_out());
        self.inst(Opcode::GetCarryFromOp, &[op])
    }

    pub fn overflow_from(&mut self, op: Value) -> Value {
        debug_assert!(self.block.opcode(op.unwrap_inst()).is_add_sub());
        self.inst(Opcode::GetOverflowFromOp, &[op])
    }

    pub fn nzcv_from(&mut self, op: Value) -> Value {
        if op.is_immediate() {
            return self.nzcv_of_immediate(op);
        }
        debug_assert!(self
            .block
            .opcode(op.unwrap_inst())
            .supports_nzcv_out());
        self.inst(Opcode::GetNZCVFromOp, &[op])
    }

    pub fn nz_from(&mut self, op: Value) -> Value {
        if op.is_immediate() {
            return self.nzcv_of_immediate(op);
        }
        debug_assert!(self
            .block
            .opcode(op.unwrap_inst())
            .supports_nzcv_out());
        self.inst(Opcode::GetNZFromOp, &[op])
    }

    /// N and Z of a known value, as a packed-flag conversion.
    fn nzcv_of_immediate(&mut self, op: Value) -> Value {
        let bits = op.immediate_as_u64();
        let width = op.ty().bit_width().unwrap_or(64);
        let n = bits >> (width - 1) & 1 != 0;
        let z = bits == 0;
        let packed = self.imm32((n as u32) << 31 | (z as u32) << 30);
        self.nzcv_from_packed_flags(packed)
    }

    pub fn nzcv_from_packed_flags(&mut self, raw: Value) -> Value {
        self.inst(Opcode::NZCVFromPackedFlags, &[raw])
    }

    // Width changes.

    pub fn pack_2x32_to_1x64(&mut self, lo: Value, hi: Value) -> Value {
        self.inst(Opcode::Pack2x32To1x64, &[lo, hi])
    }

    pub fn least_significant_word(&mut self, value: Value) -> Value {
        self.inst(Opcode::LeastSignificantWord, &[value])
    }

    pub fn least_significant_half(&mut self, value: Value) -> Value {
        self.inst(Opcode::LeastSignificantHalf, &[value])
    }

    pub fn least_significant_byte(&mut self, value: Value) -> Value {
        self.inst(Opcode::LeastSignificantByte, &[value])
    }

    pub fn most_significant_word(&mut self, value: Value) -> Value {
        self.inst(Opcode::MostSignificantWord, &[value])
    }

    pub fn most_significant_bit(&mut self, value: Value) -> Value {
        self.inst(Opcode::MostSignificantBit, &[value])
    }

    pub fn sign_extend_byte_to_word(&mut self, value: Value) -> Value {
        self.inst(Opcode::SignExtendByteToWord, &[value])
    }

    pub fn sign_extend_half_to_word(&mut self, value: Value) -> Value {
        self.inst(Opcode::SignExtendHalfToWord, &[value])
    }

    pub fn sign_extend_byte_to_long(&mut self, value: Value) -> Value {
        self.inst(Opcode::SignExtendByteToLong, &[value])
    }

    pub fn sign_extend_half_to_long(&mut self, value: Value) -> Value {
        self.inst(Opcode::SignExtendHalfToLong, &[value])
    }

    pub fn sign_extend_word_to_long(&mut self, value: Value) -> Value {
        self.inst(Opcode::SignExtendWordToLong, &[value])
    }

    pub fn zero_extend_byte_to_word(&mut self, value: Value) -> Value {
        self.inst(Opcode::ZeroExtendByteToWord, &[value])
    }

    pub fn zero_extend_half_to_word(&mut self, value: Value) -> Value {
        self.inst(Opcode::ZeroExtendHalfToWord, &[value])
    }

    pub fn zero_extend_byte_to_long(&mut self, value: Value) -> Value {
        self.inst(Opcode::ZeroExtendByteToLong, &[value])
    }

    pub fn zero_extend_half_to_long(&mut self, value: Value) -> Value {
        self.inst(Opcode::ZeroExtendHalfToLong, &[value])
    }

    pub fn zero_extend_word_to_long(&mut self, value: Value) -> Value {
        self.inst(Opcode::ZeroExtendWordToLong, &[value])
    }

    pub fn zero_extend_long_to_quad(&mut self, value: Value) -> Value {
        self.inst(Opcode::ZeroExtendLongToQuad, &[value])
    }

    /// Zero-extends an 8/16/32/64-bit value to 64 bits.
    pub fn zero_extend_to_long(&mut self, value: Value) -> Value {
        match self.width_of(value) {
            Type::U8 => self.zero_extend_byte_to_long(value),
            Type::U16 => self.zero_extend_half_to_long(value),
            Type::U32 => self.zero_extend_word_to_long(value),
            Type::U64 => value,
            ty => panic!("cannot zero-extend {ty} to long"),
        }
    }

    /// Zero-extends an 8/16/32-bit value to 32 bits.
    pub fn zero_extend_to_word(&mut self, value: Value) -> Value {
        match self.width_of(value) {
            Type::U8 => self.zero_extend_byte_to_word(value),
            Type::U16 => self.zero_extend_half_to_word(value),
            Type::U32 => value,
            ty => panic!("cannot zero-extend {ty} to word"),
        }
    }

    /// Sign-extends an 8/16/32-bit value to 64 bits.
    pub fn sign_extend_to_long(&mut self, value: Value) -> Value {
        match self.width_of(value) {
            Type::U8 => self.sign_extend_byte_to_long(value),
            Type::U16 => self.sign_extend_half_to_long(value),
            Type::U32 => self.sign_extend_word_to_long(value),
            Type::U64 => value,
            ty => panic!("cannot sign-extend {ty} to long"),
        }
    }

    /// Sign-extends an 8/16-bit value to 32 bits.
    pub fn sign_extend_to_word(&mut self, value: Value) -> Value {
        match self.width_of(value) {
            Type::U8 => self.sign_extend_byte_to_word(value),
            Type::U16 => self.sign_extend_half_to_word(value),
            Type::U32 => value,
            ty => panic!("cannot sign-extend {ty} to word"),
        }
    }

    /// Zero-extends any integer value to 128 bits.
    pub fn zero_extend_to_quad(&mut self, value: Value) -> Value {
        let long = self.zero_extend_to_long(value);
        self.zero_extend_long_to_quad(long)
    }

    // Tests and selection.

    pub fn is_zero(&mut self, value: Value) -> Value {
        match self.width_of(value) {
            Type::U32 => self.inst(Opcode::IsZero32, &[value]),
            Type::U64 => self.inst(Opcode::IsZero64, &[value]),
            ty => panic!("is_zero over {ty}"),
        }
    }

    pub fn test_bit(&mut self, value: Value, bit: Value) -> Value {
        self.inst(Opcode::TestBit, &[value, bit])
    }

    pub fn conditional_select(&mut self, cond: Cond, then_: Value, else_: Value) -> Value {
        let cond = Value::Cond(cond);
        match self.width_of(then_) {
            Type::U32 => self.inst(Opcode::ConditionalSelect32, &[cond, then_, else_]),
            Type::U64 => self.inst(Opcode::ConditionalSelect64, &[cond, then_, else_]),
            Type::NZCV => self.inst(Opcode::ConditionalSelectNZCV, &[cond, then_, else_]),
            ty => panic!("conditional select over {ty}"),
        }
    }

    // Shifts.

    /// Logical shift left with the A32 carry chain (32-bit only).
    pub fn lsl_carry(&mut self, value: Value, amount: Value, carry_in: Value) -> Value {
        self.inst(Opcode::LogicalShiftLeft32, &[value, amount, carry_in])
    }

    pub fn lsr_carry(&mut self, value: Value, amount: Value, carry_in: Value) -> Value {
        self.inst(Opcode::LogicalShiftRight32, &[value, amount, carry_in])
    }

    pub fn asr_carry(&mut self, value: Value, amount: Value, carry_in: Value) -> Value {
        self.inst(Opcode::ArithmeticShiftRight32, &[value, amount, carry_in])
    }

    pub fn ror_carry(&mut self, value: Value, amount: Value, carry_in: Value) -> Value {
        self.inst(Opcode::RotateRight32, &[value, amount, carry_in])
    }

    pub fn rrx(&mut self, value: Value, carry_in: Value) -> Value {
        self.inst(Opcode::RotateRightExtended, &[value, carry_in])
    }

    pub fn lsl(&mut self, value: Value, amount: Value) -> Value {
        match self.width_of(value) {
            Type::U32 => {
                let carry = self.imm1(false);
                self.lsl_carry(value, amount, carry)
            }
            Type::U64 => self.inst(Opcode::LogicalShiftLeft64, &[value, amount]),
            ty => panic!("lsl over {ty}"),
        }
    }

    pub fn lsr(&mut self, value: Value, amount: Value) -> Value {
        match self.width_of(value) {
            Type::U32 => {
                let carry = self.imm1(false);
                self.lsr_carry(value, amount, carry)
            }
            Type::U64 => self.inst(Opcode::LogicalShiftRight64, &[value, amount]),
            ty => panic!("lsr over {ty}"),
        }
    }

    pub fn asr(&mut self, value: Value, amount: Value) -> Value {
        match self.width_of(value) {
            Type::U32 => {
                let carry = self.imm1(false);
                self.asr_carry(value, amount, carry)
            }
            Type::U64 => self.inst(Opcode::ArithmeticShiftRight64, &[value, amount]),
            ty => panic!("asr over {ty}"),
        }
    }

    pub fn ror(&mut self, value: Value, amount: Value) -> Value {
        match self.width_of(value) {
            Type::U32 => {
                let carry = self.imm1(false);
                self.ror_carry(value, amount, carry)
            }
            Type::U64 => self.inst(Opcode::RotateRight64, &[value, amount]),
            ty => panic!("ror over {ty}"),
        }
    }

    // Arithmetic.

    pub fn add_with_carry(&mut self, a: Value, b: Value, carry: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::Add32, &[a, b, carry]),
            Type::U64 => self.inst(Opcode::Add64, &[a, b, carry]),
            ty => panic!("add over {ty}"),
        }
    }

    pub fn add(&mut self, a: Value, b: Value) -> Value {
        let carry = self.imm1(false);
        self.add_with_carry(a, b, carry)
    }

    /// `a - b - !carry`, ARM style: carry-in 1 means no borrow.
    pub fn sub_with_carry(&mut self, a: Value, b: Value, carry: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::Sub32, &[a, b, carry]),
            Type::U64 => self.inst(Opcode::Sub64, &[a, b, carry]),
            ty => panic!("sub over {ty}"),
        }
    }

    pub fn sub(&mut self, a: Value, b: Value) -> Value {
        let carry = self.imm1(true);
        self.sub_with_carry(a, b, carry)
    }

    pub fn mul(&mut self, a: Value, b: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::Mul32, &[a, b]),
            Type::U64 => self.inst(Opcode::Mul64, &[a, b]),
            ty => panic!("mul over {ty}"),
        }
    }

    pub fn signed_multiply_high(&mut self, a: Value, b: Value) -> Value {
        self.inst(Opcode::SignedMultiplyHigh64, &[a, b])
    }

    pub fn unsigned_multiply_high(&mut self, a: Value, b: Value) -> Value {
        self.inst(Opcode::UnsignedMultiplyHigh64, &[a, b])
    }

    pub fn unsigned_div(&mut self, a: Value, b: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::UnsignedDiv32, &[a, b]),
            Type::U64 => self.inst(Opcode::UnsignedDiv64, &[a, b]),
            ty => panic!("udiv over {ty}"),
        }
    }

    pub fn signed_div(&mut self, a: Value, b: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::SignedDiv32, &[a, b]),
            Type::U64 => self.inst(Opcode::SignedDiv64, &[a, b]),
            ty => panic!("sdiv over {ty}"),
        }
    }

    // Bitwise.

    pub fn and_(&mut self, a: Value, b: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::And32, &[a, b]),
            Type::U64 => self.inst(Opcode::And64, &[a, b]),
            ty => panic!("and over {ty}"),
        }
    }

    pub fn and_not(&mut self, a: Value, b: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::AndNot32, &[a, b]),
            Type::U64 => self.inst(Opcode::AndNot64, &[a, b]),
            ty => panic!("bic over {ty}"),
        }
    }

    pub fn eor(&mut self, a: Value, b: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::Eor32, &[a, b]),
            Type::U64 => self.inst(Opcode::Eor64, &[a, b]),
            ty => panic!("eor over {ty}"),
        }
    }

    pub fn or_(&mut self, a: Value, b: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::Or32, &[a, b]),
            Type::U64 => self.inst(Opcode::Or64, &[a, b]),
            ty => panic!("or over {ty}"),
        }
    }

    pub fn not_(&mut self, a: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::Not32, &[a]),
            Type::U64 => self.inst(Opcode::Not64, &[a]),
            ty => panic!("not over {ty}"),
        }
    }

    // Bit twiddling.

    pub fn byte_reverse_word(&mut self, a: Value) -> Value {
        self.inst(Opcode::ByteReverseWord, &[a])
    }

    pub fn byte_reverse_half(&mut self, a: Value) -> Value {
        self.inst(Opcode::ByteReverseHalf, &[a])
    }

    pub fn byte_reverse_dual(&mut self, a: Value) -> Value {
        self.inst(Opcode::ByteReverseDual, &[a])
    }

    pub fn count_leading_zeros(&mut self, a: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::CountLeadingZeros32, &[a]),
            Type::U64 => self.inst(Opcode::CountLeadingZeros64, &[a]),
            ty => panic!("clz over {ty}"),
        }
    }

    pub fn reverse_bits(&mut self, a: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::ReverseBits32, &[a]),
            Type::U64 => self.inst(Opcode::ReverseBits64, &[a]),
            ty => panic!("rbit over {ty}"),
        }
    }

    pub fn extract_register(&mut self, lo: Value, hi: Value, lsb: Value) -> Value {
        match self.width_of(lo) {
            Type::U32 => self.inst(Opcode::ExtractRegister32, &[lo, hi, lsb]),
            Type::U64 => self.inst(Opcode::ExtractRegister64, &[lo, hi, lsb]),
            ty => panic!("extract over {ty}"),
        }
    }

    // Vector.

    pub fn zero_vector(&mut self) -> Value {
        self.inst(Opcode::ZeroVector, &[])
    }

    pub fn vector_zero_upper(&mut self, a: Value) -> Value {
        self.inst(Opcode::VectorZeroUpper, &[a])
    }

    pub fn vector_get_element(&mut self, esize: u32, a: Value, index: u8) -> Value {
        let index = self.imm8(index);
        match esize {
            8 => self.inst(Opcode::VectorGetElement8, &[a, index]),
            16 => self.inst(Opcode::VectorGetElement16, &[a, index]),
            32 => self.inst(Opcode::VectorGetElement32, &[a, index]),
            64 => self.inst(Opcode::VectorGetElement64, &[a, index]),
            _ => panic!("invalid element size {esize}"),
        }
    }

    pub fn vector_set_element(&mut self, esize: u32, a: Value, index: u8, value: Value) -> Value {
        let index = self.imm8(index);
        match esize {
            8 => self.inst(Opcode::VectorSetElement8, &[a, index, value]),
            16 => self.inst(Opcode::VectorSetElement16, &[a, index, value]),
            32 => self.inst(Opcode::VectorSetElement32, &[a, index, value]),
            64 => self.inst(Opcode::VectorSetElement64, &[a, index, value]),
            _ => panic!("invalid element size {esize}"),
        }
    }

    pub fn vector_add(&mut self, esize: u32, a: Value, b: Value) -> Value {
        match esize {
            8 => self.inst(Opcode::VectorAdd8, &[a, b]),
            16 => self.inst(Opcode::VectorAdd16, &[a, b]),
            32 => self.inst(Opcode::VectorAdd32, &[a, b]),
            64 => self.inst(Opcode::VectorAdd64, &[a, b]),
            _ => panic!("invalid element size {esize}"),
        }
    }

    pub fn vector_sub(&mut self, esize: u32, a: Value, b: Value) -> Value {
        match esize {
            8 => self.inst(Opcode::VectorSub8, &[a, b]),
            16 => self.inst(Opcode::VectorSub16, &[a, b]),
            32 => self.inst(Opcode::VectorSub32, &[a, b]),
            64 => self.inst(Opcode::VectorSub64, &[a, b]),
            _ => panic!("invalid element size {esize}"),
        }
    }

    pub fn vector_and(&mut self, a: Value, b: Value) -> Value {
        self.inst(Opcode::VectorAnd, &[a, b])
    }

    pub fn vector_and_not(&mut self, a: Value, b: Value) -> Value {
        self.inst(Opcode::VectorAndNot, &[a, b])
    }

    pub fn vector_or(&mut self, a: Value, b: Value) -> Value {
        self.inst(Opcode::VectorOr, &[a, b])
    }

    pub fn vector_eor(&mut self, a: Value, b: Value) -> Value {
        self.inst(Opcode::VectorEor, &[a, b])
    }

    pub fn vector_not(&mut self, a: Value) -> Value {
        self.inst(Opcode::VectorNot, &[a])
    }

    // Scalar floating point.

    pub fn fp_add(&mut self, a: Value, b: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::FPAdd32, &[a, b]),
            Type::U64 => self.inst(Opcode::FPAdd64, &[a, b]),
            ty => panic!("fp add over {ty}"),
        }
    }

    pub fn fp_sub(&mut self, a: Value, b: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::FPSub32, &[a, b]),
            Type::U64 => self.inst(Opcode::FPSub64, &[a, b]),
            ty => panic!("fp sub over {ty}"),
        }
    }

    pub fn fp_mul(&mut self, a: Value, b: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::FPMul32, &[a, b]),
            Type::U64 => self.inst(Opcode::FPMul64, &[a, b]),
            ty => panic!("fp mul over {ty}"),
        }
    }

    pub fn fp_div(&mut self, a: Value, b: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::FPDiv32, &[a, b]),
            Type::U64 => self.inst(Opcode::FPDiv64, &[a, b]),
            ty => panic!("fp div over {ty}"),
        }
    }

    pub fn fp_abs(&mut self, a: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::FPAbs32, &[a]),
            Type::U64 => self.inst(Opcode::FPAbs64, &[a]),
            ty => panic!("fp abs over {ty}"),
        }
    }

    pub fn fp_neg(&mut self, a: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::FPNeg32, &[a]),
            Type::U64 => self.inst(Opcode::FPNeg64, &[a]),
            ty => panic!("fp neg over {ty}"),
        }
    }

    pub fn fp_sqrt(&mut self, a: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::FPSqrt32, &[a]),
            Type::U64 => self.inst(Opcode::FPSqrt64, &[a]),
            ty => panic!("fp sqrt over {ty}"),
        }
    }

    pub fn fp_compare(&mut self, a: Value, b: Value) -> Value {
        match self.width_of(a) {
            Type::U32 => self.inst(Opcode::FPCompare32, &[a, b]),
            Type::U64 => self.inst(Opcode::FPCompare64, &[a, b]),
            ty => panic!("fp compare over {ty}"),
        }
    }

    pub fn fp_single_to_double(&mut self, a: Value) -> Value {
        self.inst(Opcode::FPSingleToDouble, &[a])
    }

    pub fn fp_double_to_single(&mut self, a: Value) -> Value {
        self.inst(Opcode::FPDoubleToSingle, &[a])
    }

    /// Float to integer, round toward zero, saturating.
    pub fn fp_to_fixed(&mut self, a: Value, dest_bits: u32, dest_signed: bool) -> Value {
        use Opcode::*;
        let op = match (self.width_of(a), dest_bits, dest_signed) {
            (Type::U32, 32, true) => FPSingleToFixedS32,
            (Type::U32, 32, false) => FPSingleToFixedU32,
            (Type::U32, 64, true) => FPSingleToFixedS64,
            (Type::U32, 64, false) => FPSingleToFixedU64,
            (Type::U64, 32, true) => FPDoubleToFixedS32,
            (Type::U64, 32, false) => FPDoubleToFixedU32,
            (Type::U64, 64, true) => FPDoubleToFixedS64,
            (Type::U64, 64, false) => FPDoubleToFixedU64,
            (ty, bits, _) => panic!("fcvtz {ty} -> {bits}"),
        };
        self.inst(op, &[a])
    }

    /// Integer to float under the rounding mode captured at translation time.
    pub fn fixed_to_fp(
        &mut self,
        a: Value,
        src_signed: bool,
        dest_bits: u32,
        rounding: u8,
    ) -> Value {
        use Opcode::*;
        let op = match (self.width_of(a), src_signed, dest_bits) {
            (Type::U32, true, 32) => FPFixedS32ToSingle,
            (Type::U32, false, 32) => FPFixedU32ToSingle,
            (Type::U32, true, 64) => FPFixedS32ToDouble,
            (Type::U32, false, 64) => FPFixedU32ToDouble,
            (Type::U64, true, 32) => FPFixedS64ToSingle,
            (Type::U64, false, 32) => FPFixedU64ToSingle,
            (Type::U64, true, 64) => FPFixedS64ToDouble,
            (Type::U64, false, 64) => FPFixedU64ToDouble,
            (ty, _, bits) => panic!("cvtf {ty} -> {bits}"),
        };
        let rounding = self.imm8(rounding);
        self.inst(op, &[a, rounding])
    }

    // Barriers.

    pub fn data_synchronization_barrier(&mut self) {
        self.inst_void(Opcode::DataSynchronizationBarrier, &[]);
    }

    pub fn data_memory_barrier(&mut self) {
        self.inst_void(Opcode::DataMemoryBarrier, &[]);
    }

    pub fn instruction_synchronization_barrier(&mut self) {
        self.inst_void(Opcode::InstructionSynchronizationBarrier, &[]);
    }

    // A64 guest state.

    pub fn a64_get_w(&mut self, reg: A64Reg) -> Value {
        self.inst(Opcode::A64GetW, &[Value::A64Reg(reg)])
    }

    pub fn a64_get_x(&mut self, reg: A64Reg) -> Value {
        self.inst(Opcode::A64GetX, &[Value::A64Reg(reg)])
    }

    pub fn a64_get_s(&mut self, vec: A64Vec) -> Value {
        self.inst(Opcode::A64GetS, &[Value::A64Vec(vec)])
    }

    pub fn a64_get_d(&mut self, vec: A64Vec) -> Value {
        self.inst(Opcode::A64GetD, &[Value::A64Vec(vec)])
    }

    pub fn a64_get_q(&mut self, vec: A64Vec) -> Value {
        self.inst(Opcode::A64GetQ, &[Value::A64Vec(vec)])
    }

    pub fn a64_get_sp(&mut self) -> Value {
        self.inst(Opcode::A64GetSP, &[])
    }

    pub fn a64_get_fpcr(&mut self) -> Value {
        self.inst(Opcode::A64GetFPCR, &[])
    }

    pub fn a64_get_fpsr(&mut self) -> Value {
        self.inst(Opcode::A64GetFPSR, &[])
    }

    pub fn a64_get_nzcv_raw(&mut self) -> Value {
        self.inst(Opcode::A64GetNZCVRaw, &[])
    }

    pub fn a64_get_c_flag(&mut self) -> Value {
        self.inst(Opcode::A64GetCFlag, &[])
    }

    pub fn a64_set_w(&mut self, reg: A64Reg, value: Value) {
        self.inst_void(Opcode::A64SetW, &[Value::A64Reg(reg), value]);
    }

    pub fn a64_set_x(&mut self, reg: A64Reg, value: Value) {
        self.inst_void(Opcode::A64SetX, &[Value::A64Reg(reg), value]);
    }

    pub fn a64_set_s(&mut self, vec: A64Vec, value: Value) {
        self.inst_void(Opcode::A64SetS, &[Value::A64Vec(vec), value]);
    }

    pub fn a64_set_d(&mut self, vec: A64Vec, value: Value) {
        self.inst_void(Opcode::A64SetD, &[Value::A64Vec(vec), value]);
    }

    pub fn a64_set_q(&mut self, vec: A64Vec, value: Value) {
        self.inst_void(Opcode::A64SetQ, &[Value::A64Vec(vec), value]);
    }

    pub fn a64_set_sp(&mut self, value: Value) {
        self.inst_void(Opcode::A64SetSP, &[value]);
    }

    pub fn a64_set_fpcr(&mut self, value: Value) {
        self.inst_void(Opcode::A64SetFPCR, &[value]);
    }

    pub fn a64_set_fpsr(&mut self, value: Value) {
        self.inst_void(Opcode::A64SetFPSR, &[value]);
    }

    pub fn a64_set_nzcv(&mut self, nzcv: Value) {
        self.inst_void(Opcode::A64SetNZCV, &[nzcv]);
    }

    pub fn a64_set_nzcv_raw(&mut self, raw: Value) {
        self.inst_void(Opcode::A64SetNZCVRaw, &[raw]);
    }

    pub fn a64_set_pc(&mut self, value: Value) {
        self.inst_void(Opcode::A64SetPC, &[value]);
    }

    pub fn a64_get_cntfrq(&mut self) -> Value {
        self.inst(Opcode::A64GetCNTFRQ, &[])
    }

    pub fn a64_get_cntpct(&mut self) -> Value {
        self.inst(Opcode::A64GetCNTPCT, &[])
    }

    pub fn a64_get_ctr(&mut self) -> Value {
        self.inst(Opcode::A64GetCTR, &[])
    }

    pub fn a64_get_dczid(&mut self) -> Value {
        self.inst(Opcode::A64GetDCZID, &[])
    }

    pub fn a64_get_tpidr(&mut self) -> Value {
        self.inst(Opcode::A64GetTPIDR, &[])
    }

    pub fn a64_get_tpidrro(&mut self) -> Value {
        self.inst(Opcode::A64GetTPIDRRO, &[])
    }

    pub fn a64_set_tpidr(&mut self, value: Value) {
        self.inst_void(Opcode::A64SetTPIDR, &[value]);
    }

    pub fn a64_call_supervisor(&mut self, imm: u32) {
        let imm = self.imm32(imm);
        self.inst_void(Opcode::A64CallSupervisor, &[imm]);
    }

    pub fn a64_exception_raised(&mut self, pc: u64, exception: Exception) {
        let pc = self.imm64(pc);
        let exception = self.imm64(exception as u64);
        self.inst_void(Opcode::A64ExceptionRaised, &[pc, exception]);
    }

    // A64 memory.

    pub fn a64_read_memory(&mut self, bytesize: u32, addr: Value, acc: AccType) -> Value {
        use Opcode::*;
        let op = match bytesize {
            1 => A64ReadMemory8,
            2 => A64ReadMemory16,
            4 => A64ReadMemory32,
            8 => A64ReadMemory64,
            16 => A64ReadMemory128,
            _ => panic!("invalid read size {bytesize}"),
        };
        self.inst(op, &[addr, Value::AccType(acc)])
    }

    pub fn a64_exclusive_read_memory(&mut self, bytesize: u32, addr: Value, acc: AccType) -> Value {
        use Opcode::*;
        let op = match bytesize {
            1 => A64ExclusiveReadMemory8,
            2 => A64ExclusiveReadMemory16,
            4 => A64ExclusiveReadMemory32,
            8 => A64ExclusiveReadMemory64,
            16 => A64ExclusiveReadMemory128,
            _ => panic!("invalid read size {bytesize}"),
        };
        self.inst(op, &[addr, Value::AccType(acc)])
    }

    pub fn a64_write_memory(&mut self, bytesize: u32, addr: Value, value: Value, acc: AccType) {
        use Opcode::*;
        let op = match bytesize {
            1 => A64WriteMemory8,
            2 => A64WriteMemory16,
            4 => A64WriteMemory32,
            8 => A64WriteMemory64,
            16 => A64WriteMemory128,
            _ => panic!("invalid write size {bytesize}"),
        };
        self.inst_void(op, &[addr, value, Value::AccType(acc)]);
    }

    pub fn a64_exclusive_write_memory(
        &mut self,
        bytesize: u32,
        addr: Value,
        value: Value,
        acc: AccType,
    ) -> Value {
        use Opcode::*;
        let op = match bytesize {
            1 => A64ExclusiveWriteMemory8,
            2 => A64ExclusiveWriteMemory16,
            4 => A64ExclusiveWriteMemory32,
            8 => A64ExclusiveWriteMemory64,
            16 => A64ExclusiveWriteMemory128,
            _ => panic!("invalid write size {bytesize}"),
        };
        self.inst(op, &[addr, value, Value::AccType(acc)])
    }

    pub fn a64_clear_exclusive(&mut self) {
        self.inst_void(Opcode::A64ClearExclusive, &[]);
    }

    // A32 guest state.

    pub fn a32_get_register(&mut self, reg: A32Reg) -> Value {
        self.inst(Opcode::A32GetRegister, &[Value::A32Reg(reg)])
    }

    pub fn a32_set_register(&mut self, reg: A32Reg, value: Value) {
        self.inst_void(Opcode::A32SetRegister, &[Value::A32Reg(reg), value]);
    }

    pub fn a32_get_extended_register32(&mut self, reg: A32ExtReg) -> Value {
        self.inst(Opcode::A32GetExtendedRegister32, &[Value::A32ExtReg(reg)])
    }

    pub fn a32_get_extended_register64(&mut self, reg: A32ExtReg) -> Value {
        self.inst(Opcode::A32GetExtendedRegister64, &[Value::A32ExtReg(reg)])
    }

    pub fn a32_get_vector(&mut self, reg: A32ExtReg) -> Value {
        self.inst(Opcode::A32GetVector, &[Value::A32ExtReg(reg)])
    }

    pub fn a32_set_extended_register32(&mut self, reg: A32ExtReg, value: Value) {
        self.inst_void(
            Opcode::A32SetExtendedRegister32,
            &[Value::A32ExtReg(reg), value],
        );
    }

    pub fn a32_set_extended_register64(&mut self, reg: A32ExtReg, value: Value) {
        self.inst_void(
            Opcode::A32SetExtendedRegister64,
            &[Value::A32ExtReg(reg), value],
        );
    }

    pub fn a32_set_vector(&mut self, reg: A32ExtReg, value: Value) {
        self.inst_void(Opcode::A32SetVector, &[Value::A32ExtReg(reg), value]);
    }

    pub fn a32_get_cpsr(&mut self) -> Value {
        self.inst(Opcode::A32GetCpsr, &[])
    }

    pub fn a32_set_cpsr(&mut self, value: Value) {
        self.inst_void(Opcode::A32SetCpsr, &[value]);
    }

    pub fn a32_set_cpsr_nzcv(&mut self, nzcv: Value) {
        self.inst_void(Opcode::A32SetCpsrNZCV, &[nzcv]);
    }

    pub fn a32_set_cpsr_nzcv_raw(&mut self, raw: Value) {
        self.inst_void(Opcode::A32SetCpsrNZCVRaw, &[raw]);
    }

    pub fn a32_set_cpsr_nz(&mut self, nz: Value) {
        self.inst_void(Opcode::A32SetCpsrNZ, &[nz]);
    }

    pub fn a32_set_cpsr_nzc(&mut self, nz: Value, carry: Value) {
        self.inst_void(Opcode::A32SetCpsrNZC, &[nz, carry]);
    }

    pub fn a32_get_c_flag(&mut self) -> Value {
        self.inst(Opcode::A32GetCFlag, &[])
    }

    pub fn a32_bx_write_pc(&mut self, value: Value) {
        self.inst_void(Opcode::A32BXWritePC, &[value]);
    }

    pub fn a32_call_supervisor(&mut self, imm: u32) {
        let imm = self.imm32(imm);
        self.inst_void(Opcode::A32CallSupervisor, &[imm]);
    }

    pub fn a32_exception_raised(&mut self, pc: u32, exception: Exception) {
        let pc = self.imm32(pc);
        let exception = self.imm64(exception as u64);
        self.inst_void(Opcode::A32ExceptionRaised, &[pc, exception]);
    }

    // A32 memory.

    pub fn a32_read_memory(&mut self, bytesize: u32, addr: Value, acc: AccType) -> Value {
        use Opcode::*;
        let op = match bytesize {
            1 => A32ReadMemory8,
            2 => A32ReadMemory16,
            4 => A32ReadMemory32,
            8 => A32ReadMemory64,
            _ => panic!("invalid read size {bytesize}"),
        };
        self.inst(op, &[addr, Value::AccType(acc)])
    }

    pub fn a32_exclusive_read_memory(&mut self, bytesize: u32, addr: Value, acc: AccType) -> Value {
        use Opcode::*;
        let op = match bytesize {
            1 => A32ExclusiveReadMemory8,
            2 => A32ExclusiveReadMemory16,
            4 => A32ExclusiveReadMemory32,
            8 => A32ExclusiveReadMemory64,
            _ => panic!("invalid read size {bytesize}"),
        };
        self.inst(op, &[addr, Value::AccType(acc)])
    }

    pub fn a32_write_memory(&mut self, bytesize: u32, addr: Value, value: Value, acc: AccType) {
        use Opcode::*;
        let op = match bytesize {
            1 => A32WriteMemory8,
            2 => A32WriteMemory16,
            4 => A32WriteMemory32,
            8 => A32WriteMemory64,
            _ => panic!("invalid write size {bytesize}"),
        };
        self.inst_void(op, &[addr, value, Value::AccType(acc)]);
    }

    pub fn a32_exclusive_write_memory(
        &mut self,
        bytesize: u32,
        addr: Value,
        value: Value,
        acc: AccType,
    ) -> Value {
        use Opcode::*;
        let op = match bytesize {
            1 => A32ExclusiveWriteMemory8,
            2 => A32ExclusiveWriteMemory16,
            4 => A32ExclusiveWriteMemory32,
            8 => A32ExclusiveWriteMemory64,
            _ => panic!("invalid write size {bytesize}"),
        };
        self.inst(op, &[addr, value, Value::AccType(acc)])
    }

    pub fn a32_clear_exclusive(&mut self) {
        self.inst_void(Opcode::A32ClearExclusive, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::a64::Reg;

    #[test]
    fn builder_tracks_types() {
        let block = Block::new(LocationDescriptor::new(0x1000));
        let mut ir = IrEmitter::new(block);
        let x0 = ir.a64_get_x(Reg::R0);
        let sum = ir.add(x0, ir.imm64(7));
        assert_eq!(ir.block.type_of(sum), Type::U64);
        ir.a64_set_x(Reg::R0, sum);
        assert_eq!(ir.block.len(), 3);
        assert_eq!(ir.block.use_count(sum.unwrap_inst()), 1);
    }

    #[test]
    fn width_dispatch() {
        let block = Block::new(LocationDescriptor::new(0x1000));
        let mut ir = IrEmitter::new(block);
        let w = ir.a64_get_w(Reg::R1);
        let narrow = ir.add(w, ir.imm32(1));
        assert_eq!(ir.block.opcode(narrow.unwrap_inst()), Opcode::Add32);
        let wide = ir.zero_extend_word_to_long(narrow);
        let wide_sum = ir.add(wide, ir.imm64(1));
        assert_eq!(ir.block.opcode(wide_sum.unwrap_inst()), Opcode::Add64);
    }
}
