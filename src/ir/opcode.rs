//! The closed set of micro-operations.
//!
//! Each opcode declares its result type and the types of its operand slots;
//! the builder in [`ir::emit`](super::emit) asserts the schema when
//! constructing instructions and the verification pass re-checks it after
//! every optimization.
//!
//! The set is grouped into guest-state accessors (per architecture), memory
//! operations, data processing, vector and scalar floating point, and the
//! pseudo-operations that extract flag results from a preceding computation.

use super::Type;

macro_rules! opcodes {
    ($($name:ident : $result:ident ($($arg:ident),*);)*) => {
        /// A micro-operation.
        #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
        pub enum Opcode {
            $($name,)*
        }

        impl Opcode {
            /// The type of the value this opcode produces.
            pub fn result_type(self) -> Type {
                match self {
                    $(Opcode::$name => Type::$result,)*
                }
            }

            /// Declared operand types, in slot order.
            pub fn arg_types(self) -> &'static [Type] {
                match self {
                    $(Opcode::$name => &[$(Type::$arg),*],)*
                }
            }

            /// Textual mnemonic, as used by block dumps.
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$name => stringify!($name),)*
                }
            }
        }
    };
}

opcodes! {
    // Structural.
    Void: Void();
    Identity: Opaque(Opaque);
    Breakpoint: Void();
    PushRSB: Void(U64);
    SetCheckBit: Void(U1);

    // Pseudo-operations: attached to a value-producing parent, realized as a
    // side effect of the parent's lowering.
    GetCarryFromOp: U1(Opaque);
    GetOverflowFromOp: U1(Opaque);
    GetNZCVFromOp: NZCV(Opaque);
    GetNZFromOp: NZCV(Opaque);

    NZCVFromPackedFlags: NZCV(U32);

    // A32 guest state.
    A32GetRegister: U32(A32Reg);
    A32GetExtendedRegister32: U32(A32ExtReg);
    A32GetExtendedRegister64: U64(A32ExtReg);
    A32GetVector: U128(A32ExtReg);
    A32SetRegister: Void(A32Reg, U32);
    A32SetExtendedRegister32: Void(A32ExtReg, U32);
    A32SetExtendedRegister64: Void(A32ExtReg, U64);
    A32SetVector: Void(A32ExtReg, U128);
    A32GetCpsr: U32();
    A32SetCpsr: Void(U32);
    A32SetCpsrNZCV: Void(NZCV);
    A32SetCpsrNZCVRaw: Void(U32);
    A32SetCpsrNZ: Void(NZCV);
    A32SetCpsrNZC: Void(NZCV, U1);
    A32GetCFlag: U1();
    A32BXWritePC: Void(U32);
    A32CallSupervisor: Void(U32);
    A32ExceptionRaised: Void(U32, U64);

    // A32 memory.
    A32ReadMemory8: U8(U32, AccType);
    A32ReadMemory16: U16(U32, AccType);
    A32ReadMemory32: U32(U32, AccType);
    A32ReadMemory64: U64(U32, AccType);
    A32ExclusiveReadMemory8: U8(U32, AccType);
    A32ExclusiveReadMemory16: U16(U32, AccType);
    A32ExclusiveReadMemory32: U32(U32, AccType);
    A32ExclusiveReadMemory64: U64(U32, AccType);
    A32WriteMemory8: Void(U32, U8, AccType);
    A32WriteMemory16: Void(U32, U16, AccType);
    A32WriteMemory32: Void(U32, U32, AccType);
    A32WriteMemory64: Void(U32, U64, AccType);
    A32ExclusiveWriteMemory8: U32(U32, U8, AccType);
    A32ExclusiveWriteMemory16: U32(U32, U16, AccType);
    A32ExclusiveWriteMemory32: U32(U32, U32, AccType);
    A32ExclusiveWriteMemory64: U32(U32, U64, AccType);
    A32ClearExclusive: Void();

    // A64 guest state.
    A64GetW: U32(A64Reg);
    A64GetX: U64(A64Reg);
    A64GetS: U128(A64Vec);
    A64GetD: U128(A64Vec);
    A64GetQ: U128(A64Vec);
    A64GetSP: U64();
    A64GetFPCR: U32();
    A64GetFPSR: U32();
    A64GetNZCVRaw: U32();
    A64GetCFlag: U1();
    A64SetW: Void(A64Reg, U32);
    A64SetX: Void(A64Reg, U64);
    A64SetS: Void(A64Vec, U128);
    A64SetD: Void(A64Vec, U128);
    A64SetQ: Void(A64Vec, U128);
    A64SetSP: Void(U64);
    A64SetFPCR: Void(U32);
    A64SetFPSR: Void(U32);
    A64SetNZCV: Void(NZCV);
    A64SetNZCVRaw: Void(U32);
    A64SetPC: Void(U64);
    A64GetCNTFRQ: U32();
    A64GetCNTPCT: U64();
    A64GetCTR: U32();
    A64GetDCZID: U32();
    A64GetTPIDR: U64();
    A64GetTPIDRRO: U64();
    A64SetTPIDR: Void(U64);
    A64CallSupervisor: Void(U32);
    A64ExceptionRaised: Void(U64, U64);

    // A64 memory.
    A64ReadMemory8: U8(U64, AccType);
    A64ReadMemory16: U16(U64, AccType);
    A64ReadMemory32: U32(U64, AccType);
    A64ReadMemory64: U64(U64, AccType);
    A64ReadMemory128: U128(U64, AccType);
    A64ExclusiveReadMemory8: U8(U64, AccType);
    A64ExclusiveReadMemory16: U16(U64, AccType);
    A64ExclusiveReadMemory32: U32(U64, AccType);
    A64ExclusiveReadMemory64: U64(U64, AccType);
    A64ExclusiveReadMemory128: U128(U64, AccType);
    A64WriteMemory8: Void(U64, U8, AccType);
    A64WriteMemory16: Void(U64, U16, AccType);
    A64WriteMemory32: Void(U64, U32, AccType);
    A64WriteMemory64: Void(U64, U64, AccType);
    A64WriteMemory128: Void(U64, U128, AccType);
    A64ExclusiveWriteMemory8: U32(U64, U8, AccType);
    A64ExclusiveWriteMemory16: U32(U64, U16, AccType);
    A64ExclusiveWriteMemory32: U32(U64, U32, AccType);
    A64ExclusiveWriteMemory64: U32(U64, U64, AccType);
    A64ExclusiveWriteMemory128: U32(U64, U128, AccType);
    A64ClearExclusive: Void();

    // Barriers.
    DataSynchronizationBarrier: Void();
    DataMemoryBarrier: Void();
    InstructionSynchronizationBarrier: Void();

    // Width changes and lane extraction.
    Pack2x32To1x64: U64(U32, U32);
    LeastSignificantWord: U32(U64);
    LeastSignificantHalf: U16(U32);
    LeastSignificantByte: U8(U32);
    MostSignificantWord: U32(U64);
    MostSignificantBit: U1(U32);
    SignExtendByteToWord: U32(U8);
    SignExtendHalfToWord: U32(U16);
    SignExtendByteToLong: U64(U8);
    SignExtendHalfToLong: U64(U16);
    SignExtendWordToLong: U64(U32);
    ZeroExtendByteToWord: U32(U8);
    ZeroExtendHalfToWord: U32(U16);
    ZeroExtendByteToLong: U64(U8);
    ZeroExtendHalfToLong: U64(U16);
    ZeroExtendWordToLong: U64(U32);
    ZeroExtendLongToQuad: U128(U64);

    // Tests and selection.
    IsZero32: U1(U32);
    IsZero64: U1(U64);
    TestBit: U1(U64, U8);
    ConditionalSelect32: U32(Cond, U32, U32);
    ConditionalSelect64: U64(Cond, U64, U64);
    ConditionalSelectNZCV: NZCV(Cond, NZCV, NZCV);

    // Shifts and rotates. The 32-bit forms carry the shifter carry chain:
    // they take a carry-in and may have a GetCarryFromOp attached.
    LogicalShiftLeft32: U32(U32, U8, U1);
    LogicalShiftLeft64: U64(U64, U8);
    LogicalShiftRight32: U32(U32, U8, U1);
    LogicalShiftRight64: U64(U64, U8);
    ArithmeticShiftRight32: U32(U32, U8, U1);
    ArithmeticShiftRight64: U64(U64, U8);
    RotateRight32: U32(U32, U8, U1);
    RotateRight64: U64(U64, U8);
    RotateRightExtended: U32(U32, U1);

    // Integer arithmetic. Add/Sub take a carry-in; Sub follows the ARM
    // convention where carry-in 1 means "no borrow".
    Add32: U32(U32, U32, U1);
    Add64: U64(U64, U64, U1);
    Sub32: U32(U32, U32, U1);
    Sub64: U64(U64, U64, U1);
    Mul32: U32(U32, U32);
    Mul64: U64(U64, U64);
    SignedMultiplyHigh64: U64(U64, U64);
    UnsignedMultiplyHigh64: U64(U64, U64);
    UnsignedDiv32: U32(U32, U32);
    UnsignedDiv64: U64(U64, U64);
    SignedDiv32: U32(U32, U32);
    SignedDiv64: U64(U64, U64);

    // Bitwise.
    And32: U32(U32, U32);
    And64: U64(U64, U64);
    AndNot32: U32(U32, U32);
    AndNot64: U64(U64, U64);
    Eor32: U32(U32, U32);
    Eor64: U64(U64, U64);
    Or32: U32(U32, U32);
    Or64: U64(U64, U64);
    Not32: U32(U32);
    Not64: U64(U64);

    // Bit twiddling.
    ByteReverseWord: U32(U32);
    ByteReverseHalf: U16(U16);
    ByteReverseDual: U64(U64);
    CountLeadingZeros32: U32(U32);
    CountLeadingZeros64: U64(U64);
    ReverseBits32: U32(U32);
    ReverseBits64: U64(U64);
    ExtractRegister32: U32(U32, U32, U8);
    ExtractRegister64: U64(U64, U64, U8);

    // Vector (128-bit) subset.
    ZeroVector: U128();
    VectorZeroUpper: U128(U128);
    VectorGetElement8: U8(U128, U8);
    VectorGetElement16: U16(U128, U8);
    VectorGetElement32: U32(U128, U8);
    VectorGetElement64: U64(U128, U8);
    VectorSetElement8: U128(U128, U8, U8);
    VectorSetElement16: U128(U128, U8, U16);
    VectorSetElement32: U128(U128, U8, U32);
    VectorSetElement64: U128(U128, U8, U64);
    VectorAdd8: U128(U128, U128);
    VectorAdd16: U128(U128, U128);
    VectorAdd32: U128(U128, U128);
    VectorAdd64: U128(U128, U128);
    VectorSub8: U128(U128, U128);
    VectorSub16: U128(U128, U128);
    VectorSub32: U128(U128, U128);
    VectorSub64: U128(U128, U128);
    VectorAnd: U128(U128, U128);
    VectorAndNot: U128(U128, U128);
    VectorOr: U128(U128, U128);
    VectorEor: U128(U128, U128);
    VectorNot: U128(U128);

    // Scalar floating point over bit patterns. Rounding comes from the guest
    // FPCR image installed in the host control register; conversions carry a
    // statically known rounding mode operand instead.
    FPAdd32: U32(U32, U32);
    FPAdd64: U64(U64, U64);
    FPSub32: U32(U32, U32);
    FPSub64: U64(U64, U64);
    FPMul32: U32(U32, U32);
    FPMul64: U64(U64, U64);
    FPDiv32: U32(U32, U32);
    FPDiv64: U64(U64, U64);
    FPAbs32: U32(U32);
    FPAbs64: U64(U64);
    FPNeg32: U32(U32);
    FPNeg64: U64(U64);
    FPSqrt32: U32(U32);
    FPSqrt64: U64(U64);
    FPCompare32: NZCV(U32, U32);
    FPCompare64: NZCV(U64, U64);
    FPSingleToDouble: U64(U32);
    FPDoubleToSingle: U32(U64);
    FPSingleToFixedS32: U32(U32);
    FPSingleToFixedU32: U32(U32);
    FPSingleToFixedS64: U64(U32);
    FPSingleToFixedU64: U64(U32);
    FPDoubleToFixedS32: U32(U64);
    FPDoubleToFixedU32: U32(U64);
    FPDoubleToFixedS64: U64(U64);
    FPDoubleToFixedU64: U64(U64);
    FPFixedS32ToSingle: U32(U32, U8);
    FPFixedU32ToSingle: U32(U32, U8);
    FPFixedS32ToDouble: U64(U32, U8);
    FPFixedU32ToDouble: U64(U32, U8);
    FPFixedS64ToSingle: U32(U64, U8);
    FPFixedU64ToSingle: U32(U64, U8);
    FPFixedS64ToDouble: U64(U64, U8);
    FPFixedU64ToDouble: U64(U64, U8);
}

impl Opcode {
    /// Number of operand slots.
    pub fn num_args(self) -> usize {
        self.arg_types().len()
    }

    /// Pseudo-operations produce no code of their own; their value appears
    /// as a side effect of lowering the parent they are attached to.
    pub fn is_pseudo_operation(self) -> bool {
        matches!(
            self,
            Opcode::GetCarryFromOp
                | Opcode::GetOverflowFromOp
                | Opcode::GetNZCVFromOp
                | Opcode::GetNZFromOp
        )
    }

    /// Whether an instruction with this opcode must be kept even when its
    /// result has no uses: it touches guest state, memory, the outside
    /// world, or dispatcher bookkeeping.
    pub fn may_have_side_effects(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Breakpoint
                | PushRSB
                | SetCheckBit
                | A32SetRegister
                | A32SetExtendedRegister32
                | A32SetExtendedRegister64
                | A32SetVector
                | A32SetCpsr
                | A32SetCpsrNZCV
                | A32SetCpsrNZCVRaw
                | A32SetCpsrNZ
                | A32SetCpsrNZC
                | A32BXWritePC
                | A32CallSupervisor
                | A32ExceptionRaised
                | A32ClearExclusive
                | A64SetW
                | A64SetX
                | A64SetS
                | A64SetD
                | A64SetQ
                | A64SetSP
                | A64SetFPCR
                | A64SetFPSR
                | A64SetNZCV
                | A64SetNZCVRaw
                | A64SetPC
                | A64SetTPIDR
                | A64CallSupervisor
                | A64ExceptionRaised
                | A64ClearExclusive
                | A64GetCNTPCT
                | DataSynchronizationBarrier
                | DataMemoryBarrier
                | InstructionSynchronizationBarrier
        ) || self.is_memory_read()
            || self.is_memory_write()
    }

    /// Whether this opcode reads guest memory through the callbacks.
    pub fn is_memory_read(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            A32ReadMemory8
                | A32ReadMemory16
                | A32ReadMemory32
                | A32ReadMemory64
                | A32ExclusiveReadMemory8
                | A32ExclusiveReadMemory16
                | A32ExclusiveReadMemory32
                | A32ExclusiveReadMemory64
                | A64ReadMemory8
                | A64ReadMemory16
                | A64ReadMemory32
                | A64ReadMemory64
                | A64ReadMemory128
                | A64ExclusiveReadMemory8
                | A64ExclusiveReadMemory16
                | A64ExclusiveReadMemory32
                | A64ExclusiveReadMemory64
                | A64ExclusiveReadMemory128
        )
    }

    /// Whether this opcode writes guest memory through the callbacks.
    pub fn is_memory_write(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            A32WriteMemory8
                | A32WriteMemory16
                | A32WriteMemory32
                | A32WriteMemory64
                | A32ExclusiveWriteMemory8
                | A32ExclusiveWriteMemory16
                | A32ExclusiveWriteMemory32
                | A32ExclusiveWriteMemory64
                | A64WriteMemory8
                | A64WriteMemory16
                | A64WriteMemory32
                | A64WriteMemory64
                | A64WriteMemory128
                | A64ExclusiveWriteMemory8
                | A64ExclusiveWriteMemory16
                | A64ExclusiveWriteMemory32
                | A64ExclusiveWriteMemory64
                | A64ExclusiveWriteMemory128
        )
    }

    /// Whether this opcode observes the guest NZCV flags. Eliminating a
    /// preceding flags write is only sound when nothing in between reads
    /// them.
    pub fn reads_nzcv(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            A32GetCpsr
                | A32GetCFlag
                | A64GetCFlag
                | A64GetNZCVRaw
                | ConditionalSelect32
                | ConditionalSelect64
                | ConditionalSelectNZCV
        )
    }

    /// Opcodes the constant-memory-reads pass may fold when the address is
    /// an immediate in read-only memory.
    pub fn is_foldable_memory_read(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            A32ReadMemory8
                | A32ReadMemory16
                | A32ReadMemory32
                | A32ReadMemory64
                | A64ReadMemory8
                | A64ReadMemory16
                | A64ReadMemory32
                | A64ReadMemory64
        )
    }

    /// Whether a `GetCarryFromOp` pseudo-operation may be attached to an
    /// instruction with this opcode.
    pub fn supports_carry_out(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            LogicalShiftLeft32
                | LogicalShiftRight32
                | ArithmeticShiftRight32
                | RotateRight32
                | RotateRightExtended
                | Add32
                | Add64
                | Sub32
                | Sub64
        )
    }

    /// Whether `GetOverflowFromOp` / `GetNZCVFromOp` capture real carry and
    /// overflow out of this opcode (adds and subtracts); other parents get
    /// N and Z from the result with C and V clear.
    pub fn is_add_sub(self) -> bool {
        matches!(
            self,
            Opcode::Add32 | Opcode::Add64 | Opcode::Sub32 | Opcode::Sub64
        )
    }

    /// Whether `GetNZCVFromOp` or `GetNZFromOp` may be attached here.
    pub fn supports_nzcv_out(self) -> bool {
        use Opcode::*;
        self.is_add_sub()
            || matches!(
                self,
                And32 | And64 | AndNot32 | AndNot64 | Eor32 | Eor64 | Or32 | Or64 | Not32 | Not64
                    | Mul32 | Mul64
                    | LogicalShiftLeft32 | LogicalShiftRight32 | ArithmeticShiftRight32
                    | RotateRight32 | RotateRightExtended
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_shapes() {
        assert_eq!(Opcode::Add32.result_type(), Type::U32);
        assert_eq!(
            Opcode::Add32.arg_types(),
            &[Type::U32, Type::U32, Type::U1]
        );
        assert_eq!(Opcode::A64SetX.result_type(), Type::Void);
        assert_eq!(Opcode::Void.num_args(), 0);
    }

    #[test]
    fn attribute_consistency() {
        assert!(Opcode::A64ReadMemory32.may_have_side_effects());
        assert!(Opcode::A64WriteMemory8.may_have_side_effects());
        assert!(!Opcode::Add32.may_have_side_effects());
        assert!(Opcode::GetCarryFromOp.is_pseudo_operation());
        assert!(!Opcode::GetCarryFromOp.may_have_side_effects());
        assert!(Opcode::Sub64.supports_carry_out());
        assert!(Opcode::And32.supports_nzcv_out());
        assert!(!Opcode::And32.is_add_sub());
    }
}
