//! IR values: immediates and references to microinstructions.

use crate::frontend::a32::{ExtReg as A32ExtReg, Reg as A32Reg};
use crate::frontend::a64::{Reg as A64Reg, Vec as A64Vec};
use crate::ir::{AccType, Cond, Inst, Type};
use core::fmt;

/// A by-value operand carrier.
///
/// A `Value` is either empty, an immediate of some width, a guest-register
/// name, a condition or access-type literal, or a reference to the
/// [`Inst`] that produces it. It does not own the referenced instruction;
/// the enclosing block's arena does.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Value {
    /// No operand.
    Empty,
    /// The result of an instruction earlier in the same block.
    Inst(Inst),
    U1(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    A32Reg(A32Reg),
    A32ExtReg(A32ExtReg),
    A64Reg(A64Reg),
    A64Vec(A64Vec),
    Cond(Cond),
    AccType(AccType),
}

impl Value {
    /// The semantic type of this value. Instruction references report
    /// `Opaque`; resolve through the block for the precise type.
    pub fn ty(self) -> Type {
        match self {
            Value::Empty => Type::Void,
            Value::Inst(_) => Type::Opaque,
            Value::U1(_) => Type::U1,
            Value::U8(_) => Type::U8,
            Value::U16(_) => Type::U16,
            Value::U32(_) => Type::U32,
            Value::U64(_) => Type::U64,
            Value::A32Reg(_) => Type::A32Reg,
            Value::A32ExtReg(_) => Type::A32ExtReg,
            Value::A64Reg(_) => Type::A64Reg,
            Value::A64Vec(_) => Type::A64Vec,
            Value::Cond(_) => Type::Cond,
            Value::AccType(_) => Type::AccType,
        }
    }

    pub fn is_empty(self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Whether this is an integer immediate (including `U1`).
    pub fn is_immediate(self) -> bool {
        matches!(
            self,
            Value::U1(_) | Value::U8(_) | Value::U16(_) | Value::U32(_) | Value::U64(_)
        )
    }

    /// The instruction this value refers to, if any.
    pub fn inst(self) -> Option<Inst> {
        match self {
            Value::Inst(inst) => Some(inst),
            _ => None,
        }
    }

    /// The instruction this value refers to. Precondition: `is_inst()`.
    pub fn unwrap_inst(self) -> Inst {
        self.inst().expect("value is not an instruction reference")
    }

    pub fn as_u1(self) -> bool {
        match self {
            Value::U1(v) => v,
            _ => panic!("value is not a u1 immediate"),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Value::U8(v) => v,
            _ => panic!("value is not a u8 immediate"),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Value::U16(v) => v,
            _ => panic!("value is not a u16 immediate"),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Value::U32(v) => v,
            _ => panic!("value is not a u32 immediate"),
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Value::U64(v) => v,
            _ => panic!("value is not a u64 immediate"),
        }
    }

    /// Any integer immediate, zero-extended to 64 bits.
    pub fn immediate_as_u64(self) -> u64 {
        match self {
            Value::U1(v) => v as u64,
            Value::U8(v) => v as u64,
            Value::U16(v) => v as u64,
            Value::U32(v) => v as u64,
            Value::U64(v) => v,
            _ => panic!("value is not an integer immediate"),
        }
    }

    /// Builds an integer immediate of the named type from a 64-bit payload,
    /// truncating.
    pub fn immediate_of(ty: Type, bits: u64) -> Value {
        match ty {
            Type::U1 => Value::U1(bits & 1 != 0),
            Type::U8 => Value::U8(bits as u8),
            Type::U16 => Value::U16(bits as u16),
            Type::U32 => Value::U32(bits as u32),
            Type::U64 => Value::U64(bits),
            _ => panic!("not an immediate type: {ty}"),
        }
    }

    pub fn as_cond(self) -> Cond {
        match self {
            Value::Cond(c) => c,
            _ => panic!("value is not a condition"),
        }
    }

    pub fn as_acc_type(self) -> AccType {
        match self {
            Value::AccType(a) => a,
            _ => panic!("value is not an access type"),
        }
    }

    pub fn as_a32_reg(self) -> A32Reg {
        match self {
            Value::A32Reg(r) => r,
            _ => panic!("value is not an A32 register name"),
        }
    }

    pub fn as_a32_ext_reg(self) -> A32ExtReg {
        match self {
            Value::A32ExtReg(r) => r,
            _ => panic!("value is not an A32 extension register name"),
        }
    }

    pub fn as_a64_reg(self) -> A64Reg {
        match self {
            Value::A64Reg(r) => r,
            _ => panic!("value is not an A64 register name"),
        }
    }

    pub fn as_a64_vec(self) -> A64Vec {
        match self {
            Value::A64Vec(v) => v,
            _ => panic!("value is not an A64 vector name"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => write!(f, "<empty>"),
            Value::Inst(inst) => write!(f, "%{}", inst.index()),
            Value::U1(v) => write!(f, "u1({})", *v as u8),
            Value::U8(v) => write!(f, "u8({v:#x})"),
            Value::U16(v) => write!(f, "u16({v:#x})"),
            Value::U32(v) => write!(f, "u32({v:#x})"),
            Value::U64(v) => write!(f, "u64({v:#x})"),
            Value::A32Reg(r) => write!(f, "{r}"),
            Value::A32ExtReg(r) => write!(f, "{r}"),
            Value::A64Reg(r) => write!(f, "{r}"),
            Value::A64Vec(v) => write!(f, "{v}"),
            Value::Cond(c) => write!(f, "{c}"),
            Value::AccType(a) => write!(f, "{a:?}"),
        }
    }
}

use cranelift_entity::EntityRef;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_widths() {
        assert_eq!(Value::U8(0xff).immediate_as_u64(), 0xff);
        assert_eq!(Value::U32(0x8000_0000).immediate_as_u64(), 0x8000_0000);
        assert_eq!(
            Value::immediate_of(Type::U16, 0x12_3456),
            Value::U16(0x3456)
        );
        assert!(Value::U1(true).is_immediate());
        assert!(!Value::Empty.is_immediate());
    }
}
