//! The intermediate representation.
//!
//! Guest instructions are translated into blocks of typed micro-operations
//! over an SSA-like value graph: every value is produced once, by an
//! instruction earlier in the same block or by an immediate operand. Control
//! flow never appears inside a block; it is described entirely by the block's
//! [`Terminal`].

pub mod block;
pub mod cond;
pub mod emit;
pub mod inst;
pub mod opcode;
pub mod terminal;
pub mod types;
pub mod value;

pub use block::Block;
pub use cond::Cond;
pub use emit::IrEmitter;
pub use inst::{Inst, InstData};
pub use opcode::Opcode;
pub use terminal::Terminal;
pub use types::Type;
pub use value::Value;

/// The architectural ordering/privilege class of a memory access.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum AccType {
    Normal,
    Unpriv,
    Vec,
    Atomic,
    Ordered,
    LimitedOrdered,
}

/// Guest exception kinds reported through the `ExceptionRaised` callback.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u64)]
pub enum Exception {
    UnpredictableInstruction,
    UnallocatedEncoding,
    ReservedValue,
    DecodeError,
    Breakpoint,
    Yield,
    WaitForEvent,
    WaitForInterrupt,
    SendEvent,
    SendEventLocal,
}

impl Exception {
    pub fn from_u64(raw: u64) -> Option<Exception> {
        use Exception::*;
        Some(match raw {
            0 => UnpredictableInstruction,
            1 => UnallocatedEncoding,
            2 => ReservedValue,
            3 => DecodeError,
            4 => Breakpoint,
            5 => Yield,
            6 => WaitForEvent,
            7 => WaitForInterrupt,
            8 => SendEvent,
            9 => SendEventLocal,
            _ => return None,
        })
    }
}
