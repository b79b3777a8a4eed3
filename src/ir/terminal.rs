//! Block terminals: the control-flow tail of a basic block.

use super::Cond;
use crate::loc::LocationDescriptor;

/// What happens after the last instruction of a block executes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Terminal {
    /// Sentinel: no terminal has been set yet.
    Invalid,
    /// Fall back to an interpreter at `next`. Kept for parity with the IR;
    /// no emission path produces it.
    Interpret { next: LocationDescriptor },
    /// Unconditionally return to the dispatcher.
    ReturnToDispatch,
    /// Chain to the block at `next`.
    LinkBlock { next: LocationDescriptor },
    /// Chain to the block at `next`; a backend that links blocks directly may
    /// elide re-checks on this edge.
    LinkBlockFast { next: LocationDescriptor },
    /// Pop the return stack buffer and branch to the popped entry.
    PopRSBHint,
    /// Branch through the fast dispatch cache.
    FastDispatchHint,
    /// Branch on an ARM condition evaluated against the guest flags.
    If {
        cond: Cond,
        then_: Box<Terminal>,
        else_: Box<Terminal>,
    },
    /// Branch on the one-bit value stored by `SetCheckBit` earlier in the
    /// block.
    CheckBit {
        then_: Box<Terminal>,
        else_: Box<Terminal>,
    },
    /// If the halt flag is set, return to the host; otherwise continue with
    /// `else_`.
    CheckHalt { else_: Box<Terminal> },
}

impl Terminal {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Terminal::Invalid)
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Terminal::Invalid
    }
}
