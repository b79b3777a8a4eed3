//! The block optimization pipeline.
//!
//! Passes run in a fixed order over a single block, in place:
//! polyfill, naming, guest-register get/set elimination, constant memory
//! reads, constant propagation, dead code elimination, identity removal and
//! finally verification. A verification failure is a translator or pass bug
//! and aborts.

mod constant_memory_reads;
mod constant_propagation;
mod dce;
mod get_set_elimination;
mod identity_removal;
mod naming;
mod polyfill;
mod verify;

pub use constant_memory_reads::{constant_memory_reads, ConstantMemoryReads};
pub use constant_propagation::constant_propagation;
pub use dce::dead_code_elimination;
pub use get_set_elimination::{
    a32_get_set_elimination, a64_get_set_elimination, A32GetSetOptions,
};
pub use identity_removal::identity_removal;
pub use naming::naming_pass;
pub use polyfill::{polyfill_pass, PolyfillOptions};
pub use verify::verification_pass;

use crate::ir::{Block, Inst, Opcode};
use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;

/// Pseudo-operations keyed by the parent instruction they observe.
///
/// The emitter and several passes need to find the flag-extraction
/// instructions attached to a computation; the IR itself stores only the
/// forward edge, so this side table is rebuilt on demand.
pub fn pseudo_op_map(block: &Block) -> SecondaryMap<Inst, SmallVec<[Inst; 2]>> {
    let mut map: SecondaryMap<Inst, SmallVec<[Inst; 2]>> = SecondaryMap::new();
    for inst in block.iter() {
        if block.opcode(inst).is_pseudo_operation() {
            if let Some(parent) = block.arg(inst, 0).inst() {
                map[parent].push(inst);
            }
        }
    }
    map
}

/// Whether an opcode acts as an optimization barrier for guest-state
/// forwarding: the host may observe or change guest registers across it.
pub(crate) fn is_state_barrier(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::A32CallSupervisor
            | Opcode::A32ExceptionRaised
            | Opcode::A64CallSupervisor
            | Opcode::A64ExceptionRaised
            | Opcode::Breakpoint
            | Opcode::InstructionSynchronizationBarrier
    )
}
