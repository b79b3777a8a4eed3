//! The x86-64 back end.

pub mod address_space;
pub mod asm;
pub mod emit;
mod emit_data_processing;
mod emit_memory;
mod emit_state;
mod emit_vector_fp;
pub mod prelude;
