//! armjit: a dynamic binary translator executing guest ARM code on x86-64
//! hosts.
//!
//! Guest basic blocks (A32/ARMv7-A or A64/ARMv8-A userspace) are decoded
//! into a typed, SSA-like intermediate representation, run through a small
//! optimization pipeline, lowered to native code in an executable cache,
//! and dispatched under a cycle/halt budget supplied by the embedder.
//!
//! The crate is layered accordingly:
//!
//! - [`ir`]: values, micro-operations, blocks, terminals and the typed
//!   builder.
//! - [`frontend`]: decode tables and translators for the two guest
//!   architectures.
//! - [`opt`]: the per-block optimization passes and verification.
//! - [`backend`]: register allocation, the x86-64 encoder and emitter, the
//!   dispatcher prelude and the code cache (x86-64 unix hosts).
//! - [`a32`] / [`a64`]: the per-architecture `Jit` front doors.
//!
//! Embedders implement [`A32Callbacks`](callbacks::A32Callbacks) or
//! [`A64Callbacks`](callbacks::A64Callbacks) to supply guest memory, tick
//! accounting and exception delivery, then drive [`a64::Jit::run`] (or its
//! A32 twin) from one thread per core. Any thread may stop a running core
//! through its [`HaltHandle`](halt::HaltHandle).

pub mod block_ranges;
pub mod callbacks;
pub mod config;
pub mod fp;
pub mod frontend;
pub mod halt;
pub mod ir;
pub mod loc;
pub mod monitor;
pub mod opt;
pub mod state;

#[cfg(all(target_arch = "x86_64", unix))]
pub mod backend;

#[cfg(all(target_arch = "x86_64", unix))]
pub mod a32;
#[cfg(all(target_arch = "x86_64", unix))]
pub mod a64;

pub use config::{A32Config, A64Config, BaseConfig, JitError, OptimizationFlag};
pub use halt::{HaltHandle, HaltReason};
pub use ir::Exception;
pub use monitor::ExclusiveMonitor;
