//! The host back end: register allocation, code emission, the dispatcher
//! prelude and the address space / code cache.
//!
//! Only the x86-64 SysV back end is carried; the seam between the
//! architecture-neutral pieces (relocations, emitted-block descriptions,
//! the allocator protocol) and the encoder is kept host-neutral.

pub mod code_buffer;
pub mod regalloc;
pub mod x64;

/// Offset in bytes from a block's entry point.
pub type CodeOffset = usize;

/// Where an unresolved branch in emitted code must eventually land.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LinkTarget {
    /// The epilogue: report ticks, restore host state, return to the
    /// embedder.
    ReturnFromRunCode,
    /// The dispatcher loop: re-check halt and cycles, look up the next
    /// block, branch to it.
    ReturnToDispatcher,
    /// Another block's entry point. This port routes these through the
    /// dispatcher; the record keeps the information a direct-linking
    /// backend would patch with.
    Block(crate::loc::LocationDescriptor),
}

/// A deferred patch site inside an emitted block.
#[derive(Copy, Clone, Debug)]
pub struct Relocation {
    /// Offset of the branch instruction within the block.
    pub offset: CodeOffset,
    pub target: LinkTarget,
}

/// What the emitter hands back for one block.
pub struct EmittedBlockInfo {
    /// Absolute entry address within the code buffer.
    pub entry_point: usize,
    pub size: usize,
    pub relocations: smallvec::SmallVec<[Relocation; 4]>,
}
