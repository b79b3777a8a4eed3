//! The address space: code cache, linking, invalidation, dispatch.

use super::emit::{emit_block, EmitConfig};
use super::prelude::{emit_prelude, PreludeHooks, PreludeInfo, RunCodeFn};
use crate::backend::code_buffer::CodeBuffer;
use crate::backend::{EmittedBlockInfo, LinkTarget};
use crate::block_ranges::BlockRanges;
use crate::ir::Block;
use crate::loc::LocationDescriptor;
use rustc_hash::FxHashMap;
use std::ops::RangeInclusive;

/// Leave at least this much room before emitting another block; running
/// low flushes the whole cache instead.
const EMIT_SAFETY_MARGIN: usize = 1024 * 1024;

/// One core's executable memory, lookup tables and prelude.
pub struct AddressSpace {
    buffer: CodeBuffer,
    prelude: PreludeInfo,
    block_entries: FxHashMap<u64, usize>,
    block_infos: FxHashMap<u64, EmittedBlockInfo>,
    block_ranges: BlockRanges,
    emit_conf: EmitConfig,
}

impl AddressSpace {
    pub fn new(
        code_cache_size: usize,
        hooks: &PreludeHooks,
        emit_conf: EmitConfig,
        enable_cycle_counting: bool,
    ) -> Self {
        let mut buffer = CodeBuffer::new(code_cache_size);
        buffer.enable_writing();
        let (window, base) = buffer.remaining_window();
        let mut prelude = emit_prelude(
            window,
            base,
            &emit_conf.layout,
            hooks,
            enable_cycle_counting,
        );
        prelude.end_of_prelude += buffer.cursor();
        let end = prelude.end_of_prelude;
        buffer.set_cursor(end);
        buffer.disable_writing();

        let mut space = Self {
            buffer,
            prelude,
            block_entries: FxHashMap::default(),
            block_infos: FxHashMap::default(),
            block_ranges: BlockRanges::new(),
            emit_conf,
        };
        // The emitter needs the trampoline addresses resolved by the
        // prelude emission.
        space.emit_conf.trampolines = space.prelude.trampolines;
        space
    }

    pub fn get(&self, descriptor: LocationDescriptor) -> Option<usize> {
        self.block_entries.get(&descriptor.value()).copied()
    }

    /// Emits, links and registers a freshly translated block; returns its
    /// entry address. `pc_range` is the guest interval the block covers,
    /// for invalidation.
    pub fn insert_block(&mut self, block: &Block, pc_range: RangeInclusive<u64>) -> usize {
        if self.buffer.space_remaining() < EMIT_SAFETY_MARGIN {
            log::debug!("code cache full, clearing");
            self.clear_cache();
        }

        self.buffer.enable_writing();
        let (window, base) = self.buffer.remaining_window();
        let info = emit_block(window, base, block, &self.emit_conf);
        self.buffer.advance(info.size);
        self.link(&info);
        self.buffer.disable_writing();

        let descriptor = block.location();
        self.block_entries.insert(descriptor.value(), info.entry_point);
        self.block_ranges.add_range(pc_range, descriptor);
        log::debug!(
            "emitted block {} ({} bytes at {:#x})",
            descriptor,
            info.size,
            info.entry_point
        );
        self.block_infos.insert(descriptor.value(), info);
        self.block_entries[&descriptor.value()]
    }

    /// Resolves every relocation of a freshly emitted block. Block link
    /// targets fall back to the dispatcher; the recorded target keeps the
    /// information a direct-linking backend would use.
    fn link(&mut self, info: &EmittedBlockInfo) {
        for relocation in &info.relocations {
            let target = match relocation.target {
                LinkTarget::ReturnFromRunCode => self.prelude.return_from_run_code,
                LinkTarget::ReturnToDispatcher | LinkTarget::Block(_) => {
                    self.prelude.return_to_dispatcher
                }
            };
            let site = info.entry_point + relocation.offset;
            let rel = (target as i64 - (site as i64 + 5)) as i32;
            let buffer_offset = site - self.buffer.base_addr();
            let patch = self.buffer.patch_window(buffer_offset, 5);
            debug_assert_eq!(patch[0], 0xe9);
            patch[1..5].copy_from_slice(&rel.to_le_bytes());
        }
    }

    pub fn clear_cache(&mut self) {
        self.block_entries.clear();
        self.block_infos.clear();
        self.block_ranges.clear();
        self.buffer.set_cursor(self.prelude.end_of_prelude);
    }

    /// Drops every cached block overlapping the given guest ranges; their
    /// emitted bytes stay orphaned until the next full clear.
    pub fn invalidate_ranges(&mut self, ranges: &[RangeInclusive<u64>]) {
        for descriptor in self.block_ranges.invalidate_ranges(ranges) {
            self.block_entries.remove(&descriptor.value());
            self.block_infos.remove(&descriptor.value());
        }
    }

    pub fn run_code_ptr(&self) -> RunCodeFn {
        unsafe { std::mem::transmute::<usize, RunCodeFn>(self.prelude.run_code) }
    }

    pub fn step_code_ptr(&self) -> RunCodeFn {
        unsafe { std::mem::transmute::<usize, RunCodeFn>(self.prelude.step_code) }
    }
}
