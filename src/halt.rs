//! Halt reasons and the cross-thread halt handle.

use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

bitflags! {
    /// Why `run`/`step` returned. The halt word is shared with the host:
    /// any thread may set bits to stop the dispatcher at its next poll
    /// point, and the dispatcher exchanges the word back to zero on exit,
    /// returning the accumulated reasons.
    #[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
    pub struct HaltReason: u32 {
        const STEP = 1 << 0;
        const CACHE_INVALIDATION = 1 << 1;
        const MEMORY_ABORT = 1 << 2;
        const USER_DEFINED_1 = 1 << 24;
        const USER_DEFINED_2 = 1 << 25;
        const USER_DEFINED_3 = 1 << 26;
        const USER_DEFINED_4 = 1 << 27;
        const USER_DEFINED_5 = 1 << 28;
        const USER_DEFINED_6 = 1 << 29;
        const USER_DEFINED_7 = 1 << 30;
        const USER_DEFINED_8 = 1 << 31;
    }
}

/// A cloneable handle for stopping a running core from another thread.
#[derive(Clone)]
pub struct HaltHandle(Arc<AtomicU32>);

impl HaltHandle {
    pub(crate) fn new(word: Arc<AtomicU32>) -> Self {
        Self(word)
    }

    /// Requests a halt; the dispatcher exits at its next poll point.
    pub fn halt(&self, reason: HaltReason) {
        self.0.fetch_or(reason.bits(), Ordering::AcqRel);
    }
}
