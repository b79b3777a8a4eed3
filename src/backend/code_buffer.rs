//! The executable code region.
//!
//! One fixed-size anonymous mapping holds the prelude, the trampolines and
//! every emitted block. Without the `w-xor-x` feature the region stays
//! readable+writable+executable for its whole life; with it, emission and
//! patching flip the region to writable and dispatch flips it back to
//! executable.

use std::ptr;

pub struct CodeBuffer {
    base: *mut u8,
    size: usize,
    cursor: usize,
}

// The buffer is owned by a single address space; the raw pointer does not
// make it thread-affine.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    pub fn new(size: usize) -> Self {
        let size = size.max(64 * 1024);
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert!(
            base != libc::MAP_FAILED,
            "failed to map {size} bytes of code cache"
        );
        Self {
            base: base.cast(),
            size,
            cursor: 0,
        }
    }

    pub fn base_addr(&self) -> usize {
        self.base as usize
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        debug_assert!(cursor <= self.size);
        self.cursor = cursor;
    }

    pub fn advance(&mut self, bytes: usize) {
        self.cursor += bytes;
        debug_assert!(self.cursor <= self.size);
    }

    pub fn space_remaining(&self) -> usize {
        self.size - self.cursor
    }

    /// The writable window from the cursor to the end of the region.
    pub fn remaining_window(&mut self) -> (&mut [u8], usize) {
        let addr = self.base as usize + self.cursor;
        let window =
            unsafe { std::slice::from_raw_parts_mut(self.base.add(self.cursor), self.space_remaining()) };
        (window, addr)
    }

    /// A writable view over already-emitted bytes, for relocation patching.
    pub fn patch_window(&mut self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.cursor);
        unsafe { std::slice::from_raw_parts_mut(self.base.add(offset), len) }
    }

    /// Make the region writable (no-op unless `w-xor-x` is enabled).
    pub fn enable_writing(&mut self) {
        #[cfg(feature = "w-xor-x")]
        unsafe {
            region::protect(self.base, self.size, region::Protection::READ_WRITE)
                .expect("failed to make code cache writable");
        }
    }

    /// Make the region executable (no-op unless `w-xor-x` is enabled).
    pub fn disable_writing(&mut self) {
        #[cfg(feature = "w-xor-x")]
        unsafe {
            region::protect(self.base, self.size, region::Protection::READ_EXECUTE)
                .expect("failed to make code cache executable");
        }
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.cast(), self.size);
        }
    }
}
