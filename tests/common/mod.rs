//! Shared test fixtures: a flat-memory environment implementing the
//! callback traits, with counters for observing what the translator and
//! the emitted code actually invoke. The environment lives behind a mutex
//! so tests keep a handle to it after handing the callbacks to the Jit.

#![allow(dead_code)]

use armjit::callbacks::{A32Callbacks, A64Callbacks};
use armjit::ir::Exception;
use armjit::{HaltHandle, HaltReason};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Sparse byte-addressed guest memory plus instrumentation.
#[derive(Default)]
pub struct TestEnv {
    pub memory: HashMap<u64, u8>,
    /// Addresses in `rom` report as read-only to the optimizer.
    pub rom: Option<std::ops::RangeInclusive<u64>>,
    /// Remaining tick budget: `GetTicksRemaining` reports it, `AddTicks`
    /// consumes it.
    pub ticks_remaining: u64,
    pub ticks_added: u64,
    pub svc_calls: Vec<u32>,
    pub exceptions: Vec<(u64, Exception)>,
    pub data_reads_32: u64,
    /// When set, a supervisor call stops the core (the usual embedder
    /// pattern for syscall handling).
    pub halt_on_svc: Option<HaltHandle>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            ticks_remaining: 1 << 40,
            ..Default::default()
        }
    }

    pub fn write_word(&mut self, addr: u64, word: u32) {
        for (i, byte) in word.to_le_bytes().iter().enumerate() {
            self.memory.insert(addr + i as u64, *byte);
        }
    }

    pub fn load_program(&mut self, base: u64, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            self.write_word(base + 4 * i as u64, *word);
        }
    }

    fn read(&self, addr: u64) -> u8 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    fn read_wide(&self, addr: u64, bytes: u32) -> u64 {
        let mut value = 0u64;
        for i in (0..bytes).rev() {
            value = value << 8 | u64::from(self.read(addr + u64::from(i)));
        }
        value
    }

    fn write_wide(&mut self, addr: u64, bytes: u32, value: u64) {
        for i in 0..bytes {
            self.memory
                .insert(addr + u64::from(i), (value >> (8 * i)) as u8);
        }
    }

    /// Test-side view of guest memory.
    pub fn read_mem(&self, addr: u64, bytes: u32) -> u64 {
        self.read_wide(addr, bytes)
    }

    fn svc(&mut self, swi: u32) {
        self.svc_calls.push(swi);
        if let Some(handle) = &self.halt_on_svc {
            handle.halt(HaltReason::USER_DEFINED_2);
        }
    }

    fn consume_ticks(&mut self, ticks: u64) {
        self.ticks_added += ticks;
        self.ticks_remaining = self.ticks_remaining.saturating_sub(ticks);
    }
}

/// The callback object handed to the Jit; clones share one environment.
#[derive(Clone)]
pub struct SharedEnv(pub Arc<Mutex<TestEnv>>);

impl SharedEnv {
    pub fn new(env: TestEnv) -> Self {
        Self(Arc::new(Mutex::new(env)))
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut TestEnv) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }
}

impl A64Callbacks for SharedEnv {
    fn memory_read_8(&mut self, vaddr: u64) -> u8 {
        self.with(|env| env.read(vaddr))
    }
    fn memory_read_16(&mut self, vaddr: u64) -> u16 {
        self.with(|env| env.read_wide(vaddr, 2) as u16)
    }
    fn memory_read_32(&mut self, vaddr: u64) -> u32 {
        self.with(|env| {
            env.data_reads_32 += 1;
            env.read_wide(vaddr, 4) as u32
        })
    }
    fn memory_read_64(&mut self, vaddr: u64) -> u64 {
        self.with(|env| env.read_wide(vaddr, 8))
    }

    fn memory_write_8(&mut self, vaddr: u64, value: u8) {
        self.with(|env| env.write_wide(vaddr, 1, value.into()));
    }
    fn memory_write_16(&mut self, vaddr: u64, value: u16) {
        self.with(|env| env.write_wide(vaddr, 2, value.into()));
    }
    fn memory_write_32(&mut self, vaddr: u64, value: u32) {
        self.with(|env| env.write_wide(vaddr, 4, value.into()));
    }
    fn memory_write_64(&mut self, vaddr: u64, value: u64) {
        self.with(|env| env.write_wide(vaddr, 8, value));
    }

    fn memory_write_exclusive_8(&mut self, vaddr: u64, value: u8, _expected: u8) -> bool {
        self.with(|env| env.write_wide(vaddr, 1, value.into()));
        true
    }
    fn memory_write_exclusive_16(&mut self, vaddr: u64, value: u16, _expected: u16) -> bool {
        self.with(|env| env.write_wide(vaddr, 2, value.into()));
        true
    }
    fn memory_write_exclusive_32(&mut self, vaddr: u64, value: u32, _expected: u32) -> bool {
        self.with(|env| env.write_wide(vaddr, 4, value.into()));
        true
    }
    fn memory_write_exclusive_64(&mut self, vaddr: u64, value: u64, _expected: u64) -> bool {
        self.with(|env| env.write_wide(vaddr, 8, value));
        true
    }

    fn memory_read_code(&mut self, vaddr: u64) -> Option<u32> {
        // Instruction fetch bypasses the data-read instrumentation.
        Some(self.with(|env| env.read_wide(vaddr, 4) as u32))
    }

    fn is_read_only_memory(&mut self, vaddr: u64) -> bool {
        self.with(|env| env.rom.as_ref().is_some_and(|rom| rom.contains(&vaddr)))
    }

    fn call_svc(&mut self, swi: u32) {
        self.with(|env| env.svc(swi));
    }

    fn exception_raised(&mut self, pc: u64, exception: Exception) {
        self.with(|env| env.exceptions.push((pc, exception)));
    }

    fn add_ticks(&mut self, ticks: u64) {
        self.with(|env| env.consume_ticks(ticks));
    }

    fn get_ticks_remaining(&mut self) -> u64 {
        self.with(|env| env.ticks_remaining)
    }
}

impl A32Callbacks for SharedEnv {
    fn memory_read_8(&mut self, vaddr: u32) -> u8 {
        self.with(|env| env.read(vaddr.into()))
    }
    fn memory_read_16(&mut self, vaddr: u32) -> u16 {
        self.with(|env| env.read_wide(vaddr.into(), 2) as u16)
    }
    fn memory_read_32(&mut self, vaddr: u32) -> u32 {
        self.with(|env| {
            env.data_reads_32 += 1;
            env.read_wide(vaddr.into(), 4) as u32
        })
    }
    fn memory_read_64(&mut self, vaddr: u32) -> u64 {
        self.with(|env| env.read_wide(vaddr.into(), 8))
    }

    fn memory_write_8(&mut self, vaddr: u32, value: u8) {
        self.with(|env| env.write_wide(vaddr.into(), 1, value.into()));
    }
    fn memory_write_16(&mut self, vaddr: u32, value: u16) {
        self.with(|env| env.write_wide(vaddr.into(), 2, value.into()));
    }
    fn memory_write_32(&mut self, vaddr: u32, value: u32) {
        self.with(|env| env.write_wide(vaddr.into(), 4, value.into()));
    }
    fn memory_write_64(&mut self, vaddr: u32, value: u64) {
        self.with(|env| env.write_wide(vaddr.into(), 8, value));
    }

    fn memory_write_exclusive_8(&mut self, vaddr: u32, value: u8, _expected: u8) -> bool {
        self.with(|env| env.write_wide(vaddr.into(), 1, value.into()));
        true
    }
    fn memory_write_exclusive_16(&mut self, vaddr: u32, value: u16, _expected: u16) -> bool {
        self.with(|env| env.write_wide(vaddr.into(), 2, value.into()));
        true
    }
    fn memory_write_exclusive_32(&mut self, vaddr: u32, value: u32, _expected: u32) -> bool {
        self.with(|env| env.write_wide(vaddr.into(), 4, value.into()));
        true
    }
    fn memory_write_exclusive_64(&mut self, vaddr: u32, value: u64, _expected: u64) -> bool {
        self.with(|env| env.write_wide(vaddr.into(), 8, value));
        true
    }

    fn memory_read_code(&mut self, vaddr: u32) -> Option<u32> {
        Some(self.with(|env| env.read_wide(vaddr.into(), 4) as u32))
    }

    fn is_read_only_memory(&mut self, vaddr: u32) -> bool {
        self.with(|env| {
            env.rom
                .as_ref()
                .is_some_and(|rom| rom.contains(&u64::from(vaddr)))
        })
    }

    fn call_svc(&mut self, swi: u32) {
        self.with(|env| env.svc(swi));
    }

    fn exception_raised(&mut self, pc: u32, exception: Exception) {
        self.with(|env| env.exceptions.push((pc.into(), exception)));
    }

    fn add_ticks(&mut self, ticks: u64) {
        self.with(|env| env.consume_ticks(ticks));
    }

    fn get_ticks_remaining(&mut self) -> u64 {
        self.with(|env| env.ticks_remaining)
    }
}
