//! The global exclusive monitor and its spin lock.
//!
//! Load-exclusive records `(processor, address, value)`; store-exclusive
//! succeeds only if the recorded state is still intact for that processor.
//! A write by any processor through the monitor clears every other
//! processor's reservation of the same address. The monitor may be shared
//! between cores running on different threads, so its state sits behind a
//! spin lock.

use std::sync::atomic::{AtomicU32, Ordering};

/// A test-and-set spin lock over a host atomic word.
pub struct SpinLock {
    storage: AtomicU32,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            storage: AtomicU32::new(0),
        }
    }

    pub fn lock(&self) {
        loop {
            if self.storage.swap(1, Ordering::Acquire) == 0 {
                return;
            }
            while self.storage.load(Ordering::Relaxed) != 0 {
                std::hint::spin_loop();
            }
        }
    }

    pub fn unlock(&self) {
        self.storage.store(0, Ordering::Release);
    }

    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        self.lock();
        let result = f();
        self.unlock();
        result
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

const INVALID_EXCLUSIVE_ADDRESS: u64 = 0xdead_dead_dead_dead;
/// Reservation granule: exclusives on the same 16-byte granule conflict.
const RESERVATION_GRANULE_MASK: u64 = 0xffff_ffff_ffff_fff0;

#[derive(Copy, Clone)]
struct Reservation {
    address: u64,
    value: [u64; 2],
}

/// Monitor state shared by every core of one emulated cluster.
pub struct ExclusiveMonitor {
    lock: SpinLock,
    state: std::cell::UnsafeCell<Vec<Reservation>>,
}

// The interior state is only touched under `lock`.
unsafe impl Sync for ExclusiveMonitor {}
unsafe impl Send for ExclusiveMonitor {}

impl ExclusiveMonitor {
    pub fn new(processor_count: usize) -> Self {
        Self {
            lock: SpinLock::new(),
            state: std::cell::UnsafeCell::new(vec![
                Reservation {
                    address: INVALID_EXCLUSIVE_ADDRESS,
                    value: [0; 2],
                };
                processor_count
            ]),
        }
    }

    pub fn processor_count(&self) -> usize {
        self.lock.with(|| unsafe { (*self.state.get()).len() })
    }

    /// Performs the load half of an exclusive pair: runs `read`, records
    /// the observed value, and returns it.
    pub fn read_and_mark(
        &self,
        processor_id: usize,
        vaddr: u64,
        read: impl FnOnce() -> [u64; 2],
    ) -> [u64; 2] {
        self.lock.with(|| {
            let state = unsafe { &mut *self.state.get() };
            let value = read();
            state[processor_id] = Reservation {
                address: vaddr & RESERVATION_GRANULE_MASK,
                value,
            };
            value
        })
    }

    /// Performs the store half: if this processor still holds a matching
    /// reservation, runs `write` (which reports whether the underlying
    /// conditional store succeeded) and on success clears every other
    /// matching reservation. Returns whether the store happened.
    pub fn do_exclusive_operation(
        &self,
        processor_id: usize,
        vaddr: u64,
        write: impl FnOnce([u64; 2]) -> bool,
    ) -> bool {
        self.lock.with(|| {
            let state = unsafe { &mut *self.state.get() };
            let masked = vaddr & RESERVATION_GRANULE_MASK;
            let reservation = state[processor_id];
            if reservation.address != masked {
                return false;
            }
            if !write(reservation.value) {
                state[processor_id].address = INVALID_EXCLUSIVE_ADDRESS;
                return false;
            }
            for other in state.iter_mut() {
                if other.address == masked {
                    other.address = INVALID_EXCLUSIVE_ADDRESS;
                }
            }
            true
        })
    }

    /// Drops one processor's reservation (CLREX).
    pub fn clear_processor(&self, processor_id: usize) {
        self.lock.with(|| {
            let state = unsafe { &mut *self.state.get() };
            state[processor_id].address = INVALID_EXCLUSIVE_ADDRESS;
        });
    }

    /// Invalidates every reservation covering `vaddr` (a plain write from
    /// a processor that bypasses the monitor).
    pub fn clear_address(&self, vaddr: u64) {
        self.lock.with(|| {
            let state = unsafe { &mut *self.state.get() };
            let masked = vaddr & RESERVATION_GRANULE_MASK;
            for reservation in state.iter_mut() {
                if reservation.address == masked {
                    reservation.address = INVALID_EXCLUSIVE_ADDRESS;
                }
            }
        });
    }

    pub fn clear(&self) {
        self.lock.with(|| {
            let state = unsafe { &mut *self.state.get() };
            for reservation in state.iter_mut() {
                reservation.address = INVALID_EXCLUSIVE_ADDRESS;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paired_access_succeeds() {
        let monitor = ExclusiveMonitor::new(2);
        let value = monitor.read_and_mark(0, 0x1000, || [42, 0]);
        assert_eq!(value[0], 42);
        assert!(monitor.do_exclusive_operation(0, 0x1000, |expected| {
            assert_eq!(expected[0], 42);
            true
        }));
    }

    #[test]
    fn second_store_fails() {
        let monitor = ExclusiveMonitor::new(1);
        monitor.read_and_mark(0, 0x1000, || [1, 0]);
        assert!(monitor.do_exclusive_operation(0, 0x1000, |_| true));
        assert!(!monitor.do_exclusive_operation(0, 0x1000, |_| true));
    }

    #[test]
    fn intervening_writer_invalidates() {
        let monitor = ExclusiveMonitor::new(2);
        monitor.read_and_mark(0, 0x1000, || [1, 0]);
        // Processor 1 wins the race on the same granule.
        monitor.read_and_mark(1, 0x1008, || [1, 0]);
        assert!(monitor.do_exclusive_operation(1, 0x1008, |_| true));
        assert!(!monitor.do_exclusive_operation(0, 0x1000, |_| true));
    }

    #[test]
    fn different_granules_do_not_conflict() {
        let monitor = ExclusiveMonitor::new(2);
        monitor.read_and_mark(0, 0x1000, || [1, 0]);
        monitor.read_and_mark(1, 0x2000, || [2, 0]);
        assert!(monitor.do_exclusive_operation(1, 0x2000, |_| true));
        assert!(monitor.do_exclusive_operation(0, 0x1000, |_| true));
    }

    #[test]
    fn clear_drops_reservations() {
        let monitor = ExclusiveMonitor::new(1);
        monitor.read_and_mark(0, 0x1000, || [1, 0]);
        monitor.clear_processor(0);
        assert!(!monitor.do_exclusive_operation(0, 0x1000, |_| true));

        monitor.read_and_mark(0, 0x3000, || [1, 0]);
        monitor.clear_address(0x3008);
        assert!(!monitor.do_exclusive_operation(0, 0x3000, |_| true));
    }
}
