//! Guest register state, laid out for direct access from emitted code.
//!
//! Both structs are `#[repr(C)]`: the emitter addresses their fields with
//! fixed offsets off the pinned state register. Beyond architectural state
//! they carry the per-run scratch the dispatcher and register allocator
//! need: cycle counters, the MXCSR save slot, spill slots and the return
//! stack buffer.

use std::mem::offset_of;

/// Return-stack-buffer entries per state.
pub const RSB_ENTRIES: usize = 8;
/// 16-byte spill slots available to the register allocator.
pub const SPILL_SLOTS: usize = 64;

/// The guest context of one emulated AArch64 core.
#[repr(C)]
pub struct A64JitState {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    /// V0-V31, two 64-bit lanes each.
    pub vec: [u64; 64],
    /// N/Z/C/V in their architectural positions (bits 31..28).
    pub cpsr_nzcv: u32,
    pub fpcr: u32,
    pub fpsr: u32,
    /// Host MXCSR image of `fpcr`, installed while guest code runs.
    pub guest_mxcsr: u32,
    pub save_host_mxcsr: u32,
    pub check_bit: u8,
    pub exclusive_state: u8,
    _pad: [u8; 2],
    pub tpidr_el0: u64,
    pub tpidrro_el0: u64,
    pub cycles_to_run: i64,
    pub cycles_remaining: i64,
    pub rsb_ptr: u64,
    pub rsb_location_descriptors: [u64; RSB_ENTRIES],
    pub rsb_codeptrs: [u64; RSB_ENTRIES],
    pub spill: [[u64; 2]; SPILL_SLOTS],
    pub scratch: [u8; 16],
}

/// MXCSR with all exceptions masked and round-to-nearest: the neutral image
/// of an all-zero FPCR.
pub const MXCSR_DEFAULT: u32 = 0x1f80;

impl Default for A64JitState {
    fn default() -> Self {
        Self {
            regs: [0; 31],
            sp: 0,
            pc: 0,
            vec: [0; 64],
            cpsr_nzcv: 0,
            fpcr: 0,
            fpsr: 0,
            guest_mxcsr: MXCSR_DEFAULT,
            save_host_mxcsr: MXCSR_DEFAULT,
            check_bit: 0,
            exclusive_state: 0,
            _pad: [0; 2],
            tpidr_el0: 0,
            tpidrro_el0: 0,
            cycles_to_run: 0,
            cycles_remaining: 0,
            rsb_ptr: 0,
            rsb_location_descriptors: [0; RSB_ENTRIES],
            rsb_codeptrs: [0; RSB_ENTRIES],
            spill: [[0; 2]; SPILL_SLOTS],
            scratch: [0; 16],
        }
    }
}

/// The guest context of one emulated ARMv7 core.
#[repr(C)]
pub struct A32JitState {
    pub regs: [u32; 16],
    /// S0-S63 view of the extension register file.
    pub ext_regs: [u32; 64],
    pub cpsr_nzcv: u32,
    /// T/E/IT/FPSCR-mode bits, packed exactly as the location descriptor's
    /// upper word so dispatch can rebuild the lookup key directly.
    pub upper_location_descriptor: u32,
    pub fpscr: u32,
    pub guest_mxcsr: u32,
    pub save_host_mxcsr: u32,
    pub check_bit: u8,
    pub exclusive_state: u8,
    _pad: [u8; 2],
    pub cycles_to_run: i64,
    pub cycles_remaining: i64,
    pub rsb_ptr: u64,
    pub rsb_location_descriptors: [u64; RSB_ENTRIES],
    pub rsb_codeptrs: [u64; RSB_ENTRIES],
    pub spill: [[u64; 2]; SPILL_SLOTS],
    pub scratch: [u8; 16],
}

impl Default for A32JitState {
    fn default() -> Self {
        Self {
            regs: [0; 16],
            ext_regs: [0; 64],
            cpsr_nzcv: 0,
            upper_location_descriptor: 0,
            fpscr: 0,
            guest_mxcsr: MXCSR_DEFAULT,
            save_host_mxcsr: MXCSR_DEFAULT,
            check_bit: 0,
            exclusive_state: 0,
            _pad: [0; 2],
            cycles_to_run: 0,
            cycles_remaining: 0,
            rsb_ptr: 0,
            rsb_location_descriptors: [0; RSB_ENTRIES],
            rsb_codeptrs: [0; RSB_ENTRIES],
            spill: [[0; 2]; SPILL_SLOTS],
            scratch: [0; 16],
        }
    }
}

impl A64JitState {
    /// The location descriptor of the current architectural state.
    pub fn location_descriptor(&self) -> crate::frontend::a64::LocationDescriptor {
        crate::frontend::a64::LocationDescriptor::new(self.pc, self.fpcr, false)
    }
}

impl A32JitState {
    pub fn location_descriptor(&self) -> crate::loc::LocationDescriptor {
        crate::loc::LocationDescriptor::new(
            u64::from(self.regs[15]) | u64::from(self.upper_location_descriptor) << 32,
        )
    }

    /// NZCV plus the mode/T/E bits, as MRS would read it.
    pub fn cpsr(&self) -> u32 {
        let upper = self.upper_location_descriptor;
        let t = (upper & 1) << 5;
        let e = (upper & 2) << 8;
        self.cpsr_nzcv | t | e | 0b10000
    }
}

/// Field offsets the emitter and prelude need, valid for either state
/// struct. Guest register files are described by a base and stride.
#[derive(Copy, Clone, Debug)]
pub struct StateLayout {
    pub regs: i32,
    pub vec: i32,
    pub pc: i32,
    /// A32 only: the packed upper location descriptor word.
    pub upper_location: Option<i32>,
    pub nzcv: i32,
    pub fpcr_or_fpscr: i32,
    pub fpsr: Option<i32>,
    pub guest_mxcsr: i32,
    pub save_host_mxcsr: i32,
    pub check_bit: i32,
    pub exclusive_state: i32,
    pub tpidr: Option<i32>,
    pub tpidrro: Option<i32>,
    pub cycles_to_run: i32,
    pub cycles_remaining: i32,
    pub rsb_ptr: i32,
    pub rsb_location_descriptors: i32,
    pub rsb_codeptrs: i32,
    pub spill: i32,
    pub scratch: i32,
}

impl StateLayout {
    pub fn a64() -> Self {
        Self {
            regs: offset_of!(A64JitState, regs) as i32,
            vec: offset_of!(A64JitState, vec) as i32,
            pc: offset_of!(A64JitState, pc) as i32,
            upper_location: None,
            nzcv: offset_of!(A64JitState, cpsr_nzcv) as i32,
            fpcr_or_fpscr: offset_of!(A64JitState, fpcr) as i32,
            fpsr: Some(offset_of!(A64JitState, fpsr) as i32),
            guest_mxcsr: offset_of!(A64JitState, guest_mxcsr) as i32,
            save_host_mxcsr: offset_of!(A64JitState, save_host_mxcsr) as i32,
            check_bit: offset_of!(A64JitState, check_bit) as i32,
            exclusive_state: offset_of!(A64JitState, exclusive_state) as i32,
            tpidr: Some(offset_of!(A64JitState, tpidr_el0) as i32),
            tpidrro: Some(offset_of!(A64JitState, tpidrro_el0) as i32),
            cycles_to_run: offset_of!(A64JitState, cycles_to_run) as i32,
            cycles_remaining: offset_of!(A64JitState, cycles_remaining) as i32,
            rsb_ptr: offset_of!(A64JitState, rsb_ptr) as i32,
            rsb_location_descriptors: offset_of!(A64JitState, rsb_location_descriptors) as i32,
            rsb_codeptrs: offset_of!(A64JitState, rsb_codeptrs) as i32,
            spill: offset_of!(A64JitState, spill) as i32,
            scratch: offset_of!(A64JitState, scratch) as i32,
        }
    }

    pub fn a32() -> Self {
        Self {
            regs: offset_of!(A32JitState, regs) as i32,
            vec: offset_of!(A32JitState, ext_regs) as i32,
            pc: offset_of!(A32JitState, regs) as i32 + 15 * 4,
            upper_location: Some(offset_of!(A32JitState, upper_location_descriptor) as i32),
            nzcv: offset_of!(A32JitState, cpsr_nzcv) as i32,
            fpcr_or_fpscr: offset_of!(A32JitState, fpscr) as i32,
            fpsr: None,
            guest_mxcsr: offset_of!(A32JitState, guest_mxcsr) as i32,
            save_host_mxcsr: offset_of!(A32JitState, save_host_mxcsr) as i32,
            check_bit: offset_of!(A32JitState, check_bit) as i32,
            exclusive_state: offset_of!(A32JitState, exclusive_state) as i32,
            tpidr: None,
            tpidrro: None,
            cycles_to_run: offset_of!(A32JitState, cycles_to_run) as i32,
            cycles_remaining: offset_of!(A32JitState, cycles_remaining) as i32,
            rsb_ptr: offset_of!(A32JitState, rsb_ptr) as i32,
            rsb_location_descriptors: offset_of!(A32JitState, rsb_location_descriptors) as i32,
            rsb_codeptrs: offset_of!(A32JitState, rsb_codeptrs) as i32,
            spill: offset_of!(A32JitState, spill) as i32,
            scratch: offset_of!(A32JitState, scratch) as i32,
        }
    }

    /// Offset of an A64 X register / A32 core register.
    pub fn a64_reg(&self, index: usize) -> i32 {
        self.regs + (index * 8) as i32
    }

    pub fn a32_reg(&self, index: usize) -> i32 {
        self.regs + (index * 4) as i32
    }

    /// Offset of a 128-bit A64 vector register.
    pub fn a64_vec(&self, index: usize) -> i32 {
        self.vec + (index * 16) as i32
    }

    /// Offset of an A32 extension register at the given width.
    pub fn a32_ext_reg32(&self, index: usize) -> i32 {
        self.vec + (index * 4) as i32
    }

    pub fn a32_ext_reg64(&self, index: usize) -> i32 {
        self.vec + (index * 8) as i32
    }

    pub fn spill_slot(&self, slot: usize) -> i32 {
        self.spill + (slot * 16) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_are_eight_byte_aligned_where_needed() {
        let a64 = StateLayout::a64();
        assert_eq!(a64.a64_reg(0) % 8, 0);
        assert_eq!(a64.vec % 16 % 8, 0);
        assert_eq!(a64.cycles_remaining % 8, 0);
        assert_eq!(a64.spill % 8, 0);

        let a32 = StateLayout::a32();
        assert_eq!(a32.pc, a32.a32_reg(15));
        assert_eq!(a32.cycles_remaining % 8, 0);
    }

    #[test]
    fn a32_cpsr_composition() {
        let mut state = A32JitState::default();
        state.cpsr_nzcv = 0x9000_0000;
        state.upper_location_descriptor = 0b01;
        assert_eq!(state.cpsr(), 0x9000_0030);
        // T bit maps to CPSR bit 5, E to bit 9.
        state.upper_location_descriptor = 0b10;
        assert_eq!(state.cpsr(), 0x9000_0210);
    }
}
