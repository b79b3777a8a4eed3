//! Soft-float helpers.
//!
//! Pure functions over bit patterns, plus the FPCR/FPSR <-> MXCSR mappings
//! the dispatcher and emitter rely on. The arithmetic that x86 SSE gets
//! right under the guest rounding mode is emitted inline; what lives here
//! is the part SSE gets wrong or cannot express: saturating conversions to
//! integer and mode-aware conversions from integer.

/// ARM rounding modes, as encoded in FPCR.RMode.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RoundingMode {
    TiesToEven,
    TowardsPlusInfinity,
    TowardsMinusInfinity,
    TowardsZero,
}

impl RoundingMode {
    pub fn from_fpcr_bits(bits: u8) -> RoundingMode {
        match bits & 0b11 {
            0b00 => RoundingMode::TiesToEven,
            0b01 => RoundingMode::TowardsPlusInfinity,
            0b10 => RoundingMode::TowardsMinusInfinity,
            _ => RoundingMode::TowardsZero,
        }
    }
}

/// Derives the MXCSR image of an FPCR value: rounding control, flush-to-zero
/// and all exceptions masked.
pub fn mxcsr_from_fpcr(fpcr: u32) -> u32 {
    // ARM RMode: RN=00 RP=01 RM=10 RZ=11; MXCSR RC: RN=00 RD=01 RU=10 RZ=11.
    let rc = match fpcr >> 22 & 0b11 {
        0b00 => 0b00,
        0b01 => 0b10,
        0b10 => 0b01,
        _ => 0b11,
    };
    let fz = fpcr >> 24 & 1;
    // Exception masks all set; FZ maps to both FTZ and DAZ.
    0x1f80 | rc << 13 | fz << 15 | fz << 6
}

/// Maps accumulated MXCSR exception bits into ARM FPSR cumulative flags.
pub fn fpsr_from_mxcsr(mxcsr: u32) -> u32 {
    let ioc = mxcsr & 1; // invalid operation
    let idc = mxcsr >> 1 & 1; // denormal
    let dzc = mxcsr >> 2 & 1; // divide by zero
    let ofc = mxcsr >> 3 & 1; // overflow
    let ufc = mxcsr >> 4 & 1; // underflow
    let ixc = mxcsr >> 5 & 1; // inexact
    ioc | dzc << 1 | ofc << 2 | ufc << 3 | ixc << 4 | idc << 7
}

/// Seeds MXCSR status bits from ARM FPSR cumulative flags (the inverse
/// direction, used by FPSR writes).
pub fn mxcsr_status_from_fpsr(fpsr: u32) -> u32 {
    let ie = fpsr & 1;
    let de = fpsr >> 7 & 1;
    let ze = fpsr >> 1 & 1;
    let oe = fpsr >> 2 & 1;
    let ue = fpsr >> 3 & 1;
    let pe = fpsr >> 4 & 1;
    ie | de << 1 | ze << 2 | oe << 3 | ue << 4 | pe << 5
}

// Saturating float -> integer conversions with round-towards-zero, the
// FCVTZ* semantics. Rust's `as` casts saturate and map NaN to zero, which
// is exactly the architectural behaviour.

pub extern "C" fn f32_to_s32(bits: u64) -> u64 {
    f32::from_bits(bits as u32) as i32 as u32 as u64
}

pub extern "C" fn f32_to_u32(bits: u64) -> u64 {
    u64::from(f32::from_bits(bits as u32) as u32)
}

pub extern "C" fn f32_to_s64(bits: u64) -> u64 {
    f32::from_bits(bits as u32) as i64 as u64
}

pub extern "C" fn f32_to_u64(bits: u64) -> u64 {
    f32::from_bits(bits as u32) as u64
}

pub extern "C" fn f64_to_s32(bits: u64) -> u64 {
    f64::from_bits(bits) as i32 as u32 as u64
}

pub extern "C" fn f64_to_u32(bits: u64) -> u64 {
    u64::from(f64::from_bits(bits) as u32)
}

pub extern "C" fn f64_to_s64(bits: u64) -> u64 {
    f64::from_bits(bits) as i64 as u64
}

pub extern "C" fn f64_to_u64(bits: u64) -> u64 {
    f64::from_bits(bits) as u64
}

// Integer -> float conversions honouring the translated rounding mode.
// The natural cast rounds to nearest-even; the other modes adjust by one
// ulp when the cast was inexact in the wrong direction.

fn round_adjust_f64(exact_lo: bool, exact_hi: bool, rounded: f64, mode: RoundingMode) -> f64 {
    // `exact_lo`: rounded <= exact value; `exact_hi`: rounded >= exact.
    match mode {
        RoundingMode::TiesToEven => rounded,
        RoundingMode::TowardsPlusInfinity => {
            if !exact_hi {
                next_up_f64(rounded)
            } else {
                rounded
            }
        }
        RoundingMode::TowardsMinusInfinity => {
            if !exact_lo {
                next_down_f64(rounded)
            } else {
                rounded
            }
        }
        RoundingMode::TowardsZero => {
            if rounded > 0.0 && !exact_lo {
                next_down_f64(rounded)
            } else if rounded < 0.0 && !exact_hi {
                next_up_f64(rounded)
            } else {
                rounded
            }
        }
    }
}

fn next_up_f64(x: f64) -> f64 {
    if x == f64::INFINITY {
        return x;
    }
    let bits = x.to_bits();
    let next = if x >= 0.0 {
        if x == 0.0 {
            1
        } else {
            bits + 1
        }
    } else {
        bits - 1
    };
    f64::from_bits(next)
}

fn next_down_f64(x: f64) -> f64 {
    -next_up_f64(-x)
}

fn i64_to_f64_mode(value: i64, mode: RoundingMode) -> f64 {
    let rounded = value as f64;
    // Compare exactly: within +-2^53 every i64 converts exactly anyway.
    let back = rounded as i128;
    let exact_lo = back <= i128::from(value);
    let exact_hi = back >= i128::from(value);
    round_adjust_f64(exact_lo, exact_hi, rounded, mode)
}

fn u64_to_f64_mode(value: u64, mode: RoundingMode) -> f64 {
    let rounded = value as f64;
    let back = rounded as u128;
    let exact_lo = back <= u128::from(value);
    let exact_hi = back >= u128::from(value);
    round_adjust_f64(exact_lo, exact_hi, rounded, mode)
}

fn f64_to_f32_mode(value: f64, mode: RoundingMode) -> f32 {
    let rounded = value as f32;
    if rounded.is_infinite() && value.is_finite() {
        // Overflowed the single range: pick the mode's boundary result.
        return match mode {
            RoundingMode::TiesToEven => rounded,
            RoundingMode::TowardsZero => f32::MAX.copysign(rounded),
            RoundingMode::TowardsPlusInfinity if rounded < 0.0 => f32::MIN,
            RoundingMode::TowardsMinusInfinity if rounded > 0.0 => f32::MAX,
            _ => rounded,
        };
    }
    let back = f64::from(rounded);
    let (exact_lo, exact_hi) = (back <= value, back >= value);
    match mode {
        RoundingMode::TiesToEven => rounded,
        RoundingMode::TowardsPlusInfinity if !exact_hi => next_up_f32(rounded),
        RoundingMode::TowardsMinusInfinity if !exact_lo => next_down_f32(rounded),
        RoundingMode::TowardsZero if rounded > 0.0 && !exact_lo => next_down_f32(rounded),
        RoundingMode::TowardsZero if rounded < 0.0 && !exact_hi => next_up_f32(rounded),
        _ => rounded,
    }
}

fn next_up_f32(x: f32) -> f32 {
    if x == f32::INFINITY {
        return x;
    }
    let bits = x.to_bits();
    let next = if x >= 0.0 {
        if x == 0.0 {
            1
        } else {
            bits + 1
        }
    } else {
        bits - 1
    };
    f32::from_bits(next)
}

fn next_down_f32(x: f32) -> f32 {
    -next_up_f32(-x)
}

macro_rules! int_to_fp {
    ($name:ident, $src:ty, signed: $signed:expr, f32) => {
        pub extern "C" fn $name(bits: u64, rounding: u64) -> u64 {
            let mode = RoundingMode::from_fpcr_bits(rounding as u8);
            let value = bits as $src;
            // Directed modes compose exactly through the double step.
            let wide = if $signed {
                i64_to_f64_mode(value as i64, mode)
            } else {
                u64_to_f64_mode(value as u64, mode)
            };
            u64::from(f64_to_f32_mode(wide, mode).to_bits())
        }
    };
    ($name:ident, $src:ty, signed: $signed:expr, f64) => {
        pub extern "C" fn $name(bits: u64, rounding: u64) -> u64 {
            let mode = RoundingMode::from_fpcr_bits(rounding as u8);
            let value = bits as $src;
            let result = if $signed {
                i64_to_f64_mode(value as i64, mode)
            } else {
                u64_to_f64_mode(value as u64, mode)
            };
            result.to_bits()
        }
    };
}

int_to_fp!(s32_to_f32, i32, signed: true, f32);
int_to_fp!(u32_to_f32, u32, signed: false, f32);
int_to_fp!(s32_to_f64, i32, signed: true, f64);
int_to_fp!(u32_to_f64, u32, signed: false, f64);
int_to_fp!(s64_to_f32, i64, signed: true, f32);
int_to_fp!(u64_to_f32, u64, signed: false, f32);
int_to_fp!(s64_to_f64, i64, signed: true, f64);
int_to_fp!(u64_to_f64, u64, signed: false, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_conversions() {
        assert_eq!(f64_to_s32(f64::to_bits(1e20)), i32::MAX as u32 as u64);
        assert_eq!(f64_to_s32(f64::to_bits(-1e20)), i32::MIN as u32 as u64);
        assert_eq!(f64_to_s32(f64::to_bits(f64::NAN)), 0);
        assert_eq!(f64_to_u32(f64::to_bits(-1.0)), 0);
        assert_eq!(f32_to_s32(f32::to_bits(-2.9) as u64), (-2i32) as u32 as u64);
        assert_eq!(f64_to_u64(f64::to_bits(1.9)), 1);
    }

    #[test]
    fn fpcr_mxcsr_mapping() {
        // Round to nearest: bare masks.
        assert_eq!(mxcsr_from_fpcr(0), 0x1f80);
        // RP (+inf) -> MXCSR round-up (10).
        assert_eq!(mxcsr_from_fpcr(0b01 << 22) >> 13 & 3, 0b10);
        // RM (-inf) -> round-down (01).
        assert_eq!(mxcsr_from_fpcr(0b10 << 22) >> 13 & 3, 0b01);
        // RZ.
        assert_eq!(mxcsr_from_fpcr(0b11 << 22) >> 13 & 3, 0b11);
        // FZ sets FTZ and DAZ.
        let fz = mxcsr_from_fpcr(1 << 24);
        assert_ne!(fz & 1 << 15, 0);
        assert_ne!(fz & 1 << 6, 0);
    }

    #[test]
    fn fpsr_mapping_roundtrip() {
        // Inexact (PE) is MXCSR bit 5, FPSR IXC bit 4.
        assert_eq!(fpsr_from_mxcsr(1 << 5), 1 << 4);
        assert_eq!(mxcsr_status_from_fpsr(1 << 4), 1 << 5);
        // Invalid op.
        assert_eq!(fpsr_from_mxcsr(1), 1);
        // Denormal <-> IDC (bit 7).
        assert_eq!(fpsr_from_mxcsr(2), 1 << 7);
    }

    #[test]
    fn mode_aware_integer_conversions() {
        // 2^63 - 1 rounds differently per mode in f64.
        let value = u64::from(i64::MAX as u64);
        let rn = s64_to_f64(value, 0b00);
        let rz = s64_to_f64(value, 0b11);
        let rm = s64_to_f64(value, 0b10);
        assert_eq!(f64::from_bits(rn), 9.223372036854776e18);
        assert!(f64::from_bits(rz) < f64::from_bits(rn));
        assert_eq!(rz, rm);
        // Exact values convert identically in every mode.
        for mode in 0..4u64 {
            assert_eq!(f64::from_bits(s64_to_f64(1024, mode)), 1024.0);
        }
    }
}
