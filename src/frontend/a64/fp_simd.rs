//! A64 scalar floating point and the vector subset.

use super::translate::TranslatorVisitor;
use super::{Reg, Vec as VecReg};
use crate::frontend::bits::*;
use crate::frontend::decoder::Matcher;
use crate::ir::{Cond, Value};

pub(super) fn fill_table(table: &mut Vec<Matcher<TranslatorVisitor>>) {
    // Scalar floating point.
    table.push(Matcher::new(
        "FP_1src",
        "0 0 0 11110 xx 1 xxxxxx 10000 xxxxx xxxxx",
        |v, w| v.fp_data_1src(w),
    ));
    table.push(Matcher::new(
        "FP_2src",
        "0 0 0 11110 xx 1 xxxxx xxxx 10 xxxxx xxxxx",
        |v, w| v.fp_data_2src(w),
    ));
    table.push(Matcher::new(
        "FCMP",
        "0 0 0 11110 xx 1 xxxxx 00 1000 xxxxx xxxxx",
        |v, w| v.fp_compare(w),
    ));
    table.push(Matcher::new(
        "FCSEL",
        "0 0 0 11110 xx 1 xxxxx xxxx 11 xxxxx xxxxx",
        |v, w| v.fp_csel(w),
    ));
    table.push(Matcher::new(
        "FP_int",
        "x 0 0 11110 xx 1 xx xxx 000000 xxxxx xxxxx",
        |v, w| v.fp_int(w),
    ));

    // Vector subset.
    table.push(Matcher::new(
        "SIMD_three_same",
        "0 x x 01110 xx 1 xxxxx xxxxx 1 xxxxx xxxxx",
        |v, w| v.simd_three_same(w),
    ));
    table.push(Matcher::new(
        "SIMD_movi",
        "0 x x 0111100000 xxx xxxx 01 xxxxx xxxxx",
        |v, w| v.simd_movi(w),
    ));
    table.push(Matcher::new(
        "SIMD_dup_gen",
        "0 x 0 01110000 xxxxx 0 0001 1 xxxxx xxxxx",
        |v, w| v.simd_dup_general(w),
    ));
    table.push(Matcher::new(
        "SIMD_ins_gen",
        "0 1 0 01110000 xxxxx 0 0011 1 xxxxx xxxxx",
        |v, w| v.simd_ins_general(w),
    ));
    table.push(Matcher::new(
        "SIMD_umov",
        "0 x 0 01110000 xxxxx 0 0111 1 xxxxx xxxxx",
        |v, w| v.simd_umov(w),
    ));
}

/// Floating-point operand width from the `type` field, or `None` for the
/// encodings this port does not carry (half precision).
fn fp_size(ty: u32) -> Option<u32> {
    match ty {
        0b00 => Some(32),
        0b01 => Some(64),
        _ => None,
    }
}

impl TranslatorVisitor {
    /// Static rounding mode for conversions, from the FPCR image in the
    /// location descriptor (RMode bits 23:22).
    fn rounding_mode(&self) -> u8 {
        (self.location.fpcr() >> 22 & 0b11) as u8
    }

    fn fp_data_1src(&mut self, w: u32) -> bool {
        let ty = field(w, 23, 22);
        let opcode = field(w, 20, 15);
        let vn = VecReg::from_bits(field(w, 9, 5));
        let vd = VecReg::from_bits(field(w, 4, 0));

        let Some(size) = fp_size(ty) else {
            return self.unallocated_encoding();
        };

        match opcode {
            // FMOV (register).
            0b000000 => {
                let value = self.v_scalar(size, vn);
                self.set_v_scalar(size, vd, value);
            }
            0b000001 => {
                let operand = self.v_scalar(size, vn);
                let result = self.ir.fp_abs(operand);
                self.set_v_scalar(size, vd, result);
            }
            0b000010 => {
                let operand = self.v_scalar(size, vn);
                let result = self.ir.fp_neg(operand);
                self.set_v_scalar(size, vd, result);
            }
            0b000011 => {
                let operand = self.v_scalar(size, vn);
                let result = self.ir.fp_sqrt(operand);
                self.set_v_scalar(size, vd, result);
            }
            // FCVT between single and double.
            0b000101 if size == 32 => {
                let operand = self.v_scalar(32, vn);
                let result = self.ir.fp_single_to_double(operand);
                self.set_v_scalar(64, vd, result);
            }
            0b000100 if size == 64 => {
                let operand = self.v_scalar(64, vn);
                let result = self.ir.fp_double_to_single(operand);
                self.set_v_scalar(32, vd, result);
            }
            _ => return self.unallocated_encoding(),
        }
        true
    }

    fn fp_data_2src(&mut self, w: u32) -> bool {
        let ty = field(w, 23, 22);
        let vm = VecReg::from_bits(field(w, 20, 16));
        let opcode = field(w, 15, 12);
        let vn = VecReg::from_bits(field(w, 9, 5));
        let vd = VecReg::from_bits(field(w, 4, 0));

        let Some(size) = fp_size(ty) else {
            return self.unallocated_encoding();
        };

        let operand1 = self.v_scalar(size, vn);
        let operand2 = self.v_scalar(size, vm);
        let result = match opcode {
            0b0000 => self.ir.fp_mul(operand1, operand2),
            0b0001 => self.ir.fp_div(operand1, operand2),
            0b0010 => self.ir.fp_add(operand1, operand2),
            0b0011 => self.ir.fp_sub(operand1, operand2),
            _ => return self.unallocated_encoding(),
        };
        self.set_v_scalar(size, vd, result);
        true
    }

    fn fp_compare(&mut self, w: u32) -> bool {
        let ty = field(w, 23, 22);
        let vm = VecReg::from_bits(field(w, 20, 16));
        let opcode2 = field(w, 4, 0);
        let vn = VecReg::from_bits(field(w, 9, 5));

        let Some(size) = fp_size(ty) else {
            return self.unallocated_encoding();
        };
        // opcode2: bit 3 selects compare-with-zero, bit 4 the signaling
        // variant (treated as quiet by this port's soft-float collaborator).
        if opcode2 & 0b00111 != 0 {
            return self.unallocated_encoding();
        }
        let with_zero = opcode2 & 0b01000 != 0;

        let operand1 = self.v_scalar(size, vn);
        let operand2 = if with_zero {
            self.i(size, 0)
        } else {
            self.v_scalar(size, vm)
        };
        let nzcv = self.ir.fp_compare(operand1, operand2);
        self.ir.a64_set_nzcv(nzcv);
        true
    }

    fn fp_csel(&mut self, w: u32) -> bool {
        let ty = field(w, 23, 22);
        let vm = VecReg::from_bits(field(w, 20, 16));
        let cond = Cond::from_bits(field(w, 15, 12));
        let vn = VecReg::from_bits(field(w, 9, 5));
        let vd = VecReg::from_bits(field(w, 4, 0));

        let Some(size) = fp_size(ty) else {
            return self.unallocated_encoding();
        };

        let operand1 = self.v_scalar(size, vn);
        let operand2 = self.v_scalar(size, vm);
        let result = self.ir.conditional_select(cond, operand1, operand2);
        self.set_v_scalar(size, vd, result);
        true
    }

    fn fp_int(&mut self, w: u32) -> bool {
        let sf = bit(w, 31);
        let ty = field(w, 23, 22);
        let rmode = field(w, 20, 19);
        let opcode = field(w, 18, 16);
        let rn = field(w, 9, 5);
        let rd = field(w, 4, 0);

        let intsize = if sf { 64 } else { 32 };
        let Some(fltsize) = fp_size(ty) else {
            return self.unallocated_encoding();
        };

        match (rmode, opcode) {
            // FMOV general-register to/from vector.
            (0b00, 0b111) => {
                if intsize != fltsize {
                    return self.unallocated_encoding();
                }
                let gpr = Reg::from_bits(rn);
                let value = self.x(intsize, gpr);
                self.set_v_scalar(fltsize, VecReg::from_bits(rd), value);
            }
            (0b00, 0b110) => {
                if intsize != fltsize {
                    return self.unallocated_encoding();
                }
                let value = self.v_scalar(fltsize, VecReg::from_bits(rn));
                self.set_x(intsize, Reg::from_bits(rd), value);
            }
            // FCVTZS / FCVTZU.
            (0b11, 0b000) | (0b11, 0b001) => {
                let signed = opcode == 0b000;
                let operand = self.v_scalar(fltsize, VecReg::from_bits(rn));
                let result = self.ir.fp_to_fixed(operand, intsize, signed);
                self.set_x(intsize, Reg::from_bits(rd), result);
            }
            // SCVTF / UCVTF.
            (0b00, 0b010) | (0b00, 0b011) => {
                let signed = opcode == 0b010;
                let gpr = Reg::from_bits(rn);
                let operand = self.x(intsize, gpr);
                let rounding = self.rounding_mode();
                let result = self.ir.fixed_to_fp(operand, signed, fltsize, rounding);
                self.set_v_scalar(fltsize, VecReg::from_bits(rd), result);
            }
            _ => return self.unallocated_encoding(),
        }
        true
    }

    fn simd_three_same(&mut self, w: u32) -> bool {
        let q = bit(w, 30);
        let u = bit(w, 29);
        let size = field(w, 23, 22);
        let vm = VecReg::from_bits(field(w, 20, 16));
        let opcode = field(w, 15, 11);
        let vn = VecReg::from_bits(field(w, 9, 5));
        let vd = VecReg::from_bits(field(w, 4, 0));

        let operand1 = self.v(vn);
        let operand2 = self.v(vm);

        let result = match (u, opcode) {
            (false, 0b10000) => {
                if size == 0b11 && !q {
                    return self.reserved_value();
                }
                let esize = 8 << size;
                self.ir.vector_add(esize, operand1, operand2)
            }
            (true, 0b10000) => {
                if size == 0b11 && !q {
                    return self.reserved_value();
                }
                let esize = 8 << size;
                self.ir.vector_sub(esize, operand1, operand2)
            }
            (false, 0b00011) => match size {
                0b00 => self.ir.vector_and(operand1, operand2),
                0b01 => self.ir.vector_and_not(operand1, operand2),
                0b10 => self.ir.vector_or(operand1, operand2),
                _ => {
                    let inverted = self.ir.vector_not(operand2);
                    self.ir.vector_or(operand1, inverted)
                }
            },
            (true, 0b00011) if size == 0b00 => self.ir.vector_eor(operand1, operand2),
            _ => return self.unallocated_encoding(),
        };

        let result = if q {
            result
        } else {
            self.ir.vector_zero_upper(result)
        };
        self.set_v(vd, result);
        true
    }

    fn simd_movi(&mut self, w: u32) -> bool {
        let q = bit(w, 30);
        let op = bit(w, 29);
        let abc = field(w, 18, 16);
        let cmode = field(w, 15, 12);
        let defgh = field(w, 9, 5);
        let vd = VecReg::from_bits(field(w, 4, 0));

        // FMOV (vector, double-precision) needs the full quad.
        if op && cmode == 0b1111 && !q {
            return self.unallocated_encoding();
        }
        let imm8 = (abc << 5 | defgh) as u64;
        let imm64 = expand_imm(op, cmode, imm8);

        let low = self.ir.imm64(imm64);
        let mut vector = self.ir.zero_extend_long_to_quad(low);
        if q {
            let high = self.ir.imm64(imm64);
            vector = self.ir.vector_set_element(64, vector, 1, high);
        }
        self.set_v(vd, vector);
        true
    }

    fn simd_dup_general(&mut self, w: u32) -> bool {
        let q = bit(w, 30);
        let imm5 = field(w, 20, 16);
        let rn = Reg::from_bits(field(w, 9, 5));
        let vd = VecReg::from_bits(field(w, 4, 0));

        let Some(esize_log2) = (0..4).find(|&i| imm5 & (1 << i) != 0) else {
            return self.reserved_value();
        };
        let esize = 8u32 << esize_log2;
        if esize == 64 && !q {
            return self.reserved_value();
        }

        let datasize = if q { 128 } else { 64 };
        let lanes = datasize / esize;

        let full = self.x(esize.max(32).min(64), rn);
        let element = match esize {
            8 => self.ir.least_significant_byte(full),
            16 => self.ir.least_significant_half(full),
            _ => full,
        };

        let mut vector = self.ir.zero_vector();
        for lane in 0..lanes {
            vector = self
                .ir
                .vector_set_element(esize, vector, lane as u8, element);
        }
        self.set_v(vd, vector);
        true
    }

    fn simd_ins_general(&mut self, w: u32) -> bool {
        let imm5 = field(w, 20, 16);
        let rn = Reg::from_bits(field(w, 9, 5));
        let vd = VecReg::from_bits(field(w, 4, 0));

        let Some(esize_log2) = (0..4).find(|&i| imm5 & (1 << i) != 0) else {
            return self.reserved_value();
        };
        let esize = 8u32 << esize_log2;
        let index = (imm5 >> (esize_log2 + 1)) as u8;

        let full = self.x(esize.max(32).min(64), rn);
        let element = match esize {
            8 => self.ir.least_significant_byte(full),
            16 => self.ir.least_significant_half(full),
            _ => full,
        };

        let vector = self.v(vd);
        let result = self.ir.vector_set_element(esize, vector, index, element);
        self.set_v(vd, result);
        true
    }

    fn simd_umov(&mut self, w: u32) -> bool {
        let q = bit(w, 30);
        let imm5 = field(w, 20, 16);
        let vn = VecReg::from_bits(field(w, 9, 5));
        let rd = Reg::from_bits(field(w, 4, 0));

        let Some(esize_log2) = (0..4).find(|&i| imm5 & (1 << i) != 0) else {
            return self.reserved_value();
        };
        let esize = 8u32 << esize_log2;
        // UMOV to W for 8/16/32-bit lanes, to X only for 64-bit lanes.
        if (esize == 64) != q {
            return self.unallocated_encoding();
        }
        let index = (imm5 >> (esize_log2 + 1)) as u8;
        let regsize = if q { 64 } else { 32 };

        let vector = self.v(vn);
        let element = self.ir.vector_get_element(esize, vector, index);
        let extended = self.zero_extend(element, regsize);
        self.set_x(regsize, rd, extended);
        true
    }
}

/// The AdvSIMDExpandImm() pseudocode: expands the 8 modified-immediate bits
/// into a 64-bit pattern according to cmode/op. With op set, cmodes other
/// than 111x are the inverted (MVNI) forms.
fn expand_imm(op: bool, cmode: u32, imm8: u64) -> u64 {
    let expanded = match cmode >> 1 {
        0b000 => replicate64(imm8, 32),
        0b001 => replicate64(imm8 << 8, 32),
        0b010 => replicate64(imm8 << 16, 32),
        0b011 => replicate64(imm8 << 24, 32),
        0b100 => replicate64(imm8, 16),
        0b101 => replicate64(imm8 << 8, 16),
        0b110 => {
            if cmode & 1 == 0 {
                replicate64(imm8 << 8 | 0xff, 32)
            } else {
                replicate64(imm8 << 16 | 0xffff, 32)
            }
        }
        _ => {
            let a = imm8 >> 7 & 1;
            let b = imm8 >> 6 & 1;
            let cdefgh = imm8 & 0x3f;
            return match (cmode & 1, op) {
                (0, false) => replicate64(imm8, 8),
                (0, true) => {
                    // MOVI (64-bit): each immediate bit becomes a full byte.
                    let mut result = 0u64;
                    for i in 0..8 {
                        if imm8 & (1 << i) != 0 {
                            result |= 0xffu64 << (i * 8);
                        }
                    }
                    result
                }
                (1, false) => {
                    // FMOV (vector, single-precision immediate).
                    let word = a << 31
                        | (b ^ 1) << 30
                        | (if b != 0 { 0x1f } else { 0 }) << 25
                        | cdefgh << 19;
                    replicate64(word, 32)
                }
                (1, true) => {
                    // FMOV (vector, double-precision immediate).
                    a << 63 | (b ^ 1) << 62 | (if b != 0 { 0xff } else { 0 }) << 54 | cdefgh << 48
                }
                _ => unreachable!("cmode & 1 is always 0 or 1"),
            };
        }
    };
    if op {
        !expanded
    } else {
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movi_byte_expansion() {
        // op=1, cmode=1110: bits to bytes.
        assert_eq!(expand_imm(true, 0b1110, 0b1010_0001), 0xff00_ff00_0000_00ff);
    }

    #[test]
    fn movi_shifted_word() {
        assert_eq!(expand_imm(false, 0b0100, 0x12), 0x0012_0000_0012_0000);
        // MVNI inverts.
        assert_eq!(expand_imm(true, 0b0100, 0x12), !0x0012_0000_0012_0000u64);
    }

    #[test]
    fn fmov_double_immediate() {
        // imm8 0b01110000 -> 1.0
        assert_eq!(expand_imm(true, 0b1111, 0b0111_0000), 0x3ff0_0000_0000_0000);
    }
}
