//! Fixed-width bit-vector constant values.
//!
//! Every constant carries an explicit width in bits and is kept masked to
//! that width. Signed operations interpret the value as two's complement.

use num_bigint::{BigInt, BigUint};
use num_traits::{One, Zero};

/// The type of an expression is simply its width, in bits.
pub type Width = u32;

pub const WIDTH_BOOL: Width = 1;
pub const WIDTH_8: Width = 8;
pub const WIDTH_16: Width = 16;
pub const WIDTH_32: Width = 32;
pub const WIDTH_64: Width = 64;

/// A bit-vector literal: `width` bits of `bits`, always masked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitVecValue {
    width: Width,
    bits: BigUint,
}

fn mask(width: Width) -> BigUint {
    (BigUint::one() << width) - BigUint::one()
}

impl BitVecValue {
    pub fn new(bits: BigUint, width: Width) -> Self {
        assert!(width > 0, "zero-width constant");
        Self {
            bits: bits & mask(width),
            width,
        }
    }

    pub fn from_u64(v: u64, width: Width) -> Self {
        Self::new(BigUint::from(v), width)
    }

    pub fn from_bool(b: bool) -> Self {
        Self::from_u64(u64::from(b), WIDTH_BOOL)
    }

    pub fn width(&self) -> Width {
        self.width
    }

    pub fn bits(&self) -> &BigUint {
        &self.bits
    }

    /// The low 64 bits of the value.
    pub fn as_u64(&self) -> u64 {
        self.bits.iter_u64_digits().next().unwrap_or(0)
    }

    pub fn is_zero(&self) -> bool {
        self.bits.is_zero()
    }

    pub fn is_one(&self) -> bool {
        self.bits.is_one()
    }

    pub fn is_all_ones(&self) -> bool {
        self.bits == mask(self.width)
    }

    pub fn is_true(&self) -> bool {
        self.width == WIDTH_BOOL && !self.is_zero()
    }

    pub fn is_false(&self) -> bool {
        self.width == WIDTH_BOOL && self.is_zero()
    }

    /// Two's-complement interpretation.
    pub fn to_signed(&self) -> BigInt {
        let sign_bit = (&self.bits >> (self.width - 1)) & BigUint::one();
        if sign_bit.is_zero() {
            BigInt::from(self.bits.clone())
        } else {
            BigInt::from(self.bits.clone()) - (BigInt::one() << self.width)
        }
    }

    fn from_signed(v: BigInt, width: Width) -> Self {
        let modulus = BigInt::one() << width;
        let wrapped = ((v % &modulus) + &modulus) % &modulus;
        Self::new(wrapped.to_biguint().expect("wrapped value is non-negative"), width)
    }

    /// A stable per-process hash of the value, folded into expression hashes.
    pub fn hash_value(&self) -> u64 {
        let mut h = u64::from(self.width).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        for d in self.bits.iter_u64_digits() {
            h = h.rotate_left(13) ^ d.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        }
        h
    }

    // Arithmetic. All binary operations require equal widths.

    pub fn add(&self, o: &Self) -> Self {
        debug_assert_eq!(self.width, o.width);
        Self::new(&self.bits + &o.bits, self.width)
    }

    pub fn sub(&self, o: &Self) -> Self {
        debug_assert_eq!(self.width, o.width);
        Self::new(&self.bits + mask(self.width) + BigUint::one() - &o.bits, self.width)
    }

    pub fn mul(&self, o: &Self) -> Self {
        debug_assert_eq!(self.width, o.width);
        Self::new(&self.bits * &o.bits, self.width)
    }

    /// Unsigned division. The divisor must be non-zero.
    pub fn udiv(&self, o: &Self) -> Self {
        debug_assert_eq!(self.width, o.width);
        debug_assert!(!o.is_zero(), "udiv by zero");
        Self::new(&self.bits / &o.bits, self.width)
    }

    pub fn urem(&self, o: &Self) -> Self {
        debug_assert_eq!(self.width, o.width);
        debug_assert!(!o.is_zero(), "urem by zero");
        Self::new(&self.bits % &o.bits, self.width)
    }

    /// Signed division, truncating toward zero.
    pub fn sdiv(&self, o: &Self) -> Self {
        debug_assert_eq!(self.width, o.width);
        debug_assert!(!o.is_zero(), "sdiv by zero");
        Self::from_signed(self.to_signed() / o.to_signed(), self.width)
    }

    /// Signed remainder; the result takes the sign of the dividend.
    pub fn srem(&self, o: &Self) -> Self {
        debug_assert_eq!(self.width, o.width);
        debug_assert!(!o.is_zero(), "srem by zero");
        Self::from_signed(self.to_signed() % o.to_signed(), self.width)
    }

    pub fn and(&self, o: &Self) -> Self {
        debug_assert_eq!(self.width, o.width);
        Self::new(&self.bits & &o.bits, self.width)
    }

    pub fn or(&self, o: &Self) -> Self {
        debug_assert_eq!(self.width, o.width);
        Self::new(&self.bits | &o.bits, self.width)
    }

    pub fn xor(&self, o: &Self) -> Self {
        debug_assert_eq!(self.width, o.width);
        Self::new(&self.bits ^ &o.bits, self.width)
    }

    /// Logical shift left; shifts of `width` or more produce zero.
    pub fn shl(&self, amount: u64) -> Self {
        if amount >= u64::from(self.width) {
            Self::from_u64(0, self.width)
        } else {
            Self::new(&self.bits << amount, self.width)
        }
    }

    /// Logical shift right; shifts of `width` or more produce zero.
    pub fn lshr(&self, amount: u64) -> Self {
        if amount >= u64::from(self.width) {
            Self::from_u64(0, self.width)
        } else {
            Self::new(&self.bits >> amount, self.width)
        }
    }

    /// Arithmetic shift right; the sign bit fills in from the left.
    pub fn ashr(&self, amount: u64) -> Self {
        let amount = amount.min(u64::from(self.width));
        Self::from_signed(self.to_signed() >> amount, self.width)
    }

    pub fn not(&self) -> Self {
        Self::new(&self.bits ^ mask(self.width), self.width)
    }

    pub fn neg(&self) -> Self {
        Self::from_u64(0, self.width).sub(self)
    }

    pub fn zext(&self, width: Width) -> Self {
        debug_assert!(width >= self.width);
        Self::new(self.bits.clone(), width)
    }

    pub fn sext(&self, width: Width) -> Self {
        debug_assert!(width >= self.width);
        Self::from_signed(self.to_signed(), width)
    }

    pub fn extract(&self, offset: u32, width: Width) -> Self {
        debug_assert!(offset + width <= self.width);
        Self::new(&self.bits >> offset, width)
    }

    /// `self` supplies the high bits, `lo` the low bits.
    pub fn concat(&self, lo: &Self) -> Self {
        Self::new((&self.bits << lo.width) | &lo.bits, self.width + lo.width)
    }

    // Comparisons.

    pub fn eq_value(&self, o: &Self) -> bool {
        debug_assert_eq!(self.width, o.width);
        self.bits == o.bits
    }

    pub fn ult(&self, o: &Self) -> bool {
        debug_assert_eq!(self.width, o.width);
        self.bits < o.bits
    }

    pub fn ule(&self, o: &Self) -> bool {
        debug_assert_eq!(self.width, o.width);
        self.bits <= o.bits
    }

    pub fn slt(&self, o: &Self) -> bool {
        debug_assert_eq!(self.width, o.width);
        self.to_signed() < o.to_signed()
    }

    pub fn sle(&self, o: &Self) -> bool {
        debug_assert_eq!(self.width, o.width);
        self.to_signed() <= o.to_signed()
    }
}

impl std::fmt::Display for BitVecValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:w{}", self.bits, self.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: u64, w: Width) -> BitVecValue {
        BitVecValue::from_u64(x, w)
    }

    #[test]
    fn wrapping_arithmetic() {
        assert_eq!(v(250, 8).add(&v(10, 8)), v(4, 8));
        assert_eq!(v(3, 8).sub(&v(5, 8)), v(254, 8));
        assert_eq!(v(16, 8).mul(&v(17, 8)), v(16, 8));
        assert_eq!(v(5, 8).neg(), v(251, 8));
    }

    #[test]
    fn signed_division_truncates_toward_zero() {
        // -7 / 2 == -3, -7 % 2 == -1
        assert_eq!(v(249, 8).sdiv(&v(2, 8)), v(253, 8));
        assert_eq!(v(249, 8).srem(&v(2, 8)), v(255, 8));
        assert_eq!(v(7, 8).sdiv(&v(254, 8)), v(253, 8));
    }

    #[test]
    fn shifts() {
        assert_eq!(v(1, 8).shl(3), v(8, 8));
        assert_eq!(v(1, 8).shl(8), v(0, 8));
        assert_eq!(v(0x80, 8).lshr(7), v(1, 8));
        assert_eq!(v(0x80, 8).ashr(7), v(0xff, 8));
        assert_eq!(v(0x80, 8).ashr(100), v(0xff, 8));
        assert_eq!(v(0x40, 8).ashr(6), v(1, 8));
    }

    #[test]
    fn casts_and_slices() {
        assert_eq!(v(0x80, 8).zext(16), v(0x80, 16));
        assert_eq!(v(0x80, 8).sext(16), v(0xff80, 16));
        assert_eq!(v(0xabcd, 16).extract(8, 8), v(0xab, 8));
        assert_eq!(v(0xab, 8).concat(&v(0xcd, 8)), v(0xabcd, 16));
    }

    #[test]
    fn signed_comparisons() {
        // 0xff is -1 as a signed byte
        assert!(v(0xff, 8).slt(&v(0, 8)));
        assert!(v(0, 8).sle(&v(1, 8)));
        assert!(!v(1, 8).slt(&v(0xff, 8)));
        assert!(v(0xff, 8).ult(&v(0xff, 8)) == false);
        assert!(v(1, 8).ult(&v(0xff, 8)));
    }

    #[test]
    fn hash_matches_equality() {
        assert_eq!(v(42, 8).hash_value(), v(42, 8).hash_value());
        assert_ne!(v(42, 8).hash_value(), v(42, 16).hash_value());
    }
}
