//! Integer types usable as torus elements by the device kernels.

use bytemuck::Pod;
use std::fmt::{Binary, Debug};
use std::ops::{Add, AddAssign, BitAnd, BitOr, Shl, Shr, ShrAssign, Sub};

/// A trait shared by the unsigned integer types a ciphertext can be made of.
///
/// The value `x` of such an integer represents the torus element $x / 2^{BITS}$.
pub trait UnsignedTorus:
    TorusCoefficient
    + Default
    + Debug
    + Binary
    + Eq
    + Ord
    + Send
    + Sync
    + Add<Self, Output = Self>
    + AddAssign<Self>
    + Sub<Self, Output = Self>
    + BitAnd<Self, Output = Self>
    + BitOr<Self, Output = Self>
    + Shl<usize, Output = Self>
    + Shr<usize, Output = Self>
    + ShrAssign<usize>
    + 'static
{
    const BITS: usize;
    const ZERO: Self;
    const ONE: Self;
    const MAX: Self;

    #[must_use]
    fn wrapping_add(self, other: Self) -> Self;
    #[must_use]
    fn wrapping_sub(self, other: Self) -> Self;
    #[must_use]
    fn wrapping_neg(self) -> Self;
    #[must_use]
    fn wrapping_mul(self, other: Self) -> Self;

    /// Interpret the value as a signed integer of the same width, as a float.
    fn into_signed_f64(self) -> f64;

    /// Round the fractional part of `x`, scaled by $2^{BITS}$, to the closest integer.
    fn from_torus(x: f64) -> Self;

    /// Map the value onto $\mathbb{Z}/2^{log\_modulus}\mathbb{Z}$, rounding to the closest element.
    fn modulus_switch(self, log_modulus: usize) -> usize;

    fn cast_from_u64(value: u64) -> Self;

    fn cast_into_u64(self) -> u64;
}

macro_rules! implement {
    ($Type: ty, $Signed: ty, $bits: expr) => {
        impl UnsignedTorus for $Type {
            const BITS: usize = $bits;
            const ZERO: Self = 0;
            const ONE: Self = 1;
            const MAX: Self = <$Type>::MAX;

            #[inline]
            fn wrapping_add(self, other: Self) -> Self {
                self.wrapping_add(other)
            }
            #[inline]
            fn wrapping_sub(self, other: Self) -> Self {
                self.wrapping_sub(other)
            }
            #[inline]
            fn wrapping_neg(self) -> Self {
                self.wrapping_neg()
            }
            #[inline]
            fn wrapping_mul(self, other: Self) -> Self {
                self.wrapping_mul(other)
            }
            #[inline]
            fn into_signed_f64(self) -> f64 {
                self as $Signed as f64
            }
            #[inline]
            fn from_torus(x: f64) -> Self {
                let fract = x - x.round();
                // i128 keeps +2^(BITS-1) exact, the cast then wraps it around
                (fract * 2.0_f64.powi($bits)).round() as i128 as $Type
            }
            #[inline]
            fn modulus_switch(self, log_modulus: usize) -> usize {
                let shifted = self >> ($bits - log_modulus - 1);
                (((shifted + 1) >> 1) as usize) & ((1 << log_modulus) - 1)
            }
            #[inline]
            fn cast_from_u64(value: u64) -> Self {
                value as $Type
            }
            #[inline]
            fn cast_into_u64(self) -> u64 {
                self as u64
            }
        }
    };
}

implement!(u32, i32, 32);
implement!(u64, i64, 64);

/// Coefficient types accepted by the bootstrapping key conversion.
///
/// Signed and unsigned integers of the same width denote the same torus element.
pub trait TorusCoefficient: Pod + Send + Sync + 'static {
    /// Torus element in $[-1/2, 1/2)$ represented by the coefficient.
    fn to_torus_f64(self) -> f64;
}

macro_rules! implement_coefficient {
    ($Type: ty, $Signed: ty, $bits: expr) => {
        impl TorusCoefficient for $Type {
            #[inline]
            fn to_torus_f64(self) -> f64 {
                self as $Signed as f64 / 2.0_f64.powi($bits)
            }
        }
    };
}

implement_coefficient!(u32, i32, 32);
implement_coefficient!(i32, i32, 32);
implement_coefficient!(u64, i64, 64);
implement_coefficient!(i64, i64, 64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modulus_switch_rounds_to_closest() {
        // 2N = 1024, one step is 2^54 on a 64 bits torus
        let step = 1u64 << 54;
        assert_eq!(0u64.modulus_switch(10), 0);
        assert_eq!((3 * step).modulus_switch(10), 3);
        assert_eq!((3 * step + step / 2 - 1).modulus_switch(10), 3);
        assert_eq!((3 * step + step / 2).modulus_switch(10), 4);
        // values just below 1 wrap around to 0
        assert_eq!(u64::MAX.modulus_switch(10), 0);
        assert_eq!((1023 * step).modulus_switch(10), 1023);
        assert_eq!((1u32 << 22).modulus_switch(10), 1);
    }

    #[test]
    fn torus_conversions() {
        assert_eq!(u64::from_torus(0.25), 1 << 62);
        assert_eq!(u64::from_torus(-0.25), 3 << 62);
        assert_eq!(u64::from_torus(0.5), 1 << 63);
        assert_eq!(u64::from_torus(17.75), 3 << 62);
        assert_eq!(u32::from_torus(-0.5), 1 << 31);
        assert_eq!(u32::from_torus(1e-12), 0);
        assert_eq!((3u64 << 62).into_signed_f64(), -(2.0f64.powi(62)));
        assert_eq!(u32::MAX.to_torus_f64(), -(2.0f64.powi(-32)));
        assert_eq!((-1i32).to_torus_f64(), u32::MAX.to_torus_f64());
        assert_eq!((1i64 << 62).to_torus_f64(), 0.25);
    }
}
