//! Signed gadget decomposition.

use crate::device::ThreadBlock;
use crate::numeric::UnsignedTorus;
use crate::parameters::{DecompositionBaseLog, DecompositionLevelCount};
use std::marker::PhantomData;

/// A structure which allows to decompose unsigned integers into a set of smaller terms.
///
/// The digits are balanced: they lie in $[-B/2, B/2]$ and are returned in two's complement,
/// from the least significant level to the most significant one.
#[derive(Debug, Clone, Copy)]
pub struct SignedDecomposer<Scalar: UnsignedTorus> {
    pub(crate) base_log: usize,
    pub(crate) level_count: usize,
    integer_type: PhantomData<Scalar>,
}

impl<Scalar: UnsignedTorus> SignedDecomposer<Scalar> {
    /// Create a new decomposer.
    ///
    /// # Panics
    ///
    /// Panics if `base_log * level_count` does not leave at least one bit of the integer type
    /// out of the decomposition.
    pub fn new(base_log: DecompositionBaseLog, level_count: DecompositionLevelCount) -> Self {
        debug_assert!(
            base_log.0 * level_count.0 < Scalar::BITS,
            "Decomposed bits exceeds the size of the integer to be decomposed"
        );
        Self {
            base_log: base_log.0,
            level_count: level_count.0,
            integer_type: PhantomData,
        }
    }

    /// Return the closest value representable by the decomposition.
    #[inline]
    pub fn closest_representable(&self, input: Scalar) -> Scalar {
        // The least significant bits the decomposition does not represent
        let non_rep_bit_count: usize = Scalar::BITS - self.level_count * self.base_log;
        let non_rep_mask = Scalar::ONE << (non_rep_bit_count - 1);
        let non_rep_bits = input & non_rep_mask;
        // Round with the msb of the non representable bits
        let non_rep_msb = non_rep_bits >> (non_rep_bit_count - 1);
        let res = input >> non_rep_bit_count;
        let res = res + non_rep_msb;
        res << non_rep_bit_count
    }

    /// Initial state of the decomposition of `input`: the rounded value, aligned on the least
    /// significant digit.
    #[inline]
    pub fn init_state(&self, input: Scalar) -> Scalar {
        self.closest_representable(input) >> (Scalar::BITS - self.base_log * self.level_count)
    }

    #[inline]
    fn mod_b_mask(&self) -> Scalar {
        (Scalar::ONE << self.base_log).wrapping_sub(Scalar::ONE)
    }

    /// Extract the next digit from `state`, least significant first.
    #[inline]
    pub fn decompose_one_level(&self, state: &mut Scalar) -> Scalar {
        let res = *state & self.mod_b_mask();
        *state >>= self.base_log;
        let mut carry = (res.wrapping_sub(Scalar::ONE) | *state) & res;
        carry >>= self.base_log - 1;
        *state += carry;
        res.wrapping_sub(carry << self.base_log)
    }

    /// Gadget factor $q / B^{level}$ of a level, `level` going from 1 (most significant) to
    /// `level_count`.
    #[inline]
    pub fn gadget_factor(&self, level: usize) -> Scalar {
        Scalar::ONE << (Scalar::BITS - self.base_log * level)
    }

    /// Replace every coefficient of `buf` by its decomposition state.
    pub fn init_states(&self, block: &ThreadBlock, buf: &mut [Scalar]) {
        block.for_each_strided(buf.len(), |i| buf[i] = self.init_state(buf[i]));
        block.sync_threads();
    }

    /// Extract the next level of digits of every coefficient of `states` into `digits`.
    pub fn next_level(&self, block: &ThreadBlock, states: &mut [Scalar], digits: &mut [Scalar]) {
        debug_assert_eq!(states.len(), digits.len());
        block.for_each_strided(states.len(), |i| {
            digits[i] = self.decompose_one_level(&mut states[i]);
        });
        block.sync_threads();
    }
}
