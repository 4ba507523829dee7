//! Body of the bootstrap kernel, run by one block per ciphertext.

use super::scratch::{PbsScratch, ScratchPlacement};
use crate::c64;
use crate::decomposition::SignedDecomposer;
use crate::device::ThreadBlock;
use crate::error::{DeviceError, DeviceResult};
use crate::fft::{add_backward_as_torus, forward_as_integer, FftTables};
use crate::numeric::UnsignedTorus;
use crate::parameters::SupportedPolynomialSize;

/// Read-only inputs shared by every block of a launch.
pub(crate) struct PbsKernelInputs<'a, Scalar: UnsignedTorus> {
    pub lut_vector: &'a [Scalar],
    pub lut_vector_indexes: &'a [u32],
    pub lwe_array_in: &'a [Scalar],
    pub bootstrapping_key: &'a [c64],
    pub tables: &'a FftTables,
    pub degree: SupportedPolynomialSize,
    pub lwe_dimension: usize,
    pub num_lut_vectors: usize,
    pub decomposer: SignedDecomposer<Scalar>,
}

/// Coefficient `i` of `poly * X^a`, for `a` in `[0, 2N)`.
#[inline]
pub(crate) fn monomial_mul_coefficient<Scalar: UnsignedTorus>(
    poly: &[Scalar],
    i: usize,
    a: usize,
) -> Scalar {
    let n = poly.len();
    // X^N = -1
    let (a, negate) = if a >= n { (a - n, true) } else { (a, false) };
    let (value, wrapped) = if i >= a {
        (poly[i - a], false)
    } else {
        (poly[i + n - a], true)
    };
    if negate != wrapped {
        value.wrapping_neg()
    } else {
        value
    }
}

/// Offset of the key polynomial `(input bit, level, row, column)` in the fourier key.
#[inline]
fn key_polynomial_offset(
    fourier_size: usize,
    level_count: usize,
    input_bit: usize,
    level: usize,
    row: usize,
    column: usize,
) -> usize {
    (((input_bit * level_count + level) * 2 + row) * 2 + column) * fourier_size
}

/// Bootstrap the sample of index `block.block_idx()` into `lwe_out`.
///
/// `shared` and `global` hold the on-chip and the global scratch of the sample as laid out by
/// `P`. Every block goes through the same sequence of barriers whatever its data.
pub(crate) fn device_programmable_bootstrap<Scalar: UnsignedTorus, P: ScratchPlacement>(
    block: &ThreadBlock,
    inputs: &PbsKernelInputs<'_, Scalar>,
    lwe_out: &mut [Scalar],
    shared: &mut [u8],
    global: &mut [u8],
) -> DeviceResult<()> {
    let sample = block.block_idx();
    let polynomial_size = inputs.degree.polynomial_size().0;
    let fourier_size = inputs.degree.fourier_polynomial_size().0;
    let log_modulus = inputs.degree.polynomial_size().log2() + 1;
    let two_n = 2 * polynomial_size;
    let lwe_size = inputs.lwe_dimension + 1;
    let level_count = inputs.decomposer.level_count;
    debug_assert_eq!(lwe_out.len(), polynomial_size + 1);

    let lwe_in = &inputs.lwe_array_in[sample * lwe_size..(sample + 1) * lwe_size];
    let lut_index = inputs.lut_vector_indexes[sample] as usize;
    if lut_index >= inputs.num_lut_vectors {
        return Err(DeviceError::DeviceApiFailure(format!(
            "sample {sample} selects LUT {lut_index}, only {} LUT(s) provided",
            inputs.num_lut_vectors
        )));
    }
    let lut = &inputs.lut_vector[lut_index * two_n..(lut_index + 1) * two_n];
    let (lut_mask, lut_body) = lut.split_at(polynomial_size);

    let PbsScratch {
        accumulator,
        rotated,
        digits,
        level_fourier,
        mask_result,
        body_result,
    } = PbsScratch::<Scalar>::carve::<P>(inputs.degree, shared, global)?;

    // Initialize the accumulator with LUT * X^{-b}
    let b_hat = lwe_in[inputs.lwe_dimension].modulus_switch(log_modulus);
    let rotation = (two_n - b_hat) % two_n;
    {
        let (acc_mask, acc_body) = accumulator.split_at_mut(polynomial_size);
        block.for_each_strided(polynomial_size, |j| {
            acc_mask[j] = monomial_mul_coefficient(lut_mask, j, rotation);
            acc_body[j] = monomial_mul_coefficient(lut_body, j, rotation);
        });
    }
    block.sync_threads();

    for (input_bit, a) in lwe_in[..inputs.lwe_dimension].iter().enumerate() {
        let a_hat = a.modulus_switch(log_modulus);

        // acc * X^a - acc, a null rotation included
        {
            let (acc_mask, acc_body) = accumulator.split_at(polynomial_size);
            let (rot_mask, rot_body) = rotated.split_at_mut(polynomial_size);
            block.for_each_strided(polynomial_size, |j| {
                rot_mask[j] =
                    monomial_mul_coefficient(acc_mask, j, a_hat).wrapping_sub(acc_mask[j]);
                rot_body[j] =
                    monomial_mul_coefficient(acc_body, j, a_hat).wrapping_sub(acc_body[j]);
            });
        }
        block.sync_threads();

        inputs.decomposer.init_states(block, rotated);
        block.for_each_strided(fourier_size, |j| {
            mask_result[j] = c64::default();
            body_result[j] = c64::default();
        });
        block.sync_threads();

        // Digits come out least significant first, i.e. from the last level of the key
        for level in (0..level_count).rev() {
            inputs.decomposer.next_level(block, rotated, digits);
            for row in 0..2 {
                forward_as_integer(
                    block,
                    inputs.tables,
                    level_fourier,
                    &digits[row * polynomial_size..(row + 1) * polynomial_size],
                );
                let offset = |column| {
                    key_polynomial_offset(fourier_size, level_count, input_bit, level, row, column)
                };
                let to_mask = &inputs.bootstrapping_key[offset(0)..offset(0) + fourier_size];
                let to_body = &inputs.bootstrapping_key[offset(1)..offset(1) + fourier_size];
                block.for_each_strided(fourier_size, |j| {
                    mask_result[j] += level_fourier[j] * to_mask[j];
                    body_result[j] += level_fourier[j] * to_body[j];
                });
                block.sync_threads();
            }
        }

        let (acc_mask, acc_body) = accumulator.split_at_mut(polynomial_size);
        add_backward_as_torus(block, inputs.tables, acc_mask, mask_result);
        add_backward_as_torus(block, inputs.tables, acc_body, body_result);
    }

    // Sample extraction of the constant coefficient
    let (acc_mask, acc_body) = accumulator.split_at(polynomial_size);
    block.for_each_strided(polynomial_size + 1, |k| {
        lwe_out[k] = match k {
            0 => acc_mask[0],
            k if k == polynomial_size => acc_body[0],
            k => acc_mask[polynomial_size - k].wrapping_neg(),
        };
    });
    block.sync_threads();
    Ok(())
}
