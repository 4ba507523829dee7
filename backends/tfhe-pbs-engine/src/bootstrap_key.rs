//! Conversion of a bootstrapping key to the fourier domain.
//!
//! Every polynomial of the key is folded into `N/2` complex values and rescaled to the torus
//! on the host, then a single launch transforms all of them in place on the device.

use crate::c64;
use crate::device::launch::launch_blocks;
use crate::device::memory::cast_device_slice_mut;
use crate::device::{DeviceManager, DeviceVec, LaunchConfig, StreamHandle};
use crate::error::{DeviceError, DeviceResult};
use crate::fft::{fold_torus, forward_in_place};
use crate::numeric::TorusCoefficient;
use crate::parameters::{
    DecompositionLevelCount, GlweDimension, LweDimension, PolynomialSize,
    SupportedPolynomialSize,
};
use rayon::prelude::*;
use std::mem::size_of;

/// Number of polynomials in a bootstrapping key of GLWE dimension 1.
pub fn bootstrap_key_polynomial_count(
    input_lwe_dim: LweDimension,
    l_gadget: DecompositionLevelCount,
) -> usize {
    input_lwe_dim.0 * l_gadget.0 * 4
}

/// Convert a bootstrapping key from the torus domain to the fourier domain.
///
/// `src` holds `input_lwe_dim * l_gadget * 4` polynomials of `polynomial_size` coefficients,
/// `dest` receives as many polynomials of `polynomial_size / 2` complex values. Both use the
/// `[input key bit][level][row][column]` ordering.
///
/// The conversion is enqueued on `stream`, `src` can be dropped as soon as this returns.
#[allow(clippy::too_many_arguments)]
pub fn convert_lwe_programmable_bootstrap_key_async<C: TorusCoefficient>(
    manager: &DeviceManager,
    stream: &StreamHandle,
    dest: &mut DeviceVec<c64>,
    src: &[C],
    input_lwe_dim: LweDimension,
    glwe_dim: GlweDimension,
    l_gadget: DecompositionLevelCount,
    polynomial_size: PolynomialSize,
) -> DeviceResult<()> {
    let degree = SupportedPolynomialSize::try_from(polynomial_size)?;
    if glwe_dim.0 != 1 {
        return Err(DeviceError::GlweDimensionNotSupported(glwe_dim.0));
    }
    let polynomial_count = bootstrap_key_polynomial_count(input_lwe_dim, l_gadget);
    let fourier_size = degree.fourier_polynomial_size().0;
    if src.len() != polynomial_count * polynomial_size.0 {
        return Err(DeviceError::BufferSizeMismatch {
            expected: polynomial_count * polynomial_size.0,
            actual: src.len(),
        });
    }
    if dest.len() != polynomial_count * fourier_size {
        return Err(DeviceError::BufferSizeMismatch {
            expected: polynomial_count * fourier_size,
            actual: dest.len(),
        });
    }
    if polynomial_count == 0 {
        return Ok(());
    }

    // Fold and rescale on the host
    let mut folded = vec![c64::default(); dest.len()];
    folded
        .par_chunks_exact_mut(fourier_size)
        .zip(src.par_chunks_exact(polynomial_size.0))
        .for_each(|(fourier_poly, standard_poly)| fold_torus(fourier_poly, standard_poly));
    manager.copy_to_device_async(stream, dest.ptr(), 0, &folded)?;

    // Transform on the device, in shared memory whenever a polynomial fits
    let properties = manager.properties(stream.device())?;
    let poly_bytes = fourier_size * size_of::<c64>();
    let dynamic_shared_memory = if poly_bytes <= properties.max_shared_memory_per_block {
        poly_bytes
    } else {
        0
    };
    let config = LaunchConfig {
        grid_dim: polynomial_count,
        block_dim: degree.block_dim(),
        dynamic_shared_memory,
    };
    config.validate(properties)?;

    let tables = manager.load_twiddle_tables(stream.device(), degree)?;
    let chunk = manager.chunk(dest.ptr())?;
    tracing::debug!(
        ?degree,
        polynomial_count,
        dynamic_shared_memory,
        "Converting bootstrapping key"
    );
    manager.enqueue(
        stream,
        Box::new(move || {
            let mut data = chunk.data.write().map_err(DeviceError::poisoned)?;
            let key = cast_device_slice_mut::<c64>(&mut data)?;
            launch_blocks(
                &config,
                key.par_chunks_exact_mut(fourier_size),
                |block, shared, poly| {
                    if config.dynamic_shared_memory == 0 {
                        forward_in_place(block, &tables, poly);
                        return Ok(());
                    }
                    let buf = cast_device_slice_mut::<c64>(shared)?;
                    block.for_each_strided(fourier_size, |j| buf[j] = poly[j]);
                    block.sync_threads();
                    forward_in_place(block, &tables, buf);
                    block.for_each_strided(fourier_size, |j| poly[j] = buf[j]);
                    block.sync_threads();
                    Ok(())
                },
            )?;
            Ok(())
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceProperties, GpuIndex, PlatformConfig};
    use crate::fft::NegacyclicFft;
    use crate::test_tools::{new_random_generator, random_uniform};

    fn manager() -> DeviceManager {
        DeviceManager::new(PlatformConfig::single(DeviceProperties::a100())).unwrap()
    }

    fn convert<C: TorusCoefficient>(
        manager: &DeviceManager,
        src: &[C],
        input_lwe_dim: usize,
        l_gadget: usize,
        polynomial_size: usize,
    ) -> Vec<c64> {
        let stream = manager.create_stream(GpuIndex(0)).unwrap();
        let len = input_lwe_dim * l_gadget * 4 * polynomial_size / 2;
        let mut d_bsk = DeviceVec::<c64>::new(len, manager, &stream).unwrap();
        convert_lwe_programmable_bootstrap_key_async(
            manager,
            &stream,
            &mut d_bsk,
            src,
            LweDimension(input_lwe_dim),
            GlweDimension(1),
            DecompositionLevelCount(l_gadget),
            PolynomialSize(polynomial_size),
        )
        .unwrap();
        d_bsk.to_cpu(&stream).unwrap()
    }

    #[test]
    fn zero_key_converts_to_zero() {
        let manager = manager();
        let src = vec![0u64; 4 * 2 * 4 * 1024];
        let fourier = convert(&manager, &src, 4, 2, 1024);
        assert!(fourier.iter().all(|c| *c == c64::default()));
    }

    #[test]
    fn conversion_is_linear() {
        let manager = manager();
        let mut generator = new_random_generator();
        // Small coefficients so that scaling does not wrap around the torus
        let src: Vec<i64> = (0..2 * 3 * 4 * 512)
            .map(|_| (random_uniform::<u64>(&mut generator) >> 20) as i64 - (1 << 43))
            .collect();
        let scaled: Vec<i64> = src.iter().map(|x| 7 * x).collect();
        let fourier = convert(&manager, &src, 2, 3, 512);
        let fourier_scaled = convert(&manager, &scaled, 2, 3, 512);
        for (x, y) in fourier.iter().zip(fourier_scaled.iter()) {
            assert!((x * 7.0 - y).norm() < 1e-9);
        }
    }

    #[test]
    fn matches_host_transform() {
        let manager = manager();
        let mut generator = new_random_generator();
        let size = 2048;
        let src: Vec<u32> = (0..4 * size).map(|_| random_uniform(&mut generator)).collect();
        let fourier = convert(&manager, &src, 1, 1, size);

        let fft = NegacyclicFft::new(SupportedPolynomialSize::N2048);
        let mut expected = vec![c64::default(); size / 2];
        for (standard, actual) in src.chunks(size).zip(fourier.chunks(size / 2)) {
            fft.forward_as_torus(&mut expected, standard);
            assert_eq!(expected, actual);
        }
    }

    #[test]
    fn signed_and_unsigned_sources_agree() {
        let manager = manager();
        let mut generator = new_random_generator();
        let unsigned: Vec<u64> = (0..4 * 512).map(|_| random_uniform(&mut generator)).collect();
        let signed: Vec<i64> = unsigned.iter().map(|x| *x as i64).collect();
        assert_eq!(
            convert(&manager, &unsigned, 1, 1, 512),
            convert(&manager, &signed, 1, 1, 512)
        );
    }

    #[test]
    fn global_memory_fallback_matches_shared_memory() {
        let mut properties = DeviceProperties::t4();
        properties.max_shared_memory_per_block = 1024;
        let small = DeviceManager::new(PlatformConfig::single(properties)).unwrap();
        let mut generator = new_random_generator();
        let src: Vec<u64> = (0..4 * 1024).map(|_| random_uniform(&mut generator)).collect();
        assert_eq!(
            convert(&small, &src, 1, 1, 1024),
            convert(&manager(), &src, 1, 1, 1024)
        );
    }

    #[test]
    fn invalid_parameters() {
        let manager = manager();
        let stream = manager.create_stream(GpuIndex(0)).unwrap();
        let mut d_bsk = DeviceVec::<c64>::new(4 * 384, &manager, &stream).unwrap();
        let src = vec![0u64; 4 * 768];
        assert_eq!(
            convert_lwe_programmable_bootstrap_key_async(
                &manager,
                &stream,
                &mut d_bsk,
                &src,
                LweDimension(1),
                GlweDimension(1),
                DecompositionLevelCount(1),
                PolynomialSize(768),
            ),
            Err(DeviceError::UnsupportedDegree(PolynomialSize(768)))
        );

        let mut d_bsk = DeviceVec::<c64>::new(4 * 256, &manager, &stream).unwrap();
        let src = vec![0u64; 4 * 512];
        assert_eq!(
            convert_lwe_programmable_bootstrap_key_async(
                &manager,
                &stream,
                &mut d_bsk,
                &src,
                LweDimension(1),
                GlweDimension(2),
                DecompositionLevelCount(1),
                PolynomialSize(512),
            ),
            Err(DeviceError::GlweDimensionNotSupported(2))
        );
        assert_eq!(
            convert_lwe_programmable_bootstrap_key_async(
                &manager,
                &stream,
                &mut d_bsk,
                &src[..100],
                LweDimension(1),
                GlweDimension(1),
                DecompositionLevelCount(1),
                PolynomialSize(512),
            ),
            Err(DeviceError::BufferSizeMismatch {
                expected: 4 * 512,
                actual: 100,
            })
        );
    }
}
