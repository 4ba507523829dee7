//! Programmable bootstrap of a batch of LWE ciphertexts.
//!
//! Each ciphertext is handled by one block of the launch: its accumulator is initialized from the
//! LUT it selects, blindly rotated by the mask of the input with the bootstrapping key, and the
//! constant coefficient is extracted as the output LWE ciphertext.

mod kernel;
mod launch_config;
mod scratch;

pub use launch_config::{
    get_pbs_launch_config, pbs_capacity, PbsFootprints, PbsLaunchConfig, PbsTier,
};
pub use scratch::{
    FullSm, NoSm, PartialSm, ScratchComponent, ScratchLayout, ScratchLocation, ScratchPlacement,
};

use crate::c64;
use crate::decomposition::SignedDecomposer;
use crate::device::launch::launch_blocks;
use crate::device::memory::{cast_device_slice, cast_device_slice_mut};
use crate::device::{DeviceManager, DeviceVec, GpuIndex, LaunchConfig, StreamHandle};
use crate::error::{DeviceError, DeviceResult};
use crate::numeric::UnsignedTorus;
use crate::parameters::{LweCiphertextCount, PbsParameters, SupportedPolynomialSize};
use bytemuck::Pod;
use kernel::{device_programmable_bootstrap, PbsKernelInputs};
use rayon::prelude::*;

/// Global scratch of the bootstrap, reusable across launches of at most
/// [`PbsScratchBuffer::sample_capacity`] ciphertexts.
#[derive(Debug)]
pub struct PbsScratchBuffer {
    config: PbsLaunchConfig,
    bits: usize,
    max_shared_memory: usize,
    scratch: DeviceVec<u8>,
}

impl PbsScratchBuffer {
    pub fn config(&self) -> &PbsLaunchConfig {
        &self.config
    }

    pub fn sample_capacity(&self) -> usize {
        self.config.launch.grid_dim
    }
}

/// Select the launch configuration of a bootstrap of `num_samples` ciphertexts and allocate its
/// global scratch on the device of `stream`.
pub fn scratch_programmable_bootstrap<Scalar: UnsignedTorus>(
    manager: &DeviceManager,
    stream: &StreamHandle,
    params: &PbsParameters,
    num_samples: LweCiphertextCount,
    max_shared_memory: usize,
) -> DeviceResult<PbsScratchBuffer> {
    let degree = params.validate(Scalar::BITS)?;
    let config = get_pbs_launch_config::<Scalar>(
        manager,
        stream.device(),
        degree,
        num_samples,
        max_shared_memory,
    )?;
    let scratch = DeviceVec::new(config.global_scratch, manager, stream)?;
    Ok(PbsScratchBuffer {
        config,
        bits: Scalar::BITS,
        max_shared_memory,
        scratch,
    })
}

fn check_len<T: Pod>(buffer: &DeviceVec<T>, expected: usize) -> DeviceResult<()> {
    if buffer.len() != expected {
        return Err(DeviceError::BufferSizeMismatch {
            expected,
            actual: buffer.len(),
        });
    }
    Ok(())
}

/// Bootstrap `num_samples` ciphertexts of `lwe_array_in` into `lwe_array_out`.
///
/// - `lwe_array_in` holds `num_samples` LWE ciphertexts of dimension `params.lwe_dimension`
/// - `lwe_array_out` receives `num_samples` LWE ciphertexts of dimension
///   `params.polynomial_size`
/// - `lut_vector` holds `num_lut_vectors` GLWE ciphertexts (mask then body polynomial) and
///   `lut_vector_indexes` the LUT each sample starts from
/// - `bootstrapping_key` is a key in the fourier domain, as produced by
///   [`convert_lwe_programmable_bootstrap_key_async`](crate::bootstrap_key::convert_lwe_programmable_bootstrap_key_async)
///
/// The launch is enqueued on `stream`. A LUT index out of range aborts the batch, the failure is
/// reported by the next synchronization of the stream.
#[allow(clippy::too_many_arguments)]
pub fn programmable_bootstrap_async<Scalar: UnsignedTorus>(
    manager: &DeviceManager,
    stream: &StreamHandle,
    lwe_array_out: &mut DeviceVec<Scalar>,
    lut_vector: &DeviceVec<Scalar>,
    lut_vector_indexes: &DeviceVec<u32>,
    lwe_array_in: &DeviceVec<Scalar>,
    bootstrapping_key: &DeviceVec<c64>,
    params: &PbsParameters,
    num_samples: LweCiphertextCount,
    num_lut_vectors: usize,
    max_shared_memory: usize,
) -> DeviceResult<()> {
    let buffer = scratch_programmable_bootstrap::<Scalar>(
        manager,
        stream,
        params,
        num_samples,
        max_shared_memory,
    )?;
    programmable_bootstrap_with_buffer_async(
        manager,
        stream,
        lwe_array_out,
        lut_vector,
        lut_vector_indexes,
        lwe_array_in,
        bootstrapping_key,
        &buffer,
        params,
        num_samples,
        num_lut_vectors,
    )
}

/// Same as [`programmable_bootstrap_async`], with a scratch allocated beforehand by
/// [`scratch_programmable_bootstrap`].
#[allow(clippy::too_many_arguments)]
pub fn programmable_bootstrap_with_buffer_async<Scalar: UnsignedTorus>(
    manager: &DeviceManager,
    stream: &StreamHandle,
    lwe_array_out: &mut DeviceVec<Scalar>,
    lut_vector: &DeviceVec<Scalar>,
    lut_vector_indexes: &DeviceVec<u32>,
    lwe_array_in: &DeviceVec<Scalar>,
    bootstrapping_key: &DeviceVec<c64>,
    buffer: &PbsScratchBuffer,
    params: &PbsParameters,
    num_samples: LweCiphertextCount,
    num_lut_vectors: usize,
) -> DeviceResult<()> {
    let degree = params.validate(Scalar::BITS)?;
    let polynomial_size = degree.polynomial_size().0;
    let lwe_dimension = params.lwe_dimension.0;
    let samples = num_samples.0;

    check_len(lwe_array_in, samples * (lwe_dimension + 1))?;
    check_len(lwe_array_out, samples * (polynomial_size + 1))?;
    check_len(lut_vector, num_lut_vectors * 2 * polynomial_size)?;
    check_len(lut_vector_indexes, samples)?;
    check_len(bootstrapping_key, params.fourier_bootstrap_key_len())?;
    if buffer.config.degree != degree
        || buffer.bits != Scalar::BITS
        || buffer.sample_capacity() < samples
    {
        return Err(DeviceError::InvalidPointer(format!(
            "scratch buffer allocated for {} samples of {:?} on a {} bits torus",
            buffer.sample_capacity(),
            buffer.config.degree,
            buffer.bits
        )));
    }

    let pointers = [
        lwe_array_out.ptr(),
        lut_vector.ptr(),
        lut_vector_indexes.ptr(),
        lwe_array_in.ptr(),
        bootstrapping_key.ptr(),
        buffer.scratch.ptr(),
    ];
    for (i, ptr) in pointers.iter().enumerate() {
        if ptr.device() != stream.device() {
            return Err(DeviceError::InvalidPointer(format!(
                "buffer on device {:?} used by a bootstrap on device {:?}",
                ptr.device(),
                stream.device()
            )));
        }
        if pointers[..i].contains(ptr) {
            return Err(DeviceError::InvalidPointer(
                "the same allocation is passed twice to the bootstrap".to_string(),
            ));
        }
    }
    if samples == 0 {
        return Ok(());
    }

    let properties = manager.properties(stream.device())?;
    let mut config = buffer.config;
    config.launch.grid_dim = samples;
    config.launch.validate(properties)?;

    let tables = manager.load_twiddle_tables(stream.device(), degree)?;
    let out_chunk = manager.chunk(lwe_array_out.ptr())?;
    let lut_chunk = manager.chunk(lut_vector.ptr())?;
    let indexes_chunk = manager.chunk(lut_vector_indexes.ptr())?;
    let in_chunk = manager.chunk(lwe_array_in.ptr())?;
    let key_chunk = manager.chunk(bootstrapping_key.ptr())?;
    let scratch_chunk = manager.chunk(buffer.scratch.ptr())?;
    let decomposer =
        SignedDecomposer::<Scalar>::new(params.decomp_base_log, params.decomp_level_count);

    tracing::trace!(
        index = ?stream.device(),
        samples,
        ?degree,
        tier = ?config.tier,
        max_shared_memory = buffer.max_shared_memory,
        "Launching programmable bootstrap"
    );
    manager.enqueue(
        stream,
        Box::new(move || {
            let lut_data = lut_chunk.data.read().map_err(DeviceError::poisoned)?;
            let indexes_data = indexes_chunk.data.read().map_err(DeviceError::poisoned)?;
            let in_data = in_chunk.data.read().map_err(DeviceError::poisoned)?;
            let key_data = key_chunk.data.read().map_err(DeviceError::poisoned)?;
            let mut out_data = out_chunk.data.write().map_err(DeviceError::poisoned)?;
            let mut scratch_data = scratch_chunk.data.write().map_err(DeviceError::poisoned)?;

            let inputs = PbsKernelInputs {
                lut_vector: cast_device_slice::<Scalar>(&lut_data)?,
                lut_vector_indexes: cast_device_slice::<u32>(&indexes_data)?,
                lwe_array_in: cast_device_slice::<Scalar>(&in_data)?,
                bootstrapping_key: cast_device_slice::<c64>(&key_data)?,
                tables: &tables,
                degree,
                lwe_dimension,
                num_lut_vectors,
                decomposer,
            };
            let lwe_out = cast_device_slice_mut::<Scalar>(&mut out_data)?;
            let scratch = &mut scratch_data[..config.global_scratch_per_sample * samples];
            match config.tier {
                PbsTier::FullSm => {
                    launch::<Scalar, FullSm>(&config, &inputs, lwe_out, scratch)?;
                }
                PbsTier::PartialSm => {
                    launch::<Scalar, PartialSm>(&config, &inputs, lwe_out, scratch)?;
                }
                PbsTier::NoSm => {
                    launch::<Scalar, NoSm>(&config, &inputs, lwe_out, scratch)?;
                }
            }
            Ok(())
        }),
    )
}

/// Run one block per sample, each on its output ciphertext and its slice of global scratch.
///
/// Returns the number of barriers of each block.
fn launch<Scalar: UnsignedTorus, P: ScratchPlacement>(
    config: &PbsLaunchConfig,
    inputs: &PbsKernelInputs<'_, Scalar>,
    lwe_out: &mut [Scalar],
    scratch: &mut [u8],
) -> DeviceResult<Vec<usize>> {
    let lwe_out_size = inputs.degree.polynomial_size().0 + 1;
    let launch_config: &LaunchConfig = &config.launch;
    if config.global_scratch_per_sample == 0 {
        launch_blocks(
            launch_config,
            lwe_out.par_chunks_exact_mut(lwe_out_size),
            |block, shared, lwe_out| {
                device_programmable_bootstrap::<Scalar, P>(block, inputs, lwe_out, shared, &mut [])
            },
        )
    } else {
        launch_blocks(
            launch_config,
            lwe_out
                .par_chunks_exact_mut(lwe_out_size)
                .zip(scratch.par_chunks_exact_mut(config.global_scratch_per_sample)),
            |block, shared, (lwe_out, global)| {
                device_programmable_bootstrap::<Scalar, P>(block, inputs, lwe_out, shared, global)
            },
        )
    }
}

/// Footprints and launch shapes of every supported degree, for diagnostics.
pub fn describe_launch_configs<Scalar: UnsignedTorus>(
    manager: &DeviceManager,
    index: GpuIndex,
) -> DeviceResult<Vec<(PbsFootprints, PbsLaunchConfig, usize)>> {
    let max_shared_memory = manager.max_shared_memory(index)?;
    SupportedPolynomialSize::ALL
        .into_iter()
        .map(|degree| {
            Ok((
                PbsFootprints::new::<Scalar>(degree)?,
                get_pbs_launch_config::<Scalar>(
                    manager,
                    index,
                    degree,
                    LweCiphertextCount(1),
                    max_shared_memory,
                )?,
                pbs_capacity::<Scalar>(manager, index, degree)?,
            ))
        })
        .collect()
}
