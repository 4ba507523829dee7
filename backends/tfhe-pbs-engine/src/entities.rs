//! Typed containers of the device memory the bootstrap consumes and produces.

use crate::bootstrap_key::convert_lwe_programmable_bootstrap_key_async;
use crate::c64;
use crate::device::{DeviceManager, DeviceVec, GpuIndex, StreamHandle};
use crate::error::{DeviceError, DeviceResult};
use crate::numeric::{TorusCoefficient, UnsignedTorus};
use crate::parameters::{
    DecompositionBaseLog, DecompositionLevelCount, GlweDimension, LweCiphertextCount,
    LweDimension, LweSize, PbsParameters, PolynomialSize,
};

/// A vector of LWE ciphertexts in device memory.
#[derive(Debug)]
pub struct DeviceLweCiphertextList<T: UnsignedTorus> {
    pub(crate) d_vec: DeviceVec<T>,
    lwe_dimension: LweDimension,
    lwe_ciphertext_count: LweCiphertextCount,
}

impl<T: UnsignedTorus> DeviceLweCiphertextList<T> {
    /// Allocate `lwe_ciphertext_count` zeroed ciphertexts.
    pub fn new(
        lwe_dimension: LweDimension,
        lwe_ciphertext_count: LweCiphertextCount,
        manager: &DeviceManager,
        stream: &StreamHandle,
    ) -> DeviceResult<Self> {
        let d_vec = DeviceVec::new(
            lwe_dimension.to_lwe_size().0 * lwe_ciphertext_count.0,
            manager,
            stream,
        )?;
        Ok(Self {
            d_vec,
            lwe_dimension,
            lwe_ciphertext_count,
        })
    }

    /// Copy contiguous ciphertexts of `lwe_size` elements to the device.
    pub fn from_host(
        container: &[T],
        lwe_size: LweSize,
        manager: &DeviceManager,
        stream: &StreamHandle,
    ) -> DeviceResult<Self> {
        if lwe_size.0 == 0 || container.len() % lwe_size.0 != 0 {
            return Err(DeviceError::BufferSizeMismatch {
                expected: container.len().next_multiple_of(lwe_size.0.max(1)),
                actual: container.len(),
            });
        }
        let d_vec = DeviceVec::from_cpu_async(container, manager, stream)?;
        Ok(Self {
            d_vec,
            lwe_dimension: lwe_size.to_lwe_dimension(),
            lwe_ciphertext_count: LweCiphertextCount(container.len() / lwe_size.0),
        })
    }

    /// Wait for `stream` and copy the ciphertexts back to the host.
    pub fn to_host(&self, stream: &StreamHandle) -> DeviceResult<Vec<T>> {
        self.d_vec.to_cpu(stream)
    }

    pub fn lwe_dimension(&self) -> LweDimension {
        self.lwe_dimension
    }

    pub fn lwe_ciphertext_count(&self) -> LweCiphertextCount {
        self.lwe_ciphertext_count
    }

    pub fn gpu_index(&self) -> GpuIndex {
        self.d_vec.gpu_index()
    }
}

/// A bootstrapping key in the fourier domain, in device memory.
#[derive(Debug)]
pub struct DeviceLweBootstrapKey {
    pub(crate) d_vec: DeviceVec<c64>,
    params: PbsParameters,
}

impl DeviceLweBootstrapKey {
    /// Upload a key of the standard domain and enqueue its conversion on `stream`.
    pub fn from_standard_key<C: TorusCoefficient>(
        src: &[C],
        params: PbsParameters,
        manager: &DeviceManager,
        stream: &StreamHandle,
    ) -> DeviceResult<Self> {
        let mut d_vec = DeviceVec::new(params.fourier_bootstrap_key_len(), manager, stream)?;
        convert_lwe_programmable_bootstrap_key_async(
            manager,
            stream,
            &mut d_vec,
            src,
            params.lwe_dimension,
            params.glwe_dimension,
            params.decomp_level_count,
            params.polynomial_size,
        )?;
        Ok(Self { d_vec, params })
    }

    pub fn params(&self) -> &PbsParameters {
        &self.params
    }

    pub fn input_lwe_dimension(&self) -> LweDimension {
        self.params.lwe_dimension
    }

    /// Dimension of the ciphertexts a bootstrap with this key outputs.
    pub fn output_lwe_dimension(&self) -> LweDimension {
        LweDimension(self.params.glwe_dimension.0 * self.params.polynomial_size.0)
    }

    pub fn glwe_dimension(&self) -> GlweDimension {
        self.params.glwe_dimension
    }

    pub fn polynomial_size(&self) -> PolynomialSize {
        self.params.polynomial_size
    }

    pub fn decomp_base_log(&self) -> DecompositionBaseLog {
        self.params.decomp_base_log
    }

    pub fn decomp_level_count(&self) -> DecompositionLevelCount {
        self.params.decomp_level_count
    }

    pub fn gpu_index(&self) -> GpuIndex {
        self.d_vec.gpu_index()
    }
}

/// Lookup tables of a bootstrap, with the index of the table each sample uses.
///
/// Indexes are not checked on the host: a sample selecting a missing table makes the bootstrap
/// fail on the device.
#[derive(Debug)]
pub struct DeviceGlweLookupTables<T: UnsignedTorus> {
    pub(crate) d_luts: DeviceVec<T>,
    pub(crate) d_indexes: DeviceVec<u32>,
    polynomial_size: PolynomialSize,
    lut_count: usize,
}

impl<T: UnsignedTorus> DeviceGlweLookupTables<T> {
    /// Upload `luts`, a list of GLWE ciphertexts of dimension 1, and the per sample `indexes`.
    pub fn from_host(
        luts: &[T],
        indexes: &[u32],
        polynomial_size: PolynomialSize,
        manager: &DeviceManager,
        stream: &StreamHandle,
    ) -> DeviceResult<Self> {
        let glwe_len = 2 * polynomial_size.0;
        if glwe_len == 0 || luts.len() % glwe_len != 0 {
            return Err(DeviceError::BufferSizeMismatch {
                expected: luts.len().next_multiple_of(glwe_len.max(1)),
                actual: luts.len(),
            });
        }
        Ok(Self {
            d_luts: DeviceVec::from_cpu_async(luts, manager, stream)?,
            d_indexes: DeviceVec::from_cpu_async(indexes, manager, stream)?,
            polynomial_size,
            lut_count: luts.len() / glwe_len,
        })
    }

    /// A single table used by `sample_count` samples.
    pub fn from_single_lut(
        lut: &[T],
        sample_count: LweCiphertextCount,
        polynomial_size: PolynomialSize,
        manager: &DeviceManager,
        stream: &StreamHandle,
    ) -> DeviceResult<Self> {
        Self::from_host(
            lut,
            &vec![0; sample_count.0],
            polynomial_size,
            manager,
            stream,
        )
    }

    pub fn polynomial_size(&self) -> PolynomialSize {
        self.polynomial_size
    }

    pub fn lut_count(&self) -> usize {
        self.lut_count
    }

    /// Number of samples the indexes cover.
    pub fn sample_count(&self) -> LweCiphertextCount {
        LweCiphertextCount(self.d_indexes.len())
    }
}
