//! Host facing entry point: one device, one stream, whole batches.

use crate::device::{DeviceManager, GpuIndex, StreamHandle};
use crate::entities::{DeviceGlweLookupTables, DeviceLweBootstrapKey, DeviceLweCiphertextList};
use crate::error::{DeviceError, DeviceResult};
use crate::numeric::{TorusCoefficient, UnsignedTorus};
use crate::parameters::{LweCiphertextCount, PbsParameters, SupportedPolynomialSize};
use crate::pbs::{
    get_pbs_launch_config, pbs_capacity, programmable_bootstrap_async, PbsLaunchConfig,
};

/// Runs bootstraps on one device, every operation ordered on a stream of its own.
#[derive(Debug)]
pub struct PbsEngine {
    manager: DeviceManager,
    stream: StreamHandle,
    max_shared_memory: usize,
}

impl PbsEngine {
    pub fn new(manager: &DeviceManager, index: GpuIndex) -> DeviceResult<Self> {
        let max_shared_memory = manager.max_shared_memory(index)?;
        let stream = manager.create_stream(index)?;
        Ok(Self {
            manager: manager.clone(),
            stream,
            max_shared_memory,
        })
    }

    /// Cap the shared memory a bootstrap block may use, which can force a poorer tier.
    pub fn with_max_shared_memory(mut self, max_shared_memory: usize) -> Self {
        self.max_shared_memory = max_shared_memory;
        self
    }

    pub fn manager(&self) -> &DeviceManager {
        &self.manager
    }

    pub fn stream(&self) -> &StreamHandle {
        &self.stream
    }

    pub fn gpu_index(&self) -> GpuIndex {
        self.stream.device()
    }

    pub fn synchronize(&self) -> DeviceResult<()> {
        self.manager.synchronize_stream(&self.stream)
    }

    /// Upload a standard domain bootstrapping key and convert it on the device.
    pub fn convert_bootstrap_key<C: TorusCoefficient>(
        &self,
        src: &[C],
        params: PbsParameters,
    ) -> DeviceResult<DeviceLweBootstrapKey> {
        DeviceLweBootstrapKey::from_standard_key(src, params, &self.manager, &self.stream)
    }

    pub fn launch_config<Scalar: UnsignedTorus>(
        &self,
        degree: SupportedPolynomialSize,
        num_samples: LweCiphertextCount,
    ) -> DeviceResult<PbsLaunchConfig> {
        get_pbs_launch_config::<Scalar>(
            &self.manager,
            self.gpu_index(),
            degree,
            num_samples,
            self.max_shared_memory,
        )
    }

    pub fn capacity<Scalar: UnsignedTorus>(
        &self,
        degree: SupportedPolynomialSize,
    ) -> DeviceResult<usize> {
        pbs_capacity::<Scalar>(&self.manager, self.gpu_index(), degree)
    }

    /// Enqueue the bootstrap of every ciphertext of `input` into `output`.
    pub fn bootstrap_async<Scalar: UnsignedTorus>(
        &self,
        input: &DeviceLweCiphertextList<Scalar>,
        output: &mut DeviceLweCiphertextList<Scalar>,
        luts: &DeviceGlweLookupTables<Scalar>,
        bsk: &DeviceLweBootstrapKey,
    ) -> DeviceResult<()> {
        let mismatch = |expected: usize, actual: usize| -> DeviceResult<()> {
            if expected != actual {
                return Err(DeviceError::BufferSizeMismatch { expected, actual });
            }
            Ok(())
        };
        mismatch(bsk.input_lwe_dimension().0, input.lwe_dimension().0)?;
        mismatch(bsk.output_lwe_dimension().0, output.lwe_dimension().0)?;
        mismatch(bsk.polynomial_size().0, luts.polynomial_size().0)?;
        let num_samples = input.lwe_ciphertext_count();
        mismatch(num_samples.0, output.lwe_ciphertext_count().0)?;
        mismatch(num_samples.0, luts.sample_count().0)?;

        programmable_bootstrap_async(
            &self.manager,
            &self.stream,
            &mut output.d_vec,
            &luts.d_luts,
            &luts.d_indexes,
            &input.d_vec,
            &bsk.d_vec,
            bsk.params(),
            num_samples,
            luts.lut_count(),
            self.max_shared_memory,
        )
    }

    /// Bootstrap host ciphertexts: upload, launch, wait and download.
    pub fn bootstrap<Scalar: UnsignedTorus>(
        &self,
        ciphertexts: &[Scalar],
        luts: &[Scalar],
        lut_indexes: &[u32],
        bsk: &DeviceLweBootstrapKey,
    ) -> DeviceResult<Vec<Scalar>> {
        let input = DeviceLweCiphertextList::from_host(
            ciphertexts,
            bsk.input_lwe_dimension().to_lwe_size(),
            &self.manager,
            &self.stream,
        )?;
        let luts = DeviceGlweLookupTables::from_host(
            luts,
            lut_indexes,
            bsk.polynomial_size(),
            &self.manager,
            &self.stream,
        )?;
        let mut output = DeviceLweCiphertextList::new(
            bsk.output_lwe_dimension(),
            input.lwe_ciphertext_count(),
            &self.manager,
            &self.stream,
        )?;
        self.bootstrap_async(&input, &mut output, &luts, bsk)?;
        output.to_host(&self.stream)
    }
}

impl Drop for PbsEngine {
    fn drop(&mut self) {
        if let Err(err) = self.manager.destroy_stream(self.stream) {
            tracing::warn!(?err, "Failed to destroy the engine stream");
        }
    }
}
