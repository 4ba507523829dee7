//! Programmable bootstrapping of TFHE ciphertexts on a device.
//!
//! The crate converts bootstrapping keys to the fourier domain and runs batched bootstraps with
//! one thread block per ciphertext. Devices are described by a [`config::PlatformConfig`] and
//! driven through a [`device::DeviceManager`].

pub mod bootstrap_key;
pub mod config;
pub mod decomposition;
pub mod device;
pub mod engine;
pub mod entities;
pub mod error;
pub mod fft;
pub mod numeric;
pub mod parameters;
pub mod pbs;

#[cfg(test)]
pub(crate) mod test_tools;

#[allow(non_camel_case_types)]
pub type c64 = num_complex::Complex64;

pub mod prelude {
    pub use crate::bootstrap_key::convert_lwe_programmable_bootstrap_key_async;
    pub use crate::c64;
    pub use crate::config::{DeviceProperties, PlatformConfig};
    pub use crate::device::{DeviceManager, DeviceVec, GpuIndex, StreamHandle};
    pub use crate::engine::PbsEngine;
    pub use crate::entities::{
        DeviceGlweLookupTables, DeviceLweBootstrapKey, DeviceLweCiphertextList,
    };
    pub use crate::error::{DeviceError, DeviceResult};
    pub use crate::numeric::{TorusCoefficient, UnsignedTorus};
    pub use crate::parameters::*;
    pub use crate::pbs::{
        get_pbs_launch_config, pbs_capacity, programmable_bootstrap_async,
        programmable_bootstrap_with_buffer_async, scratch_programmable_bootstrap, PbsLaunchConfig,
        PbsScratchBuffer, PbsTier,
    };
}
