//! Launch configuration of the bootstrap kernel.

use super::scratch::{FullSm, NoSm, PartialSm, ScratchLayout};
use crate::device::{DeviceManager, GpuIndex, LaunchConfig};
use crate::error::{DeviceError, DeviceResult};
use crate::numeric::UnsignedTorus;
use crate::parameters::{LweCiphertextCount, SupportedPolynomialSize};
use serde::{Deserialize, Serialize};

/// Where the scratch of the bootstrap kernel lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PbsTier {
    FullSm,
    PartialSm,
    NoSm,
}

/// Dynamic shared memory a block needs in each tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PbsFootprints {
    pub full_sm: usize,
    pub partial_sm: usize,
}

impl PbsFootprints {
    pub fn new<Scalar: UnsignedTorus>(degree: SupportedPolynomialSize) -> DeviceResult<Self> {
        Ok(Self {
            full_sm: ScratchLayout::new::<Scalar, FullSm>(degree)?.on_chip_bytes(),
            partial_sm: ScratchLayout::new::<Scalar, PartialSm>(degree)?.on_chip_bytes(),
        })
    }

    /// Richest tier fitting in `max_shared_memory` bytes.
    pub fn select_tier(&self, max_shared_memory: usize) -> PbsTier {
        if self.full_sm <= max_shared_memory {
            PbsTier::FullSm
        } else if self.partial_sm <= max_shared_memory {
            PbsTier::PartialSm
        } else {
            PbsTier::NoSm
        }
    }
}

/// Everything needed to launch the bootstrap of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PbsLaunchConfig {
    pub degree: SupportedPolynomialSize,
    pub tier: PbsTier,
    pub launch: LaunchConfig,
    /// Global scratch of one sample, in bytes
    pub global_scratch_per_sample: usize,
    /// Global scratch of the whole batch, in bytes
    pub global_scratch: usize,
}

fn tier_for<Scalar: UnsignedTorus>(
    manager: &DeviceManager,
    index: GpuIndex,
    degree: SupportedPolynomialSize,
    max_shared_memory: usize,
) -> DeviceResult<PbsTier> {
    let device = manager.device(index)?;
    let key = (degree, Scalar::BITS, max_shared_memory);
    let mut cache = device.tier_cache.lock().map_err(DeviceError::poisoned)?;
    if let Some(tier) = cache.get(&key) {
        return Ok(*tier);
    }

    let footprints = PbsFootprints::new::<Scalar>(degree)?;
    let tier = footprints.select_tier(max_shared_memory);
    if tier == PbsTier::NoSm {
        tracing::warn!(
            ?index,
            ?degree,
            bits = Scalar::BITS,
            max_shared_memory,
            partial_sm = footprints.partial_sm,
            "Bootstrap scratch does not fit in shared memory, running from global memory"
        );
    } else {
        tracing::info!(
            ?index,
            ?degree,
            bits = Scalar::BITS,
            ?tier,
            full_sm = footprints.full_sm,
            partial_sm = footprints.partial_sm,
            "Selected bootstrap tier"
        );
    }
    cache.insert(key, tier);
    Ok(tier)
}

/// Launch configuration of a bootstrap of `num_samples` ciphertexts on device `index`.
///
/// `max_shared_memory` caps the dynamic shared memory of a block, it is clamped to what the
/// device offers.
pub fn get_pbs_launch_config<Scalar: UnsignedTorus>(
    manager: &DeviceManager,
    index: GpuIndex,
    degree: SupportedPolynomialSize,
    num_samples: LweCiphertextCount,
    max_shared_memory: usize,
) -> DeviceResult<PbsLaunchConfig> {
    let properties = manager.properties(index)?;
    let max_shared_memory = max_shared_memory.min(properties.max_shared_memory_per_block);
    let tier = tier_for::<Scalar>(manager, index, degree, max_shared_memory)?;

    let layout = match tier {
        PbsTier::FullSm => ScratchLayout::new::<Scalar, FullSm>(degree)?,
        PbsTier::PartialSm => ScratchLayout::new::<Scalar, PartialSm>(degree)?,
        PbsTier::NoSm => ScratchLayout::new::<Scalar, NoSm>(degree)?,
    };
    let global_scratch_per_sample = layout.global_bytes();
    let global_scratch = global_scratch_per_sample
        .checked_mul(num_samples.0)
        .ok_or(DeviceError::OutOfMemory {
            index,
            requested: usize::MAX,
            available: manager.free_memory(index)?,
        })?;

    Ok(PbsLaunchConfig {
        degree,
        tier,
        launch: LaunchConfig {
            grid_dim: num_samples.0,
            block_dim: degree.block_dim(),
            dynamic_shared_memory: layout.on_chip_bytes(),
        },
        global_scratch_per_sample,
        global_scratch,
    })
}

/// Number of bootstrap blocks device `index` keeps resident at once.
///
/// Blocks per multiprocessor are limited by threads, by shared memory and by the block count
/// limit of the hardware.
pub fn pbs_capacity<Scalar: UnsignedTorus>(
    manager: &DeviceManager,
    index: GpuIndex,
    degree: SupportedPolynomialSize,
) -> DeviceResult<usize> {
    let properties = manager.properties(index)?;
    let config = get_pbs_launch_config::<Scalar>(
        manager,
        index,
        degree,
        LweCiphertextCount(1),
        properties.max_shared_memory_per_block,
    )?;
    let by_threads = properties.max_threads_per_sm / config.launch.block_dim;
    let by_shared_memory = match config.launch.dynamic_shared_memory {
        0 => usize::MAX,
        smem => properties.shared_memory_per_sm / smem,
    };
    let blocks_per_sm = by_threads
        .min(by_shared_memory)
        .min(properties.max_blocks_per_sm);
    Ok(blocks_per_sm * properties.sm_count)
}
