//! Kernel launch emulation.
//!
//! A grid is a set of independent thread blocks executed in parallel by rayon. Inside a block,
//! the threads of a phase run one after the other, each over its strided subset of indices, and
//! phases are separated by [`ThreadBlock::sync_threads`].

use crate::config::DeviceProperties;
use crate::error::{DeviceError, DeviceResult};
use aligned_vec::avec;
use rayon::prelude::*;
use std::cell::Cell;

/// Shape of a kernel launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid_dim: usize,
    pub block_dim: usize,
    /// Dynamic on-chip shared memory of each block, in bytes
    pub dynamic_shared_memory: usize,
}

impl LaunchConfig {
    /// Reject launches the device could not run.
    pub fn validate(&self, properties: &DeviceProperties) -> DeviceResult<()> {
        if self.block_dim == 0 || self.block_dim > properties.max_threads_per_block {
            return Err(DeviceError::DeviceApiFailure(format!(
                "invalid configuration argument: {} threads per block, at most {} allowed",
                self.block_dim, properties.max_threads_per_block
            )));
        }
        if self.dynamic_shared_memory > properties.max_shared_memory_per_block {
            return Err(DeviceError::DeviceApiFailure(format!(
                "too many resources requested for launch: {} bytes of shared memory, at most {} \
                 allowed",
                self.dynamic_shared_memory, properties.max_shared_memory_per_block
            )));
        }
        Ok(())
    }
}

/// Execution context of one block.
#[derive(Debug)]
pub struct ThreadBlock {
    block_idx: usize,
    block_dim: usize,
    barriers: Cell<usize>,
}

impl ThreadBlock {
    pub fn new(block_idx: usize, block_dim: usize) -> Self {
        Self {
            block_idx,
            block_dim,
            barriers: Cell::new(0),
        }
    }

    /// A block of a single thread, used to run device routines from the host.
    pub fn single() -> Self {
        Self::new(0, 1)
    }

    pub fn block_idx(&self) -> usize {
        self.block_idx
    }

    pub fn block_dim(&self) -> usize {
        self.block_dim
    }

    /// Run one phase: every thread `tid` handles the indices `tid, tid + block_dim, ...` below
    /// `len`.
    #[inline]
    pub fn for_each_strided(&self, len: usize, mut f: impl FnMut(usize)) {
        for tid in 0..self.block_dim {
            (tid..len).step_by(self.block_dim).for_each(&mut f);
        }
    }

    /// Block wide barrier.
    #[inline]
    pub fn sync_threads(&self) {
        self.barriers.set(self.barriers.get() + 1);
    }

    pub fn barrier_count(&self) -> usize {
        self.barriers.get()
    }
}

/// Run `kernel` once per block, handing each block its own item of `blocks` and a zeroed on-chip
/// buffer of `config.dynamic_shared_memory` bytes.
///
/// Returns the number of barriers each block went through.
pub(crate) fn launch_blocks<Item, I, F>(
    config: &LaunchConfig,
    blocks: I,
    kernel: F,
) -> DeviceResult<Vec<usize>>
where
    Item: Send,
    I: IndexedParallelIterator<Item = Item>,
    F: Fn(&ThreadBlock, &mut [u8], Item) -> DeviceResult<()> + Sync,
{
    if blocks.len() != config.grid_dim {
        return Err(DeviceError::DeviceApiFailure(format!(
            "grid of {} blocks launched over {} work items",
            config.grid_dim,
            blocks.len()
        )));
    }
    let barriers: Vec<usize> = blocks
        .enumerate()
        .map_init(
            || avec![0u8; config.dynamic_shared_memory],
            |shared, (block_idx, item)| {
                // Shared memory content does not outlive a block
                shared.fill(0);
                let block = ThreadBlock::new(block_idx, config.block_dim);
                kernel(&block, shared, item).map(|()| block.barrier_count())
            },
        )
        .collect::<DeviceResult<_>>()?;

    #[cfg(feature = "debug")]
    if let Some(first) = barriers.first() {
        if barriers.iter().any(|count| count != first) {
            return Err(DeviceError::DeviceApiFailure(
                "blocks of a launch went through a different number of barriers".to_string(),
            ));
        }
    }
    Ok(barriers)
}
