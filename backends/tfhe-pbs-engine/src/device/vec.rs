use super::{DeviceManager, DevicePointer, GpuIndex, StreamHandle};
use crate::error::{DeviceError, DeviceResult};
use bytemuck::Pod;
use std::marker::PhantomData;
use std::mem::size_of;

/// A contiguous array type stored in the device memory.
///
/// Note:
/// -----
///
/// Such a structure:
/// + can be created via [`DeviceVec::new`] or [`DeviceVec::from_cpu_async`]
/// + can not be copied or cloned but can be (mutably) borrowed
/// + frees the device memory on drop.
#[derive(Debug)]
pub struct DeviceVec<T: Pod> {
    ptr: DevicePointer,
    len: usize,
    manager: DeviceManager,
    _phantom: PhantomData<T>,
}

impl<T: Pod> DeviceVec<T> {
    /// Allocate `len` zeroed elements on the device of `stream`.
    pub fn new(len: usize, manager: &DeviceManager, stream: &StreamHandle) -> DeviceResult<Self> {
        let size_b = len
            .checked_mul(size_of::<T>())
            .ok_or(DeviceError::OutOfMemory {
                index: stream.device,
                requested: usize::MAX,
                available: manager.free_memory(stream.device)?,
            })?;
        let ptr = manager.allocate(size_b, stream.device)?;
        Ok(Self {
            ptr,
            len,
            manager: manager.clone(),
            _phantom: PhantomData,
        })
    }

    /// Allocate a vector on the device and enqueue the copy of `src` into it.
    pub fn from_cpu_async(
        src: &[T],
        manager: &DeviceManager,
        stream: &StreamHandle,
    ) -> DeviceResult<Self> {
        let mut res = Self::new(src.len(), manager, stream)?;
        // Zero sized copies are rejected by the device
        if !src.is_empty() {
            res.copy_from_cpu_async(src, stream)?;
        }
        Ok(res)
    }

    pub fn copy_from_cpu_async(&mut self, src: &[T], stream: &StreamHandle) -> DeviceResult<()> {
        if src.len() != self.len {
            return Err(DeviceError::BufferSizeMismatch {
                expected: self.len,
                actual: src.len(),
            });
        }
        self.manager.copy_to_device_async(stream, &self.ptr, 0, src)
    }

    /// # Safety
    ///
    /// - `stream` __must__ be synchronized before `dst` is read, moved or dropped
    pub unsafe fn copy_to_cpu_async(&self, dst: &mut [T], stream: &StreamHandle) -> DeviceResult<()> {
        if dst.len() != self.len {
            return Err(DeviceError::BufferSizeMismatch {
                expected: self.len,
                actual: dst.len(),
            });
        }
        self.manager.copy_to_host_async(stream, dst, &self.ptr, 0)
    }

    /// Wait for the stream and return the content of the vector.
    pub fn to_cpu(&self, stream: &StreamHandle) -> DeviceResult<Vec<T>> {
        let mut dst = vec![T::zeroed(); self.len];
        if self.len == 0 {
            self.manager.synchronize_stream(stream)?;
        } else {
            self.manager.copy_to_host(stream, &mut dst, &self.ptr, 0)?;
        }
        Ok(dst)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn ptr(&self) -> &DevicePointer {
        &self.ptr
    }

    pub fn gpu_index(&self) -> GpuIndex {
        self.ptr.device
    }

    pub fn manager(&self) -> &DeviceManager {
        &self.manager
    }
}

impl<T: Pod> Drop for DeviceVec<T> {
    fn drop(&mut self) {
        if let Err(err) = self.manager.free(self.ptr, self.ptr.device) {
            tracing::warn!(?err, "Failed to free device vector");
        }
    }
}
