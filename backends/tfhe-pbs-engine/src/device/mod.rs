//! Device resource manager.
//!
//! Owns the devices of a simulated platform, their allocation tables, their streams and the
//! per-device constant storage used by the kernels.

pub(crate) mod launch;
pub(crate) mod memory;
pub(crate) mod stream;
mod vec;

pub use crate::config::{DeviceProperties, PlatformConfig};
pub use launch::{LaunchConfig, ThreadBlock};
pub use memory::{DevicePointer, MemoryKind};
pub use stream::StreamHandle;
pub use vec::DeviceVec;

use crate::error::{DeviceError, DeviceResult};
use crate::fft::FftTables;
use crate::parameters::SupportedPolynomialSize;
use crate::pbs::PbsTier;
use bytemuck::Pod;
use memory::{MemoryChunk, MemoryTable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use stream::{StreamWorker, Task};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GpuIndex(pub u32);

/// Key of the launch configuration cache: degree, torus width and shared memory ceiling.
pub(crate) type TierCacheKey = (SupportedPolynomialSize, usize, usize);

pub(crate) struct Device {
    pub(crate) properties: DeviceProperties,
    memory: Arc<Mutex<MemoryTable>>,
    streams: Mutex<HashMap<u64, Arc<StreamWorker>>>,
    /// Constant storage holding the twiddle tables of the last requested degree
    fft_tables: RwLock<Option<Arc<FftTables>>>,
    pub(crate) tier_cache: Mutex<HashMap<TierCacheKey, PbsTier>>,
}

struct ManagerInner {
    devices: Vec<Device>,
    current: AtomicU32,
    next_stream_id: AtomicU64,
}

/// Handle on the devices of the platform.
///
/// Cloning the manager is cheap, every clone refers to the same devices.
#[derive(Clone)]
pub struct DeviceManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("device_count", &self.device_count())
            .finish()
    }
}

/// Host destination of an asynchronous device to host copy.
struct HostDestination(*mut u8);

// SAFETY: the caller of the async copy guarantees the destination outlives the copy and is not
// accessed before the stream is synchronized
unsafe impl Send for HostDestination {}

impl HostDestination {
    fn get(&self) -> *mut u8 {
        self.0
    }
}

impl DeviceManager {
    pub fn new(config: PlatformConfig) -> DeviceResult<Self> {
        config.check()?;
        let devices = config
            .devices
            .into_iter()
            .enumerate()
            .map(|(index, properties)| {
                let index = GpuIndex(index as u32);
                tracing::debug!(?index, name = %properties.name, "Registering device");
                let memory = MemoryTable::new(index, properties.global_memory);
                Device {
                    memory: Arc::new(Mutex::new(memory)),
                    properties,
                    streams: Mutex::new(HashMap::new()),
                    fft_tables: RwLock::new(None),
                    tier_cache: Mutex::new(HashMap::new()),
                }
            })
            .collect();
        Ok(Self {
            inner: Arc::new(ManagerInner {
                devices,
                current: AtomicU32::new(0),
                next_stream_id: AtomicU64::new(0),
            }),
        })
    }

    /// Build the platform described by the environment, see
    /// [`PlatformConfig::from_env_or_default`].
    pub fn from_env_or_default() -> DeviceResult<Self> {
        Self::new(PlatformConfig::from_env_or_default()?)
    }

    pub fn device_count(&self) -> usize {
        self.inner.devices.len()
    }

    pub(crate) fn device(&self, index: GpuIndex) -> DeviceResult<&Device> {
        self.inner
            .devices
            .get(index.0 as usize)
            .ok_or(DeviceError::InvalidDevice {
                index,
                device_count: self.device_count(),
            })
    }

    /// Make `index` the device used by calls that do not name one.
    pub fn select_device(&self, index: GpuIndex) -> DeviceResult<()> {
        self.device(index)?;
        self.inner.current.store(index.0, Ordering::Relaxed);
        Ok(())
    }

    pub fn current_device(&self) -> GpuIndex {
        GpuIndex(self.inner.current.load(Ordering::Relaxed))
    }

    pub fn properties(&self, index: GpuIndex) -> DeviceResult<&DeviceProperties> {
        Ok(&self.device(index)?.properties)
    }

    /// Maximum on-chip shared memory a single block may request, in bytes.
    pub fn max_shared_memory(&self, index: GpuIndex) -> DeviceResult<usize> {
        Ok(self.device(index)?.properties.max_shared_memory_per_block)
    }

    pub fn free_memory(&self, index: GpuIndex) -> DeviceResult<usize> {
        let memory = self.device(index)?.memory.lock().map_err(DeviceError::poisoned)?;
        Ok(memory.free_b())
    }

    pub fn create_stream(&self, index: GpuIndex) -> DeviceResult<StreamHandle> {
        let device = self.device(index)?;
        let handle = StreamHandle {
            device: index,
            id: self.inner.next_stream_id.fetch_add(1, Ordering::Relaxed),
        };
        let worker = StreamWorker::spawn(handle)?;
        device
            .streams
            .lock()
            .map_err(DeviceError::poisoned)?
            .insert(handle.id, Arc::new(worker));
        tracing::debug!(?handle, "Stream created");
        Ok(handle)
    }

    /// Wait for the work enqueued on the stream, then release it.
    pub fn destroy_stream(&self, handle: StreamHandle) -> DeviceResult<()> {
        let worker = self
            .device(handle.device)?
            .streams
            .lock()
            .map_err(DeviceError::poisoned)?
            .remove(&handle.id)
            .ok_or_else(|| {
                DeviceError::DeviceApiFailure(format!("unknown stream {handle:?}"))
            })?;
        tracing::debug!(?handle, "Stream destroyed");
        worker.shutdown()
    }

    fn stream(&self, handle: &StreamHandle) -> DeviceResult<Arc<StreamWorker>> {
        self.device(handle.device)?
            .streams
            .lock()
            .map_err(DeviceError::poisoned)?
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| DeviceError::DeviceApiFailure(format!("unknown stream {handle:?}")))
    }

    pub(crate) fn enqueue(&self, handle: &StreamHandle, task: Task) -> DeviceResult<()> {
        self.stream(handle)?.enqueue(task)
    }

    /// Block until every stream of the device is idle.
    ///
    /// Failures of work enqueued since the last synchronization are reported here.
    pub fn synchronize_device(&self, index: GpuIndex) -> DeviceResult<()> {
        let streams: Vec<_> = self
            .device(index)?
            .streams
            .lock()
            .map_err(DeviceError::poisoned)?
            .values()
            .cloned()
            .collect();
        // Every stream is drained even if one of them reports a failure
        streams
            .iter()
            .map(|stream| stream.synchronize())
            .fold(Ok(()), |acc, result| acc.and(result))
    }

    pub fn synchronize_stream(&self, handle: &StreamHandle) -> DeviceResult<()> {
        self.stream(handle)?.synchronize()
    }

    /// Check that `size_b` bytes could be allocated on the device, without allocating.
    pub fn validate_allocation(&self, size_b: usize, index: GpuIndex) -> DeviceResult<()> {
        self.device(index)?
            .memory
            .lock()
            .map_err(DeviceError::poisoned)?
            .validate(size_b)
    }

    /// Allocate `size_b` zeroed bytes of global memory on the device.
    pub fn allocate(&self, size_b: usize, index: GpuIndex) -> DeviceResult<DevicePointer> {
        let mut memory = self.device(index)?.memory.lock().map_err(DeviceError::poisoned)?;
        memory.validate(size_b)?;
        let ptr = memory.alloc(size_b, MemoryKind::Device);
        tracing::debug!(?index, size_b, id = ptr.id, "Device allocation");
        Ok(ptr)
    }

    /// Allocate without checking the available memory.
    ///
    /// # Safety
    ///
    /// - [`DeviceManager::validate_allocation`] __must__ have accepted `size_b` on this device,
    ///   otherwise the allocation is not backed by the device capacity
    pub unsafe fn allocate_unchecked(
        &self,
        size_b: usize,
        index: GpuIndex,
    ) -> DeviceResult<DevicePointer> {
        let mut memory = self.device(index)?.memory.lock().map_err(DeviceError::poisoned)?;
        Ok(memory.alloc(size_b, MemoryKind::Device))
    }

    /// Allocate page-locked host memory usable as a staging buffer for the device.
    pub fn allocate_pinned(&self, size_b: usize, index: GpuIndex) -> DeviceResult<DevicePointer> {
        let mut memory = self.device(index)?.memory.lock().map_err(DeviceError::poisoned)?;
        Ok(memory.alloc(size_b, MemoryKind::PinnedHost))
    }

    pub fn free(&self, ptr: DevicePointer, index: GpuIndex) -> DeviceResult<()> {
        let device = self.device(index)?;
        if ptr.device != index {
            return Err(DeviceError::InvalidPointer(format!(
                "allocation {} belongs to device {:?}, not {index:?}",
                ptr.id, ptr.device
            )));
        }
        tracing::debug!(?index, id = ptr.id, "Device free");
        device
            .memory
            .lock()
            .map_err(DeviceError::poisoned)?
            .release(&ptr)
    }

    /// Free the allocation once the work already enqueued on `stream` completed.
    pub fn free_async(&self, stream: &StreamHandle, ptr: DevicePointer) -> DeviceResult<()> {
        let memory = self.device(ptr.device)?.memory.clone();
        self.enqueue(
            stream,
            Box::new(move || {
                tracing::debug!(index = ?ptr.device, id = ptr.id, "Device free");
                memory.lock().map_err(DeviceError::poisoned)?.release(&ptr)
            }),
        )
    }

    /// Lookup the chunk behind `ptr` and check it can be accessed from `stream` over
    /// `offset_b..offset_b + len_b`.
    fn checked_chunk(
        &self,
        stream: &StreamHandle,
        ptr: &DevicePointer,
        kind: MemoryKind,
        offset_b: usize,
        len_b: usize,
    ) -> DeviceResult<Arc<MemoryChunk>> {
        if len_b == 0 {
            return Err(DeviceError::ZeroSizeCopy);
        }
        self.device(stream.device)?;
        let device = self.device(ptr.device)?;
        if ptr.device != stream.device {
            return Err(DeviceError::InvalidPointer(format!(
                "allocation {} lives on device {:?}, the stream on device {:?}",
                ptr.id, ptr.device, stream.device
            )));
        }
        ptr.check_range(offset_b, len_b)?;
        device
            .memory
            .lock()
            .map_err(DeviceError::poisoned)?
            .get(ptr, kind)
    }

    pub(crate) fn chunk(&self, ptr: &DevicePointer) -> DeviceResult<Arc<MemoryChunk>> {
        self.device(ptr.device)?
            .memory
            .lock()
            .map_err(DeviceError::poisoned)?
            .get(ptr, MemoryKind::Device)
    }

    /// Enqueue a copy of `src` to device memory at `dst_offset_b` bytes from `dst`.
    ///
    /// `src` is staged when the copy is enqueued, it can be reused as soon as this returns.
    pub fn copy_to_device_async<T: Pod>(
        &self,
        stream: &StreamHandle,
        dst: &DevicePointer,
        dst_offset_b: usize,
        src: &[T],
    ) -> DeviceResult<()> {
        let size_b = std::mem::size_of_val(src);
        let chunk = self.checked_chunk(stream, dst, MemoryKind::Device, dst_offset_b, size_b)?;
        self.enqueue_host_to_device(stream, chunk, dst_offset_b, src)
    }

    /// Same as [`DeviceManager::copy_to_device_async`] without validating the destination.
    ///
    /// # Safety
    ///
    /// - `dst` __must__ be a live device allocation of the stream's device, large enough for the
    ///   copy. Violations are reported as a stream failure at the next synchronization.
    pub unsafe fn copy_to_device_unchecked_async<T: Pod>(
        &self,
        stream: &StreamHandle,
        dst: &DevicePointer,
        dst_offset_b: usize,
        src: &[T],
    ) -> DeviceResult<()> {
        let chunk = self.chunk(dst)?;
        self.enqueue_host_to_device(stream, chunk, dst_offset_b, src)
    }

    fn enqueue_host_to_device<T: Pod>(
        &self,
        stream: &StreamHandle,
        chunk: Arc<MemoryChunk>,
        dst_offset_b: usize,
        src: &[T],
    ) -> DeviceResult<()> {
        let staged = bytemuck::cast_slice::<T, u8>(src).to_vec();
        tracing::trace!(?stream, size_b = staged.len(), "Copy host to device");
        self.enqueue(
            stream,
            Box::new(move || {
                let mut data = chunk.data.write().map_err(DeviceError::poisoned)?;
                data.get_mut(dst_offset_b..dst_offset_b + staged.len())
                    .ok_or_else(|| {
                        DeviceError::DeviceApiFailure("illegal memory access".to_string())
                    })?
                    .copy_from_slice(&staged);
                Ok(())
            }),
        )
    }

    /// Enqueue a copy of device memory starting `src_offset_b` bytes from `src` into `dst`.
    ///
    /// # Safety
    ///
    /// - `stream` __must__ be synchronized before `dst` is read, moved or dropped
    pub unsafe fn copy_to_host_async<T: Pod>(
        &self,
        stream: &StreamHandle,
        dst: &mut [T],
        src: &DevicePointer,
        src_offset_b: usize,
    ) -> DeviceResult<()> {
        let size_b = std::mem::size_of_val(dst);
        let chunk = self.checked_chunk(stream, src, MemoryKind::Device, src_offset_b, size_b)?;
        let dst = HostDestination(dst.as_mut_ptr().cast::<u8>());
        tracing::trace!(?stream, size_b, "Copy device to host");
        self.enqueue(
            stream,
            Box::new(move || {
                let data = chunk.data.read().map_err(DeviceError::poisoned)?;
                let src = &data[src_offset_b..src_offset_b + size_b];
                // SAFETY: the destination holds size_b bytes and is kept alive by the caller
                unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst.get(), size_b) };
                Ok(())
            }),
        )
    }

    /// Copy device memory to `dst` and wait for the copy to complete.
    pub fn copy_to_host<T: Pod>(
        &self,
        stream: &StreamHandle,
        dst: &mut [T],
        src: &DevicePointer,
        src_offset_b: usize,
    ) -> DeviceResult<()> {
        unsafe { self.copy_to_host_async(stream, dst, src, src_offset_b)? };
        self.synchronize_stream(stream)
    }

    pub fn copy_device_to_device_async(
        &self,
        stream: &StreamHandle,
        dst: &DevicePointer,
        dst_offset_b: usize,
        src: &DevicePointer,
        src_offset_b: usize,
        size_b: usize,
    ) -> DeviceResult<()> {
        let src = self.checked_chunk(stream, src, MemoryKind::Device, src_offset_b, size_b)?;
        let dst = self.checked_chunk(stream, dst, MemoryKind::Device, dst_offset_b, size_b)?;
        tracing::trace!(?stream, size_b, "Copy device to device");
        self.enqueue(
            stream,
            Box::new(move || {
                // Staged so that no two chunk locks are ever held together
                let staged = src.data.read().map_err(DeviceError::poisoned)?
                    [src_offset_b..src_offset_b + size_b]
                    .to_vec();
                dst.data.write().map_err(DeviceError::poisoned)?
                    [dst_offset_b..dst_offset_b + size_b]
                    .copy_from_slice(&staged);
                Ok(())
            }),
        )
    }

    /// Set every byte of the allocation to `value`.
    pub fn memset_async(
        &self,
        stream: &StreamHandle,
        ptr: &DevicePointer,
        value: u8,
    ) -> DeviceResult<()> {
        if ptr.size_b == 0 {
            return Ok(());
        }
        let chunk = self.checked_chunk(stream, ptr, MemoryKind::Device, 0, ptr.size_b)?;
        self.enqueue(
            stream,
            Box::new(move || {
                chunk.data.write().map_err(DeviceError::poisoned)?.fill(value);
                Ok(())
            }),
        )
    }

    /// Twiddle tables of `degree` in the constant storage of the device.
    ///
    /// Requesting the degree already loaded is free; requesting another degree replaces the
    /// tables. Work already enqueued keeps the snapshot it was launched with.
    pub fn load_twiddle_tables(
        &self,
        index: GpuIndex,
        degree: SupportedPolynomialSize,
    ) -> DeviceResult<Arc<FftTables>> {
        let device = self.device(index)?;
        if let Some(tables) = device
            .fft_tables
            .read()
            .map_err(DeviceError::poisoned)?
            .as_ref()
            .filter(|tables| tables.degree() == degree)
        {
            return Ok(tables.clone());
        }

        let mut slot = device.fft_tables.write().map_err(DeviceError::poisoned)?;
        match slot.as_ref() {
            Some(tables) if tables.degree() == degree => Ok(tables.clone()),
            previous => {
                tracing::debug!(
                    ?index,
                    ?degree,
                    previous = ?previous.map(|tables| tables.degree()),
                    "Building twiddle tables"
                );
                let tables = Arc::new(FftTables::new(degree));
                *slot = Some(tables.clone());
                Ok(tables)
            }
        }
    }
}
