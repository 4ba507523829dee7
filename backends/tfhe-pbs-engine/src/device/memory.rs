//! Device memory model.
//!
//! Every allocation is a chunk of cache-line aligned bytes owned by the allocation table of its
//! device. Handles only record where a chunk lives, the table is the source of truth.

use super::GpuIndex;
use crate::error::{DeviceError, DeviceResult};
use aligned_vec::{avec, AVec};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Where an allocation lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Global memory of the device
    Device,
    /// Page-locked host memory used to stage transfers
    PinnedHost,
}

/// Opaque handle on an allocation made through the
/// [`DeviceManager`](`super::DeviceManager`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DevicePointer {
    pub(crate) device: GpuIndex,
    pub(crate) id: u64,
    pub(crate) kind: MemoryKind,
    pub(crate) size_b: usize,
}

impl DevicePointer {
    pub fn device(&self) -> GpuIndex {
        self.device
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    /// Size of the allocation in bytes
    pub fn size_b(&self) -> usize {
        self.size_b
    }

    pub(crate) fn check_range(&self, offset_b: usize, len_b: usize) -> DeviceResult<()> {
        match offset_b.checked_add(len_b) {
            Some(end) if end <= self.size_b => Ok(()),
            _ => Err(DeviceError::InvalidPointer(format!(
                "range {offset_b}..{offset_b}+{len_b} overflows the {} bytes allocation {}",
                self.size_b, self.id
            ))),
        }
    }
}

pub(crate) struct MemoryChunk {
    pub(crate) kind: MemoryKind,
    pub(crate) data: RwLock<AVec<u8>>,
}

impl MemoryChunk {
    fn new(kind: MemoryKind, size_b: usize) -> Self {
        Self {
            kind,
            data: RwLock::new(avec![0u8; size_b]),
        }
    }
}

/// Typed view of device bytes, as seen by a kernel.
pub(crate) fn cast_device_slice<T: bytemuck::Pod>(bytes: &[u8]) -> DeviceResult<&[T]> {
    bytemuck::try_cast_slice(bytes)
        .map_err(|err| DeviceError::DeviceApiFailure(format!("misaligned address: {err:?}")))
}

pub(crate) fn cast_device_slice_mut<T: bytemuck::Pod>(bytes: &mut [u8]) -> DeviceResult<&mut [T]> {
    bytemuck::try_cast_slice_mut(bytes)
        .map_err(|err| DeviceError::DeviceApiFailure(format!("misaligned address: {err:?}")))
}

/// Allocation table of one device
pub(crate) struct MemoryTable {
    device: GpuIndex,
    capacity_b: usize,
    used_b: usize,
    next_id: u64,
    chunks: HashMap<u64, (usize, Arc<MemoryChunk>)>,
}

impl MemoryTable {
    pub(crate) fn new(device: GpuIndex, capacity_b: usize) -> Self {
        Self {
            device,
            capacity_b,
            used_b: 0,
            next_id: 0,
            chunks: HashMap::new(),
        }
    }

    pub(crate) fn free_b(&self) -> usize {
        self.capacity_b - self.used_b
    }

    pub(crate) fn validate(&self, size_b: usize) -> DeviceResult<()> {
        if size_b > self.free_b() {
            return Err(DeviceError::OutOfMemory {
                index: self.device,
                requested: size_b,
                available: self.free_b(),
            });
        }
        Ok(())
    }

    /// Register a new chunk. Pinned host memory is not accounted against the device capacity.
    pub(crate) fn alloc(&mut self, size_b: usize, kind: MemoryKind) -> DevicePointer {
        if kind == MemoryKind::Device {
            // Unchecked allocations may go past the capacity, free memory then saturates to 0
            self.used_b = self.used_b.saturating_add(size_b).min(self.capacity_b);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.chunks
            .insert(id, (size_b, Arc::new(MemoryChunk::new(kind, size_b))));
        DevicePointer {
            device: self.device,
            id,
            kind,
            size_b,
        }
    }

    /// Look the chunk up and check it is of the expected kind
    pub(crate) fn get(
        &self,
        ptr: &DevicePointer,
        expected: MemoryKind,
    ) -> DeviceResult<Arc<MemoryChunk>> {
        let (_, chunk) = self.chunks.get(&ptr.id).ok_or_else(|| {
            DeviceError::InvalidPointer(format!(
                "allocation {} is unknown to device {:?}",
                ptr.id, self.device
            ))
        })?;
        if chunk.kind != expected || ptr.kind != expected {
            return Err(DeviceError::InvalidPointer(format!(
                "allocation {} is {:?} memory, {expected:?} memory was expected",
                ptr.id, chunk.kind
            )));
        }
        Ok(chunk.clone())
    }

    pub(crate) fn release(&mut self, ptr: &DevicePointer) -> DeviceResult<()> {
        let (size_b, chunk) = self.chunks.remove(&ptr.id).ok_or_else(|| {
            DeviceError::InvalidPointer(format!(
                "allocation {} is unknown to device {:?} or was already freed",
                ptr.id, self.device
            ))
        })?;
        if chunk.kind == MemoryKind::Device {
            self.used_b = self.used_b.saturating_sub(size_b);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounting() {
        let mut table = MemoryTable::new(GpuIndex(0), 1024);
        assert!(table.validate(1024).is_ok());
        let a = table.alloc(1000, MemoryKind::Device);
        assert_eq!(table.free_b(), 24);
        assert_eq!(
            table.validate(25),
            Err(DeviceError::OutOfMemory {
                index: GpuIndex(0),
                requested: 25,
                available: 24,
            })
        );
        // pinned staging buffers do not consume device memory
        let pinned = table.alloc(4096, MemoryKind::PinnedHost);
        assert_eq!(table.free_b(), 24);
        assert!(table.get(&pinned, MemoryKind::Device).is_err());
        assert!(table.get(&pinned, MemoryKind::PinnedHost).is_ok());

        table.release(&a).unwrap();
        assert_eq!(table.free_b(), 1024);
        assert!(matches!(
            table.release(&a),
            Err(DeviceError::InvalidPointer(_))
        ));
    }

    #[test]
    fn ranges() {
        let mut table = MemoryTable::new(GpuIndex(0), 1024);
        let ptr = table.alloc(64, MemoryKind::Device);
        assert!(ptr.check_range(0, 64).is_ok());
        assert!(ptr.check_range(32, 32).is_ok());
        assert!(ptr.check_range(32, 33).is_err());
        assert!(ptr.check_range(usize::MAX, 2).is_err());
        let chunk = table.get(&ptr, MemoryKind::Device).unwrap();
        let data = chunk.data.read().unwrap();
        assert_eq!(data.len(), 64);
        assert!(data.iter().all(|b| *b == 0));
    }
}
