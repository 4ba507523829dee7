use crate::device::GpuIndex;
use crate::parameters::{DecompositionBaseLog, DecompositionLevelCount, PolynomialSize};
use thiserror::Error;

/// Common error type reported by every device facing call of the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Invalid device index {index:?}, only {device_count} device(s) available")]
    InvalidDevice { index: GpuIndex, device_count: usize },

    #[error(
        "Not enough memory on device {index:?}: requested {requested} bytes, {available} bytes available"
    )]
    OutOfMemory {
        index: GpuIndex,
        requested: usize,
        available: usize,
    },

    #[error("Copies of zero bytes are rejected")]
    ZeroSizeCopy,

    #[error("Pointer is not valid for this operation: {0}")]
    InvalidPointer(String),

    #[error(
        "Polynomial size {0:?} is not supported, it should be a power of 2 between 512 and 8192"
    )]
    UnsupportedDegree(PolynomialSize),

    #[error("GLWE dimension {0} is not supported, the only supported GLWE dimension is 1")]
    GlweDimensionNotSupported(usize),

    #[error(
        "Decomposition with base log {base_log:?} and {level_count:?} levels does not fit a \
         {bits} bits torus"
    )]
    UnsupportedDecomposition {
        base_log: DecompositionBaseLog,
        level_count: DecompositionLevelCount,
        bits: usize,
    },

    #[error("Buffer size mismatch: expected {expected} elements, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Invalid device configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Device API failure: {0}")]
    DeviceApiFailure(String),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

impl DeviceError {
    pub(crate) fn poisoned<T>(_: std::sync::PoisonError<T>) -> Self {
        Self::DeviceApiFailure("device state lock poisoned".to_string())
    }
}
