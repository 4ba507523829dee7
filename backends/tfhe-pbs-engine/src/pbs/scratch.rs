//! Typed scratch layout of the bootstrap kernel.
//!
//! The per-sample working set is split in named components. A [`ScratchPlacement`] decides for
//! each of them whether it lives in the on-chip shared memory of the block or in the global
//! scratch of the sample, and views are carved out of both areas in the canonical component
//! order.

use super::PbsTier;
use crate::c64;
use crate::error::{DeviceError, DeviceResult};
use crate::numeric::UnsignedTorus;
use crate::parameters::SupportedPolynomialSize;
use aligned_vec::CACHELINE_ALIGN;
use bytemuck::Pod;
use dyn_stack::{PodStack, SizeOverflow, StackReq};

/// Buffers used by one sample during the blind rotation, in carving order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScratchComponent {
    /// GLWE accumulator, mask then body
    Accumulator,
    /// `acc * X^a - acc`, then the decomposition states
    AccumulatorRotated,
    /// Digits of the current level, mask then body
    AccumulatorDigits,
    /// Fourier transform of the digits of one polynomial
    LevelFourier,
    /// Running sum feeding the output mask
    MaskResultFourier,
    /// Running sum feeding the output body
    BodyResultFourier,
}

impl ScratchComponent {
    pub const ALL: [Self; 6] = [
        Self::Accumulator,
        Self::AccumulatorRotated,
        Self::AccumulatorDigits,
        Self::LevelFourier,
        Self::MaskResultFourier,
        Self::BodyResultFourier,
    ];

    pub fn req<Scalar: UnsignedTorus>(
        self,
        degree: SupportedPolynomialSize,
    ) -> Result<StackReq, SizeOverflow> {
        let polynomial_size = degree.polynomial_size().0;
        let fourier_size = degree.fourier_polynomial_size().0;
        match self {
            Self::Accumulator | Self::AccumulatorRotated | Self::AccumulatorDigits => {
                StackReq::try_new_aligned::<Scalar>(2 * polynomial_size, CACHELINE_ALIGN)
            }
            Self::LevelFourier | Self::MaskResultFourier | Self::BodyResultFourier => {
                StackReq::try_new_aligned::<c64>(fourier_size, CACHELINE_ALIGN)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScratchLocation {
    OnChip,
    Global,
}

/// Placement strategy of the scratch components, one per memory tier.
pub trait ScratchPlacement: Send + Sync + 'static {
    const TIER: PbsTier;

    fn location(component: ScratchComponent) -> ScratchLocation;
}

/// Every component in shared memory.
pub struct FullSm;

/// Only the fourier buffer of the current level in shared memory.
pub struct PartialSm;

/// Every component in global memory.
pub struct NoSm;

impl ScratchPlacement for FullSm {
    const TIER: PbsTier = PbsTier::FullSm;

    fn location(_: ScratchComponent) -> ScratchLocation {
        ScratchLocation::OnChip
    }
}

impl ScratchPlacement for PartialSm {
    const TIER: PbsTier = PbsTier::PartialSm;

    fn location(component: ScratchComponent) -> ScratchLocation {
        match component {
            ScratchComponent::LevelFourier => ScratchLocation::OnChip,
            _ => ScratchLocation::Global,
        }
    }
}

impl ScratchPlacement for NoSm {
    const TIER: PbsTier = PbsTier::NoSm;

    fn location(_: ScratchComponent) -> ScratchLocation {
        ScratchLocation::Global
    }
}

/// Memory requirements of one sample, split between on-chip and global memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScratchLayout {
    pub on_chip: StackReq,
    pub global: StackReq,
}

impl ScratchLayout {
    pub fn new<Scalar: UnsignedTorus, P: ScratchPlacement>(
        degree: SupportedPolynomialSize,
    ) -> DeviceResult<Self> {
        let overflow = |_: SizeOverflow| {
            DeviceError::DeviceApiFailure("scratch size overflows usize".to_string())
        };
        let mut on_chip = Vec::new();
        let mut global = Vec::new();
        for component in ScratchComponent::ALL {
            let req = component.req::<Scalar>(degree).map_err(overflow)?;
            match P::location(component) {
                ScratchLocation::OnChip => on_chip.push(req),
                ScratchLocation::Global => global.push(req),
            }
        }
        Ok(Self {
            on_chip: StackReq::try_all_of(on_chip).map_err(overflow)?,
            global: StackReq::try_all_of(global).map_err(overflow)?,
        })
    }

    pub fn for_tier<Scalar: UnsignedTorus>(
        tier: PbsTier,
        degree: SupportedPolynomialSize,
    ) -> DeviceResult<Self> {
        match tier {
            PbsTier::FullSm => Self::new::<Scalar, FullSm>(degree),
            PbsTier::PartialSm => Self::new::<Scalar, PartialSm>(degree),
            PbsTier::NoSm => Self::new::<Scalar, NoSm>(degree),
        }
    }

    /// Dynamic shared memory of a block, in bytes.
    pub fn on_chip_bytes(&self) -> usize {
        if self.on_chip == StackReq::empty() {
            return 0;
        }
        self.on_chip.unaligned_bytes_required()
    }

    /// Global scratch of one sample in bytes, padded so that consecutive samples stay aligned.
    pub fn global_bytes(&self) -> usize {
        if self.global == StackReq::empty() {
            return 0;
        }
        self.global
            .unaligned_bytes_required()
            .next_multiple_of(CACHELINE_ALIGN)
    }
}

/// Pair of stacks the views are carved from.
struct Carver<'a> {
    on_chip: PodStack<'a>,
    global: PodStack<'a>,
}

impl<'a> Carver<'a> {
    fn take<T: Pod, P: ScratchPlacement>(
        self,
        component: ScratchComponent,
        len: usize,
    ) -> (&'a mut [T], Self) {
        match P::location(component) {
            ScratchLocation::OnChip => {
                let (buf, on_chip) = self.on_chip.make_aligned_raw::<T>(len, CACHELINE_ALIGN);
                (
                    buf,
                    Self {
                        on_chip,
                        global: self.global,
                    },
                )
            }
            ScratchLocation::Global => {
                let (buf, global) = self.global.make_aligned_raw::<T>(len, CACHELINE_ALIGN);
                (
                    buf,
                    Self {
                        on_chip: self.on_chip,
                        global,
                    },
                )
            }
        }
    }
}

/// Views on the scratch of one sample.
pub(crate) struct PbsScratch<'a, Scalar> {
    pub accumulator: &'a mut [Scalar],
    pub rotated: &'a mut [Scalar],
    pub digits: &'a mut [Scalar],
    pub level_fourier: &'a mut [c64],
    pub mask_result: &'a mut [c64],
    pub body_result: &'a mut [c64],
}

impl<'a, Scalar: UnsignedTorus> PbsScratch<'a, Scalar> {
    /// Carve the views out of the block shared memory and the sample global scratch.
    ///
    /// Both areas must hold at least what [`ScratchLayout::new`] requires for `P`.
    pub fn carve<P: ScratchPlacement>(
        degree: SupportedPolynomialSize,
        shared: &'a mut [u8],
        global: &'a mut [u8],
    ) -> DeviceResult<Self> {
        let layout = ScratchLayout::new::<Scalar, P>(degree)?;
        if shared.len() < layout.on_chip_bytes() || global.len() < layout.global_bytes() {
            return Err(DeviceError::DeviceApiFailure(format!(
                "{:?} scratch needs {} shared and {} global bytes, got {} and {}",
                P::TIER,
                layout.on_chip_bytes(),
                layout.global_bytes(),
                shared.len(),
                global.len()
            )));
        }

        let polynomial_size = degree.polynomial_size().0;
        let fourier_size = degree.fourier_polynomial_size().0;
        let carver = Carver {
            on_chip: PodStack::new(shared),
            global: PodStack::new(global),
        };
        let (accumulator, carver) =
            carver.take::<Scalar, P>(ScratchComponent::Accumulator, 2 * polynomial_size);
        let (rotated, carver) =
            carver.take::<Scalar, P>(ScratchComponent::AccumulatorRotated, 2 * polynomial_size);
        let (digits, carver) =
            carver.take::<Scalar, P>(ScratchComponent::AccumulatorDigits, 2 * polynomial_size);
        let (level_fourier, carver) =
            carver.take::<c64, P>(ScratchComponent::LevelFourier, fourier_size);
        let (mask_result, carver) =
            carver.take::<c64, P>(ScratchComponent::MaskResultFourier, fourier_size);
        let (body_result, _) =
            carver.take::<c64, P>(ScratchComponent::BodyResultFourier, fourier_size);

        Ok(Self {
            accumulator,
            rotated,
            digits,
            level_fourier,
            mask_result,
            body_result,
        })
    }
}
