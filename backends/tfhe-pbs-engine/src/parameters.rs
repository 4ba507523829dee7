//! Parameter new-types shared by every stage of the bootstrap.

use crate::error::{DeviceError, DeviceResult};
use serde::{Deserialize, Serialize};

/// The number of ciphertexts in an lwe ciphertext list.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct LweCiphertextCount(pub usize);

/// The number of scalar in an LWE mask, or the length of an LWE secret key.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct LweDimension(pub usize);

impl LweDimension {
    /// Return the associated [`LweSize`].
    pub fn to_lwe_size(&self) -> LweSize {
        LweSize(self.0 + 1)
    }
}

/// The number of scalar in an LWE ciphertext, i.e. the number of scalar in an LWE mask plus one.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct LweSize(pub usize);

impl LweSize {
    /// Return the associated [`LweDimension`].
    pub fn to_lwe_dimension(&self) -> LweDimension {
        LweDimension(self.0 - 1)
    }
}

/// The number of polynomials of a GLWE mask, or the size of a GLWE secret key.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct GlweDimension(pub usize);

impl GlweDimension {
    pub fn to_glwe_size(&self) -> GlweSize {
        GlweSize(self.0 + 1)
    }
}

/// The number of polynomials in a GLWE ciphertext, i.e. the number of polynomials in a GLWE mask
/// plus one.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct GlweSize(pub usize);

/// The number of coefficients of a polynomial.
///
/// Assuming a polynomial $a\_0 + a\_1X + /dots + a\_{N-1}X^{N-1}$, this new-type contains $N$.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolynomialSize(pub usize);

impl PolynomialSize {
    pub fn log2(&self) -> usize {
        self.0.ilog2() as usize
    }

    pub fn to_fourier_polynomial_size(&self) -> FourierPolynomialSize {
        FourierPolynomialSize(self.0 / 2)
    }
}

/// The number of elements in the container of a fourier polynomial.
///
/// Assuming a standard polynomial $a\_0 + a\_1X + /dots + a\_{N-1}X^{N-1}$, this new-type contains
/// $\frac{N}{2}$.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FourierPolynomialSize(pub usize);

/// The logarithm of the base used in a decomposition.
///
/// When decomposing an integer over powers of the $2^B$ basis, this type represents the $B$ value.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub struct DecompositionBaseLog(pub usize);

/// The number of levels used in a decomposition.
///
/// When decomposing an integer over the $l$ largest powers of the basis, this type represents
/// the $l$ value.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub struct DecompositionLevelCount(pub usize);

/// The polynomial sizes the device kernels are compiled for.
///
/// Every kernel dispatches on this enum, so adding a degree means adding a variant and handling
/// it in each exhaustive `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SupportedPolynomialSize {
    N512,
    N1024,
    N2048,
    N4096,
    N8192,
}

impl SupportedPolynomialSize {
    pub const ALL: [Self; 5] = [Self::N512, Self::N1024, Self::N2048, Self::N4096, Self::N8192];

    pub fn polynomial_size(self) -> PolynomialSize {
        PolynomialSize(match self {
            Self::N512 => 512,
            Self::N1024 => 1024,
            Self::N2048 => 2048,
            Self::N4096 => 4096,
            Self::N8192 => 8192,
        })
    }

    pub fn fourier_polynomial_size(self) -> FourierPolynomialSize {
        self.polynomial_size().to_fourier_polynomial_size()
    }

    /// Number of coefficients handled by a single thread of a bootstrap block.
    pub fn coefficients_per_thread(self) -> usize {
        match self {
            Self::N512 | Self::N1024 => 4,
            Self::N2048 => 8,
            Self::N4096 => 16,
            Self::N8192 => 32,
        }
    }

    /// Number of threads of a block working on one polynomial.
    pub fn block_dim(self) -> usize {
        self.polynomial_size().0 / self.coefficients_per_thread()
    }
}

impl TryFrom<PolynomialSize> for SupportedPolynomialSize {
    type Error = DeviceError;

    fn try_from(value: PolynomialSize) -> DeviceResult<Self> {
        match value.0 {
            512 => Ok(Self::N512),
            1024 => Ok(Self::N1024),
            2048 => Ok(Self::N2048),
            4096 => Ok(Self::N4096),
            8192 => Ok(Self::N8192),
            _ => Err(DeviceError::UnsupportedDegree(value)),
        }
    }
}

/// Parameters of a programmable bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PbsParameters {
    pub lwe_dimension: LweDimension,
    pub glwe_dimension: GlweDimension,
    pub polynomial_size: PolynomialSize,
    pub decomp_base_log: DecompositionBaseLog,
    pub decomp_level_count: DecompositionLevelCount,
}

impl PbsParameters {
    /// Check the parameters against what the device kernels support for a torus of `bits` bits.
    pub fn validate(&self, bits: usize) -> DeviceResult<SupportedPolynomialSize> {
        let degree = SupportedPolynomialSize::try_from(self.polynomial_size)?;
        if self.glwe_dimension.0 != 1 {
            return Err(DeviceError::GlweDimensionNotSupported(self.glwe_dimension.0));
        }
        validate_decomposition(self.decomp_base_log, self.decomp_level_count, bits)?;
        Ok(degree)
    }

    /// Number of complex values of a bootstrapping key in the fourier domain.
    pub fn fourier_bootstrap_key_len(&self) -> usize {
        let glwe_size = self.glwe_dimension.to_glwe_size().0;
        self.lwe_dimension.0
            * self.decomp_level_count.0
            * glwe_size
            * glwe_size
            * self.polynomial_size.to_fourier_polynomial_size().0
    }

    /// Number of torus coefficients of a bootstrapping key in the standard domain.
    pub fn standard_bootstrap_key_len(&self) -> usize {
        2 * self.fourier_bootstrap_key_len()
    }
}

pub(crate) fn validate_decomposition(
    base_log: DecompositionBaseLog,
    level_count: DecompositionLevelCount,
    bits: usize,
) -> DeviceResult<()> {
    if base_log.0 == 0 || level_count.0 == 0 || base_log.0 * level_count.0 >= bits {
        return Err(DeviceError::UnsupportedDecomposition {
            base_log,
            level_count,
            bits,
        });
    }
    Ok(())
}
