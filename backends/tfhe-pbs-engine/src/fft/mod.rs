//! Negacyclic FFT over `N/2` complex values.
//!
//! A real polynomial of size `N` is folded into `N/2` complex values `a_j + i a_{j+N/2}`,
//! twisted by the `2N`-th roots of unity and transformed with a radix-2 FFT of size `N/2`.
//! Pointwise products in this domain are products modulo `X^N + 1`.
//!
//! Every routine is run cooperatively by the threads of a [`ThreadBlock`] and only touches the
//! buffer it is handed, wherever that buffer lives.

mod twiddles;

pub use twiddles::{bit_reversal_swaps, FftTables, Twisties};

use crate::c64;
use crate::device::ThreadBlock;
use crate::numeric::{TorusCoefficient, UnsignedTorus};
use crate::parameters::SupportedPolynomialSize;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Forward,
    Inverse,
}

/// Bit-reversal permutation followed by the radix-2 butterflies, one barrier per stage.
fn transform(block: &ThreadBlock, tables: &FftTables, buf: &mut [c64], direction: Direction) {
    let n = tables.fourier_size();
    debug_assert_eq!(buf.len(), n);

    let (src, dst) = tables.swaps();
    block.for_each_strided(src.len(), |k| buf.swap(src[k] as usize, dst[k] as usize));
    block.sync_threads();

    let mut span = 2;
    while span <= n {
        let half = span / 2;
        let root_stride = n / span;
        block.for_each_strided(n / 2, |butterfly| {
            let k = butterfly % half;
            let top = (butterfly / half) * span + k;
            let bottom = top + half;
            let root = match direction {
                Direction::Forward => tables.root(k * root_stride),
                Direction::Inverse => tables.root(k * root_stride).conj(),
            };
            let t = root * buf[bottom];
            buf[bottom] = buf[top] - t;
            buf[top] += t;
        });
        block.sync_threads();
        span *= 2;
    }
}

/// Forward transform of a buffer already folded and scaled, the twist is applied here.
pub fn forward_in_place(block: &ThreadBlock, tables: &FftTables, buf: &mut [c64]) {
    let twisties = tables.twisties();
    block.for_each_strided(buf.len(), |j| buf[j] *= twisties.get(j));
    block.sync_threads();
    transform(block, tables, buf, Direction::Forward);
}

/// Forward transform of a polynomial whose coefficients are read as signed integers.
pub fn forward_as_integer<Scalar: UnsignedTorus>(
    block: &ThreadBlock,
    tables: &FftTables,
    buf: &mut [c64],
    poly: &[Scalar],
) {
    let n = buf.len();
    debug_assert_eq!(poly.len(), 2 * n);
    let twisties = tables.twisties();
    block.for_each_strided(n, |j| {
        let folded = c64::new(poly[j].into_signed_f64(), poly[j + n].into_signed_f64());
        buf[j] = folded * twisties.get(j);
    });
    block.sync_threads();
    transform(block, tables, buf, Direction::Forward);
}

/// Inverse transform, in place. On return `buf[j]` holds the coefficients `j` (real part) and
/// `j + N/2` (imaginary part) of the polynomial.
pub fn backward_in_place(block: &ThreadBlock, tables: &FftTables, buf: &mut [c64]) {
    transform(block, tables, buf, Direction::Inverse);
    let twisties = tables.twisties();
    let normalization = 1.0 / buf.len() as f64;
    block.for_each_strided(buf.len(), |j| {
        buf[j] *= twisties.get(j).conj() * normalization;
    });
    block.sync_threads();
}

/// Inverse transform of `buf`, whose content is destroyed, added to `out` as torus elements.
pub fn add_backward_as_torus<Scalar: UnsignedTorus>(
    block: &ThreadBlock,
    tables: &FftTables,
    out: &mut [Scalar],
    buf: &mut [c64],
) {
    let n = buf.len();
    debug_assert_eq!(out.len(), 2 * n);
    transform(block, tables, buf, Direction::Inverse);
    let twisties = tables.twisties();
    let normalization = 1.0 / n as f64;
    block.for_each_strided(n, |j| {
        let value = buf[j] * twisties.get(j).conj() * normalization;
        out[j] = out[j].wrapping_add(Scalar::from_torus(value.re));
        out[j + n] = out[j + n].wrapping_add(Scalar::from_torus(value.im));
    });
    block.sync_threads();
}

/// Fold a torus polynomial into `N/2` complex values scaled to $[-1/2, 1/2)$.
///
/// This is the host side preparation of a polynomial for [`forward_in_place`].
pub fn fold_torus<C: TorusCoefficient>(out: &mut [c64], poly: &[C]) {
    let n = out.len();
    debug_assert_eq!(poly.len(), 2 * n);
    for (j, out) in out.iter_mut().enumerate() {
        *out = c64::new(poly[j].to_torus_f64(), poly[j + n].to_torus_f64());
    }
}

/// Negacyclic FFT usable from the host.
///
/// The transforms run as a block of a single thread and share the device code paths.
#[derive(Clone, Debug)]
pub struct NegacyclicFft {
    tables: Arc<FftTables>,
}

impl NegacyclicFft {
    pub fn new(degree: SupportedPolynomialSize) -> Self {
        Self {
            tables: Arc::new(FftTables::new(degree)),
        }
    }

    pub fn from_tables(tables: Arc<FftTables>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &FftTables {
        &self.tables
    }

    pub fn forward_as_torus<C: TorusCoefficient>(&self, out: &mut [c64], poly: &[C]) {
        fold_torus(out, poly);
        forward_in_place(&ThreadBlock::single(), &self.tables, out);
    }

    pub fn forward_as_integer<Scalar: UnsignedTorus>(&self, out: &mut [c64], poly: &[Scalar]) {
        forward_as_integer(&ThreadBlock::single(), &self.tables, out, poly);
    }

    pub fn backward_in_place(&self, buf: &mut [c64]) {
        backward_in_place(&ThreadBlock::single(), &self.tables, buf);
    }

    pub fn add_backward_as_torus<Scalar: UnsignedTorus>(&self, out: &mut [Scalar], buf: &mut [c64]) {
        add_backward_as_torus(&ThreadBlock::single(), &self.tables, out, buf);
    }
}

#[cfg(test)]
mod tests;
