use crate::c64;
use crate::parameters::SupportedPolynomialSize;
use aligned_vec::{avec, ABox, AVec, CACHELINE_ALIGN};
use itertools::izip;

/// Twisting factors from the paper:
/// [Fast and Error-Free Negacyclic Integer Convolution using Extended Fourier Transform][paper]
///
/// The real and imaginary parts form (the first `N/2`) `2N`-th roots of unity.
///
/// [paper]: https://eprint.iacr.org/2021/480
#[derive(Clone, Debug, PartialEq)]
pub struct Twisties {
    re: ABox<[f64]>,
    im: ABox<[f64]>,
}

impl Twisties {
    /// Create a new [`Twisties`] containing the `2N`-th roots of unity with `n = N/2`.
    pub fn new(n: usize) -> Self {
        debug_assert!(n.is_power_of_two());
        let mut re = avec![0.0; n].into_boxed_slice();
        let mut im = avec![0.0; n].into_boxed_slice();

        let unit = core::f64::consts::PI / (2.0 * n as f64);
        for (i, (re, im)) in izip!(&mut *re, &mut *im).enumerate() {
            (*im, *re) = (i as f64 * unit).sin_cos();
        }

        Self { re, im }
    }

    #[inline]
    pub fn get(&self, i: usize) -> c64 {
        c64::new(self.re[i], self.im[i])
    }
}

/// Compute the pairs `(i, j)`, `i < j`, exchanged by the bit-reversal permutation of order `n`.
///
/// The reversed counter `j` is carried along `i`: the leading set bits of `j` are cleared and the
/// next bit is set, which is adding one from the most significant side.
pub fn bit_reversal_swaps(n: usize) -> (Vec<u16>, Vec<u16>) {
    debug_assert!(n.is_power_of_two() && n <= 1 << 16);
    let mut src = Vec::with_capacity(n / 2);
    let mut dst = Vec::with_capacity(n / 2);
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            src.push(i as u16);
            dst.push(j as u16);
        }
    }
    (src, dst)
}

/// Constant tables of the negacyclic FFT of one polynomial size.
///
/// The transform works on `N/2` complex values, so every table is indexed over `N/2`.
#[derive(Clone, Debug, PartialEq)]
pub struct FftTables {
    degree: SupportedPolynomialSize,
    swap_src: ABox<[u16]>,
    swap_dst: ABox<[u16]>,
    /// `exp(-2iπk/(N/2))` for `k < N/4`
    roots: ABox<[c64]>,
    twisties: Twisties,
}

impl FftTables {
    pub fn new(degree: SupportedPolynomialSize) -> Self {
        let n = degree.fourier_polynomial_size().0;
        let (src, dst) = bit_reversal_swaps(n);

        let mut roots = avec![c64::default(); n / 2].into_boxed_slice();
        let unit = -2.0 * core::f64::consts::PI / n as f64;
        for (k, root) in roots.iter_mut().enumerate() {
            let (sin, cos) = (k as f64 * unit).sin_cos();
            *root = c64::new(cos, sin);
        }

        Self {
            degree,
            swap_src: AVec::from_slice(CACHELINE_ALIGN, &src).into_boxed_slice(),
            swap_dst: AVec::from_slice(CACHELINE_ALIGN, &dst).into_boxed_slice(),
            roots,
            twisties: Twisties::new(n),
        }
    }

    pub fn degree(&self) -> SupportedPolynomialSize {
        self.degree
    }

    /// Number of complex values a transform works on.
    pub fn fourier_size(&self) -> usize {
        self.twisties.re.len()
    }

    pub fn swaps(&self) -> (&[u16], &[u16]) {
        (&self.swap_src, &self.swap_dst)
    }

    #[inline]
    pub(crate) fn root(&self, k: usize) -> c64 {
        self.roots[k]
    }

    pub fn twisties(&self) -> &Twisties {
        &self.twisties
    }
}
