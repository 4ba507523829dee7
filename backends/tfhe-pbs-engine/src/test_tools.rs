//! Test helpers: secret keys, encryption and decryption of the ciphertexts the engine consumes.

use crate::c64;
use crate::fft::NegacyclicFft;
use crate::numeric::UnsignedTorus;
use crate::parameters::{
    DecompositionBaseLog, DecompositionLevelCount, PbsParameters, SupportedPolynomialSize,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

pub fn new_random_generator() -> StdRng {
    StdRng::from_entropy()
}

pub fn random_uniform<Scalar: UnsignedTorus>(generator: &mut StdRng) -> Scalar {
    Scalar::cast_from_u64(generator.gen::<u64>())
}

pub fn random_binary<Scalar: UnsignedTorus>(generator: &mut StdRng) -> Scalar {
    if generator.gen::<bool>() {
        Scalar::ONE
    } else {
        Scalar::ZERO
    }
}

/// Sample a torus element from a centered gaussian of standard deviation `std_dev` (torus units).
pub fn random_gaussian<Scalar: UnsignedTorus>(generator: &mut StdRng, std_dev: f64) -> Scalar {
    let normal = Normal::new(0.0, std_dev).unwrap();
    Scalar::from_torus(normal.sample(generator))
}

pub fn modular_distance<Scalar: UnsignedTorus>(first: Scalar, other: Scalar) -> Scalar {
    let d0 = first.wrapping_sub(other);
    let d1 = other.wrapping_sub(first);
    d0.min(d1)
}

/// Product of `poly` with a polynomial of binary coefficients modulo `X^N + 1`.
///
/// `poly` is split in 16 bits limbs so that every limb product is computed exactly in `f64`.
pub fn negacyclic_mul_binary<Scalar: UnsignedTorus>(
    fft: &NegacyclicFft,
    poly: &[Scalar],
    binary: &[Scalar],
) -> Vec<Scalar> {
    let n = poly.len();
    let mut binary_fourier = vec![c64::default(); n / 2];
    fft.forward_as_integer(&mut binary_fourier, binary);

    let mut result = vec![Scalar::ZERO; n];
    let mut limb = vec![Scalar::ZERO; n];
    let mut limb_fourier = vec![c64::default(); n / 2];
    for limb_idx in 0..Scalar::BITS / 16 {
        let shift = 16 * limb_idx;
        for (limb, coef) in limb.iter_mut().zip(poly.iter()) {
            *limb = (*coef >> shift) & Scalar::cast_from_u64(0xffff);
        }
        fft.forward_as_integer(&mut limb_fourier, &limb);
        for (l, b) in limb_fourier.iter_mut().zip(binary_fourier.iter()) {
            *l *= *b;
        }
        fft.backward_in_place(&mut limb_fourier);
        for (j, value) in limb_fourier.iter().enumerate() {
            let low = Scalar::cast_from_u64(value.re.round() as i64 as u64) << shift;
            let high = Scalar::cast_from_u64(value.im.round() as i64 as u64) << shift;
            result[j] = result[j].wrapping_add(low);
            result[j + n / 2] = result[j + n / 2].wrapping_add(high);
        }
    }
    result
}

/// Reference product of two polynomials modulo `X^N + 1`.
pub fn naive_negacyclic_mul<Scalar: UnsignedTorus>(lhs: &[Scalar], rhs: &[Scalar]) -> Vec<Scalar> {
    let n = lhs.len();
    let mut result = vec![Scalar::ZERO; n];
    for (i, l) in lhs.iter().enumerate() {
        for (j, r) in rhs.iter().enumerate() {
            let product = l.wrapping_mul(*r);
            if i + j < n {
                result[i + j] = result[i + j].wrapping_add(product);
            } else {
                result[i + j - n] = result[i + j - n].wrapping_sub(product);
            }
        }
    }
    result
}

pub struct LweSecretKey<Scalar> {
    pub data: Vec<Scalar>,
}

impl<Scalar: UnsignedTorus> LweSecretKey<Scalar> {
    pub fn new_binary(size: usize, generator: &mut StdRng) -> Self {
        Self {
            data: (0..size).map(|_| random_binary(generator)).collect(),
        }
    }

    pub fn encrypt(&self, plaintext: Scalar, std_dev: f64, generator: &mut StdRng) -> Vec<Scalar> {
        let mut ciphertext: Vec<Scalar> = (0..self.data.len())
            .map(|_| random_uniform(generator))
            .collect();
        let body = ciphertext
            .iter()
            .zip(self.data.iter())
            .fold(Scalar::ZERO, |acc, (a, s)| acc.wrapping_add(a.wrapping_mul(*s)))
            .wrapping_add(random_gaussian(generator, std_dev))
            .wrapping_add(plaintext);
        ciphertext.push(body);
        ciphertext
    }

    pub fn decrypt(&self, ciphertext: &[Scalar]) -> Scalar {
        let (mask, body) = ciphertext.split_at(self.data.len());
        mask.iter()
            .zip(self.data.iter())
            .fold(body[0], |acc, (a, s)| acc.wrapping_sub(a.wrapping_mul(*s)))
    }
}

/// GLWE secret key of dimension 1.
pub struct GlweSecretKey<Scalar> {
    pub polynomial: Vec<Scalar>,
}

impl<Scalar: UnsignedTorus> GlweSecretKey<Scalar> {
    pub fn new_binary(degree: SupportedPolynomialSize, generator: &mut StdRng) -> Self {
        Self {
            polynomial: (0..degree.polynomial_size().0)
                .map(|_| random_binary(generator))
                .collect(),
        }
    }

    /// The LWE key decrypting the samples extracted from ciphertexts under this key.
    pub fn as_lwe_secret_key(&self) -> LweSecretKey<Scalar> {
        LweSecretKey {
            data: self.polynomial.clone(),
        }
    }

    /// Encrypt zero, returning the mask polynomial followed by the body polynomial.
    fn encrypt_zero(
        &self,
        fft: &NegacyclicFft,
        std_dev: f64,
        generator: &mut StdRng,
    ) -> Vec<Scalar> {
        let n = self.polynomial.len();
        let mask: Vec<Scalar> = (0..n).map(|_| random_uniform(generator)).collect();
        let mut body = negacyclic_mul_binary(fft, &mask, &self.polynomial);
        for coef in body.iter_mut() {
            *coef = coef.wrapping_add(random_gaussian(generator, std_dev));
        }
        let mut ciphertext = mask;
        ciphertext.extend(body);
        ciphertext
    }
}

/// Generate a bootstrapping key in the standard domain, ready for the conversion.
///
/// The layout is `[input key bit][level][row][column][coefficient]`, level 0 holding the most
/// significant digit.
pub fn generate_bootstrap_key<Scalar: UnsignedTorus>(
    params: &PbsParameters,
    input_key: &LweSecretKey<Scalar>,
    output_key: &GlweSecretKey<Scalar>,
    std_dev: f64,
    generator: &mut StdRng,
) -> Vec<Scalar> {
    let degree = SupportedPolynomialSize::try_from(params.polynomial_size).unwrap();
    let fft = NegacyclicFft::new(degree);
    let n = params.polynomial_size.0;
    let DecompositionBaseLog(base_log) = params.decomp_base_log;
    let DecompositionLevelCount(level_count) = params.decomp_level_count;

    let mut key = Vec::with_capacity(params.standard_bootstrap_key_len());
    for bit in input_key.data.iter() {
        for level in 1..=level_count {
            let factor = Scalar::ONE << (Scalar::BITS - base_log * level);
            let message = if *bit == Scalar::ONE {
                factor
            } else {
                Scalar::ZERO
            };
            for row in 0..2 {
                let mut ciphertext = output_key.encrypt_zero(&fft, std_dev, generator);
                ciphertext[row * n] = ciphertext[row * n].wrapping_add(message);
                key.extend(ciphertext);
            }
        }
    }
    key
}

/// Lookup table of `f` over messages of `message_modulus` values encoded with `delta`.
pub fn generate_lut<Scalar: UnsignedTorus>(
    degree: SupportedPolynomialSize,
    message_modulus: usize,
    delta: Scalar,
    f: impl Fn(usize) -> usize,
) -> Vec<Scalar> {
    let n = degree.polynomial_size().0;
    let box_size = n / message_modulus;
    let mut body = vec![Scalar::ZERO; n];
    for i in 0..message_modulus {
        let value = Scalar::cast_from_u64(f(i) as u64).wrapping_mul(delta);
        body[i * box_size..(i + 1) * box_size].fill(value);
    }

    // Negate the first half_box_size coefficients to manage negacyclicity and rotate
    let half_box_size = box_size / 2;
    for a_i in body[0..half_box_size].iter_mut() {
        *a_i = a_i.wrapping_neg();
    }
    body.rotate_left(half_box_size);

    // Trivial GLWE: zero mask
    let mut lut = vec![Scalar::ZERO; n];
    lut.extend(body);
    lut
}

/// Round the phase to the closest multiple of `delta` and reduce it modulo `message_modulus`.
pub fn decode<Scalar: UnsignedTorus>(phase: Scalar, delta: Scalar, message_modulus: usize) -> usize {
    let delta = delta.cast_into_u64();
    let phase = phase.cast_into_u64();
    let rounded = (phase.wrapping_add(delta / 2)) / delta;
    (rounded % message_modulus as u64) as usize
}
