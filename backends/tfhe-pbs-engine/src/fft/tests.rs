use super::*;
use crate::test_tools::{modular_distance, naive_negacyclic_mul, new_random_generator, random_uniform};
use rand::Rng;

fn test_complex_roundtrip(degree: SupportedPolynomialSize) {
    let mut generator = new_random_generator();
    let fft = NegacyclicFft::new(degree);
    let n = degree.fourier_polynomial_size().0;

    let input: Vec<c64> = (0..n)
        .map(|_| c64::new(generator.gen_range(-1.0..1.0), generator.gen_range(-1.0..1.0)))
        .collect();
    let mut buf = input.clone();
    forward_in_place(&ThreadBlock::single(), fft.tables(), &mut buf);
    fft.backward_in_place(&mut buf);

    let error: f64 = input.iter().zip(buf.iter()).map(|(a, b)| (a - b).norm_sqr()).sum();
    let norm: f64 = input.iter().map(|a| a.norm_sqr()).sum();
    assert!((error / norm).sqrt() < 1e-9);
}

fn test_torus_roundtrip<Scalar: UnsignedTorus>(degree: SupportedPolynomialSize) {
    let mut generator = new_random_generator();
    let fft = NegacyclicFft::new(degree);
    let size = degree.polynomial_size().0;

    let poly: Vec<Scalar> = (0..size).map(|_| random_uniform(&mut generator)).collect();
    let mut fourier = vec![c64::default(); size / 2];
    let mut roundtrip = vec![Scalar::ZERO; size];

    fft.forward_as_torus(&mut fourier, &poly);
    fft.add_backward_as_torus(&mut roundtrip, &mut fourier);

    for (expected, actual) in poly.iter().zip(roundtrip.iter()) {
        if Scalar::BITS == 32 {
            assert!(modular_distance(*expected, *actual) == Scalar::ZERO);
        } else {
            assert!(modular_distance(*expected, *actual) < (Scalar::ONE << (64 - 50)));
        }
    }
}

fn test_product<Scalar: UnsignedTorus>(degree: SupportedPolynomialSize) {
    let mut generator = new_random_generator();
    let fft = NegacyclicFft::new(degree);
    let size = degree.polynomial_size().0;

    let torus: Vec<Scalar> = (0..size).map(|_| random_uniform(&mut generator)).collect();
    // Small signed integers, as the digits of a decomposition
    let integer: Vec<Scalar> = (0..size)
        .map(|_| Scalar::cast_from_u64(generator.gen_range(-128i64..=128) as u64))
        .collect();

    let mut torus_fourier = vec![c64::default(); size / 2];
    let mut integer_fourier = vec![c64::default(); size / 2];
    fft.forward_as_torus(&mut torus_fourier, &torus);
    fft.forward_as_integer(&mut integer_fourier, &integer);
    for (t, i) in torus_fourier.iter_mut().zip(integer_fourier.iter()) {
        *t *= *i;
    }
    let mut actual = vec![Scalar::ZERO; size];
    fft.add_backward_as_torus(&mut actual, &mut torus_fourier);

    let expected = naive_negacyclic_mul(&torus, &integer);
    for (expected, actual) in expected.iter().zip(actual.iter()) {
        if Scalar::BITS == 32 {
            assert!(modular_distance(*expected, *actual) <= Scalar::ONE);
        } else {
            assert!(modular_distance(*expected, *actual) < (Scalar::ONE << (64 - 32)));
        }
    }
}

#[test]
fn cooperative_transform_matches_single_thread() {
    let degree = SupportedPolynomialSize::N2048;
    let fft = NegacyclicFft::new(degree);
    let mut generator = new_random_generator();
    let poly: Vec<u64> = (0..2048).map(|_| random_uniform(&mut generator)).collect();

    let mut single = vec![c64::default(); 1024];
    fft.forward_as_integer(&mut single, &poly);

    let block = ThreadBlock::new(0, degree.block_dim());
    let mut cooperative = vec![c64::default(); 1024];
    forward_as_integer(&block, fft.tables(), &mut cooperative, &poly);
    assert_eq!(single, cooperative);
    // fold, bit reversal, then one barrier per radix-2 stage
    assert_eq!(block.barrier_count(), 2 + 10);
}

macro_rules! create_fft_test {
    ($degree: ident) => {
        ::paste::paste! {
            #[test]
            fn [<test_complex_roundtrip_ $degree:lower>]() {
                test_complex_roundtrip(SupportedPolynomialSize::$degree);
            }

            #[test]
            fn [<test_torus_roundtrip_u32_ $degree:lower>]() {
                test_torus_roundtrip::<u32>(SupportedPolynomialSize::$degree);
            }

            #[test]
            fn [<test_torus_roundtrip_u64_ $degree:lower>]() {
                test_torus_roundtrip::<u64>(SupportedPolynomialSize::$degree);
            }
        }
    };
}

create_fft_test!(N512);
create_fft_test!(N1024);
create_fft_test!(N2048);
create_fft_test!(N4096);
create_fft_test!(N8192);

#[test]
fn test_product_u32() {
    test_product::<u32>(SupportedPolynomialSize::N512);
    test_product::<u32>(SupportedPolynomialSize::N1024);
}

#[test]
fn test_product_u64() {
    test_product::<u64>(SupportedPolynomialSize::N512);
    test_product::<u64>(SupportedPolynomialSize::N1024);
}
