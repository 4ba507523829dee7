use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::distributions::{Distribution, Standard};
use rand::Rng;
use tfhe_pbs_engine::prelude::*;

const BATCH_SIZE: usize = 16;

fn bench_params() -> Vec<PbsParameters> {
    [(1024, 23), (2048, 15)]
        .into_iter()
        .map(|(polynomial_size, decomp_base_log)| PbsParameters {
            lwe_dimension: LweDimension(742),
            glwe_dimension: GlweDimension(1),
            polynomial_size: PolynomialSize(polynomial_size),
            decomp_base_log: DecompositionBaseLog(decomp_base_log),
            decomp_level_count: DecompositionLevelCount(1),
        })
        .collect()
}

fn random_vec<T>(len: usize) -> Vec<T>
where
    Standard: Distribution<T>,
{
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

fn bench_key_conversion(c: &mut Criterion) {
    let bench_name = "core_crypto::bsk_conversion";
    let mut bench_group = c.benchmark_group(bench_name);
    bench_group.sample_size(10);

    let manager = DeviceManager::new(PlatformConfig::default()).unwrap();
    let engine = PbsEngine::new(&manager, GpuIndex(0)).unwrap();

    for params in bench_params() {
        let bsk = random_vec::<u64>(params.standard_bootstrap_key_len());
        let bench_id = format!("{bench_name}::N{}", params.polynomial_size.0);
        bench_group.bench_function(&bench_id, |b| {
            b.iter(|| {
                let d_bsk = engine.convert_bootstrap_key(&bsk, params).unwrap();
                engine.synchronize().unwrap();
                black_box(d_bsk);
            })
        });
    }

    bench_group.finish()
}

fn bench_batched_pbs(c: &mut Criterion) {
    let bench_name = "core_crypto::batched_pbs";
    let mut bench_group = c.benchmark_group(bench_name);
    bench_group
        .sample_size(10)
        .throughput(Throughput::Elements(BATCH_SIZE as u64));

    let manager = DeviceManager::new(PlatformConfig::default()).unwrap();

    for params in bench_params() {
        let polynomial_size = params.polynomial_size;
        let bsk = random_vec::<u64>(params.standard_bootstrap_key_len());
        let ciphertexts = random_vec::<u64>(BATCH_SIZE * params.lwe_dimension.to_lwe_size().0);
        let lut = random_vec::<u64>(2 * polynomial_size.0);

        // The default cap and no shared memory at all
        for max_shared_memory in [None, Some(0)] {
            let mut engine = PbsEngine::new(&manager, GpuIndex(0)).unwrap();
            if let Some(max_shared_memory) = max_shared_memory {
                engine = engine.with_max_shared_memory(max_shared_memory);
            }
            let degree = SupportedPolynomialSize::try_from(polynomial_size).unwrap();
            let tier = engine
                .launch_config::<u64>(degree, LweCiphertextCount(BATCH_SIZE))
                .unwrap()
                .tier;

            let d_bsk = engine.convert_bootstrap_key(&bsk, params).unwrap();
            let stream = engine.stream();
            let input = DeviceLweCiphertextList::from_host(
                &ciphertexts,
                params.lwe_dimension.to_lwe_size(),
                &manager,
                stream,
            )
            .unwrap();
            let luts = DeviceGlweLookupTables::from_single_lut(
                &lut,
                LweCiphertextCount(BATCH_SIZE),
                polynomial_size,
                &manager,
                stream,
            )
            .unwrap();
            let mut output = DeviceLweCiphertextList::new(
                d_bsk.output_lwe_dimension(),
                LweCiphertextCount(BATCH_SIZE),
                &manager,
                stream,
            )
            .unwrap();
            engine.synchronize().unwrap();

            let bench_id = format!("{bench_name}::N{}::{tier:?}", polynomial_size.0);
            bench_group.bench_function(&bench_id, |b| {
                b.iter(|| {
                    engine
                        .bootstrap_async(&input, &mut output, &luts, &d_bsk)
                        .unwrap();
                    engine.synchronize().unwrap();
                })
            });
        }
    }

    bench_group.finish()
}

criterion_group!(pbs_group, bench_key_conversion, bench_batched_pbs);
criterion_main!(pbs_group);
