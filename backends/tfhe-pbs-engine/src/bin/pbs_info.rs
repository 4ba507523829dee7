//!
//! Application used to inspect the simulated platform
//! Print the properties of each device and, for every supported degree, the bootstrap launch
//! configuration the engine selects on it

use tfhe_pbs_engine::config::PlatformConfig;
use tfhe_pbs_engine::device::{DeviceManager, GpuIndex};
use tfhe_pbs_engine::error::DeviceResult;
use tfhe_pbs_engine::numeric::UnsignedTorus;
use tfhe_pbs_engine::pbs::describe_launch_configs;

/// Define CLI arguments
use clap::Parser;
#[derive(clap::Parser, Debug, Clone)]
#[clap(long_about = "Print device capabilities and bootstrap launch configurations")]
pub struct Args {
    /// Platform description
    /// Fallback to the file named by TFHE_PBS_ENGINE_CONFIG, then to the built-in platform
    #[clap(long, value_parser)]
    config: Option<String>,

    /// Only describe this device
    #[clap(long, value_parser)]
    device: Option<u32>,

    /// Torus width, 32 or 64
    #[clap(long, value_parser = clap::builder::PossibleValuesParser::new(["32", "64"]), default_value = "64")]
    bits: String,
}

fn describe<Scalar: UnsignedTorus>(manager: &DeviceManager, index: GpuIndex) -> DeviceResult<()> {
    let properties = manager.properties(index)?;
    println!(
        "Device {}: {} | {} MiB | {} SMs | {} B shared memory per block ({} B per SM) | {} \
         threads per block",
        index.0,
        properties.name,
        properties.global_memory >> 20,
        properties.sm_count,
        properties.max_shared_memory_per_block,
        properties.shared_memory_per_sm,
        properties.max_threads_per_block,
    );
    for (footprints, config, capacity) in describe_launch_configs::<Scalar>(manager, index)? {
        println!(
            "  {:>6?} | {:>9?} | block {:>4} | shared {:>7} B (full {:>7} B, partial {:>6} B) | \
             global {:>7} B/sample | capacity {:>5}",
            config.degree,
            config.tier,
            config.launch.block_dim,
            config.launch.dynamic_shared_memory,
            footprints.full_sm,
            footprints.partial_sm,
            config.global_scratch_per_sample,
            capacity,
        );
    }
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    // Register tracing subscriber that use env-filter
    // Select verbosity with env_var: e.g. `RUST_LOG=tfhe_pbs_engine=debug`
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .with_file(false)
        .with_line_number(false)
        .without_time()
        .init();

    let config = match &args.config {
        Some(file) => PlatformConfig::from_toml(file)?,
        None => PlatformConfig::from_env_or_default()?,
    };
    let manager = DeviceManager::new(config)?;
    let indexes: Vec<GpuIndex> = match args.device {
        Some(index) => vec![GpuIndex(index)],
        None => (0..manager.device_count() as u32).map(GpuIndex).collect(),
    };

    for index in indexes {
        match args.bits.as_str() {
            "32" => describe::<u32>(&manager, index)?,
            _ => describe::<u64>(&manager, index)?,
        }
    }
    Ok(())
}
