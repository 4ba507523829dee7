//! Define the simulated device platform
//! Provide mechanism to load it from Toml-file

use crate::error::{DeviceError, DeviceResult};

/// Environment variable naming a platform Toml-file
pub const CONFIG_ENV_VAR: &str = "TFHE_PBS_ENGINE_CONFIG";

/// Hardware properties of one device
/// Mirrors the subset of the device attributes the bootstrap launch logic depends on
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct DeviceProperties {
    pub name: String,
    /// Global memory in bytes
    pub global_memory: usize,
    /// Opt-in on-chip shared memory usable by a single block, in bytes
    pub max_shared_memory_per_block: usize,
    /// On-chip shared memory of one streaming multiprocessor, in bytes
    pub shared_memory_per_sm: usize,
    pub sm_count: usize,
    pub max_threads_per_block: usize,
    pub max_threads_per_sm: usize,
    pub max_blocks_per_sm: usize,
}

impl DeviceProperties {
    pub fn a100() -> Self {
        Self {
            name: "A100-SXM4-40GB".to_string(),
            global_memory: 40 << 30,
            max_shared_memory_per_block: 166912,
            shared_memory_per_sm: 167936,
            sm_count: 108,
            max_threads_per_block: 1024,
            max_threads_per_sm: 2048,
            max_blocks_per_sm: 32,
        }
    }

    pub fn v100() -> Self {
        Self {
            name: "V100-SXM2-16GB".to_string(),
            global_memory: 16 << 30,
            max_shared_memory_per_block: 98304,
            shared_memory_per_sm: 98304,
            sm_count: 80,
            max_threads_per_block: 1024,
            max_threads_per_sm: 2048,
            max_blocks_per_sm: 32,
        }
    }

    pub fn t4() -> Self {
        Self {
            name: "T4".to_string(),
            global_memory: 16 << 30,
            max_shared_memory_per_block: 65536,
            shared_memory_per_sm: 65536,
            sm_count: 40,
            max_threads_per_block: 1024,
            max_threads_per_sm: 1024,
            max_blocks_per_sm: 16,
        }
    }

    fn check(&self) -> DeviceResult<()> {
        let zero_field = [
            ("global_memory", self.global_memory),
            ("sm_count", self.sm_count),
            ("max_threads_per_block", self.max_threads_per_block),
            ("max_threads_per_sm", self.max_threads_per_sm),
            ("max_blocks_per_sm", self.max_blocks_per_sm),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);
        if let Some((field, _)) = zero_field {
            return Err(DeviceError::InvalidConfiguration(format!(
                "device `{}`: `{field}` must be non zero",
                self.name
            )));
        }
        if self.max_shared_memory_per_block > self.shared_memory_per_sm {
            return Err(DeviceError::InvalidConfiguration(format!(
                "device `{}`: a block cannot use more shared memory than its multiprocessor has",
                self.name
            )));
        }
        Ok(())
    }
}

/// Simulated platform, i.e. the list of visible devices
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct PlatformConfig {
    pub devices: Vec<DeviceProperties>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            devices: vec![DeviceProperties::a100()],
        }
    }
}

impl PlatformConfig {
    pub fn single(properties: DeviceProperties) -> Self {
        Self {
            devices: vec![properties],
        }
    }

    /// Provide Serde mechanisms from TOML string
    pub fn from_toml_str(content: &str) -> DeviceResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|err| DeviceError::InvalidConfiguration(format!("Toml error: {err}")))?;
        config.check()?;
        Ok(config)
    }

    /// Provide Serde mechanisms from TOML file
    pub fn from_toml(file: &str) -> DeviceResult<Self> {
        let file_str = std::fs::read_to_string(file)
            .map_err(|err| DeviceError::InvalidConfiguration(format!("`{file}`:: {err}")))?;
        Self::from_toml_str(&file_str)
    }

    /// Load the file named by [`CONFIG_ENV_VAR`] if set, the default platform otherwise
    pub fn from_env_or_default() -> DeviceResult<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(file) => {
                tracing::debug!(%file, "Loading device platform");
                Self::from_toml(&file)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub(crate) fn check(&self) -> DeviceResult<()> {
        if self.devices.is_empty() {
            return Err(DeviceError::InvalidConfiguration(
                "at least one device is required".to_string(),
            ));
        }
        self.devices.iter().try_for_each(DeviceProperties::check)
    }
}
