//! Configuration loading

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub descriptors: DescriptorsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorsConfig {
    /// Root of the device descriptor package
    #[serde(default = "default_descriptor_root")]
    pub root: PathBuf,
    /// Descriptor file name prefixes worth parsing
    #[serde(default = "default_families")]
    pub families: Vec<String>,
}

impl Default for DescriptorsConfig {
    fn default() -> Self {
        Self {
            root: default_descriptor_root(),
            families: default_families(),
        }
    }
}

fn default_descriptor_root() -> PathBuf {
    PathBuf::from("ext/modm-devices/devices")
}

fn default_families() -> Vec<String> {
    ["stm32f4", "stm32g4", "stm32f7", "stm32h7"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path to the descriptor cache file
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(".pio/modm-devices.cache")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Firmware source directory receiving `gpio_pins.in`
    #[serde(default = "default_pins_dir")]
    pub pins_dir: PathBuf,
    /// Target description directory receiving the YAML tables
    #[serde(default = "default_targets_dir")]
    pub targets_dir: PathBuf,
    /// Part number prefixes to generate tables for
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            pins_dir: default_pins_dir(),
            targets_dir: default_targets_dir(),
            devices: default_devices(),
        }
    }
}

fn default_pins_dir() -> PathBuf {
    PathBuf::from("src/system")
}

fn default_targets_dir() -> PathBuf {
    PathBuf::from("../Targets/mcu")
}

fn default_devices() -> Vec<String> {
    [
        "stm32f405vg",
        "stm32f411re",
        "stm32g473ceu6",
        "stm32f722re",
        "stm32f745vg",
        "stm32f765vi",
        "stm32h743vi",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
