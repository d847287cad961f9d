use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_IMAGE: &str = "ubuntu:22.04";
pub const DEFAULT_PORT_LOW: u16 = 10000;
pub const DEFAULT_PORT_HIGH: u16 = 11000;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;

/// Top-level configuration, read from `~/.config/corral/config.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CorralConfig {
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub ports: PortRange,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuntimeSection {
    /// `podman`, `docker`, or `mock`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Binary to invoke; defaults to the backend name.
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default = "default_image")]
    pub default_image: String,
    #[serde(default = "default_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_prefix")]
    pub container_prefix: String,
}

fn default_backend() -> String {
    "podman".to_owned()
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_owned()
}

fn default_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

fn default_prefix() -> String {
    "corral".to_owned()
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            binary: None,
            default_image: default_image(),
            command_timeout_secs: default_timeout(),
            container_prefix: default_prefix(),
        }
    }
}

impl RuntimeSection {
    pub fn binary(&self) -> &str {
        self.binary.as_deref().unwrap_or(&self.backend)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Inclusive host port range `[low, high]` the allocator draws from.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PortRange {
    pub low: u16,
    pub high: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            low: DEFAULT_PORT_LOW,
            high: DEFAULT_PORT_HIGH,
        }
    }
}

impl PortRange {
    pub fn new(low: u16, high: u16) -> Result<Self, ConfigError> {
        let range = Self { low, high };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.low == 0 {
            return Err(ConfigError::Invalid("ports.low must be non-zero".to_owned()));
        }
        if self.low > self.high {
            return Err(ConfigError::Invalid(format!(
                "ports.low ({}) must not exceed ports.high ({})",
                self.low, self.high
            )));
        }
        Ok(())
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.low..=self.high).contains(&port)
    }

    /// Ascending iteration over every port in the range.
    pub fn iter(&self) -> std::ops::RangeInclusive<u16> {
        self.low..=self.high
    }

    pub fn len(&self) -> usize {
        usize::from(self.high.saturating_sub(self.low)) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.low > self.high
    }
}

impl CorralConfig {
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_str(&content)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ports.validate()?;
        if self.runtime.binary().trim().is_empty() {
            return Err(ConfigError::Invalid("runtime.binary must not be empty".to_owned()));
        }
        if self.runtime.default_image.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "runtime.default_image must not be empty".to_owned(),
            ));
        }
        if self.runtime.container_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "runtime.container_prefix must not be empty".to_owned(),
            ));
        }
        if self.runtime.command_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "runtime.command_timeout_secs must be greater than 0".to_owned(),
            ));
        }
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = std::env::var("HOME").map_err(|_| ConfigError::Invalid("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/corral/config.toml"))
}
