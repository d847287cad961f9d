//! Data model and configuration for Corral sandbox environments.
//!
//! This crate defines the schema layer shared by every other crate: the
//! persisted `Environment` entity and its `PortMapping` value type, the
//! distinct `CreateEnvironment` request shape, the closed `EnvStatus` enum,
//! string newtype identifiers, and the TOML-backed `CorralConfig`.

pub mod config;
pub mod environment;
pub mod types;

pub use config::{default_config_path, CorralConfig, PortRange, RuntimeSection};
pub use environment::{
    now_rfc3339, CreateEnvironment, EnvStatus, Environment, PortMapping, Protocol,
};
pub use types::{ContainerId, EnvId, ProjectId};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("branch must not be empty")]
    EmptyBranch,
    #[error("project_id must not be empty")]
    EmptyProject,
    #[error("port mapping name must not be empty")]
    EmptyPortName,
    #[error("duplicate port mapping name '{0}'")]
    DuplicatePortName(String),
    #[error("port mapping '{0}': container_port must be non-zero")]
    ZeroContainerPort(String),
    #[error("port mapping '{0}': host_port must be non-zero")]
    ZeroHostPort(String),
    #[error("unknown environment status: '{0}'")]
    UnknownStatus(String),
    #[error("unknown protocol: '{0}', expected tcp or udp")]
    UnknownProtocol(String),
    #[error("invalid port spec '{spec}': {reason}")]
    InvalidPortSpec { spec: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
