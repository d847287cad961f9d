//! Environment lifecycle orchestration for Corral.
//!
//! This crate ties the state store and a container runtime adapter together
//! into the `Orchestrator`, the async API for creating, pausing, resuming,
//! deleting, exec'ing into, and inspecting environments. It also provides the
//! pure host port allocator, the lifecycle transition table, and read-only
//! drift detection.

pub mod drift;
pub mod lifecycle;
pub mod orchestrator;
pub mod ports;

pub use drift::{DriftReport, DriftedEnvironment};
pub use lifecycle::{next_status, validate_transition, LifecycleOp};
pub use orchestrator::Orchestrator;
pub use ports::{allocate, AllocError};

use corral_runtime::RuntimeError;
use corral_schema::EnvStatus;
use std::time::Duration;
use thiserror::Error;

/// Which side of a request/response boundary caused a failure. An HTTP layer
/// maps `Client` to 4xx and `Server` to 5xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Client,
    Server,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("environment not found: {0}")]
    NotFound(String),
    #[error("cannot {op} environment {env_id}: status is {current}")]
    Conflict {
        env_id: String,
        op: LifecycleOp,
        current: EnvStatus,
    },
    #[error("host port {port} is already in use")]
    PortConflict { port: u16 },
    #[error("no free host port left in {low}-{high}")]
    RangeExhausted { low: u16, high: u16 },
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("runtime command `{command}` failed (exit code {}): {stderr}", fmt_exit_code(.exit_code))]
    RuntimeFailed {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },
    #[error("runtime {op} for environment {env_id} timed out after {timeout:?}")]
    RuntimeTimeout {
        op: String,
        env_id: String,
        timeout: Duration,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] corral_schema::SchemaError),
    #[error("store error: {0}")]
    Store(#[from] corral_store::StoreError),
    #[error("worker task failed: {0}")]
    Worker(String),
}

fn fmt_exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_owned(), |c| c.to_string())
}

impl CoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CoreError::NotFound(_)
            | CoreError::Conflict { .. }
            | CoreError::PortConflict { .. }
            | CoreError::InvalidRequest(_) => ErrorClass::Client,
            CoreError::RangeExhausted { .. }
            | CoreError::RuntimeUnavailable(_)
            | CoreError::RuntimeFailed { .. }
            | CoreError::RuntimeTimeout { .. }
            | CoreError::Store(_)
            | CoreError::Worker(_) => ErrorClass::Server,
        }
    }
}

impl From<AllocError> for CoreError {
    fn from(e: AllocError) -> Self {
        match e {
            AllocError::PortConflict { port } => CoreError::PortConflict { port },
            AllocError::RangeExhausted { low, high } => CoreError::RangeExhausted { low, high },
        }
    }
}

impl From<RuntimeError> for CoreError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::NotInstalled(_)
            | RuntimeError::BackendUnavailable(_)
            | RuntimeError::Spawn { .. } => CoreError::RuntimeUnavailable(e.to_string()),
            RuntimeError::CommandFailed {
                command,
                stderr,
                exit_code,
            } => CoreError::RuntimeFailed {
                command,
                stderr,
                exit_code,
            },
            RuntimeError::NotRunning(container) => CoreError::RuntimeFailed {
                command: format!("stop {container}"),
                stderr: "container is not running".to_owned(),
                exit_code: None,
            },
            RuntimeError::AlreadyRunning(container) => CoreError::RuntimeFailed {
                command: format!("start {container}"),
                stderr: "container is already running".to_owned(),
                exit_code: None,
            },
            RuntimeError::Killed { command, timeout } => CoreError::RuntimeFailed {
                command,
                stderr: format!("killed after {timeout:?}"),
                exit_code: None,
            },
        }
    }
}
