//! Container runtime adapters for Corral environments.
//!
//! `RuntimeAdapter` is the narrow surface the orchestrator drives: create,
//! stop, start, remove, exec, and an existence probe for drift detection.
//! `CliRuntime` shells out to a podman- or docker-compatible binary;
//! `MockRuntime` keeps an in-memory container table with scripted failures and
//! delays. Adapters hold no environment state and enforce no timeouts of their
//! own beyond reaping runaway subprocesses.

pub mod adapter;
pub mod cli;
pub mod mock;
pub mod prereq;

pub use adapter::{container_name, select_runtime, ExecOutput, RuntimeAdapter};
pub use cli::CliRuntime;
pub use mock::{MockContainer, MockOp, MockRuntime};
pub use prereq::{check_runtime_prereqs, format_missing, MissingPrereq};

use std::time::Duration;
use thiserror::Error;

/// Exit code podman and docker use for their own failures (as opposed to the
/// exit code of a command run inside the container).
pub const RUNTIME_FAILURE_EXIT_CODE: i32 = 125;

fn fmt_exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_owned(), |c| c.to_string())
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("container runtime '{0}' is not installed")]
    NotInstalled(String),
    #[error("runtime backend '{0}' is not supported")]
    BackendUnavailable(String),
    #[error("command `{command}` failed (exit code {}): {stderr}", fmt_exit_code(.exit_code))]
    CommandFailed {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },
    #[error("container '{0}' is not running")]
    NotRunning(String),
    #[error("container '{0}' is already running")]
    AlreadyRunning(String),
    #[error("command `{command}` killed after {timeout:?}")]
    Killed { command: String, timeout: Duration },
    #[error("failed to run `{command}`: {reason}")]
    Spawn { command: String, reason: String },
}

impl RuntimeError {
    /// Stop/start results the orchestrator may treat as success.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            RuntimeError::NotRunning(_) | RuntimeError::AlreadyRunning(_)
        )
    }
}
