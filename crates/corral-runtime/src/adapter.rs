use crate::RuntimeError;
use corral_schema::{ContainerId, EnvId, PortMapping, RuntimeSection};

/// Captured result of a command run inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// stdout followed by stderr.
    pub output: String,
    pub exit_code: i32,
}

/// Wrapper over an external container process manager.
///
/// Every call blocks until the runtime answers. Callers run these off their
/// dispatch threads and bound them with their own timeouts.
pub trait RuntimeAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Runtime version string, or `NotInstalled`.
    fn check_available(&self) -> Result<String, RuntimeError>;

    /// Start a long-lived container named `name` from `image` with every
    /// mapping that carries a host port bound.
    fn create_container(
        &self,
        name: &str,
        image: &str,
        ports: &[PortMapping],
    ) -> Result<ContainerId, RuntimeError>;

    /// `NotRunning` if the container was already stopped.
    fn stop_container(&self, container: &str) -> Result<(), RuntimeError>;

    /// `AlreadyRunning` if the container was already up.
    fn start_container(&self, container: &str) -> Result<(), RuntimeError>;

    /// Force-remove by id or name, running or not.
    fn remove_container(&self, container: &str) -> Result<(), RuntimeError>;

    fn exec_in_container(&self, container: &str, command: &str)
        -> Result<ExecOutput, RuntimeError>;

    fn container_exists(&self, container: &str) -> Result<bool, RuntimeError>;
}

/// Deterministic container name for an environment, so a restarted process can
/// find the container again from the id alone.
pub fn container_name(prefix: &str, env_id: &EnvId) -> String {
    format!("{prefix}-{}", env_id.short())
}

pub fn select_runtime(section: &RuntimeSection) -> Result<Box<dyn RuntimeAdapter>, RuntimeError> {
    match section.backend.as_str() {
        "podman" | "docker" => Ok(Box::new(crate::cli::CliRuntime::from_section(section))),
        "mock" => Ok(Box::new(crate::mock::MockRuntime::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
