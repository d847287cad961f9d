use crate::adapter::{ExecOutput, RuntimeAdapter};
use crate::{RuntimeError, RUNTIME_FAILURE_EXIT_CODE};
use corral_schema::{ContainerId, PortMapping};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Adapter operations that can be scripted to fail or stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    CheckAvailable,
    Create,
    Stop,
    Start,
    Remove,
    Exec,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockContainer {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub host_ports: Vec<u16>,
    pub running: bool,
}

#[derive(Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    next_id: u64,
    failures: HashMap<MockOp, VecDeque<RuntimeError>>,
    delays: HashMap<MockOp, Duration>,
    exec_responses: HashMap<String, ExecOutput>,
    calls: Vec<String>,
}

/// In-memory container runtime.
///
/// Behaves like a real runtime for names, port bindings, and running state,
/// and lets tests inject failures (`fail_next`), stalls (`set_delay`), and
/// drift (`forget`).
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

fn no_such_container(command: &str, container: &str) -> RuntimeError {
    RuntimeError::CommandFailed {
        command: command.to_owned(),
        stderr: format!("Error: no such container {container}"),
        exit_code: Some(RUNTIME_FAILURE_EXIT_CODE),
    }
}

fn bind_failed(command: &str, port: u16) -> RuntimeError {
    RuntimeError::CommandFailed {
        command: command.to_owned(),
        stderr: format!("Error: rootlessport listen tcp 0.0.0.0:{port}: bind: address already in use"),
        exit_code: Some(126),
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        self.state.lock().map_err(|e| RuntimeError::Spawn {
            command: "mock".to_owned(),
            reason: format!("mutex poisoned: {e}"),
        })
    }

    /// Make the next call of `op` fail with `err`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, op: MockOp, err: RuntimeError) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.entry(op).or_default().push_back(err);
        }
    }

    /// Every later call of `op` sleeps `delay` before doing anything.
    pub fn set_delay(&self, op: MockOp, delay: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.delays.insert(op, delay);
        }
    }

    pub fn clear_delay(&self, op: MockOp) {
        if let Ok(mut state) = self.state.lock() {
            state.delays.remove(&op);
        }
    }

    /// Canned result for an exact exec command line.
    pub fn respond_to_exec(&self, command: &str, output: ExecOutput) {
        if let Ok(mut state) = self.state.lock() {
            state.exec_responses.insert(command.to_owned(), output);
        }
    }

    /// Drop a container from the table without going through the adapter, as
    /// if someone removed it behind the orchestrator's back.
    pub fn forget(&self, container: &str) -> bool {
        self.state
            .lock()
            .map(|mut s| s.containers.remove(container).is_some())
            .unwrap_or(false)
    }

    pub fn container(&self, container: &str) -> Option<MockContainer> {
        let state = self.state.lock().ok()?;
        state.containers.get(container).cloned()
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().map(|s| s.containers.len()).unwrap_or(0)
    }

    pub fn containers(&self) -> Vec<MockContainer> {
        let mut all: Vec<MockContainer> = self
            .state
            .lock()
            .map(|s| s.containers.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Calls recorded so far, e.g. `"stop mock-1"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Record the call, apply any delay, then pop a scripted failure.
    fn enter(&self, op: MockOp, call: String) -> Result<(), RuntimeError> {
        let delay = {
            let mut state = self.state()?;
            state.calls.push(call);
            state.delays.get(&op).copied()
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.state()?;
        match state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// First of `ports` already bound by a running container.
    fn bound_port(state: &MockState, ports: &[u16]) -> Option<u16> {
        ports.iter().copied().find(|port| {
            state
                .containers
                .values()
                .any(|c| c.running && c.host_ports.contains(port))
        })
    }

    /// Look a container up by id or name, like the real CLIs do.
    fn resolve(state: &MockState, container: &str) -> Option<String> {
        if state.containers.contains_key(container) {
            return Some(container.to_owned());
        }
        state
            .containers
            .values()
            .find(|c| c.name == container)
            .map(|c| c.id.to_string())
    }
}

impl RuntimeAdapter for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    fn check_available(&self) -> Result<String, RuntimeError> {
        self.enter(MockOp::CheckAvailable, "--version".to_owned())?;
        Ok("mock version 0.0.0".to_owned())
    }

    fn create_container(
        &self,
        name: &str,
        image: &str,
        ports: &[PortMapping],
    ) -> Result<ContainerId, RuntimeError> {
        self.enter(MockOp::Create, format!("run {name} {image}"))?;
        let command = format!("mock run --name {name}");
        let mut state = self.state()?;

        if state.containers.values().any(|c| c.name == name) {
            return Err(RuntimeError::CommandFailed {
                command,
                stderr: format!("Error: the container name \"{name}\" is already in use"),
                exit_code: Some(RUNTIME_FAILURE_EXIT_CODE),
            });
        }
        let host_ports: Vec<u16> = ports.iter().filter_map(|p| p.host_port).collect();
        state.next_id += 1;
        let id = ContainerId::new(format!("mock-{}", state.next_id));
        let bind_conflict = Self::bound_port(&state, &host_ports);

        // Like `podman run -d`, a failed bind leaves the container created
        // but not running.
        state.containers.insert(
            id.to_string(),
            MockContainer {
                id: id.clone(),
                name: name.to_owned(),
                image: image.to_owned(),
                host_ports,
                running: bind_conflict.is_none(),
            },
        );
        match bind_conflict {
            Some(port) => Err(bind_failed(&command, port)),
            None => Ok(id),
        }
    }

    fn stop_container(&self, container: &str) -> Result<(), RuntimeError> {
        self.enter(MockOp::Stop, format!("stop {container}"))?;
        let mut state = self.state()?;
        let key = Self::resolve(&state, container)
            .ok_or_else(|| no_such_container("mock stop", container))?;
        match state.containers.get_mut(&key) {
            Some(c) if c.running => {
                c.running = false;
                Ok(())
            }
            Some(_) => Err(RuntimeError::NotRunning(container.to_owned())),
            None => Err(no_such_container("mock stop", container)),
        }
    }

    fn start_container(&self, container: &str) -> Result<(), RuntimeError> {
        self.enter(MockOp::Start, format!("start {container}"))?;
        let mut state = self.state()?;
        let key = Self::resolve(&state, container)
            .ok_or_else(|| no_such_container("mock start", container))?;
        let (running, ports) = match state.containers.get(&key) {
            Some(c) => (c.running, c.host_ports.clone()),
            None => return Err(no_such_container("mock start", container)),
        };
        if running {
            return Err(RuntimeError::AlreadyRunning(container.to_owned()));
        }
        if let Some(port) = Self::bound_port(&state, &ports) {
            return Err(bind_failed("mock start", port));
        }
        if let Some(c) = state.containers.get_mut(&key) {
            c.running = true;
        }
        Ok(())
    }

    fn remove_container(&self, container: &str) -> Result<(), RuntimeError> {
        self.enter(MockOp::Remove, format!("rm {container}"))?;
        let mut state = self.state()?;
        let key = Self::resolve(&state, container)
            .ok_or_else(|| no_such_container("mock rm -f", container))?;
        state.containers.remove(&key);
        Ok(())
    }

    fn exec_in_container(
        &self,
        container: &str,
        command: &str,
    ) -> Result<ExecOutput, RuntimeError> {
        self.enter(MockOp::Exec, format!("exec {container} {command}"))?;
        let state = self.state()?;
        let key = Self::resolve(&state, container)
            .ok_or_else(|| no_such_container("mock exec", container))?;
        if !state.containers.get(&key).is_some_and(|c| c.running) {
            return Err(RuntimeError::CommandFailed {
                command: "mock exec".to_owned(),
                stderr: format!("Error: container {container} is not running"),
                exit_code: Some(RUNTIME_FAILURE_EXIT_CODE),
            });
        }
        Ok(state
            .exec_responses
            .get(command)
            .cloned()
            .unwrap_or_else(|| ExecOutput {
                output: format!("mock-exec: {command}\n"),
                exit_code: 0,
            }))
    }

    fn container_exists(&self, container: &str) -> Result<bool, RuntimeError> {
        self.enter(MockOp::Exists, format!("exists {container}"))?;
        let state = self.state()?;
        Ok(Self::resolve(&state, container).is_some())
    }
}
