use crate::adapter::{ExecOutput, RuntimeAdapter};
use crate::{RuntimeError, RUNTIME_FAILURE_EXIT_CODE};
use corral_schema::{ContainerId, PortMapping, RuntimeSection};
use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

/// Extra time a subprocess gets past the caller's timeout before it is killed.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Adapter for podman- and docker-compatible command line runtimes.
pub struct CliRuntime {
    backend: String,
    binary: String,
    kill_after: Option<Duration>,
}

#[derive(Debug)]
struct CommandRun {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
}

impl CommandRun {
    fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl CliRuntime {
    pub fn new(backend: impl Into<String>, binary: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            binary: binary.into(),
            kill_after: None,
        }
    }

    /// Subprocesses still running after `limit + grace` are killed and reaped.
    pub fn from_section(section: &RuntimeSection) -> Self {
        Self {
            backend: section.backend.clone(),
            binary: section.binary().to_owned(),
            kill_after: Some(section.command_timeout() + KILL_GRACE),
        }
    }

    #[must_use]
    pub fn with_kill_after(mut self, limit: Duration) -> Self {
        self.kill_after = Some(limit);
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }

    fn run(&self, args: &[&str]) -> Result<CommandRun, RuntimeError> {
        let command = self.describe(args);
        tracing::debug!("running `{command}`");

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    RuntimeError::NotInstalled(self.binary.clone())
                } else {
                    RuntimeError::Spawn {
                        command: command.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let stdout_handle = spawn_pipe_reader(child.stdout.take());
        let stderr_handle = spawn_pipe_reader(child.stderr.take());

        let wait_error = |e: io::Error| RuntimeError::Spawn {
            command: command.clone(),
            reason: e.to_string(),
        };

        let status = match self.kill_after {
            Some(limit) => match child.wait_timeout(limit).map_err(wait_error)? {
                Some(status) => status,
                None => {
                    tracing::warn!("`{command}` exceeded {limit:?}, killing");
                    child.kill().map_err(wait_error)?;
                    child.wait().map_err(wait_error)?;
                    // Grandchildren may still hold the pipes; leave the readers detached.
                    drop(stdout_handle);
                    drop(stderr_handle);
                    return Err(RuntimeError::Killed {
                        command,
                        timeout: limit,
                    });
                }
            },
            None => child.wait().map_err(wait_error)?,
        };

        Ok(CommandRun {
            stdout: collect_pipe(stdout_handle),
            stderr: collect_pipe(stderr_handle),
            exit_code: status.code(),
        })
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandRun, RuntimeError> {
        let run = self.run(args)?;
        if run.success() {
            Ok(run)
        } else {
            Err(self.failed(args, &run))
        }
    }

    fn failed(&self, args: &[&str], run: &CommandRun) -> RuntimeError {
        RuntimeError::CommandFailed {
            command: self.describe(args),
            stderr: run.stderr.trim().to_owned(),
            exit_code: run.exit_code,
        }
    }
}

fn spawn_pipe_reader<R>(pipe: Option<R>) -> Option<thread::JoinHandle<io::Result<Vec<u8>>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut stream| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn collect_pipe(handle: Option<thread::JoinHandle<io::Result<Vec<u8>>>>) -> String {
    match handle.map(thread::JoinHandle::join) {
        Some(Ok(Ok(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
        _ => String::new(),
    }
}

fn is_not_running(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("not running") || s.contains("state improper") || s.contains("is stopped")
}

fn is_already_running(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("already running")
}

fn is_no_such_container(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("no such container") || s.contains("no container with")
}

/// `run -d --name NAME -p host:container[/proto]... IMAGE sleep infinity`
fn run_args<'a>(name: &'a str, image: &'a str, bindings: &'a [String]) -> Vec<&'a str> {
    let mut args = vec!["run", "-d", "--name", name];
    for binding in bindings {
        args.push("-p");
        args.push(binding);
    }
    args.extend([image, "sleep", "infinity"]);
    args
}

impl RuntimeAdapter for CliRuntime {
    fn name(&self) -> &str {
        &self.backend
    }

    fn check_available(&self) -> Result<String, RuntimeError> {
        let run = self.run_checked(&["--version"])?;
        Ok(run.stdout.trim().to_owned())
    }

    fn create_container(
        &self,
        name: &str,
        image: &str,
        ports: &[PortMapping],
    ) -> Result<ContainerId, RuntimeError> {
        let bindings: Vec<String> = ports.iter().filter_map(PortMapping::binding).collect();
        let args = run_args(name, image, &bindings);
        let run = self.run_checked(&args)?;
        let id = run.stdout.lines().last().unwrap_or_default().trim();
        if id.is_empty() {
            return Err(RuntimeError::CommandFailed {
                command: self.describe(&args),
                stderr: "runtime printed no container id".to_owned(),
                exit_code: run.exit_code,
            });
        }
        tracing::info!("created container {name} ({id})");
        Ok(ContainerId::new(id))
    }

    fn stop_container(&self, container: &str) -> Result<(), RuntimeError> {
        let args = ["stop", container];
        let run = self.run(&args)?;
        if run.success() {
            return Ok(());
        }
        if is_not_running(&run.stderr) {
            return Err(RuntimeError::NotRunning(container.to_owned()));
        }
        Err(self.failed(&args, &run))
    }

    fn start_container(&self, container: &str) -> Result<(), RuntimeError> {
        let args = ["start", container];
        let run = self.run(&args)?;
        if run.success() {
            return Ok(());
        }
        if is_already_running(&run.stderr) {
            return Err(RuntimeError::AlreadyRunning(container.to_owned()));
        }
        Err(self.failed(&args, &run))
    }

    fn remove_container(&self, container: &str) -> Result<(), RuntimeError> {
        self.run_checked(&["rm", "-f", container])?;
        Ok(())
    }

    fn exec_in_container(
        &self,
        container: &str,
        command: &str,
    ) -> Result<ExecOutput, RuntimeError> {
        let args = ["exec", container, "sh", "-c", command];
        let run = self.run(&args)?;
        match run.exit_code {
            Some(code) if code != RUNTIME_FAILURE_EXIT_CODE => Ok(ExecOutput {
                output: format!("{}{}", run.stdout, run.stderr),
                exit_code: code,
            }),
            _ => Err(self.failed(&args, &run)),
        }
    }

    fn container_exists(&self, container: &str) -> Result<bool, RuntimeError> {
        if self.backend == "podman" {
            let args = ["container", "exists", container];
            let run = self.run(&args)?;
            return match run.exit_code {
                Some(0) => Ok(true),
                Some(1) => Ok(false),
                _ => Err(self.failed(&args, &run)),
            };
        }

        let args = ["container", "inspect", "--format", "{{.Id}}", container];
        let run = self.run(&args)?;
        if run.success() {
            Ok(true)
        } else if is_no_such_container(&run.stderr) {
            Ok(false)
        } else {
            Err(self.failed(&args, &run))
        }
    }
}
