pub mod completions;
pub mod create;
pub mod delete;
pub mod doctor;
pub mod drift;
pub mod exec;
pub mod get;
pub mod list;
pub mod pause;
pub mod resume;

use corral_core::{CoreError, ErrorClass, Orchestrator};
use corral_schema::{EnvStatus, Environment};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CLIENT_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

/// A command failure carrying the process exit code it maps to.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl Failure {
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::new(EXIT_CLIENT_ERROR, message)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<CoreError> for Failure {
    fn from(e: CoreError) -> Self {
        let code = match (&e, e.class()) {
            (CoreError::Store(_), _) => EXIT_STORE_ERROR,
            (_, ErrorClass::Client) => EXIT_CLIENT_ERROR,
            (_, ErrorClass::Server) => EXIT_FAILURE,
        };
        Self::new(code, e.to_string())
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::new(EXIT_FAILURE, message)
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(status: EnvStatus) -> String {
    use console::Style;
    let label = status.to_string();
    match status {
        EnvStatus::Running => Style::new().green().bold().apply_to(label).to_string(),
        EnvStatus::Creating => Style::new().yellow().apply_to(label).to_string(),
        EnvStatus::Paused => Style::new().blue().apply_to(label).to_string(),
        EnvStatus::Destroyed => Style::new().dim().apply_to(label).to_string(),
    }
}

/// `name=host->container/proto` pairs, comma separated.
pub fn format_ports(env: &Environment) -> String {
    if env.ports.is_empty() {
        return "-".to_owned();
    }
    env.ports
        .iter()
        .map(|p| {
            let host = p.host_port.map_or_else(|| "?".to_owned(), |h| h.to_string());
            match p.protocol {
                Some(proto) => format!("{}={host}->{}/{proto}", p.name, p.container_port),
                None => format!("{}={host}->{}", p.name, p.container_port),
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Expand a full id or unique prefix to a full environment id.
///
/// An exact id is returned as-is, tombstone or not, so the orchestrator
/// decides how to treat it. Prefixes only match live environments.
pub async fn resolve_env_id(orch: &Orchestrator, input: &str) -> Result<String, Failure> {
    if input.is_empty() {
        return Err(Failure::client("environment id must not be empty"));
    }

    let envs = orch.environments().await?;
    if envs.iter().any(|e| e.id == input) {
        return Ok(input.to_owned());
    }

    let matches: Vec<_> = envs
        .iter()
        .filter(|e| e.status.is_active() && e.id.starts_with(input))
        .collect();

    match matches.as_slice() {
        [] => Err(Failure::client(format!("no environment matching '{input}'"))),
        [env] => Ok(env.id.to_string()),
        _ => Err(Failure::client(format!(
            "ambiguous env_id prefix '{input}': matches {} environments",
            matches.len()
        ))),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{fixture, running_env};
    use super::*;
    use corral_schema::PortMapping;

    #[test]
    fn json_pretty_serializes_value() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_status_keeps_label() {
        for status in [
            EnvStatus::Creating,
            EnvStatus::Running,
            EnvStatus::Paused,
            EnvStatus::Destroyed,
        ] {
            assert!(colorize_status(status).contains(&status.to_string()));
        }
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_CLIENT_ERROR);
        assert_ne!(EXIT_CLIENT_ERROR, EXIT_STORE_ERROR);
    }

    #[test]
    fn core_errors_map_to_exit_codes() {
        assert_eq!(
            Failure::from(CoreError::NotFound("e".to_owned())).code,
            EXIT_CLIENT_ERROR
        );
        assert_eq!(
            Failure::from(CoreError::PortConflict { port: 10005 }).code,
            EXIT_CLIENT_ERROR
        );
        assert_eq!(
            Failure::from(CoreError::RuntimeUnavailable("podman".to_owned())).code,
            EXIT_FAILURE
        );
        assert_eq!(
            Failure::from(CoreError::Store(corral_store::StoreError::LockFailed(
                "poisoned".to_owned()
            )))
            .code,
            EXIT_STORE_ERROR
        );
    }

    #[test]
    fn format_ports_lists_bindings() {
        let env = Environment {
            ports: vec![
                PortMapping::new("ui", 3000).with_host_port(10000),
                PortMapping::new("dns", 53)
                    .with_host_port(10001)
                    .with_protocol(corral_schema::Protocol::Udp),
            ],
            ..sample_env()
        };
        assert_eq!(format_ports(&env), "ui=10000->3000,dns=10001->53/udp");
        assert_eq!(format_ports(&sample_env()), "-");
    }

    fn sample_env() -> Environment {
        Environment::from_request(
            corral_schema::EnvId::new("e1"),
            corral_schema::CreateEnvironment::new("p1", "main"),
            "ubuntu:22.04",
            "2026-01-01T00:00:00+00:00",
        )
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_env_id_by_prefix() {
        let fx = fixture();
        let env = running_env(&fx.orch, "main").await;
        let resolved = resolve_env_id(&fx.orch, env.id.short()).await.unwrap();
        assert_eq!(resolved, env.id.as_str());
        let resolved = resolve_env_id(&fx.orch, &env.id).await.unwrap();
        assert_eq!(resolved, env.id.as_str());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_env_id_not_found() {
        let fx = fixture();
        let err = resolve_env_id(&fx.orch, "nonexistent").await.unwrap_err();
        assert_eq!(err.code, EXIT_CLIENT_ERROR);
        assert!(err.message.contains("no environment matching"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_env_id_ambiguous_prefix() {
        let fx = fixture();
        for id in ["abc-1", "abc-2"] {
            let env = Environment {
                id: corral_schema::EnvId::new(id),
                ..sample_env()
            };
            fx.orch.store().create(&env).unwrap();
        }
        let err = resolve_env_id(&fx.orch, "abc").await.unwrap_err();
        assert_eq!(err.code, EXIT_CLIENT_ERROR);
        assert!(err.message.contains("ambiguous"));
        assert_eq!(resolve_env_id(&fx.orch, "abc-2").await.unwrap(), "abc-2");
        assert_eq!(
            resolve_env_id(&fx.orch, "").await.unwrap_err().code,
            EXIT_CLIENT_ERROR
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_env_id_skips_tombstones_for_prefixes() {
        let fx = fixture();
        let env = running_env(&fx.orch, "main").await;
        fx.orch.delete(&env.id).await.unwrap();
        assert!(resolve_env_id(&fx.orch, env.id.short()).await.is_err());
        assert_eq!(
            resolve_env_id(&fx.orch, &env.id).await.unwrap(),
            env.id.as_str()
        );
        assert_eq!(fx.mock.container_count(), 0);
    }
}
