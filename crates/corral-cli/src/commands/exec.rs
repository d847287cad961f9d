use super::{resolve_env_id, Failure, EXIT_FAILURE};
use corral_core::Orchestrator;

/// Run `command` in the environment. The process exits with the command's own
/// exit code, or 1 if that does not fit in a byte.
pub async fn run(
    orch: &Orchestrator,
    env_id: &str,
    command: &[String],
    json: bool,
) -> Result<u8, Failure> {
    let resolved = resolve_env_id(orch, env_id).await?;
    let line = command.join(" ");
    let out = orch.exec(&resolved, &line).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "env_id": resolved,
                "command": line,
                "output": out.output,
                "exit_code": out.exit_code,
            })
        );
    } else {
        print!("{}", out.output);
    }
    Ok(u8::try_from(out.exit_code).unwrap_or(EXIT_FAILURE))
}
