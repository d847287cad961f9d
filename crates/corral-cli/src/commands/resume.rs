use super::{json_pretty, resolve_env_id, Failure, EXIT_SUCCESS};
use corral_core::Orchestrator;

pub async fn run(orch: &Orchestrator, env_id: &str, json: bool) -> Result<u8, Failure> {
    let resolved = resolve_env_id(orch, env_id).await?;
    orch.resume(&resolved).await?;
    if json {
        let env = orch.get(&resolved).await?;
        println!("{}", json_pretty(&env)?);
    } else {
        println!("resumed environment {resolved}");
    }
    Ok(EXIT_SUCCESS)
}
