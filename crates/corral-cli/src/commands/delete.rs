use super::{resolve_env_id, Failure, EXIT_SUCCESS};
use corral_core::Orchestrator;

pub async fn run(orch: &Orchestrator, env_id: &str, json: bool) -> Result<u8, Failure> {
    let resolved = resolve_env_id(orch, env_id).await?;
    orch.delete(&resolved).await?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "env_id": resolved, "status": "destroyed" })
        );
    } else {
        println!("deleted environment {resolved}");
    }
    Ok(EXIT_SUCCESS)
}
