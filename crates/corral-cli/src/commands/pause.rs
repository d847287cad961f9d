use super::{json_pretty, resolve_env_id, Failure, EXIT_SUCCESS};
use corral_core::Orchestrator;

pub async fn run(orch: &Orchestrator, env_id: &str, json: bool) -> Result<u8, Failure> {
    let resolved = resolve_env_id(orch, env_id).await?;
    orch.pause(&resolved).await?;
    if json {
        let env = orch.get(&resolved).await?;
        println!("{}", json_pretty(&env)?);
    } else {
        println!("paused environment {resolved}");
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{fixture, running_env};
    use super::super::EXIT_CLIENT_ERROR;
    use super::*;
    use corral_schema::EnvStatus;

    #[tokio::test(flavor = "multi_thread")]
    async fn pauses_by_prefix() {
        let fx = fixture();
        let env = running_env(&fx.orch, "main").await;
        assert_eq!(run(&fx.orch, env.id.short(), false).await.unwrap(), EXIT_SUCCESS);
        assert_eq!(fx.orch.get(&env.id).await.unwrap().status, EnvStatus::Paused);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pausing_twice_is_a_conflict() {
        let fx = fixture();
        let env = running_env(&fx.orch, "main").await;
        run(&fx.orch, &env.id, true).await.unwrap();
        let err = run(&fx.orch, &env.id, true).await.unwrap_err();
        assert_eq!(err.code, EXIT_CLIENT_ERROR);
        assert!(err.message.contains("status is paused"));
    }
}
