use super::{colorize_status, format_ports, json_pretty, resolve_env_id, Failure, EXIT_SUCCESS};
use corral_core::Orchestrator;

pub async fn run(orch: &Orchestrator, env_id: &str, json: bool) -> Result<u8, Failure> {
    let resolved = resolve_env_id(orch, env_id).await?;
    let env = orch.get(&resolved).await?;
    if json {
        println!("{}", json_pretty(&env)?);
    } else {
        println!("env_id:       {}", env.id);
        println!("project:      {}", env.project_id);
        println!("branch:       {}", env.branch);
        println!("image:        {}", env.image);
        println!("status:       {}", colorize_status(env.status));
        println!(
            "container:    {}",
            env.container_id.as_deref().unwrap_or("(none)")
        );
        println!("ports:        {}", format_ports(&env));
        println!("created_at:   {}", env.created_at);
        println!("last_active:  {}", env.last_active);
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{fixture, running_env};
    use super::super::EXIT_CLIENT_ERROR;
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn shows_live_environment() {
        let fx = fixture();
        let env = running_env(&fx.orch, "main").await;
        assert_eq!(run(&fx.orch, env.id.short(), true).await.unwrap(), EXIT_SUCCESS);
        assert_eq!(run(&fx.orch, &env.id, false).await.unwrap(), EXIT_SUCCESS);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn destroyed_environment_is_not_found() {
        let fx = fixture();
        let env = running_env(&fx.orch, "main").await;
        fx.orch.delete(&env.id).await.unwrap();
        let err = run(&fx.orch, &env.id, true).await.unwrap_err();
        assert_eq!(err.code, EXIT_CLIENT_ERROR);
    }
}
