use super::{colorize_status, format_ports, json_pretty, Failure, EXIT_SUCCESS};
use corral_core::Orchestrator;
use corral_schema::Environment;

pub async fn run(
    orch: &Orchestrator,
    project: Option<&str>,
    all: bool,
    json: bool,
) -> Result<u8, Failure> {
    let envs = collect(orch, project, all).await?;
    if json {
        println!("{}", json_pretty(&envs)?);
    } else if envs.is_empty() {
        println!("no environments found");
    } else {
        println!(
            "{:<10} {:<16} {:<20} {:<10} PORTS",
            "SHORT_ID", "PROJECT", "BRANCH", "STATUS"
        );
        for env in &envs {
            let status = colorize_status(env.status);
            let status = console::pad_str(&status, 10, console::Alignment::Left, None);
            println!(
                "{:<10} {:<16} {:<20} {status} {}",
                env.id.short(),
                env.project_id.as_str(),
                env.branch,
                format_ports(env)
            );
        }
    }
    Ok(EXIT_SUCCESS)
}

async fn collect(
    orch: &Orchestrator,
    project: Option<&str>,
    all: bool,
) -> Result<Vec<Environment>, Failure> {
    let envs = match (project, all) {
        (Some(project), false) => orch.list(project).await?,
        (Some(project), true) => orch.list_all(project).await?,
        (None, _) => {
            let mut envs = orch.environments().await?;
            if !all {
                envs.retain(|e| e.status.is_active());
            }
            envs.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            });
            envs
        }
    };
    Ok(envs)
}
