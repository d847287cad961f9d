use super::{colorize_status, json_pretty, Failure, EXIT_FAILURE, EXIT_SUCCESS};
use corral_core::Orchestrator;

/// Exits non-zero when any environment has drifted.
pub async fn run(orch: &Orchestrator, json: bool) -> Result<u8, Failure> {
    let report = orch.detect_drift().await?;
    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!("checked {} environments", report.checked);
        for env in &report.drifted {
            println!(
                "  drifted  {}  {}  {}  container {} is gone",
                env.env_id.short(),
                env.project_id,
                colorize_status(env.status),
                env.container_id
            );
        }
        for (env_id, reason) in &report.unchecked {
            println!("  unknown  {}  {reason}", env_id.short());
        }
        if !report.has_drift() {
            println!("no drift detected");
        }
    }
    Ok(if report.has_drift() {
        EXIT_FAILURE
    } else {
        EXIT_SUCCESS
    })
}
