use super::{
    colorize_status, format_ports, json_pretty, spin_fail, spin_ok, spinner, Failure,
    EXIT_SUCCESS,
};
use corral_core::{CoreError, Orchestrator};
use corral_schema::{CreateEnvironment, PortMapping};

pub async fn run(
    orch: &Orchestrator,
    project: &str,
    branch: &str,
    image: Option<&str>,
    port_specs: &[String],
    json: bool,
) -> Result<u8, Failure> {
    let ports = port_specs
        .iter()
        .map(|spec| PortMapping::parse_spec(spec))
        .collect::<Result<Vec<_>, _>>()
        .map_err(CoreError::from)?;

    let mut request = CreateEnvironment::new(project, branch);
    if !ports.is_empty() {
        request = request.with_ports(ports);
    }
    if let Some(image) = image {
        request = request.with_image(image);
    }

    let pb = (!json).then(|| spinner(&format!("creating environment for {project}/{branch}")));
    let result = orch.create(request).await;
    let env = match result {
        Ok(env) => {
            if let Some(pb) = &pb {
                spin_ok(pb, "environment created");
            }
            env
        }
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "create failed");
            }
            return Err(e.into());
        }
    };

    if json {
        println!("{}", json_pretty(&env)?);
    } else {
        println!("env_id:     {}", env.id);
        println!("status:     {}", colorize_status(env.status));
        println!("image:      {}", env.image);
        println!("ports:      {}", format_ports(&env));
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::fixture;
    use super::super::EXIT_CLIENT_ERROR;
    use super::*;
    use corral_schema::EnvStatus;

    #[tokio::test(flavor = "multi_thread")]
    async fn creates_with_parsed_ports() {
        let fx = fixture();
        let specs = vec!["ui:3000".to_owned(), "api:8080:20005/tcp".to_owned()];
        let code = run(&fx.orch, "p1", "main", Some("alpine:3"), &specs, true)
            .await
            .unwrap();
        assert_eq!(code, EXIT_SUCCESS);

        let envs = fx.orch.list("p1").await.unwrap();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].status, EnvStatus::Running);
        assert_eq!(envs[0].image, "alpine:3");
        let bound: Vec<_> = envs[0]
            .ports
            .iter()
            .map(|p| (p.name.as_str(), p.host_port))
            .collect();
        assert_eq!(bound, vec![("ui", Some(20000)), ("api", Some(20005))]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bad_port_spec_is_client_error() {
        let fx = fixture();
        let err = run(&fx.orch, "p1", "main", None, &["ui".to_owned()], true)
            .await
            .unwrap_err();
        assert_eq!(err.code, EXIT_CLIENT_ERROR);
        assert!(err.message.contains("invalid port spec"));
        assert!(fx.orch.environments().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn taken_explicit_port_is_client_error() {
        let fx = fixture();
        let specs = vec!["ui:3000:20003".to_owned()];
        run(&fx.orch, "p1", "a", None, &specs, true).await.unwrap();
        let err = run(&fx.orch, "p1", "b", None, &specs, true)
            .await
            .unwrap_err();
        assert_eq!(err.code, EXIT_CLIENT_ERROR);
        assert!(err.message.contains("20003"));
    }
}
