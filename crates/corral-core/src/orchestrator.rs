use crate::drift::{DriftReport, DriftedEnvironment};
use crate::lifecycle::{validate_transition, LifecycleOp};
use crate::ports::allocate;
use crate::CoreError;
use corral_runtime::{container_name, select_runtime, ExecOutput, RuntimeAdapter, RuntimeError};
use corral_schema::{
    now_rfc3339, ContainerId, CorralConfig, CreateEnvironment, EnvId, EnvStatus, Environment,
    PortMapping,
};
use corral_store::{EnvironmentStore, StatusSwap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Async lifecycle API over the state store and a container runtime.
///
/// Cheap to clone; clones share the store and the runtime. Every store call
/// and every runtime call runs on tokio's blocking pool, and every runtime
/// call is bounded by the command timeout. Operations on one environment are
/// not locked against each other: each re-checks the status it started from
/// when it writes, and reports `Conflict` if another call got there first.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<EnvironmentStore>,
    runtime: Arc<dyn RuntimeAdapter>,
    config: Arc<CorralConfig>,
    timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<EnvironmentStore>,
        runtime: Arc<dyn RuntimeAdapter>,
        config: CorralConfig,
    ) -> Self {
        let timeout = config.runtime.command_timeout();
        Self {
            store,
            runtime,
            config: Arc::new(config),
            timeout,
        }
    }

    /// Open the store at `store_root` and the runtime named in `config`.
    pub fn open(store_root: &Path, config: CorralConfig) -> Result<Self, CoreError> {
        let store = EnvironmentStore::open(store_root)?;
        let runtime: Arc<dyn RuntimeAdapter> = Arc::from(select_runtime(&config.runtime)?);
        Ok(Self::new(Arc::new(store), runtime, config))
    }

    /// Override the per-call runtime timeout.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<EnvironmentStore> {
        &self.store
    }

    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    pub fn config(&self) -> &CorralConfig {
        &self.config
    }

    pub async fn create(&self, request: CreateEnvironment) -> Result<Environment, CoreError> {
        info!(
            "creating environment for project {} branch {}",
            request.project_id, request.branch
        );
        request.validate()?;

        let row = Environment::from_request(
            EnvId::generate(),
            request,
            &self.config.runtime.default_image,
            &now_rfc3339(),
        );
        let env_id = row.id.clone();
        let image = row.image.clone();
        let range = self.config.ports;

        // Insert, read used ports, and write the allocation under one guard so
        // no other create can see the same free ports.
        let ports = self
            .store_call(move |store| {
                let guard = store.lock()?;
                guard.create(&row)?;
                let allocated = guard
                    .used_ports_excluding(&row.id)
                    .map_err(CoreError::from)
                    .and_then(|used| Ok(allocate(&used, &row.ports, range)?));
                match allocated {
                    Ok(ports) => {
                        guard.update_ports(&row.id, &ports)?;
                        Ok(ports)
                    }
                    Err(e) => {
                        guard.delete(&row.id)?;
                        Err(e)
                    }
                }
            })
            .await
            .inspect_err(|e| warn!("allocation for {env_id} failed: {e}"))?;
        debug!("allocated ports for {env_id}: {ports:?}");

        let name = container_name(&self.config.runtime.container_prefix, &env_id);
        let created = self
            .create_container(&env_id, &name, image, ports.clone())
            .await;
        let container_id = match created {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                warn!("container creation for {env_id} failed: {e}");
                // A runtime that ran may have left a created but unstarted
                // container behind, e.g. after a failed port bind.
                let orphan = match &e {
                    RuntimeError::NotInstalled(_)
                    | RuntimeError::BackendUnavailable(_)
                    | RuntimeError::Spawn { .. } => None,
                    _ => Some(name.as_str()),
                };
                self.compensate_create(&env_id, orphan).await;
                return Err(e.into());
            }
            Err(e) => {
                self.compensate_create(&env_id, Some(&name)).await;
                return Err(e);
            }
        };

        let written = {
            let env_id = env_id.clone();
            let container_id = container_id.clone();
            let ports = ports.clone();
            self.store_call(move |store| {
                Ok(store.update_container_and_ports(
                    &env_id,
                    Some(&container_id),
                    &ports,
                    EnvStatus::Running,
                )?)
            })
            .await
        };

        match written {
            Ok(true) => {}
            Ok(false) => {
                warn!("environment {env_id} was deleted while its container was starting");
                self.remove_best_effort(&env_id, &container_id).await;
                return Err(CoreError::Conflict {
                    env_id: env_id.to_string(),
                    op: LifecycleOp::Create,
                    current: EnvStatus::Destroyed,
                });
            }
            Err(e) => {
                error!("failed to record container {container_id} for {env_id}: {e}");
                self.remove_best_effort(&env_id, &container_id).await;
                self.compensate_create(&env_id, None).await;
                return Err(e);
            }
        }

        info!("environment {env_id} running in container {container_id}");
        self.get(&env_id).await
    }

    pub async fn pause(&self, env_id: &str) -> Result<(), CoreError> {
        info!("pausing environment {env_id}");
        let env = self.load_for(env_id, LifecycleOp::Pause).await?;

        if let Some(container_id) = env.container_id.clone() {
            let stopped = self
                .runtime_call("stop", &env.id, move |rt| rt.stop_container(&container_id))
                .await?;
            match stopped {
                Ok(()) => {}
                Err(e) if e.is_soft() => warn!("{e}; treating stop as done"),
                Err(e) => return Err(e.into()),
            }
        }

        self.swap(&env.id, LifecycleOp::Pause, EnvStatus::Running, EnvStatus::Paused)
            .await
    }

    pub async fn resume(&self, env_id: &str) -> Result<(), CoreError> {
        info!("resuming environment {env_id}");
        let env = self.load_for(env_id, LifecycleOp::Resume).await?;

        if let Some(container_id) = env.container_id.clone() {
            let started = self
                .runtime_call("start", &env.id, move |rt| rt.start_container(&container_id))
                .await?;
            match started {
                Ok(()) => {}
                Err(e) if e.is_soft() => warn!("{e}; treating start as done"),
                Err(e) => return Err(e.into()),
            }
        }

        self.swap(&env.id, LifecycleOp::Resume, EnvStatus::Paused, EnvStatus::Running)
            .await
    }

    /// Remove the container (best effort) and tombstone the row. Runtime
    /// failures other than a timeout are logged and do not stop the delete.
    pub async fn delete(&self, env_id: &str) -> Result<(), CoreError> {
        info!("deleting environment {env_id}");
        let env = self.get(env_id).await?;
        validate_transition(&env.id, env.status, LifecycleOp::Delete)?;

        if let Some(container_id) = env.container_id.clone() {
            let removed = self
                .runtime_call("remove", &env.id, move |rt| {
                    rt.remove_container(&container_id)
                })
                .await?;
            if let Err(e) = removed {
                warn!("failed to remove container for {}: {e}", env.id);
            }
        }

        let id = env.id.clone();
        if self.store_call(move |store| Ok(store.delete(&id)?)).await? {
            Ok(())
        } else {
            Err(CoreError::NotFound(env.id.to_string()))
        }
    }

    pub async fn exec(&self, env_id: &str, command: &str) -> Result<ExecOutput, CoreError> {
        info!("exec in environment {env_id}: {command:?}");
        let env = self.load_for(env_id, LifecycleOp::Exec).await?;
        let Some(container_id) = env.container_id.clone() else {
            return Err(CoreError::Conflict {
                env_id: env.id.to_string(),
                op: LifecycleOp::Exec,
                current: env.status,
            });
        };

        let command = command.to_owned();
        let output = self
            .runtime_call("exec", &env.id, move |rt| {
                rt.exec_in_container(&container_id, &command)
            })
            .await??;

        let id = env.id.clone();
        match self.store_call(move |store| Ok(store.touch(&id)?)).await {
            Ok(true) => {}
            Ok(false) => debug!("environment {} went away during exec", env.id),
            Err(e) => warn!("failed to refresh last_active for {}: {e}", env.id),
        }
        Ok(output)
    }

    /// A live environment. Tombstones count as not found.
    pub async fn get(&self, env_id: &str) -> Result<Environment, CoreError> {
        let id = env_id.to_owned();
        self.store_call(move |store| Ok(store.get(&id)?))
            .await?
            .filter(|env| env.status.is_active())
            .ok_or_else(|| CoreError::NotFound(env_id.to_owned()))
    }

    /// Live environments of a project, newest first.
    pub async fn list(&self, project_id: &str) -> Result<Vec<Environment>, CoreError> {
        let mut envs = self.list_all(project_id).await?;
        envs.retain(|env| env.status.is_active());
        Ok(envs)
    }

    /// Every environment of a project including tombstones, newest first.
    pub async fn list_all(&self, project_id: &str) -> Result<Vec<Environment>, CoreError> {
        let project = project_id.to_owned();
        self.store_call(move |store| Ok(store.list_by_project(&project)?))
            .await
    }

    /// Every readable row across all projects, tombstones included.
    pub async fn environments(&self) -> Result<Vec<Environment>, CoreError> {
        self.store_call(|store| Ok(store.list_all()?)).await
    }

    /// Runtime version, for startup and health checks.
    pub async fn check_runtime(&self) -> Result<String, CoreError> {
        Ok(self
            .runtime_call("version", "-", |rt| rt.check_available())
            .await??)
    }

    /// Report live environments whose container has vanished from the runtime.
    pub async fn detect_drift(&self) -> Result<DriftReport, CoreError> {
        info!("checking environments for drift");
        let envs = self.environments().await?;
        let mut report = DriftReport::default();

        for env in envs {
            if !env.status.has_container() {
                continue;
            }
            let Some(container_id) = env.container_id.clone() else {
                continue;
            };
            report.checked += 1;
            let probe = container_id.clone();
            match self
                .runtime_call("exists", &env.id, move |rt| rt.container_exists(&probe))
                .await
            {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    warn!("environment {} lost container {container_id}", env.id);
                    report.drifted.push(DriftedEnvironment {
                        env_id: env.id,
                        project_id: env.project_id,
                        status: env.status,
                        container_id,
                    });
                }
                Ok(Err(e)) => report.unchecked.push((env.id, e.to_string())),
                Err(e) => report.unchecked.push((env.id, e.to_string())),
            }
        }
        Ok(report)
    }

    /// Fetch an environment and check `op` is allowed from its status.
    /// Tombstones surface as `Conflict(Destroyed)`.
    async fn load_for(&self, env_id: &str, op: LifecycleOp) -> Result<Environment, CoreError> {
        let id = env_id.to_owned();
        let env = self
            .store_call(move |store| Ok(store.get(&id)?))
            .await?
            .ok_or_else(|| CoreError::NotFound(env_id.to_owned()))?;
        validate_transition(&env.id, env.status, op)?;
        Ok(env)
    }

    async fn swap(
        &self,
        env_id: &EnvId,
        op: LifecycleOp,
        from: EnvStatus,
        to: EnvStatus,
    ) -> Result<(), CoreError> {
        let id = env_id.clone();
        match self
            .store_call(move |store| Ok(store.swap_status(&id, from, to)?))
            .await?
        {
            StatusSwap::Applied(_) => Ok(()),
            StatusSwap::Stale(current) => Err(CoreError::Conflict {
                env_id: env_id.to_string(),
                op,
                current,
            }),
            StatusSwap::Missing => Err(CoreError::NotFound(env_id.to_string())),
        }
    }

    /// Tombstone a failed create, first removing `orphan` by name if a
    /// container might have been started.
    async fn compensate_create(&self, env_id: &EnvId, orphan: Option<&str>) {
        if let Some(name) = orphan {
            self.remove_best_effort(env_id, name).await;
        }
        let id = env_id.clone();
        match self.store_call(move |store| Ok(store.delete(&id)?)).await {
            Ok(_) => debug!("environment {env_id} marked destroyed after failed create"),
            Err(e) => error!("failed to mark {env_id} destroyed after failed create: {e}"),
        }
    }

    async fn remove_best_effort(&self, env_id: &EnvId, container: &str) {
        let target = container.to_owned();
        match self
            .runtime_call("remove", env_id, move |rt| rt.remove_container(&target))
            .await
        {
            Ok(Ok(())) => debug!("removed container {container} for {env_id}"),
            Ok(Err(e)) => warn!("cleanup of container {container} for {env_id} failed: {e}"),
            Err(e) => warn!("cleanup of container {container} for {env_id} failed: {e}"),
        }
    }

    async fn store_call<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(&EnvironmentStore) -> Result<T, CoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| CoreError::Worker(e.to_string()))?
    }

    /// Run `f` against the runtime on the blocking pool, bounded by the
    /// command timeout. The outer error is a timeout or a lost worker; the
    /// inner one is the runtime's own answer.
    async fn runtime_call<T, F>(
        &self,
        op: &'static str,
        env_id: &str,
        f: F,
    ) -> Result<Result<T, RuntimeError>, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RuntimeAdapter) -> Result<T, RuntimeError> + Send + 'static,
    {
        let runtime = Arc::clone(&self.runtime);
        let mut task = tokio::task::spawn_blocking(move || f(runtime.as_ref()));
        self.bounded(op, env_id, &mut task).await
    }

    /// `runtime_call` for the container create. A create that outlives the
    /// timeout keeps running on the blocking pool; whatever it creates is
    /// removed by a reaper once it returns.
    async fn create_container(
        &self,
        env_id: &EnvId,
        name: &str,
        image: String,
        ports: Vec<PortMapping>,
    ) -> Result<Result<ContainerId, RuntimeError>, CoreError> {
        let runtime = Arc::clone(&self.runtime);
        let target = name.to_owned();
        let mut task =
            tokio::task::spawn_blocking(move || runtime.create_container(&target, &image, &ports));
        let result = self.bounded("create", env_id, &mut task).await;
        if matches!(result, Err(CoreError::RuntimeTimeout { .. })) {
            self.reap_late_create(env_id.clone(), task);
        }
        result
    }

    fn reap_late_create(
        &self,
        env_id: EnvId,
        task: JoinHandle<Result<ContainerId, RuntimeError>>,
    ) {
        let runtime = Arc::clone(&self.runtime);
        tokio::spawn(async move {
            let container_id = match task.await {
                Ok(Ok(id)) => id,
                Ok(Err(e)) => {
                    debug!("timed-out create for {env_id} failed late: {e}");
                    return;
                }
                Err(e) => {
                    warn!("timed-out create for {env_id} was lost: {e}");
                    return;
                }
            };
            warn!("timed-out create for {env_id} finished late as {container_id}, removing it");
            let target = container_id.clone();
            let removed =
                tokio::task::spawn_blocking(move || runtime.remove_container(&target)).await;
            match removed {
                Ok(Ok(())) => info!("removed late container {container_id} for {env_id}"),
                Ok(Err(e)) => error!("failed to remove late container {container_id}: {e}"),
                Err(e) => error!("failed to remove late container {container_id}: {e}"),
            }
        });
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        env_id: &str,
        task: &mut JoinHandle<Result<T, RuntimeError>>,
    ) -> Result<Result<T, RuntimeError>, CoreError> {
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(CoreError::Worker(e.to_string())),
            Err(_) => {
                warn!("runtime {op} for {env_id} timed out after {:?}", self.timeout);
                Err(CoreError::RuntimeTimeout {
                    op: op.to_owned(),
                    env_id: env_id.to_owned(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_runtime::MockRuntime;

    fn orchestrator() -> (tempfile::TempDir, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EnvironmentStore::open(dir.path()).unwrap());
        let orch = Orchestrator::new(store, Arc::new(MockRuntime::new()), CorralConfig::default());
        (dir, orch)
    }

    #[tokio::test]
    async fn create_uses_default_image_and_prefix() {
        let (_dir, orch) = orchestrator();
        let env = orch
            .create(CreateEnvironment::new("p1", "main").with_ports(vec![PortMapping::new("ui", 3000)]))
            .await
            .unwrap();
        assert_eq!(env.image, "ubuntu:22.04");
        assert_eq!(env.status, EnvStatus::Running);
        assert!(env.container_id.is_some());
        assert_eq!(env.ports[0].host_port, Some(10000));
    }

    #[tokio::test]
    async fn invalid_request_writes_nothing() {
        let (_dir, orch) = orchestrator();
        let err = orch
            .create(CreateEnvironment::new("p1", " "))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
        assert!(orch.environments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let (_dir, orch) = orchestrator();
        assert!(matches!(
            orch.get("missing").await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            orch.pause("missing").await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn check_runtime_reports_version() {
        let (_dir, orch) = orchestrator();
        assert!(orch.check_runtime().await.unwrap().contains("mock"));
        assert_eq!(orch.runtime_name(), "mock");
    }
}
