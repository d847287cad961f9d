use crate::layout::StoreLayout;
use crate::lock::StoreLock;
use crate::{fsync_dir, StoreError};
use corral_schema::{now_rfc3339, ContainerId, EnvStatus, Environment, PortMapping};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;

/// On-disk row: the environment plus a blake3 checksum of its pretty JSON.
#[derive(Serialize, Deserialize)]
struct StoredRow {
    #[serde(flatten)]
    environment: Environment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

fn compute_checksum(env: &Environment) -> Result<String, StoreError> {
    let json = serde_json::to_string_pretty(env)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}

/// Ids become file names; anything outside `[A-Za-z0-9_-]` cannot name a row.
fn is_valid_row_name(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Result of a compare-and-set status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusSwap {
    /// The row was in the expected status and now holds the new one.
    Applied(Environment),
    /// The row exists but was in a different status; nothing was written.
    Stale(EnvStatus),
    Missing,
}

/// Durable environment rows behind a single serialization point.
///
/// Every read and write happens through a [`StoreGuard`], which holds an
/// in-process mutex and an advisory file lock on the store root. The
/// convenience methods on this type each take the guard for one call; use
/// [`EnvironmentStore::lock`] to run a multi-step sequence atomically.
pub struct EnvironmentStore {
    layout: StoreLayout,
    serial: Mutex<()>,
}

impl EnvironmentStore {
    /// Open (and initialize if needed) the store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(root.as_ref());
        layout.initialize()?;
        Ok(Self {
            layout,
            serial: Mutex::new(()),
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn lock(&self) -> Result<StoreGuard<'_>, StoreError> {
        let serial = self
            .serial
            .lock()
            .map_err(|_| StoreError::LockFailed("store mutex poisoned".to_owned()))?;
        let file_lock = StoreLock::acquire(&self.layout.lock_file())?;
        Ok(StoreGuard {
            layout: &self.layout,
            _file_lock: file_lock,
            _serial: serial,
        })
    }

    pub fn create(&self, env: &Environment) -> Result<(), StoreError> {
        self.lock()?.create(env)
    }

    pub fn get(&self, id: &str) -> Result<Option<Environment>, StoreError> {
        self.lock()?.get(id)
    }

    pub fn list_by_project(&self, project_id: &str) -> Result<Vec<Environment>, StoreError> {
        self.lock()?.list_by_project(project_id)
    }

    pub fn list_all(&self) -> Result<Vec<Environment>, StoreError> {
        self.lock()?.list_all()
    }

    #[allow(clippy::type_complexity)]
    pub fn list_with_errors(
        &self,
    ) -> Result<Vec<Result<Environment, (String, StoreError)>>, StoreError> {
        self.lock()?.list_with_errors()
    }

    pub fn update_status(&self, id: &str, status: EnvStatus) -> Result<bool, StoreError> {
        self.lock()?.update_status(id, status)
    }

    pub fn swap_status(
        &self,
        id: &str,
        expected: EnvStatus,
        status: EnvStatus,
    ) -> Result<StatusSwap, StoreError> {
        self.lock()?.swap_status(id, expected, status)
    }

    pub fn update_container_and_ports(
        &self,
        id: &str,
        container_id: Option<&ContainerId>,
        ports: &[PortMapping],
        status: EnvStatus,
    ) -> Result<bool, StoreError> {
        self.lock()?
            .update_container_and_ports(id, container_id, ports, status)
    }

    pub fn touch(&self, id: &str) -> Result<bool, StoreError> {
        self.lock()?.touch(id)
    }

    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.lock()?.delete(id)
    }

    pub fn used_ports(&self) -> Result<HashSet<u16>, StoreError> {
        self.lock()?.used_ports()
    }
}

/// Exclusive access to the store. Dropping the guard releases both locks.
///
/// Update methods match live rows only: a tombstone (`Destroyed`) is never
/// rewritten, so each returns `false` for both a missing row and a tombstone.
/// Every successful update refreshes `last_active`.
pub struct StoreGuard<'a> {
    layout: &'a StoreLayout,
    _file_lock: StoreLock,
    _serial: MutexGuard<'a, ()>,
}

impl StoreGuard<'_> {
    pub fn create(&self, env: &Environment) -> Result<(), StoreError> {
        if !is_valid_row_name(&env.id) {
            return Err(StoreError::InvalidId(env.id.to_string()));
        }
        if self.layout.environment_path(&env.id).exists() {
            return Err(StoreError::AlreadyExists(env.id.to_string()));
        }
        self.put(env)
    }

    pub fn get(&self, id: &str) -> Result<Option<Environment>, StoreError> {
        if !is_valid_row_name(id) {
            return Ok(None);
        }
        let path = self.layout.environment_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let row: StoredRow = serde_json::from_str(&content)?;

        if let Some(ref expected) = row.checksum {
            let actual = compute_checksum(&row.environment)?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    env_id: id.to_owned(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(Some(row.environment))
    }

    /// Rows for one project, tombstones included, newest first.
    pub fn list_by_project(&self, project_id: &str) -> Result<Vec<Environment>, StoreError> {
        let mut envs: Vec<Environment> = self
            .list_all()?
            .into_iter()
            .filter(|e| e.project_id == project_id)
            .collect();
        envs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(envs)
    }

    /// Every readable row, sorted by id. Corrupt rows are skipped with a warning.
    pub fn list_all(&self) -> Result<Vec<Environment>, StoreError> {
        let mut results = Vec::new();
        for entry in self.list_with_errors()? {
            match entry {
                Ok(env) => results.push(env),
                Err((name, e)) => {
                    tracing::warn!("skipping corrupted environment row '{name}': {e}");
                }
            }
        }
        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    /// Like `list_all()`, but surfaces each unreadable row.
    #[allow(clippy::type_complexity)]
    pub fn list_with_errors(
        &self,
    ) -> Result<Vec<Result<Environment, (String, StoreError)>>, StoreError> {
        let dir = self.layout.environments_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !is_valid_row_name(&name) {
                continue;
            }
            match self.get(&name) {
                Ok(Some(env)) => results.push(Ok(env)),
                Ok(None) => {}
                Err(e) => results.push(Err((name, e))),
            }
        }
        Ok(results)
    }

    pub fn update_status(&self, id: &str, status: EnvStatus) -> Result<bool, StoreError> {
        self.modify(id, |env| env.status = status)
    }

    /// Set `status` only if the row is currently `expected`.
    pub fn swap_status(
        &self,
        id: &str,
        expected: EnvStatus,
        status: EnvStatus,
    ) -> Result<StatusSwap, StoreError> {
        let Some(mut env) = self.get(id)? else {
            return Ok(StatusSwap::Missing);
        };
        if env.status != expected {
            return Ok(StatusSwap::Stale(env.status));
        }
        env.status = status;
        if status == EnvStatus::Destroyed {
            env.container_id = None;
        }
        env.last_active = now_rfc3339();
        self.put(&env)?;
        Ok(StatusSwap::Applied(env))
    }

    /// Write container id, final port list and status in one row write.
    pub fn update_container_and_ports(
        &self,
        id: &str,
        container_id: Option<&ContainerId>,
        ports: &[PortMapping],
        status: EnvStatus,
    ) -> Result<bool, StoreError> {
        self.modify(id, |env| {
            env.container_id = container_id.cloned();
            env.ports = ports.to_vec();
            env.status = status;
        })
    }

    pub fn update_ports(&self, id: &str, ports: &[PortMapping]) -> Result<bool, StoreError> {
        self.modify(id, |env| env.ports = ports.to_vec())
    }

    /// Refresh `last_active` only.
    pub fn touch(&self, id: &str) -> Result<bool, StoreError> {
        self.modify(id, |_| {})
    }

    /// Tombstone a live row: status `Destroyed`, container id cleared. Its
    /// ports stop counting as used.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.modify(id, |env| {
            env.status = EnvStatus::Destroyed;
            env.container_id = None;
        })
    }

    /// Host ports held by every non-destroyed row.
    ///
    /// Fails on an unreadable row: its ports are unknown, and guessing would
    /// risk handing the same port out twice.
    pub fn used_ports(&self) -> Result<HashSet<u16>, StoreError> {
        self.collect_used_ports(None)
    }

    /// Same as [`used_ports`](Self::used_ports), ignoring the row `id`.
    pub fn used_ports_excluding(&self, id: &str) -> Result<HashSet<u16>, StoreError> {
        self.collect_used_ports(Some(id))
    }

    fn collect_used_ports(&self, skip: Option<&str>) -> Result<HashSet<u16>, StoreError> {
        let mut used = HashSet::new();
        for entry in self.list_with_errors()? {
            let env = entry.map_err(|(_, e)| e)?;
            if !env.status.is_active() || skip.is_some_and(|s| env.id == s) {
                continue;
            }
            used.extend(env.host_ports());
        }
        Ok(used)
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut Environment)) -> Result<bool, StoreError> {
        let Some(mut env) = self.get(id)? else {
            return Ok(false);
        };
        if !env.status.is_active() {
            return Ok(false);
        }
        f(&mut env);
        env.last_active = now_rfc3339();
        self.put(&env)?;
        Ok(true)
    }

    fn put(&self, env: &Environment) -> Result<(), StoreError> {
        let row = StoredRow {
            checksum: Some(compute_checksum(env)?),
            environment: env.clone(),
        };
        let content = serde_json::to_string_pretty(&row)?;

        let dir = self.layout.environments_dir();
        let dest = self.layout.environment_path(&env.id);
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }
}
