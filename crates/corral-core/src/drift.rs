use corral_schema::{ContainerId, EnvId, EnvStatus, ProjectId};
use serde::Serialize;

/// A live environment whose recorded container the runtime no longer knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftedEnvironment {
    pub env_id: EnvId,
    pub project_id: ProjectId,
    pub status: EnvStatus,
    pub container_id: ContainerId,
}

/// Result of comparing persisted environments against the runtime.
///
/// Detection only: nothing is changed. `unchecked` lists environments whose
/// probe failed, with the error text.
#[derive(Debug, Default, Serialize)]
pub struct DriftReport {
    pub checked: usize,
    pub drifted: Vec<DriftedEnvironment>,
    pub unchecked: Vec<(EnvId, String)>,
}

impl DriftReport {
    pub fn has_drift(&self) -> bool {
        !self.drifted.is_empty()
    }
}
