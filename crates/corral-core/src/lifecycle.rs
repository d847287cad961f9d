use crate::CoreError;
use corral_schema::EnvStatus;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleOp {
    Create,
    Pause,
    Resume,
    Delete,
    Exec,
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleOp::Create => write!(f, "create"),
            LifecycleOp::Pause => write!(f, "pause"),
            LifecycleOp::Resume => write!(f, "resume"),
            LifecycleOp::Delete => write!(f, "delete"),
            LifecycleOp::Exec => write!(f, "exec"),
        }
    }
}

/// Status `op` leads to from `current`, or `None` if `op` is not allowed there.
pub fn next_status(current: EnvStatus, op: LifecycleOp) -> Option<EnvStatus> {
    match (current, op) {
        (EnvStatus::Creating, LifecycleOp::Create) | (EnvStatus::Paused, LifecycleOp::Resume) => {
            Some(EnvStatus::Running)
        }
        (EnvStatus::Running, LifecycleOp::Pause) => Some(EnvStatus::Paused),
        (EnvStatus::Running, LifecycleOp::Exec) => Some(EnvStatus::Running),
        (EnvStatus::Creating | EnvStatus::Running | EnvStatus::Paused, LifecycleOp::Delete) => {
            Some(EnvStatus::Destroyed)
        }
        _ => None,
    }
}

pub fn validate_transition(
    env_id: &str,
    current: EnvStatus,
    op: LifecycleOp,
) -> Result<EnvStatus, CoreError> {
    next_status(current, op).ok_or_else(|| CoreError::Conflict {
        env_id: env_id.to_owned(),
        op,
        current,
    })
}
