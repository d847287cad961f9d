use crate::types::{ContainerId, EnvId, ProjectId};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an environment.
///
/// `Destroyed` is terminal: the record is kept as a tombstone and no longer
/// participates in port accounting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EnvStatus {
    Creating,
    Running,
    Paused,
    Destroyed,
}

impl EnvStatus {
    pub fn is_active(self) -> bool {
        self != EnvStatus::Destroyed
    }

    /// Statuses in which a backing container must exist.
    pub fn has_container(self) -> bool {
        matches!(self, EnvStatus::Running | EnvStatus::Paused)
    }
}

impl fmt::Display for EnvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvStatus::Creating => write!(f, "creating"),
            EnvStatus::Running => write!(f, "running"),
            EnvStatus::Paused => write!(f, "paused"),
            EnvStatus::Destroyed => write!(f, "destroyed"),
        }
    }
}

impl FromStr for EnvStatus {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Creating" | "creating" => Ok(EnvStatus::Creating),
            "Running" | "running" => Ok(EnvStatus::Running),
            "Paused" | "paused" => Ok(EnvStatus::Paused),
            "Destroyed" | "destroyed" => Ok(EnvStatus::Destroyed),
            other => Err(SchemaError::UnknownStatus(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(SchemaError::UnknownProtocol(s.to_owned())),
        }
    }
}

/// A named container port and, once allocated, the host port bound to it.
///
/// On a request `host_port` is either unset (allocate one) or an explicit
/// wish. Once persisted on a live environment it never changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortMapping {
    pub name: String,
    pub container_port: u16,
    #[serde(default)]
    pub host_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
}

impl PortMapping {
    pub fn new(name: impl Into<String>, container_port: u16) -> Self {
        Self {
            name: name.into(),
            container_port,
            host_port: None,
            protocol: None,
        }
    }

    #[must_use]
    pub fn with_host_port(mut self, host_port: u16) -> Self {
        self.host_port = Some(host_port);
        self
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Parse `name:container[:host][/proto]`, e.g. `ui:3000`, `api:8080:10005/tcp`.
    pub fn parse_spec(spec: &str) -> Result<Self, SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidPortSpec {
            spec: spec.to_owned(),
            reason: reason.to_owned(),
        };

        let (body, protocol) = match spec.split_once('/') {
            Some((body, proto)) => (body, Some(proto.parse::<Protocol>()?)),
            None => (spec, None),
        };

        let parts: Vec<&str> = body.split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid("expected name:container[:host][/proto]"));
        }
        let container_port = parts[1]
            .parse::<u16>()
            .map_err(|_| invalid("container port is not a number in 1-65535"))?;
        let host_port = match parts.get(2) {
            Some(p) => Some(
                p.parse::<u16>()
                    .map_err(|_| invalid("host port is not a number in 1-65535"))?,
            ),
            None => None,
        };

        Ok(Self {
            name: parts[0].to_owned(),
            container_port,
            host_port,
            protocol,
        })
    }

    /// The `-p` binding string understood by podman/docker.
    pub fn binding(&self) -> Option<String> {
        self.host_port.map(|host| match self.protocol {
            Some(proto) => format!("{host}:{}/{proto}", self.container_port),
            None => format!("{host}:{}", self.container_port),
        })
    }
}

/// Request shape for creating an environment. Distinct from the persisted
/// [`Environment`]: optional fields are defaulted by [`Environment::from_request`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateEnvironment {
    pub project_id: ProjectId,
    pub branch: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub ports: Option<Vec<PortMapping>>,
}

impl CreateEnvironment {
    pub fn new(project_id: impl Into<ProjectId>, branch: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            branch: branch.into(),
            image: None,
            ports: None,
        }
    }

    #[must_use]
    pub fn with_ports(mut self, ports: Vec<PortMapping>) -> Self {
        self.ports = Some(ports);
        self
    }

    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn wishlist(&self) -> &[PortMapping] {
        self.ports.as_deref().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.project_id.trim().is_empty() {
            return Err(SchemaError::EmptyProject);
        }
        if self.branch.trim().is_empty() {
            return Err(SchemaError::EmptyBranch);
        }
        let mut names = HashSet::new();
        for mapping in self.wishlist() {
            if mapping.name.trim().is_empty() {
                return Err(SchemaError::EmptyPortName);
            }
            if !names.insert(mapping.name.as_str()) {
                return Err(SchemaError::DuplicatePortName(mapping.name.clone()));
            }
            if mapping.container_port == 0 {
                return Err(SchemaError::ZeroContainerPort(mapping.name.clone()));
            }
            if mapping.host_port == Some(0) {
                return Err(SchemaError::ZeroHostPort(mapping.name.clone()));
            }
        }
        Ok(())
    }
}

/// Persisted record pairing a project branch with a backing container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Environment {
    pub id: EnvId,
    pub project_id: ProjectId,
    pub branch: String,
    pub image: String,
    pub status: EnvStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<ContainerId>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    pub created_at: String,
    pub last_active: String,
}

impl Environment {
    /// Build a fresh `Creating` record from a request. Pure: the caller
    /// supplies the id, fallback image, and timestamp.
    pub fn from_request(
        id: EnvId,
        request: CreateEnvironment,
        default_image: &str,
        now: &str,
    ) -> Self {
        Self {
            id,
            project_id: request.project_id,
            branch: request.branch,
            image: request
                .image
                .filter(|i| !i.trim().is_empty())
                .unwrap_or_else(|| default_image.to_owned()),
            status: EnvStatus::Creating,
            container_id: None,
            ports: request.ports.unwrap_or_default(),
            created_at: now.to_owned(),
            last_active: now.to_owned(),
        }
    }

    pub fn host_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().filter_map(|p| p.host_port)
    }
}

/// Current time in the RFC 3339 form used for every persisted timestamp.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
