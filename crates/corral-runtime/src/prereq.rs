use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    if name.contains('/') {
        return std::path::Path::new(name).is_file();
    }
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check what a CLI runtime backend needs. `mock` needs nothing.
pub fn check_runtime_prereqs(backend: &str, binary: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    if backend == "mock" {
        return missing;
    }

    if !command_exists(binary) {
        missing.push(MissingPrereq {
            name: binary.to_owned(),
            purpose: "container runtime for environments",
            install_hint: match backend {
                "docker" => "https://docs.docker.com/engine/install/",
                _ => "zypper install podman | apt install podman | dnf install podman | pacman -S podman",
            },
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nCorral needs a container runtime to create environments.");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "podman".to_owned(),
            purpose: "containers",
            install_hint: "apt install podman",
        };
        let s = format!("{m}");
        assert!(s.contains("podman"));
        assert!(s.contains("containers"));
        assert!(s.contains("apt install podman"));
    }

    #[test]
    fn mock_backend_needs_nothing() {
        assert!(check_runtime_prereqs("mock", "does-not-matter").is_empty());
    }

    #[test]
    fn absent_binary_is_reported() {
        let missing = check_runtime_prereqs("podman", "/nonexistent/corral/podman");
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "/nonexistent/corral/podman");
        assert!(format_missing(&missing).contains("missing prerequisites:"));
    }
}
