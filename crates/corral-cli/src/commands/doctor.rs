use super::{json_pretty, Failure, EXIT_FAILURE, EXIT_SUCCESS};
use corral_schema::CorralConfig;
use corral_store::{EnvironmentStore, StoreLayout, StoreLock};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub async fn run(store_path: &Path, config: CorralConfig, json_output: bool) -> Result<u8, Failure> {
    let mut checks: Vec<Check> = Vec::new();

    checks.push(Check::pass(
        "config",
        &format!(
            "Config valid (backend {}, ports {}-{})",
            config.runtime.backend, config.ports.low, config.ports.high
        ),
    ));
    check_prereqs(&config, &mut checks);
    check_runtime(&config, &mut checks).await;

    if store_path.join("store").exists() {
        checks.push(Check::pass("store_exists", "Store directory exists"));
        let root = store_path.to_path_buf();
        let store_checks = tokio::task::spawn_blocking(move || check_store(root, &config))
            .await
            .map_err(|e| format!("store checks did not complete: {e}"))?;
        checks.extend(store_checks);
    } else {
        checks.push(Check::info(
            "store_exists",
            "Store not initialized (will be created on first create)",
        ));
    }

    print_results(&checks, json_output)
}

fn check_prereqs(config: &CorralConfig, checks: &mut Vec<Check>) {
    let missing =
        corral_runtime::check_runtime_prereqs(&config.runtime.backend, config.runtime.binary());
    if missing.is_empty() {
        checks.push(Check::pass(
            "runtime_prereqs",
            "Runtime prerequisites satisfied",
        ));
    } else {
        checks.push(Check::fail(
            "runtime_prereqs",
            &format!(
                "Missing prerequisites: {}",
                corral_runtime::format_missing(&missing)
            ),
        ));
    }
}

async fn check_runtime(config: &CorralConfig, checks: &mut Vec<Check>) {
    let runtime = match corral_runtime::select_runtime(&config.runtime) {
        Ok(rt) => rt,
        Err(e) => {
            checks.push(Check::fail("runtime", &format!("Runtime unusable: {e}")));
            return;
        }
    };
    let timeout = config.runtime.command_timeout();
    let probe = tokio::task::spawn_blocking(move || runtime.check_available());
    match tokio::time::timeout(timeout, probe).await {
        Ok(Ok(Ok(version))) => checks.push(Check::pass(
            "runtime",
            &format!("Runtime available: {version}"),
        )),
        Ok(Ok(Err(e))) => checks.push(Check::fail("runtime", &format!("Runtime unavailable: {e}"))),
        Ok(Err(e)) => checks.push(Check::fail("runtime", &format!("Runtime probe failed: {e}"))),
        Err(_) => checks.push(Check::fail(
            "runtime",
            &format!("Runtime did not answer within {timeout:?}"),
        )),
    }
}

fn check_store(root: PathBuf, config: &CorralConfig) -> Vec<Check> {
    let mut checks = Vec::new();
    let layout = StoreLayout::new(&root);

    // Version
    if let Err(e) = layout.verify_version() {
        checks.push(Check::fail(
            "store_version",
            &format!("Store version check failed: {e}"),
        ));
        return checks;
    }
    checks.push(Check::pass("store_version", "Store format version valid"));

    // Lock
    match StoreLock::try_acquire(&layout.lock_file()) {
        Ok(Some(_)) => checks.push(Check::pass("store_lock", "Store lock is free")),
        Ok(None) => checks.push(Check::warn(
            "store_lock",
            "Store lock is held by another process",
        )),
        Err(e) => checks.push(Check::fail(
            "store_lock",
            &format!("Cannot check store lock: {e}"),
        )),
    }

    let store = match EnvironmentStore::open(&root) {
        Ok(store) => store,
        Err(e) => {
            checks.push(Check::fail("store_open", &format!("Cannot open store: {e}")));
            return checks;
        }
    };

    // Rows
    match store.list_with_errors() {
        Ok(rows) => {
            let corrupt: Vec<&str> = rows
                .iter()
                .filter_map(|r| r.as_ref().err().map(|(name, _)| name.as_str()))
                .collect();
            let live = rows
                .iter()
                .filter(|r| matches!(r, Ok(env) if env.status.is_active()))
                .count();
            if corrupt.is_empty() {
                checks.push(Check::pass(
                    "store_integrity",
                    &format!("Store integrity OK ({} rows checked)", rows.len()),
                ));
            } else {
                checks.push(Check::fail(
                    "store_integrity",
                    &format!(
                        "{} of {} rows corrupted: {}",
                        corrupt.len(),
                        rows.len(),
                        corrupt.join(", ")
                    ),
                ));
            }
            checks.push(Check::info(
                "environments",
                &format!("{} environments ({live} live)", rows.len()),
            ));
        }
        Err(e) => checks.push(Check::fail(
            "store_integrity",
            &format!("Cannot list environments: {e}"),
        )),
    }

    // Ports
    match store.used_ports() {
        Ok(used) => {
            let range = config.ports;
            let in_range = used.iter().filter(|p| range.contains(**p)).count();
            let total = range.len();
            let message = format!("{in_range} of {total} host ports in use");
            if in_range == total {
                checks.push(Check::fail("port_range", &format!("Port range exhausted: {message}")));
            } else if in_range * 10 >= total * 9 {
                checks.push(Check::warn("port_range", &format!("Port range nearly full: {message}")));
            } else {
                checks.push(Check::pass("port_range", &message));
            }
        }
        Err(e) => checks.push(Check::fail(
            "port_range",
            &format!("Cannot compute used ports: {e}"),
        )),
    }

    checks
}

fn print_results(checks: &[Check], json_output: bool) -> Result<u8, Failure> {
    let all_pass = checks.iter().all(|c| c.status != "fail");
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks,
        });
        println!("{}", json_pretty(&json)?);
    } else {
        println!("Corral Doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

#[derive(Debug, Serialize)]
struct Check {
    name: String,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &str, status: &'static str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
