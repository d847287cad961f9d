mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Failure, EXIT_FAILURE};
use corral_core::Orchestrator;
use corral_schema::{default_config_path, CorralConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "corral",
    version,
    about = "Lifecycle and container orchestration for agent development sandboxes"
)]
struct Cli {
    /// Path to the Corral store directory.
    #[arg(
        long,
        env = "CORRAL_STORE",
        default_value = "~/.local/share/corral",
        global = true
    )]
    store: String,

    /// Path to the config file (default: ~/.config/corral/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create an environment for a project branch and start its container.
    Create {
        #[arg(long)]
        project: String,
        #[arg(long)]
        branch: String,
        /// Container image (defaults to runtime.default_image).
        #[arg(long)]
        image: Option<String>,
        /// Port mapping as name:container[:host][/proto]. Repeatable.
        #[arg(long = "port", value_name = "SPEC")]
        ports: Vec<String>,
    },
    /// Stop a running environment's container, keeping its ports.
    Pause {
        /// Environment ID (full or unique prefix).
        env_id: String,
    },
    /// Restart a paused environment.
    Resume {
        /// Environment ID (full or unique prefix).
        env_id: String,
    },
    /// Remove an environment's container and release its ports.
    Delete {
        /// Environment ID (full or unique prefix).
        env_id: String,
    },
    /// Run a command inside a running environment.
    Exec {
        /// Environment ID (full or unique prefix).
        env_id: String,
        /// Command and arguments to run.
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },
    /// Show one environment.
    Get {
        /// Environment ID (full or unique prefix).
        env_id: String,
    },
    /// List environments, newest first.
    List {
        /// Only environments of this project.
        #[arg(long)]
        project: Option<String>,
        /// Include destroyed environments.
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Report environments whose container no longer exists.
    Drift,
    /// Run diagnostic checks on the runtime, config, and store.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CORRAL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            eprintln!("error: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}

fn run(cli: Cli) -> Result<u8, Failure> {
    let json_output = cli.json;

    if let Commands::Completions { shell } = cli.command {
        return commands::completions::run::<Cli>(shell);
    }

    let store_path = expand_tilde(&cli.store);
    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(
        "store {} backend {} ports {}-{}",
        store_path.display(),
        config.runtime.backend,
        config.ports.low,
        config.ports.high
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Failure::new(EXIT_FAILURE, format!("failed to start async runtime: {e}")))?;

    if let Commands::Doctor = cli.command {
        return rt.block_on(commands::doctor::run(&store_path, config, json_output));
    }

    let needs_runtime = matches!(
        cli.command,
        Commands::Create { .. }
            | Commands::Pause { .. }
            | Commands::Resume { .. }
            | Commands::Delete { .. }
            | Commands::Exec { .. }
            | Commands::Drift
    );
    if needs_runtime && std::env::var("CORRAL_SKIP_PREREQS").as_deref() != Ok("1") {
        let missing =
            corral_runtime::check_runtime_prereqs(&config.runtime.backend, config.runtime.binary());
        if !missing.is_empty() {
            return Err(Failure::new(
                EXIT_FAILURE,
                corral_runtime::format_missing(&missing),
            ));
        }
    }

    let orch = Orchestrator::open(&store_path, config)?;

    rt.block_on(async move {
        match cli.command {
            Commands::Create {
                project,
                branch,
                image,
                ports,
            } => {
                commands::create::run(
                    &orch,
                    &project,
                    &branch,
                    image.as_deref(),
                    &ports,
                    json_output,
                )
                .await
            }
            Commands::Pause { env_id } => commands::pause::run(&orch, &env_id, json_output).await,
            Commands::Resume { env_id } => {
                commands::resume::run(&orch, &env_id, json_output).await
            }
            Commands::Delete { env_id } => {
                commands::delete::run(&orch, &env_id, json_output).await
            }
            Commands::Exec { env_id, command } => {
                commands::exec::run(&orch, &env_id, &command, json_output).await
            }
            Commands::Get { env_id } => commands::get::run(&orch, &env_id, json_output).await,
            Commands::List { project, all } => {
                commands::list::run(&orch, project.as_deref(), all, json_output).await
            }
            Commands::Drift => commands::drift::run(&orch, json_output).await,
            Commands::Doctor | Commands::Completions { .. } => Ok(commands::EXIT_SUCCESS),
        }
    })
}

fn load_config(explicit: Option<&Path>) -> Result<CorralConfig, Failure> {
    let loaded = match explicit {
        Some(path) => CorralConfig::load(path),
        None => match default_config_path() {
            Ok(path) => CorralConfig::load_or_default(&path),
            Err(_) => Ok(CorralConfig::default()),
        },
    };
    loaded.map_err(|e| Failure::new(EXIT_FAILURE, format!("config error: {e}")))
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
