// src/main.rs - print agent entry point
use clap::{Parser, Subcommand};
use spool_rs::agent::Agent;
use spool_rs::health::run_diagnostics;
use spool_rs::logging;
use spool_rs::printer::{Printer, SerialPrinter};
use spool_rs::telemetry::RemoteLogBuffer;
use spool_rs::transport::HttpTransport;
use spool_rs::update::helper::{self, HelperPlan, SysinfoProbe};
use spool_shared::{AgentConfig, ConfigManager};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Parser, Debug)]
#[command(name = "print-agent", version, about = "Fetches print jobs from the job server and prints them locally")]
struct Cli {
    /// Settings file; created with defaults when missing.
    #[arg(long, short, global = true, default_value = "spool-agent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent (default).
    Run,
    /// List printers the agent can use.
    Printers,
    /// Check server connectivity, credentials and printers.
    Diagnose,
    /// Print the agent version.
    Version,
    /// Swap in a downloaded update once the agent has exited.
    #[command(hide = true)]
    ApplyUpdate {
        #[arg(long)]
        wait_pid: u32,
        #[arg(long)]
        artifact: PathBuf,
        #[arg(long)]
        target: PathBuf,
        #[arg(long, default_value_t = 10)]
        retries: u32,
        #[arg(long, default_value_t = 2000)]
        retry_delay_ms: u64,
        #[arg(long, default_value_t = 300)]
        max_wait_secs: u64,
        /// Arguments the agent is relaunched with.
        #[arg(last = true)]
        relaunch_args: Vec<OsString>,
    },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_agent(&cli.config).await,
        Command::Printers => {
            let config = load_quiet(&cli.config);
            logging::init_console(&config.log_level);
            let printer = SerialPrinter::new(config.printers.clone(), config.default_printer.clone());
            let default = printer.default_printer();
            for name in printer.list_available() {
                let marker = if default.as_deref() == Some(name.as_str()) { "*" } else { " " };
                println!("{} {}", marker, name);
            }
            Ok(())
        }
        Command::Diagnose => {
            let config = load_quiet(&cli.config);
            logging::init_console("warn");
            let transport = HttpTransport::new(&config)?;
            let printer = SerialPrinter::new(config.printers.clone(), config.default_printer.clone());
            let report = run_diagnostics(&config, &transport, &printer).await;
            print!("{}", report);
            if !report.is_healthy() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Version => {
            println!("print-agent {}", spool_shared::AGENT_VERSION);
            Ok(())
        }
        Command::ApplyUpdate {
            wait_pid,
            artifact,
            target,
            retries,
            retry_delay_ms,
            max_wait_secs,
            relaunch_args,
        } => {
            let log_dir = artifact.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
            let _guard = logging::init_helper(&log_dir);
            let plan = HelperPlan {
                wait_pid,
                artifact,
                target,
                copy_retries: retries,
                retry_delay: Duration::from_millis(retry_delay_ms),
                poll_interval: Duration::from_secs(1),
                max_wait: Duration::from_secs(max_wait_secs),
                relaunch_args,
            };
            let mut probe = SysinfoProbe::default();
            helper::apply(&plan, &mut probe).await?;
            Ok(())
        }
    }
}

async fn run_agent(config_path: &Path) -> Result<(), BoxError> {
    // Logging needs the configured level, so settings load first and
    // problems are reported once the subscriber is up.
    let (manager, load_error) = match ConfigManager::load_or_create(config_path) {
        Ok(manager) => (manager, None),
        Err(e) => (ConfigManager::new(AgentConfig::default(), config_path), Some(e)),
    };
    let config = manager.get_config().clone();
    let log_buffer = RemoteLogBuffer::new();
    let _guard = logging::init(&config.log_level, config.log_dir.as_deref(), log_buffer.clone());

    tracing::info!("Using settings from {}", config_path.display());
    if let Some(e) = load_error {
        tracing::error!("Settings file unusable, running with defaults until it is fixed: {}", e);
    }

    let agent = Agent::new(manager, log_buffer)?;
    agent.run().await?;
    Ok(())
}

/// Settings for the one-shot commands; falls back to defaults.
fn load_quiet(path: &Path) -> AgentConfig {
    spool_shared::config::load_config(path).unwrap_or_else(|e| {
        eprintln!("using default settings ({}): {}", path.display(), e);
        AgentConfig::default()
    })
}
