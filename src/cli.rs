use crate::config::Config;
use crate::driver::{Behavior, Driver, SimHost, StepOutcome};
use crate::lowering::{lower, lir::Machine};
use crate::types::Node;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence - lower composed trees into resumable state machines", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Instruction budget per step (overrides config file and env vars)
    #[arg(long, global = true)]
    pub max_instructions: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Lower a program and print the instruction listing
    Lower {
        /// Program file (JSON)
        file: PathBuf,

        /// Print the machine as JSON instead of a listing
        #[arg(long)]
        json: bool,
    },

    /// Lower a program and run it against the simulation host
    Run {
        /// Program file (JSON)
        file: PathBuf,

        /// Delay before tasks without their own delay complete
        #[arg(long, default_value = "10")]
        complete_after_ms: u64,

        /// Cancel at the first suspension point
        #[arg(long)]
        cancel: bool,
    },
}

/// Program file: a composed tree plus the simulated behavior of each native function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub tree: Node,
    #[serde(default)]
    pub host: HashMap<String, Behavior>,
}

impl Program {
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&source)
            .with_context(|| format!("Failed to parse program {}", path.display()))
    }

    pub fn lower(&self) -> Result<Machine> {
        lower(&self.tree).context("Failed to lower program")
    }
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    // Already installed when embedded in another process
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load configuration before executing any command
    let config = Config::builder()
        .config_path(cli.config)
        .max_instructions_per_step(cli.max_instructions)
        .build()
        .context("Failed to load configuration")?;
    init_tracing(&config);

    match cli.command {
        Commands::Lower { file, json } => {
            let machine = Program::load(&file)?.lower()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&machine)?);
            } else {
                print!("{}", machine);
                println!("; fingerprint {}", machine.fingerprint());
            }
        }

        Commands::Run {
            file,
            complete_after_ms,
            cancel,
        } => {
            let mut program = Program::load(&file)?;
            for behavior in program.host.values_mut() {
                if let Behavior::Task { after_ms, .. } = behavior {
                    after_ms.get_or_insert(complete_after_ms);
                }
            }

            let machine = Arc::new(program.lower()?);
            let host = SimHost::from_behaviors(program.host);
            let mut driver = Driver::with_config(machine, Arc::new(host.clone()), config.driver);
            info!(driver = %driver.id(), "running {}", file.display());

            let outcome = match driver.step() {
                StepOutcome::Suspended { state } if cancel => {
                    driver.cancel(state);
                    driver.step()
                }
                StepOutcome::Suspended { .. } => driver.run().await,
                done => done,
            };

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            for (resource, record) in host.resources() {
                println!(
                    "resource {} from {}: released {} time(s)",
                    resource, record.acquired_by, record.releases
                );
            }
            if let StepOutcome::Faulted { fault } = outcome {
                anyhow::bail!("program faulted: {}", fault);
            }
        }
    }

    Ok(())
}
