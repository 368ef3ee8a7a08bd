//! Blueprint CLI library

pub mod commands;
pub mod config;
pub mod error;

use std::path::PathBuf;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

use config::{DEFAULT_BLUEPRINT_FILE, DEFAULT_LOG_LEVEL};

/// bctl - Kubernetes clusters and addons from a single Blueprint
#[derive(Parser, Debug)]
#[command(name = "bctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the Blueprint document
    #[arg(short = 'c', long = "config", global = true, default_value = DEFAULT_BLUEPRINT_FILE)]
    pub config: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(long = "log-level", global = true, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Kubeconfig to read and write instead of the resolved default
    #[arg(long = "kubeconfig", global = true)]
    pub kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a starter Blueprint
    Init(commands::init::InitArgs),
    /// Print version and build information
    Version(commands::version::VersionArgs),
    /// Create or refresh the cluster, install the operator and apply the Blueprint
    Apply(commands::apply::ApplyArgs),
    /// Upgrade the cluster distribution if needed and re-apply the Blueprint
    Update,
    /// Upgrade the Blueprint operator
    Upgrade(commands::upgrade::UpgradeArgs),
    /// Destroy the cluster
    Reset(commands::reset::ResetArgs),
    /// Dry-run install every chart addon marked for verification
    Verify,
    /// Show operator and addon status
    Status,
    /// Print the kube context of the cluster
    Kubeconfig,
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let command = match self.command {
            Commands::Init(args) => return commands::init::run(args).await,
            Commands::Version(args) => {
                commands::version::run(args);
                return Ok(());
            }
            command => command,
        };

        let ctx = commands::Context::load(&self.config, self.kubeconfig.as_deref())?;
        match command {
            Commands::Init(_) | Commands::Version(_) => Ok(()),
            Commands::Apply(args) => commands::apply::run(&ctx, args).await,
            Commands::Update => commands::update::run(&ctx).await,
            Commands::Upgrade(args) => commands::upgrade::run(&ctx, args).await,
            Commands::Reset(args) => commands::reset::run(&ctx, args).await,
            Commands::Verify => commands::verify::run(&ctx).await,
            Commands::Status => commands::status::run(&ctx).await,
            Commands::Kubeconfig => commands::kubeconfig::run(&ctx),
        }
    }
}
