//! tobs CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use clap::{Args, Parser, Subcommand};

use commands::CommandContext;
use config::TobsConfig;
use tobs_common::{DEFAULT_NAMESPACE, DEFAULT_RELEASE_NAME};

/// tobs - The Observability Stack for Kubernetes
#[derive(Parser, Debug)]
#[command(name = "tobs")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Helm release name
    #[arg(short = 'n', long = "name", env = "TOBS_NAME", global = true)]
    pub name: Option<String>,

    /// Namespace the release is installed in
    #[arg(long, env = "TOBS_NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Path to kubeconfig
    #[arg(long, global = true)]
    pub kubeconfig: Option<String>,
}

impl GlobalArgs {
    /// Merge flags over the config file over built-in defaults
    pub fn resolve(&self, config: &TobsConfig) -> CommandContext {
        CommandContext {
            release: self
                .name
                .clone()
                .or_else(|| config.release.clone())
                .unwrap_or_else(|| DEFAULT_RELEASE_NAME.to_string()),
            namespace: self
                .namespace
                .clone()
                .or_else(|| config.namespace.clone())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            kubeconfig: self.kubeconfig.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Forward TimescaleDB, Grafana, Prometheus, Promscale and PromLens to local ports
    PortForward(commands::port_forward::PortForwardArgs),

    /// Grafana admin credentials
    #[command(subcommand)]
    Grafana(commands::grafana::GrafanaCommand),

    /// TimescaleDB access and credentials
    #[command(subcommand)]
    Timescaledb(commands::timescaledb::TimescaledbCommand),

    /// Uninstall the release and clean up what Helm leaves behind
    Uninstall(commands::uninstall::UninstallArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let config = config::load_config()?;
        let ctx = self.global.resolve(&config);
        match self.command {
            Commands::PortForward(args) => {
                commands::port_forward::run(&ctx, &config.port_forward, args).await
            }
            Commands::Grafana(cmd) => commands::grafana::run(&ctx, cmd).await,
            Commands::Timescaledb(cmd) => commands::timescaledb::run(&ctx, cmd).await,
            Commands::Uninstall(args) => commands::uninstall::run(&ctx, args).await,
        }
    }
}
