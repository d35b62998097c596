use std::{collections::BTreeSet, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use shipyard_deploy::{ForceRedeploy, NetworkName, SHIPYARD_FILENAME};
use tracing::level_filters::LevelFilter;

fn parse_network(value: &str) -> Result<NetworkName, String> {
    NetworkName::new(value).map_err(|e| e.to_string())
}

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(
    author,
    version,
    about = "Deploy and configure contracts idempotently, in dependency order"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "SHIPYARD_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file, or to a directory holding `Shipyard.toml`.
    #[arg(short, long, alias = "conf", env = "SHIPYARD_CONFIG", default_value = SHIPYARD_FILENAME, global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy missing contracts and run configuration steps.
    Deploy(DeployArgs),

    /// Print the deployments recorded for a network.
    List {
        /// Target network, as named in the configuration.
        #[arg(short, long, env = "SHIPYARD_NETWORK", value_parser = parse_network)]
        network: NetworkName,
    },

    /// Print recorded deployments that depend on an artifact and predate its current record.
    Stale {
        /// Target network, as named in the configuration.
        #[arg(short, long, env = "SHIPYARD_NETWORK", value_parser = parse_network)]
        network: NetworkName,

        /// Name of the (re)deployed artifact.
        #[arg(long, env = "SHIPYARD_ARTIFACT")]
        artifact: String,
    },

    /// Print the effective configuration (file merged with environment overrides).
    Config,
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Target network, as named in the configuration.
    #[arg(short, long, env = "SHIPYARD_NETWORK", value_parser = parse_network)]
    pub network: NetworkName,

    /// Only run steps providing these tags (and what they depend on).
    #[arg(short, long, env = "SHIPYARD_TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Only run these steps (and what they depend on).
    #[arg(short, long = "step", env = "SHIPYARD_STEP", value_delimiter = ',')]
    pub steps: Vec<String>,

    /// Redeploy these artifacts even if the ledger already records them.
    /// Dependents are not redeployed; see `shipyard stale`.
    #[arg(long, env = "SHIPYARD_REDEPLOY", value_delimiter = ',', conflicts_with = "redeploy_all")]
    pub redeploy: Vec<String>,

    /// Redeploy every planned artifact.
    #[arg(long, env = "SHIPYARD_REDEPLOY_ALL")]
    pub redeploy_all: bool,

    /// Print the execution plan and exit without contacting the network.
    #[arg(long, env = "SHIPYARD_DRY_RUN")]
    pub dry_run: bool,
}

impl DeployArgs {
    /// Step names and tags to run; empty means everything.
    pub fn selection(&self) -> Vec<String> {
        self.tags.iter().chain(&self.steps).cloned().collect()
    }

    pub fn force(&self) -> ForceRedeploy {
        if self.redeploy_all {
            ForceRedeploy::All
        } else if self.redeploy.is_empty() {
            ForceRedeploy::None
        } else {
            ForceRedeploy::Only(self.redeploy.iter().cloned().collect::<BTreeSet<_>>())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_args() {
        let cli = Cli::try_parse_from([
            "shipyard",
            "deploy",
            "--network",
            "sepolia",
            "--tags",
            "core,tokens",
            "--step",
            "PythOracle",
            "--redeploy",
            "Controller",
        ])
        .unwrap();

        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(args.network.as_str(), "sepolia");
        assert_eq!(args.selection(), vec!["core", "tokens", "PythOracle"]);
        assert!(args.force().applies_to("Controller"));
        assert!(!args.force().applies_to("PythOracle"));
    }

    #[test]
    fn test_redeploy_flags_conflict() {
        assert!(
            Cli::try_parse_from([
                "shipyard",
                "deploy",
                "-n",
                "local",
                "--redeploy",
                "A",
                "--redeploy-all",
            ])
            .is_err()
        );
    }

    #[test]
    fn test_invalid_network_name() {
        assert!(Cli::try_parse_from(["shipyard", "list", "--network", "../etc"]).is_err());
    }
}
