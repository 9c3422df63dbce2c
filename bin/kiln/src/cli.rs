use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Default location of the configuration file.
const DEFAULT_CONFIG_PATH: &str = "Kiln.toml";

#[derive(Parser)]
#[command(name = "kiln")]
#[command(
    author,
    version,
    about = "Deploy contract systems in dependency order, resumably"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "KILN_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

/// Path to the configuration, shared by every subcommand that reads it.
#[derive(Debug, Clone, clap::Args)]
pub struct ConfigArgs {
    /// Path to a Kiln.toml file, or to a directory containing one.
    #[arg(short, long, alias = "conf", env = "KILN_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy every component, then apply the wiring.
    ///
    /// Components already confirmed in the ledger are skipped, and submissions left
    /// pending by an interrupted run are awaited instead of resent.
    Deploy {
        #[clap(flatten)]
        config: ConfigArgs,

        /// Override the ledger file location.
        #[arg(long, env = "KILN_LEDGER")]
        ledger: Option<PathBuf>,

        /// Maximum number of independent components in flight together.
        #[arg(long, env = "KILN_MAX_PARALLEL")]
        max_parallel: Option<usize>,

        /// Allow proxied components to link external libraries.
        #[arg(long, env = "KILN_UNSAFE_ALLOW_LINKING")]
        unsafe_allow_linking: bool,
    },

    /// Print the deployment order and wiring without touching the network.
    Plan {
        #[clap(flatten)]
        config: ConfigArgs,
    },

    /// Print the recorded state of every component.
    Status {
        #[clap(flatten)]
        config: ConfigArgs,

        /// Override the ledger file location.
        #[arg(long, env = "KILN_LEDGER")]
        ledger: Option<PathBuf>,
    },

    /// Write a sample configuration.
    Init {
        /// Where to write the configuration.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy() {
        let cli = Cli::try_parse_from([
            "kiln",
            "-v",
            "debug",
            "deploy",
            "--config",
            "project",
            "--max-parallel",
            "2",
            "--unsafe-allow-linking",
        ])
        .unwrap();

        assert_eq!(cli.verbosity, LevelFilter::DEBUG);
        match cli.command {
            Command::Deploy {
                config,
                max_parallel,
                unsafe_allow_linking,
                ledger,
            } => {
                assert_eq!(config.config, PathBuf::from("project"));
                assert_eq!(max_parallel, Some(2));
                assert!(unsafe_allow_linking);
                assert_eq!(ledger, None);
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
