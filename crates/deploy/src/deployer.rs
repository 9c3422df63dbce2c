use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::sync::watch;

use crate::{
    ArtifactResolver, Component, DeployError, DependencyGraph, DeploymentKind, DeploymentLedger,
    DeploymentPlan, DeploymentReport, FsArtifactResolver, JsonRpcNetwork, Network, NetworkConfig,
    Orchestrator, RunOptions, WiringEdge, WiringPhase,
};

/// The default name for the kiln configuration file.
pub const KILN_CONFIG_FILENAME: &str = "Kiln.toml";

/// Prefix of environment variables overriding the configuration file.
pub const ENV_PREFIX: &str = "KILN_";

/// Default proxy placed in front of proxied components.
pub const DEFAULT_PROXY_ARTIFACT: &str = "ERC1967Proxy";

/// Execution options of a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    /// Allow proxied components to link external libraries.
    #[serde(default)]
    pub unsafe_allow_linking: bool,
    /// Maximum number of independent components in flight together.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Retries of a submission after a transient network failure.
    #[serde(default = "default_submit_retries")]
    pub submit_retries: usize,
    /// First retry delay, in milliseconds.
    #[serde(default = "default_retry_min_delay_ms")]
    pub retry_min_delay_ms: u64,
    /// Upper bound on each confirmation wait, in seconds.
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
}

fn default_max_parallel() -> usize {
    1
}

fn default_submit_retries() -> usize {
    3
}

fn default_retry_min_delay_ms() -> u64 {
    1_000
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            unsafe_allow_linking: false,
            max_parallel: default_max_parallel(),
            submit_retries: default_submit_retries(),
            retry_min_delay_ms: default_retry_min_delay_ms(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
        }
    }
}

impl DeployOptions {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            confirmation_timeout: self.confirmation_timeout(),
            max_parallel: self.max_parallel,
            submit_retries: self.submit_retries,
            retry_min_delay: Duration::from_millis(self.retry_min_delay_ms),
        }
    }
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_ledger() -> PathBuf {
    PathBuf::from("deployments/ledger.jsonl")
}

fn default_proxy_artifact() -> String {
    DEFAULT_PROXY_ARTIFACT.to_string()
}

/// Main deployer: the components of a system, how they are wired, and where to deploy
/// them.
///
/// This struct contains all the configuration needed for a deployment and can be
/// serialized to/from TOML format. Relative paths are resolved against the directory of
/// the configuration file it was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployer {
    /// Node to deploy to.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Execution options.
    #[serde(default)]
    pub options: DeployOptions,
    /// Build output directory holding the contract artifacts.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// Ledger file recording deployment progress.
    #[serde(default = "default_ledger")]
    pub ledger: PathBuf,
    /// Artifact of the proxy placed in front of proxied components.
    #[serde(default = "default_proxy_artifact")]
    pub proxy_artifact: String,
    /// Components to deploy.
    #[serde(default)]
    pub components: Vec<Component>,
    /// Setter calls applied once every component is deployed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wiring: Vec<WiringEdge>,

    #[serde(skip)]
    root: PathBuf,
}

impl Default for Deployer {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            options: DeployOptions::default(),
            artifacts_dir: default_artifacts_dir(),
            ledger: default_ledger(),
            proxy_artifact: default_proxy_artifact(),
            components: Vec::new(),
            wiring: Vec::new(),
            root: PathBuf::new(),
        }
    }
}

impl Deployer {
    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize deployer config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, or from the `Kiln.toml` inside a
    /// directory, then apply `KILN_` environment overrides (`KILN_NETWORK__RPC_URL`).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file or directory not found: {}",
                path.display()
            ));
        }

        let config_path = if path.is_dir() {
            path.join(KILN_CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };
        if !config_path.is_file() {
            anyhow::bail!("Configuration file not found: {}", config_path.display());
        }

        let mut config: Self = Figment::new()
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context(format!("Failed to parse config from {}", config_path.display()))?;
        config.root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        tracing::info!(
            path = %config_path.display(),
            components = config.components.len(),
            wiring = config.wiring.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Resolve relative paths against `root` instead of the configuration directory.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn artifacts_path(&self) -> PathBuf {
        self.root.join(&self.artifacts_dir)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(&self.ledger)
    }

    pub fn artifact_resolver(&self) -> Result<FsArtifactResolver> {
        FsArtifactResolver::new(self.artifacts_path())
    }

    /// Validate the configuration and order its components. Makes no network call.
    pub fn plan<R: ArtifactResolver>(&self, resolver: &R) -> Result<DeploymentPlan, DeployError> {
        DependencyGraph::build(
            &self.components,
            &self.wiring,
            self.options.unsafe_allow_linking,
            resolver,
        )
    }

    /// Deploy a plan then apply its wiring, reporting the outcome.
    ///
    /// Step and wiring failures end up in the report; wiring is skipped when a step
    /// fails or the run is cancelled.
    pub async fn deploy_with<N: Network>(
        &self,
        network: &N,
        plan: &DeploymentPlan,
        ledger: &DeploymentLedger,
        cancel: Option<watch::Receiver<bool>>,
    ) -> DeploymentReport {
        let mut orchestrator = Orchestrator::new(network, self.options.run_options());
        if let Some(cancel) = cancel {
            orchestrator = orchestrator.with_cancellation(cancel);
        }

        if let Err(err) = orchestrator.run(plan, ledger).await {
            tracing::error!(error = %err, "Deployment halted");
            return DeploymentReport::new(plan, ledger).with_error(&err);
        }

        let wiring = WiringPhase::new(network, plan, self.options.confirmation_timeout());
        match wiring.apply(plan.wiring(), ledger).await {
            Ok(report) => DeploymentReport::new(plan, ledger).with_wiring(report),
            Err(err) => {
                tracing::error!(error = %err, "Wiring halted");
                DeploymentReport::new(plan, ledger).with_error(&err)
            }
        }
    }

    /// Run the full pipeline against the configured node and ledger file.
    ///
    /// Configuration errors are returned before any network call is made.
    pub async fn deploy(&self, cancel: Option<watch::Receiver<bool>>) -> Result<DeploymentReport> {
        tracing::info!("Starting deployment process...");

        let resolver = self
            .artifact_resolver()
            .context("Failed to index contract artifacts")?;
        let plan = self.plan(&resolver)?;
        tracing::info!(order = ?plan.order(), "Deployment plan built");

        let proxy = if plan.iter().any(|s| s.kind() == DeploymentKind::ProxiedUpgradeable) {
            Some(resolver.resolve(&self.proxy_artifact)?)
        } else {
            None
        };

        let ledger = DeploymentLedger::open(self.ledger_path())?;
        let network = JsonRpcNetwork::connect(&self.network, proxy)
            .await
            .context("Failed to connect to network")?
            .with_logic_timeout(self.options.confirmation_timeout());

        Ok(self.deploy_with(&network, &plan, &ledger, cancel).await)
    }

    /// Report the persisted state of every component without touching the network.
    pub fn status(&self) -> Result<DeploymentReport> {
        let resolver = self
            .artifact_resolver()
            .context("Failed to index contract artifacts")?;
        let plan = self.plan(&resolver)?;

        let ledger_path = self.ledger_path();
        let ledger = if ledger_path.exists() {
            DeploymentLedger::load(&ledger_path)?
        } else {
            tracing::info!(path = %ledger_path.display(), "No ledger yet, nothing deployed");
            DeploymentLedger::in_memory()
        };

        Ok(DeploymentReport::new(&plan, &ledger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArgSpec;
    use tempdir::TempDir;

    fn sample() -> Deployer {
        Deployer {
            components: vec![
                Component::new("Lib"),
                Component::new("Token").arg(ArgSpec::literal("1000000")),
                Component::new("Sale")
                    .proxied()
                    .link("Lib")
                    .arg(ArgSpec::address_of("Token")),
            ],
            wiring: vec![WiringEdge::new("Token", "Sale", "setTokenAddr")],
            ..Default::default()
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new("kiln-config").expect("Failed to create temp dir");
        let path = temp_dir.path().join(KILN_CONFIG_FILENAME);

        let deployer = sample();
        deployer.save_to_file(&path).unwrap();

        let loaded = Deployer::load_from_file(&path).unwrap();
        assert_eq!(loaded.components, deployer.components);
        assert_eq!(loaded.wiring, deployer.wiring);
        assert_eq!(loaded.options, deployer.options);
        assert_eq!(loaded.ledger_path(), temp_dir.path().join("deployments/ledger.jsonl"));
    }

    #[test]
    fn test_load_from_directory() {
        let temp_dir = TempDir::new("kiln-config").expect("Failed to create temp dir");
        std::fs::write(
            temp_dir.path().join(KILN_CONFIG_FILENAME),
            r#"
            artifacts_dir = "/abs/artifacts"

            [options]
            max_parallel = 4

            [[components]]
            name = "Token"
            "#,
        )
        .unwrap();

        let loaded = Deployer::load_from_file(temp_dir.path()).unwrap();
        assert_eq!(loaded.options.max_parallel, 4);
        assert_eq!(loaded.options.submit_retries, 3);
        assert_eq!(loaded.proxy_artifact, DEFAULT_PROXY_ARTIFACT);
        assert_eq!(loaded.artifacts_path(), PathBuf::from("/abs/artifacts"));
        assert_eq!(loaded.components, vec![Component::new("Token")]);
    }

    #[test]
    fn test_load_missing_config() {
        let temp_dir = TempDir::new("kiln-config").expect("Failed to create temp dir");
        assert!(Deployer::load_from_file(&temp_dir.path().join("nope.toml")).is_err());
        // A directory without Kiln.toml.
        assert!(Deployer::load_from_file(temp_dir.path()).is_err());
    }

    #[test]
    fn test_status_without_ledger() {
        let temp_dir = TempDir::new("kiln-config").expect("Failed to create temp dir");
        let artifacts = temp_dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();
        std::fs::write(
            artifacts.join("Token.json"),
            r#"{"contractName":"Token","abi":[],"bytecode":"0x6080"}"#,
        )
        .unwrap();

        let deployer = Deployer {
            components: vec![Component::new("Token")],
            ..Default::default()
        }
        .with_root(temp_dir.path());

        let report = deployer.status().unwrap();
        assert_eq!(report.components.len(), 1);
        assert_eq!(report.components[0].status, crate::StepStatus::Pending);
        assert!(!report.is_success());
    }
}
