//! kiln-deploy - Dependency-ordered deployment of contract systems.
//!
//! This crate turns a static description of components (contracts, libraries and
//! upgradeable proxies) into an ordered plan, deploys it against a JSON-RPC node while
//! recording every transition in a durable ledger, and finally applies the setter calls
//! that wire the components together.

mod artifact;
pub use artifact::{Artifact, ArtifactResolver, ArtifactSet, FsArtifactResolver, LinkOffset, LinkReferences};

mod component;
pub use component::{ArgSpec, Component, DEFAULT_INITIALIZER, DeploymentKind, WiringEdge};

mod deployer;
pub use deployer::{
    DEFAULT_PROXY_ARTIFACT, DeployOptions, Deployer, ENV_PREFIX, KILN_CONFIG_FILENAME,
};

mod error;
pub use error::DeployError;

mod fingerprint;
pub use fingerprint::DeploymentFingerprint;

mod graph;
pub use graph::{DependencyGraph, DeploymentPlan, DeploymentStep};

mod ledger;
pub use ledger::{Begin, DeploymentLedger, LedgerRecord, StepStatus};

pub mod network;
pub use network::{
    CallRequest, Confirmation, DeploymentRequest, JsonRpcNetwork, Network, NetworkConfig,
    PendingHandle, Transient,
};

mod orchestrator;
pub use orchestrator::{Orchestrator, RunOptions};

mod report;
pub use report::{ComponentReport, DeploymentReport};

mod wiring;
pub use wiring::{WiringPhase, WiringReport, WiringResult, WiringStatus};
