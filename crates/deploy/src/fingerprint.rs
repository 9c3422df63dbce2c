use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Artifact, ArgSpec, Component, DeploymentKind};

/// Inputs that determine what a component's deployment puts on chain.
///
/// Two runs producing the same fingerprint for a component would deploy the same code
/// with the same arguments. A Confirmed ledger entry whose fingerprint no longer matches
/// was deployed from a different configuration or build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentFingerprint {
    /// Contract name of the artifact.
    pub artifact: String,
    /// Unlinked creation bytecode, as emitted by the compiler.
    pub bytecode: String,
    /// Deployment kind.
    pub kind: DeploymentKind,
    /// Library link dependencies, by component name.
    pub links: Vec<String>,
    /// Constructor or initializer arguments, unresolved.
    pub args: Vec<ArgSpec>,
    /// Initializer method, for proxied components only.
    pub initializer: Option<String>,
}

impl DeploymentFingerprint {
    pub fn new(component: &Component, artifact: &Artifact) -> Self {
        Self {
            artifact: artifact.contract_name.clone(),
            bytecode: artifact.bytecode().to_lowercase(),
            kind: component.kind,
            links: component.links.clone(),
            args: component.args.clone(),
            initializer: match component.kind {
                DeploymentKind::Direct => None,
                DeploymentKind::ProxiedUpgradeable => {
                    Some(component.initializer_name().to_string())
                }
            },
        }
    }

    /// Compute a SHA-256 hash of these inputs, hex-encoded.
    pub fn compute_hash(&self) -> String {
        let json = serde_json::to_string(self)
            .expect("DeploymentFingerprint serialization should never fail");

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::json_abi::JsonAbi;

    fn fingerprint() -> DeploymentFingerprint {
        let component = Component::new("Sale")
            .proxied()
            .link("Lib")
            .arg(ArgSpec::address_of("Token"));
        let artifact = Artifact::new("Sale", JsonAbi::default(), "0x6001");
        DeploymentFingerprint::new(&component, &artifact)
    }

    #[test]
    fn test_hash_determinism() {
        let hash1 = fingerprint().compute_hash();
        let hash2 = fingerprint().compute_hash();

        assert_eq!(hash1, hash2, "Hash should be deterministic");
        assert_eq!(hash1.len(), 64, "SHA-256 hash should be 64 hex characters");
    }

    #[test]
    fn test_hash_changes_with_bytecode() {
        let mut changed = fingerprint();
        changed.bytecode = "0x6002".to_string();

        assert_ne!(
            fingerprint().compute_hash(),
            changed.compute_hash(),
            "Hash should change when the bytecode changes"
        );
    }

    #[test]
    fn test_hash_changes_with_args() {
        let mut changed = fingerprint();
        changed.args.push(ArgSpec::literal("1"));

        assert_ne!(
            fingerprint().compute_hash(),
            changed.compute_hash(),
            "Hash should change when the arguments change"
        );
    }

    #[test]
    fn test_hash_changes_with_kind() {
        let mut changed = fingerprint();
        changed.kind = DeploymentKind::Direct;
        changed.initializer = None;

        assert_ne!(
            fingerprint().compute_hash(),
            changed.compute_hash(),
            "Hash should change when the deployment kind changes"
        );
    }

    #[test]
    fn test_bytecode_case_is_ignored() {
        let component = Component::new("Token");
        let lower = Artifact::new("Token", JsonAbi::default(), "0xabcd");
        let upper = Artifact::new("Token", JsonAbi::default(), "0xABCD");

        assert_eq!(
            DeploymentFingerprint::new(&component, &lower).compute_hash(),
            DeploymentFingerprint::new(&component, &upper).compute_hash(),
        );
    }
}
