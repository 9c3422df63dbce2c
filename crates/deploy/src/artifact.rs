//! Compiled contract artifacts and the resolvers that locate them.
//!
//! Both Hardhat (`bytecode` as a hex string, top-level `linkReferences`) and Foundry
//! (`bytecode.object`, `bytecode.linkReferences`) artifact layouts are understood.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::{json_abi::JsonAbi, primitives::Address};
use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::DeployError;

const ADDRESS_LEN: usize = 20;

/// Library link offsets, keyed by source file then library name.
pub type LinkReferences = BTreeMap<String, BTreeMap<String, Vec<LinkOffset>>>;

/// Position of a library address placeholder in the bytecode, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkOffset {
    pub start: usize,
    pub length: usize,
}

/// A deployable contract: ABI plus (possibly unlinked) creation bytecode.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub contract_name: String,
    pub abi: JsonAbi,
    bytecode: String,
    link_references: LinkReferences,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    #[serde(default)]
    contract_name: Option<String>,
    abi: JsonAbi,
    bytecode: RawBytecode,
    #[serde(default)]
    link_references: LinkReferences,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(String),
    Object {
        object: String,
        #[serde(default, rename = "linkReferences")]
        link_references: LinkReferences,
    },
}

impl Artifact {
    pub fn new(contract_name: impl Into<String>, abi: JsonAbi, bytecode: impl Into<String>) -> Self {
        Self {
            contract_name: contract_name.into(),
            abi,
            bytecode: bytecode.into(),
            link_references: LinkReferences::new(),
        }
    }

    pub fn with_link_references(mut self, link_references: LinkReferences) -> Self {
        self.link_references = link_references;
        self
    }

    /// Parse a Hardhat or Foundry artifact. `name` is used when the file carries no
    /// `contractName` (Foundry).
    pub fn from_json(name: &str, json: &str) -> Result<Self, DeployError> {
        let raw: RawArtifact =
            serde_json::from_str(json).map_err(|e| DeployError::InvalidArtifact {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let (bytecode, link_references) = match raw.bytecode {
            RawBytecode::Hex(hex) => (hex, raw.link_references),
            RawBytecode::Object {
                object,
                link_references,
            } => (object, link_references),
        };

        Ok(Self {
            contract_name: raw.contract_name.unwrap_or_else(|| name.to_string()),
            abi: raw.abi,
            bytecode,
            link_references,
        })
    }

    /// Raw creation bytecode, as found in the artifact.
    pub fn bytecode(&self) -> &str {
        &self.bytecode
    }

    /// Names of the libraries that must be linked before deployment.
    pub fn libraries(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .link_references
            .values()
            .flat_map(|libs| libs.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Substitute library addresses into the bytecode and decode it.
    pub fn link(&self, libraries: &BTreeMap<String, Address>) -> Result<Vec<u8>, DeployError> {
        let invalid = |reason: String| DeployError::InvalidArtifact {
            name: self.contract_name.clone(),
            reason,
        };

        let mut code = self.bytecode.trim_start_matches("0x").to_string();
        if code.is_empty() {
            return Err(invalid("artifact has no deployable bytecode".to_string()));
        }
        if !code.is_ascii() {
            return Err(invalid("bytecode is not hex".to_string()));
        }

        for libs in self.link_references.values() {
            for (library, offsets) in libs {
                let address =
                    libraries
                        .get(library)
                        .ok_or_else(|| DeployError::UnlinkedLibrary {
                            artifact: self.contract_name.clone(),
                            library: library.clone(),
                        })?;
                let address_hex = hex::encode(address.as_slice());

                for offset in offsets {
                    let (from, to) = (offset.start * 2, (offset.start + offset.length) * 2);
                    if offset.length != ADDRESS_LEN || to > code.len() {
                        return Err(invalid(format!(
                            "bad link reference for {library} at byte {}",
                            offset.start
                        )));
                    }
                    code.replace_range(from..to, &address_hex);
                }
            }
        }

        hex::decode(&code).map_err(|e| {
            if code.contains("__") {
                invalid("bytecode still contains unresolved library placeholders".to_string())
            } else {
                invalid(e.to_string())
            }
        })
    }
}

/// Resolves a contract name to its artifact.
pub trait ArtifactResolver {
    fn resolve(&self, name: &str) -> Result<Artifact, DeployError>;
}

/// In-memory artifacts, keyed by contract name.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSet {
    artifacts: BTreeMap<String, Artifact>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: Artifact) {
        self.artifacts
            .insert(artifact.contract_name.clone(), artifact);
    }

    pub fn with(mut self, artifact: Artifact) -> Self {
        self.insert(artifact);
        self
    }
}

impl ArtifactResolver for ArtifactSet {
    fn resolve(&self, name: &str) -> Result<Artifact, DeployError> {
        self.artifacts
            .get(name)
            .cloned()
            .ok_or_else(|| DeployError::ArtifactNotFound(name.to_string()))
    }
}

/// Resolves artifacts from a build output directory (`artifacts/` or `out/`).
#[derive(Debug, Clone)]
pub struct FsArtifactResolver {
    root: PathBuf,
    index: BTreeMap<String, PathBuf>,
}

impl FsArtifactResolver {
    /// Index every artifact JSON file under `root`.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            anyhow::bail!("Artifacts directory not found: {}", root.display());
        }

        let mut index = BTreeMap::new();
        Self::index_dir(&root, &mut index)?;

        tracing::debug!(
            root = %root.display(),
            artifacts = index.len(),
            "Indexed contract artifacts"
        );

        Ok(Self { root, index })
    }

    fn index_dir(dir: &Path, index: &mut BTreeMap<String, PathBuf>) -> anyhow::Result<()> {
        let mut entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to list directory {}", dir.display()))?;
        entries.sort_by_key(|entry| entry.path());

        for entry in entries {
            let path = entry.path();
            if path.is_dir() {
                // Hardhat keeps compiler inputs here; they are not artifacts.
                if path.file_name().is_some_and(|n| n == "build-info") {
                    continue;
                }
                Self::index_dir(&path, index)?;
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.ends_with(".json") || file_name.ends_with(".dbg.json") {
                continue;
            }
            let name = file_name.trim_end_matches(".json").to_string();

            if let Some(existing) = index.get(&name) {
                tracing::warn!(
                    contract = %name,
                    kept = %existing.display(),
                    ignored = %path.display(),
                    "Duplicate artifact name"
                );
                continue;
            }
            index.insert(name, path);
        }

        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactResolver for FsArtifactResolver {
    fn resolve(&self, name: &str) -> Result<Artifact, DeployError> {
        let path = self
            .index
            .get(name)
            .ok_or_else(|| DeployError::ArtifactNotFound(name.to_string()))?;

        let content = std::fs::read_to_string(path).map_err(|e| DeployError::InvalidArtifact {
            name: name.to_string(),
            reason: format!("failed to read {}: {e}", path.display()),
        })?;

        Artifact::from_json(name, &content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    const LIB_ADDRESS: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn hardhat_artifact_json() -> String {
        // 3 bytes of code, a 20-byte placeholder at offset 3, then 1 byte.
        let placeholder = format!("__${}$__", "a".repeat(34));
        serde_json::json!({
            "contractName": "Sale",
            "abi": [],
            "bytecode": format!("0x600160{placeholder}00"),
            "linkReferences": {
                "contracts/ArrayLibrary.sol": {
                    "ArrayLibrary": [{ "start": 3, "length": 20 }]
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_hardhat_artifact() {
        let artifact = Artifact::from_json("Sale", &hardhat_artifact_json()).unwrap();
        assert_eq!(artifact.contract_name, "Sale");
        assert_eq!(artifact.libraries(), vec!["ArrayLibrary"]);
    }

    #[test]
    fn test_parse_foundry_artifact() {
        let json = serde_json::json!({
            "abi": [],
            "bytecode": { "object": "0x6001", "linkReferences": {} }
        })
        .to_string();

        let artifact = Artifact::from_json("Token", &json).unwrap();
        assert_eq!(artifact.contract_name, "Token");
        assert!(artifact.libraries().is_empty());
        assert_eq!(artifact.link(&BTreeMap::new()).unwrap(), vec![0x60, 0x01]);
    }

    #[test]
    fn test_link_substitutes_library_address() {
        let artifact = Artifact::from_json("Sale", &hardhat_artifact_json()).unwrap();
        let address: Address = LIB_ADDRESS.parse().unwrap();
        let libraries = BTreeMap::from([("ArrayLibrary".to_string(), address)]);

        let code = artifact.link(&libraries).unwrap();

        assert_eq!(code.len(), 24);
        assert_eq!(&code[..3], &[0x60, 0x01, 0x60]);
        assert_eq!(&code[3..23], address.as_slice());
        assert_eq!(code[23], 0x00);
    }

    #[test]
    fn test_link_missing_library_fails() {
        let artifact = Artifact::from_json("Sale", &hardhat_artifact_json()).unwrap();
        let err = artifact.link(&BTreeMap::new()).unwrap_err();
        assert!(matches!(
            err,
            DeployError::UnlinkedLibrary { ref library, .. } if library == "ArrayLibrary"
        ));
    }

    #[test]
    fn test_link_empty_bytecode_fails() {
        let artifact = Artifact::new("IToken", JsonAbi::default(), "0x");
        assert!(matches!(
            artifact.link(&BTreeMap::new()),
            Err(DeployError::InvalidArtifact { .. })
        ));
    }

    #[test]
    fn test_fs_resolver_indexes_nested_artifacts() {
        let temp_dir = TempDir::new("kiln-artifacts").expect("Failed to create temp dir");
        let contract_dir = temp_dir.path().join("contracts/Sale.sol");
        std::fs::create_dir_all(&contract_dir).unwrap();
        std::fs::write(contract_dir.join("Sale.json"), hardhat_artifact_json()).unwrap();
        std::fs::write(contract_dir.join("Sale.dbg.json"), "{}").unwrap();

        let resolver = FsArtifactResolver::new(temp_dir.path()).unwrap();

        let artifact = resolver.resolve("Sale").unwrap();
        assert_eq!(artifact.contract_name, "Sale");
        assert!(matches!(
            resolver.resolve("Sale.dbg"),
            Err(DeployError::ArtifactNotFound(_))
        ));
        assert!(matches!(
            resolver.resolve("Token"),
            Err(DeployError::ArtifactNotFound(_))
        ));
    }

    #[test]
    fn test_fs_resolver_reports_corrupted_artifact() {
        let temp_dir = TempDir::new("kiln-artifacts").expect("Failed to create temp dir");
        std::fs::write(temp_dir.path().join("Token.json"), "{ invalid json }").unwrap();

        let resolver = FsArtifactResolver::new(temp_dir.path()).unwrap();
        assert!(matches!(
            resolver.resolve("Token"),
            Err(DeployError::InvalidArtifact { .. })
        ));
    }

    #[test]
    fn test_fs_resolver_missing_directory() {
        assert!(FsArtifactResolver::new("/nonexistent/kiln/artifacts").is_err());
    }
}
