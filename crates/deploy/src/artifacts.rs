//! Compiled contract artifacts (Hardhat JSON layout).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DeployError, error::Result};

/// Byte range of one library placeholder in the creation bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReference {
    pub start: usize,
    pub length: usize,
}

/// `sourceName -> libraryName -> offsets`.
pub type LinkReferences = BTreeMap<String, BTreeMap<String, Vec<LinkReference>>>;

/// A compiled contract as emitted by Hardhat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
    pub contract_name: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub abi: Value,
    /// Creation bytecode as hex. Unlinked bytecode is not valid hex, so it stays a string.
    pub bytecode: String,
    #[serde(default)]
    pub link_references: LinkReferences,
}

impl ContractArtifact {
    /// Names of all libraries the bytecode references.
    pub fn library_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .link_references
            .values()
            .flat_map(|libs| libs.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Parse an artifact from its JSON text.
    pub fn from_json(name: &str, content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .with_context(|| format!("Failed to parse artifact JSON for {}", name))
            .map_err(|source| DeployError::Artifact {
                name: name.to_string(),
                source,
            })
    }
}

/// Loads artifacts by contract name from a directory tree.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the artifact for `contract_name`, searching the tree for `<contract_name>.json`.
    pub fn load(&self, contract_name: &str) -> Result<ContractArtifact> {
        let artifact_error = |source: anyhow::Error| DeployError::Artifact {
            name: contract_name.to_string(),
            source,
        };

        let file_name = format!("{}.json", contract_name);
        let path = find_file(&self.root, &file_name)
            .map_err(artifact_error)?
            .with_context(|| {
                format!(
                    "No artifact named {} under {}",
                    file_name,
                    self.root.display()
                )
            })
            .map_err(artifact_error)?;

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))
            .map_err(artifact_error)?;

        tracing::debug!(contract = %contract_name, path = %path.display(), "Artifact loaded");
        ContractArtifact::from_json(contract_name, &content)
    }
}

/// Depth-first search for a file name, skipping nothing but unreadable entries.
fn find_file(dir: &Path, file_name: &str) -> anyhow::Result<Option<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read artifacts directory {}", dir.display()))?;

    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if path.file_name().is_some_and(|name| name == file_name) {
            return Ok(Some(path));
        }
    }

    subdirs.sort();
    for subdir in subdirs {
        if let Some(found) = find_file(&subdir, file_name)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}
