//! Implementation descriptors: a contract's bytecode with its link-libraries substituted.

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, Bytes};
use anyhow::Context;

use crate::{ArtifactStore, ContractArtifact, DeployError, LibraryRecord, error::Result};

/// A deployable contract with every library placeholder bound to an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplementationDescriptor {
    pub contract_name: String,
    pub libraries: BTreeMap<String, Address>,
    /// Fully linked creation bytecode.
    pub bytecode: Bytes,
}

/// Builds [`ImplementationDescriptor`]s from artifacts.
pub struct ImplementationFactory<'a> {
    artifacts: &'a ArtifactStore,
}

impl<'a> ImplementationFactory<'a> {
    pub fn new(artifacts: &'a ArtifactStore) -> Self {
        Self { artifacts }
    }

    /// Load `contract_name` and link it against `libraries`.
    ///
    /// Fails with [`DeployError::UnlinkedLibrary`] before anything is submitted if a
    /// placeholder would survive.
    pub fn build(
        &self,
        contract_name: &str,
        libraries: &[LibraryRecord],
    ) -> Result<ImplementationDescriptor> {
        let artifact = self.artifacts.load(contract_name)?;
        let addresses = libraries
            .iter()
            .map(|lib| (lib.name.clone(), lib.address))
            .collect();
        link(&artifact, &addresses)
    }
}

/// Substitute every referenced library with its address and check nothing is left unbound.
pub fn link(
    artifact: &ContractArtifact,
    libraries: &BTreeMap<String, Address>,
) -> Result<ImplementationDescriptor> {
    let name = &artifact.contract_name;
    if !artifact.bytecode.is_ascii() {
        return Err(DeployError::Artifact {
            name: name.clone(),
            source: anyhow::anyhow!("bytecode contains non-ASCII characters"),
        });
    }
    let mut code = artifact
        .bytecode
        .trim_start_matches("0x")
        .to_ascii_lowercase();

    let mut linked = BTreeMap::new();
    let mut missing = Vec::new();

    for (source, libs) in &artifact.link_references {
        for (lib_name, offsets) in libs {
            let Some(address) = libraries.get(lib_name) else {
                missing.push(format!("{}:{}", source, lib_name));
                continue;
            };
            let address_hex = hex::encode(address.as_slice());
            for offset in offsets {
                let start = offset.start * 2;
                let end = start + offset.length * 2;
                if offset.length != 20 || end > code.len() {
                    return Err(DeployError::Artifact {
                        name: name.clone(),
                        source: anyhow::anyhow!(
                            "link reference for {} at byte {} (length {}) is out of range",
                            lib_name,
                            offset.start,
                            offset.length
                        ),
                    });
                }
                code.replace_range(start..end, &address_hex);
            }
            linked.insert(lib_name.clone(), *address);
        }
    }

    missing.extend(find_placeholders(&code));
    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        tracing::error!(contract = %name, placeholders = ?missing, "Unlinked libraries in bytecode");
        return Err(DeployError::UnlinkedLibrary {
            contract: name.clone(),
            placeholders: missing,
        });
    }

    let bytecode = hex::decode(&code)
        .with_context(|| format!("Linked bytecode of {} is not valid hex", name))
        .map_err(|source| DeployError::Artifact {
            name: name.clone(),
            source,
        })?;

    tracing::debug!(contract = %name, libraries = ?linked, "Bytecode linked");
    Ok(ImplementationDescriptor {
        contract_name: name.clone(),
        libraries: linked,
        bytecode: bytecode.into(),
    })
}

/// Residual placeholders: `__$<34 hex>$__` (solc >= 0.5) or `__<name padded with _>__` (legacy).
///
/// Hex never contains `_`, so any run starting with one is reported, including a placeholder
/// cut short by the end of the bytecode. `code` must be ASCII.
fn find_placeholders(code: &str) -> Vec<String> {
    let mut found = Vec::new();
    let bytes = code.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' {
            let end = (i + 40).min(bytes.len());
            let run = &code[i..end];
            let name = run.trim_matches(|c| c == '_' || c == '$');
            found.push(if name.is_empty() { run } else { name }.to_string());
            i = end;
        } else {
            i += 1;
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use crate::artifacts::LinkReference;

    use super::*;

    const PLACEHOLDER_A: &str = "__$0123456789abcdef0123456789abcdef01$__";
    const PLACEHOLDER_B: &str = "__$fedcba9876543210fedcba9876543210fe$__";

    fn artifact() -> ContractArtifact {
        let bytecode = format!("0x6080{}6060{}00", PLACEHOLDER_A, PLACEHOLDER_B);
        let mut refs = BTreeMap::new();
        refs.insert(
            "src/libraries/ProjectLibrary.sol".to_string(),
            BTreeMap::from([(
                "ProjectLibrary".to_string(),
                vec![LinkReference {
                    start: 2,
                    length: 20,
                }],
            )]),
        );
        refs.insert(
            "src/libraries/LaunchpoolLibrary.sol".to_string(),
            BTreeMap::from([(
                "LaunchpoolLibrary".to_string(),
                vec![LinkReference {
                    start: 24,
                    length: 20,
                }],
            )]),
        );
        ContractArtifact {
            contract_name: "ProjectHubUpgradeable".to_string(),
            source_name: "src/ProjectHubUpgradeable.sol".to_string(),
            abi: serde_json::json!([]),
            bytecode,
            link_references: refs,
        }
    }

    #[test]
    fn test_link_all_libraries() {
        let project = Address::repeat_byte(0xaa);
        let launchpool = Address::repeat_byte(0xbb);
        let libs = BTreeMap::from([
            ("ProjectLibrary".to_string(), project),
            ("LaunchpoolLibrary".to_string(), launchpool),
        ]);

        let descriptor = link(&artifact(), &libs).unwrap();

        assert_eq!(descriptor.libraries, libs);
        assert_eq!(&descriptor.bytecode[..2], &[0x60, 0x80]);
        assert_eq!(&descriptor.bytecode[2..22], project.as_slice());
        assert_eq!(&descriptor.bytecode[22..24], &[0x60, 0x60]);
        assert_eq!(&descriptor.bytecode[24..44], launchpool.as_slice());
        assert_eq!(descriptor.bytecode.len(), 45);
    }

    #[test]
    fn test_link_missing_library_fails() {
        let libs = BTreeMap::from([("ProjectLibrary".to_string(), Address::repeat_byte(0xaa))]);

        match link(&artifact(), &libs) {
            Err(DeployError::UnlinkedLibrary {
                contract,
                placeholders,
            }) => {
                assert_eq!(contract, "ProjectHubUpgradeable");
                assert!(
                    placeholders
                        .iter()
                        .any(|p| p.contains("LaunchpoolLibrary"))
                );
            }
            other => panic!("expected unlinked library error, got {other:?}"),
        }
    }

    #[test]
    fn test_placeholder_without_link_reference_is_caught() {
        let mut artifact = artifact();
        artifact.link_references.clear();

        let err = link(&artifact, &BTreeMap::new()).unwrap_err();
        match err {
            DeployError::UnlinkedLibrary { placeholders, .. } => {
                assert_eq!(placeholders.len(), 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_find_legacy_placeholder() {
        let code = format!("6080{:_<40}00", "__ProjectLibrary");
        assert_eq!(find_placeholders(&code), vec!["ProjectLibrary".to_string()]);
    }

    #[test]
    fn test_truncated_placeholder_is_unlinked() {
        let mut artifact = artifact();
        artifact.link_references.clear();
        artifact.bytecode = "0x6080__$0123456789ab".to_string();

        match link(&artifact, &BTreeMap::new()) {
            Err(DeployError::UnlinkedLibrary { placeholders, .. }) => {
                assert_eq!(placeholders, vec!["0123456789ab".to_string()]);
            }
            other => panic!("expected unlinked library error, got {other:?}"),
        }
    }

    #[test]
    fn test_non_ascii_bytecode_is_rejected() {
        let mut artifact = artifact();
        artifact.bytecode = format!("0x60{}80", "\u{00e9}".repeat(30));

        assert!(matches!(
            link(&artifact, &BTreeMap::new()),
            Err(DeployError::Artifact { .. })
        ));
    }

    #[test]
    fn test_contract_without_libraries() {
        let artifact = ContractArtifact {
            contract_name: "MockERC20".to_string(),
            source_name: String::new(),
            abi: serde_json::json!([]),
            bytecode: "0x60806040".to_string(),
            link_references: BTreeMap::new(),
        };
        let descriptor = link(&artifact, &BTreeMap::new()).unwrap();
        assert!(descriptor.libraries.is_empty());
        assert_eq!(descriptor.bytecode.len(), 4);
    }
}
