//! Append-only, per-chain deployment ledger.
//!
//! Every library, contract, proxy deployment and proxy upgrade is recorded as one
//! [`LedgerEntry`]. Entries are never edited or removed; [`LedgerStore::append`] is the only
//! write path.

use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use alloy_core::primitives::Address;
use anyhow::Context;
use chrono::{DateTime, Utc};
use derive_more::Deref;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DeployError, error::Result};

/// Persisted entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Library,
    Contract,
}

/// Upgrade pattern of a proxied contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradePattern {
    Transparent,
}

/// Proxy information attached to proxied contract entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upgradeability {
    pub pattern: UpgradePattern,
    pub proxy_address: Address,
    pub proxy_admin_address: Address,
    pub implementation_address: Address,
    /// Only present on upgrade entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_implementation_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer_args: Option<Value>,
}

/// What kind of action an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum EntryKind {
    Library,
    Contract,
    ProxyDeployment,
    ProxyUpgrade,
}

/// An entry as submitted to the ledger, before it is timestamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub address: Address,
    pub commit_hash: String,
    pub deployer: Address,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_libraries: Option<BTreeMap<String, Address>>,
    pub is_upgrade_safe: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgradeability: Option<Upgradeability>,
}

/// Fields shared by every record of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub commit_hash: String,
    pub deployer: Address,
}

impl LedgerRecord {
    /// A freshly deployed link-library.
    pub fn library(name: &str, address: Address, version: String, provenance: &Provenance) -> Self {
        Self {
            name: name.to_string(),
            entry_type: EntryType::Library,
            address,
            commit_hash: provenance.commit_hash.clone(),
            deployer: provenance.deployer,
            version,
            linked_libraries: None,
            is_upgrade_safe: true,
            upgradeability: None,
        }
    }

    /// A plain, non-upgradeable contract.
    pub fn contract(
        name: &str,
        address: Address,
        linked_libraries: BTreeMap<String, Address>,
        version: String,
        provenance: &Provenance,
    ) -> Self {
        Self {
            name: name.to_string(),
            entry_type: EntryType::Contract,
            address,
            commit_hash: provenance.commit_hash.clone(),
            deployer: provenance.deployer,
            version,
            linked_libraries: (!linked_libraries.is_empty()).then_some(linked_libraries),
            is_upgrade_safe: false,
            upgradeability: None,
        }
    }

    /// A proxied contract. The entry address is the implementation address.
    pub fn proxied(
        name: &str,
        linked_libraries: BTreeMap<String, Address>,
        upgradeability: Upgradeability,
        version: String,
        provenance: &Provenance,
    ) -> Self {
        Self {
            name: name.to_string(),
            entry_type: EntryType::Contract,
            address: upgradeability.implementation_address,
            commit_hash: provenance.commit_hash.clone(),
            deployer: provenance.deployer,
            version,
            linked_libraries: (!linked_libraries.is_empty()).then_some(linked_libraries),
            is_upgrade_safe: true,
            upgradeability: Some(upgradeability),
        }
    }

    /// The tagged-union view of this record.
    pub fn kind(&self) -> EntryKind {
        match (&self.entry_type, &self.upgradeability) {
            (EntryType::Library, _) => EntryKind::Library,
            (EntryType::Contract, None) => EntryKind::Contract,
            (EntryType::Contract, Some(up)) if up.previous_implementation_address.is_some() => {
                EntryKind::ProxyUpgrade
            }
            (EntryType::Contract, Some(_)) => EntryKind::ProxyDeployment,
        }
    }

    /// Whether this record concerns the given proxy.
    pub fn is_for_proxy(&self, proxy: Address) -> bool {
        self.upgradeability
            .as_ref()
            .is_some_and(|up| up.proxy_address == proxy)
    }
}

/// A stored ledger entry: the submitted record plus the time the ledger accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Deref)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    #[deref]
    #[serde(flatten)]
    pub record: LedgerRecord,
    pub deployment_time: DateTime<Utc>,
}

impl LedgerEntry {
    fn stamp(record: LedgerRecord) -> Self {
        Self {
            record,
            deployment_time: Utc::now(),
        }
    }
}

/// Storage behind the ledger. Implementations must only ever add entries.
pub trait LedgerStore: Send + Sync {
    /// Append one record, returning the stored entry.
    fn append(&self, chain_id: u64, record: LedgerRecord) -> Result<LedgerEntry>;

    /// All entries for a chain, in append order.
    fn all(&self, chain_id: u64) -> Result<Vec<LedgerEntry>>;

    /// The most recent entry with the given name.
    fn latest(&self, chain_id: u64, name: &str) -> Result<Option<LedgerEntry>> {
        Ok(self
            .all(chain_id)?
            .into_iter()
            .rev()
            .find(|entry| entry.name == name))
    }

    /// Entries recorded for a proxy, oldest first.
    fn proxy_history(&self, chain_id: u64, proxy: Address) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .all(chain_id)?
            .into_iter()
            .filter(|entry| entry.is_for_proxy(proxy))
            .collect())
    }

    /// `v<N>`, where N is one more than the number of entries already recorded under `name`.
    fn next_version(&self, chain_id: u64, name: &str) -> Result<String> {
        let count = self
            .all(chain_id)?
            .iter()
            .filter(|entry| entry.name == name)
            .count();
        Ok(format!("v{}", count + 1))
    }
}

/// In-process ledger, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    chains: Mutex<BTreeMap<u64, Vec<LedgerEntry>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedger {
    fn append(&self, chain_id: u64, record: LedgerRecord) -> Result<LedgerEntry> {
        let entry = LedgerEntry::stamp(record);
        self.chains
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(chain_id)
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    fn all(&self, chain_id: u64) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .chains
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chain_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// File-backed ledger: one pretty-printed JSON array per chain at `<dir>/<chainId>.json`.
///
/// Appends hold an exclusive lock on `<chainId>.json.lock` for the whole read-modify-write,
/// and replace the document through a temporary file so readers never see a partial write.
#[derive(Debug, Clone)]
pub struct FileLedger {
    dir: PathBuf,
}

impl FileLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the ledger document for a chain.
    pub fn document_path(&self, chain_id: u64) -> PathBuf {
        self.dir.join(format!("{}.json", chain_id))
    }

    fn lock_path(&self, chain_id: u64) -> PathBuf {
        self.dir.join(format!("{}.json.lock", chain_id))
    }

    fn read_document(path: &Path) -> anyhow::Result<Vec<LedgerEntry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ledger {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse ledger {}", path.display()))
    }

    fn write_document(path: &Path, entries: &[LedgerEntry]) -> anyhow::Result<()> {
        let json =
            serde_json::to_string_pretty(entries).context("Failed to serialize ledger entries")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace ledger {}", path.display()))?;
        Ok(())
    }

    fn lock(&self, chain_id: u64) -> anyhow::Result<File> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create ledger directory {}", self.dir.display()))?;
        let lock_path = self.lock_path(chain_id);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;
        lock.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", lock_path.display()))?;
        Ok(lock)
    }

    fn try_append(&self, chain_id: u64, record: LedgerRecord) -> anyhow::Result<LedgerEntry> {
        let lock = self.lock(chain_id)?;
        let path = self.document_path(chain_id);

        let mut entries = Self::read_document(&path)?;
        let entry = LedgerEntry::stamp(record);
        entries.push(entry.clone());
        Self::write_document(&path, &entries)?;

        lock.unlock().context("Failed to release ledger lock")?;
        Ok(entry)
    }
}

impl LedgerStore for FileLedger {
    fn append(&self, chain_id: u64, record: LedgerRecord) -> Result<LedgerEntry> {
        let name = record.name.clone();
        let entry = self
            .try_append(chain_id, record)
            .map_err(|source| DeployError::LedgerWrite { chain_id, source })?;

        tracing::info!(
            chain_id,
            name = %name,
            kind = %entry.kind(),
            address = %entry.address,
            path = %self.document_path(chain_id).display(),
            "Ledger entry appended"
        );
        Ok(entry)
    }

    fn all(&self, chain_id: u64) -> Result<Vec<LedgerEntry>> {
        Self::read_document(&self.document_path(chain_id))
            .map_err(|source| DeployError::LedgerRead { chain_id, source })
    }
}
