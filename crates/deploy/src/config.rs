//! Configuration: where the ledger and artifacts live, and which chains can be targeted.

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{ChainEnvironment, DeployError, error::Result, verify::normalize_address};

/// The default name for the configuration file.
pub const CONFIG_FILENAME: &str = "Hubforge.toml";

/// Prefix of environment variables overriding the configuration file.
pub const ENV_PREFIX: &str = "HUBFORGE_";

/// Endpoint and identity for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployer: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubforgeConfig {
    /// Directory holding one ledger document per chain.
    pub ledger_dir: PathBuf,
    /// Directory searched for compiled contract artifacts.
    pub artifacts_dir: PathBuf,
    /// Repository used for commit provenance (current directory when unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_dir: Option<PathBuf>,
    /// Networks by name.
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl Default for HubforgeConfig {
    fn default() -> Self {
        Self {
            ledger_dir: PathBuf::from("deployments"),
            artifacts_dir: PathBuf::from("artifacts"),
            repo_dir: None,
            networks: BTreeMap::new(),
        }
    }
}

impl HubforgeConfig {
    /// Load defaults, then the TOML file if present, then `HUBFORGE_*` environment overrides.
    ///
    /// Nested keys use a double underscore, e.g. `HUBFORGE_NETWORKS__LOCALHOST__RPC_URL`.
    pub fn load(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let path = path
            .cloned()
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME));

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            networks = config.networks.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Name of the network configured for `chain_id`, if any.
    pub fn network_name(&self, chain_id: u64) -> Option<&str> {
        self.networks
            .iter()
            .find(|(_, network)| network.chain_id == chain_id)
            .map(|(name, _)| name.as_str())
    }

    /// Build the [`ChainEnvironment`] for `chain_id`.
    ///
    /// Fails with [`DeployError::MissingChainConfiguration`] when the chain is unknown, or when
    /// its endpoint or deployer is missing or unusable.
    pub fn environment(&self, chain_id: u64) -> Result<ChainEnvironment> {
        let missing = || DeployError::MissingChainConfiguration { chain_id };

        let network = self
            .networks
            .values()
            .find(|network| network.chain_id == chain_id)
            .ok_or_else(missing)?;

        let rpc_url = network
            .rpc_url
            .as_deref()
            .filter(|url| url::Url::parse(url).is_ok())
            .ok_or_else(missing)?;

        let deployer = network
            .deployer
            .as_deref()
            .and_then(|raw| normalize_address(raw).ok())
            .ok_or_else(missing)?;

        Ok(ChainEnvironment {
            chain_id,
            rpc_url: rpc_url.to_string(),
            deployer,
        })
    }
}
