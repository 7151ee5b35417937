//! Link-library resolution: reuse a deployed library or deploy a fresh one.

use std::collections::BTreeMap;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{
    ChainAccess, DeployContext, LedgerRecord, LedgerStore, VerificationGate, chain::deploy_code,
    error::Result, implementation::link,
};

/// How a library address came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LibraryOrigin {
    Deployed,
    Reused,
}

/// A library resolved to an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRecord {
    pub name: String,
    pub address: Address,
    pub origin: LibraryOrigin,
}

/// Where a library should come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibrarySource {
    /// Attach to an existing deployment. Never sends a transaction.
    Reuse(Address),
    /// Reuse the address last recorded in the ledger, deploying if there is none.
    Latest,
    /// Always deploy a fresh instance.
    Deploy,
}

impl From<Option<Address>> for LibrarySource {
    fn from(existing: Option<Address>) -> Self {
        existing.map_or(LibrarySource::Deploy, LibrarySource::Reuse)
    }
}

/// Resolves link-libraries for a workflow run.
pub struct LibraryResolver<'a, C, L> {
    ctx: &'a DeployContext<C, L>,
}

impl<'a, C: ChainAccess, L: LedgerStore> LibraryResolver<'a, C, L> {
    pub fn new(ctx: &'a DeployContext<C, L>) -> Self {
        Self { ctx }
    }

    /// Reuse `existing` if given (after checking it holds code), otherwise deploy.
    pub async fn resolve_or_deploy(
        &self,
        name: &str,
        existing: Option<Address>,
    ) -> Result<LibraryRecord> {
        self.resolve(name, existing.into()).await
    }

    pub async fn resolve(&self, name: &str, source: LibrarySource) -> Result<LibraryRecord> {
        match source {
            LibrarySource::Reuse(address) => self.reuse(name, address).await,
            LibrarySource::Latest => {
                match self.ctx.ledger.latest(self.ctx.chain_id(), name)? {
                    Some(entry) => {
                        let address = entry.address;
                        if self.ctx.chain.get_code(address).await?.is_empty() {
                            tracing::warn!(
                                library = %name,
                                address = %address,
                                "Recorded library has no code on chain, deploying a fresh instance"
                            );
                            self.deploy(name).await
                        } else {
                            self.reuse(name, address).await
                        }
                    }
                    None => self.deploy(name).await,
                }
            }
            LibrarySource::Deploy => self.deploy(name).await,
        }
    }

    /// Resolve several libraries in order. Each resolution completes before the next starts.
    pub async fn resolve_all(
        &self,
        libraries: &[(String, LibrarySource)],
    ) -> Result<Vec<LibraryRecord>> {
        let mut records = Vec::with_capacity(libraries.len());
        for (name, source) in libraries {
            records.push(self.resolve(name, *source).await?);
        }
        Ok(records)
    }

    async fn reuse(&self, name: &str, address: Address) -> Result<LibraryRecord> {
        VerificationGate::code_exists(&self.ctx.chain, address).await?;
        tracing::info!(library = %name, address = %address, "Library retrieved from address");
        Ok(LibraryRecord {
            name: name.to_string(),
            address,
            origin: LibraryOrigin::Reused,
        })
    }

    async fn deploy(&self, name: &str) -> Result<LibraryRecord> {
        let artifact = self.ctx.artifacts.load(name)?;
        let descriptor = link(&artifact, &BTreeMap::new())?;
        let version = self.ctx.version_for(name, None)?;

        tracing::info!(library = %name, "Deploying library...");
        let address = deploy_code(&self.ctx.chain, self.ctx.env.deployer, descriptor.bytecode).await?;
        tracing::info!(library = %name, address = %address, "Library deployed");

        self.ctx.record(LedgerRecord::library(
            name,
            address,
            version,
            &self.ctx.provenance,
        ))?;

        Ok(LibraryRecord {
            name: name.to_string(),
            address,
            origin: LibraryOrigin::Deployed,
        })
    }
}
