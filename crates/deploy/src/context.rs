//! Everything one workflow run needs, passed explicitly to each component.

use crate::{
    ArtifactStore, ChainAccess, ChainEnvironment, CommitSource, LedgerRecord, LedgerStore,
    Provenance, error::Result,
};

/// Context of a single workflow run against one chain.
///
/// The environment is fixed for the run; targeting another chain means building another
/// context.
pub struct DeployContext<C, L> {
    pub env: ChainEnvironment,
    pub chain: C,
    pub ledger: L,
    pub artifacts: ArtifactStore,
    pub provenance: Provenance,
}

impl<C: ChainAccess, L: LedgerStore> DeployContext<C, L> {
    /// Build a context, resolving the commit hash once for the whole run.
    pub fn new(
        env: ChainEnvironment,
        chain: C,
        ledger: L,
        artifacts: ArtifactStore,
        commits: &dyn CommitSource,
    ) -> Self {
        let provenance = Provenance {
            commit_hash: commits.commit_or_sentinel(),
            deployer: env.deployer,
        };
        Self {
            env,
            chain,
            ledger,
            artifacts,
            provenance,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.env.chain_id
    }

    /// Version to record for `name`, unless the caller supplied one.
    pub fn version_for(&self, name: &str, explicit: Option<&str>) -> Result<String> {
        match explicit {
            Some(version) => Ok(version.to_string()),
            None => self.ledger.next_version(self.chain_id(), name),
        }
    }

    /// Append a record after its chain mutation has succeeded.
    ///
    /// A failure here is logged with the full record so the operator can reconcile by hand.
    pub fn record(&self, record: LedgerRecord) -> Result<()> {
        let summary = format!("{:?}", record);
        match self.ledger.append(self.chain_id(), record) {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!(
                    chain_id = self.chain_id(),
                    record = %summary,
                    error = %e,
                    "On-chain action succeeded but the ledger write failed, manual reconciliation required"
                );
                Err(e)
            }
        }
    }
}
