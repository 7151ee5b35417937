//! Chain identity and the chain-access capability the workflow depends on.

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The chain a workflow run targets. Immutable for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEnvironment {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// JSON-RPC endpoint of the chain.
    pub rpc_url: String,
    /// Account every transaction of this run is sent from.
    pub deployer: Address,
}

/// A transaction to submit from the deployer account.
///
/// `to == None` creates a contract from `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
}

impl TransactionRequest {
    /// A contract creation transaction.
    pub fn create(from: Address, init_code: Bytes) -> Self {
        Self {
            from,
            to: None,
            data: init_code,
        }
    }

    /// A call to an existing contract.
    pub fn call(from: Address, to: Address, data: Bytes) -> Self {
        Self {
            from,
            to: Some(to),
            data,
        }
    }
}

/// What the chain reports once a transaction is included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    /// Address of the created contract, for creation transactions.
    pub contract_address: Option<Address>,
    /// `false` when the transaction was included but reverted.
    pub success: bool,
}

/// The chain surface the deployment core depends on.
///
/// Implementations surface reverts as [`crate::DeployError::OnChainRevert`] and every
/// other failure as [`crate::DeployError::Transport`].
pub trait ChainAccess: Send + Sync {
    /// Runtime bytecode at `address` (empty when there is no contract).
    fn get_code(&self, address: Address) -> impl Future<Output = Result<Bytes>> + Send;

    /// Raw value of a storage slot.
    fn get_storage_at(&self, address: Address, slot: B256)
    -> impl Future<Output = Result<B256>> + Send;

    /// Submit a transaction, returning its hash.
    fn send_transaction(
        &self,
        request: TransactionRequest,
    ) -> impl Future<Output = Result<B256>> + Send;

    /// Block until the transaction is included. No timeout is applied.
    fn wait_for_inclusion(&self, tx_hash: B256) -> impl Future<Output = Result<Receipt>> + Send;

    /// Current block height.
    fn get_block_number(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Chain id reported by the endpoint.
    fn get_chain_id(&self) -> impl Future<Output = Result<u64>> + Send;
}

/// Submit a transaction and wait for it, turning a reverted receipt into an error.
pub async fn submit_and_wait<C: ChainAccess>(
    chain: &C,
    request: TransactionRequest,
) -> Result<Receipt> {
    let tx_hash = chain.send_transaction(request).await?;
    tracing::debug!(tx_hash = %tx_hash, "Transaction submitted, waiting for inclusion...");

    let receipt = chain.wait_for_inclusion(tx_hash).await?;
    if !receipt.success {
        return Err(crate::DeployError::OnChainRevert {
            reason: None,
            source: anyhow::anyhow!(
                "transaction {} reverted in block {}",
                tx_hash,
                receipt.block_number
            ),
        });
    }

    tracing::debug!(
        tx_hash = %tx_hash,
        block_number = receipt.block_number,
        "Transaction included"
    );
    Ok(receipt)
}

/// Submit a creation transaction and return the address of the new contract.
pub async fn deploy_code<C: ChainAccess>(
    chain: &C,
    from: Address,
    init_code: Bytes,
) -> Result<Address> {
    let receipt = submit_and_wait(chain, TransactionRequest::create(from, init_code)).await?;
    receipt.contract_address.ok_or_else(|| {
        crate::DeployError::Transport(anyhow::anyhow!(
            "receipt for creation transaction {} has no contract address",
            receipt.transaction_hash
        ))
    })
}
