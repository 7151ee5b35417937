//! JSON-RPC implementation of [`ChainAccess`].

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    ChainAccess, ChainEnvironment, DeployError, Receipt, TransactionRequest, error::Result,
};

/// Default timeout for a single RPC request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between receipt polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// Error responses are turned into an error whose text carries both the node's message
/// and its `data` field, so revert payloads survive for later decoding.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown");
        match error.get("data") {
            Some(data) if !data.is_null() => {
                let data = data.as_str().map(String::from).unwrap_or(data.to_string());
                anyhow::bail!("RPC error: {}, data: {}", message, data)
            }
            _ => anyhow::bail!("RPC error: {}", message),
        }
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Parse a `0x`-prefixed hex quantity.
fn parse_quantity(value: &str) -> Result<u64, anyhow::Error> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex quantity: {}", value))
}

/// Subset of `eth_getTransactionReceipt` the workflow needs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    block_number: Option<String>,
    contract_address: Option<Address>,
    status: Option<String>,
}

/// Marker error while a receipt is not yet available.
#[derive(Debug)]
enum Poll {
    Pending,
    Failed(anyhow::Error),
}

/// [`ChainAccess`] over an HTTP JSON-RPC endpoint.
///
/// Transactions are sent with `eth_sendTransaction`, so the deployer account must be
/// managed by the node (anvil, hardhat node, or a signing proxy in front of the chain).
#[derive(Debug, Clone)]
pub struct JsonRpcChain {
    client: reqwest::Client,
    url: String,
    poll_interval: Duration,
}

impl JsonRpcChain {
    /// Create a chain client for the given environment.
    pub fn new(env: &ChainEnvironment) -> Result<Self> {
        Ok(Self {
            client: create_client().map_err(DeployError::Transport)?,
            url: env.rpc_url.clone(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override the receipt polling interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        json_rpc_call(&self.client, &self.url, method, params)
            .await
            .map_err(DeployError::Transport)
    }

    async fn fetch_receipt(&self, tx_hash: B256) -> Result<Receipt, Poll> {
        let receipt: Option<RpcReceipt> = json_rpc_call(
            &self.client,
            &self.url,
            "eth_getTransactionReceipt",
            vec![serde_json::json!(tx_hash)],
        )
        .await
        .map_err(Poll::Failed)?;

        // Pending transactions have no receipt, or a receipt without a block yet.
        let receipt = receipt.ok_or(Poll::Pending)?;
        let block_number = receipt.block_number.as_deref().ok_or(Poll::Pending)?;

        Ok(Receipt {
            transaction_hash: receipt.transaction_hash,
            block_number: parse_quantity(block_number).map_err(Poll::Failed)?,
            contract_address: receipt.contract_address,
            success: receipt.status.as_deref() != Some("0x0"),
        })
    }
}

impl ChainAccess for JsonRpcChain {
    async fn get_code(&self, address: Address) -> Result<Bytes> {
        self.call(
            "eth_getCode",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    async fn get_storage_at(&self, address: Address, slot: B256) -> Result<B256> {
        self.call(
            "eth_getStorageAt",
            vec![
                serde_json::json!(address),
                serde_json::json!(slot),
                serde_json::json!("latest"),
            ],
        )
        .await
    }

    async fn send_transaction(&self, request: TransactionRequest) -> Result<B256> {
        let mut tx = serde_json::json!({
            "from": request.from,
            "data": request.data,
        });
        if let Some(to) = request.to {
            tx["to"] = serde_json::json!(to);
        }

        json_rpc_call(&self.client, &self.url, "eth_sendTransaction", vec![tx])
            .await
            .map_err(DeployError::from_submission)
    }

    async fn wait_for_inclusion(&self, tx_hash: B256) -> Result<Receipt> {
        let backoff = ConstantBuilder::default()
            .with_delay(self.poll_interval)
            .without_max_times();

        (|| self.fetch_receipt(tx_hash))
            .retry(backoff)
            .when(|e| matches!(e, Poll::Pending))
            .notify(|_, _| tracing::trace!(tx_hash = %tx_hash, "Receipt not available yet"))
            .await
            .map_err(|e| match e {
                Poll::Failed(err) => DeployError::Transport(err),
                Poll::Pending => DeployError::Transport(anyhow::anyhow!(
                    "transaction {} was never included",
                    tx_hash
                )),
            })
    }

    async fn get_block_number(&self) -> Result<u64> {
        let number: String = self.call("eth_blockNumber", vec![]).await?;
        parse_quantity(&number).map_err(DeployError::Transport)
    }

    async fn get_chain_id(&self) -> Result<u64> {
        let chain_id: String = self.call("eth_chainId", vec![]).await?;
        parse_quantity(&chain_id).map_err(DeployError::Transport)
    }
}
