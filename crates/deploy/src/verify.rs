//! Stateless verification checks shared by every workflow step.

use std::str::FromStr;

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Context;

use crate::{ChainAccess, ChainEnvironment, DeployError, HubforgeConfig, error::Result};

/// EIP-1967 implementation slot: `bytes32(uint256(keccak256("eip1967.proxy.implementation")) - 1)`.
pub const IMPLEMENTATION_SLOT: B256 =
    alloy_core::primitives::b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// EIP-1967 admin slot: `bytes32(uint256(keccak256("eip1967.proxy.admin")) - 1)`.
pub const ADMIN_SLOT: B256 =
    alloy_core::primitives::b256!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

/// Parse a textual address, accepting any letter case.
///
/// Every address that enters the workflow goes through here, so later comparisons are
/// plain byte equality.
pub fn normalize_address(raw: &str) -> Result<Address, anyhow::Error> {
    let trimmed = raw.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if hex_part.len() != 40 {
        anyhow::bail!(
            "Invalid address format: expected 0x-prefixed 40 hex chars, got '{}'",
            raw
        );
    }
    Address::from_str(hex_part).with_context(|| format!("Invalid address '{}'", raw))
}

/// Extract the address stored in the low 20 bytes of a storage word.
pub fn address_from_slot(word: B256) -> Address {
    Address::from_word(word)
}

/// The verification gate.
pub struct VerificationGate;

impl VerificationGate {
    /// Resolve the environment for `chain_id`, failing if the chain is not configured.
    pub fn preflight(config: &HubforgeConfig, chain_id: u64) -> Result<ChainEnvironment> {
        config.environment(chain_id)
    }

    /// Check that the endpoint really serves the configured chain.
    pub async fn chain_matches<C: ChainAccess>(chain: &C, env: &ChainEnvironment) -> Result<()> {
        let actual = chain.get_chain_id().await?;
        if actual != env.chain_id {
            return Err(DeployError::ChainMismatch {
                expected: env.chain_id,
                actual,
            });
        }
        Ok(())
    }

    /// Fail with [`DeployError::AddressNotAContract`] if there is no bytecode at `address`.
    pub async fn code_exists<C: ChainAccess>(chain: &C, address: Address) -> Result<Bytes> {
        let code = chain.get_code(address).await?;
        if code.is_empty() {
            tracing::warn!(address = %address, "No contract code found");
            return Err(DeployError::AddressNotAContract { address });
        }
        Ok(code)
    }

    /// Fail with [`DeployError::UpgradeVerification`] unless `after == expected`.
    ///
    /// `before` is only reported; re-pointing a proxy at its current implementation passes.
    pub fn address_changed(
        proxy: Address,
        before: Address,
        after: Address,
        expected: Address,
    ) -> Result<()> {
        if after != expected {
            tracing::error!(
                proxy = %proxy,
                before = %before,
                after = %after,
                expected = %expected,
                "Implementation read-back does not match the upgrade target"
            );
            return Err(DeployError::UpgradeVerification {
                proxy,
                expected,
                actual: after,
            });
        }
        if before == after {
            tracing::info!(proxy = %proxy, implementation = %after, "Proxy re-pointed at its current implementation");
        }
        Ok(())
    }

    /// Read the implementation address from the proxy's EIP-1967 slot.
    pub async fn implementation_of<C: ChainAccess>(chain: &C, proxy: Address) -> Result<Address> {
        let word = chain.get_storage_at(proxy, IMPLEMENTATION_SLOT).await?;
        Ok(address_from_slot(word))
    }

    /// Read the admin address from the proxy's EIP-1967 slot.
    pub async fn admin_of<C: ChainAccess>(chain: &C, proxy: Address) -> Result<Address> {
        let word = chain.get_storage_at(proxy, ADMIN_SLOT).await?;
        Ok(address_from_slot(word))
    }
}
