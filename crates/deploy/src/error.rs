//! Error taxonomy for the deployment workflow.

use alloy_core::primitives::Address;

use crate::proxy::ProxyState;

/// Result type used throughout the deployment library.
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

/// Errors raised by the deploy and upgrade workflow.
///
/// Verification failures abort the current step before anything is written to the ledger.
/// Nothing here is ever retried internally.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// No RPC endpoint or deployer identity is configured for the chain.
    #[error("no RPC endpoint or deployer configured for chain {chain_id}")]
    MissingChainConfiguration { chain_id: u64 },

    /// The configured chain id does not match what the endpoint reports.
    #[error("endpoint reports chain {actual}, expected chain {expected}")]
    ChainMismatch { expected: u64, actual: u64 },

    /// There is no bytecode at the given address.
    #[error("no contract code at {address}")]
    AddressNotAContract { address: Address },

    /// Library placeholders remain in the bytecode after linking.
    #[error("unlinked libraries remain in {contract}: {}", .placeholders.join(", "))]
    UnlinkedLibrary {
        contract: String,
        placeholders: Vec<String>,
    },

    /// A transaction reverted or was rejected by the node.
    #[error("transaction reverted: {}", .reason.as_deref().unwrap_or("no reason given"))]
    OnChainRevert {
        reason: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    /// The proxy does not point at the implementation the workflow intended.
    #[error("upgrade verification failed for proxy {proxy}: expected {expected}, got {actual}")]
    UpgradeVerification {
        proxy: Address,
        expected: Address,
        actual: Address,
    },

    /// A proxy that is neither in the ledger nor named by the caller.
    #[error("proxy {proxy} is not in the ledger, a contract name is needed to adopt it")]
    UnknownProxy { proxy: Address },

    /// A read-back value of a proxy slot failed its sanity checks.
    #[error("proxy {proxy} read-back failed: {detail}")]
    ProxyReadback { proxy: Address, detail: String },

    /// The ledger could not be written. The chain mutation it describes has already happened.
    #[error("failed to write deployment ledger for chain {chain_id}")]
    LedgerWrite {
        chain_id: u64,
        #[source]
        source: anyhow::Error,
    },

    /// The ledger could not be read.
    #[error("failed to read deployment ledger for chain {chain_id}")]
    LedgerRead {
        chain_id: u64,
        #[source]
        source: anyhow::Error,
    },

    /// A contract artifact or call encoding could not be produced.
    #[error("artifact error for {name}")]
    Artifact {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The proxy state machine was asked to take an edge it does not have.
    #[error("invalid proxy state transition {from} -> {to}")]
    InvalidTransition { from: ProxyState, to: ProxyState },

    /// RPC or HTTP failure that is not a revert.
    #[error("transport error: {0:#}")]
    Transport(#[source] anyhow::Error),
}

impl DeployError {
    /// Classify a failed submission: revert-looking errors become [`DeployError::OnChainRevert`]
    /// with a best-effort reason, everything else is a transport failure.
    pub fn from_submission(err: anyhow::Error) -> Self {
        let text = format!("{err:#}");
        if looks_like_revert(&text) {
            Self::OnChainRevert {
                reason: decode_revert_reason(&text),
                source: err,
            }
        } else {
            Self::Transport(err)
        }
    }
}

/// Selector of the standard `Error(string)` revert payload.
const ERROR_STRING_SELECTOR: &str = "08c379a0";

fn looks_like_revert(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("revert") || lower.contains(ERROR_STRING_SELECTOR)
}

/// Best-effort extraction of a revert reason from the text of a transport error.
///
/// Understands geth style (`execution reverted: reason`), hardhat/anvil style
/// (`reverted with reason string 'reason'`) and raw ABI-encoded `Error(string)` payloads.
pub fn decode_revert_reason(text: &str) -> Option<String> {
    if let Some(start) = text.find("reverted with reason string '") {
        let rest = &text[start + "reverted with reason string '".len()..];
        if let Some(end) = rest.find('\'') {
            return Some(rest[..end].to_string());
        }
    }

    if let Some(payload) = find_error_payload(text) {
        if let Some(reason) = alloy_core::sol_types::decode_revert_reason(&payload) {
            return Some(reason);
        }
    }

    if let Some(start) = text.find("execution reverted:") {
        let reason = text[start + "execution reverted:".len()..]
            .trim()
            .trim_end_matches(|c: char| c == '"' || c == '}' || c == ',');
        if !reason.is_empty() && !reason.starts_with("0x") {
            return Some(reason.to_string());
        }
    }

    None
}

/// Find a hex-encoded `Error(string)` payload anywhere in the text.
fn find_error_payload(text: &str) -> Option<Vec<u8>> {
    let needle = format!("0x{ERROR_STRING_SELECTOR}");
    let start = text.find(&needle)?;
    let hex_part: String = text[start + 2..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    hex::decode(hex_part).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_geth_style_reason() {
        let text = "RPC error: execution reverted: Ownable: caller is not the owner";
        assert_eq!(
            decode_revert_reason(text).as_deref(),
            Some("Ownable: caller is not the owner")
        );
    }

    #[test]
    fn test_decode_hardhat_style_reason() {
        let text = "RPC error: VM Exception while processing transaction: reverted with reason string 'Pausable: paused'";
        assert_eq!(decode_revert_reason(text).as_deref(), Some("Pausable: paused"));
    }

    #[test]
    fn test_decode_abi_encoded_reason() {
        // Error("nope")
        let text = "RPC error: execution reverted, data: 0x08c379a0\
            0000000000000000000000000000000000000000000000000000000000000020\
            0000000000000000000000000000000000000000000000000000000000000004\
            6e6f706500000000000000000000000000000000000000000000000000000000";
        assert_eq!(decode_revert_reason(text).as_deref(), Some("nope"));
    }

    #[test]
    fn test_decode_without_reason() {
        assert_eq!(decode_revert_reason("RPC error: execution reverted"), None);
        assert_eq!(decode_revert_reason("connection refused"), None);
    }

    #[test]
    fn test_submission_classification() {
        let revert = DeployError::from_submission(anyhow::anyhow!(
            "RPC error: execution reverted: unauthorized"
        ));
        match revert {
            DeployError::OnChainRevert { reason, .. } => {
                assert_eq!(reason.as_deref(), Some("unauthorized"))
            }
            other => panic!("expected revert, got {other:?}"),
        }

        let transport = DeployError::from_submission(anyhow::anyhow!("connection refused"));
        assert!(matches!(transport, DeployError::Transport(_)));
    }
}
