//! Shared test infrastructure: an in-memory EVM double and Hardhat-style artifact fixtures.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{Mutex, PoisonError},
};

use alloy_core::{
    primitives::{Address, B256, Bytes, address, keccak256},
    sol_types::{SolCall, SolValue},
};
use anyhow::Result;
use hubforge_deploy::{
    ADMIN_SLOT, ArtifactStore, ChainAccess, ChainEnvironment, DeployContext, DeployError,
    IMPLEMENTATION_SLOT, InitializerCall, LedgerStore, MemoryLedger, PROXY_ARTIFACT, Receipt,
    StaticCommit, TransactionRequest, abi::upgradeAndCallCall,
};
use serde_json::json;
use tempdir::TempDir;

pub const CHAIN_ID: u64 = 1287;
pub const DEPLOYER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
pub const STRANGER: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");
pub const ORACLE: &str = "0x288154C87Db809bc0d702CB46De40E5041b22071";
pub const VASSET_A: &str = "0xAAAaaAAAaaaAAAAAaaAAAAaaAaaAAAAAaaAAaAaa";
pub const VASSET_B: &str = "0xbBBBbbbBbBbBbBbbBBbbBBbBBBbbbbBbBbBbbBBB";
pub const NATIVE_A: &str = "0xD02D73E05b002Cb8EB7BEf9DF8Ed68ed39752465";
pub const NATIVE_B: &str = "0x7a4ebae8cA815b9F52F23a8AC9A2f707D4d4ff81";

pub const HUB: &str = "ProjectHubUpgradeable";
pub const PROJECT_LIBRARY: &str = "ProjectLibrary";
pub const LAUNCHPOOL_LIBRARY: &str = "LaunchpoolLibrary";
pub const MOCK_ERC20: &str = "MockERC20";

/// Creation code of the proxy fixture. The double recognises proxy creations by this prefix.
const PROXY_CODE: &str = "60806040deadbeef";
/// Runtime code installed for the admin contract a proxy creates.
const ADMIN_RUNTIME: &str = "60806040adadadad";

const PROJECT_LIBRARY_PLACEHOLDER: &str = "__$1f5a2bd9a3c7e6b1c0d4e8f2a6b9c3d7e1$__";
const LAUNCHPOOL_LIBRARY_PLACEHOLDER: &str = "__$9e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b3a$__";

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A proxy created by the double, with what its constructor saw.
#[derive(Debug, Clone)]
pub struct ProxyCreation {
    pub proxy: Address,
    pub admin: Address,
    pub owner: Address,
    pub init_data: Bytes,
}

#[derive(Debug, Default)]
struct MockState {
    code: HashMap<Address, Bytes>,
    storage: HashMap<(Address, B256), B256>,
    nonces: HashMap<Address, u64>,
    receipts: HashMap<B256, Receipt>,
    admin_owners: HashMap<Address, Address>,
    proxies: Vec<ProxyCreation>,
    sent: Vec<TransactionRequest>,
    block_number: u64,
    revert_next: Option<String>,
    fail_next: bool,
    ignore_upgrades: bool,
}

/// In-memory chain: contract creation, EIP-1967 proxies and `ProxyAdmin.upgradeAndCall`.
#[derive(Debug)]
pub struct MockChain {
    chain_id: u64,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install runtime code at an address, as if deployed earlier.
    pub fn install_code(&self, address: Address, code: &[u8]) {
        self.state().code.insert(address, Bytes::copy_from_slice(code));
    }

    /// Reject the next transaction with the given revert reason.
    pub fn revert_next(&self, reason: &str) {
        self.state().revert_next = Some(reason.to_string());
    }

    /// Include the next transaction with a failed receipt and no effect, as a node does for
    /// an out-of-gas execution.
    pub fn fail_next(&self) {
        self.state().fail_next = true;
    }

    /// Accept upgrade calls without touching the implementation slot.
    pub fn ignore_upgrades(&self, ignore: bool) {
        self.state().ignore_upgrades = ignore;
    }

    /// Number of transactions sent so far, successful or not.
    pub fn sent_count(&self) -> usize {
        self.state().sent.len()
    }

    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.state().sent.clone()
    }

    pub fn proxies(&self) -> Vec<ProxyCreation> {
        self.state().proxies.clone()
    }

    pub fn implementation_slot(&self, proxy: Address) -> Address {
        let state = self.state();
        let word = state
            .storage
            .get(&(proxy, IMPLEMENTATION_SLOT))
            .copied()
            .unwrap_or_default();
        Address::from_word(word)
    }

    fn execute(state: &mut MockState, request: &TransactionRequest) -> Result<Option<Address>, String> {
        match request.to {
            None => Ok(Some(Self::create(state, request))),
            Some(to) => {
                Self::call(state, request.from, to, &request.data)?;
                Ok(None)
            }
        }
    }

    fn create(state: &mut MockState, request: &TransactionRequest) -> Address {
        let nonce = state.nonces.get(&request.from).copied().unwrap_or_default();
        let address = request.from.create(nonce);

        let proxy_prefix = hex::decode(PROXY_CODE).unwrap_or_default();
        if let Some(args) = request.data.strip_prefix(proxy_prefix.as_slice()) {
            let (logic, owner, init_data) =
                <(Address, Address, Bytes)>::abi_decode_params(args, true)
                    .expect("proxy constructor arguments");

            // OpenZeppelin v5: the proxy deploys its ProxyAdmin as its first creation.
            let admin = address.create(1);
            state
                .code
                .insert(admin, Bytes::from(hex::decode(ADMIN_RUNTIME).unwrap_or_default()));
            state.admin_owners.insert(admin, owner);
            state
                .storage
                .insert((address, IMPLEMENTATION_SLOT), logic.into_word());
            state.storage.insert((address, ADMIN_SLOT), admin.into_word());
            state.proxies.push(ProxyCreation {
                proxy: address,
                admin,
                owner,
                init_data,
            });
        }

        state.code.insert(address, request.data.clone());
        address
    }

    fn call(state: &mut MockState, from: Address, to: Address, data: &[u8]) -> Result<(), String> {
        let Some(owner) = state.admin_owners.get(&to).copied() else {
            return Ok(());
        };
        let call = upgradeAndCallCall::abi_decode(data, true)
            .map_err(|e| format!("unknown admin call: {}", e))?;
        if from != owner {
            return Err(format!("OwnableUnauthorizedAccount({})", from));
        }
        if !state
            .code
            .get(&call.implementation)
            .is_some_and(|code| !code.is_empty())
        {
            return Err(format!("ERC1967InvalidImplementation({})", call.implementation));
        }
        if !state.ignore_upgrades {
            state.storage.insert(
                (call.proxy, IMPLEMENTATION_SLOT),
                call.implementation.into_word(),
            );
        }
        Ok(())
    }
}

impl ChainAccess for MockChain {
    async fn get_code(&self, address: Address) -> hubforge_deploy::error::Result<Bytes> {
        Ok(self.state().code.get(&address).cloned().unwrap_or_default())
    }

    async fn get_storage_at(
        &self,
        address: Address,
        slot: B256,
    ) -> hubforge_deploy::error::Result<B256> {
        Ok(self
            .state()
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or_default())
    }

    async fn send_transaction(
        &self,
        request: TransactionRequest,
    ) -> hubforge_deploy::error::Result<B256> {
        let mut state = self.state();
        state.sent.push(request.clone());

        if let Some(reason) = state.revert_next.take() {
            return Err(DeployError::from_submission(anyhow::anyhow!(
                "RPC error: execution reverted: {}",
                reason
            )));
        }
        let success = !std::mem::take(&mut state.fail_next);
        let contract_address = if success {
            match Self::execute(&mut state, &request) {
                Ok(address) => address,
                Err(reason) => {
                    return Err(DeployError::from_submission(anyhow::anyhow!(
                        "RPC error: execution reverted: {}",
                        reason
                    )));
                }
            }
        } else {
            None
        };

        *state.nonces.entry(request.from).or_default() += 1;
        state.block_number += 1;
        let transaction_hash = keccak256((state.sent.len() as u64).to_be_bytes());
        let receipt = Receipt {
            transaction_hash,
            block_number: state.block_number,
            contract_address,
            success,
        };
        state.receipts.insert(transaction_hash, receipt);
        Ok(transaction_hash)
    }

    async fn wait_for_inclusion(&self, tx_hash: B256) -> hubforge_deploy::error::Result<Receipt> {
        self.state().receipts.get(&tx_hash).cloned().ok_or_else(|| {
            DeployError::Transport(anyhow::anyhow!("unknown transaction {}", tx_hash))
        })
    }

    async fn get_block_number(&self) -> hubforge_deploy::error::Result<u64> {
        Ok(self.state().block_number)
    }

    async fn get_chain_id(&self) -> hubforge_deploy::error::Result<u64> {
        Ok(self.chain_id)
    }
}

fn write_artifact(root: &Path, source: &str, name: &str, bytecode: String, links: serde_json::Value) -> Result<()> {
    let dir = root.join(source);
    std::fs::create_dir_all(&dir)?;
    let artifact = json!({
        "_format": "hh-sol-artifact-1",
        "contractName": name,
        "sourceName": format!("contracts/{}", source.trim_start_matches("contracts/")),
        "abi": [],
        "bytecode": bytecode,
        "deployedBytecode": "0x",
        "linkReferences": links,
        "deployedLinkReferences": {}
    });
    std::fs::write(dir.join(format!("{}.json", name)), serde_json::to_string_pretty(&artifact)?)?;
    Ok(())
}

/// Write the artifact fixtures the workflow tests deploy.
pub fn write_fixtures(root: &Path) -> Result<()> {
    write_artifact(
        root,
        "contracts/libraries/ProjectLibrary.sol",
        PROJECT_LIBRARY,
        "0x60016001".to_string(),
        json!({}),
    )?;
    write_artifact(
        root,
        "contracts/libraries/LaunchpoolLibrary.sol",
        LAUNCHPOOL_LIBRARY,
        "0x60026002".to_string(),
        json!({}),
    )?;
    write_artifact(
        root,
        "contracts/ProjectHubUpgradeable.sol",
        HUB,
        format!(
            "0x6080{}6060{}00",
            PROJECT_LIBRARY_PLACEHOLDER, LAUNCHPOOL_LIBRARY_PLACEHOLDER
        ),
        json!({
            "contracts/libraries/ProjectLibrary.sol": {
                PROJECT_LIBRARY: [{ "start": 2, "length": 20 }]
            },
            "contracts/libraries/LaunchpoolLibrary.sol": {
                LAUNCHPOOL_LIBRARY: [{ "start": 24, "length": 20 }]
            }
        }),
    )?;
    write_artifact(
        root,
        "@openzeppelin/contracts/proxy/transparent/TransparentUpgradeableProxy.sol",
        PROXY_ARTIFACT,
        format!("0x{}", PROXY_CODE),
        json!({}),
    )?;
    write_artifact(
        root,
        "contracts/mocks/MockERC20.sol",
        MOCK_ERC20,
        "0x60036003".to_string(),
        json!({}),
    )?;
    Ok(())
}

/// The hub initializer with two vAssets and their native counterparts.
pub fn hub_initializer() -> InitializerCall {
    InitializerCall::new(
        "initialize(address xcmOracle, address owner, address[] vAssets, address[] nativeAssets)",
        [
            ORACLE.to_string(),
            DEPLOYER.to_string(),
            format!("[{},{}]", VASSET_A, VASSET_B),
            format!("[{},{}]", NATIVE_A, NATIVE_B),
        ],
    )
}

/// A workflow context over the in-memory chain, with its fixture directory kept alive.
pub struct Harness<L = MemoryLedger> {
    pub ctx: DeployContext<MockChain, L>,
    _artifacts: TempDir,
}

impl Harness<MemoryLedger> {
    pub fn new() -> Result<Self> {
        Self::with_ledger(MemoryLedger::new())
    }
}

impl<L: LedgerStore> Harness<L> {
    pub fn with_ledger(ledger: L) -> Result<Self> {
        init_test_tracing();
        let artifacts = TempDir::new("hubforge-artifacts")?;
        write_fixtures(artifacts.path())?;

        let env = ChainEnvironment {
            chain_id: CHAIN_ID,
            rpc_url: "http://localhost:8545".to_string(),
            deployer: DEPLOYER,
        };
        let ctx = DeployContext::new(
            env,
            MockChain::new(CHAIN_ID),
            ledger,
            ArtifactStore::new(artifacts.path()),
            &StaticCommit(Some("4f1c2a9e".to_string())),
        );
        Ok(Self {
            ctx,
            _artifacts: artifacts,
        })
    }

    pub fn chain(&self) -> &MockChain {
        &self.ctx.chain
    }

    pub fn ledger_len(&self) -> usize {
        self.ctx.ledger.all(CHAIN_ID).map(|all| all.len()).unwrap_or_default()
    }
}

/// Libraries pinned to fixed addresses, keyed by name.
pub fn library_addresses(pairs: &[(&str, Address)]) -> BTreeMap<String, Address> {
    pairs
        .iter()
        .map(|(name, address)| (name.to_string(), *address))
        .collect()
}
