//! hubforge-deploy - Deploy and upgrade the ProjectHub contracts behind transparent proxies.
//!
//! This crate resolves link-libraries, links implementations, deploys and upgrades proxies
//! with on-chain read-back verification, and keeps an append-only ledger of every action per
//! chain.

pub mod abi;
pub use abi::{InitializerCall, proxy_constructor_args, upgrade_and_call_calldata};

mod artifacts;
pub use artifacts::{ArtifactStore, ContractArtifact, LinkReference, LinkReferences};

pub mod chain;
pub use chain::{ChainAccess, ChainEnvironment, Receipt, TransactionRequest};

mod config;
pub use config::{CONFIG_FILENAME, ENV_PREFIX, HubforgeConfig, NetworkConfig};

mod context;
pub use context::DeployContext;

pub mod error;
pub use error::{DeployError, decode_revert_reason};

mod implementation;
pub use implementation::{ImplementationDescriptor, ImplementationFactory, link};

mod ledger;
pub use ledger::{
    EntryKind, EntryType, FileLedger, LedgerEntry, LedgerRecord, LedgerStore, MemoryLedger,
    Provenance, UpgradePattern, Upgradeability,
};

mod library;
pub use library::{LibraryOrigin, LibraryRecord, LibraryResolver, LibrarySource};

mod provenance;
pub use provenance::{CommitSource, GitCommitSource, StaticCommit, UNKNOWN_COMMIT};

pub mod proxy;
pub use proxy::{PROXY_ARTIFACT, ProxyLifecycleManager, ProxyRecord, ProxyState, UpgradeTarget};

pub mod rpc;
pub use rpc::JsonRpcChain;

pub mod verify;
pub use verify::{ADMIN_SLOT, IMPLEMENTATION_SLOT, VerificationGate, normalize_address};

pub mod workflow;
pub use workflow::{UpgradeableDeployment, deploy_contract, deploy_upgradeable, upgrade_to_fresh};
