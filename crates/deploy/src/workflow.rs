//! End-to-end workflows built from the individual components.
//!
//! Each workflow runs strictly in sequence: libraries are resolved before anything is linked,
//! and every transaction is included before the next one is sent.

use alloy_core::primitives::{Address, Bytes};

use crate::{
    ChainAccess, DeployContext, DeployError, ImplementationFactory, InitializerCall,
    LedgerRecord, LedgerStore, LibraryRecord, LibraryResolver, LibrarySource,
    ProxyLifecycleManager, ProxyRecord, UpgradeTarget, chain::deploy_code, error::Result,
};

/// Result of a first deployment behind a proxy.
#[derive(Debug, Clone)]
pub struct UpgradeableDeployment {
    pub libraries: Vec<LibraryRecord>,
    pub proxy: ProxyRecord,
}

/// Resolve `libraries`, link `contract_name` against them and deploy it behind a new proxy.
pub async fn deploy_upgradeable<C: ChainAccess, L: LedgerStore>(
    ctx: &DeployContext<C, L>,
    contract_name: &str,
    libraries: &[(String, LibrarySource)],
    initializer: &InitializerCall,
) -> Result<UpgradeableDeployment> {
    let resolved = LibraryResolver::new(ctx).resolve_all(libraries).await?;
    let descriptor = ImplementationFactory::new(&ctx.artifacts).build(contract_name, &resolved)?;

    let proxy = ProxyLifecycleManager::new(ctx)
        .deploy_proxy(&descriptor, initializer)
        .await?;

    Ok(UpgradeableDeployment {
        libraries: resolved,
        proxy,
    })
}

/// Resolve `libraries`, link a fresh `contract_name` and upgrade `proxy` to it.
pub async fn upgrade_to_fresh<C: ChainAccess, L: LedgerStore>(
    ctx: &DeployContext<C, L>,
    proxy: Address,
    contract_name: &str,
    libraries: &[(String, LibrarySource)],
) -> Result<ProxyRecord> {
    let resolved = LibraryResolver::new(ctx).resolve_all(libraries).await?;
    let descriptor = ImplementationFactory::new(&ctx.artifacts).build(contract_name, &resolved)?;

    ProxyLifecycleManager::new(ctx)
        .upgrade_proxy(proxy, UpgradeTarget::Fresh(descriptor))
        .await
}

/// Deploy a plain, non-upgradeable contract and record it.
///
/// `constructor` is written as `constructor(string name, string symbol, uint8 decimals)`
/// with one textual value per parameter.
pub async fn deploy_contract<C: ChainAccess, L: LedgerStore>(
    ctx: &DeployContext<C, L>,
    contract_name: &str,
    libraries: &[LibraryRecord],
    constructor: Option<&InitializerCall>,
    version: Option<&str>,
) -> Result<Address> {
    let descriptor = ImplementationFactory::new(&ctx.artifacts).build(contract_name, libraries)?;
    let args = match constructor {
        Some(call) => call
            .encode_params()
            .map_err(|source| DeployError::Artifact {
                name: contract_name.to_string(),
                source,
            })?,
        None => Bytes::new(),
    };
    let version = ctx.version_for(contract_name, version)?;

    let mut init_code = descriptor.bytecode.to_vec();
    init_code.extend_from_slice(&args);

    tracing::info!(contract = %contract_name, "Deploying contract...");
    let address = deploy_code(&ctx.chain, ctx.env.deployer, Bytes::from(init_code)).await?;
    tracing::info!(contract = %contract_name, address = %address, "Contract deployed");

    ctx.record(LedgerRecord::contract(
        contract_name,
        address,
        descriptor.libraries,
        version,
        &ctx.provenance,
    ))?;
    Ok(address)
}
