//! Transparent proxy lifecycle: first deployment and implementation upgrades.
//!
//! ```text
//! Uninitialized -> Deployed -> Upgrading -> Upgraded
//!                                  |  ^        |
//!                                  v  |        |
//!                                 Failed <-----+ (next upgrade starts from either)
//! ```
//!
//! Every transaction is awaited to inclusion before the next step, and every state change is
//! confirmed by reading the proxy's EIP-1967 slots back from the chain. The ledger is only
//! written once read-back verification has passed.

use std::collections::{BTreeMap, HashMap};

use alloy_core::primitives::{Address, Bytes};

use crate::{
    ChainAccess, DeployContext, DeployError, EntryKind, ImplementationDescriptor, InitializerCall,
    LedgerEntry, LedgerRecord, LedgerStore, UpgradePattern, Upgradeability, VerificationGate,
    abi::{proxy_constructor_args, upgrade_and_call_calldata},
    chain::{TransactionRequest, deploy_code, submit_and_wait},
    error::Result,
};

/// Artifact name of the proxy contract deployed in front of implementations.
pub const PROXY_ARTIFACT: &str = "TransparentUpgradeableProxy";

/// Lifecycle state of a proxy as seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ProxyState {
    Uninitialized,
    Deployed,
    Upgrading,
    Upgraded,
    Failed,
}

impl ProxyState {
    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(self, next: ProxyState) -> bool {
        use ProxyState::*;
        matches!(
            (self, next),
            (Uninitialized, Deployed)
                | (Deployed, Upgrading)
                | (Upgraded, Upgrading)
                | (Failed, Upgrading)
                | (Upgrading, Upgraded)
                | (Upgrading, Failed)
        )
    }
}

/// What a proxy should be upgraded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeTarget {
    /// An implementation that is already deployed.
    Existing(Address),
    /// Deploy this implementation first. It is never initialized directly.
    Fresh(ImplementationDescriptor),
}

/// A proxy and the implementations it has pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRecord {
    pub contract_name: String,
    pub proxy_address: Address,
    /// Resolved once per proxy and reused for every later upgrade.
    pub admin_address: Address,
    pub implementation_address: Address,
    /// Past implementations, oldest first.
    pub history: Vec<Address>,
    pub libraries: BTreeMap<String, Address>,
    pub state: ProxyState,
}

impl ProxyRecord {
    /// Move along a lifecycle edge, rejecting edges that do not exist.
    pub fn transition(&mut self, next: ProxyState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DeployError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(
            proxy = %self.proxy_address,
            from = %self.state,
            to = %next,
            "Proxy state transition"
        );
        self.state = next;
        Ok(())
    }

    /// Rebuild a proxy's record from its ledger entries.
    ///
    /// The first entry is a deployment for proxies created here, or an upgrade for proxies
    /// that were adopted from the chain. The latter seeds the history with the
    /// implementation the proxy pointed at before.
    pub fn from_ledger(entries: &[LedgerEntry], proxy: Address) -> Option<Self> {
        let mut proxied = entries.iter().filter(|entry| entry.is_for_proxy(proxy));
        let first = proxied.next()?;
        let first_up = first.upgradeability.as_ref()?;

        let state = match first.kind() {
            EntryKind::ProxyUpgrade => ProxyState::Upgraded,
            _ => ProxyState::Deployed,
        };
        let mut record = Self {
            contract_name: first.name.clone(),
            proxy_address: proxy,
            admin_address: first_up.proxy_admin_address,
            implementation_address: first_up.implementation_address,
            history: first_up.previous_implementation_address.into_iter().collect(),
            libraries: first.linked_libraries.clone().unwrap_or_default(),
            state,
        };

        for entry in proxied {
            let Some(up) = entry.upgradeability.as_ref() else {
                continue;
            };
            record.history.push(record.implementation_address);
            record.implementation_address = up.implementation_address;
            if let Some(libraries) = &entry.linked_libraries {
                record.libraries = libraries.clone();
            }
            record.state = ProxyState::Upgraded;
        }
        Some(record)
    }

    /// Every implementation this proxy has pointed at, current one last.
    pub fn all_implementations(&self) -> impl Iterator<Item = &Address> {
        self.history
            .iter()
            .chain(std::iter::once(&self.implementation_address))
    }
}

/// Deploys proxies and upgrades their implementations.
pub struct ProxyLifecycleManager<'a, C, L> {
    ctx: &'a DeployContext<C, L>,
    owner: Address,
    contract_name: Option<String>,
    records: HashMap<Address, ProxyRecord>,
}

impl<'a, C: ChainAccess, L: LedgerStore> ProxyLifecycleManager<'a, C, L> {
    /// A manager whose proxies are owned by the deployer.
    pub fn new(ctx: &'a DeployContext<C, L>) -> Self {
        Self {
            ctx,
            owner: ctx.env.deployer,
            contract_name: None,
            records: HashMap::new(),
        }
    }

    /// Set the initial owner of the admin contract created for new proxies.
    pub fn with_owner(mut self, owner: Address) -> Self {
        self.owner = owner;
        self
    }

    /// Contract name recorded for proxies that are neither cached nor in the ledger.
    pub fn with_contract_name(mut self, name: impl Into<String>) -> Self {
        self.contract_name = Some(name.into());
        self
    }

    /// The cached record of a proxy handled by this manager.
    pub fn record(&self, proxy: Address) -> Option<&ProxyRecord> {
        self.records.get(&proxy)
    }

    /// Deploy a new proxy in front of `descriptor`, calling the initializer exactly once.
    ///
    /// The implementation is deployed standalone first; the proxy creation transaction then
    /// creates the proxy and its admin contract and runs the initializer through the proxy.
    pub async fn deploy_proxy(
        &mut self,
        descriptor: &ImplementationDescriptor,
        initializer: &InitializerCall,
    ) -> Result<ProxyRecord> {
        let name = &descriptor.contract_name;
        let artifact_error = |source: anyhow::Error| DeployError::Artifact {
            name: name.clone(),
            source,
        };

        // Everything that can fail offline is checked before the first transaction.
        let init_calldata = initializer.encode().map_err(artifact_error)?;
        let initializer_args = initializer.named_args().map_err(artifact_error)?;
        let proxy_artifact = self.ctx.artifacts.load(PROXY_ARTIFACT)?;
        let proxy_code = crate::implementation::link(&proxy_artifact, &BTreeMap::new())?;
        let version = self.ctx.version_for(name, None)?;
        let deployer = self.ctx.env.deployer;

        tracing::info!(contract = %name, "Deploying implementation...");
        let implementation =
            deploy_code(&self.ctx.chain, deployer, descriptor.bytecode.clone()).await?;
        tracing::info!(contract = %name, implementation = %implementation, "Implementation deployed");

        tracing::info!(contract = %name, owner = %self.owner, "Deploying proxy...");
        let mut init_code = proxy_code.bytecode.to_vec();
        init_code.extend_from_slice(&proxy_constructor_args(
            implementation,
            self.owner,
            init_calldata,
        ));
        let proxy = deploy_code(&self.ctx.chain, deployer, Bytes::from(init_code)).await?;

        let admin = VerificationGate::admin_of(&self.ctx.chain, proxy).await?;
        let readback = VerificationGate::implementation_of(&self.ctx.chain, proxy).await?;
        check_deployment(proxy, admin, readback, implementation)?;

        let mut record = ProxyRecord {
            contract_name: name.clone(),
            proxy_address: proxy,
            admin_address: admin,
            implementation_address: readback,
            history: Vec::new(),
            libraries: descriptor.libraries.clone(),
            state: ProxyState::Uninitialized,
        };
        record.transition(ProxyState::Deployed)?;
        self.records.insert(proxy, record.clone());

        tracing::info!(
            contract = %name,
            proxy = %proxy,
            admin = %admin,
            implementation = %readback,
            "Proxy deployed"
        );

        self.ctx.record(LedgerRecord::proxied(
            name,
            descriptor.libraries.clone(),
            Upgradeability {
                pattern: UpgradePattern::Transparent,
                proxy_address: proxy,
                proxy_admin_address: admin,
                implementation_address: readback,
                previous_implementation_address: None,
                initializer_args: Some(initializer_args),
            },
            version,
            &self.ctx.provenance,
        ))?;

        Ok(record)
    }

    /// Point `proxy` at a new implementation through its admin contract.
    pub async fn upgrade_proxy(
        &mut self,
        proxy: Address,
        target: UpgradeTarget,
    ) -> Result<ProxyRecord> {
        self.upgrade_proxy_and_call(proxy, target, Bytes::new())
            .await
    }

    /// Like [`Self::upgrade_proxy`], forwarding `call_data` to the new implementation
    /// through the proxy in the same transaction.
    pub async fn upgrade_proxy_and_call(
        &mut self,
        proxy: Address,
        target: UpgradeTarget,
        call_data: Bytes,
    ) -> Result<ProxyRecord> {
        let deployer = self.ctx.env.deployer;

        // Baseline for the post-check. Re-pointing to the same address still goes through.
        let old_implementation = VerificationGate::implementation_of(&self.ctx.chain, proxy).await?;
        tracing::info!(proxy = %proxy, current = %old_implementation, "Upgrading proxy...");

        let mut record = self.resolve_record(proxy, &target).await?;
        let name = match &target {
            UpgradeTarget::Existing(_) => record.contract_name.clone(),
            UpgradeTarget::Fresh(descriptor) => descriptor.contract_name.clone(),
        };
        let version = self.ctx.version_for(&name, None)?;

        let (new_implementation, libraries) = match &target {
            UpgradeTarget::Existing(address) => {
                VerificationGate::code_exists(&self.ctx.chain, *address).await?;
                (*address, BTreeMap::new())
            }
            UpgradeTarget::Fresh(descriptor) => {
                tracing::info!(contract = %descriptor.contract_name, "Deploying new implementation...");
                let address =
                    deploy_code(&self.ctx.chain, deployer, descriptor.bytecode.clone()).await?;
                tracing::info!(
                    contract = %descriptor.contract_name,
                    implementation = %address,
                    "New implementation deployed"
                );
                (address, descriptor.libraries.clone())
            }
        };

        record.transition(ProxyState::Upgrading)?;
        let admin = record.admin_address;
        let calldata = upgrade_and_call_calldata(proxy, new_implementation, call_data);

        let outcome = async {
            submit_and_wait(
                &self.ctx.chain,
                TransactionRequest::call(deployer, admin, calldata),
            )
            .await?;
            let after = VerificationGate::implementation_of(&self.ctx.chain, proxy).await?;
            VerificationGate::address_changed(proxy, old_implementation, after, new_implementation)
        }
        .await;

        if let Err(e) = outcome {
            record.transition(ProxyState::Failed)?;
            self.records.insert(proxy, record);
            tracing::error!(proxy = %proxy, error = %e, "Upgrade failed, nothing recorded");
            return Err(e);
        }

        record.transition(ProxyState::Upgraded)?;
        record.history.push(old_implementation);
        record.implementation_address = new_implementation;
        if !libraries.is_empty() {
            record.libraries = libraries.clone();
        }
        self.records.insert(proxy, record.clone());

        tracing::info!(
            proxy = %proxy,
            previous = %old_implementation,
            implementation = %new_implementation,
            "Upgrade completed"
        );

        self.ctx.record(LedgerRecord::proxied(
            &name,
            libraries,
            Upgradeability {
                pattern: UpgradePattern::Transparent,
                proxy_address: proxy,
                proxy_admin_address: admin,
                implementation_address: new_implementation,
                previous_implementation_address: Some(old_implementation),
                initializer_args: None,
            },
            version,
            &self.ctx.provenance,
        ))?;

        Ok(record)
    }

    /// The proxy's record: cached, else rebuilt from the ledger, else read from chain.
    ///
    /// A proxy adopted from the chain is named after the fresh implementation, or after
    /// [`Self::with_contract_name`] when pointing it at an existing one.
    async fn resolve_record(&self, proxy: Address, target: &UpgradeTarget) -> Result<ProxyRecord> {
        if let Some(record) = self.records.get(&proxy) {
            return Ok(record.clone());
        }

        let entries = self.ctx.ledger.proxy_history(self.ctx.chain_id(), proxy)?;
        if let Some(record) = ProxyRecord::from_ledger(&entries, proxy) {
            tracing::debug!(proxy = %proxy, admin = %record.admin_address, "Proxy admin taken from ledger");
            return Ok(record);
        }

        let admin = VerificationGate::admin_of(&self.ctx.chain, proxy).await?;
        if admin.is_zero() {
            return Err(DeployError::ProxyReadback {
                proxy,
                detail: "admin slot is empty, not a transparent proxy".to_string(),
            });
        }
        let implementation = VerificationGate::implementation_of(&self.ctx.chain, proxy).await?;
        tracing::debug!(proxy = %proxy, admin = %admin, "Proxy admin read from chain");

        let contract_name = match (target, &self.contract_name) {
            (UpgradeTarget::Fresh(descriptor), _) => descriptor.contract_name.clone(),
            (UpgradeTarget::Existing(_), Some(name)) => name.clone(),
            (UpgradeTarget::Existing(_), None) => {
                return Err(DeployError::UnknownProxy { proxy });
            }
        };
        Ok(ProxyRecord {
            contract_name,
            proxy_address: proxy,
            admin_address: admin,
            implementation_address: implementation,
            history: Vec::new(),
            libraries: BTreeMap::new(),
            state: ProxyState::Deployed,
        })
    }
}

/// Sanity checks on the slots of a freshly deployed proxy.
fn check_deployment(
    proxy: Address,
    admin: Address,
    implementation: Address,
    deployed_implementation: Address,
) -> Result<()> {
    let fail = |detail: String| Err(DeployError::ProxyReadback { proxy, detail });

    if admin.is_zero() {
        return fail("admin slot is empty".to_string());
    }
    if implementation.is_zero() {
        return fail("implementation slot is empty".to_string());
    }
    if admin == proxy || implementation == proxy {
        return fail("admin or implementation equals the proxy address".to_string());
    }
    if admin == implementation {
        return fail(format!("admin and implementation are both {}", admin));
    }
    if implementation != deployed_implementation {
        return fail(format!(
            "implementation slot holds {}, deployed {}",
            implementation, deployed_implementation
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{LedgerEntry, Provenance};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn entry(implementation: Address, previous: Option<Address>) -> LedgerEntry {
        LedgerEntry {
            record: LedgerRecord::proxied(
                "ProjectHubUpgradeable",
                BTreeMap::from([("ProjectLibrary".to_string(), addr(0xaa))]),
                Upgradeability {
                    pattern: UpgradePattern::Transparent,
                    proxy_address: addr(0x01),
                    proxy_admin_address: addr(0x02),
                    implementation_address: implementation,
                    previous_implementation_address: previous,
                    initializer_args: None,
                },
                "v1".to_string(),
                &Provenance {
                    commit_hash: "unknown".to_string(),
                    deployer: addr(0xde),
                },
            ),
            deployment_time: Utc::now(),
        }
    }

    #[test]
    fn test_lifecycle_edges() {
        use ProxyState::*;
        assert!(Uninitialized.can_transition_to(Deployed));
        assert!(Deployed.can_transition_to(Upgrading));
        assert!(Upgrading.can_transition_to(Upgraded));
        assert!(Upgrading.can_transition_to(Failed));
        assert!(Upgraded.can_transition_to(Upgrading));
        assert!(Failed.can_transition_to(Upgrading));

        assert!(!Uninitialized.can_transition_to(Upgrading));
        assert!(!Deployed.can_transition_to(Upgraded));
        assert!(!Deployed.can_transition_to(Deployed));
        assert!(!Upgraded.can_transition_to(Failed));
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut record = ProxyRecord::from_ledger(&[entry(addr(0x03), None)], addr(0x01)).unwrap();
        assert_eq!(record.state, ProxyState::Deployed);

        let err = record.transition(ProxyState::Upgraded).unwrap_err();
        assert!(matches!(
            err,
            DeployError::InvalidTransition {
                from: ProxyState::Deployed,
                to: ProxyState::Upgraded
            }
        ));
        assert_eq!(record.state, ProxyState::Deployed);
    }

    #[test]
    fn test_record_from_ledger() {
        let entries = vec![
            entry(addr(0x03), None),
            entry(addr(0x04), Some(addr(0x03))),
            entry(addr(0x05), Some(addr(0x04))),
        ];

        let record = ProxyRecord::from_ledger(&entries, addr(0x01)).unwrap();
        assert_eq!(record.admin_address, addr(0x02));
        assert_eq!(record.implementation_address, addr(0x05));
        assert_eq!(record.history, vec![addr(0x03), addr(0x04)]);
        assert_eq!(record.state, ProxyState::Upgraded);
        assert_eq!(record.all_implementations().count(), 3);

        assert!(ProxyRecord::from_ledger(&entries, addr(0x09)).is_none());
    }

    #[test]
    fn test_record_from_ledger_starting_with_upgrade() {
        let entries = vec![
            entry(addr(0x04), Some(addr(0x03))),
            entry(addr(0x05), Some(addr(0x04))),
        ];

        let record = ProxyRecord::from_ledger(&entries[..1], addr(0x01)).unwrap();
        assert_eq!(record.history, vec![addr(0x03)]);
        assert_eq!(record.implementation_address, addr(0x04));
        assert_eq!(record.state, ProxyState::Upgraded);

        let record = ProxyRecord::from_ledger(&entries, addr(0x01)).unwrap();
        assert_eq!(record.history, vec![addr(0x03), addr(0x04)]);
        assert_eq!(record.implementation_address, addr(0x05));
    }

    #[test]
    fn test_check_deployment() {
        let proxy = addr(0x01);
        assert!(check_deployment(proxy, addr(0x02), addr(0x03), addr(0x03)).is_ok());
        assert!(check_deployment(proxy, Address::ZERO, addr(0x03), addr(0x03)).is_err());
        assert!(check_deployment(proxy, addr(0x02), Address::ZERO, Address::ZERO).is_err());
        assert!(check_deployment(proxy, proxy, addr(0x03), addr(0x03)).is_err());
        assert!(check_deployment(proxy, addr(0x03), addr(0x03), addr(0x03)).is_err());
        assert!(check_deployment(proxy, addr(0x02), addr(0x03), addr(0x04)).is_err());
    }
}
