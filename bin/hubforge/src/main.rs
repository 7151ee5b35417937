//! hubforge deploys the ProjectHub contracts behind transparent proxies and keeps a
//! per-chain ledger of everything it deploys.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command, LedgerFormat};
use hubforge_deploy::{
    ArtifactStore, DeployContext, FileLedger, GitCommitSource, HubforgeConfig,
    ImplementationFactory, InitializerCall, JsonRpcChain, LedgerEntry, LedgerStore,
    LibraryResolver, ProxyLifecycleManager, UpgradeTarget, UpgradeableDeployment,
    VerificationGate, deploy_contract, deploy_upgradeable, upgrade_to_fresh,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = HubforgeConfig::load(cli.config.as_ref())?;
    let ledger = FileLedger::new(&config.ledger_dir);

    // Reading the ledger needs no chain access.
    if let Command::Ledger { name, format } = &cli.command {
        let entries = ledger
            .all(cli.chain_id)?
            .into_iter()
            .filter(|entry| name.as_ref().is_none_or(|name| &entry.name == name))
            .collect::<Vec<_>>();
        return print_ledger(&entries, *format);
    }

    let env = VerificationGate::preflight(&config, cli.chain_id)?;
    tracing::info!(
        chain_id = env.chain_id,
        network = config.network_name(env.chain_id).unwrap_or("unnamed"),
        rpc_url = %env.rpc_url,
        deployer = %env.deployer,
        "Using chain environment"
    );

    let chain = JsonRpcChain::new(&env)?;
    VerificationGate::chain_matches(&chain, &env).await?;

    let ctx = DeployContext::new(
        env,
        chain,
        ledger,
        ArtifactStore::new(&config.artifacts_dir),
        &GitCommitSource::new(config.repo_dir.clone()),
    );

    match cli.command {
        Command::DeployLibraries { libraries } => {
            let resolved = LibraryResolver::new(&ctx)
                .resolve_all(&libraries.sources())
                .await?;
            for library in resolved {
                println!("{} {} ({})", library.name, library.address, library.origin);
            }
        }
        Command::DeployProxy {
            contract,
            libraries,
            initializer,
            owner,
        } => {
            let call = InitializerCall::new(initializer.initializer, initializer.init_args);
            let deployment = match owner {
                None => deploy_upgradeable(&ctx, &contract, &libraries.sources(), &call).await?,
                Some(owner) => {
                    let resolved = LibraryResolver::new(&ctx)
                        .resolve_all(&libraries.sources())
                        .await?;
                    let descriptor = ImplementationFactory::new(&ctx.artifacts)
                        .build(&contract, &resolved)?;
                    let proxy = ProxyLifecycleManager::new(&ctx)
                        .with_owner(owner)
                        .deploy_proxy(&descriptor, &call)
                        .await?;
                    UpgradeableDeployment {
                        libraries: resolved,
                        proxy,
                    }
                }
            };
            println!("proxy:          {}", deployment.proxy.proxy_address);
            println!("admin:          {}", deployment.proxy.admin_address);
            println!("implementation: {}", deployment.proxy.implementation_address);
        }
        Command::Upgrade {
            proxy,
            implementation,
            contract,
            libraries,
        } => {
            let record = match (implementation, contract) {
                (Some(address), contract) => {
                    let mut manager = ProxyLifecycleManager::new(&ctx);
                    if let Some(contract) = contract {
                        manager = manager.with_contract_name(contract);
                    }
                    manager
                        .upgrade_proxy(proxy, UpgradeTarget::Existing(address))
                        .await?
                }
                (None, Some(contract)) => {
                    upgrade_to_fresh(&ctx, proxy, &contract, &libraries.sources()).await?
                }
                (None, None) => anyhow::bail!("Either --implementation or --contract is required"),
            };
            println!("proxy:          {}", record.proxy_address);
            println!("implementation: {}", record.implementation_address);
            if let Some(previous) = record.history.last() {
                println!("previous:       {}", previous);
            }
        }
        Command::DeployContract {
            contract,
            constructor,
            args,
            version,
        } => {
            let call = constructor.map(|signature| InitializerCall::new(signature, args));
            let address =
                deploy_contract(&ctx, &contract, &[], call.as_ref(), version.as_deref()).await?;
            println!("{} {}", contract, address);
        }
        Command::Status { proxy } => {
            let admin = VerificationGate::admin_of(&ctx.chain, proxy).await?;
            let implementation = VerificationGate::implementation_of(&ctx.chain, proxy).await?;
            println!("proxy:          {}", proxy);
            println!("admin:          {}", admin);
            println!("implementation: {}", implementation);
        }
        // Listed above, before connecting.
        Command::Ledger { .. } => {}
    }

    Ok(())
}

fn print_ledger(entries: &[LedgerEntry], format: LedgerFormat) -> Result<()> {
    match format {
        LedgerFormat::Json => {
            let json = serde_json::to_string_pretty(entries)
                .context("Failed to serialize ledger entries")?;
            println!("{}", json);
        }
        LedgerFormat::Table => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL).set_header(vec![
                "Name",
                "Kind",
                "Version",
                "Address",
                "Proxy",
                "Commit",
                "Deployed at",
            ]);
            for entry in entries {
                let proxy = entry
                    .upgradeability
                    .as_ref()
                    .map(|up| up.proxy_address.to_string())
                    .unwrap_or_default();
                table.add_row(vec![
                    entry.name.clone(),
                    entry.kind().to_string(),
                    entry.version.clone(),
                    entry.address.to_string(),
                    proxy,
                    entry.commit_hash.chars().take(10).collect(),
                    entry.deployment_time.to_rfc3339(),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}
