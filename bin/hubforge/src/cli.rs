use std::{path::PathBuf, str::FromStr};

use alloy_core::primitives::Address;
use clap::{Args, Parser, Subcommand};
use hubforge_deploy::{LibrarySource, normalize_address};
use tracing::level_filters::LevelFilter;

/// The default chain id (Moonbase Alpha).
const DEFAULT_CHAIN_ID: u64 = 1287;

/// A link-library to resolve, written `Name`, `Name=latest` or `Name=<address>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryArg {
    pub name: String,
    pub source: LibrarySource,
}

impl FromStr for LibraryArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, source) = match s.split_once('=') {
            None => (s, LibrarySource::Deploy),
            Some((name, "latest")) => (name, LibrarySource::Latest),
            Some((name, address)) => (name, LibrarySource::Reuse(normalize_address(address)?)),
        };
        if name.trim().is_empty() {
            anyhow::bail!("Library name is empty in '{}'", s);
        }
        Ok(Self {
            name: name.trim().to_string(),
            source,
        })
    }
}

pub fn parse_address(s: &str) -> anyhow::Result<Address> {
    normalize_address(s)
}

/// Output format of the ledger listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum LedgerFormat {
    #[default]
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "hubforge")]
#[command(
    author,
    version,
    about = "Deploy and upgrade the ProjectHub contracts behind transparent proxies"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "HUBFORGE_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file. Defaults to ./Hubforge.toml when present.
    #[arg(long, alias = "conf", env = "HUBFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// The chain to operate on. Must match a network in the configuration.
    #[arg(long, alias = "chain", env = "HUBFORGE_CHAIN_ID", default_value_t = DEFAULT_CHAIN_ID)]
    pub chain_id: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve link-libraries, deploying the ones that are not reused.
    DeployLibraries {
        #[command(flatten)]
        libraries: LibraryArgs,
    },

    /// Deploy a contract behind a new transparent proxy and initialize it.
    DeployProxy {
        /// Name of the implementation contract artifact.
        #[arg(long, default_value = "ProjectHubUpgradeable")]
        contract: String,

        #[command(flatten)]
        libraries: LibraryArgs,

        #[command(flatten)]
        initializer: CallArgs,

        /// Initial owner of the proxy admin. Defaults to the deployer.
        #[arg(long, value_parser = parse_address)]
        owner: Option<Address>,
    },

    /// Upgrade a proxy to an existing implementation or a freshly linked one.
    Upgrade {
        /// The proxy to upgrade.
        #[arg(long, value_parser = parse_address)]
        proxy: Address,

        /// Point the proxy at this already deployed implementation.
        #[arg(long, value_parser = parse_address, conflicts_with = "library")]
        implementation: Option<Address>,

        /// Deploy a fresh implementation of this contract. With `--implementation`, the name
        /// recorded for a proxy that is not in the ledger yet.
        #[arg(long, required_unless_present = "implementation")]
        contract: Option<String>,

        #[command(flatten)]
        libraries: LibraryArgs,
    },

    /// Deploy a plain, non-upgradeable contract.
    DeployContract {
        /// Name of the contract artifact.
        #[arg(long)]
        contract: String,

        /// Constructor signature, e.g. `constructor(string name, string symbol, uint8 decimals)`.
        #[arg(long, requires = "args")]
        constructor: Option<String>,

        /// Constructor arguments, in order.
        #[arg(long = "arg", num_args = 1)]
        args: Vec<String>,

        /// Version to record. Defaults to `v<N>`.
        #[arg(long)]
        version: Option<String>,
    },

    /// Show the admin and implementation a proxy currently points at.
    Status {
        #[arg(long, value_parser = parse_address)]
        proxy: Address,
    },

    /// List the ledger entries recorded for the chain.
    Ledger {
        /// Only show entries with this name.
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value_t = LedgerFormat::Table)]
        format: LedgerFormat,
    },
}

/// Link-libraries to resolve before linking.
#[derive(Debug, Clone, Args)]
pub struct LibraryArgs {
    /// `Name` to deploy, `Name=latest` to reuse the ledger's address, `Name=0x..` to reuse an address.
    #[arg(long = "library", num_args = 1)]
    pub library: Vec<LibraryArg>,
}

impl LibraryArgs {
    pub fn sources(&self) -> Vec<(String, LibrarySource)> {
        self.library
            .iter()
            .map(|lib| (lib.name.clone(), lib.source))
            .collect()
    }
}

/// A function call given as a signature and its arguments.
#[derive(Debug, Clone, Args)]
pub struct CallArgs {
    /// Initializer signature, called once through the proxy.
    #[arg(
        long,
        default_value = "initialize(address xcmOracle, address owner, address[] vAssets, address[] nativeAssets)"
    )]
    pub initializer: String,

    /// Initializer arguments, in order. Arrays are written `[a,b]`.
    #[arg(long = "init-arg", num_args = 1)]
    pub init_args: Vec<String>,
}
