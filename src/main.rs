//! Radiant wallet CLI
//!
//! A command-line interface for wallets, balances and bundle minting.

use clap::{Parser, Subcommand};
use radiant_wallet::cli::{self, AppState};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "radiant-wallet")]
#[command(version = "0.1.0")]
#[command(about = "Radiant wallet for RXD, fungible and non-fungible tokens", long_about = None)]
struct Cli {
    /// Data directory for config, keys and wallet stores
    #[arg(short, long, default_value = ".wallet_data")]
    data_dir: PathBuf,

    /// Indexer server URL, overriding the config (repeatable)
    #[arg(short, long)]
    server: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wallet operations
    Wallet {
        #[command(subcommand)]
        action: WalletCommands,
    },

    /// Mint a bundle of tokens in resumable steps
    Bundle {
        #[command(subcommand)]
        action: BundleCommands,
    },
}

#[derive(Subcommand)]
enum WalletCommands {
    /// Create a new wallet
    Create {
        /// Optional label for the wallet
        #[arg(short, long)]
        label: Option<String>,
    },

    /// List all wallets
    List,

    /// Sync and show wallet balances
    Balance {
        /// Wallet address
        #[arg(short, long)]
        address: String,

        /// Show the last synced balances without connecting
        #[arg(long)]
        offline: bool,
    },

    /// Send RXD to an address
    Send {
        /// Sender's wallet address
        #[arg(short, long)]
        address: String,

        /// Recipient's address
        #[arg(short, long)]
        to: String,

        /// Amount in photons
        #[arg(long)]
        amount: u64,
    },

    /// Merge small outputs into one per asset
    Consolidate {
        /// Wallet address
        #[arg(short, long)]
        address: String,
    },
}

#[derive(Subcommand)]
enum BundleCommands {
    /// Create a bundle file from a JSON array of token drafts
    Init {
        /// Minting wallet address
        #[arg(short, long)]
        address: String,

        /// Token drafts file
        #[arg(long)]
        drafts: PathBuf,

        /// Bundle state file to create
        #[arg(short, long)]
        file: PathBuf,

        /// Tokens per batch (config default when absent)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Check claimed tokens and estimate the cost
    Prepare {
        #[arg(short, long)]
        address: String,

        #[arg(short, long)]
        file: PathBuf,
    },

    /// Broadcast delegate, funding and commit transactions
    Commit {
        #[arg(short, long)]
        address: String,

        #[arg(short, long)]
        file: PathBuf,
    },

    /// Reveal committed batches
    Reveal {
        #[arg(short, long)]
        address: String,

        #[arg(short, long)]
        file: PathBuf,

        /// Reveal only this batch
        #[arg(long)]
        batch: Option<usize>,
    },

    /// Show the progress of a bundle
    Status {
        #[arg(short, long)]
        file: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let state = AppState::new(&cli.data_dir, cli.server)?;
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Wallet { action } => match action {
            WalletCommands::Create { label } => cli::cmd_wallet_create(&state, label.as_deref())?,
            WalletCommands::List => cli::cmd_wallet_list(&state)?,
            WalletCommands::Balance { address, offline } => {
                rt.block_on(cli::cmd_wallet_balance(&state, &address, offline))?
            }
            WalletCommands::Send { address, to, amount } => {
                rt.block_on(cli::cmd_wallet_send(&state, &address, &to, amount))?
            }
            WalletCommands::Consolidate { address } => {
                rt.block_on(cli::cmd_wallet_consolidate(&state, &address))?
            }
        },

        Commands::Bundle { action } => match action {
            BundleCommands::Init {
                address,
                drafts,
                file,
                batch_size,
            } => cli::cmd_bundle_init(&state, &address, &drafts, &file, batch_size)?,
            BundleCommands::Prepare { address, file } => {
                rt.block_on(cli::cmd_bundle_prepare(&state, &address, &file))?
            }
            BundleCommands::Commit { address, file } => {
                rt.block_on(cli::cmd_bundle_commit(&state, &address, &file))?
            }
            BundleCommands::Reveal { address, file, batch } => {
                rt.block_on(cli::cmd_bundle_reveal(&state, &address, &file, batch))?
            }
            BundleCommands::Status { file } => cli::cmd_bundle_status(&file)?,
        },
    }

    Ok(())
}
