//! # Allocation Runner
//!
//! Runs the allocation pipeline up to the requested stage. Every stage is
//! cached in the output directory, so rerunning a later stage reuses the
//! earlier ones.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin allocate -- --config Config.toml complete
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use gno_airdrop_ledger::{normalization::display_tokens, Pipeline, Settings};
use log::info;

#[derive(Parser)]
#[command(name = "allocate", about = "Builds the GNO airdrop allocation ledger")]
struct Cli {
    /// Configuration file (defaults to Config.toml or $ALLOCATION_CONFIG)
    #[arg(short, long)]
    config: Option<String>,
    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Reconcile holders across both networks
    Holders,
    /// Classify traders and compute their allocations
    Traders,
    /// Compute the POAP allocations
    Poap,
    /// Assemble the combined ledger
    Ledger,
    /// Split the ledger by network
    Split,
    /// Split, append the option files and apply the redirect
    Complete,
    /// List gchain recipients needing native funds to claim
    Transfers,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::from_path(path)?,
        None => Settings::new()?,
    };
    let pipeline = Pipeline::connect(settings).await?;

    match cli.cmd.unwrap_or(Commands::Complete) {
        Commands::Holders => {
            let holders = pipeline.combined_holders().await?;
            println!("{} eligible holders", holders.len());
        }
        Commands::Traders => {
            let traders = pipeline.trader_allocations().await?;
            println!("Primary traders: {}", traders.primary.len());
            println!("Consolation traders: {}", traders.consolation.len());
            println!("User options: {}", traders.user_options.len());
        }
        Commands::Poap => {
            let poap = pipeline.poap_allocations().await?;
            println!("{} POAP recipients, {} allocated", poap.len(), display_tokens(poap.total()?));
        }
        Commands::Ledger => {
            let rows = pipeline.merkle_leaves().await?;
            println!("{} ledger rows", rows.len());
        }
        Commands::Split => {
            let split = pipeline.split().await?;
            println!("{}", split.summary()?);
        }
        Commands::Complete => {
            let split = pipeline.complete().await?;
            let summary = split.summary()?;
            println!("{}", summary);
            info!("unallocated: {} wei", summary.unallocated());
        }
        Commands::Transfers => {
            let transfers = pipeline.gchain_transfers().await?;
            println!("{} gchain native transfers", transfers.len());
        }
    }
    Ok(())
}
