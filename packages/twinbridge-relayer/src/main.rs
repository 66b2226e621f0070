//! Twinbridge Relayer
//!
//! Watches both ends of a lock/wrap bridge and answers every event on the
//! opposite chain:
//!
//! 1. `Deposit` on the source bridge -> `wrap` on the destination bridge
//! 2. `Unwrap` on the destination bridge -> `withdraw` on the source bridge
//!
//! The same binary also registers tokens, submits Merkle claims against the
//! prime validator and runs one-off scans and block inspections.

mod api;
mod bridge;
mod claim;
mod config;
mod metrics;
mod registration;
mod relay_loop;
mod retry;

use clap::{Parser, Subcommand};
use eyre::{eyre, Result, WrapErr};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{error, info, warn};

use twinbridge_core::evm::contracts::MerkleValidator;
use twinbridge_core::evm::{AccountContext, BlockRef, ChainClient};
use twinbridge_core::{bytes32_to_hex, ChainSide, DepositLog, IdentityAllocator};

use bridge::{Bridge, Purpose};
use config::Config;
use relay_loop::{run_pollers, watched_event, SharedStatus};

#[derive(Parser)]
#[command(name = "twinbridge-relayer")]
#[command(about = "Relayer for the twinbridge lock/wrap bridge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Environment file read before configuration is loaded
    #[arg(long, global = true, default_value = ".env")]
    env_file: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay Deposit and Unwrap events until interrupted
    Relay {
        /// Register the tokens listed in this CSV before relaying
        #[arg(long)]
        register_csv: Option<PathBuf>,
    },

    /// Scan one chain once and print the events found
    Scan {
        /// Configured chain name
        #[arg(long)]
        chain: String,

        /// First block ('latest' or a number; negative clamps to 0)
        #[arg(long, default_value = "latest", allow_negative_numbers = true)]
        start: BlockRef,

        /// Last block ('latest' or a number)
        #[arg(long, default_value = "latest", allow_negative_numbers = true)]
        end: BlockRef,
    },

    /// Register tokens from a `chain,tokenAddress` CSV
    Register {
        /// Input CSV
        csv: PathBuf,
    },

    /// Claim a prime from the Merkle validator
    Claim {
        /// Leaf index to claim (1..8191)
        #[arg(long)]
        index: usize,

        /// Claim from this identity slot instead of the configured signer
        #[arg(long)]
        slot: Option<usize>,
    },

    /// Print the address of an identity slot, creating it if needed
    Identity {
        #[arg(long)]
        slot: usize,
    },

    /// Check whether a block's transactions are ordered by priority fee
    InspectBlock {
        /// Configured chain name
        #[arg(long)]
        chain: String,

        /// Block number
        #[arg(long)]
        number: u64,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from_file(&cli.env_file)?;
    init_logging();

    info!(
        source = %config.source.name,
        source_chain_id = config.source.chain_id,
        destination = %config.destination.name,
        destination_chain_id = config.destination.chain_id,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Relay { register_csv } => relay(config, register_csv).await,
        Commands::Scan { chain, start, end } => scan(config, &chain, start, end).await,
        Commands::Register { csv } => {
            let bridge = Bridge::connect(config)?;
            let account = AccountContext::new(bridge.config().signer.load()?);
            let failed = register_tokens(&bridge, &account, &csv).await?;
            if failed > 0 {
                return Err(eyre!("{} registration(s) failed", failed));
            }
            Ok(())
        }
        Commands::Claim { index, slot } => claim(config, index, slot).await,
        Commands::Identity { slot } => {
            let account = load_identity(config.identity_store_path.clone(), slot).await?;
            println!("{}\t{}", slot, account.address());
            Ok(())
        }
        Commands::InspectBlock { chain, number } => inspect_block(config, &chain, number).await,
    }
}

async fn relay(config: Config, register_csv: Option<PathBuf>) -> Result<()> {
    info!("Starting twinbridge relayer");

    let api_port = config.api_port;
    let bridge = Bridge::connect(config)?;
    bridge.verify_chains().await?;
    let account = AccountContext::new(bridge.config().signer.load()?);
    info!(signer = %account.address(), "Signer loaded");

    if let Some(csv) = register_csv {
        let failed = register_tokens(&bridge, &account, &csv).await?;
        if failed > 0 {
            warn!(failed, "Some registrations failed; continuing with relay");
        }
    }

    let status = SharedStatus::default();
    let pollers = bridge.relay_pollers(account, status.clone())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let api_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_server(api_port, status, api_shutdown).await {
            error!(error = %e, "API server error");
        }
    });

    metrics::UP.set(1.0);
    let result = run_pollers(pollers, shutdown_rx).await;
    metrics::UP.set(0.0);

    info!("Twinbridge relayer stopped");
    result
}

async fn scan(config: Config, chain: &str, start: BlockRef, end: BlockRef) -> Result<()> {
    let bridge = Bridge::connect(config)?;
    let side = bridge.side_by_name(chain)?;
    let scanner = bridge.scanner(side)?;
    let report = scanner.scan(watched_event(side), start, end).await?;

    let events = report.events();
    for event in &events {
        println!("{}", serde_json::to_string(event)?);
    }
    info!(
        window = %report.window,
        events = events.len(),
        skipped = report.skipped.len(),
        "Scan complete"
    );

    if side == ChainSide::Source {
        let log = DepositLog::new(&bridge.config().event_log_path);
        let client = bridge.client(side);
        let rows = log.record(client.as_ref(), &events).await?;
        info!(rows, path = %log.path().display(), "Deposit log updated");
    }

    let failures = report.failures();
    if !failures.is_empty() {
        for failure in &failures {
            error!(window = %failure.window, reason = %failure.reason, "Sub-window not scanned");
        }
        return Err(eyre!(
            "scan of {} incomplete: {} sub-window(s) failed",
            report.window,
            failures.len()
        ));
    }
    Ok(())
}

/// Submit the registrations in `csv`; returns the number that failed
async fn register_tokens(bridge: &Bridge, account: &AccountContext, csv: &Path) -> Result<usize> {
    let rows = registration::load_registration_file(csv)?;
    let plan = registration::plan_registrations(
        &rows,
        &bridge.config().source.name,
        &bridge.config().destination.name,
    )?;
    let source = bridge.submitter(ChainSide::Source, Purpose::Registration)?;
    let destination = bridge.submitter(ChainSide::Destination, Purpose::Registration)?;

    let results = registration::run_registrations(plan, &source, &destination, account).await;
    let failed = results
        .iter()
        .filter(|r| !matches!(&r.result, Ok(outcome) if !outcome.is_reverted()))
        .count();
    info!(
        total = results.len(),
        failed,
        path = %csv.display(),
        "Registration pass complete"
    );
    Ok(failed)
}

async fn claim(config: Config, index: usize, slot: Option<usize>) -> Result<()> {
    let primes = claim::PrimeTree::generate(claim::PRIME_LEAF_COUNT)?;
    let plan = primes.plan(index)?;

    let account = match slot {
        Some(slot) => load_identity(config.identity_store_path.clone(), slot).await?,
        None => config.signer.load()?,
    };
    let ctx = AccountContext::new(account);

    let bridge = Bridge::connect(config)?;
    let side = bridge.side_by_name(&bridge.config().proof_contract_chain)?;
    let submitter = bridge.submitter(side, Purpose::Proof)?;
    let client = bridge.client(side);
    let validator = MerkleValidator::new(submitter.binding().address, client.provider().clone());

    let onchain_root = validator
        .merkleRoot()
        .call()
        .await
        .wrap_err("Failed to read validator root")?
        ._0;
    if onchain_root.0 != plan.root {
        return Err(eyre!(
            "Validator root {} does not match local root {}",
            onchain_root,
            bytes32_to_hex(&plan.root)
        ));
    }

    let outcome = claim::submit_claim(&submitter, &ctx, &plan).await?;
    if outcome.is_reverted() {
        return Err(eyre!("Claim transaction {} reverted", outcome.tx_hash()));
    }

    let claimed = validator
        .getPrimeByOwner(ctx.address())
        .call()
        .await
        .wrap_err("Failed to read claimed prime")?
        ._0;
    info!(
        claimant = %ctx.address(),
        tx_hash = %outcome.tx_hash(),
        status = outcome.status(),
        prime = %claimed,
        "Claim complete"
    );
    Ok(())
}

async fn load_identity(store: PathBuf, slot: usize) -> Result<twinbridge_core::evm::Account> {
    let account = tokio::task::spawn_blocking(move || IdentityAllocator::new(store).get_identity(slot))
        .await
        .wrap_err("Identity lookup task failed")??;
    Ok(account)
}

async fn inspect_block(config: Config, chain: &str, number: u64) -> Result<()> {
    let bridge = Bridge::connect(config)?;
    let side = bridge.side_by_name(chain)?;
    let client = bridge.client(side);
    let fees = client.block_fees(number).await?;

    let ordered = fees.is_priority_ordered();
    info!(
        chain = %client.endpoint().name,
        block = fees.number,
        base_fee = ?fees.base_fee,
        transactions = fees.txs.len(),
        ordered,
        "Block inspected"
    );
    println!("{}", if ordered { "ordered" } else { "not ordered" });
    Ok(())
}

/// Initialize tracing/logging with structured output
///
/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,twinbridge_relayer=debug,twinbridge_core=debug")
    });
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scan_accepts_negative_and_latest() {
        let cli = Cli::parse_from([
            "twinbridge-relayer",
            "scan",
            "--chain",
            "avax",
            "--start",
            "-10",
        ]);
        match cli.command {
            Commands::Scan { start, end, .. } => {
                assert_eq!(start, BlockRef::Number(-10));
                assert_eq!(end, BlockRef::Latest);
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn test_claim_args() {
        let cli = Cli::parse_from(["twinbridge-relayer", "claim", "--index", "7", "--slot", "2"]);
        assert!(matches!(
            cli.command,
            Commands::Claim {
                index: 7,
                slot: Some(2)
            }
        ));
        assert_eq!(cli.env_file, ".env");
    }
}
