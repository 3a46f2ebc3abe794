//! farcasterd - Cross-Chain Atomic Swap Daemon
//!
//! Run modes:
//!   farcasterd run    - Start the daemon (control endpoint + swap engine)
//!   farcasterd help   - Show usage

use std::env;
use std::sync::Arc;

use dotenv::dotenv;
use tracing::{error, info, warn};

use farcasterd::control::{self, AppState};
use farcasterd::{
    ControlService, FarcasterConfig, FarcasterError, MessageBus, OfferBook, SwapRegistry,
};

#[tokio::main]
async fn main() {
    dotenv().ok();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("run") => {
            if let Err(e) = run_daemon().await {
                eprintln!("Error: {} ({})", e, e.error_code());
                std::process::exit(1);
            }
        }
        Some("help") | Some("--help") | Some("-h") | None => print_usage(),
        _ => print_usage(),
    }
}

fn print_usage() {
    println!("farcasterd - Cross-Chain Atomic Swap Daemon");
    println!();
    println!("Usage:");
    println!("  farcasterd run     Start the daemon");
    println!("  farcasterd help    Show this message");
    println!();
    println!("Environment Variables:");
    println!("  FARCASTERD_NETWORK            mainnet | testnet | local (default: testnet)");
    println!("  FARCASTERD_CTL_BIND           Control bind address (default: 127.0.0.1)");
    println!("  FARCASTERD_CTL_PORT           Control port (default: 9981)");
    println!("  FARCASTERD_PEER_PORT          Peer negotiation port (default: 9735)");
    println!("  FARCASTERD_ARB_DAEMON         Arbitrating chain daemon RPC");
    println!("  FARCASTERD_ARB_SYNCER         Arbitrating chain syncer address");
    println!("  FARCASTERD_ACC_DAEMON         Accordant chain wallet RPC");
    println!("  FARCASTERD_ACC_SYNCER         Accordant chain syncer address");
    println!("  FARCASTERD_BUS_TIMEOUT_SECS   Bus request timeout (default: 10)");
    println!("  FARCASTERD_RETRY_COUNT        Retries before a swap stalls (default: 3)");
    println!("  FARCASTERD_LOG_LEVEL          trace | debug | info | warn | error");
    println!();
    println!("The control port is not safe to expose publicly.");
}

async fn run_daemon() -> Result<(), FarcasterError> {
    let config = FarcasterConfig::from_env()?;
    farcasterd::logging::init_from_config(&config)?;
    config.print_summary();

    let bus = MessageBus::new();
    let registry = SwapRegistry::new();
    let offers = OfferBook::new();

    ControlService::new(
        bus.clone(),
        registry.clone(),
        offers,
        config.clone(),
    )
    .spawn();

    info!(
        arb_daemon = %config.arb_daemon,
        acc_daemon = %config.acc_daemon,
        "expecting wallet and syncer services for the configured chains"
    );
    warn!(
        "no wallet/syncer attached yet; swaps stall until services register on the bus"
    );

    let state = Arc::new(AppState {
        bus,
        registry,
        request_timeout: config.bus_timeout(),
    });

    let ctl_addr = config.ctl_addr();
    tokio::select! {
        result = control::server::serve(state, &ctl_addr) => {
            if let Err(e) = result {
                error!(error = %e, "control endpoint failed");
                return Err(FarcasterError::Io(e));
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
