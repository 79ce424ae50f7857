//! lease-dns binary entry point.

use clap::Parser;
use lease_dns::{telemetry, Config, LeaseServer};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Dynamic DNS control plane issuing token-protected subdomain leases.
#[derive(Parser, Debug)]
#[command(name = "lease-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "lease-dns.toml")]
    config: PathBuf,
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn watch_signals(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()).required(false))
        .add_source(
            config::Environment::with_prefix("LEASE_DNS")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("purge.exempt_suffixes"),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.api.listen_addr,
        zone = %config.provider.zone,
        "Starting lease-dns"
    );

    // Setup graceful shutdown
    let cancel = CancellationToken::new();
    tokio::spawn(watch_signals(cancel.clone()));

    // Run API server and purger
    let result = match LeaseServer::new(config).await {
        Ok(server) => server.run(cancel).await,
        Err(e) => Err(e),
    };

    // Shutdown telemetry
    telemetry::shutdown();

    if let Err(e) = result {
        error!("lease-dns server error: {}", e);
        return Err(e.into());
    }

    info!("lease-dns shutdown complete");
    Ok(())
}
