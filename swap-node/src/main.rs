#![warn(unused_extern_crates, missing_debug_implementations, rust_2018_idioms)]
#![forbid(unsafe_code)]
use anyhow::Context;
use clap::Parser;
use htlc_swap_protocol::{
    api::{routes, SwapService},
    clock::{Clock, SystemClock},
    config::{LedgerMode, SystemConfig},
    cross_chain::{SwapCoordinator, SwapSupervisor},
    onchain::Ledgers,
    registry::{storage::JsonFileStorage, SwapRegistry},
};
use std::sync::Arc;
use tokio::sync::watch;

mod cli;
mod logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = cli::Options::parse();

    let mut config = match &options.config {
        Some(path) => SystemConfig::from_file(path)?,
        None => SystemConfig::default(),
    };
    config.apply_env_overrides();
    if options.simulate {
        config.ledger_mode = LedgerMode::Simulated;
    }
    if let Some(listen) = options.listen {
        config.http.listen = listen;
    }
    if let Some(level) = options.log_level {
        config.logging.level = level;
    }

    if options.dump_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    logging::set_up_logging(config.logging.level)?;
    config.validate()?;
    log::info!(
        "Starting swap-node {} with {} ledgers",
        env!("CARGO_PKG_VERSION"),
        config.ledger_mode.as_str()
    );

    let registry = Arc::new(match &config.registry.snapshot_path {
        Some(path) => {
            log::info!("Loading swap registry from {}", path.display());
            SwapRegistry::new(Box::new(JsonFileStorage::new(path)))
                .with_context(|| format!("failed to load registry from {}", path.display()))?
        }
        None => SwapRegistry::in_memory(),
    });
    log::info!("{} swaps loaded", registry.len());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledgers = Ledgers::from_config(&config, Arc::clone(&clock))?;
    let coordinator = Arc::new(SwapCoordinator::new(
        registry,
        ledgers,
        Arc::clone(&clock),
        &config,
    ));
    let service = Arc::new(SwapService::new(Arc::clone(&coordinator), clock, &config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = SwapSupervisor::new(coordinator, config.coordinator.poll_interval);
    let supervisor = tokio::spawn(supervisor.run(shutdown_rx.clone()));

    let mut server_shutdown = shutdown_rx;
    let (listen_addr, server) = warp::serve(routes::create(service))
        .try_bind_with_graceful_shutdown(config.http.listen, async move {
            let _ = server_shutdown.changed().await;
        })
        .with_context(|| format!("failed to bind {}", config.http.listen))?;
    log::info!("Starting HTTP server on {}", listen_addr);
    let server = tokio::spawn(server);

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    shutdown_tx.send(true)?;

    server.await?;
    supervisor.await?;
    Ok(())
}
