use std::{net::TcpListener, thread, time::Duration};

use anyhow::Context;
use milestone_core::{config::Config, server, server::AppState, verification};
use tokio::{runtime::Builder, signal};
use tokio_util::sync::CancellationToken;

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env()?;
    log::info!("proof data directory: {}", config.data_dir.display());

    // Create a shared shutdown token for coordinated shutdown
    let shutdown_token = CancellationToken::new();

    let (state, db_threads) = AppState::open(&config.data_dir, config.tx_status_ttl)
        .context("failed to start proof databases")?;

    let registry = state.tx_status.clone();
    let sweep_every = config.tx_status_sweep;
    let shutdown_token_sweeper = shutdown_token.clone();
    let sweeper_handle = thread::spawn(move || {
        let rt = match Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                log::error!("failed to build sweeper runtime: {}", e);
                return;
            }
        };
        rt.block_on(verification::run_sweeper(
            registry,
            sweep_every,
            shutdown_token_sweeper,
        ));
    });

    let listener = TcpListener::bind(&config.bind)
        .with_context(|| format!("failed to bind {}", config.bind))?;
    log::info!("starting HTTP server at http://{}", config.bind);
    let server_thread = server::spawn_http_thread(
        state.clone(),
        listener,
        config.http_workers,
        shutdown_token.clone(),
    )?;

    // Wait for SIGINT, or for a component to cancel on fatal error
    let rt_main = Builder::new_current_thread().enable_all().build()?;
    rt_main.block_on(async {
        tokio::select! {
            result = signal::ctrl_c() => match result {
                Ok(()) => log::info!("SIGINT received; starting shutdown..."),
                Err(err) => log::error!("Unable to listen for shutdown signal: {}", err),
            },
            _ = shutdown_token.cancelled() => {
                log::warn!("shutdown requested by a failing component");
            }
        }
    });
    shutdown_token.cancel();

    log::info!("Waiting for threads to shutdown...");

    thread::spawn(|| {
        thread::sleep(Duration::from_secs(10));
        log::warn!("Shutdown timeout reached, forcing exit");
        std::process::exit(0);
    });

    if let Err(e) = server_thread.join() {
        log::error!("HTTP server thread panicked: {:?}", e);
    }
    if let Err(e) = sweeper_handle.join() {
        log::error!("sweeper thread panicked: {:?}", e);
    }

    state.shutdown();
    drop(state);
    for handle in db_threads {
        if let Err(e) = handle.join() {
            log::error!("proof database thread panicked: {:?}", e);
        }
    }

    log::info!("All threads stopped. Exiting.");
    Ok(())
}
