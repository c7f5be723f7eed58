use std::{
    net::TcpListener,
    path::Path,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use actix_web::{dev::Server, web, App, HttpServer};
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;

use crate::{
    frontend,
    proofdb::{ProofDb, ProofDbHandle},
    store::{Collection, FlatFileStore},
    verification::TxStatusRegistry,
};

/// Shared by every HTTP worker.
#[derive(Clone, Debug)]
pub struct AppState {
    pub proofs: ProofDbHandle,
    pub milestone_proofs: ProofDbHandle,
    pub tx_status: Arc<TxStatusRegistry>,
}

impl AppState {
    /// Starts one database thread per collection under `data_dir`.
    pub fn open(
        data_dir: &Path,
        tx_status_ttl: Duration,
    ) -> std::io::Result<(Self, Vec<JoinHandle<()>>)> {
        let (proofs, proofs_thread) =
            ProofDb::spawn(FlatFileStore::in_dir(data_dir, Collection::Proofs))?;
        let (milestone_proofs, milestone_thread) =
            ProofDb::spawn(FlatFileStore::in_dir(data_dir, Collection::MilestoneProofs))?;

        let state = AppState {
            proofs,
            milestone_proofs,
            tx_status: Arc::new(TxStatusRegistry::new(tx_status_ttl)),
        };
        Ok((state, vec![proofs_thread, milestone_thread]))
    }

    pub fn shutdown(&self) {
        self.proofs.shutdown();
        self.milestone_proofs.shutdown();
    }
}

pub fn http_server(
    state: AppState,
    listener: TcpListener,
    workers: usize,
) -> std::io::Result<Server> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(frontend::json_config())
            .configure(frontend::configure)
    })
    .workers(workers)
    .disable_signals()
    .shutdown_timeout(5)
    .listen(listener)?
    .run();
    Ok(server)
}

/// Runs the HTTP server on its own thread and runtime until `shutdown` fires.
pub fn spawn_http_thread(
    state: AppState,
    listener: TcpListener,
    workers: usize,
    shutdown: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("http-server".into())
        .spawn(move || {
            let rt = match Builder::new_multi_thread()
                .worker_threads(workers.max(1))
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("failed to build HTTP runtime: {}", e);
                    shutdown.cancel();
                    return;
                }
            };

            rt.block_on(async move {
                let server = match http_server(state, listener, workers) {
                    Ok(server) => server,
                    Err(e) => {
                        log::error!("HTTP server failed to start: {}", e);
                        shutdown.cancel();
                        return;
                    }
                };

                let handle = server.handle();
                let stop_token = shutdown.clone();
                tokio::spawn(async move {
                    stop_token.cancelled().await;
                    log::info!("HTTP server received shutdown signal");
                    handle.stop(true).await;
                });

                if let Err(e) = server.await {
                    log::error!("HTTP server error: {}", e);
                    shutdown.cancel();
                }
            });

            log::info!("HTTP server stopped");
        })
}
