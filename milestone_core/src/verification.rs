use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tokio::{sync::RwLock, time::interval};
use tokio_util::sync::CancellationToken;

use crate::record::{now_millis, ProofStatus};

#[derive(Debug, Clone)]
struct Entry {
    status: ProofStatus,
    reported_at: i64,
    recorded: Instant,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TxStatusReport {
    pub transaction_hash: String,
    pub status: ProofStatus,
    pub reported_at: i64,
}

/// Last reported status per transaction hash, kept for `ttl`.
#[derive(Debug)]
pub struct TxStatusRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl TxStatusRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn record(&self, transaction_hash: &str, status: ProofStatus) {
        self.record_at(transaction_hash, status, Instant::now()).await
    }

    pub async fn record_at(&self, transaction_hash: &str, status: ProofStatus, now: Instant) {
        let entry = Entry {
            status,
            reported_at: now_millis(),
            recorded: now,
        };
        self.entries
            .write()
            .await
            .insert(transaction_hash.to_string(), entry);
    }

    pub async fn get(&self, transaction_hash: &str) -> Option<TxStatusReport> {
        self.get_at(transaction_hash, Instant::now()).await
    }

    /// Expired entries are reported as absent even before a sweep removes them.
    pub async fn get_at(&self, transaction_hash: &str, now: Instant) -> Option<TxStatusReport> {
        let entries = self.entries.read().await;
        let entry = entries.get(transaction_hash)?;
        if now.saturating_duration_since(entry.recorded) >= self.ttl {
            return None;
        }
        Some(TxStatusReport {
            transaction_hash: transaction_hash.to_string(),
            status: entry.status,
            reported_at: entry.reported_at,
        })
    }

    /// Drops expired entries and returns how many were removed.
    pub async fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.recorded) < self.ttl);
        before - entries.len()
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Periodically sweeps `registry` until `shutdown` is cancelled.
pub async fn run_sweeper(
    registry: Arc<TxStatusRegistry>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(every);
    log::info!("tx status sweeper starting ({}s intervals)", every.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = registry.sweep().await;
                if removed > 0 {
                    log::debug!("swept {removed} expired tx status entries");
                }
            }
            _ = shutdown.cancelled() => {
                log::info!("tx status sweeper received shutdown signal");
                break;
            }
        }
    }

    log::info!("tx status sweeper stopped");
}
