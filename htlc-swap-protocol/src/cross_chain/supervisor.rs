// Keeps one polling worker alive per open swap

use crate::cross_chain::swap_coordinator::SwapCoordinator;
use crate::data_structures::SwapId;
use crate::error::SwapError;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Scans the registry every `poll_interval` and starts a worker for each
/// non-terminal swap that does not have one. Workers stop when their swap is
/// terminal or when shutdown is signalled.
pub struct SwapSupervisor {
    coordinator: Arc<SwapCoordinator>,
    poll_interval: Duration,
    workers: HashMap<SwapId, JoinHandle<()>>,
}

impl SwapSupervisor {
    pub fn new(coordinator: Arc<SwapCoordinator>, poll_interval: Duration) -> Self {
        SwapSupervisor {
            coordinator,
            poll_interval,
            workers: HashMap::new(),
        }
    }

    pub fn active_workers(&self) -> usize {
        self.workers.values().filter(|w| !w.is_finished()).count()
    }

    /// Starts workers for swaps that lack one. Returns how many were started.
    pub fn spawn_missing_workers(&mut self, shutdown: &watch::Receiver<bool>) -> usize {
        self.workers.retain(|_, worker| !worker.is_finished());
        let mut started = 0;
        for swap_id in self.coordinator.registry().non_terminal_ids() {
            if self.workers.contains_key(&swap_id) {
                continue;
            }
            debug!("[Supervisor] Starting worker for swap {}", swap_id);
            let worker = tokio::spawn(run_worker(
                Arc::clone(&self.coordinator),
                swap_id.clone(),
                self.poll_interval,
                shutdown.clone(),
            ));
            self.workers.insert(swap_id, worker);
            started += 1;
        }
        started
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("[Supervisor] Polling every {:?}", self.poll_interval);
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.spawn_missing_workers(&shutdown);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("[Supervisor] Stopping {} workers", self.active_workers());
        for (swap_id, worker) in self.workers.drain() {
            if let Err(err) = worker.await {
                warn!("[Supervisor] Worker for {} ended abnormally: {}", swap_id, err);
            }
        }
    }
}

async fn run_worker(
    coordinator: Arc<SwapCoordinator>,
    swap_id: SwapId,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        match coordinator.process_swap(&swap_id).await {
            Ok(outcome) if outcome.status.is_terminal() => {
                info!("[Supervisor] Swap {} finished as {}", swap_id, outcome.status);
                break;
            }
            Ok(outcome) => debug!("[Supervisor] Swap {}: {}", swap_id, outcome.message),
            Err(SwapError::NotFound(_)) => break,
            Err(err) => warn!("[Supervisor] Pass over {} failed: {}", swap_id, err),
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
