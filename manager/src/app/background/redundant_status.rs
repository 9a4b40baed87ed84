// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodic refresh of redundant router state
//!
//! [`RedundantNetworkScanner`] is a background task that puts every
//! redundant network on a bounded queue.  It never waits for room: when
//! the queue is full the rest of the scan is dropped and picked up by the
//! next one.  [`StatusUpdateWorkers`] is a fixed pool of tokio tasks that
//! take networks off the queue and run a reconciliation pass on each.
//!
//! A network is queued at most once: it stays in [`PendingNetworks`] from
//! the moment it is enqueued until its pass finishes, and scans skip it in
//! the meantime.  Two workers never reconcile the same pair at once.

use super::BackgroundTask;
use crate::app::RouterManager;
use crate::context::OpContext;
use crate::interfaces::PlacementCatalog;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use vrouter_common::typed_uuid::NetworkUuid;

/// Networks that are queued or being reconciled
#[derive(Debug, Default)]
pub struct PendingNetworks {
    networks: Mutex<BTreeSet<NetworkUuid>>,
}

impl PendingNetworks {
    pub fn new() -> PendingNetworks {
        PendingNetworks::default()
    }

    /// Returns false if the network is already pending.
    fn claim(&self, network_id: NetworkUuid) -> bool {
        self.networks.lock().unwrap().insert(network_id)
    }

    fn release(&self, network_id: NetworkUuid) {
        self.networks.lock().unwrap().remove(&network_id);
    }

    pub fn contains(&self, network_id: NetworkUuid) -> bool {
        self.networks.lock().unwrap().contains(&network_id)
    }

    pub fn len(&self) -> usize {
        self.networks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Enqueues every redundant network for a status refresh
pub struct RedundantNetworkScanner {
    catalog: Arc<dyn PlacementCatalog>,
    tx: flume::Sender<NetworkUuid>,
    pending: Arc<PendingNetworks>,
}

impl RedundantNetworkScanner {
    pub fn new(
        catalog: Arc<dyn PlacementCatalog>,
        tx: flume::Sender<NetworkUuid>,
        pending: Arc<PendingNetworks>,
    ) -> RedundantNetworkScanner {
        RedundantNetworkScanner { catalog, tx, pending }
    }
}

impl BackgroundTask for RedundantNetworkScanner {
    fn activate<'a>(
        &'a mut self,
        opctx: &'a OpContext,
    ) -> BoxFuture<'a, serde_json::Value> {
        async {
            let networks = match self.catalog.network_list_redundant().await {
                Ok(networks) => networks,
                Err(error) => {
                    warn!(opctx.log, "failed to list redundant networks";
                        "error" => %error,
                    );
                    return json!({ "error": error.to_string() });
                }
            };

            let mut enqueued = 0;
            let mut skipped = 0;
            for network_id in &networks {
                if !self.pending.claim(*network_id) {
                    trace!(opctx.log, "network is already pending";
                        "network_id" => %network_id,
                    );
                    skipped += 1;
                    continue;
                }
                match self.tx.try_send(*network_id) {
                    Ok(()) => enqueued += 1,
                    Err(flume::TrySendError::Full(_)) => {
                        self.pending.release(*network_id);
                        warn!(opctx.log, "status update queue is full, \
                                          dropping the rest of this scan";
                            "network_id" => %network_id,
                            "capacity" => ?self.tx.capacity(),
                        );
                        break;
                    }
                    Err(flume::TrySendError::Disconnected(_)) => {
                        self.pending.release(*network_id);
                        error!(opctx.log, "status update workers are gone");
                        break;
                    }
                }
            }
            let dropped = networks.len() - enqueued - skipped;
            if dropped == 0 {
                debug!(opctx.log, "enqueued redundant networks";
                    "count" => enqueued,
                    "skipped" => skipped,
                );
            }

            json!({
                "networks": networks.len(),
                "enqueued": enqueued,
                "skipped": skipped,
                "dropped": dropped,
            })
        }
        .boxed()
    }
}

/// Counters shared by the workers of a pool
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    /// Networks whose reconciliation pass has finished, successfully or not.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Fixed pool of workers draining the status update queue
pub struct StatusUpdateWorkers {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    stats: Arc<WorkerStats>,
}

impl StatusUpdateWorkers {
    pub fn start(
        manager: Arc<RouterManager>,
        opctx: &OpContext,
        rx: flume::Receiver<NetworkUuid>,
        pending: Arc<PendingNetworks>,
        count: usize,
    ) -> StatusUpdateWorkers {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(WorkerStats::default());
        let handles = (0..count)
            .map(|i| {
                let worker = Worker {
                    manager: Arc::clone(&manager),
                    opctx: opctx.child(BTreeMap::from([(
                        String::from("status_worker"),
                        i.to_string(),
                    )])),
                    rx: rx.clone(),
                    pending: Arc::clone(&pending),
                    shutdown_rx: shutdown_rx.clone(),
                    stats: Arc::clone(&stats),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        StatusUpdateWorkers { handles, shutdown_tx, stats }
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    /// Stops the workers.  A worker in the middle of a pass finishes it
    /// first; networks still queued are abandoned.
    pub async fn shutdown(self) {
        self.shutdown_tx.send_replace(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

struct Worker {
    manager: Arc<RouterManager>,
    opctx: OpContext,
    rx: flume::Receiver<NetworkUuid>,
    pending: Arc<PendingNetworks>,
    shutdown_rx: watch::Receiver<bool>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            let network_id = tokio::select! {
                biased;
                changed = self.shutdown_rx.changed() => match changed {
                    Ok(()) => continue,
                    Err(_) => break,
                },
                item = self.rx.recv_async() => match item {
                    Ok(network_id) => network_id,
                    Err(flume::RecvError::Disconnected) => break,
                },
            };

            match self
                .manager
                .reconcile_redundant_network(&self.opctx, network_id)
                .await
            {
                Ok(outcome) => {
                    trace!(self.opctx.log, "reconciled network";
                        "network_id" => %network_id,
                        "outcome" => ?outcome,
                    );
                }
                Err(error) => {
                    self.stats.failed.fetch_add(1, Ordering::SeqCst);
                    warn!(self.opctx.log, "failed to reconcile network";
                        "network_id" => %network_id,
                        "error" => %error,
                    );
                }
            }
            self.pending.release(network_id);
            self.stats.processed.fetch_add(1, Ordering::SeqCst);
        }
        debug!(self.opctx.log, "status update worker exiting");
    }
}
