// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task initialization

use super::redundant_status::PendingNetworks;
use super::redundant_status::RedundantNetworkScanner;
use super::redundant_status::StatusUpdateWorkers;
use super::redundant_status::WorkerStats;
use super::Driver;
use super::TaskName;
use crate::app::RouterManager;
use crate::context::OpContext;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Every background activity of a running manager
pub struct BackgroundTasks {
    driver: Driver,
    /// enqueues redundant networks for a status refresh
    pub task_redundant_network_scanner: TaskName,
    workers: StatusUpdateWorkers,
}

impl BackgroundTasks {
    /// Starts the background tasks and the status update workers.
    ///
    /// `opctx` should be a background context; each task and worker gets a
    /// child of it.
    pub fn start(
        manager: &Arc<RouterManager>,
        opctx: &OpContext,
    ) -> BackgroundTasks {
        let config = &manager.config().reconciler;
        let (tx, rx) = flume::bounded(config.queue_capacity());
        let pending = Arc::new(PendingNetworks::new());

        let workers = StatusUpdateWorkers::start(
            Arc::clone(manager),
            opctx,
            rx,
            Arc::clone(&pending),
            config.worker_pool_size,
        );

        let mut driver = Driver::new();
        let task_redundant_network_scanner = driver.register(
            String::from("redundant_network_scanner"),
            String::from(
                "enqueues every redundant guest network for a status refresh",
            ),
            config.period_secs,
            Box::new(RedundantNetworkScanner::new(
                Arc::clone(manager.catalog()),
                tx,
                pending,
            )),
            opctx.child(BTreeMap::new()),
        );

        info!(opctx.log, "started background tasks";
            "workers" => config.worker_pool_size,
            "queue_capacity" => config.queue_capacity(),
            "period" => ?config.period_secs,
        );

        BackgroundTasks { driver, task_redundant_network_scanner, workers }
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Requests an immediate scan of the redundant networks.
    pub fn activate_scanner(&self) {
        self.driver.activate(&self.task_redundant_network_scanner);
    }

    pub fn worker_stats(&self) -> &Arc<WorkerStats> {
        self.workers.stats()
    }

    /// Stops scanning, then waits for the workers to finish the passes they
    /// are in the middle of.
    pub async fn shutdown(self) {
        let BackgroundTasks { driver, workers, .. } = self;
        drop(driver);
        workers.shutdown().await;
    }
}
