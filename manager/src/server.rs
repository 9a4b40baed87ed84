// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A router manager running against the simulated fleet

use crate::alert::LogAlertSink;
use crate::app::background::BackgroundTasks;
use crate::app::PlacementHints;
use crate::app::RedundancyLevel;
use crate::app::RouterManager;
use crate::config::Config;
use crate::context::OpContext;
use crate::sim::SimFleet;
use slog::Logger;
use std::sync::Arc;
use vrouter_common::api::Error;
use vrouter_common::typed_uuid::OwnerUuid;

/// A manager, the simulated fleet it manages, and its background tasks
pub struct SimServer {
    pub manager: Arc<RouterManager>,
    pub fleet: SimFleet,
    background: BackgroundTasks,
}

impl SimServer {
    /// Builds the fleet described by the config's `sim` section, deploys a
    /// redundant pair on each of its networks and starts reconciling them.
    pub async fn start(log: &Logger, config: Config) -> Result<SimServer, Error> {
        let sim = config.sim.clone().ok_or_else(|| {
            Error::invalid_request("configuration has no [sim] section")
        })?;
        let fleet = SimFleet::from_config(
            log,
            config.node.id,
            config.priority.delta,
            &sim,
        );

        let alerts = Arc::new(LogAlertSink::new(log));
        let manager = Arc::new(RouterManager::new(
            log,
            Arc::new(config),
            fleet.collaborators_with_alerts(alerts),
        ));

        let opctx = OpContext::for_external_request(
            log.new(o!("component" => "SimServer")),
        );
        let owner_id = OwnerUuid::new_v4();
        let networks = manager.catalog().network_list_redundant().await?;
        for network_id in &networks {
            let appliances = manager
                .appliances_ensure(
                    &opctx,
                    *network_id,
                    owner_id,
                    RedundancyLevel::Redundant,
                    PlacementHints::default(),
                )
                .await?;
            info!(opctx.log, "network is served";
                "network_id" => %network_id,
                "appliances" => appliances.len(),
            );
        }

        let background = BackgroundTasks::start(
            &manager,
            &OpContext::for_background(log.new(o!("component" => "BackgroundTasks"))),
        );
        Ok(SimServer { manager, fleet, background })
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    pub async fn shutdown(self) {
        self.background.shutdown().await;
    }
}
