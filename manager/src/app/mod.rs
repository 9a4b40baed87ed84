// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Router manager application-level facilities

use crate::alert::AlertSink;
use crate::config::Config;
use crate::datastore::ApplianceStore;
use crate::interfaces::ComputeOrchestrator;
use crate::interfaces::PlacementCatalog;
use slog::Logger;
use std::sync::Arc;
use vrouter_agent_client::AgentTransport;
use vrouter_common::typed_uuid::NodeUuid;

pub mod background;
mod deployment;
mod dispatch;
mod lifecycle;
mod locks;
mod reconcile;
mod redundancy;
mod rules;

pub use deployment::PlacementHints;
pub use deployment::RedundancyLevel;
pub use dispatch::CommandDispatcher;
pub use dispatch::VersionGate;
pub use lifecycle::UpgradeParams;
pub use lifecycle::UpgradeResult;
pub use lifecycle::UpgradeScope;
pub use locks::NetworkLocks;
pub use reconcile::PollOutcome;
pub use reconcile::ReconcileOutcome;
pub use reconcile::SkipReason;
pub use redundancy::PriorityPolicy;
pub use redundancy::SanityVerdict;

/// The external systems a [`RouterManager`] works through
#[derive(Clone)]
pub struct Collaborators {
    pub datastore: Arc<dyn ApplianceStore>,
    pub catalog: Arc<dyn PlacementCatalog>,
    pub compute: Arc<dyn ComputeOrchestrator>,
    pub transport: Arc<dyn AgentTransport>,
    pub alerts: Arc<dyn AlertSink>,
}

/// Manages the redundant virtual router fleet
///
/// Operations are spread across the submodules of `app`: deployment,
/// lifecycle, redundancy checks, rule fan-out and the reconciliation pass.
/// Background tasks driving the periodic work live in `app::background`.
pub struct RouterManager {
    log: Logger,
    node_id: NodeUuid,
    config: Arc<Config>,
    datastore: Arc<dyn ApplianceStore>,
    catalog: Arc<dyn PlacementCatalog>,
    compute: Arc<dyn ComputeOrchestrator>,
    alerts: Arc<dyn AlertSink>,
    dispatcher: CommandDispatcher,
    priority: PriorityPolicy,
    network_locks: NetworkLocks,
}

impl RouterManager {
    pub fn new(
        log: &Logger,
        config: Arc<Config>,
        collaborators: Collaborators,
    ) -> RouterManager {
        let log = log.new(o!("component" => "RouterManager"));
        let dispatcher = CommandDispatcher::new(
            collaborators.transport,
            VersionGate::from_config(&config.agent),
            config.agent.command_timeout_secs,
        );
        RouterManager {
            node_id: config.node.id,
            priority: PriorityPolicy::from(&config.priority),
            network_locks: NetworkLocks::new(
                config.deployment.network_lock_timeout_secs,
            ),
            datastore: collaborators.datastore,
            catalog: collaborators.catalog,
            compute: collaborators.compute,
            alerts: collaborators.alerts,
            dispatcher,
            config,
            log,
        }
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn node_id(&self) -> NodeUuid {
        self.node_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn datastore(&self) -> &Arc<dyn ApplianceStore> {
        &self.datastore
    }

    pub fn catalog(&self) -> &Arc<dyn PlacementCatalog> {
        &self.catalog
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn priority_policy(&self) -> &PriorityPolicy {
        &self.priority
    }
}
