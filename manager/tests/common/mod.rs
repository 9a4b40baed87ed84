// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared setup for the router manager's integration tests

#![allow(dead_code)]

use dropshot::ConfigLogging;
use dropshot::ConfigLoggingLevel;
use std::sync::Arc;
use std::time::Duration;
use vrouter_common::api::ApplianceInstance;
use vrouter_common::api::HypervisorType;
use vrouter_common::typed_uuid::ApplianceUuid;
use vrouter_common::typed_uuid::HostUuid;
use vrouter_common::typed_uuid::NetworkUuid;
use vrouter_common::typed_uuid::NodeUuid;
use vrouter_common::typed_uuid::OwnerUuid;
use vrouter_manager::app::PlacementHints;
use vrouter_manager::app::RedundancyLevel;
use vrouter_manager::config::AgentConfig;
use vrouter_manager::config::DeploymentConfig;
use vrouter_manager::config::NodeConfig;
use vrouter_manager::config::PriorityConfig;
use vrouter_manager::config::ReconcilerConfig;
use vrouter_manager::context::OpContext;
use vrouter_manager::datastore::ApplianceStore;
use vrouter_manager::sim::SimFleet;
use vrouter_manager::Config;
use vrouter_manager::RouterManager;
use vrouter_test_utils::dev::test_setup_log;
use vrouter_test_utils::dev::LogContext;

pub const RELEASE: &str = "Cloud Router Release 4.2.0";
pub const OLD_RELEASE: &str = "Cloud Router Release 4.1.3";

pub fn test_config(node_id: NodeUuid) -> Config {
    Config {
        log: ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::Info },
        node: NodeConfig { id: node_id },
        reconciler: ReconcilerConfig {
            period_secs: Duration::from_secs(60),
            worker_pool_size: 2,
            queue_capacity_multiplier: 4,
        },
        deployment: DeploymentConfig {
            allocation_retries: 2,
            start_retries: 2,
            network_lock_timeout_secs: Duration::from_secs(5),
        },
        priority: PriorityConfig::default(),
        agent: AgentConfig {
            command_timeout_secs: Duration::from_secs(5),
            minimum_version: "4.2.0".parse().unwrap(),
            version_check_enabled: true,
        },
        sim: None,
    }
}

/// A manager running against a zone with a KVM cluster and a XenServer
/// cluster of two hosts each, and one redundant guest network
pub struct RouterTestContext {
    pub logctx: LogContext,
    pub opctx: OpContext,
    pub fleet: SimFleet,
    pub manager: Arc<RouterManager>,
    pub network_id: NetworkUuid,
    pub owner_id: OwnerUuid,
}

impl RouterTestContext {
    pub fn new(test_name: &str) -> RouterTestContext {
        RouterTestContext::with_config(test_name, |_| ())
    }

    pub fn with_config<F>(test_name: &str, adjust: F) -> RouterTestContext
    where
        F: FnOnce(&mut Config),
    {
        RouterTestContext::build(test_name, adjust, |fleet| {
            fleet.add_cluster(HypervisorType::Kvm, 2, 4);
            fleet.add_cluster(HypervisorType::XenServer, 2, 4);
        })
    }

    /// Like [`RouterTestContext::new`], but the zone's clusters are laid
    /// out by `topology` instead.
    pub fn with_topology<T>(test_name: &str, topology: T) -> RouterTestContext
    where
        T: FnOnce(&SimFleet),
    {
        RouterTestContext::build(test_name, |_| (), topology)
    }

    fn build<F, T>(test_name: &str, adjust: F, topology: T) -> RouterTestContext
    where
        F: FnOnce(&mut Config),
        T: FnOnce(&SimFleet),
    {
        let logctx = test_setup_log(test_name);
        let node_id = NodeUuid::new_v4();
        let mut config = test_config(node_id);
        adjust(&mut config);

        let fleet = SimFleet::new(&logctx.log, node_id, config.priority.delta);
        topology(&fleet);
        fleet.set_template(HypervisorType::Kvm, RELEASE);
        fleet.set_template(HypervisorType::XenServer, RELEASE);
        let network_id = fleet.add_network("guest-0", true);

        let manager = Arc::new(RouterManager::new(
            &logctx.log,
            Arc::new(config),
            fleet.collaborators(),
        ));
        let opctx = OpContext::for_tests(logctx.log.clone());
        RouterTestContext {
            logctx,
            opctx,
            fleet,
            manager,
            network_id,
            owner_id: OwnerUuid::new_v4(),
        }
    }

    pub async fn ensure(
        &self,
        network_id: NetworkUuid,
        level: RedundancyLevel,
    ) -> Vec<ApplianceInstance> {
        self.manager
            .appliances_ensure(
                &self.opctx,
                network_id,
                self.owner_id,
                level,
                PlacementHints::default(),
            )
            .await
            .expect("failed to ensure appliances")
    }

    /// Deploys the redundant pair and returns it as (master, backup) by
    /// assigned priority.
    pub async fn ensure_pair(&self) -> (ApplianceInstance, ApplianceInstance) {
        let mut pair = self.ensure(self.network_id, RedundancyLevel::Redundant).await;
        assert_eq!(pair.len(), 2);
        pair.sort_by_key(|a| std::cmp::Reverse(a.priority));
        let backup = pair.pop().unwrap();
        let master = pair.pop().unwrap();
        (master, backup)
    }

    pub async fn fetch(&self, id: ApplianceUuid) -> ApplianceInstance {
        self.manager.datastore().appliance_fetch(&self.opctx, id).await.unwrap()
    }

    pub fn host_of(appliance: &ApplianceInstance) -> HostUuid {
        appliance.host_id().expect("appliance has been placed")
    }

    pub fn cleanup_successful(self) {
        self.logctx.cleanup_successful();
    }
}
