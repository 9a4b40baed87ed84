// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated fleet: placement catalog, compute orchestration and host
//! agents backed by one in-memory model of a zone
//!
//! The pieces share a [`FleetState`], so a router the simulated compute
//! layer boots is immediately visible to the simulated agents, which answer
//! status checks the way a pair of VRRP speakers would.  Knobs on each
//! piece inject the failures the manager has to cope with.

mod agent;
mod catalog;
mod compute;

pub use agent::SimAgent;
pub use catalog::SimCatalog;
pub use compute::SimCompute;

use crate::alert::Alert;
use crate::alert::AlertKind;
use crate::alert::AlertSink;
use crate::app::Collaborators;
use crate::config::SimConfig;
use crate::datastore::InMemoryDataStore;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use vrouter_common::api::GuestNetwork;
use vrouter_common::api::Host;
use vrouter_common::api::HostStatus;
use vrouter_common::api::HypervisorType;
use vrouter_common::api::RouterTemplate;
use vrouter_common::typed_uuid::ApplianceUuid;
use vrouter_common::typed_uuid::ClusterUuid;
use vrouter_common::typed_uuid::HostUuid;
use vrouter_common::typed_uuid::NetworkUuid;
use vrouter_common::typed_uuid::NodeUuid;
use vrouter_common::typed_uuid::PodUuid;
use vrouter_common::typed_uuid::StoragePoolUuid;
use vrouter_common::typed_uuid::ZoneUuid;

pub(crate) struct SimHost {
    host: Host,
    storage_pool_id: StoragePoolUuid,
    /// how many routers may run here at once
    capacity: usize,
    /// whether the host's agent answers; independent of `host.status`
    agent_reachable: bool,
}

pub(crate) struct SimCluster {
    id: ClusterUuid,
    pod_id: PodUuid,
    hypervisor: HypervisorType,
}

/// A router VM as the hypervisors see it
pub(crate) struct SimVm {
    name: String,
    network_id: Option<NetworkUuid>,
    host_id: Option<HostUuid>,
    running: bool,
    is_redundant: bool,
    priority: u32,
    bumped: bool,
    /// kinds of configuration pushed to the router, in order
    configured: Vec<String>,
}

/// Everything the simulated pieces share
pub(crate) struct FleetState {
    zone_id: ZoneUuid,
    node_id: NodeUuid,
    priority_delta: u32,
    default_hypervisor: Option<HypervisorType>,
    clusters: Vec<SimCluster>,
    hosts: Vec<SimHost>,
    templates: BTreeMap<HypervisorType, RouterTemplate>,
    networks: BTreeMap<NetworkUuid, GuestNetwork>,
    vms: BTreeMap<ApplianceUuid, SimVm>,
    next_address: u32,
}

impl FleetState {
    fn host(&self, host_id: HostUuid) -> Option<&SimHost> {
        self.hosts.iter().find(|h| h.host.id == host_id)
    }

    fn host_mut(&mut self, host_id: HostUuid) -> Option<&mut SimHost> {
        self.hosts.iter_mut().find(|h| h.host.id == host_id)
    }

    fn running_on(&self, host_id: HostUuid) -> usize {
        self.vms
            .values()
            .filter(|vm| vm.running && vm.host_id == Some(host_id))
            .count()
    }

    /// Whether a router on `host_id` can currently exchange VRRP
    /// advertisements with its peer.
    fn host_reachable(&self, host_id: Option<HostUuid>) -> bool {
        host_id.and_then(|id| self.host(id)).map_or(false, |h| {
            h.agent_reachable && h.host.status == HostStatus::Up
        })
    }
}

/// A simulated zone and the collaborators that expose it
pub struct SimFleet {
    state: Arc<Mutex<FleetState>>,
    pub catalog: Arc<SimCatalog>,
    pub compute: Arc<SimCompute>,
    pub agent: Arc<SimAgent>,
    pub datastore: Arc<InMemoryDataStore>,
    pub alerts: Arc<RecordingAlertSink>,
}

impl SimFleet {
    /// An empty zone whose hosts are attached to management node `node_id`.
    pub fn new(log: &Logger, node_id: NodeUuid, priority_delta: u32) -> SimFleet {
        let state = Arc::new(Mutex::new(FleetState {
            zone_id: ZoneUuid::new_v4(),
            node_id,
            priority_delta,
            default_hypervisor: None,
            clusters: Vec::new(),
            hosts: Vec::new(),
            templates: BTreeMap::new(),
            networks: BTreeMap::new(),
            vms: BTreeMap::new(),
            next_address: 1,
        }));
        SimFleet {
            catalog: Arc::new(SimCatalog::new(Arc::clone(&state))),
            compute: Arc::new(SimCompute::new(Arc::clone(&state))),
            agent: Arc::new(SimAgent::new(Arc::clone(&state))),
            datastore: Arc::new(InMemoryDataStore::new()),
            alerts: Arc::new(RecordingAlertSink::new(log)),
            state,
        }
    }

    /// Builds the zone described by a `sim` config section.  Every
    /// configured hypervisor gets a router template at `template_version`.
    pub fn from_config(
        log: &Logger,
        node_id: NodeUuid,
        priority_delta: u32,
        config: &SimConfig,
    ) -> SimFleet {
        let fleet = SimFleet::new(log, node_id, priority_delta);
        for cluster in &config.clusters {
            fleet.add_cluster(cluster.hypervisor, cluster.hosts, cluster.host_capacity);
            fleet.set_template(cluster.hypervisor, &config.template_version);
        }
        for i in 0..config.redundant_networks {
            fleet.add_network(&format!("guest-{}", i), true);
        }
        fleet
    }

    /// Collaborators for a manager running against this fleet, with alerts
    /// recorded by [`SimFleet::alerts`].
    pub fn collaborators(&self) -> Collaborators {
        self.collaborators_with_alerts(self.alerts.clone())
    }

    pub fn collaborators_with_alerts(
        &self,
        alerts: Arc<dyn AlertSink>,
    ) -> Collaborators {
        Collaborators {
            datastore: self.datastore.clone(),
            catalog: self.catalog.clone(),
            compute: self.compute.clone(),
            transport: self.agent.clone(),
            alerts,
        }
    }

    pub fn zone_id(&self) -> ZoneUuid {
        self.state.lock().unwrap().zone_id
    }

    /// Adds a cluster of `hosts` hosts in a pod of its own.
    pub fn add_cluster(
        &self,
        hypervisor: HypervisorType,
        hosts: usize,
        capacity: usize,
    ) -> ClusterUuid {
        self.add_cluster_to_pod(PodUuid::new_v4(), hypervisor, hosts, capacity)
    }

    /// Adds a cluster of `hosts` hosts to `pod_id`, which may already hold
    /// other clusters.
    pub fn add_cluster_to_pod(
        &self,
        pod_id: PodUuid,
        hypervisor: HypervisorType,
        hosts: usize,
        capacity: usize,
    ) -> ClusterUuid {
        let mut state = self.state.lock().unwrap();
        let cluster =
            SimCluster { id: ClusterUuid::new_v4(), pod_id, hypervisor };
        for i in 0..hosts {
            let host = Host {
                id: HostUuid::new_v4(),
                name: format!("{}-{}-{}", hypervisor, state.clusters.len(), i),
                zone_id: state.zone_id,
                pod_id: cluster.pod_id,
                cluster_id: cluster.id,
                hypervisor,
                status: HostStatus::Up,
                management_node: Some(state.node_id),
            };
            state.hosts.push(SimHost {
                host,
                storage_pool_id: StoragePoolUuid::new_v4(),
                capacity,
                agent_reachable: true,
            });
        }
        let id = cluster.id;
        state.clusters.push(cluster);
        id
    }

    pub fn set_template(&self, hypervisor: HypervisorType, version: &str) {
        let mut state = self.state.lock().unwrap();
        state.templates.insert(
            hypervisor,
            RouterTemplate {
                name: format!("router-{}", hypervisor),
                hypervisor,
                version: version.to_string(),
            },
        );
    }

    pub fn set_default_hypervisor(&self, hypervisor: Option<HypervisorType>) {
        self.state.lock().unwrap().default_hypervisor = hypervisor;
    }

    pub fn add_network(&self, name: &str, is_redundant: bool) -> NetworkUuid {
        let mut state = self.state.lock().unwrap();
        let network = GuestNetwork {
            id: NetworkUuid::new_v4(),
            name: name.to_string(),
            zone_id: state.zone_id,
            is_redundant,
        };
        let id = network.id;
        state.networks.insert(id, network);
        id
    }

    pub fn hosts(&self) -> Vec<Host> {
        self.state.lock().unwrap().hosts.iter().map(|h| h.host.clone()).collect()
    }

    /// Takes the host out of the zone entirely.  Routers placed on it keep
    /// pointing at it.
    pub fn remove_host(&self, host_id: HostUuid) {
        self.state.lock().unwrap().hosts.retain(|h| h.host.id != host_id);
    }

    pub fn host_storage_pool(
        &self,
        host_id: HostUuid,
    ) -> Option<StoragePoolUuid> {
        self.state.lock().unwrap().host(host_id).map(|h| h.storage_pool_id)
    }

    /// Moves the host's local storage onto `pool`, which other hosts may
    /// share.
    pub fn set_host_storage_pool(
        &self,
        host_id: HostUuid,
        pool: StoragePoolUuid,
    ) {
        if let Some(h) = self.state.lock().unwrap().host_mut(host_id) {
            h.storage_pool_id = pool;
        }
    }

    pub fn set_host_status(&self, host_id: HostUuid, status: HostStatus) {
        if let Some(h) = self.state.lock().unwrap().host_mut(host_id) {
            h.host.status = status;
        }
    }

    pub fn set_host_management_node(
        &self,
        host_id: HostUuid,
        node_id: Option<NodeUuid>,
    ) {
        if let Some(h) = self.state.lock().unwrap().host_mut(host_id) {
            h.host.management_node = node_id;
        }
    }

    /// Makes the agent on `host_id` stop (or resume) answering.  Routers on
    /// the host lose contact with their peers while it is unreachable.
    pub fn set_agent_reachable(&self, host_id: HostUuid, reachable: bool) {
        if let Some(h) = self.state.lock().unwrap().host_mut(host_id) {
            h.agent_reachable = reachable;
        }
    }

    /// Whether the simulated hypervisor is running `id`.
    pub fn vm_running(&self, id: ApplianceUuid) -> bool {
        self.state.lock().unwrap().vms.get(&id).map_or(false, |vm| vm.running)
    }

    /// The priority the router was booted with and whether it has been
    /// bumped since.
    pub fn vm_priority(&self, id: ApplianceUuid) -> Option<(u32, bool)> {
        self.state
            .lock()
            .unwrap()
            .vms
            .get(&id)
            .map(|vm| (vm.priority, vm.bumped))
    }

    /// Kinds of configuration pushed to the router.
    pub fn vm_configured(&self, id: ApplianceUuid) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .vms
            .get(&id)
            .map(|vm| vm.configured.clone())
            .unwrap_or_default()
    }
}

/// [`AlertSink`] that logs and keeps every alert
pub struct RecordingAlertSink {
    log: Logger,
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new(log: &Logger) -> RecordingAlertSink {
        RecordingAlertSink {
            log: log.new(o!("component" => "RecordingAlertSink")),
            alerts: Mutex::new(Vec::new()),
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts.lock().unwrap().iter().filter(|a| a.kind == kind).count()
    }

    pub fn clear(&self) {
        self.alerts.lock().unwrap().clear();
    }
}

impl AlertSink for RecordingAlertSink {
    fn send_alert(&self, alert: Alert) {
        info!(self.log, "alert"; "kind" => ?alert.kind, "subject" => &alert.subject);
        self.alerts.lock().unwrap().push(alert);
    }
}
