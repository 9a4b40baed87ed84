// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Guest networks, hosts and placement

use super::HypervisorType;
use crate::typed_uuid::ClusterUuid;
use crate::typed_uuid::HostUuid;
use crate::typed_uuid::NetworkUuid;
use crate::typed_uuid::NodeUuid;
use crate::typed_uuid::PodUuid;
use crate::typed_uuid::StoragePoolUuid;
use crate::typed_uuid::ZoneUuid;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Tenant L3 domain served by one or two appliances
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GuestNetwork {
    pub id: NetworkUuid,
    pub name: String,
    pub zone_id: ZoneUuid,
    pub is_redundant: bool,
}

/// Where an appliance physically runs
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub zone_id: ZoneUuid,
    pub pod_id: PodUuid,
    pub cluster_id: ClusterUuid,
    pub host_id: HostUuid,
    pub storage_pool_id: Option<StoragePoolUuid>,
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Up,
    Down,
    Disconnected,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HostStatus::Up => "up",
            HostStatus::Down => "down",
            HostStatus::Disconnected => "disconnected",
        })
    }
}

/// A hypervisor host as the placement catalog knows it
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Host {
    pub id: HostUuid,
    pub name: String,
    pub zone_id: ZoneUuid,
    pub pod_id: PodUuid,
    pub cluster_id: ClusterUuid,
    pub hypervisor: HypervisorType,
    pub status: HostStatus,
    /// Management node currently responsible for this host's agent.
    pub management_node: Option<NodeUuid>,
}

impl Host {
    pub fn is_up(&self) -> bool {
        self.status == HostStatus::Up
    }
}

/// Router image usable for a hypervisor type in a zone
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RouterTemplate {
    pub name: String,
    pub hypervisor: HypervisorType,
    pub version: String,
}

/// Physical resources placement must avoid
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct ExcludeList {
    pub pods: BTreeSet<PodUuid>,
    pub clusters: BTreeSet<ClusterUuid>,
    pub hosts: BTreeSet<HostUuid>,
    pub storage_pools: BTreeSet<StoragePoolUuid>,
}

impl ExcludeList {
    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
            && self.clusters.is_empty()
            && self.hosts.is_empty()
            && self.storage_pools.is_empty()
    }

    /// Returns true if a host in the given pod and cluster may not be used.
    pub fn excludes_host(&self, host: &Host) -> bool {
        self.pods.contains(&host.pod_id)
            || self.clusters.contains(&host.cluster_id)
            || self.hosts.contains(&host.id)
    }

    pub fn excludes_storage_pool(&self, pool: &StoragePoolUuid) -> bool {
        self.storage_pools.contains(pool)
    }

    /// The sequence of progressively weaker separation constraints tried when
    /// placing the second member of a redundant pair next to `peer`:
    /// different pod, different cluster, different host and storage pool,
    /// different host, and finally no constraint at all.
    pub fn separation_ladder(peer: &Placement) -> Vec<ExcludeList> {
        let mut by_pod = ExcludeList::default();
        by_pod.pods.insert(peer.pod_id);

        let mut by_cluster = ExcludeList::default();
        by_cluster.clusters.insert(peer.cluster_id);

        let mut by_pool_and_host = ExcludeList::default();
        by_pool_and_host.hosts.insert(peer.host_id);
        if let Some(pool) = peer.storage_pool_id {
            by_pool_and_host.storage_pools.insert(pool);
        }

        let mut by_host = ExcludeList::default();
        by_host.hosts.insert(peer.host_id);

        vec![by_pod, by_cluster, by_pool_and_host, by_host, ExcludeList::default()]
    }
}

/// Placement hint for a deployment or start
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DeploymentPlan {
    pub zone_id: ZoneUuid,
    pub pod_id: Option<PodUuid>,
    pub cluster_id: Option<ClusterUuid>,
    pub host_id: Option<HostUuid>,
    pub avoid: ExcludeList,
}

impl DeploymentPlan {
    pub fn for_zone(zone_id: ZoneUuid) -> Self {
        DeploymentPlan {
            zone_id,
            pod_id: None,
            cluster_id: None,
            host_id: None,
            avoid: ExcludeList::default(),
        }
    }

    pub fn with_avoid(&self, avoid: ExcludeList) -> Self {
        DeploymentPlan { avoid, ..self.clone() }
    }

    /// Returns true if `host` satisfies both the hint and the exclude list.
    pub fn admits_host(&self, host: &Host) -> bool {
        host.zone_id == self.zone_id
            && self.pod_id.map_or(true, |p| p == host.pod_id)
            && self.cluster_id.map_or(true, |c| c == host.cluster_id)
            && self.host_id.map_or(true, |h| h == host.id)
            && !self.avoid.excludes_host(host)
    }
}
