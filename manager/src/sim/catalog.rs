// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated placement catalog

use super::FleetState;
use crate::interfaces::PlacementCatalog;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use vrouter_common::api::Error;
use vrouter_common::api::GuestNetwork;
use vrouter_common::api::Host;
use vrouter_common::api::HypervisorType;
use vrouter_common::api::ListResultVec;
use vrouter_common::api::LookupResult;
use vrouter_common::api::ResourceType;
use vrouter_common::api::RouterTemplate;
use vrouter_common::typed_uuid::ClusterUuid;
use vrouter_common::typed_uuid::HostUuid;
use vrouter_common::typed_uuid::NetworkUuid;
use vrouter_common::typed_uuid::PodUuid;
use vrouter_common::typed_uuid::ZoneUuid;

pub struct SimCatalog {
    state: Arc<Mutex<FleetState>>,
    network_starts: Mutex<BTreeMap<NetworkUuid, usize>>,
    host_fetches: AtomicUsize,
}

impl SimCatalog {
    pub(crate) fn new(state: Arc<Mutex<FleetState>>) -> SimCatalog {
        SimCatalog {
            state,
            network_starts: Mutex::new(BTreeMap::new()),
            host_fetches: AtomicUsize::new(0),
        }
    }

    /// How many times `network_id` was asked to start.
    pub fn network_starts(&self, network_id: NetworkUuid) -> usize {
        self.network_starts
            .lock()
            .unwrap()
            .get(&network_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn host_fetches(&self) -> usize {
        self.host_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlacementCatalog for SimCatalog {
    async fn network_fetch(
        &self,
        network_id: NetworkUuid,
    ) -> LookupResult<GuestNetwork> {
        self.state
            .lock()
            .unwrap()
            .networks
            .get(&network_id)
            .cloned()
            .ok_or_else(|| {
                Error::not_found_by_id(
                    ResourceType::GuestNetwork,
                    network_id.as_untyped_uuid(),
                )
            })
    }

    async fn network_list_redundant(&self) -> ListResultVec<NetworkUuid> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .networks
            .values()
            .filter(|n| n.is_redundant)
            .map(|n| n.id)
            .collect())
    }

    async fn network_start(&self, network_id: NetworkUuid) -> Result<(), Error> {
        self.network_fetch(network_id).await?;
        *self.network_starts.lock().unwrap().entry(network_id).or_default() +=
            1;
        Ok(())
    }

    async fn host_fetch(&self, host_id: HostUuid) -> LookupResult<Host> {
        self.host_fetches.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .host(host_id)
            .map(|h| h.host.clone())
            .ok_or_else(|| {
                Error::not_found_by_id(
                    ResourceType::Host,
                    host_id.as_untyped_uuid(),
                )
            })
    }

    async fn cluster_hypervisor(
        &self,
        cluster_id: ClusterUuid,
    ) -> LookupResult<HypervisorType> {
        self.state
            .lock()
            .unwrap()
            .clusters
            .iter()
            .find(|c| c.id == cluster_id)
            .map(|c| c.hypervisor)
            .ok_or_else(|| {
                Error::not_found_by_id(
                    ResourceType::Cluster,
                    cluster_id.as_untyped_uuid(),
                )
            })
    }

    async fn zone_default_hypervisor(
        &self,
        zone_id: ZoneUuid,
    ) -> LookupResult<Option<HypervisorType>> {
        let state = self.state.lock().unwrap();
        if state.zone_id != zone_id {
            return Ok(None);
        }
        Ok(state.default_hypervisor)
    }

    async fn supported_hypervisors(
        &self,
        zone_id: ZoneUuid,
        pod_id: Option<PodUuid>,
    ) -> ListResultVec<HypervisorType> {
        let state = self.state.lock().unwrap();
        if state.zone_id != zone_id {
            return Ok(Vec::new());
        }
        let mut hypervisors = Vec::new();
        for cluster in &state.clusters {
            if pod_id.map_or(false, |p| p != cluster.pod_id) {
                continue;
            }
            if !hypervisors.contains(&cluster.hypervisor) {
                hypervisors.push(cluster.hypervisor);
            }
        }
        Ok(hypervisors)
    }

    async fn router_template(
        &self,
        zone_id: ZoneUuid,
        hypervisor: HypervisorType,
    ) -> LookupResult<Option<RouterTemplate>> {
        let state = self.state.lock().unwrap();
        if state.zone_id != zone_id {
            return Ok(None);
        }
        Ok(state.templates.get(&hypervisor).cloned())
    }
}
